//! 同步配置 - sync-catalog 子命令的所有配置项
//!
//! 配置来自命令行标志；Consul 连接信息可通过环境变量覆盖：
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | CONSUL_HTTP_ADDR | http://127.0.0.1:8500 | Consul agent 地址 |
//! | CONSUL_HTTP_TOKEN | (无) | Consul ACL token |

use std::time::Duration;

use crate::common::{SyncError, SyncResult};

/// Default interval between Cloud Map fetches.
pub const DEFAULT_POLL_INTERVAL: &str = "30s";
/// Default TTL for SRV records created in non-HTTP namespaces.
pub const DEFAULT_DNS_TTL: i64 = 60;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 启用 Consul -> Cloud Map 方向
    pub to_aws: bool,
    /// 启用 Cloud Map -> Consul 方向
    pub to_consul: bool,
    /// 要镜像的 Cloud Map 命名空间（必填）
    pub aws_namespace_id: String,
    /// 写入 Consul 的外来服务名前缀
    pub consul_prefix: String,
    /// 写入 Cloud Map 的外来服务名前缀
    pub aws_prefix: String,
    /// Cloud Map 拉取间隔
    pub poll_interval: Duration,
    /// 非 HTTP 命名空间中 SRV 记录的 TTL（秒）
    pub dns_ttl: i64,
    /// 允许 Consul 过期读
    pub stale: bool,
    /// Consul 命名空间（企业版，可选）
    pub consul_namespace: String,
    /// Consul admin partition（企业版，可选）
    pub consul_partition: String,
    /// Consul agent 地址
    pub consul_http_addr: String,
    /// Consul ACL token
    pub consul_http_token: String,
}

impl SyncConfig {
    /// 解析 "30s" / "1.5m" 形式的拉取间隔
    pub fn parse_poll_interval(value: &str) -> SyncResult<Duration> {
        humantime::parse_duration(value).map_err(|e| {
            SyncError::InvalidConfig(format!("cannot parse poll interval {value:?}: {e}"))
        })
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.aws_namespace_id.is_empty() {
            return Err(SyncError::InvalidConfig(
                "please provide --aws-namespace-id".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            to_aws: false,
            to_consul: false,
            aws_namespace_id: String::new(),
            consul_prefix: String::new(),
            aws_prefix: String::new(),
            poll_interval: Duration::from_secs(30),
            dns_ttl: DEFAULT_DNS_TTL,
            stale: true,
            consul_namespace: String::new(),
            consul_partition: String::new(),
            consul_http_addr: std::env::var("CONSUL_HTTP_ADDR")
                .unwrap_or_else(|_| "http://127.0.0.1:8500".into()),
            consul_http_token: std::env::var("CONSUL_HTTP_TOKEN").unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_poll_interval() {
        assert_eq!(
            SyncConfig::parse_poll_interval("30s").unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            SyncConfig::parse_poll_interval("300ms").unwrap(),
            Duration::from_millis(300)
        );
        assert!(SyncConfig::parse_poll_interval("not a duration").is_err());
    }

    #[test]
    fn test_validate_requires_namespace() {
        let config = SyncConfig::default();
        assert!(config.validate().is_err());

        let config = SyncConfig {
            aws_namespace_id: "ns-1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
