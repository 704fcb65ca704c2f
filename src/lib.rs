//! consul-cloudmap - Consul 与 AWS Cloud Map 之间的双向目录同步
//!
//! # 架构概述
//!
//! 四个长期任务、两个快照存储、两个触发通道：
//!
//! - **Consul fetcher** (`consul`): 阻塞式长轮询，目录索引推进时重建快照
//! - **Cloud Map fetcher** (`aws`): 定时拉取命名空间并重建快照
//! - **两个调和器** (`sync::reconciler`): 对两侧快照做差分，向对端写入
//! - **编排器** (`core::tasks`): 启动全部任务，任一退出时整体回收
//!
//! # 模块结构
//!
//! ```text
//! src/
//! ├── core/          # 配置、后台任务管理
//! ├── catalog/       # 数据模型、快照、差分算法
//! ├── consul/        # Consul 适配器与同步源
//! ├── aws/           # Cloud Map 适配器与同步源
//! ├── sync/          # 调和器与生命周期编排
//! ├── cli/           # 命令行
//! └── common/        # 日志、错误
//! ```

pub mod aws;
pub mod catalog;
pub mod cli;
pub mod common;
pub mod consul;
pub mod core;
pub mod sync;

// Re-export 公共类型
pub use common::{SyncError, SyncResult, init_logger};
pub use core::{BackgroundTasks, SyncConfig, TaskExit, TaskKind};
pub use sync::SyncInput;
