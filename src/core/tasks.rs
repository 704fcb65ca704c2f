//! 后台任务管理
//!
//! 统一管理四个长期同步任务的注册、启动和关闭。
//!
//! # 任务类型
//!
//! - [`TaskKind::Listener`] - 阻塞式长轮询 (Consul fetch)
//! - [`TaskKind::Periodic`] - 定时任务 (Cloud Map fetch)
//! - [`TaskKind::Worker`] - 触发驱动的调和器
//!
//! 任何一个任务退出都会触发整体关闭：编排器记录首个退出的任务，
//! 取消其余任务并按注册顺序逐一等待。

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::SyncResult;

/// 首个退出任务的名称及其终止结果
pub type TaskExit = (&'static str, SyncResult<()>);

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 长期后台工作者
    Worker,
    /// 事件监听器
    Listener,
    /// 定时任务
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Listener => write!(f, "Listener"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

/// 已注册的后台任务
struct RegisteredTask {
    /// 任务名称
    name: &'static str,
    /// 任务类型
    kind: TaskKind,
    /// 任务句柄
    handle: JoinHandle<()>,
}

/// 后台任务管理器
///
/// 每个任务持有自己的取消令牌 (stop)，其 [`JoinHandle`] 充当 stopped
/// 信号。[`BackgroundTasks::run_until_shutdown`] 等待外部关闭或任意
/// 任务退出。
pub struct BackgroundTasks {
    /// 已注册的任务列表
    tasks: Vec<RegisteredTask>,
    /// 全局取消令牌（各任务令牌的父节点）
    shutdown: CancellationToken,
    exit_tx: mpsc::UnboundedSender<TaskExit>,
    exit_rx: mpsc::UnboundedReceiver<TaskExit>,
}

impl BackgroundTasks {
    /// 创建新的任务管理器
    pub fn new() -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
            exit_tx,
            exit_rx,
        }
    }

    /// 注册并启动一个后台任务
    ///
    /// # 参数
    ///
    /// - `name`: 任务名称（用于日志和调试）
    /// - `kind`: 任务类型
    /// - `task`: 接收专属取消令牌的异步任务；返回值即任务终止结果
    pub fn spawn<F, Fut>(&mut self, name: &'static str, kind: TaskKind, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let cancel = self.shutdown.child_token();
        let exit_tx = self.exit_tx.clone();
        let future = task(cancel);
        let handle = tokio::spawn(async move {
            let result = future.await;
            let _ = exit_tx.send((name, result));
        });
        tracing::debug!(task = %name, kind = %kind, "Registered background task");
        self.tasks.push(RegisteredTask { name, kind, handle });
    }

    /// 获取已注册任务数量
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 检查是否没有注册任务
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 打印任务摘要
    pub fn log_summary(&self) {
        let mut worker = 0;
        let mut listener = 0;
        let mut periodic = 0;
        for task in &self.tasks {
            match task.kind {
                TaskKind::Worker => worker += 1,
                TaskKind::Listener => listener += 1,
                TaskKind::Periodic => periodic += 1,
            }
        }
        tracing::info!(
            "📋 Background tasks registered: {} total (Worker: {}, Listener: {}, Periodic: {})",
            self.tasks.len(),
            worker,
            listener,
            periodic,
        );
    }

    /// 运行直至外部关闭或任意任务退出
    ///
    /// 返回 `None` 表示外部请求的正常关闭；返回 `Some((name, result))`
    /// 表示任务 `name` 意外退出（`result` 为其终止结果）并触发了整体
    /// 关闭。两种情况下都会取消并等待所有剩余任务。
    pub async fn run_until_shutdown(mut self, shutdown: CancellationToken) -> Option<TaskExit> {
        let failed = tokio::select! {
            _ = shutdown.cancelled() => None,
            exit = self.exit_rx.recv() => exit,
        };

        match &failed {
            Some((name, Err(e))) => {
                tracing::error!(task = %name, error = %e, "task failed, shutting down the rest...")
            }
            Some((name, Ok(()))) => {
                tracing::error!(task = %name, "task exited, shutting down the rest...")
            }
            None => tracing::info!("🛑 Shutting down {} background tasks...", self.tasks.len()),
        }

        // 发送取消信号
        self.shutdown.cancel();

        // 按注册顺序等待所有任务完成
        for task in self.tasks {
            match task.handle.await {
                Ok(()) => {
                    tracing::debug!(task = %task.name, "Task completed");
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(task = %task.name, "Task cancelled");
                }
                Err(e) => {
                    tracing::error!(task = %task.name, error = ?e, "Task panicked");
                }
            }
        }

        tracing::info!("✅ All background tasks stopped");
        failed
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SyncError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clean_external_shutdown() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn("idle", TaskKind::Worker, |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });
        assert_eq!(tasks.len(), 1);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(tasks.run_until_shutdown(shutdown).await.is_none());
    }

    #[tokio::test]
    async fn test_first_exit_is_reported_and_cancels_the_rest() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn("short-lived", TaskKind::Periodic, |_cancel| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });
        tasks.spawn("long-lived", TaskKind::Worker, |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });

        let failed = tasks.run_until_shutdown(CancellationToken::new()).await;
        assert!(matches!(failed, Some(("short-lived", Ok(())))));
    }

    #[tokio::test]
    async fn test_terminal_error_is_carried_to_the_caller() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn("doomed", TaskKind::Listener, |_cancel| async move {
            Err(SyncError::FatalFetch(10))
        });

        let failed = tasks.run_until_shutdown(CancellationToken::new()).await;
        assert!(matches!(failed, Some(("doomed", Err(SyncError::FatalFetch(10))))));
    }
}
