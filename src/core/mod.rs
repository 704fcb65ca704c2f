pub mod config;
pub mod tasks;

pub use config::SyncConfig;
pub use tasks::{BackgroundTasks, TaskExit, TaskKind};
