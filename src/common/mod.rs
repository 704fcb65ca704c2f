pub mod error;
pub mod logger;

pub use error::{SyncError, SyncResult};
pub use logger::init_logger;
