pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use config::ConsoleConfig;
pub use error::{ConsoleError, ConsoleResult};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
