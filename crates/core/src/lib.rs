pub mod config;
pub mod error;
pub mod message;
pub mod task;

pub use config::{MemoryConfig, RuntimeConfig, ShellConfig};
pub use error::{Error, Result};
pub use message::{Message, Role, Session};
pub use task::{Task, TaskStatus};
