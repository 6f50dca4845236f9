pub mod context;
pub mod kernel;
pub mod runner;

pub use context::ContextManager;
pub use kernel::Kernel;
pub use runner::{TaskRunner, TaskSummary};
