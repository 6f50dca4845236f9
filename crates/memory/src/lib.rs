pub mod file;
pub mod in_memory;

pub use file::FileMemory;
pub use in_memory::InMemory;

use async_trait::async_trait;
use serde_json::Value;
use taskcell_core::Result;

/// Durable key-addressed storage for sessions and skill-scoped blobs.
///
/// All durable state in the runtime goes through this contract; the
/// context manager and task runner never touch a backend directly. Values
/// are whole-value reads and writes with no partial merge, and a `save`
/// must be atomic from the caller's perspective.
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// Load the value stored under `(scope, key)`.
    /// Fails with `Error::NotFound` when the key is absent.
    async fn load(&self, scope: &str, key: &str) -> Result<Value>;

    /// Overwrite the value stored under `(scope, key)`.
    async fn save(&self, scope: &str, key: &str, value: &Value) -> Result<()>;

    /// Remove the value under `(scope, key)`. Idempotent; a missing key
    /// is not an error.
    async fn delete(&self, scope: &str, key: &str) -> Result<()>;

    /// List all keys present in `scope`.
    async fn list_keys(&self, scope: &str) -> Result<Vec<String>>;
}

/// Scope used by the context manager for session records.
pub const SESSIONS_SCOPE: &str = "sessions";
