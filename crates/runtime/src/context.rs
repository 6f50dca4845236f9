use chrono::Duration;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use taskcell_core::{Error, Message, Result, RuntimeConfig, Session};
use taskcell_memory::{MemoryAdapter, SESSIONS_SCOPE};

/// Owns session lifecycle, message history and session-scoped variables,
/// persisting transparently through the memory adapter after every
/// interaction.
///
/// Appends to one session are serialized through a per-session mutex, so
/// concurrent appenders to the same session are applied one at a time in
/// call order. Sessions are never written to storage directly by anyone
/// else; this manager is the adapter's only session client.
pub struct ContextManager {
    memory: Arc<dyn MemoryAdapter>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    max_messages: usize,
    timeout: Duration,
}

impl ContextManager {
    pub fn new(memory: Arc<dyn MemoryAdapter>, config: &RuntimeConfig) -> Self {
        Self {
            memory,
            sessions: Mutex::new(HashMap::new()),
            max_messages: config.max_messages,
            timeout: Duration::seconds(config.session_timeout_secs as i64),
        }
    }

    /// Return the session for `id`, creating an empty one when the id is
    /// unseen or the persisted record has expired. Expired data is dropped,
    /// never silently merged.
    pub async fn get_or_create_session(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;
        self.reset_if_expired(&mut session).await;
        session.touch();
        Ok(session.clone())
    }

    /// Append a message to the session history, evicting the oldest
    /// entries beyond the configured maximum, and persist the record.
    pub async fn append_message(&self, session_id: &str, message: Message) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.reset_if_expired(&mut session).await;
        session.push_message(message, self.max_messages);
        self.persist(&session).await
    }

    pub async fn set_variable(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut session = entry.lock().await;
        self.reset_if_expired(&mut session).await;
        session.variables.insert(key.to_string(), value);
        session.touch();
        self.persist(&session).await
    }

    pub async fn get_variable(&self, session_id: &str, key: &str) -> Result<Value> {
        let entry = self.entry(session_id).await?;
        let session = entry.lock().await;
        if session.is_expired(self.timeout) {
            return Err(Error::NotFound(format!(
                "Variable '{}' not found in session '{}'",
                key, session_id
            )));
        }
        session.variables.get(key).cloned().ok_or_else(|| {
            Error::NotFound(format!(
                "Variable '{}' not found in session '{}'",
                key, session_id
            ))
        })
    }

    /// Remove all expired persisted sessions. Each removal is independent:
    /// a failure is logged and the sweep continues. Returns the number of
    /// sessions removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let keys = self.memory.list_keys(SESSIONS_SCOPE).await?;
        let mut removed = 0;

        for key in keys {
            let value = match self.memory.load(SESSIONS_SCOPE, &key).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(session = %key, error = %e, "Failed to load session during sweep");
                    continue;
                }
            };
            let session: Session = match serde_json::from_value(value) {
                Ok(session) => session,
                Err(e) => {
                    warn!(session = %key, error = %e, "Corrupt session record, skipping");
                    continue;
                }
            };
            if !session.is_expired(self.timeout) {
                continue;
            }
            if let Err(e) = self.memory.delete(SESSIONS_SCOPE, &key).await {
                warn!(session = %key, error = %e, "Failed to delete expired session");
                continue;
            }
            self.sessions.lock().await.remove(&key);
            removed += 1;
        }

        if removed > 0 {
            debug!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Shared handle for one session, loading from the adapter on first
    /// reference. Expired persisted records start fresh.
    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return Ok(Arc::clone(existing));
        }

        let session = match self.memory.load(SESSIONS_SCOPE, id).await {
            Ok(value) => match serde_json::from_value::<Session>(value) {
                Ok(session) if !session.is_expired(self.timeout) => {
                    debug!(session = %id, messages = session.messages.len(), "Restored session");
                    session
                }
                Ok(_) => {
                    let _ = self.memory.delete(SESSIONS_SCOPE, id).await;
                    debug!(session = %id, "Persisted session expired, starting fresh");
                    Session::new(id)
                }
                Err(e) => {
                    warn!(session = %id, error = %e, "Corrupt session record, starting fresh");
                    Session::new(id)
                }
            },
            Err(e) if e.is_not_found() => Session::new(id),
            // Backend faults propagate; the caller decides what to do.
            Err(e) => return Err(e),
        };

        let entry = Arc::new(Mutex::new(session));
        sessions.insert(id.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    async fn reset_if_expired(&self, session: &mut Session) {
        if session.is_expired(self.timeout) {
            let _ = self.memory.delete(SESSIONS_SCOPE, &session.id).await;
            *session = Session::new(&session.id);
        }
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let value = serde_json::to_value(session)
            .map_err(|e| Error::Serialization(format!("Failed to encode session: {}", e)))?;
        self.memory.save(SESSIONS_SCOPE, &session.id, &value).await
    }
}
