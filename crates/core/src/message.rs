use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a message within a session history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Agent,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    pub fn agent(content: &str) -> Self {
        Self::new(Role::Agent, content)
    }

    pub fn tool(content: &str) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// A durable conversational context: ordered message history plus
/// session-scoped variables. Message order is append-only; the context
/// manager evicts the oldest entries when the configured cap is exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_touched: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            variables: HashMap::new(),
            created_at: now,
            last_touched: now,
        }
    }

    /// Whether this session has outlived the given timeout.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_touched + timeout < Utc::now()
    }

    pub fn touch(&mut self) {
        self.last_touched = Utc::now();
    }

    /// Append a message, evicting the oldest entries beyond `max_messages`.
    pub fn push_message(&mut self, message: Message, max_messages: usize) {
        self.messages.push(message);
        if self.messages.len() > max_messages {
            let excess = self.messages.len() - max_messages;
            self.messages.drain(..excess);
        }
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::tool("out").role, Role::Tool);
        assert_eq!(Role::Agent.to_string(), "agent");
    }

    #[test]
    fn test_push_message_evicts_oldest() {
        let mut session = Session::new("s1");
        for i in 0..5 {
            session.push_message(Message::user(&format!("m{}", i)), 3);
        }
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[0].content, "m2");
        assert_eq!(session.messages[2].content, "m4");
    }

    #[test]
    fn test_expiry() {
        let mut session = Session::new("s1");
        assert!(!session.is_expired(Duration::seconds(60)));
        session.last_touched = Utc::now() - Duration::seconds(120);
        assert!(session.is_expired(Duration::seconds(60)));
    }

    #[test]
    fn test_session_roundtrip() {
        let mut session = Session::new("s1");
        session.push_message(Message::user("hello"), 10);
        session
            .variables
            .insert("k".to_string(), serde_json::json!(42));
        let value = serde_json::to_value(&session).unwrap();
        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, "s1");
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.variables["k"], serde_json::json!(42));
    }
}
