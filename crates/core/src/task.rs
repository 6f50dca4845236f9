use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a submitted task.
///
/// Transitions are strictly `Pending -> Running -> {Succeeded, Failed}`,
/// with `Cancelled` reachable from `Pending` or `Running`. Terminal states
/// are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One request to invoke a skill action, tracked through its lifecycle
/// by the task runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub skill: String,
    pub action: String,
    pub params: serde_json::Value,
    pub session_id: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Present iff the task succeeded.
    pub result: Option<serde_json::Value>,
    /// Present iff the task failed.
    pub error: Option<String>,
}

impl Task {
    pub fn new(skill: &str, action: &str, params: serde_json::Value, session_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            skill: skill.to_string(),
            action: action.to_string(),
            params,
            session_id: session_id.to_string(),
            status: TaskStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("shell", "run", serde_json::json!({}), "s1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_task_ids_unique() {
        let a = Task::new("shell", "run", serde_json::json!({}), "s1");
        let b = Task::new("shell", "run", serde_json::json!({}), "s1");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(s, "\"running\"");
    }
}
