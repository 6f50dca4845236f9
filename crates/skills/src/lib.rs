pub mod descriptor;
pub mod echo;
pub mod loader;
pub mod manifest;
pub mod shell;

pub use descriptor::{ActionSpec, ParamKind, ParamSpec, SkillDescriptor};
pub use echo::EchoSkill;
pub use loader::{
    BuiltinSource, DiscoveryError, DiscoveryReport, SkillCandidate, SkillFactory, SkillLoader,
    SkillSource,
};
pub use manifest::ManifestSource;
pub use shell::ShellSkill;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use taskcell_core::{Result, Session, ShellConfig};

/// Per-invocation context handed to a skill by the task runner.
///
/// Carries a snapshot of the session (if the task is session-bound), the
/// cooperative cancellation token, and the slice of runtime configuration
/// a skill may need. Skills are expected to observe the token at their own
/// suspension points; the runtime never forcibly terminates them.
#[derive(Clone)]
pub struct SkillContext {
    pub session: Option<Session>,
    pub cancel: CancellationToken,
    pub shell: ShellConfig,
}

impl SkillContext {
    /// A detached context with no session, used by tests and direct
    /// invocations outside the runner.
    pub fn detached() -> Self {
        Self {
            session: None,
            cancel: CancellationToken::new(),
            shell: ShellConfig::default(),
        }
    }
}

/// The capability contract every skill must satisfy.
///
/// A skill declares its shape through a [`SkillDescriptor`] and handles all
/// of its declared actions in `execute`. Execution errors belong to the
/// caller that invoked `execute`; the loader only cares about the shape.
#[async_trait]
pub trait Skill: Send + Sync {
    fn descriptor(&self) -> SkillDescriptor;

    /// Whether one instance may be shared across unrelated tasks. Stateless
    /// skills can opt in; the default is a fresh instance per invocation.
    fn reusable(&self) -> bool {
        false
    }

    async fn execute(&self, action: &str, ctx: SkillContext, params: Value) -> Result<Value>;
}

impl std::fmt::Debug for dyn Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.descriptor().name)
            .finish_non_exhaustive()
    }
}
