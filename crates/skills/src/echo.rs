use async_trait::async_trait;
use serde_json::{json, Value};

use taskcell_core::{Error, Result};

use crate::descriptor::{ActionSpec, ParamKind};
use crate::{Skill, SkillContext, SkillDescriptor};

/// Trivial built-in skill that returns its input. Mostly exercised by
/// tests and smoke checks.
pub struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn descriptor(&self) -> SkillDescriptor {
        SkillDescriptor::new("echo", "Echo the given text back").action(
            ActionSpec::new("say").param("text", ParamKind::String, true),
        )
    }

    fn reusable(&self) -> bool {
        true
    }

    async fn execute(&self, action: &str, _ctx: SkillContext, params: Value) -> Result<Value> {
        if action != "say" {
            return Err(Error::NotFound(format!("Unknown action: {}", action)));
        }
        let text = params
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing required parameter: text".to_string()))?;
        Ok(json!({ "echo": text }))
    }
}
