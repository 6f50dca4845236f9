use serde::{Deserialize, Serialize};
use serde_json::Value;

use taskcell_core::{Error, Result};

/// Expected type of a declared parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
}

fn default_kind() -> ParamKind {
    ParamKind::Any
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl ActionSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, kind: ParamKind, required: bool) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required,
        });
        self
    }

    /// Validate a parameter object against the declared schema. Rejected
    /// tasks never reach the running state.
    pub fn validate_params(&self, params: &Value) -> Result<()> {
        let obj = match params {
            Value::Object(map) => map,
            Value::Null => {
                if self.params.iter().any(|p| p.required) {
                    return Err(Error::Validation(format!(
                        "Action '{}' requires parameters but none were given",
                        self.name
                    )));
                }
                return Ok(());
            }
            _ => {
                return Err(Error::Validation(format!(
                    "Parameters for action '{}' must be an object",
                    self.name
                )))
            }
        };

        for spec in &self.params {
            match obj.get(&spec.name) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(Error::Validation(format!(
                            "Parameter '{}' of action '{}' has the wrong type (expected {:?})",
                            spec.name, self.name, spec.kind
                        )));
                    }
                }
                None if spec.required => {
                    return Err(Error::Validation(format!(
                        "Missing required parameter '{}' for action '{}'",
                        spec.name, self.name
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Declared shape of a skill: unique name, description and the actions it
/// handles. Rebuilt on every discovery pass and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl SkillDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            actions: Vec::new(),
        }
    }

    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn get_action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Shape check applied at registration time. Candidates failing this
    /// are skipped by the loader and reported as discovery errors.
    pub fn validate_shape(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Skill name must not be empty".to_string()));
        }
        if self.actions.is_empty() {
            return Err(Error::Validation(format!(
                "Skill '{}' declares no actions",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for action in &self.actions {
            if action.name.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Skill '{}' has an action with an empty name",
                    self.name
                )));
            }
            if !seen.insert(action.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Skill '{}' declares action '{}' twice",
                    self.name, action.name
                )));
            }
            let mut params_seen = std::collections::HashSet::new();
            for param in &action.params {
                if !params_seen.insert(param.name.as_str()) {
                    return Err(Error::Validation(format!(
                        "Action '{}' of skill '{}' declares parameter '{}' twice",
                        action.name, self.name, param.name
                    )));
                }
            }
        }
        Ok(())
    }
}
