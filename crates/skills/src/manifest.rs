use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use taskcell_core::{Error, Result};

use crate::descriptor::{ActionSpec, ParamSpec};
use crate::loader::{SkillCandidate, SkillSource};
use crate::shell::run_sh;
use crate::{Skill, SkillContext, SkillDescriptor};

/// Declarative skill manifest, `meta.yaml` in a skill directory.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SkillMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: SkillRequires,
    #[serde(default)]
    pub actions: Vec<ManifestAction>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SkillRequires {
    #[serde(default)]
    pub bins: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestAction {
    pub name: String,
    /// Script file relative to the skill directory; the action's
    /// executable entry point.
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

/// A skill defined entirely by a manifest plus shell scripts. Parameters
/// are handed to the script as JSON in the `SKILL_PARAMS` environment
/// variable; stdout/exit code come back as the result payload.
pub struct ManifestSkill {
    meta: SkillMeta,
    dir: PathBuf,
}

impl ManifestSkill {
    fn script_for(&self, action: &str) -> Result<PathBuf> {
        let spec = self
            .meta
            .actions
            .iter()
            .find(|a| a.name == action)
            .ok_or_else(|| Error::NotFound(format!("Unknown action: {}", action)))?;
        let script = spec
            .script
            .as_ref()
            .ok_or_else(|| {
                Error::Validation(format!("Action '{}' has no script entry point", action))
            })?;
        Ok(self.dir.join(script))
    }
}

#[async_trait]
impl Skill for ManifestSkill {
    fn descriptor(&self) -> SkillDescriptor {
        let mut descriptor = SkillDescriptor::new(&self.meta.name, &self.meta.description);
        for action in &self.meta.actions {
            descriptor.actions.push(ActionSpec {
                name: action.name.clone(),
                params: action.params.clone(),
            });
        }
        descriptor
    }

    fn reusable(&self) -> bool {
        true
    }

    async fn execute(&self, action: &str, ctx: SkillContext, params: Value) -> Result<Value> {
        let script = self.script_for(action)?;
        let params_json = serde_json::to_string(&params)?;
        let command = format!("sh '{}'", script.display());
        let envs = [("SKILL_PARAMS".to_string(), params_json)];
        run_sh(&command, &self.dir, &envs, &ctx.shell, &ctx.cancel).await
    }
}

/// Discovery source scanning directories of manifest-declared skills.
///
/// Each immediate subdirectory containing a `meta.yaml` is a candidate.
/// Candidates with a malformed manifest, a missing script entry point, or
/// unmet `requires` are reported as discovery errors and skipped.
pub struct ManifestSource {
    dirs: Vec<PathBuf>,
}

impl ManifestSource {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    fn load_skill(dir: &Path) -> Result<Arc<dyn Skill>> {
        let meta_path = dir.join("meta.yaml");
        let content = std::fs::read_to_string(&meta_path)?;
        let mut meta: SkillMeta = serde_yaml::from_str(&content)?;

        // Fall back to the directory name, like built-in tool names do.
        if meta.name.trim().is_empty() {
            meta.name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
        }

        for action in &meta.actions {
            let script = action.script.as_ref().ok_or_else(|| {
                Error::Validation(format!(
                    "Skill '{}' action '{}' declares no script entry point",
                    meta.name, action.name
                ))
            })?;
            let path = dir.join(script);
            if !path.exists() {
                return Err(Error::Validation(format!(
                    "Skill '{}' action '{}' script not found: {}",
                    meta.name,
                    action.name,
                    path.display()
                )));
            }
        }

        for bin in &meta.requires.bins {
            if which::which(bin).is_err() {
                return Err(Error::Validation(format!(
                    "Skill '{}' missing required binary: {}",
                    meta.name, bin
                )));
            }
        }
        for var in &meta.requires.env {
            if std::env::var(var).is_err() {
                return Err(Error::Validation(format!(
                    "Skill '{}' missing required env var: {}",
                    meta.name, var
                )));
            }
        }

        Ok(Arc::new(ManifestSkill {
            meta,
            dir: dir.to_path_buf(),
        }))
    }
}

impl SkillSource for ManifestSource {
    fn name(&self) -> &str {
        "manifest"
    }

    fn candidates(&self) -> Vec<SkillCandidate> {
        let mut candidates = Vec::new();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                debug!(path = %dir.display(), "Skill directory not readable, skipping");
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() || !path.join("meta.yaml").exists() {
                    continue;
                }
                let origin = path.display().to_string();
                let skill_dir = path.clone();
                candidates.push(SkillCandidate {
                    origin,
                    factory: Arc::new(move || Self::load_skill(&skill_dir)),
                });
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SkillLoader;
    use serde_json::json;

    fn write_skill(root: &Path, name: &str, meta: &str, script: Option<(&str, &str)>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.yaml"), meta).unwrap();
        if let Some((file, body)) = script {
            std::fs::write(dir.join(file), body).unwrap();
        }
    }

    #[tokio::test]
    async fn test_discover_valid_and_invalid() {
        let root = tempfile::tempdir().unwrap();
        write_skill(
            root.path(),
            "greeter",
            "name: greeter\ndescription: says hello\nactions:\n  - name: hello\n    script: hello.sh\n",
            Some(("hello.sh", "echo hello")),
        );
        // Candidate with no script entry point: validated out, reported.
        write_skill(
            root.path(),
            "broken",
            "name: broken\ndescription: nothing to run\nactions:\n  - name: go\n",
            None,
        );

        let source = ManifestSource::new(vec![root.path().to_path_buf()]);
        let loader = SkillLoader::new(vec![Box::new(source)]);
        let report = loader.discover().await;

        assert_eq!(report.loaded, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("script entry point"));
        assert!(loader.get("greeter").await.is_ok());
        assert!(loader.get("broken").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_manifest_skill_executes_script() {
        let root = tempfile::tempdir().unwrap();
        write_skill(
            root.path(),
            "greeter",
            "name: greeter\ndescription: says hello\nactions:\n  - name: hello\n    script: hello.sh\n    params:\n      - name: who\n        kind: string\n        required: true\n",
            Some(("hello.sh", "echo \"hello $SKILL_PARAMS\"")),
        );

        let source = ManifestSource::new(vec![root.path().to_path_buf()]);
        let loader = SkillLoader::new(vec![Box::new(source)]);
        loader.discover().await;

        let skill = loader.instantiate("greeter").await.unwrap();
        let result = skill
            .execute("hello", SkillContext::detached(), json!({"who": "world"}))
            .await
            .unwrap();
        assert_eq!(result["exit_code"], json!(0));
        assert!(result["stdout"].as_str().unwrap().contains("world"));
    }

    #[tokio::test]
    async fn test_missing_required_binary_is_discovery_error() {
        let root = tempfile::tempdir().unwrap();
        write_skill(
            root.path(),
            "needs-tool",
            "name: needs-tool\ndescription: depends on a binary\nrequires:\n  bins: [definitely-not-a-real-binary-xyz]\nactions:\n  - name: go\n    script: go.sh\n",
            Some(("go.sh", "true")),
        );

        let source = ManifestSource::new(vec![root.path().to_path_buf()]);
        let loader = SkillLoader::new(vec![Box::new(source)]);
        let report = loader.discover().await;
        assert_eq!(report.loaded, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("required binary"));
    }

    #[tokio::test]
    async fn test_missing_directory_yields_no_candidates() {
        let source = ManifestSource::new(vec![PathBuf::from("/nonexistent/skills")]);
        assert!(source.candidates().is_empty());
    }

    #[tokio::test]
    async fn test_name_falls_back_to_directory() {
        let root = tempfile::tempdir().unwrap();
        write_skill(
            root.path(),
            "dirname",
            "description: anonymous\nactions:\n  - name: go\n    script: go.sh\n",
            Some(("go.sh", "true")),
        );
        let source = ManifestSource::new(vec![root.path().to_path_buf()]);
        let loader = SkillLoader::new(vec![Box::new(source)]);
        loader.discover().await;
        assert!(loader.get("dirname").await.is_ok());
    }
}
