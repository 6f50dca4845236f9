use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use taskcell_core::{Error, Result, RuntimeConfig};
use taskcell_memory::{FileMemory, InMemory, MemoryAdapter};
use taskcell_skills::{BuiltinSource, DiscoveryReport, ManifestSource, SkillLoader, SkillSource};

use crate::context::ContextManager;
use crate::runner::TaskRunner;

/// The assembled runtime: memory backend, skill loader, context manager
/// and task runner wired together from one configuration.
pub struct Kernel {
    config: RuntimeConfig,
    loader: Arc<SkillLoader>,
    context: Arc<ContextManager>,
    runner: TaskRunner,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Build the runtime from a validated configuration. No skills are
    /// available until [`Kernel::start`] has run a discovery pass.
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let memory: Arc<dyn MemoryAdapter> = match config.memory.backend.as_str() {
            "memory" => Arc::new(InMemory::new()),
            "file" => {
                let base_dir = config
                    .memory
                    .base_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("data/memory"));
                Arc::new(FileMemory::new(base_dir))
            }
            other => {
                return Err(Error::Config(format!(
                    "Unknown memory backend: '{}' (expected 'file' or 'memory')",
                    other
                )))
            }
        };

        let mut sources: Vec<Box<dyn SkillSource>> =
            vec![Box::new(BuiltinSource::with_defaults())];
        if !config.skill_dirs.is_empty() {
            sources.push(Box::new(ManifestSource::new(config.skill_dirs.clone())));
        }

        let loader = Arc::new(SkillLoader::new(sources));
        let context = Arc::new(ContextManager::new(memory, &config));
        let runner = TaskRunner::new(Arc::clone(&loader), Arc::clone(&context), &config);

        Ok(Self {
            config,
            loader,
            context,
            runner,
        })
    }

    /// Run the initial skill discovery pass and report what was loaded.
    pub async fn start(&self) -> DiscoveryReport {
        let report = self.loader.discover().await;
        info!(
            backend = %self.config.memory.backend,
            skills = report.loaded,
            errors = report.errors.len(),
            "Runtime started"
        );
        report
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<SkillLoader> {
        &self.loader
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }
}
