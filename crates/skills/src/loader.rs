use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use taskcell_core::{Error, Result};

use crate::{Skill, SkillDescriptor};

/// Builds a fresh capability instance for one registered skill.
pub trait SkillFactory: Send + Sync {
    fn build(&self) -> Result<Arc<dyn Skill>>;
}

impl<F> SkillFactory for F
where
    F: Fn() -> Result<Arc<dyn Skill>> + Send + Sync,
{
    fn build(&self) -> Result<Arc<dyn Skill>> {
        self()
    }
}

/// One candidate produced by a discovery source, before validation.
pub struct SkillCandidate {
    /// Where the candidate came from, for diagnostics (e.g. a directory).
    pub origin: String,
    pub factory: Arc<dyn SkillFactory>,
}

/// A location skills can be discovered from. Sources are scanned in the
/// order they were configured; a source yielding zero candidates is fine.
pub trait SkillSource: Send + Sync {
    fn name(&self) -> &str;
    fn candidates(&self) -> Vec<SkillCandidate>;
}

/// In-process source for skills compiled into the host, registered as
/// factories at construction time.
#[derive(Default)]
pub struct BuiltinSource {
    candidates: Vec<(String, Arc<dyn SkillFactory>)>,
}

impl BuiltinSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, origin: &str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Skill>> + Send + Sync + 'static,
    {
        self.candidates.push((origin.to_string(), Arc::new(factory)));
        self
    }

    /// The built-in skills shipped with the runtime.
    pub fn with_defaults() -> Self {
        Self::new()
            .register("builtin:shell", || {
                Ok(Arc::new(crate::ShellSkill) as Arc<dyn Skill>)
            })
            .register("builtin:echo", || {
                Ok(Arc::new(crate::EchoSkill) as Arc<dyn Skill>)
            })
    }
}

impl SkillSource for BuiltinSource {
    fn name(&self) -> &str {
        "builtin"
    }

    fn candidates(&self) -> Vec<SkillCandidate> {
        self.candidates
            .iter()
            .map(|(origin, factory)| SkillCandidate {
                origin: origin.clone(),
                factory: Arc::clone(factory),
            })
            .collect()
    }
}

/// A candidate that failed validation during a discovery pass. Non-fatal:
/// the pass continues and the report carries these for diagnostics.
#[derive(Debug, Clone)]
pub struct DiscoveryError {
    pub source: String,
    pub origin: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub loaded: usize,
    pub errors: Vec<DiscoveryError>,
}

struct RegistryEntry {
    descriptor: SkillDescriptor,
    factory: Arc<dyn SkillFactory>,
    /// Populated when the skill declared itself reusable; handed out to
    /// every caller instead of building fresh instances.
    shared: Option<Arc<dyn Skill>>,
}

type Registry = HashMap<String, RegistryEntry>;

/// Discovers skills from configured sources and serves lookup-by-name.
///
/// Each discovery pass builds a complete replacement registry and swaps it
/// in atomically: concurrent lookups observe either the old snapshot or the
/// new one, never a mix.
pub struct SkillLoader {
    sources: Vec<Box<dyn SkillSource>>,
    registry: RwLock<Arc<Registry>>,
}

impl SkillLoader {
    pub fn new(sources: Vec<Box<dyn SkillSource>>) -> Self {
        Self {
            sources,
            registry: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Loader over the built-in skills only.
    pub fn with_defaults() -> Self {
        Self::new(vec![Box::new(BuiltinSource::with_defaults())])
    }

    /// Re-scan all sources and rebuild the registry.
    ///
    /// Individual bad candidates are skipped and reported, never raised. A
    /// duplicate name replaces the prior entry; later sources win.
    pub async fn discover(&self) -> DiscoveryReport {
        let mut next: Registry = HashMap::new();
        let mut errors = Vec::new();

        for source in &self.sources {
            for candidate in source.candidates() {
                match Self::validate_candidate(&candidate) {
                    Ok(entry) => {
                        let name = entry.descriptor.name.clone();
                        if next.insert(name.clone(), entry).is_some() {
                            debug!(skill = %name, source = source.name(), "Replaced duplicate skill");
                        } else {
                            debug!(skill = %name, source = source.name(), "Loaded skill");
                        }
                    }
                    Err(e) => {
                        warn!(
                            source = source.name(),
                            origin = %candidate.origin,
                            error = %e,
                            "Skipping invalid skill candidate"
                        );
                        errors.push(DiscoveryError {
                            source: source.name().to_string(),
                            origin: candidate.origin,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        let loaded = next.len();
        *self.registry.write().await = Arc::new(next);
        info!(loaded, errors = errors.len(), "Skill discovery pass complete");

        DiscoveryReport { loaded, errors }
    }

    fn validate_candidate(candidate: &SkillCandidate) -> Result<RegistryEntry> {
        let instance = candidate.factory.build()?;
        let descriptor = instance.descriptor();
        descriptor.validate_shape()?;
        let shared = if instance.reusable() {
            Some(instance)
        } else {
            None
        };
        Ok(RegistryEntry {
            descriptor,
            factory: Arc::clone(&candidate.factory),
            shared,
        })
    }

    /// Look up a skill's declared shape in the current snapshot.
    pub async fn get(&self, name: &str) -> Result<SkillDescriptor> {
        let registry = self.snapshot().await;
        registry
            .get(name)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| Error::NotFound(format!("Unknown skill: {}", name)))
    }

    /// Obtain a capability instance for `name`: the shared instance when
    /// the skill is reusable, a freshly built one otherwise.
    pub async fn instantiate(&self, name: &str) -> Result<Arc<dyn Skill>> {
        let registry = self.snapshot().await;
        let entry = registry
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Unknown skill: {}", name)))?;
        match &entry.shared {
            Some(instance) => Ok(Arc::clone(instance)),
            None => entry.factory.build(),
        }
    }

    /// Names in the current snapshot, sorted.
    pub async fn skill_names(&self) -> Vec<String> {
        let registry = self.snapshot().await;
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    async fn snapshot(&self) -> Arc<Registry> {
        Arc::clone(&*self.registry.read().await)
    }
}
