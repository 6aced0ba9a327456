//! Application registry with atomic snapshot replacement.
//!
//! # Responsibilities
//! - Resolve application names against the current snapshot
//! - Publish a fully built replacement set in one indivisible step
//! - Track a monotonically increasing snapshot version
//!
//! # Design Decisions
//! - `ArcSwap` gives wait-free reads; a reader holds one whole snapshot
//! - Writers are serialized by a mutex so versions never interleave
//! - Empty or unknown names fall back to `default`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::application::Application;
use crate::observability::metrics;

/// Name used when a transaction names no application.
pub const DEFAULT_APPLICATION: &str = "default";

/// The requested application does not exist and there is no fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("application '{0}' not found and no default application configured")]
    NotFound(String),
}

/// One immutable, versioned name → application mapping.
#[derive(Debug, Default)]
pub struct ApplicationSet {
    version: u64,
    apps: HashMap<String, Arc<Application>>,
}

impl ApplicationSet {
    pub fn new(version: u64, apps: HashMap<String, Arc<Application>>) -> Self {
        Self { version, apps }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Sorted application names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.apps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up `name`, falling back to the default application.
    pub fn resolve(&self, name: &str) -> Result<Arc<Application>, ResolutionError> {
        if !name.is_empty() {
            if let Some(app) = self.apps.get(name) {
                return Ok(Arc::clone(app));
            }
        }
        self.apps
            .get(DEFAULT_APPLICATION)
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound(name.to_string()))
    }
}

/// Shared, hot-swappable registry of applications.
pub struct ApplicationRegistry {
    current: ArcSwap<ApplicationSet>,
    writer: Mutex<()>,
}

impl ApplicationRegistry {
    /// Create a registry publishing `apps` as version 1.
    pub fn new(apps: HashMap<String, Arc<Application>>) -> Self {
        metrics::set_registry_version(1);
        Self {
            current: ArcSwap::from_pointee(ApplicationSet::new(1, apps)),
            writer: Mutex::new(()),
        }
    }

    /// Resolve against the current snapshot.
    pub fn resolve(&self, name: &str) -> Result<Arc<Application>, ResolutionError> {
        self.current.load().resolve(name)
    }

    /// The current snapshot as a whole.
    pub fn snapshot(&self) -> Arc<ApplicationSet> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    /// Publish a new application set and return its version.
    ///
    /// Applications captured by in-flight transactions are unaffected.
    pub fn replace(&self, apps: HashMap<String, Arc<Application>>) -> u64 {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let version = self.current.load().version() + 1;
        let count = apps.len();
        self.current.store(Arc::new(ApplicationSet::new(version, apps)));
        metrics::set_registry_version(version);

        tracing::info!(version, applications = count, "Application registry replaced");
        version
    }
}

impl std::fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRegistry")
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Arguments, EvaluationError, Evaluator, Phase, Verdict};
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl Evaluator for Fixed {
        async fn evaluate(&self, _: Phase, _: &Arguments) -> Result<Verdict, EvaluationError> {
            Ok(Verdict::none())
        }
    }

    fn set(names: &[&str]) -> HashMap<String, Arc<Application>> {
        names
            .iter()
            .map(|n| (n.to_string(), Arc::new(Application::new(*n, Arc::new(Fixed)))))
            .collect()
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let registry = ApplicationRegistry::new(set(&["default", "shop"]));
        assert_eq!(registry.resolve("shop").unwrap().name(), "shop");
        assert_eq!(registry.resolve("").unwrap().name(), "default");
        assert_eq!(registry.resolve("Shop").unwrap().name(), "default");
    }

    #[test]
    fn resolve_without_default_is_an_error() {
        let registry = ApplicationRegistry::new(set(&["shop"]));
        assert_eq!(
            registry.resolve("blog").unwrap_err(),
            ResolutionError::NotFound("blog".into())
        );
        assert!(registry.resolve("").is_err());
    }

    #[test]
    fn replace_bumps_version_and_keeps_old_references() {
        let registry = ApplicationRegistry::new(set(&["default"]));
        let held = registry.resolve("default").unwrap();

        assert_eq!(registry.replace(set(&["default"])), 2);
        let fresh = registry.resolve("default").unwrap();

        assert!(!Arc::ptr_eq(&held, &fresh));
        assert_eq!(held.name(), "default");
        assert_eq!(registry.version(), 2);
    }

    #[test]
    fn readers_never_see_a_mixed_snapshot() {
        let registry = Arc::new(ApplicationRegistry::new(set(&["a1", "b1"])));

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let gen = if i % 2 == 0 { "2" } else { "1" };
                    let (a, b) = (format!("a{gen}"), format!("b{gen}"));
                    registry.replace(set(&[a.as_str(), b.as_str()]));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = registry.snapshot();
                        let names = snapshot.names();
                        assert_eq!(names.len(), 2);
                        let gens: Vec<char> =
                            names.iter().filter_map(|n| n.chars().last()).collect();
                        assert_eq!(gens[0], gens[1], "mixed snapshot {names:?}");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.version(), 501);
    }
}
