use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::PlateDetector;
use super::backends::{NullDetector, ScriptedDetector};

/// Builds a fresh detector for one session.
pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn PlateDetector> + Send + Sync>;

/// Named detector factories.
///
/// Detectors take `&mut self`, so sessions never share an instance: each
/// session asks the registry for a new one at start.
#[derive(Clone)]
pub struct DetectorRegistry {
    factories: BTreeMap<String, DetectorFactory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in detectors: `none` (default) and
    /// `scripted`, replaying `script`.
    pub fn with_builtins(script: Vec<String>) -> Self {
        let mut registry = Self::new();
        registry.register("none", || Box::new(NullDetector));
        registry.register("scripted", move || Box::new(ScriptedDetector::new(script.clone())));
        registry
    }

    /// Register a factory. The first registered name becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn PlateDetector> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default detector by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!(
                "detector '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Factory by name.
    pub fn get(&self, name: &str) -> Option<DetectorFactory> {
        self.factories.get(name).cloned()
    }

    /// Factory for the default detector.
    pub fn default_factory(&self) -> Result<DetectorFactory> {
        self.default_name
            .as_deref()
            .and_then(|name| self.get(name))
            .ok_or_else(|| anyhow!("no detector registered"))
    }

    /// Factory for `name`, which also becomes the default. `None` keeps
    /// the current default.
    pub fn select(&mut self, name: Option<&str>) -> Result<DetectorFactory> {
        if let Some(name) = name {
            self.set_default(name)?;
        }
        self.default_factory()
    }

    /// List registered detector names.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
