use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backends::{MotionDetector, ScriptedDetector};
use super::detector::Detector;

type Factory = Box<dyn Fn() -> Result<Box<dyn Detector>> + Send + Sync>;

/// Named detector constructors.
///
/// Detectors are stateful (`detect` takes `&mut self`), so the registry hands
/// out fresh instances instead of sharing one.
pub struct DetectorRegistry {
    factories: HashMap<String, Factory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in backends; `motion` is the default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("motion", || Ok(Box::new(MotionDetector::default())));
        registry.register("scripted", || Ok(Box::new(ScriptedDetector::default())));
        registry
    }

    /// Register a constructor. The first registered name becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Detector>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("detector '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Construct the detector registered as `name`.
    pub fn build(&self, name: &str) -> Result<Box<dyn Detector>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "unknown detector '{}' (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        let mut detector = factory()?;
        detector.warm_up()?;
        Ok(detector)
    }

    pub fn build_default(&self) -> Result<Box<dyn Detector>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector registered"))?;
        self.build(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
