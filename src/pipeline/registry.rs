//! Step registry: maps type tags to step constructors.

use crate::config::StepConfig;
use crate::pipeline::step::{AnyStep, BuiltinStep, StepLogic};
use crate::pipeline::step_type::StepKind;
use std::collections::HashMap;

/// Constructs step logic for one copy of a configured step.
pub trait StepFactory: Send + Sync {
    fn create(&self, config: &StepConfig, copy: usize) -> anyhow::Result<Box<dyn StepLogic>>;
}

impl<F> StepFactory for F
where
    F: Fn(&StepConfig, usize) -> anyhow::Result<Box<dyn StepLogic>> + Send + Sync,
{
    fn create(&self, config: &StepConfig, copy: usize) -> anyhow::Result<Box<dyn StepLogic>> {
        self(config, copy)
    }
}

/// Tag → constructor lookup used by `Pipeline::build` and `Pipeline::start`.
///
/// Plugin factories take precedence over built-in kinds with the same tag.
#[derive(Default)]
pub struct StepRegistry {
    builtins: bool,
    plugins: HashMap<String, Box<dyn StepFactory>>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows every [`StepKind`].
    pub fn with_builtins() -> Self {
        Self {
            builtins: true,
            plugins: HashMap::new(),
        }
    }

    /// Register a plugin factory, returning the one it replaces.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        factory: impl StepFactory + 'static,
    ) -> Option<Box<dyn StepFactory>> {
        self.register_boxed(tag, Box::new(factory))
    }

    pub fn register_boxed(
        &mut self,
        tag: impl Into<String>,
        factory: Box<dyn StepFactory>,
    ) -> Option<Box<dyn StepFactory>> {
        let tag = tag.into();
        tracing::debug!(tag = %tag, "registered step factory");
        self.plugins.insert(tag, factory)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.plugins.contains_key(tag) || (self.builtins && StepKind::from_tag(tag).is_some())
    }

    /// All known tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.plugins.keys().cloned().collect();
        if self.builtins {
            for kind in StepKind::all() {
                if !self.plugins.contains_key(kind.tag()) {
                    tags.push(kind.tag().to_string());
                }
            }
        }
        tags.sort();
        tags
    }

    /// Instantiate the logic for copy `copy` of `config`.
    pub fn create(&self, config: &StepConfig, copy: usize) -> anyhow::Result<AnyStep> {
        if let Some(factory) = self.plugins.get(&config.step_type) {
            return factory.create(config, copy).map(AnyStep::Plugin);
        }
        match StepKind::from_tag(&config.step_type).filter(|_| self.builtins) {
            Some(kind) => BuiltinStep::from_config(kind, config).map(AnyStep::Builtin),
            None => anyhow::bail!("no step type registered for tag '{}'", config.step_type),
        }
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::StepError;
    use crate::pipeline::row::Row;
    use crate::pipeline::step::{ProcessResult, StepIo};

    struct Noop;

    impl StepLogic for Noop {
        fn process_row(&mut self, _row: Option<&Row>, _io: &mut StepIo<'_>) -> Result<ProcessResult, StepError> {
            Ok(ProcessResult::Done)
        }
    }

    #[test]
    fn test_builtins_are_known() {
        let registry = StepRegistry::with_builtins();
        for kind in StepKind::all() {
            assert!(registry.contains(kind.tag()));
        }
        assert!(!StepRegistry::new().contains("dummy"));
    }

    #[test]
    fn test_plugin_overrides_builtin() {
        let mut registry = StepRegistry::with_builtins();
        registry.register("dummy", |_: &StepConfig, _: usize| {
            Ok(Box::new(Noop) as Box<dyn StepLogic>)
        });
        let step = registry.create(&StepConfig::new("d", "dummy"), 0).unwrap();
        assert!(!step.is_builtin());
        assert_eq!(registry.tags().iter().filter(|t| *t == "dummy").count(), 1);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let registry = StepRegistry::with_builtins();
        let err = registry
            .create(&StepConfig::new("x", "teleport"), 0)
            .err()
            .unwrap();
        assert!(err.to_string().contains("teleport"));
    }
}
