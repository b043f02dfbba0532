//! Action registry implementation.

use dashmap::DashMap;
use std::sync::Arc;

use crew_core::{
    traits::{Action, ActionContext, ActionFactory},
    types::Task,
    Error, Result,
};

/// Maps action ids to the factories that build them.
///
/// New action kinds register here; the executor dispatches through
/// [`ActionRegistry::create`] and never names concrete actions.
pub struct ActionRegistry {
    /// Registered factories keyed by action id.
    factories: DashMap<String, Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Create a registry with every built-in action registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for factory in crate::builtin::builtin_factories() {
            // Built-in ids are distinct; a clash here is a programming error
            // surfaced in tests.
            if let Err(e) = registry.register(factory) {
                tracing::error!(error = %e, "Failed to register built-in action");
            }
        }
        registry
    }

    /// Register a factory. Ids are unique.
    pub fn register(&self, factory: Arc<dyn ActionFactory>) -> Result<()> {
        let id = factory.id().to_string();
        tracing::info!(action = %id, "Registering action");

        match self.factories.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(e) => Err(Error::Internal(format!(
                "Action '{}' is already registered",
                e.key()
            ))),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(factory);
                Ok(())
            }
        }
    }

    /// Build the action for `task`.
    ///
    /// Unknown ids yield [`Error::UnknownAction`]; bad parameters yield
    /// [`Error::Task`].
    pub fn create(&self, ctx: &ActionContext, task: &Task) -> Result<Box<dyn Action>> {
        let factory = self
            .factories
            .get(&task.action)
            .map(|f| f.value().clone())
            .ok_or_else(|| Error::unknown_action(&task.action))?;
        factory.create(ctx, task)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// `id: usage` lines for the planner prompt, sorted by id.
    pub fn describe(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .factories
            .iter()
            .map(|e| {
                let usage = e.value().usage();
                if usage.is_empty() {
                    e.key().clone()
                } else {
                    format!("{}: {}", e.key(), usage)
                }
            })
            .collect();
        lines.sort();
        lines
    }

    /// Get the number of registered actions.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::mocks::MockWorld;
    use crew_core::types::{ActionResult, AgentId, Position};

    struct NoopAction;

    impl Action for NoopAction {
        fn start(&mut self) {}
        fn tick(&mut self) -> Option<ActionResult> {
            Some(ActionResult::success("noop"))
        }
        fn cancel(&mut self) {}
        fn description(&self) -> String {
            "noop".into()
        }
    }

    struct NoopFactory;

    impl ActionFactory for NoopFactory {
        fn id(&self) -> &str {
            "noop"
        }
        fn create(&self, _ctx: &ActionContext, _task: &Task) -> Result<Box<dyn Action>> {
            Ok(Box::new(NoopAction))
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            agent_id: AgentId::new(),
            agent_name: "Ada".into(),
            position: Position::default(),
            world: Arc::new(MockWorld::new()),
        }
    }

    #[test]
    fn test_register_and_dispatch() {
        let registry = ActionRegistry::new();
        registry.register(Arc::new(NoopFactory)).unwrap();

        let mut action = registry.create(&ctx(), &Task::new("noop")).unwrap();
        action.start();
        assert_eq!(action.tick(), Some(ActionResult::success("noop")));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ActionRegistry::new();
        registry.register(Arc::new(NoopFactory)).unwrap();
        assert!(registry.register(Arc::new(NoopFactory)).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_action() {
        let registry = ActionRegistry::with_builtins();
        let err = registry.create(&ctx(), &Task::new("teleport")).err().unwrap();
        assert!(matches!(err, Error::UnknownAction(ref id) if id == "teleport"));
    }

    #[test]
    fn test_builtins_present() {
        let registry = ActionRegistry::with_builtins();
        assert_eq!(
            registry.ids(),
            vec!["build", "gather", "move_to", "place", "wait"]
        );
        assert!(registry.describe().iter().any(|l| l.starts_with("gather: ")));
    }
}
