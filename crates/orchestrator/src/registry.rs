//! Process-wide agent registry.
//!
//! Name and id indexes live behind one lock so that every insert and remove
//! updates both or neither. Admission checks run under the write lock
//! together with the insert.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crew_controller::Agent;
use crew_core::{AgentId, Error, Result};

/// Shared handle to one live agent. Only the runtime locks it.
pub type AgentHandle = Arc<Mutex<Agent>>;

struct Entry {
    name: String,
    handle: AgentHandle,
}

#[derive(Default)]
struct Tables {
    by_name: HashMap<String, AgentId>,
    by_id: BTreeMap<AgentId, Entry>,
}

pub struct AgentRegistry {
    tables: RwLock<Tables>,
    capacity: usize,
}

impl AgentRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a new agent under `name` and `id`.
    ///
    /// `make` runs only after the name, id and capacity checks pass, while
    /// the write lock is held, so a rejected request never builds an agent.
    pub fn try_insert<F>(&self, id: AgentId, name: &str, make: F) -> Result<AgentHandle>
    where
        F: FnOnce() -> Result<Agent>,
    {
        let mut tables = self.write();
        if tables.by_name.contains_key(name) {
            return Err(Error::duplicate_name(name));
        }
        if tables.by_id.contains_key(&id) {
            return Err(Error::internal(format!("agent id {} is already registered", id)));
        }
        if tables.by_id.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                limit: self.capacity,
            });
        }

        let handle = Arc::new(Mutex::new(make()?));
        tables.by_name.insert(name.to_string(), id);
        tables.by_id.insert(
            id,
            Entry {
                name: name.to_string(),
                handle: handle.clone(),
            },
        );
        crew_governance::track_population(tables.by_id.len());
        Ok(handle)
    }

    /// Remove by name from both indexes.
    pub fn remove(&self, name: &str) -> Option<(AgentId, AgentHandle)> {
        let mut tables = self.write();
        let id = tables.by_name.remove(name)?;
        let entry = tables.by_id.remove(&id);
        crew_governance::track_population(tables.by_id.len());
        entry.map(|e| (id, e.handle))
    }

    /// Remove by id from both indexes.
    pub fn remove_id(&self, id: AgentId) -> Option<(String, AgentHandle)> {
        let mut tables = self.write();
        let entry = tables.by_id.remove(&id)?;
        if tables.by_name.get(&entry.name) == Some(&id) {
            tables.by_name.remove(&entry.name);
        }
        crew_governance::track_population(tables.by_id.len());
        Some((entry.name, entry.handle))
    }

    pub fn get(&self, name: &str) -> Option<AgentHandle> {
        let tables = self.read();
        let id = tables.by_name.get(name)?;
        tables.by_id.get(id).map(|e| e.handle.clone())
    }

    pub fn get_by_id(&self, id: AgentId) -> Option<AgentHandle> {
        self.read().by_id.get(&id).map(|e| e.handle.clone())
    }

    pub fn id_of(&self, name: &str) -> Option<AgentId> {
        self.read().by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().by_name.contains_key(name)
    }

    /// Every live agent in id order.
    pub fn entries(&self) -> Vec<(AgentId, String, AgentHandle)> {
        self.read()
            .by_id
            .iter()
            .map(|(id, e)| (*id, e.name.clone(), e.handle.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Verify that the name and id indexes agree.
    pub fn check_consistency(&self) -> Result<()> {
        let tables = self.read();
        if tables.by_name.len() != tables.by_id.len() {
            return Err(Error::RegistryDesync(format!(
                "{} names but {} ids",
                tables.by_name.len(),
                tables.by_id.len()
            )));
        }
        for (name, id) in &tables.by_name {
            match tables.by_id.get(id) {
                Some(entry) if &entry.name == name => {}
                Some(entry) => {
                    return Err(Error::RegistryDesync(format!(
                        "'{}' maps to {} which is registered as '{}'",
                        name, id, entry.name
                    )))
                }
                None => {
                    return Err(Error::RegistryDesync(format!(
                        "'{}' maps to unknown id {}",
                        name, id
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_controller::{AgentDeps, PlanningPipeline};
    use crew_core::mocks::{MockWorld, ScriptedPlanner};
    use crew_core::{AppConfig, KeepAllDelegator, Position};
    use crew_skills::ActionRegistry;
    use crew_store::HashEmbedding;

    fn deps() -> AgentDeps {
        AgentDeps {
            pipeline: Arc::new(PlanningPipeline::new(Arc::new(ScriptedPlanner::with_tasks(vec![])), 1).unwrap()),
            actions: Arc::new(ActionRegistry::with_builtins()),
            world: Arc::new(MockWorld::new()),
            embedder: Arc::new(HashEmbedding::new(16)),
            delegator: Arc::new(KeepAllDelegator),
            memory: AppConfig::default().memory,
        }
    }

    fn insert(registry: &AgentRegistry, name: &str) -> Result<AgentHandle> {
        let id = AgentId::new();
        registry.try_insert(id, name, || Ok(Agent::new(id, name, "crew", Position::default(), deps())))
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_without_building() {
        let registry = AgentRegistry::new(4);
        insert(&registry, "Ada").unwrap();

        let mut built = false;
        let err = registry
            .try_insert(AgentId::new(), "Ada", || {
                built = true;
                Err(Error::internal("unreachable"))
            })
            .err().unwrap();
        assert!(matches!(err, Error::DuplicateName(_)));
        assert!(!built);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let registry = AgentRegistry::new(1);
        insert(&registry, "Ada").unwrap();
        assert!(matches!(
            insert(&registry, "Bo"),
            Err(Error::CapacityExceeded { limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_remove_updates_both_indexes() {
        let registry = AgentRegistry::new(4);
        insert(&registry, "Ada").unwrap();
        insert(&registry, "Bo").unwrap();
        let bo = registry.id_of("Bo").unwrap();

        assert!(registry.remove("Ada").is_some());
        assert!(registry.remove("Ada").is_none());
        assert_eq!(registry.remove_id(bo).map(|(name, _)| name), Some("Bo".to_string()));
        assert!(registry.is_empty());
        registry.check_consistency().unwrap();
    }
}
