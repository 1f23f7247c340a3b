//! Name-keyed registry of live databases.

use crate::Database;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Process-wide set of configured databases, keyed by name.
///
/// The registry owns the connections; runs borrow `Arc` handles and never
/// close them.
#[derive(Clone, Default)]
pub struct DatabaseRegistry {
    databases: BTreeMap<String, Arc<dyn Database>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database under its configured name, returning any database
    /// previously registered under the same name.
    pub fn register(&mut self, database: Arc<dyn Database>) -> Option<Arc<dyn Database>> {
        let name = database.describe().name.clone();
        self.databases.insert(name, database)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Database>> {
        self.databases.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}

impl std::fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("databases", &self.databases.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDatabase;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DatabaseRegistry::new();
        assert!(registry.is_empty());

        assert!(registry
            .register(Arc::new(MemoryDatabase::named("b")))
            .is_none());
        assert!(registry
            .register(Arc::new(MemoryDatabase::named("a")))
            .is_none());
        let replaced = registry.register(Arc::new(MemoryDatabase::named("a")));
        assert!(replaced.is_some());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(registry.get("b").unwrap().describe().name, "b");
    }
}
