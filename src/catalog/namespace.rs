use crate::error::{ResourceType, SidxError};
use im::HashMap;
use serde::{Deserialize, Serialize};

/// Kinds of named objects sharing one per-keyspace namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Table,
    View,
    Index,
}

impl ObjectKind {
    pub fn resource_type(self) -> ResourceType {
        match self {
            ObjectKind::Table => ResourceType::Table,
            ObjectKind::View => ResourceType::View,
            ObjectKind::Index => ResourceType::Index,
        }
    }
}

/// Single source of truth for "is this name taken" across tables, backing
/// views and indexes.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    entries: HashMap<(String, String), ObjectKind>,
}

impl NamespaceRegistry {
    pub fn lookup(&self, keyspace: &str, name: &str) -> Option<ObjectKind> {
        self.entries
            .get(&(keyspace.to_string(), name.to_string()))
            .copied()
    }

    pub fn ensure_free(&self, keyspace: &str, name: &str) -> Result<(), SidxError> {
        match self.lookup(keyspace, name) {
            Some(kind) => Err(SidxError::NameConflict {
                resource_type: kind.resource_type(),
                name: format!("{keyspace}.{name}"),
            }),
            None => Ok(()),
        }
    }

    pub fn register(
        &mut self,
        keyspace: &str,
        name: &str,
        kind: ObjectKind,
    ) -> Result<(), SidxError> {
        self.ensure_free(keyspace, name)?;
        self.entries
            .insert((keyspace.to_string(), name.to_string()), kind);
        Ok(())
    }

    /// Removes `name` only if it is held by an object of `kind`.
    pub fn release(&mut self, keyspace: &str, name: &str, kind: ObjectKind) -> bool {
        let key = (keyspace.to_string(), name.to_string());
        if self.entries.get(&key) != Some(&kind) {
            return false;
        }
        self.entries.remove(&key);
        true
    }
}
