use crate::catalog::types::Value;
use crate::error::SidxError;
use crate::storage::encoded_key::EncodedKey;
use im::{HashMap, OrdMap};
use parking_lot::RwLock;

/// One backing-view entry pointing back at a base row.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub base_partition_key: Vec<Value>,
    pub base_clustering: Vec<Value>,
    pub indexed_values: Vec<Value>,
    pub token: i64,
    pub write_ts: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewMutation {
    Upsert {
        partition: EncodedKey,
        clustering: EncodedKey,
        row: ViewRow,
    },
    Delete {
        partition: EncodedKey,
        clustering: EncodedKey,
        write_ts: u64,
    },
}

impl ViewMutation {
    pub fn write_ts(&self) -> u64 {
        match self {
            ViewMutation::Upsert { row, .. } => row.write_ts,
            ViewMutation::Delete { write_ts, .. } => *write_ts,
        }
    }
}

/// Mutations for a single backing view applied as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewBatch {
    pub keyspace: String,
    pub view: String,
    pub generation: u64,
    pub mutations: Vec<ViewMutation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackingView {
    pub keyspace: String,
    pub name: String,
    pub index_name: String,
    pub generation: u64,
    pub partitions: OrdMap<EncodedKey, OrdMap<EncodedKey, ViewRow>>,
    /// Delete timestamps for entries not currently present. Cleared when a
    /// newer upsert recreates the entry.
    tombstones: OrdMap<(EncodedKey, EncodedKey), u64>,
}

impl BackingView {
    pub fn new(keyspace: &str, name: &str, index_name: &str, generation: u64) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            name: name.to_string(),
            index_name: index_name.to_string(),
            generation,
            partitions: OrdMap::new(),
            tombstones: OrdMap::new(),
        }
    }

    pub fn partition(&self, key: &EncodedKey) -> Option<&OrdMap<EncodedKey, ViewRow>> {
        self.partitions.get(key)
    }

    pub fn row_count(&self) -> usize {
        self.partitions.values().map(|p| p.len()).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &ViewRow> {
        self.partitions.values().flat_map(|p| p.values())
    }

    fn apply(&mut self, mutation: &ViewMutation) -> bool {
        match mutation {
            ViewMutation::Upsert {
                partition,
                clustering,
                row,
            } => {
                let key = (partition.clone(), clustering.clone());
                if self
                    .tombstones
                    .get(&key)
                    .is_some_and(|deleted| *deleted > row.write_ts)
                {
                    return false;
                }
                if self
                    .partitions
                    .get(partition)
                    .and_then(|entries| entries.get(clustering))
                    .is_some_and(|existing| existing.write_ts > row.write_ts)
                {
                    return false;
                }
                self.tombstones.remove(&key);
                self.partitions
                    .entry(partition.clone())
                    .or_insert_with(OrdMap::new)
                    .insert(clustering.clone(), row.clone());
                true
            }
            ViewMutation::Delete {
                partition,
                clustering,
                write_ts,
            } => {
                let current = self
                    .partitions
                    .get(partition)
                    .and_then(|entries| entries.get(clustering))
                    .map(|existing| existing.write_ts);
                match current {
                    Some(existing) if existing > *write_ts => false,
                    Some(_) => {
                        if let Some(entries) = self.partitions.get_mut(partition) {
                            entries.remove(clustering);
                            if entries.is_empty() {
                                self.partitions.remove(partition);
                            }
                        }
                        self.tombstones
                            .insert((partition.clone(), clustering.clone()), *write_ts);
                        true
                    }
                    None => {
                        let key = (partition.clone(), clustering.clone());
                        if self
                            .tombstones
                            .get(&key)
                            .is_none_or(|deleted| *deleted < *write_ts)
                        {
                            self.tombstones.insert(key, *write_ts);
                        }
                        false
                    }
                }
            }
        }
    }
}

/// Destination of view batches. The maintainer only talks to views through
/// this trait.
pub trait ViewBatchSink: Send + Sync {
    /// Applies every mutation of `batch` or none of them. Returns the number
    /// of mutations that changed the view.
    fn apply_batch(&self, batch: &ViewBatch) -> Result<usize, SidxError>;
}

/// In-memory home of every backing view.
#[derive(Debug, Default)]
pub struct ViewStore {
    views: RwLock<HashMap<(String, String), BackingView>>,
}

impl ViewStore {
    pub fn create_view(&self, keyspace: &str, view: &str, index_name: &str, generation: u64) {
        self.views.write().insert(
            (keyspace.to_string(), view.to_string()),
            BackingView::new(keyspace, view, index_name, generation),
        );
    }

    pub fn drop_view(&self, keyspace: &str, view: &str) -> Option<BackingView> {
        self.views
            .write()
            .remove(&(keyspace.to_string(), view.to_string()))
    }

    /// Point-in-time copy of a view; cheap thanks to structural sharing.
    pub fn snapshot(&self, keyspace: &str, view: &str) -> Option<BackingView> {
        self.views
            .read()
            .get(&(keyspace.to_string(), view.to_string()))
            .cloned()
    }
}

impl ViewBatchSink for ViewStore {
    fn apply_batch(&self, batch: &ViewBatch) -> Result<usize, SidxError> {
        let mut views = self.views.write();
        let key = (batch.keyspace.clone(), batch.view.clone());
        let Some(current) = views.get(&key) else {
            return Ok(0);
        };
        if current.generation != batch.generation {
            return Ok(0);
        }
        let mut next = current.clone();
        let applied = batch
            .mutations
            .iter()
            .filter(|mutation| next.apply(mutation))
            .count();
        views.insert(key, next);
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::{ViewBatch, ViewBatchSink, ViewMutation, ViewRow, ViewStore};
    use crate::catalog::types::Value;
    use crate::storage::encoded_key::EncodedKey;

    fn upsert(p: i64, c: i64, ts: u64) -> ViewMutation {
        ViewMutation::Upsert {
            partition: EncodedKey::from_single(&Value::Integer(p)),
            clustering: EncodedKey::from_single(&Value::Integer(c)),
            row: ViewRow {
                base_partition_key: vec![Value::Integer(c)],
                base_clustering: Vec::new(),
                indexed_values: vec![Value::Integer(p)],
                token: 0,
                write_ts: ts,
            },
        }
    }

    fn batch(generation: u64, mutations: Vec<ViewMutation>) -> ViewBatch {
        ViewBatch {
            keyspace: "ks".into(),
            view: "t_v_idx_index".into(),
            generation,
            mutations,
        }
    }

    #[test]
    fn later_timestamp_wins_and_delete_empties_partition() {
        let store = ViewStore::default();
        store.create_view("ks", "t_v_idx_index", "t_v_idx", 1);
        store
            .apply_batch(&batch(1, vec![upsert(1, 1, 5), upsert(1, 2, 5)]))
            .expect("apply");
        let deleted = store
            .apply_batch(&batch(
                1,
                vec![
                    ViewMutation::Delete {
                        partition: EncodedKey::from_single(&Value::Integer(1)),
                        clustering: EncodedKey::from_single(&Value::Integer(1)),
                        write_ts: 4,
                    },
                    ViewMutation::Delete {
                        partition: EncodedKey::from_single(&Value::Integer(1)),
                        clustering: EncodedKey::from_single(&Value::Integer(2)),
                        write_ts: 6,
                    },
                ],
            ))
            .expect("apply");
        assert_eq!(deleted, 1);
        let view = store.snapshot("ks", "t_v_idx_index").expect("view");
        assert_eq!(view.row_count(), 1);
    }

    #[test]
    fn deleted_entry_is_not_recreated_by_older_upsert() {
        let store = ViewStore::default();
        store.create_view("ks", "t_v_idx_index", "t_v_idx", 1);
        let delete = |ts| ViewMutation::Delete {
            partition: EncodedKey::from_single(&Value::Integer(1)),
            clustering: EncodedKey::from_single(&Value::Integer(1)),
            write_ts: ts,
        };
        store
            .apply_batch(&batch(1, vec![upsert(1, 1, 100), delete(300)]))
            .expect("apply");
        let stale = store
            .apply_batch(&batch(1, vec![upsert(1, 1, 200)]))
            .expect("apply");
        assert_eq!(stale, 0);

        // a delete that lands before its entry still shadows it
        let early_delete = ViewMutation::Delete {
            partition: EncodedKey::from_single(&Value::Integer(2)),
            clustering: EncodedKey::from_single(&Value::Integer(2)),
            write_ts: 50,
        };
        assert_eq!(
            store
                .apply_batch(&batch(1, vec![early_delete, upsert(2, 2, 40)]))
                .expect("apply"),
            0
        );
        let view = store.snapshot("ks", "t_v_idx_index").expect("view");
        assert_eq!(view.row_count(), 0);

        assert_eq!(
            store
                .apply_batch(&batch(1, vec![upsert(1, 1, 301), upsert(2, 2, 50)]))
                .expect("apply"),
            2
        );
    }

    #[test]
    fn batches_for_other_generations_are_ignored() {
        let store = ViewStore::default();
        store.create_view("ks", "t_v_idx_index", "t_v_idx", 2);
        let applied = store
            .apply_batch(&batch(1, vec![upsert(1, 1, 1)]))
            .expect("apply");
        assert_eq!(applied, 0);
        store.drop_view("ks", "t_v_idx_index");
        assert_eq!(
            store
                .apply_batch(&batch(2, vec![upsert(1, 1, 1)]))
                .expect("apply"),
            0
        );
    }
}
