use crate::catalog::schema::TableSchema;
use crate::catalog::types::{Row, Value};
use crate::error::{ResourceType, SidxError};
use crate::storage::encoded_key::{ClusteringCodec, ClusteringSlice, EncodedKey};
use crate::storage::token::PartitionPosition;
use im::{HashMap, OrdMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub row: Row,
    pub write_ts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub partition_key: Vec<Value>,
    /// Keyed by the clustering key encoded with the table's declared orders.
    pub rows: OrdMap<EncodedKey, StoredRow>,
    pub tombstones: Tombstones,
}

impl Partition {
    fn new(partition_key: Vec<Value>) -> Self {
        Self {
            partition_key,
            rows: OrdMap::new(),
            tombstones: Tombstones::default(),
        }
    }
}

/// Deletion timestamps kept after the rows are gone. A write at or below a
/// covering deletion is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tombstones {
    partition: Option<u64>,
    rows: OrdMap<EncodedKey, u64>,
    ranges: Vec<(ClusteringSlice, u64)>,
}

impl Tombstones {
    /// Newest deletion covering the row.
    pub fn deleted_at(&self, clustering_key: &EncodedKey, clustering: &[Value]) -> Option<u64> {
        let row = self.rows.get(clustering_key).copied();
        let range = self
            .ranges
            .iter()
            .filter(|(slice, _)| slice.contains(clustering))
            .map(|(_, ts)| *ts)
            .max();
        [self.partition, row, range].into_iter().flatten().max()
    }

    pub fn shadows(&self, clustering_key: &EncodedKey, clustering: &[Value], write_ts: u64) -> bool {
        self.deleted_at(clustering_key, clustering)
            .is_some_and(|deleted| deleted >= write_ts)
    }

    fn covered_by_partition(&self, write_ts: u64) -> bool {
        self.partition.is_some_and(|deleted| deleted >= write_ts)
    }

    fn mark_row(&mut self, clustering_key: EncodedKey, write_ts: u64) {
        if self.covered_by_partition(write_ts) {
            return;
        }
        if self
            .rows
            .get(&clustering_key)
            .is_none_or(|deleted| *deleted < write_ts)
        {
            self.rows.insert(clustering_key, write_ts);
        }
    }

    fn mark_range(&mut self, slice: &ClusteringSlice, write_ts: u64) {
        if self.covered_by_partition(write_ts) {
            return;
        }
        match self.ranges.iter_mut().find(|(existing, _)| existing == slice) {
            Some((_, deleted)) => *deleted = (*deleted).max(write_ts),
            None => self.ranges.push((slice.clone(), write_ts)),
        }
    }

    /// Older row and range markers are subsumed by the partition marker.
    fn mark_partition(&mut self, write_ts: u64) {
        if self.covered_by_partition(write_ts) {
            return;
        }
        self.partition = Some(write_ts);
        self.rows = self
            .rows
            .iter()
            .filter(|(_, deleted)| **deleted > write_ts)
            .map(|(key, deleted)| (key.clone(), *deleted))
            .collect();
        self.ranges.retain(|(_, deleted)| *deleted > write_ts);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableData {
    pub partitions: OrdMap<PartitionPosition, Partition>,
}

impl TableData {
    pub fn partition(&self, position: &PartitionPosition) -> Option<&Partition> {
        self.partitions.get(position)
    }

    pub fn row_count(&self) -> usize {
        self.partitions.values().map(|p| p.rows.len()).sum()
    }

    /// Every row in token order, then clustering order.
    pub fn rows(&self) -> impl Iterator<Item = (&PartitionPosition, &EncodedKey, &StoredRow)> {
        self.partitions.iter().flat_map(|(position, partition)| {
            partition
                .rows
                .iter()
                .map(move |(clustering, stored)| (position, clustering, stored))
        })
    }
}

/// A single-row change produced by a base write, carrying both images so
/// view maintenance can remove the old entry and add the new one.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub keyspace: String,
    pub table_name: String,
    pub position: PartitionPosition,
    pub partition_key: Vec<Value>,
    pub clustering: Vec<Value>,
    pub old: Option<Row>,
    pub new: Option<Row>,
    pub write_ts: u64,
}

/// Rows taken out by a partition or range deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRemoval {
    pub keyspace: String,
    pub table_name: String,
    pub position: PartitionPosition,
    pub partition_key: Vec<Value>,
    pub removed: OrdMap<EncodedKey, StoredRow>,
    pub write_ts: u64,
}

impl PartitionRemoval {
    pub fn len(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Base table rows for every keyspace, cheap to snapshot.
#[derive(Debug, Clone, Default)]
pub struct BaseStore {
    tables: HashMap<(String, String), TableData>,
}

impl BaseStore {
    pub fn create_table(&mut self, keyspace: &str, table_name: &str) {
        let key = (keyspace.to_string(), table_name.to_string());
        if !self.tables.contains_key(&key) {
            self.tables.insert(key, TableData::default());
        }
    }

    pub fn drop_table(&mut self, keyspace: &str, table_name: &str) -> Option<TableData> {
        self.tables
            .remove(&(keyspace.to_string(), table_name.to_string()))
    }

    pub fn table(&self, keyspace: &str, table_name: &str) -> Option<&TableData> {
        self.tables
            .get(&(keyspace.to_string(), table_name.to_string()))
    }

    fn table_mut(&mut self, schema: &TableSchema) -> Result<&mut TableData, SidxError> {
        self.tables
            .get_mut(&(schema.keyspace.clone(), schema.table_name.clone()))
            .ok_or_else(|| SidxError::NotFound {
                resource_type: ResourceType::Table,
                resource_id: schema.qualified_name(),
            })
    }

    pub fn get_row(
        &self,
        schema: &TableSchema,
        partition_key: &[Value],
        clustering: &[Value],
    ) -> Option<&StoredRow> {
        let position = PartitionPosition::for_values(partition_key);
        let clustering_key = ClusteringCodec::for_schema(schema).encode(clustering);
        self.table(&schema.keyspace, &schema.table_name)?
            .partition(&position)?
            .rows
            .get(&clustering_key)
    }

    /// Writes the named columns into the row, creating it if needed.
    ///
    /// Returns `None` when an existing row carries a newer write timestamp or
    /// a deletion at or after `write_ts` covers the row.
    pub fn upsert(
        &mut self,
        schema: &TableSchema,
        assignments: &[(String, Value)],
        write_ts: u64,
    ) -> Result<Option<RowChange>, SidxError> {
        let mut row = Row::from_values(vec![Value::Null; schema.columns.len()]);
        for (column, value) in assignments {
            let idx = schema
                .column_index(column)
                .ok_or_else(|| SidxError::UnknownColumn {
                    table: schema.table_name.clone(),
                    column: column.clone(),
                })?;
            row.values[idx] = value.clone();
        }
        let partition_key = schema.partition_key_values(&row)?;
        let clustering = schema.clustering_values(&row)?;
        let position = PartitionPosition::for_values(&partition_key);
        let clustering_key = ClusteringCodec::for_schema(schema).encode(&clustering);

        let table = self.table_mut(schema)?;
        let partition = table
            .partitions
            .entry(position.clone())
            .or_insert_with(|| Partition::new(partition_key.clone()));
        if partition
            .tombstones
            .shadows(&clustering_key, &clustering, write_ts)
        {
            return Ok(None);
        }

        let old = partition.rows.get(&clustering_key).cloned();
        let merged = match &old {
            Some(existing) if existing.write_ts > write_ts => return Ok(None),
            Some(existing) => {
                let mut merged = existing.row.clone();
                for (column, value) in assignments {
                    if let Some(idx) = schema.column_index(column) {
                        merged.values[idx] = value.clone();
                    }
                }
                merged
            }
            None => row,
        };
        partition.rows.insert(
            clustering_key,
            StoredRow {
                row: merged.clone(),
                write_ts,
            },
        );
        Ok(Some(RowChange {
            keyspace: schema.keyspace.clone(),
            table_name: schema.table_name.clone(),
            position,
            partition_key,
            clustering,
            old: old.map(|s| s.row),
            new: Some(merged),
            write_ts,
        }))
    }

    pub fn delete_row(
        &mut self,
        schema: &TableSchema,
        partition_key: &[Value],
        clustering: &[Value],
        write_ts: u64,
    ) -> Result<Option<RowChange>, SidxError> {
        let position = PartitionPosition::for_values(partition_key);
        let clustering_key = ClusteringCodec::for_schema(schema).encode(clustering);
        let table = self.table_mut(schema)?;
        let partition = table
            .partitions
            .entry(position.clone())
            .or_insert_with(|| Partition::new(partition_key.to_vec()));
        partition.tombstones.mark_row(clustering_key.clone(), write_ts);
        match partition.rows.get(&clustering_key) {
            Some(existing) if existing.write_ts <= write_ts => {}
            _ => return Ok(None),
        }
        let Some(old) = partition.rows.remove(&clustering_key) else {
            return Ok(None);
        };
        Ok(Some(RowChange {
            keyspace: schema.keyspace.clone(),
            table_name: schema.table_name.clone(),
            position,
            partition_key: partition_key.to_vec(),
            clustering: clustering.to_vec(),
            old: Some(old.row),
            new: None,
            write_ts,
        }))
    }

    /// Removes every row of the partition written at or before `write_ts`.
    /// Emptied partitions stay in the map to carry their tombstones.
    pub fn delete_partition(
        &mut self,
        schema: &TableSchema,
        partition_key: &[Value],
        write_ts: u64,
    ) -> Result<Option<PartitionRemoval>, SidxError> {
        self.delete_slice(schema, partition_key, &ClusteringSlice::all(), write_ts)
    }

    pub fn delete_range(
        &mut self,
        schema: &TableSchema,
        partition_key: &[Value],
        slice: &ClusteringSlice,
        write_ts: u64,
    ) -> Result<Option<PartitionRemoval>, SidxError> {
        self.delete_slice(schema, partition_key, slice, write_ts)
    }

    fn delete_slice(
        &mut self,
        schema: &TableSchema,
        partition_key: &[Value],
        slice: &ClusteringSlice,
        write_ts: u64,
    ) -> Result<Option<PartitionRemoval>, SidxError> {
        let position = PartitionPosition::for_values(partition_key);
        let bounds = slice.encoded_bounds(&ClusteringCodec::for_schema(schema));
        let table = self.table_mut(schema)?;
        let partition = table
            .partitions
            .entry(position.clone())
            .or_insert_with(|| Partition::new(partition_key.to_vec()));
        let whole_partition = *slice == ClusteringSlice::all();
        if whole_partition {
            partition.tombstones.mark_partition(write_ts);
        } else {
            partition.tombstones.mark_range(slice, write_ts);
        }

        let removed = if whole_partition && partition.rows.values().all(|r| r.write_ts <= write_ts) {
            std::mem::take(&mut partition.rows)
        } else {
            let doomed: Vec<EncodedKey> = partition
                .rows
                .range(bounds)
                .filter(|(_, stored)| stored.write_ts <= write_ts)
                .map(|(key, _)| key.clone())
                .collect();
            let mut removed = OrdMap::new();
            for key in doomed {
                if let Some(stored) = partition.rows.remove(&key) {
                    removed.insert(key, stored);
                }
            }
            removed
        };
        if removed.is_empty() {
            return Ok(None);
        }
        Ok(Some(PartitionRemoval {
            keyspace: schema.keyspace.clone(),
            table_name: schema.table_name.clone(),
            position,
            partition_key: partition_key.to_vec(),
            removed,
            write_ts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::BaseStore;
    use crate::catalog::schema::{ClusteringOrder, TableSchema};
    use crate::catalog::types::{ColumnType, Value};
    use crate::storage::encoded_key::ClusteringSlice;

    fn schema() -> TableSchema {
        TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .column("c", ColumnType::Integer)
            .column("v", ColumnType::Text)
            .column("w", ColumnType::Integer)
            .partition_key(&["p"])
            .clustering("c", ClusteringOrder::Desc)
    }

    fn assign(p: i64, c: i64, v: &str) -> Vec<(String, Value)> {
        vec![
            ("p".into(), Value::Integer(p)),
            ("c".into(), Value::Integer(c)),
            ("v".into(), v.into()),
        ]
    }

    fn store() -> BaseStore {
        let mut store = BaseStore::default();
        store.create_table("ks", "t");
        store
    }

    #[test]
    fn upsert_merges_and_reports_old_image() {
        let schema = schema();
        let mut store = store();
        store.upsert(&schema, &assign(1, 1, "a"), 10).expect("first");
        let change = store
            .upsert(
                &schema,
                &[
                    ("p".into(), Value::Integer(1)),
                    ("c".into(), Value::Integer(1)),
                    ("w".into(), Value::Integer(5)),
                ],
                11,
            )
            .expect("second")
            .expect("applied");
        let old = change.old.expect("old image");
        assert_eq!(old.values[2], Value::from("a"));
        let new = change.new.expect("new image");
        assert_eq!(new.values[2], Value::from("a"));
        assert_eq!(new.values[3], Value::Integer(5));
    }

    #[test]
    fn older_write_loses() {
        let schema = schema();
        let mut store = store();
        store.upsert(&schema, &assign(1, 1, "new"), 20).expect("new");
        let stale = store.upsert(&schema, &assign(1, 1, "old"), 10).expect("old");
        assert!(stale.is_none());
        let row = store
            .get_row(&schema, &[Value::Integer(1)], &[Value::Integer(1)])
            .expect("row");
        assert_eq!(row.row.values[2], Value::from("new"));
        assert!(
            store
                .delete_row(&schema, &[Value::Integer(1)], &[Value::Integer(1)], 15)
                .expect("delete")
                .is_none()
        );
    }

    #[test]
    fn range_delete_on_descending_column() {
        let schema = schema();
        let mut store = store();
        for c in 0..20 {
            store.upsert(&schema, &assign(1, c, "x"), 1).expect("insert");
        }
        let slice = ClusteringSlice::all().greater_than(5, false).less_than(12, false);
        let removal = store
            .delete_range(&schema, &[Value::Integer(1)], &slice, 2)
            .expect("delete")
            .expect("removed");
        assert_eq!(removal.len(), 6);
        let table = store.table("ks", "t").expect("table");
        let remaining: Vec<Value> = table.rows().map(|(_, _, r)| r.row.values[1].clone()).collect();
        assert_eq!(remaining.len(), 14);
        assert_eq!(remaining.first(), Some(&Value::Integer(19)));
        assert!(remaining.iter().all(|c| *c <= Value::Integer(5) || *c >= Value::Integer(12)));
    }

    #[test]
    fn partition_delete_keeps_newer_rows() {
        let schema = schema();
        let mut store = store();
        store.upsert(&schema, &assign(1, 1, "a"), 1).expect("a");
        store.upsert(&schema, &assign(1, 2, "b"), 9).expect("b");
        let removal = store
            .delete_partition(&schema, &[Value::Integer(1)], 5)
            .expect("delete")
            .expect("removed");
        assert_eq!(removal.len(), 1);
        assert_eq!(store.table("ks", "t").expect("table").row_count(), 1);
    }

    #[test]
    fn row_delete_blocks_older_write() {
        let schema = schema();
        let mut store = store();
        let key = [Value::Integer(1)];
        store.upsert(&schema, &assign(1, 1, "a"), 100).expect("a");
        assert!(
            store
                .delete_row(&schema, &key, &key, 300)
                .expect("delete")
                .is_some()
        );
        assert!(store.upsert(&schema, &assign(1, 1, "b"), 200).expect("stale").is_none());
        assert!(store.upsert(&schema, &assign(1, 1, "c"), 300).expect("tie").is_none());
        assert!(store.get_row(&schema, &key, &key).is_none());
        assert_eq!(store.table("ks", "t").expect("table").row_count(), 0);

        let change = store
            .upsert(&schema, &assign(1, 1, "d"), 301)
            .expect("newer")
            .expect("applied");
        assert!(change.old.is_none());
    }

    #[test]
    fn delete_of_missing_row_still_leaves_tombstone() {
        let schema = schema();
        let mut store = store();
        let key = [Value::Integer(7)];
        assert!(
            store
                .delete_row(&schema, &key, &key, 50)
                .expect("delete")
                .is_none()
        );
        assert!(store.upsert(&schema, &assign(7, 7, "late"), 40).expect("stale").is_none());
        assert!(store.upsert(&schema, &assign(7, 7, "new"), 60).expect("newer").is_some());
    }

    #[test]
    fn partition_and_range_deletes_block_older_writes() {
        let schema = schema();
        let mut store = store();
        for c in 0..4 {
            store.upsert(&schema, &assign(1, c, "x"), 10).expect("insert");
        }
        store
            .delete_partition(&schema, &[Value::Integer(1)], 30)
            .expect("delete")
            .expect("removed");
        let table = store.table("ks", "t").expect("table");
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.rows().count(), 0);
        assert!(store.upsert(&schema, &assign(1, 2, "stale"), 20).expect("stale").is_none());
        assert!(store.upsert(&schema, &assign(1, 2, "new"), 31).expect("newer").is_some());

        let slice = ClusteringSlice::all().greater_than(10, true).less_than(20, false);
        assert!(
            store
                .delete_range(&schema, &[Value::Integer(2)], &slice, 50)
                .expect("delete")
                .is_none()
        );
        assert!(store.upsert(&schema, &assign(2, 15, "in"), 40).expect("inside").is_none());
        assert!(store.upsert(&schema, &assign(2, 20, "out"), 40).expect("outside").is_some());
    }
}
