pub mod batch;
pub mod builder;
pub mod maintainer;

use crate::catalog::schema::{IndexDescriptor, IndexKind, TableSchema};
use crate::catalog::types::{Row, Value};
use crate::error::SidxError;
use crate::storage::encoded_key::{ClusteringCodec, EncodedKey};
use crate::storage::view::{ViewMutation, ViewRow};

/// View partition key for a global index lookup.
pub fn global_view_partition(indexed_values: &[Value]) -> EncodedKey {
    EncodedKey::from_values(indexed_values)
}

/// View partition key for a local index: the base partition key.
pub fn local_view_partition(partition_key: &[Value]) -> EncodedKey {
    EncodedKey::from_values(partition_key)
}

/// Leading clustering bytes shared by every local view entry for one
/// indexed value.
pub fn local_view_prefix(indexed_values: &[Value]) -> EncodedKey {
    EncodedKey::from_values(indexed_values)
}

/// How one index lays out its backing-view rows.
///
/// Global: partition = indexed values, clustering = token, base partition key,
/// base clustering. Entries for one value therefore come back in token order.
/// Local: partition = base partition key, clustering = indexed values, base
/// clustering.
#[derive(Debug, Clone)]
pub struct ViewTarget {
    pub keyspace: String,
    pub view: String,
    pub index_name: String,
    pub generation: u64,
    pub kind: IndexKind,
    pub indexed_columns: Vec<String>,
    indexed_positions: Vec<usize>,
    partition_positions: Vec<usize>,
    clustering_positions: Vec<usize>,
    codec: ClusteringCodec,
}

impl ViewTarget {
    pub fn new(descriptor: &IndexDescriptor, schema: &TableSchema) -> Result<Self, SidxError> {
        let positions = |columns: Vec<&str>| -> Result<Vec<usize>, SidxError> {
            columns
                .into_iter()
                .map(|column| {
                    schema
                        .column_index(column)
                        .ok_or_else(|| SidxError::UnknownColumn {
                            table: schema.table_name.clone(),
                            column: column.to_string(),
                        })
                })
                .collect()
        };
        let indexed_positions =
            positions(descriptor.indexed_columns.iter().map(String::as_str).collect())?;
        let partition_positions =
            positions(schema.partition_key.iter().map(String::as_str).collect())?;
        let clustering_positions = positions(
            schema
                .clustering_key
                .iter()
                .map(|c| c.name.as_str())
                .collect(),
        )?;
        Ok(Self {
            keyspace: descriptor.keyspace.clone(),
            view: descriptor.backing_view.clone(),
            index_name: descriptor.name.clone(),
            generation: descriptor.generation,
            kind: descriptor.kind,
            indexed_columns: descriptor.indexed_columns.clone(),
            indexed_positions,
            partition_positions,
            clustering_positions,
            codec: ClusteringCodec::for_schema(schema),
        })
    }

    /// Indexed values of `row`, or `None` if any of them is null.
    pub fn indexed_values(&self, row: &Row) -> Option<Vec<Value>> {
        let values: Vec<Value> = self
            .indexed_positions
            .iter()
            .map(|idx| row.values.get(*idx).cloned().unwrap_or(Value::Null))
            .collect();
        if values.iter().any(Value::is_null) {
            return None;
        }
        Some(values)
    }

    /// Partition key and clustering values of a stored base row.
    pub fn key_values(&self, row: &Row) -> (Vec<Value>, Vec<Value>) {
        let pick = |positions: &[usize]| -> Vec<Value> {
            positions
                .iter()
                .map(|idx| row.values.get(*idx).cloned().unwrap_or(Value::Null))
                .collect()
        };
        (
            pick(&self.partition_positions),
            pick(&self.clustering_positions),
        )
    }

    pub fn entry_key(
        &self,
        partition_key: &[Value],
        clustering: &[Value],
        indexed: &[Value],
        token: i64,
    ) -> (EncodedKey, EncodedKey) {
        let base_clustering = self.codec.encode(clustering);
        match self.kind {
            IndexKind::Global => {
                let clustering_key = EncodedKey::from_single(&Value::Integer(token))
                    .concat(&EncodedKey::from_values(partition_key))
                    .concat(&base_clustering);
                (global_view_partition(indexed), clustering_key)
            }
            IndexKind::Local => (
                local_view_partition(partition_key),
                local_view_prefix(indexed).concat(&base_clustering),
            ),
        }
    }

    pub fn upsert_for(
        &self,
        partition_key: &[Value],
        clustering: &[Value],
        row: &Row,
        token: i64,
        write_ts: u64,
    ) -> Option<ViewMutation> {
        let indexed = self.indexed_values(row)?;
        let (partition, clustering_key) = self.entry_key(partition_key, clustering, &indexed, token);
        Some(ViewMutation::Upsert {
            partition,
            clustering: clustering_key,
            row: ViewRow {
                base_partition_key: partition_key.to_vec(),
                base_clustering: clustering.to_vec(),
                indexed_values: indexed,
                token,
                write_ts,
            },
        })
    }

    pub fn delete_for(
        &self,
        partition_key: &[Value],
        clustering: &[Value],
        row: &Row,
        token: i64,
        write_ts: u64,
    ) -> Option<ViewMutation> {
        let indexed = self.indexed_values(row)?;
        let (partition, clustering_key) = self.entry_key(partition_key, clustering, &indexed, token);
        Some(ViewMutation::Delete {
            partition,
            clustering: clustering_key,
            write_ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ViewTarget;
    use crate::catalog::schema::{
        ClusteringOrder, IndexDescriptor, IndexKind, IndexState, TableSchema,
    };
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::storage::view::ViewMutation;

    fn schema() -> TableSchema {
        TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .column("c", ColumnType::Integer)
            .column("v", ColumnType::Text)
            .partition_key(&["p"])
            .clustering("c", ClusteringOrder::Desc)
    }

    fn descriptor(kind: IndexKind) -> IndexDescriptor {
        IndexDescriptor {
            keyspace: "ks".into(),
            name: "t_v_idx".into(),
            table_name: "t".into(),
            indexed_columns: vec!["v".into()],
            kind,
            backing_view: "t_v_idx_index".into(),
            generation: 1,
            state: IndexState::Building,
        }
    }

    #[test]
    fn null_indexed_value_has_no_entry() {
        let target = ViewTarget::new(&descriptor(IndexKind::Global), &schema()).expect("target");
        let row = Row::from_values(vec![Value::Integer(1), Value::Integer(1), Value::Null]);
        assert!(
            target
                .upsert_for(&[Value::Integer(1)], &[Value::Integer(1)], &row, 0, 1)
                .is_none()
        );
    }

    #[test]
    fn global_entries_for_one_value_sort_by_token() {
        let target = ViewTarget::new(&descriptor(IndexKind::Global), &schema()).expect("target");
        let (pa, ca) = target.entry_key(&[Value::Integer(9)], &[Value::Integer(1)], &[Value::from("x")], -5);
        let (pb, cb) = target.entry_key(&[Value::Integer(1)], &[Value::Integer(1)], &[Value::from("x")], 7);
        assert_eq!(pa, pb);
        assert!(ca < cb);
    }

    #[test]
    fn local_entries_live_in_base_partition() {
        let target = ViewTarget::new(&descriptor(IndexKind::Local), &schema()).expect("target");
        let row = Row::from_values(vec![Value::Integer(1), Value::Integer(2), "x".into()]);
        let Some(ViewMutation::Upsert { partition, row, .. }) =
            target.upsert_for(&[Value::Integer(1)], &[Value::Integer(2)], &row, 3, 1)
        else {
            panic!("expected upsert");
        };
        assert_eq!(partition, super::local_view_partition(&[Value::Integer(1)]));
        assert_eq!(row.indexed_values, vec![Value::from("x")]);
    }
}
