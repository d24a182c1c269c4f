use crate::catalog::types::{Row, Value};
use crate::storage::base::{RowChange, StoredRow};
use crate::storage::view::ViewMutation;
use crate::view::ViewTarget;

/// View mutations for one base row change: drop the stale entry when the
/// indexed value moved, then upsert the current one.
pub fn mutations_for_change(target: &ViewTarget, change: &RowChange) -> Vec<ViewMutation> {
    let token = change.position.token;
    let old_values = change
        .old
        .as_ref()
        .and_then(|row| target.indexed_values(row));
    let new_values = change
        .new
        .as_ref()
        .and_then(|row| target.indexed_values(row));

    let mut out = Vec::with_capacity(2);
    if let (Some(old_row), Some(old_indexed)) = (&change.old, &old_values)
        && new_values.as_ref() != Some(old_indexed)
        && let Some(delete) = target.delete_for(
            &change.partition_key,
            &change.clustering,
            old_row,
            token,
            change.write_ts,
        )
    {
        out.push(delete);
    }
    if let Some(new_row) = &change.new
        && let Some(upsert) = target.upsert_for(
            &change.partition_key,
            &change.clustering,
            new_row,
            token,
            change.write_ts,
        )
    {
        out.push(upsert);
    }
    out
}

/// Entry removal for a row taken out by a partition or range delete.
pub fn mutation_for_removed_row(
    target: &ViewTarget,
    token: i64,
    stored: &StoredRow,
    write_ts: u64,
) -> Option<ViewMutation> {
    let (partition_key, clustering) = target.key_values(&stored.row);
    target.delete_for(&partition_key, &clustering, &stored.row, token, write_ts)
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildEntry {
    Mutation(ViewMutation),
    /// Row has a null indexed value and gets no entry.
    Skipped,
    /// Indexed value too large for a view key.
    Oversized { column: String, size: usize },
}

/// First indexed column of `row` whose value is above `limit` bytes, with its
/// size. Writes are checked at commit, but rows written before an index
/// existed are not.
pub fn oversized_value(target: &ViewTarget, row: &Row, limit: usize) -> Option<(String, usize)> {
    let indexed = target.indexed_values(row)?;
    target
        .indexed_columns
        .iter()
        .zip(&indexed)
        .map(|(column, value)| (column, Value::serialized_len(value)))
        .find(|(_, size)| *size > limit)
        .map(|(column, size)| (column.clone(), size))
}

/// Entry for an existing base row while populating a new index.
pub fn build_entry(target: &ViewTarget, token: i64, stored: &StoredRow, limit: usize) -> BuildEntry {
    if let Some((column, size)) = oversized_value(target, &stored.row, limit) {
        return BuildEntry::Oversized { column, size };
    }
    let (partition_key, clustering) = target.key_values(&stored.row);
    match target.upsert_for(
        &partition_key,
        &clustering,
        &stored.row,
        token,
        stored.write_ts,
    ) {
        Some(mutation) => BuildEntry::Mutation(mutation),
        None => BuildEntry::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildEntry, build_entry, mutations_for_change, oversized_value};
    use crate::catalog::schema::{IndexDescriptor, IndexKind, IndexState, TableSchema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::storage::base::{RowChange, StoredRow};
    use crate::storage::token::PartitionPosition;
    use crate::storage::view::ViewMutation;
    use crate::view::ViewTarget;

    fn target() -> ViewTarget {
        let schema = TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .column("v", ColumnType::Text)
            .partition_key(&["p"]);
        let descriptor = IndexDescriptor {
            keyspace: "ks".into(),
            name: "t_v_idx".into(),
            table_name: "t".into(),
            indexed_columns: vec!["v".into()],
            kind: IndexKind::Global,
            backing_view: "t_v_idx_index".into(),
            generation: 1,
            state: IndexState::Ready,
        };
        ViewTarget::new(&descriptor, &schema).expect("target")
    }

    fn change(old: Option<&str>, new: Option<&str>) -> RowChange {
        let row = |v: &str| Row::from_values(vec![Value::Integer(1), v.into()]);
        RowChange {
            keyspace: "ks".into(),
            table_name: "t".into(),
            position: PartitionPosition::for_values(&[Value::Integer(1)]),
            partition_key: vec![Value::Integer(1)],
            clustering: Vec::new(),
            old: old.map(row),
            new: new.map(row),
            write_ts: 3,
        }
    }

    #[test]
    fn changed_value_deletes_old_entry_then_upserts() {
        let target = target();
        let mutations = mutations_for_change(&target, &change(Some("a"), Some("b")));
        assert_eq!(mutations.len(), 2);
        assert!(matches!(mutations[0], ViewMutation::Delete { .. }));
        assert!(matches!(mutations[1], ViewMutation::Upsert { .. }));

        let unchanged = mutations_for_change(&target, &change(Some("a"), Some("a")));
        assert_eq!(unchanged.len(), 1);

        let removed = mutations_for_change(&target, &change(Some("a"), None));
        assert!(matches!(removed.as_slice(), [ViewMutation::Delete { .. }]));
    }

    #[test]
    fn oversized_value_names_the_column() {
        let target = target();
        let row = Row::from_values(vec![Value::Integer(1), "x".repeat(12).into()]);
        assert_eq!(oversized_value(&target, &row, 11), Some(("v".to_string(), 12)));
        assert_eq!(oversized_value(&target, &row, 12), None);
        let null = Row::from_values(vec![Value::Integer(1), Value::Null]);
        assert_eq!(oversized_value(&target, &null, 0), None);
    }

    #[test]
    fn build_skips_oversized_values() {
        let target = target();
        let stored = StoredRow {
            row: Row::from_values(vec![Value::Integer(1), "x".repeat(10).into()]),
            write_ts: 1,
        };
        assert!(matches!(
            build_entry(&target, 0, &stored, 9),
            BuildEntry::Oversized { size: 10, .. }
        ));
        assert!(matches!(
            build_entry(&target, 0, &stored, 10),
            BuildEntry::Mutation(_)
        ));
    }
}
