use crate::catalog::schema::{IndexDescriptor, IndexKind, TableSchema};
use crate::query::plan::RestrictionSet;

/// Picks at most one index for a query.
pub trait IndexSelector: Send + Sync {
    fn select<'a>(
        &self,
        schema: &TableSchema,
        restrictions: &RestrictionSet,
        candidates: &'a [IndexDescriptor],
    ) -> Option<&'a IndexDescriptor>;
}

/// Walks the restrictions in the order they were written. A local index
/// whose partition key and indexed columns are all bound by equality wins
/// outright; otherwise the first equality-restricted column with a global
/// index decides. Ties between indexes on one column go to the oldest.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestrictionOrderSelector;

impl RestrictionOrderSelector {
    fn covered(restrictions: &RestrictionSet, columns: &[String]) -> bool {
        columns.iter().all(|c| restrictions.eq_value(c).is_some())
    }

    fn pick<'a>(
        restrictions: &RestrictionSet,
        candidates: &[&'a IndexDescriptor],
        usable: impl Fn(&IndexDescriptor) -> bool,
    ) -> Option<&'a IndexDescriptor> {
        restrictions
            .iter()
            .filter_map(|r| r.eq_value())
            .find_map(|(column, _)| {
                candidates
                    .iter()
                    .copied()
                    .find(|idx| idx.indexed_columns.iter().any(|c| c == column) && usable(idx))
            })
    }
}

impl IndexSelector for RestrictionOrderSelector {
    fn select<'a>(
        &self,
        schema: &TableSchema,
        restrictions: &RestrictionSet,
        candidates: &'a [IndexDescriptor],
    ) -> Option<&'a IndexDescriptor> {
        let mut ordered: Vec<&IndexDescriptor> = candidates.iter().collect();
        ordered.sort_by_key(|idx| idx.generation);

        let partition_bound = Self::covered(restrictions, &schema.partition_key);
        if partition_bound {
            let local: Vec<&IndexDescriptor> = ordered
                .iter()
                .copied()
                .filter(|idx| idx.kind == IndexKind::Local)
                .collect();
            if let Some(found) = Self::pick(restrictions, &local, |idx| {
                Self::covered(restrictions, &idx.indexed_columns)
            }) {
                return Some(found);
            }
        }

        let global: Vec<&IndexDescriptor> = ordered
            .into_iter()
            .filter(|idx| idx.kind == IndexKind::Global)
            .collect();
        Self::pick(restrictions, &global, |idx| {
            Self::covered(restrictions, &idx.indexed_columns)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexSelector, RestrictionOrderSelector};
    use crate::catalog::schema::{
        ClusteringOrder, IndexDescriptor, IndexKind, IndexState, TableSchema,
    };
    use crate::catalog::types::ColumnType;
    use crate::query::plan::{Query, Restriction, col, lit};

    fn schema() -> TableSchema {
        TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .column("c", ColumnType::Integer)
            .column("v1", ColumnType::Integer)
            .column("v2", ColumnType::Integer)
            .column("v3", ColumnType::Integer)
            .partition_key(&["p"])
            .clustering("c", ClusteringOrder::Asc)
    }

    fn index(name: &str, column: &str, kind: IndexKind, generation: u64) -> IndexDescriptor {
        IndexDescriptor {
            keyspace: "ks".into(),
            name: name.into(),
            table_name: "t".into(),
            indexed_columns: vec![column.into()],
            kind,
            backing_view: format!("{name}_index"),
            generation,
            state: IndexState::Ready,
        }
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![
            index("my_v3_idx", "v3", IndexKind::Global, 1),
            index("my_v1_idx", "v1", IndexKind::Global, 2),
            index("my_v2_idx", "v2", IndexKind::Local, 3),
        ]
    }

    fn chosen(restrictions: Vec<Restriction>) -> Option<String> {
        let query = restrictions
            .into_iter()
            .fold(Query::select(&["*"]).from("ks", "t"), |q, r| q.and(r));
        let candidates = indexes();
        RestrictionOrderSelector
            .select(&schema(), &query.restrictions, &candidates)
            .map(|idx| idx.name.clone())
    }

    fn eq(column: &str, value: i64) -> Restriction {
        col(column).eq(lit(value))
    }

    #[test]
    fn first_global_index_in_written_order() {
        assert_eq!(chosen(vec![eq("v3", 1)]).as_deref(), Some("my_v3_idx"));
        assert_eq!(
            chosen(vec![eq("v3", 1), eq("v1", 2)]).as_deref(),
            Some("my_v3_idx")
        );
        assert_eq!(
            chosen(vec![eq("p", 1), eq("v1", 1), eq("v3", 2)]).as_deref(),
            Some("my_v1_idx")
        );
    }

    #[test]
    fn local_index_needs_partition_key() {
        assert_eq!(
            chosen(vec![eq("v2", 1), eq("v1", 2)]).as_deref(),
            Some("my_v1_idx")
        );
    }

    #[test]
    fn usable_local_index_beats_global() {
        assert_eq!(
            chosen(vec![eq("p", 1), eq("v1", 1), eq("v3", 2), eq("v2", 2)]).as_deref(),
            Some("my_v2_idx")
        );
        assert_eq!(
            chosen(vec![eq("p", 1), eq("v2", 1), eq("v1", 2)]).as_deref(),
            Some("my_v2_idx")
        );
    }

    #[test]
    fn range_restrictions_never_select() {
        assert_eq!(chosen(vec![col("v1").gt(lit(1))]), None);
        assert_eq!(chosen(vec![col("v1").in_(vec![lit(1)])]), None);
        assert_eq!(chosen(vec![eq("c", 1)]), None);
    }
}
