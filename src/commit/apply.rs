use crate::catalog::schema::TableSchema;
use crate::commit::validation::Mutation;
use crate::error::SidxError;
use crate::storage::base::{BaseStore, PartitionRemoval, RowChange};

/// Base-table effect of one mutation, handed to view maintenance.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedWrite {
    Row(RowChange),
    Removal(PartitionRemoval),
    Unchanged,
}

impl AppliedWrite {
    pub fn is_applied(&self) -> bool {
        !matches!(self, AppliedWrite::Unchanged)
    }
}

/// Applies an already validated mutation to the base store.
pub fn apply_mutation(
    base: &mut BaseStore,
    schema: &TableSchema,
    mutation: &Mutation,
    write_ts: u64,
) -> Result<AppliedWrite, SidxError> {
    let applied = match mutation {
        Mutation::Upsert { values, .. } => base
            .upsert(schema, values, write_ts)?
            .map(AppliedWrite::Row),
        Mutation::DeleteRow { primary_key, .. } => {
            let split = schema.partition_key.len().min(primary_key.len());
            let (partition_key, clustering) = primary_key.split_at(split);
            base.delete_row(schema, partition_key, clustering, write_ts)?
                .map(AppliedWrite::Row)
        }
        Mutation::DeletePartition { partition_key, .. } => base
            .delete_partition(schema, partition_key, write_ts)?
            .map(AppliedWrite::Removal),
        Mutation::DeleteRange {
            partition_key,
            slice,
            ..
        } => base
            .delete_range(schema, partition_key, slice, write_ts)?
            .map(AppliedWrite::Removal),
    };
    Ok(applied.unwrap_or(AppliedWrite::Unchanged))
}
