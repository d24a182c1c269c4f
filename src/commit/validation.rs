use crate::catalog::Catalog;
use crate::catalog::schema::TableSchema;
use crate::catalog::types::Value;
use crate::config::SidxConfig;
use crate::error::SidxError;
use crate::storage::encoded_key::ClusteringSlice;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Mutation {
    /// Writes the named columns; the primary key columns must all be present.
    Upsert {
        keyspace: String,
        table_name: String,
        values: Vec<(String, Value)>,
        timestamp: Option<u64>,
    },
    DeleteRow {
        keyspace: String,
        table_name: String,
        /// Partition key values followed by clustering values.
        primary_key: Vec<Value>,
        timestamp: Option<u64>,
    },
    DeletePartition {
        keyspace: String,
        table_name: String,
        partition_key: Vec<Value>,
        timestamp: Option<u64>,
    },
    DeleteRange {
        keyspace: String,
        table_name: String,
        partition_key: Vec<Value>,
        slice: ClusteringSlice,
        timestamp: Option<u64>,
    },
}

impl Mutation {
    pub fn upsert(keyspace: &str, table_name: &str, values: &[(&str, Value)]) -> Self {
        Mutation::Upsert {
            keyspace: keyspace.to_string(),
            table_name: table_name.to_string(),
            values: values
                .iter()
                .map(|(c, v)| (c.to_string(), v.clone()))
                .collect(),
            timestamp: None,
        }
    }

    pub fn delete_row(keyspace: &str, table_name: &str, primary_key: Vec<Value>) -> Self {
        Mutation::DeleteRow {
            keyspace: keyspace.to_string(),
            table_name: table_name.to_string(),
            primary_key,
            timestamp: None,
        }
    }

    pub fn delete_partition(keyspace: &str, table_name: &str, partition_key: Vec<Value>) -> Self {
        Mutation::DeletePartition {
            keyspace: keyspace.to_string(),
            table_name: table_name.to_string(),
            partition_key,
            timestamp: None,
        }
    }

    pub fn delete_range(
        keyspace: &str,
        table_name: &str,
        partition_key: Vec<Value>,
        slice: ClusteringSlice,
    ) -> Self {
        Mutation::DeleteRange {
            keyspace: keyspace.to_string(),
            table_name: table_name.to_string(),
            partition_key,
            slice,
            timestamp: None,
        }
    }

    /// Client-supplied write timestamp (`USING TIMESTAMP`).
    pub fn using_timestamp(mut self, ts: u64) -> Self {
        match &mut self {
            Mutation::Upsert { timestamp, .. }
            | Mutation::DeleteRow { timestamp, .. }
            | Mutation::DeletePartition { timestamp, .. }
            | Mutation::DeleteRange { timestamp, .. } => *timestamp = Some(ts),
        }
        self
    }

    pub fn target(&self) -> (&str, &str) {
        match self {
            Mutation::Upsert {
                keyspace,
                table_name,
                ..
            }
            | Mutation::DeleteRow {
                keyspace,
                table_name,
                ..
            }
            | Mutation::DeletePartition {
                keyspace,
                table_name,
                ..
            }
            | Mutation::DeleteRange {
                keyspace,
                table_name,
                ..
            } => (keyspace, table_name),
        }
    }

    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Mutation::Upsert { timestamp, .. }
            | Mutation::DeleteRow { timestamp, .. }
            | Mutation::DeletePartition { timestamp, .. }
            | Mutation::DeleteRange { timestamp, .. } => *timestamp,
        }
    }
}

pub fn validate_mutation(
    catalog: &Catalog,
    mutation: &Mutation,
    config: &SidxConfig,
) -> Result<(), SidxError> {
    let (keyspace, table_name) = mutation.target();
    let schema = catalog.table(keyspace, table_name)?;
    match mutation {
        Mutation::Upsert { values, .. } => {
            validate_assignments(schema, values)?;
            validate_indexed_value_sizes(catalog, schema, values, config)
        }
        Mutation::DeleteRow { primary_key, .. } => {
            let key_columns = schema
                .partition_key
                .iter()
                .map(String::as_str)
                .chain(schema.clustering_key.iter().map(|c| c.name.as_str()));
            validate_key_values(schema, key_columns, primary_key, "primary key")
        }
        Mutation::DeletePartition { partition_key, .. } => validate_key_values(
            schema,
            schema.partition_key.iter().map(String::as_str),
            partition_key,
            "partition key",
        ),
        Mutation::DeleteRange {
            partition_key,
            slice,
            ..
        } => {
            validate_key_values(
                schema,
                schema.partition_key.iter().map(String::as_str),
                partition_key,
                "partition key",
            )?;
            validate_slice(schema, slice)
        }
    }
}

/// Rejects a write whose value for any indexed column would not fit in a
/// backing-view key. Nothing is written when this fails.
pub fn validate_indexed_value_sizes(
    catalog: &Catalog,
    schema: &TableSchema,
    values: &[(String, Value)],
    config: &SidxConfig,
) -> Result<(), SidxError> {
    let limit = config.max_indexed_value_bytes;
    for index in catalog.list_for_table(&schema.keyspace, &schema.table_name) {
        for (column, value) in values {
            if !index.indexed_columns.contains(column) {
                continue;
            }
            let size = value.serialized_len();
            if size > limit {
                return Err(SidxError::SizeLimitExceeded {
                    index: index.name.clone(),
                    column: column.clone(),
                    size,
                    limit,
                });
            }
        }
    }
    Ok(())
}

fn validate_assignments(schema: &TableSchema, values: &[(String, Value)]) -> Result<(), SidxError> {
    let mut seen = HashSet::new();
    for (column, value) in values {
        let def = schema
            .column_def(column)
            .ok_or_else(|| SidxError::UnknownColumn {
                table: schema.table_name.clone(),
                column: column.clone(),
            })?;
        if !seen.insert(column.as_str()) {
            return Err(SidxError::Validation(format!(
                "column {column} assigned twice"
            )));
        }
        check_type(schema, column, value)?;
        if schema.is_primary_key(column) && value.is_null() {
            return Err(SidxError::Validation(format!(
                "primary key column {} cannot be null",
                def.name
            )));
        }
    }
    let key_columns = schema
        .partition_key
        .iter()
        .map(String::as_str)
        .chain(schema.clustering_key.iter().map(|c| c.name.as_str()));
    for column in key_columns {
        if !seen.contains(column) {
            return Err(SidxError::Validation(format!(
                "missing primary key column {column} for {}",
                schema.qualified_name()
            )));
        }
    }
    Ok(())
}

fn validate_key_values<'a>(
    schema: &TableSchema,
    columns: impl Iterator<Item = &'a str>,
    values: &[Value],
    what: &str,
) -> Result<(), SidxError> {
    let columns: Vec<&str> = columns.collect();
    if columns.len() != values.len() {
        return Err(SidxError::Validation(format!(
            "{what} of {} needs {} values, got {}",
            schema.qualified_name(),
            columns.len(),
            values.len()
        )));
    }
    for (column, value) in columns.into_iter().zip(values) {
        if value.is_null() {
            return Err(SidxError::Validation(format!(
                "{what} column {column} cannot be null"
            )));
        }
        check_type(schema, column, value)?;
    }
    Ok(())
}

fn validate_slice(schema: &TableSchema, slice: &ClusteringSlice) -> Result<(), SidxError> {
    let bounded = usize::from(slice.lower.is_some() || slice.upper.is_some());
    if slice.prefix.len() + bounded > schema.clustering_key.len() {
        return Err(SidxError::Validation(format!(
            "range restricts more clustering columns than {} has",
            schema.qualified_name()
        )));
    }
    for (column, value) in schema.clustering_key.iter().zip(&slice.prefix) {
        check_type(schema, &column.name, value)?;
    }
    if let Some(column) = schema.clustering_key.get(slice.prefix.len()) {
        for (value, _) in slice.lower.iter().chain(slice.upper.iter()) {
            check_type(schema, &column.name, value)?;
        }
    }
    Ok(())
}

fn check_type(schema: &TableSchema, column: &str, value: &Value) -> Result<(), SidxError> {
    let def = schema
        .column_def(column)
        .ok_or_else(|| SidxError::UnknownColumn {
            table: schema.table_name.clone(),
            column: column.to_string(),
        })?;
    if !def.col_type.accepts(value) {
        return Err(SidxError::TypeMismatch {
            table: schema.table_name.clone(),
            column: column.to_string(),
            expected: format!("{:?}", def.col_type),
            actual: value.type_name().to_string(),
        });
    }
    Ok(())
}
