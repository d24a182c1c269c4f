use crate::catalog::types::{ColumnType, Row, Value};
use crate::error::SidxError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: &str, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            col_type,
        }
    }
}

/// Declared comparison direction of a clustering column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClusteringOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusteringColumn {
    pub name: String,
    pub order: ClusteringOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub keyspace: String,
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub partition_key: Vec<String>,
    #[serde(default)]
    pub clustering_key: Vec<ClusteringColumn>,
}

impl TableSchema {
    pub fn new(keyspace: &str, table_name: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            table_name: table_name.to_string(),
            columns: Vec::new(),
            partition_key: Vec::new(),
            clustering_key: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, col_type: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, col_type));
        self
    }

    pub fn partition_key(mut self, columns: &[&str]) -> Self {
        self.partition_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn clustering(mut self, name: &str, order: ClusteringOrder) -> Self {
        self.clustering_key.push(ClusteringColumn {
            name: name.to_string(),
            order,
        });
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table_name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_partition_key(&self, name: &str) -> bool {
        self.partition_key.iter().any(|c| c == name)
    }

    pub fn is_clustering_key(&self, name: &str) -> bool {
        self.clustering_key.iter().any(|c| c.name == name)
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.is_partition_key(name) || self.is_clustering_key(name)
    }

    pub fn clustering_orders(&self) -> Vec<ClusteringOrder> {
        self.clustering_key.iter().map(|c| c.order).collect()
    }

    pub fn partition_key_values(&self, row: &Row) -> Result<Vec<Value>, SidxError> {
        self.values_for(row, self.partition_key.iter().map(String::as_str))
    }

    pub fn clustering_values(&self, row: &Row) -> Result<Vec<Value>, SidxError> {
        self.values_for(row, self.clustering_key.iter().map(|c| c.name.as_str()))
    }

    pub fn values_for<'a>(
        &self,
        row: &Row,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Value>, SidxError> {
        columns
            .into_iter()
            .map(|name| {
                let idx = self
                    .column_index(name)
                    .ok_or_else(|| SidxError::UnknownColumn {
                        table: self.table_name.clone(),
                        column: name.to_string(),
                    })?;
                Ok(row.values.get(idx).cloned().unwrap_or(Value::Null))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), SidxError> {
        if self.partition_key.is_empty() {
            return Err(SidxError::Validation(format!(
                "table {} must declare a partition key",
                self.qualified_name()
            )));
        }
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SidxError::Validation(format!(
                    "column {} declared twice in {}",
                    col.name,
                    self.qualified_name()
                )));
            }
        }
        let mut key_seen = HashSet::new();
        let key_columns = self
            .partition_key
            .iter()
            .map(String::as_str)
            .chain(self.clustering_key.iter().map(|c| c.name.as_str()));
        for name in key_columns {
            if self.column_index(name).is_none() {
                return Err(SidxError::UnknownColumn {
                    table: self.table_name.clone(),
                    column: name.to_string(),
                });
            }
            if !key_seen.insert(name) {
                return Err(SidxError::Validation(format!(
                    "column {name} appears twice in the primary key of {}",
                    self.qualified_name()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKind {
    /// Backing view partitioned by the indexed value alone.
    Global,
    /// Backing view partitioned by the base partition key.
    Local,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexState {
    Building,
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub keyspace: String,
    pub name: String,
    pub table_name: String,
    pub indexed_columns: Vec<String>,
    pub kind: IndexKind,
    pub backing_view: String,
    /// Catalog sequence at creation. Distinguishes a re-created index from an
    /// older one with the same name.
    pub generation: u64,
    pub state: IndexState,
}

impl IndexDescriptor {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, IndexState::Ready)
    }

    pub fn same_target(&self, kind: IndexKind, columns: &[String]) -> bool {
        self.kind == kind && self.indexed_columns == columns
    }
}

/// A `CREATE INDEX` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: Option<String>,
    pub table_name: String,
    pub indexed_columns: Vec<String>,
    /// `Some` for the local form `ON t((pk...), col)`.
    pub local_partition_columns: Option<Vec<String>>,
    pub if_not_exists: bool,
}

impl IndexDefinition {
    pub fn on(table_name: &str, columns: &[&str]) -> Self {
        Self {
            name: None,
            table_name: table_name.to_string(),
            indexed_columns: columns.iter().map(|c| c.to_string()).collect(),
            local_partition_columns: None,
            if_not_exists: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn local(mut self, partition_columns: &[&str]) -> Self {
        self.local_partition_columns =
            Some(partition_columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn kind(&self) -> IndexKind {
        if self.local_partition_columns.is_some() {
            IndexKind::Local
        } else {
            IndexKind::Global
        }
    }

    pub fn default_name(&self) -> String {
        format!(
            "{}_{}_idx",
            self.table_name,
            self.indexed_columns.join("_")
        )
    }
}

pub fn backing_view_name(index_name: &str) -> String {
    format!("{index_name}_index")
}

#[cfg(test)]
mod tests {
    use super::{ClusteringOrder, IndexDefinition, IndexKind, TableSchema, backing_view_name};
    use crate::catalog::types::{ColumnType, Row, Value};

    fn schema() -> TableSchema {
        TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .column("c", ColumnType::Integer)
            .column("v", ColumnType::Text)
            .partition_key(&["p"])
            .clustering("c", ClusteringOrder::Desc)
    }

    #[test]
    fn key_values_follow_declared_columns() {
        let schema = schema();
        schema.validate().expect("valid");
        let row = Row::from_values(vec![Value::Integer(1), Value::Integer(2), "x".into()]);
        assert_eq!(
            schema.partition_key_values(&row).expect("pk"),
            vec![Value::Integer(1)]
        );
        assert_eq!(
            schema.clustering_values(&row).expect("ck"),
            vec![Value::Integer(2)]
        );
        assert_eq!(schema.clustering_orders(), vec![ClusteringOrder::Desc]);
    }

    #[test]
    fn validate_rejects_unknown_key_column() {
        let schema = TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .partition_key(&["q"]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn default_names_derive_from_table_and_columns() {
        let def = IndexDefinition::on("t", &["v"]);
        assert_eq!(def.default_name(), "t_v_idx");
        assert_eq!(backing_view_name(&def.default_name()), "t_v_idx_index");
        assert_eq!(def.kind(), IndexKind::Global);
        assert_eq!(
            IndexDefinition::on("t", &["v"]).local(&["p"]).kind(),
            IndexKind::Local
        );
    }
}
