pub mod namespace;
pub mod schema;
pub mod types;

use crate::catalog::namespace::{NamespaceRegistry, ObjectKind};
use crate::catalog::schema::{
    IndexDefinition, IndexDescriptor, IndexKind, IndexState, TableSchema, backing_view_name,
};
use crate::error::{ResourceType, SidxError};
use im::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet as StdHashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DdlOperation {
    CreateKeyspace {
        keyspace: String,
        #[serde(default)]
        if_not_exists: bool,
    },
    CreateTable {
        schema: TableSchema,
        #[serde(default)]
        if_not_exists: bool,
    },
    DropTable {
        keyspace: String,
        table_name: String,
        #[serde(default)]
        if_exists: bool,
    },
    CreateIndex {
        keyspace: String,
        definition: IndexDefinition,
    },
    DropIndex {
        keyspace: String,
        index_name: String,
        #[serde(default)]
        if_exists: bool,
    },
}

/// What a DDL statement changed, so the caller can start or stop view work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlOutcome {
    Applied,
    NoOp,
    IndexCreated(IndexDescriptor),
    IndexDropped(IndexDescriptor),
    TableDropped {
        schema: TableSchema,
        indexes: Vec<IndexDescriptor>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub keyspaces: HashSet<String>,
    pub tables: HashMap<(String, String), TableSchema>,
    pub indexes: HashMap<(String, String), IndexDescriptor>,
    registry: NamespaceRegistry,
    next_generation: u64,
}

impl Catalog {
    pub fn ddl_payload(op: &DdlOperation) -> Result<Vec<u8>, SidxError> {
        rmp_serde::to_vec(op).map_err(|e| SidxError::Encode(e.to_string()))
    }

    pub fn ddl_from_payload(bytes: &[u8]) -> Result<DdlOperation, SidxError> {
        rmp_serde::from_slice(bytes).map_err(|e| SidxError::Decode(e.to_string()))
    }

    pub fn apply_ddl(&mut self, op: DdlOperation) -> Result<DdlOutcome, SidxError> {
        match op {
            DdlOperation::CreateKeyspace {
                keyspace,
                if_not_exists,
            } => self.create_keyspace(&keyspace, if_not_exists),
            DdlOperation::CreateTable {
                schema,
                if_not_exists,
            } => self.create_table(schema, if_not_exists),
            DdlOperation::DropTable {
                keyspace,
                table_name,
                if_exists,
            } => self.drop_table(&keyspace, &table_name, if_exists),
            DdlOperation::CreateIndex {
                keyspace,
                definition,
            } => self.create_index(&keyspace, definition),
            DdlOperation::DropIndex {
                keyspace,
                index_name,
                if_exists,
            } => self.drop_index(&keyspace, &index_name, if_exists),
        }
    }

    pub fn create_keyspace(
        &mut self,
        keyspace: &str,
        if_not_exists: bool,
    ) -> Result<DdlOutcome, SidxError> {
        validate_identifier(keyspace, "keyspace")?;
        if self.keyspaces.contains(keyspace) {
            if if_not_exists {
                return Ok(DdlOutcome::NoOp);
            }
            return Err(SidxError::NameConflict {
                resource_type: ResourceType::Keyspace,
                name: keyspace.to_string(),
            });
        }
        self.keyspaces.insert(keyspace.to_string());
        Ok(DdlOutcome::Applied)
    }

    pub fn create_table(
        &mut self,
        schema: TableSchema,
        if_not_exists: bool,
    ) -> Result<DdlOutcome, SidxError> {
        self.require_keyspace(&schema.keyspace)?;
        validate_identifier(&schema.table_name, "table_name")?;
        schema.validate()?;
        if if_not_exists
            && self
                .tables
                .contains_key(&(schema.keyspace.clone(), schema.table_name.clone()))
        {
            return Ok(DdlOutcome::NoOp);
        }
        self.registry
            .register(&schema.keyspace, &schema.table_name, ObjectKind::Table)?;
        self.tables.insert(
            (schema.keyspace.clone(), schema.table_name.clone()),
            schema,
        );
        Ok(DdlOutcome::Applied)
    }

    pub fn drop_table(
        &mut self,
        keyspace: &str,
        table_name: &str,
        if_exists: bool,
    ) -> Result<DdlOutcome, SidxError> {
        let key = (keyspace.to_string(), table_name.to_string());
        let Some(schema) = self.tables.remove(&key) else {
            if if_exists {
                return Ok(DdlOutcome::NoOp);
            }
            return Err(SidxError::NotFound {
                resource_type: ResourceType::Table,
                resource_id: format!("{keyspace}.{table_name}"),
            });
        };
        let dropped = self.list_for_table(keyspace, table_name);
        for index in &dropped {
            self.remove_index(index);
        }
        self.registry
            .release(keyspace, table_name, ObjectKind::Table);
        Ok(DdlOutcome::TableDropped {
            schema,
            indexes: dropped,
        })
    }

    /// Registers a new index and its backing view.
    ///
    /// Ordering of the checks matters: an explicit name that is already taken
    /// always fails, even with `IF NOT EXISTS`, unless the existing index is
    /// exactly what was asked for. A request whose columns are already indexed
    /// fails as a duplicate, or is a no-op with `IF NOT EXISTS`. Only then is
    /// a generated name checked for collisions.
    pub fn create_index(
        &mut self,
        keyspace: &str,
        definition: IndexDefinition,
    ) -> Result<DdlOutcome, SidxError> {
        self.require_keyspace(keyspace)?;
        let schema = self.table(keyspace, &definition.table_name)?.clone();
        let kind = definition.kind();
        validate_index_target(&schema, &definition)?;

        if let Some(name) = &definition.name {
            validate_identifier(name, "index_name")?;
            match self.registry.lookup(keyspace, name) {
                Some(ObjectKind::Index) => {
                    let existing = self.index(keyspace, name)?;
                    if definition.if_not_exists
                        && existing.table_name == definition.table_name
                        && existing.same_target(kind, &definition.indexed_columns)
                    {
                        return Ok(DdlOutcome::NoOp);
                    }
                    return Err(SidxError::NameConflict {
                        resource_type: ResourceType::Index,
                        name: format!("{keyspace}.{name}"),
                    });
                }
                Some(other) => {
                    return Err(SidxError::NameConflict {
                        resource_type: other.resource_type(),
                        name: format!("{keyspace}.{name}"),
                    });
                }
                None => {}
            }
        }

        if let Some(existing) = self
            .list_for_table(keyspace, &definition.table_name)
            .into_iter()
            .find(|idx| idx.same_target(kind, &definition.indexed_columns))
        {
            if definition.if_not_exists {
                return Ok(DdlOutcome::NoOp);
            }
            return Err(SidxError::DuplicateIndex {
                requested: definition
                    .name
                    .clone()
                    .unwrap_or_else(|| definition.default_name()),
                existing: existing.name,
                table: definition.table_name.clone(),
                columns: definition.indexed_columns.join(", "),
            });
        }

        let name = definition
            .name
            .clone()
            .unwrap_or_else(|| definition.default_name());
        let view = backing_view_name(&name);
        self.registry.ensure_free(keyspace, &name)?;
        self.registry.ensure_free(keyspace, &view)?;
        self.registry.register(keyspace, &name, ObjectKind::Index)?;
        self.registry.register(keyspace, &view, ObjectKind::View)?;

        self.next_generation += 1;
        let descriptor = IndexDescriptor {
            keyspace: keyspace.to_string(),
            name: name.clone(),
            table_name: definition.table_name.clone(),
            indexed_columns: definition.indexed_columns.clone(),
            kind,
            backing_view: view,
            generation: self.next_generation,
            state: IndexState::Building,
        };
        self.indexes
            .insert((keyspace.to_string(), name), descriptor.clone());
        Ok(DdlOutcome::IndexCreated(descriptor))
    }

    pub fn drop_index(
        &mut self,
        keyspace: &str,
        index_name: &str,
        if_exists: bool,
    ) -> Result<DdlOutcome, SidxError> {
        let descriptor = match self.index(keyspace, index_name) {
            Ok(descriptor) => descriptor.clone(),
            Err(err) => {
                if if_exists {
                    return Ok(DdlOutcome::NoOp);
                }
                return Err(err);
            }
        };
        self.remove_index(&descriptor);
        Ok(DdlOutcome::IndexDropped(descriptor))
    }

    fn remove_index(&mut self, descriptor: &IndexDescriptor) {
        self.indexes
            .remove(&(descriptor.keyspace.clone(), descriptor.name.clone()));
        self.registry
            .release(&descriptor.keyspace, &descriptor.name, ObjectKind::Index);
        self.registry.release(
            &descriptor.keyspace,
            &descriptor.backing_view,
            ObjectKind::View,
        );
    }

    /// Flips an index to `Ready` if it is still the generation that was built.
    pub fn mark_index_ready(&mut self, keyspace: &str, index_name: &str, generation: u64) -> bool {
        let key = (keyspace.to_string(), index_name.to_string());
        let Some(descriptor) = self.indexes.get(&key) else {
            return false;
        };
        if descriptor.generation != generation {
            return false;
        }
        let mut ready = descriptor.clone();
        ready.state = IndexState::Ready;
        self.indexes.insert(key, ready);
        true
    }

    pub fn table(&self, keyspace: &str, table_name: &str) -> Result<&TableSchema, SidxError> {
        self.tables
            .get(&(keyspace.to_string(), table_name.to_string()))
            .ok_or_else(|| SidxError::NotFound {
                resource_type: ResourceType::Table,
                resource_id: format!("{keyspace}.{table_name}"),
            })
    }

    pub fn index(&self, keyspace: &str, index_name: &str) -> Result<&IndexDescriptor, SidxError> {
        self.indexes
            .get(&(keyspace.to_string(), index_name.to_string()))
            .ok_or_else(|| SidxError::NotFound {
                resource_type: ResourceType::Index,
                resource_id: format!("{keyspace}.{index_name}"),
            })
    }

    /// Resolves either an index name or its backing view name.
    pub fn index_by_view_or_name(
        &self,
        keyspace: &str,
        name: &str,
    ) -> Result<&IndexDescriptor, SidxError> {
        if let Ok(descriptor) = self.index(keyspace, name) {
            return Ok(descriptor);
        }
        self.indexes
            .values()
            .find(|idx| idx.keyspace == keyspace && idx.backing_view == name)
            .ok_or_else(|| SidxError::NotFound {
                resource_type: ResourceType::View,
                resource_id: format!("{keyspace}.{name}"),
            })
    }

    /// Indexes of a table in creation order.
    pub fn list_for_table(&self, keyspace: &str, table_name: &str) -> Vec<IndexDescriptor> {
        let mut out: Vec<IndexDescriptor> = self
            .indexes
            .values()
            .filter(|idx| idx.keyspace == keyspace && idx.table_name == table_name)
            .cloned()
            .collect();
        out.sort_by_key(|idx| idx.generation);
        out
    }

    pub fn namespace(&self) -> &NamespaceRegistry {
        &self.registry
    }

    fn require_keyspace(&self, keyspace: &str) -> Result<(), SidxError> {
        if self.keyspaces.contains(keyspace) {
            return Ok(());
        }
        Err(SidxError::NotFound {
            resource_type: ResourceType::Keyspace,
            resource_id: keyspace.to_string(),
        })
    }
}

fn validate_index_target(
    schema: &TableSchema,
    definition: &IndexDefinition,
) -> Result<(), SidxError> {
    if definition.indexed_columns.is_empty() {
        return Err(SidxError::Validation(
            "index definition names no columns".into(),
        ));
    }
    let mut seen = StdHashSet::new();
    for col in &definition.indexed_columns {
        if schema.column_index(col).is_none() {
            return Err(SidxError::UnknownColumn {
                table: schema.table_name.clone(),
                column: col.clone(),
            });
        }
        if !seen.insert(col.as_str()) {
            return Err(SidxError::Validation(format!(
                "column {col} listed twice in index definition"
            )));
        }
    }
    match definition.kind() {
        IndexKind::Local => {
            let partition_columns = definition
                .local_partition_columns
                .as_deref()
                .unwrap_or_default();
            if partition_columns != schema.partition_key.as_slice() {
                return Err(SidxError::Validation(format!(
                    "local index partition columns ({}) must match the partition key ({}) of {}",
                    partition_columns.join(", "),
                    schema.partition_key.join(", "),
                    schema.qualified_name()
                )));
            }
            if let Some(col) = definition
                .indexed_columns
                .iter()
                .find(|c| schema.is_partition_key(c))
            {
                return Err(SidxError::Validation(format!(
                    "local index cannot target partition key column {col}"
                )));
            }
        }
        IndexKind::Global => {
            let covers_whole_key = schema.partition_key.len() == definition.indexed_columns.len()
                && schema
                    .partition_key
                    .iter()
                    .all(|pk| definition.indexed_columns.contains(pk));
            if covers_whole_key {
                return Err(SidxError::Validation(format!(
                    "cannot create secondary index on the partition key of {}",
                    schema.qualified_name()
                )));
            }
        }
    }
    Ok(())
}

fn validate_identifier(value: &str, field: &str) -> Result<(), SidxError> {
    if value.is_empty() {
        return Err(SidxError::Validation(format!("{field} cannot be empty")));
    }
    if value.len() > 222 {
        return Err(SidxError::Validation(format!(
            "{field} exceeds 222 characters"
        )));
    }
    if !value.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(SidxError::Validation(format!(
            "{field} may only contain alphanumeric characters and underscores: {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Catalog, DdlOperation, DdlOutcome};
    use crate::catalog::namespace::ObjectKind;
    use crate::catalog::schema::{IndexDefinition, IndexKind, IndexState, TableSchema};
    use crate::catalog::types::ColumnType;
    use crate::error::{ResourceType, SidxError};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.create_keyspace("ks", false).expect("keyspace");
        catalog
            .create_table(
                TableSchema::new("ks", "t")
                    .column("p", ColumnType::Integer)
                    .column("v", ColumnType::Integer)
                    .column("v1", ColumnType::Integer)
                    .column("v2", ColumnType::Integer)
                    .partition_key(&["p"]),
                false,
            )
            .expect("table");
        catalog
    }

    fn created(outcome: DdlOutcome) -> String {
        match outcome {
            DdlOutcome::IndexCreated(descriptor) => descriptor.name,
            other => panic!("expected index creation, got {other:?}"),
        }
    }

    #[test]
    fn unnamed_index_gets_generated_names_and_starts_building() {
        let mut catalog = catalog();
        let name = created(
            catalog
                .create_index("ks", IndexDefinition::on("t", &["v"]))
                .expect("create"),
        );
        assert_eq!(name, "t_v_idx");
        let descriptor = catalog.index("ks", "t_v_idx").expect("descriptor");
        assert_eq!(descriptor.backing_view, "t_v_idx_index");
        assert_eq!(descriptor.state, IndexState::Building);
        assert_eq!(
            catalog.namespace().lookup("ks", "t_v_idx_index"),
            Some(ObjectKind::View)
        );
    }

    #[test]
    fn unnamed_duplicate_fails_but_if_not_exists_is_noop() {
        let mut catalog = catalog();
        catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]))
            .expect("create");
        let err = catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]))
            .expect_err("duplicate");
        assert!(matches!(err, SidxError::DuplicateIndex { .. }));
        assert!(err.to_string().contains("duplicate"));
        let outcome = catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]).if_not_exists())
            .expect("if not exists");
        assert_eq!(outcome, DdlOutcome::NoOp);
    }

    #[test]
    fn named_collision_fails_even_with_if_not_exists_for_other_columns() {
        let mut catalog = catalog();
        catalog
            .create_index("ks", IndexDefinition::on("t", &["v1"]).named("x"))
            .expect("create");
        let err = catalog
            .create_index("ks", IndexDefinition::on("t", &["v2"]).named("x"))
            .expect_err("name taken");
        assert!(err.to_string().contains("already exists"));
        let err = catalog
            .create_index(
                "ks",
                IndexDefinition::on("t", &["v2"]).named("x").if_not_exists(),
            )
            .expect_err("still taken");
        assert!(matches!(
            err,
            SidxError::NameConflict {
                resource_type: ResourceType::Index,
                ..
            }
        ));
        let same = catalog
            .create_index(
                "ks",
                IndexDefinition::on("t", &["v1"]).named("x").if_not_exists(),
            )
            .expect("identical definition");
        assert_eq!(same, DdlOutcome::NoOp);
    }

    #[test]
    fn differently_named_duplicate_is_noop_under_if_not_exists() {
        let mut catalog = catalog();
        catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]).named("xyz"))
            .expect("create");
        let err = catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]).named("abc"))
            .expect_err("duplicate");
        assert!(matches!(err, SidxError::DuplicateIndex { .. }));
        catalog
            .create_index(
                "ks",
                IndexDefinition::on("t", &["v"]).named("abc").if_not_exists(),
            )
            .expect("noop");
        assert!(matches!(
            catalog.drop_index("ks", "abc", false),
            Err(SidxError::NotFound { .. })
        ));
        catalog.drop_index("ks", "xyz", false).expect("drop");
    }

    #[test]
    fn generated_name_taken_by_table_fails_regardless_of_if_not_exists() {
        let mut catalog = catalog();
        catalog
            .create_table(
                TableSchema::new("ks", "t_v_idx_index")
                    .column("i", ColumnType::Integer)
                    .partition_key(&["i"]),
                false,
            )
            .expect("squatter");
        for def in [
            IndexDefinition::on("t", &["v"]),
            IndexDefinition::on("t", &["v"]).if_not_exists(),
        ] {
            let err = catalog.create_index("ks", def).expect_err("view name taken");
            assert!(matches!(
                err,
                SidxError::NameConflict {
                    resource_type: ResourceType::Table,
                    ..
                }
            ));
        }
        assert!(catalog.list_for_table("ks", "t").is_empty());
    }

    #[test]
    fn local_index_must_use_partition_key() {
        let mut catalog = catalog();
        let err = catalog
            .create_index("ks", IndexDefinition::on("t", &["v2"]).local(&["v1"]))
            .expect_err("bad local");
        assert!(matches!(err, SidxError::Validation(_)));
        let name = created(
            catalog
                .create_index(
                    "ks",
                    IndexDefinition::on("t", &["v2"]).named("my_v2_idx").local(&["p"]),
                )
                .expect("local"),
        );
        assert_eq!(
            catalog.index("ks", &name).expect("desc").kind,
            IndexKind::Local
        );
    }

    #[test]
    fn cannot_index_sole_partition_key() {
        let mut catalog = catalog();
        assert!(
            catalog
                .create_index("ks", IndexDefinition::on("t", &["p"]))
                .is_err()
        );
    }

    #[test]
    fn list_for_table_keeps_creation_order_and_drop_table_cascades() {
        let mut catalog = catalog();
        for (name, col) in [("my_v3", "v2"), ("my_v1", "v1"), ("my_v", "v")] {
            catalog
                .create_index("ks", IndexDefinition::on("t", &[col]).named(name))
                .expect("create");
        }
        let names: Vec<String> = catalog
            .list_for_table("ks", "t")
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["my_v3", "my_v1", "my_v"]);

        let outcome = catalog.drop_table("ks", "t", false).expect("drop");
        let DdlOutcome::TableDropped { indexes, .. } = outcome else {
            panic!("expected table drop");
        };
        assert_eq!(indexes.len(), 3);
        assert!(catalog.namespace().lookup("ks", "my_v1_index").is_none());
    }

    #[test]
    fn mark_ready_ignores_stale_generation() {
        let mut catalog = catalog();
        let DdlOutcome::IndexCreated(first) = catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]).named("x"))
            .expect("create")
        else {
            panic!("expected creation");
        };
        catalog.drop_index("ks", "x", false).expect("drop");
        catalog
            .create_index("ks", IndexDefinition::on("t", &["v"]).named("x"))
            .expect("recreate");
        assert!(!catalog.mark_index_ready("ks", "x", first.generation));
        assert!(!catalog.index("ks", "x").expect("x").is_ready());
    }

    #[test]
    fn ddl_payload_roundtrip() {
        let op = DdlOperation::DropIndex {
            keyspace: "ks".into(),
            index_name: "x".into(),
            if_exists: true,
        };
        let bytes = Catalog::ddl_payload(&op).expect("encode");
        assert_eq!(Catalog::ddl_from_payload(&bytes).expect("decode"), op);
    }
}
