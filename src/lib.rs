pub mod catalog;
pub mod commit;
pub mod config;
pub mod error;
pub mod query;
pub mod storage;
pub mod view;

use crate::catalog::schema::{IndexDefinition, IndexDescriptor, TableSchema};
use crate::catalog::{Catalog, DdlOperation, DdlOutcome};
use crate::commit::apply::{AppliedWrite, apply_mutation};
use crate::commit::validation::{Mutation, validate_mutation};
use crate::commit::{CommitResult, WriteClock};
use crate::config::SidxConfig;
use crate::error::SidxError;
use crate::query::error::QueryError;
use crate::query::executor::{QueryResult, QuerySnapshot, execute_query};
use crate::query::plan::{Query, QueryPlan};
use crate::query::planner::build_plan;
use crate::query::selector::{IndexSelector, RestrictionOrderSelector};
use crate::storage::base::BaseStore;
use crate::storage::view::{ViewBatchSink, ViewRow, ViewStore};
use crate::view::maintainer::{MaintainerMetrics, ViewMaintainer, ViewWork};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCreation {
    /// A new index was registered; its view is being populated.
    Created(IndexDescriptor),
    /// `IF NOT EXISTS` matched an existing index; nothing changed.
    AlreadyPresent,
}

/// In-process secondary-index engine: base tables, backing views and the
/// background task that keeps them in step.
///
/// Locks are always taken catalog first, then base store. The view
/// maintainer never touches the base store lock.
pub struct SidxInstance {
    config: Arc<SidxConfig>,
    catalog: Arc<RwLock<Catalog>>,
    base: RwLock<BaseStore>,
    views: Arc<ViewStore>,
    maintainer: ViewMaintainer,
    clock: WriteClock,
    selector: Box<dyn IndexSelector>,
}

impl SidxInstance {
    /// Opens an empty instance. Must be called from inside a tokio runtime.
    pub fn open(config: SidxConfig) -> Result<Self, SidxError> {
        Self::open_with_sink(config, |views| views as Arc<dyn ViewBatchSink>)
    }

    /// Opens an instance whose view batches go through the sink built by
    /// `make_sink` from the view store.
    pub fn open_with_sink<F>(config: SidxConfig, make_sink: F) -> Result<Self, SidxError>
    where
        F: FnOnce(Arc<ViewStore>) -> Arc<dyn ViewBatchSink>,
    {
        config.validate()?;
        info!(
            max_indexed_value_bytes = config.max_indexed_value_bytes,
            view_batch_max_mutations = config.view_batch_max_mutations,
            view_batch_max_retries = config.view_batch_max_retries,
            default_page_size = config.default_page_size,
            max_page_size = config.max_page_size,
            "opening sidx instance"
        );
        let config = Arc::new(config);
        let catalog = Arc::new(RwLock::new(Catalog::default()));
        let views = Arc::new(ViewStore::default());
        let sink = make_sink(Arc::clone(&views));
        let maintainer = ViewMaintainer::spawn(Arc::clone(&catalog), sink, Arc::clone(&config))?;
        Ok(Self {
            config,
            catalog,
            base: RwLock::new(BaseStore::default()),
            views,
            maintainer,
            clock: WriteClock::default(),
            selector: Box::new(RestrictionOrderSelector),
        })
    }

    /// Replaces the index selection policy.
    pub fn with_selector(mut self, selector: impl IndexSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn config(&self) -> &SidxConfig {
        &self.config
    }

    /// Applies a DDL statement and starts or stops the view work it implies.
    pub fn apply_ddl(&self, op: DdlOperation) -> Result<DdlOutcome, SidxError> {
        let mut catalog = self.catalog.write();
        let outcome = catalog.apply_ddl(op.clone())?;
        match &outcome {
            DdlOutcome::Applied => {
                if let DdlOperation::CreateTable { schema, .. } = &op {
                    self.base
                        .write()
                        .create_table(&schema.keyspace, &schema.table_name);
                }
            }
            DdlOutcome::NoOp => {}
            DdlOutcome::IndexCreated(descriptor) => {
                let schema = catalog.table(&descriptor.keyspace, &descriptor.table_name)?.clone();
                self.views.create_view(
                    &descriptor.keyspace,
                    &descriptor.backing_view,
                    &descriptor.name,
                    descriptor.generation,
                );
                // Snapshot and enqueue under the same locks writers use, so
                // every later write lands after the build in the log.
                let base = self.base.read();
                let table = base
                    .table(&descriptor.keyspace, &descriptor.table_name)
                    .cloned()
                    .unwrap_or_default();
                let rows = table.row_count();
                if let Err(err) = self.maintainer.enqueue(ViewWork::BuildIndex {
                    descriptor: descriptor.clone(),
                    schema,
                    table,
                }) {
                    drop(base);
                    catalog.drop_index(&descriptor.keyspace, &descriptor.name, true)?;
                    self.views
                        .drop_view(&descriptor.keyspace, &descriptor.backing_view);
                    return Err(err);
                }
                info!(
                    keyspace = %descriptor.keyspace,
                    table = %descriptor.table_name,
                    index = %descriptor.name,
                    kind = ?descriptor.kind,
                    generation = descriptor.generation,
                    rows,
                    "index created"
                );
            }
            DdlOutcome::IndexDropped(descriptor) => {
                self.views
                    .drop_view(&descriptor.keyspace, &descriptor.backing_view);
                info!(keyspace = %descriptor.keyspace, index = %descriptor.name, "index dropped");
            }
            DdlOutcome::TableDropped { schema, indexes } => {
                self.base
                    .write()
                    .drop_table(&schema.keyspace, &schema.table_name);
                for index in indexes {
                    self.views.drop_view(&index.keyspace, &index.backing_view);
                }
                info!(
                    keyspace = %schema.keyspace,
                    table = %schema.table_name,
                    indexes = indexes.len(),
                    "table dropped"
                );
            }
        }
        Ok(outcome)
    }

    pub fn create_keyspace(&self, keyspace: &str) -> Result<(), SidxError> {
        self.apply_ddl(DdlOperation::CreateKeyspace {
            keyspace: keyspace.to_string(),
            if_not_exists: true,
        })
        .map(|_| ())
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<(), SidxError> {
        self.apply_ddl(DdlOperation::CreateTable {
            schema,
            if_not_exists: false,
        })
        .map(|_| ())
    }

    /// Drops the table together with its indexes and their views.
    pub fn drop_table(&self, keyspace: &str, table_name: &str) -> Result<(), SidxError> {
        self.apply_ddl(DdlOperation::DropTable {
            keyspace: keyspace.to_string(),
            table_name: table_name.to_string(),
            if_exists: false,
        })
        .map(|_| ())
    }

    pub fn create_index(
        &self,
        keyspace: &str,
        definition: IndexDefinition,
    ) -> Result<IndexCreation, SidxError> {
        match self.apply_ddl(DdlOperation::CreateIndex {
            keyspace: keyspace.to_string(),
            definition,
        })? {
            DdlOutcome::IndexCreated(descriptor) => Ok(IndexCreation::Created(descriptor)),
            _ => Ok(IndexCreation::AlreadyPresent),
        }
    }

    pub fn drop_index(&self, keyspace: &str, index_name: &str) -> Result<IndexDescriptor, SidxError> {
        match self.apply_ddl(DdlOperation::DropIndex {
            keyspace: keyspace.to_string(),
            index_name: index_name.to_string(),
            if_exists: false,
        })? {
            DdlOutcome::IndexDropped(descriptor) => Ok(descriptor),
            other => Err(SidxError::Validation(format!(
                "unexpected outcome dropping index {keyspace}.{index_name}: {other:?}"
            ))),
        }
    }

    /// Indexes of a table in creation order.
    pub fn list_indexes(
        &self,
        keyspace: &str,
        table_name: &str,
    ) -> Result<Vec<IndexDescriptor>, SidxError> {
        let catalog = self.catalog.read();
        catalog.table(keyspace, table_name)?;
        Ok(catalog.list_for_table(keyspace, table_name))
    }

    pub fn index(&self, keyspace: &str, index_name: &str) -> Result<IndexDescriptor, SidxError> {
        self.catalog.read().index(keyspace, index_name).cloned()
    }

    /// Validates and applies one write, then queues its view maintenance.
    ///
    /// Views catch up asynchronously; see [`Self::wait_for_view_quiescence`].
    pub async fn commit(&self, mutation: Mutation) -> Result<CommitResult, SidxError> {
        self.commit_now(&mutation)
    }

    fn commit_now(&self, mutation: &Mutation) -> Result<CommitResult, SidxError> {
        let catalog = self.catalog.read();
        validate_mutation(&catalog, mutation, &self.config)?;
        let (keyspace, table_name) = mutation.target();
        let schema = catalog.table(keyspace, table_name)?;
        let indexed = !catalog.list_for_table(keyspace, table_name).is_empty();
        let write_ts = mutation.timestamp().unwrap_or_else(|| self.clock.next());

        let mut base = self.base.write();
        // Room in the log is claimed before the base write, so a full log
        // rejects the mutation instead of leaving it without view work.
        let slot = if indexed {
            Some(self.maintainer.reserve().inspect_err(|err| {
                warn!(keyspace, table = table_name, error = %err, "view work could not be queued");
            })?)
        } else {
            None
        };
        let applied = apply_mutation(&mut base, schema, mutation, write_ts)?;
        let is_applied = applied.is_applied();
        let work = match applied {
            AppliedWrite::Row(change) => Some(ViewWork::RowChanged(change)),
            AppliedWrite::Removal(removal) if !removal.is_empty() => {
                Some(ViewWork::RowsRemoved(removal))
            }
            _ => None,
        };
        // Sent while the base lock is held so the log follows write order.
        if let (Some(slot), Some(work)) = (slot, work) {
            slot.send(work);
        }
        Ok(CommitResult {
            write_ts,
            applied: is_applied,
        })
    }

    /// Plans `query` without running it.
    pub fn explain(&self, query: &Query) -> Result<QueryPlan, QueryError> {
        let catalog = self.catalog.read();
        let schema = catalog
            .table(&query.keyspace, &query.table)
            .map_err(|_| QueryError::TableNotFound {
                keyspace: query.keyspace.clone(),
                table: query.table.clone(),
            })?;
        let indexes = catalog.list_for_table(&query.keyspace, &query.table);
        build_plan(query, schema, &indexes, self.selector.as_ref())
    }

    pub async fn query(&self, query: Query) -> Result<QueryResult, QueryError> {
        self.query_now(&query)
    }

    fn query_now(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let (schema, plan, descriptor, table) = {
            let catalog = self.catalog.read();
            let schema = catalog
                .table(&query.keyspace, &query.table)
                .map_err(|_| QueryError::TableNotFound {
                    keyspace: query.keyspace.clone(),
                    table: query.table.clone(),
                })?
                .clone();
            let indexes = catalog.list_for_table(&query.keyspace, &query.table);
            let plan = build_plan(query, &schema, &indexes, self.selector.as_ref())?;
            let descriptor = plan
                .index_used
                .as_ref()
                .and_then(|name| indexes.into_iter().find(|idx| &idx.name == name));
            let table = self
                .base
                .read()
                .table(&query.keyspace, &query.table)
                .cloned()
                .unwrap_or_default();
            (schema, plan, descriptor, table)
        };
        let view = match &descriptor {
            Some(descriptor) => Some(
                self.views
                    .snapshot(&descriptor.keyspace, &descriptor.backing_view)
                    .ok_or_else(|| QueryError::ViewNotReady {
                        index: descriptor.name.clone(),
                    })?,
            ),
            None => None,
        };
        let snapshot = QuerySnapshot {
            schema: &schema,
            table: &table,
            index: descriptor.as_ref().zip(view.as_ref()),
        };
        execute_query(query, &plan, &snapshot, &self.config)
    }

    /// Polls until the index has been fully built, or fails with `Timeout`.
    pub async fn wait_for_index_ready(
        &self,
        keyspace: &str,
        index_name: &str,
        timeout: Duration,
    ) -> Result<IndexDescriptor, SidxError> {
        let poll = Duration::from_millis(self.config.index_ready_poll_interval_ms);
        let wait = async {
            loop {
                let descriptor = match self.index(keyspace, index_name) {
                    Ok(descriptor) => descriptor,
                    Err(err) => return Err(err),
                };
                if descriptor.is_ready() {
                    return Ok(descriptor);
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SidxError::Timeout)?
    }

    /// Resolves once every write committed before the call is reflected in
    /// the backing views.
    pub async fn wait_for_view_quiescence(&self) -> Result<(), SidxError> {
        self.maintainer.quiesce().await
    }

    /// Current entries of an index's backing view, by index or view name.
    pub fn view_rows(&self, keyspace: &str, name: &str) -> Result<Vec<ViewRow>, SidxError> {
        let view = {
            let catalog = self.catalog.read();
            catalog.index_by_view_or_name(keyspace, name)?.backing_view.clone()
        };
        let snapshot = self
            .views
            .snapshot(keyspace, &view)
            .ok_or_else(|| SidxError::NotFound {
                resource_type: crate::error::ResourceType::View,
                resource_id: format!("{keyspace}.{view}"),
            })?;
        Ok(snapshot.rows().cloned().collect())
    }

    pub fn metrics(&self) -> MaintainerMetrics {
        self.maintainer.metrics()
    }

    /// Most recent view batch the maintainer gave up on.
    pub fn last_view_failure(&self) -> Option<SidxError> {
        self.maintainer.last_failure()
    }

    /// Drains queued view work and stops the maintainer.
    pub async fn shutdown(&self) {
        self.maintainer.shutdown().await;
    }
}
