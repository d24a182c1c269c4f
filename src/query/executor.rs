use crate::catalog::schema::{IndexDescriptor, IndexKind, TableSchema};
use crate::catalog::types::{Row, Value};
use crate::config::SidxConfig;
use crate::query::cursor::{PageCursor, query_fingerprint};
use crate::query::error::QueryError;
use crate::query::operators::{CompiledRestriction, compile, matches_all};
use crate::query::plan::{AccessPath, Query, QueryPlan, Restriction};
use crate::storage::base::TableData;
use crate::storage::encoded_key::{ClusteringCodec, EncodedKey, prefix_bounds};
use crate::storage::token::PartitionPosition;
use crate::storage::view::BackingView;
use crate::view::{ViewTarget, global_view_partition, local_view_partition, local_view_prefix};
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Partition token of each returned row.
    pub tokens: Vec<i64>,
    pub cursor: Option<String>,
    pub index_used: Option<String>,
    pub rows_examined: usize,
}

/// Point-in-time state a query reads from.
pub struct QuerySnapshot<'a> {
    pub schema: &'a TableSchema,
    pub table: &'a TableData,
    /// Descriptor and backing view of the index the plan selected.
    pub index: Option<(&'a IndexDescriptor, &'a BackingView)>,
}

struct Matched {
    token: i64,
    partition_key: Vec<Value>,
    clustering: Vec<Value>,
    row: Row,
}

/// Collects one row past the page so the caller knows whether to hand out
/// a cursor.
struct PageCollector<'a> {
    compiled: &'a [CompiledRestriction],
    limit: usize,
    rows: Vec<Matched>,
    examined: usize,
}

impl<'a> PageCollector<'a> {
    fn new(compiled: &'a [CompiledRestriction], page_size: usize) -> Self {
        Self {
            compiled,
            limit: page_size.saturating_add(1),
            rows: Vec::new(),
            examined: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.rows.len() >= self.limit
    }

    /// Returns false once the page is full.
    fn offer(&mut self, token: i64, schema: &TableSchema, row: &Row) -> Result<bool, QueryError> {
        self.examined += 1;
        if matches_all(self.compiled, row) {
            self.rows.push(Matched {
                token,
                partition_key: schema.partition_key_values(row)?,
                clustering: schema.clustering_values(row)?,
                row: row.clone(),
            });
        }
        Ok(!self.is_full())
    }
}

pub fn execute_query(
    query: &Query,
    plan: &QueryPlan,
    snapshot: &QuerySnapshot<'_>,
    config: &SidxConfig,
) -> Result<QueryResult, QueryError> {
    let page_size = resolve_page_size(query, config)?;
    let cursor = match &query.cursor {
        Some(encoded) => Some(PageCursor::resume(encoded, query)?),
        None => None,
    };

    // Every row is checked against all restrictions, whatever the access
    // path already guarantees, so stale view entries never leak through.
    let all: Vec<Restriction> = query.restrictions.iter().cloned().collect();
    let compiled = compile(&all, snapshot.schema)?;
    let mut collector = PageCollector::new(&compiled, page_size);
    let codec = ClusteringCodec::for_schema(snapshot.schema);

    let indexed_values = match &plan.access {
        AccessPath::FullScan => {
            scan_partitions(snapshot, &codec, cursor.as_ref(), None, &mut collector)?;
            Vec::new()
        }
        AccessPath::PartitionScan { partition_key } => {
            let position = PartitionPosition::for_values(partition_key);
            scan_partitions(
                snapshot,
                &codec,
                cursor.as_ref(),
                Some(&position),
                &mut collector,
            )?;
            Vec::new()
        }
        AccessPath::IndexLookup {
            index,
            kind,
            lookup,
            partition_key,
        } => {
            let Some((descriptor, view)) = snapshot.index else {
                return Err(QueryError::ViewNotReady {
                    index: index.clone(),
                });
            };
            let target = ViewTarget::new(descriptor, snapshot.schema)?;
            match kind {
                IndexKind::Global => global_lookup(
                    snapshot,
                    &target,
                    view,
                    &codec,
                    lookup,
                    cursor.as_ref(),
                    &mut collector,
                )?,
                IndexKind::Local => {
                    let key = partition_key.as_deref().ok_or_else(|| {
                        QueryError::InternalError(format!(
                            "local index {index} planned without a partition key"
                        ))
                    })?;
                    local_lookup(
                        snapshot,
                        &target,
                        view,
                        &codec,
                        key,
                        lookup,
                        cursor.as_ref(),
                        &mut collector,
                    )?
                }
            }
            lookup.clone()
        }
    };

    let examined = collector.examined;
    let mut matched = collector.rows;
    let has_more = matched.len() > page_size;
    matched.truncate(page_size);
    let next_cursor = match (has_more, matched.last()) {
        (true, Some(last)) => Some(
            PageCursor {
                fingerprint: query_fingerprint(query)?,
                token: last.token,
                partition_key: last.partition_key.clone(),
                clustering: last.clustering.clone(),
                indexed_values,
            }
            .encode()?,
        ),
        _ => None,
    };

    let positions: Vec<usize> = plan
        .output_columns
        .iter()
        .map(|c| {
            snapshot
                .schema
                .column_index(c)
                .ok_or_else(|| QueryError::ColumnNotFound {
                    table: snapshot.schema.table_name.clone(),
                    column: c.clone(),
                })
        })
        .collect::<Result<_, _>>()?;
    let tokens = matched.iter().map(|m| m.token).collect();
    let rows = matched
        .into_iter()
        .map(|m| {
            Row::from_values(
                positions
                    .iter()
                    .map(|p| m.row.get(*p).cloned().unwrap_or(Value::Null))
                    .collect(),
            )
        })
        .collect();

    Ok(QueryResult {
        columns: plan.output_columns.clone(),
        rows,
        tokens,
        cursor: next_cursor,
        index_used: plan.index_used.clone(),
        rows_examined: examined,
    })
}

fn resolve_page_size(query: &Query, config: &SidxConfig) -> Result<usize, QueryError> {
    let requested = query.page_size.unwrap_or(config.default_page_size);
    if requested == 0 {
        return Err(QueryError::InvalidQuery {
            reason: "page size must be greater than zero".into(),
        });
    }
    Ok(requested.min(config.max_page_size))
}

fn resume_bound(
    cursor: Option<&PageCursor>,
    position: &PartitionPosition,
    codec: &ClusteringCodec,
) -> Bound<EncodedKey> {
    match cursor {
        Some(c) if c.position() == *position => Bound::Excluded(codec.encode(&c.clustering)),
        _ => Bound::Unbounded,
    }
}

/// Walks base partitions in token order. With `only`, just that partition.
fn scan_partitions(
    snapshot: &QuerySnapshot<'_>,
    codec: &ClusteringCodec,
    cursor: Option<&PageCursor>,
    only: Option<&PartitionPosition>,
    collector: &mut PageCollector<'_>,
) -> Result<(), QueryError> {
    let mut start = cursor.map(PageCursor::position);
    if let Some(position) = only
        && start.as_ref().is_none_or(|s| s < position)
    {
        start = Some(position.clone());
    }
    if let (Some(position), Some(s)) = (only, &start)
        && s > position
    {
        return Ok(());
    }
    let lower = match start {
        Some(s) => Bound::Included(s),
        None => Bound::Unbounded,
    };
    let upper = match only {
        Some(position) => Bound::Included(position.clone()),
        None => Bound::Unbounded,
    };
    for (position, partition) in snapshot.table.partitions.range((lower, upper)) {
        let rows_lower = resume_bound(cursor, position, codec);
        for (_, stored) in partition.rows.range((rows_lower, Bound::Unbounded)) {
            if !collector.offer(position.token, snapshot.schema, &stored.row)? {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn fetch_base<'a>(
    snapshot: &QuerySnapshot<'a>,
    codec: &ClusteringCodec,
    token: i64,
    partition_key: &[Value],
    clustering: &[Value],
) -> Option<&'a Row> {
    let position = PartitionPosition {
        token,
        key: EncodedKey::from_values(partition_key),
    };
    snapshot
        .table
        .partition(&position)?
        .rows
        .get(&codec.encode(clustering))
        .map(|stored| &stored.row)
}

fn global_lookup(
    snapshot: &QuerySnapshot<'_>,
    target: &ViewTarget,
    view: &BackingView,
    codec: &ClusteringCodec,
    lookup: &[Value],
    cursor: Option<&PageCursor>,
    collector: &mut PageCollector<'_>,
) -> Result<(), QueryError> {
    let Some(entries) = view.partition(&global_view_partition(lookup)) else {
        return Ok(());
    };
    let lower = match cursor {
        Some(c) => Bound::Excluded(
            target
                .entry_key(&c.partition_key, &c.clustering, lookup, c.token)
                .1,
        ),
        None => Bound::Unbounded,
    };
    for (_, entry) in entries.range((lower, Bound::Unbounded)) {
        // Entry may outlive its base row until the maintainer catches up.
        let Some(row) = fetch_base(
            snapshot,
            codec,
            entry.token,
            &entry.base_partition_key,
            &entry.base_clustering,
        ) else {
            continue;
        };
        if !collector.offer(entry.token, snapshot.schema, row)? {
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn local_lookup(
    snapshot: &QuerySnapshot<'_>,
    target: &ViewTarget,
    view: &BackingView,
    codec: &ClusteringCodec,
    partition_key: &[Value],
    lookup: &[Value],
    cursor: Option<&PageCursor>,
    collector: &mut PageCollector<'_>,
) -> Result<(), QueryError> {
    let Some(entries) = view.partition(&local_view_partition(partition_key)) else {
        return Ok(());
    };
    let (mut lower, upper) = prefix_bounds(&local_view_prefix(lookup));
    if let Some(c) = cursor {
        lower = Bound::Excluded(
            target
                .entry_key(&c.partition_key, &c.clustering, lookup, c.token)
                .1,
        );
    }
    for (_, entry) in entries.range((lower, upper)) {
        let Some(row) = fetch_base(
            snapshot,
            codec,
            entry.token,
            &entry.base_partition_key,
            &entry.base_clustering,
        ) else {
            continue;
        };
        if !collector.offer(entry.token, snapshot.schema, row)? {
            break;
        }
    }
    Ok(())
}
