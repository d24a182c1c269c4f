use crate::catalog::schema::{IndexDescriptor, IndexKind, TableSchema};
use crate::catalog::types::Value;
use crate::query::error::QueryError;
use crate::query::plan::{AccessPath, Operator, Query, QueryPlan, Restriction};
use crate::query::selector::IndexSelector;
use tracing::debug;

/// Validates `query` against `schema`, picks an access path and works out
/// which restrictions still have to be checked row by row.
pub fn build_plan(
    query: &Query,
    schema: &TableSchema,
    indexes: &[IndexDescriptor],
    selector: &dyn IndexSelector,
) -> Result<QueryPlan, QueryError> {
    for restriction in query.restrictions.iter() {
        validate_restriction(schema, restriction)?;
    }
    let output_columns = output_columns(query, schema)?;

    let restrictions: Vec<&Restriction> = query.restrictions.iter().collect();
    let mut consumed = vec![false; restrictions.len()];
    let partition_key = query.restrictions.eq_values(&schema.partition_key);

    let access = match selector.select(schema, &query.restrictions, indexes) {
        Some(index) => {
            debug!(
                keyspace = %query.keyspace,
                table = %query.table,
                index = %index.name,
                kind = ?index.kind,
                "secondary index selected"
            );
            if !index.is_ready() {
                return Err(QueryError::ViewNotReady {
                    index: index.name.clone(),
                });
            }
            let lookup = query
                .restrictions
                .eq_values(&index.indexed_columns)
                .ok_or_else(|| {
                    QueryError::InternalError(format!(
                        "index {} selected without equality on its columns",
                        index.name
                    ))
                })?;
            mark_equalities(&restrictions, &mut consumed, &index.indexed_columns, &lookup);
            let local_key = match index.kind {
                IndexKind::Local => {
                    let key = partition_key.clone().ok_or_else(|| {
                        QueryError::InternalError(format!(
                            "local index {} selected without its partition key",
                            index.name
                        ))
                    })?;
                    mark_equalities(&restrictions, &mut consumed, &schema.partition_key, &key);
                    Some(key)
                }
                IndexKind::Global => None,
            };
            AccessPath::IndexLookup {
                index: index.name.clone(),
                kind: index.kind,
                lookup,
                partition_key: local_key,
            }
        }
        None => match partition_key {
            Some(key) => {
                mark_equalities(&restrictions, &mut consumed, &schema.partition_key, &key);
                mark_clustering_slice(schema, &restrictions, &mut consumed);
                AccessPath::PartitionScan { partition_key: key }
            }
            None => AccessPath::FullScan,
        },
    };

    let residual: Vec<Restriction> = restrictions
        .iter()
        .zip(&consumed)
        .filter(|(_, used)| !**used)
        .map(|(r, _)| (*r).clone())
        .collect();
    let requires_filtering = !residual.is_empty();
    if requires_filtering && !query.allow_filtering {
        return Err(QueryError::FilteringRequired {
            table: schema.qualified_name(),
        });
    }

    let index_used = match &access {
        AccessPath::IndexLookup { index, .. } => Some(index.clone()),
        _ => None,
    };
    Ok(QueryPlan {
        output_columns,
        access,
        index_used,
        residual,
        requires_filtering,
    })
}

fn output_columns(query: &Query, schema: &TableSchema) -> Result<Vec<String>, QueryError> {
    if query.selects_all() {
        return Ok(schema.columns.iter().map(|c| c.name.clone()).collect());
    }
    for column in &query.select {
        if schema.column_index(column).is_none() {
            return Err(QueryError::ColumnNotFound {
                table: schema.table_name.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(query.select.clone())
}

fn validate_restriction(schema: &TableSchema, restriction: &Restriction) -> Result<(), QueryError> {
    match restriction {
        Restriction::Column { column, value, .. } => check_value(schema, column, value),
        Restriction::In { column, values } => {
            for value in values {
                check_value(schema, column, value)?;
            }
            Ok(())
        }
        Restriction::Tuple {
            columns, values, ..
        } => {
            if columns.is_empty() {
                return Err(QueryError::InvalidQuery {
                    reason: "empty tuple restriction".into(),
                });
            }
            if columns.len() != values.len() {
                return Err(QueryError::InvalidQuery {
                    reason: format!(
                        "expected {} elements in value tuple, but got {}",
                        columns.len(),
                        values.len()
                    ),
                });
            }
            for (column, value) in columns.iter().zip(values) {
                check_value(schema, column, value)?;
                if !schema.is_clustering_key(column) {
                    return Err(QueryError::InvalidQuery {
                        reason: format!(
                            "multi-column relations can only be applied to clustering columns but was applied to: {column}"
                        ),
                    });
                }
            }
            Ok(())
        }
    }
}

fn check_value(schema: &TableSchema, column: &str, value: &Value) -> Result<(), QueryError> {
    let def = schema
        .column_def(column)
        .ok_or_else(|| QueryError::ColumnNotFound {
            table: schema.table_name.clone(),
            column: column.to_string(),
        })?;
    if value.is_null() {
        return Err(QueryError::InvalidQuery {
            reason: format!("invalid null value in condition for column {column}"),
        });
    }
    if !def.col_type.accepts(value) {
        return Err(QueryError::TypeMismatch {
            column: column.to_string(),
            expected: format!("{:?}", def.col_type),
            got: value.type_name().to_string(),
        });
    }
    Ok(())
}

fn mark_equalities(
    restrictions: &[&Restriction],
    consumed: &mut [bool],
    columns: &[String],
    values: &[Value],
) {
    for (idx, restriction) in restrictions.iter().enumerate() {
        if let Some((column, value)) = restriction.eq_value()
            && columns
                .iter()
                .zip(values)
                .any(|(c, v)| c == column && v == value)
        {
            consumed[idx] = true;
        }
    }
}

/// Clustering restrictions a partition scan answers by itself: equality on
/// leading clustering columns, then at most one ranged column.
fn mark_clustering_slice(schema: &TableSchema, restrictions: &[&Restriction], consumed: &mut [bool]) {
    for clustering in &schema.clustering_key {
        let column = clustering.name.as_str();
        let mut has_eq = false;
        let mut has_range = false;
        for (idx, restriction) in restrictions.iter().enumerate() {
            match restriction {
                Restriction::Column {
                    column: c,
                    op: Operator::Eq,
                    ..
                } if c == column => {
                    consumed[idx] = true;
                    has_eq = true;
                }
                Restriction::Column {
                    column: c,
                    op: Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte,
                    ..
                } if c == column => {
                    consumed[idx] = true;
                    has_range = true;
                }
                Restriction::Tuple { columns, .. }
                    if columns.first().map(String::as_str) == Some(column)
                        && is_clustering_run(schema, columns) =>
                {
                    consumed[idx] = true;
                    has_range = true;
                }
                _ => {}
            }
        }
        if has_range || !has_eq {
            break;
        }
    }
}

fn is_clustering_run(schema: &TableSchema, columns: &[String]) -> bool {
    let Some(start) = schema
        .clustering_key
        .iter()
        .position(|c| Some(&c.name) == columns.first())
    else {
        return false;
    };
    schema.clustering_key[start..]
        .iter()
        .map(|c| &c.name)
        .take(columns.len())
        .eq(columns.iter())
}
