use crate::catalog::schema::TableSchema;
use crate::catalog::types::{Row, Value};
use crate::query::error::QueryError;
use crate::query::plan::{Operator, Restriction};
use std::cmp::Ordering;

/// A restriction with its columns resolved to row positions.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledRestriction {
    Column {
        position: usize,
        op: Operator,
        value: Value,
    },
    In {
        position: usize,
        values: Vec<Value>,
    },
    Tuple {
        positions: Vec<usize>,
        op: Operator,
        values: Vec<Value>,
    },
}

impl CompiledRestriction {
    pub fn is_satisfied_by(&self, row: &Row) -> bool {
        match self {
            CompiledRestriction::Column {
                position,
                op,
                value,
            } => row
                .get(*position)
                .is_some_and(|left| compare(*op, left, value)),
            CompiledRestriction::In { position, values } => row
                .get(*position)
                .is_some_and(|left| !left.is_null() && values.contains(left)),
            CompiledRestriction::Tuple {
                positions,
                op,
                values,
            } => {
                let left: Vec<&Value> = positions
                    .iter()
                    .map(|p| row.get(*p).unwrap_or(&Value::Null))
                    .collect();
                tuple_compare(*op, &left, values)
            }
        }
    }
}

/// Null on the row side never satisfies a comparison.
pub fn compare(op: Operator, left: &Value, right: &Value) -> bool {
    if left.is_null() {
        return false;
    }
    holds(op, left.cmp(right))
}

/// Lexicographic comparison of `(a, b, ...)` against `(x, y, ...)` on the
/// values themselves, whatever order the columns are stored in.
pub fn tuple_compare(op: Operator, left: &[&Value], right: &[Value]) -> bool {
    if left.len() != right.len() || left.iter().any(|v| v.is_null()) {
        return false;
    }
    let ordering = left
        .iter()
        .zip(right)
        .map(|(l, r)| (*l).cmp(r))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal);
    holds(op, ordering)
}

fn holds(op: Operator, ordering: Ordering) -> bool {
    match op {
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ne => ordering != Ordering::Equal,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Lte => ordering != Ordering::Greater,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Gte => ordering != Ordering::Less,
    }
}

pub fn compile(
    restrictions: &[Restriction],
    schema: &TableSchema,
) -> Result<Vec<CompiledRestriction>, QueryError> {
    let position = |column: &str| {
        schema
            .column_index(column)
            .ok_or_else(|| QueryError::ColumnNotFound {
                table: schema.table_name.clone(),
                column: column.to_string(),
            })
    };
    restrictions
        .iter()
        .map(|restriction| {
            Ok(match restriction {
                Restriction::Column { column, op, value } => CompiledRestriction::Column {
                    position: position(column)?,
                    op: *op,
                    value: value.clone(),
                },
                Restriction::In { column, values } => CompiledRestriction::In {
                    position: position(column)?,
                    values: values.clone(),
                },
                Restriction::Tuple {
                    columns,
                    op,
                    values,
                } => CompiledRestriction::Tuple {
                    positions: columns
                        .iter()
                        .map(|c| position(c))
                        .collect::<Result<_, _>>()?,
                    op: *op,
                    values: values.clone(),
                },
            })
        })
        .collect()
}

pub fn matches_all(compiled: &[CompiledRestriction], row: &Row) -> bool {
    compiled.iter().all(|r| r.is_satisfied_by(row))
}

#[cfg(test)]
mod tests {
    use super::{compare, compile, matches_all, tuple_compare};
    use crate::catalog::schema::{ClusteringOrder, TableSchema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::query::plan::{Operator, col, lit, tuple};

    fn schema() -> TableSchema {
        TableSchema::new("ks", "t")
            .column("p", ColumnType::Integer)
            .column("c1", ColumnType::Integer)
            .column("c2", ColumnType::Integer)
            .column("r", ColumnType::Integer)
            .partition_key(&["p"])
            .clustering("c1", ClusteringOrder::Desc)
            .clustering("c2", ClusteringOrder::Asc)
    }

    fn row(values: [i64; 4]) -> Row {
        Row::from_values(values.iter().map(|v| Value::Integer(*v)).collect())
    }

    #[test]
    fn null_never_matches() {
        assert!(!compare(Operator::Eq, &Value::Null, &Value::Null));
        assert!(!compare(Operator::Ne, &Value::Null, &Value::Integer(1)));
        assert!(compare(Operator::Lte, &Value::Integer(1), &Value::Integer(1)));
    }

    #[test]
    fn tuple_comparison_is_lexicographic() {
        let one = Value::Integer(1);
        let two = Value::Integer(2);
        let five = Value::Integer(5);
        let zero = Value::Integer(0);
        assert!(tuple_compare(Operator::Lt, &[&one, &five], &[two.clone(), zero.clone()]));
        assert!(!tuple_compare(Operator::Lt, &[&two, &zero], &[two.clone(), zero.clone()]));
        assert!(tuple_compare(Operator::Lte, &[&two, &zero], &[two.clone(), zero.clone()]));
    }

    #[test]
    fn tuple_restriction_ignores_storage_order() {
        let schema = schema();
        let compiled = compile(
            &[
                tuple(&["c1", "c2"]).lt(vec![lit(2), lit(0)]),
                col("r").eq(lit(0)),
            ],
            &schema,
        )
        .expect("compile");
        assert!(matches_all(&compiled, &row([0, 1, 7, 0])));
        assert!(!matches_all(&compiled, &row([0, 2, 0, 0])));
        assert!(!matches_all(&compiled, &row([0, 1, 7, 1])));
    }

    #[test]
    fn in_list_matches_members() {
        let compiled = compile(&[col("r").in_(vec![lit(3), lit(4)])], &schema()).expect("compile");
        assert!(matches_all(&compiled, &row([0, 0, 0, 4])));
        assert!(!matches_all(&compiled, &row([0, 0, 0, 5])));
    }

    #[test]
    fn unknown_column_fails_to_compile() {
        assert!(compile(&[col("nope").eq(lit(1))], &schema()).is_err());
    }
}
