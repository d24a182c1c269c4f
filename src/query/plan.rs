use crate::catalog::schema::IndexKind;
use crate::catalog::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Restriction {
    Column {
        column: String,
        op: Operator,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    /// Multi-column comparison `(c1, c2) < (x, y)`.
    Tuple {
        columns: Vec<String>,
        op: Operator,
        values: Vec<Value>,
    },
}

impl Restriction {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Restriction::Column { column, .. } | Restriction::In { column, .. } => {
                vec![column.as_str()]
            }
            Restriction::Tuple { columns, .. } => columns.iter().map(String::as_str).collect(),
        }
    }

    /// The value of a single-column equality restriction.
    pub fn eq_value(&self) -> Option<(&str, &Value)> {
        match self {
            Restriction::Column {
                column,
                op: Operator::Eq,
                value,
            } => Some((column.as_str(), value)),
            _ => None,
        }
    }
}

/// Restrictions in the order the query wrote them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RestrictionSet {
    restrictions: Vec<Restriction>,
}

impl RestrictionSet {
    pub fn new(restrictions: Vec<Restriction>) -> Self {
        Self { restrictions }
    }

    pub fn push(&mut self, restriction: Restriction) {
        self.restrictions.push(restriction);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Restriction> {
        self.restrictions.iter()
    }

    pub fn len(&self) -> usize {
        self.restrictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.restrictions.is_empty()
    }

    /// First equality value written for `column`.
    pub fn eq_value(&self, column: &str) -> Option<&Value> {
        self.restrictions
            .iter()
            .filter_map(Restriction::eq_value)
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    pub fn eq_values(&self, columns: &[String]) -> Option<Vec<Value>> {
        columns
            .iter()
            .map(|c| self.eq_value(c).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: Vec<String>,
    pub keyspace: String,
    pub table: String,
    pub restrictions: RestrictionSet,
    pub allow_filtering: bool,
    pub page_size: Option<usize>,
    pub cursor: Option<String>,
}

impl Query {
    pub fn select(cols: &[&str]) -> Self {
        Self {
            select: cols.iter().map(|s| s.to_string()).collect(),
            keyspace: String::new(),
            table: String::new(),
            restrictions: RestrictionSet::default(),
            allow_filtering: false,
            page_size: None,
            cursor: None,
        }
    }

    pub fn from(mut self, keyspace: &str, table: &str) -> Self {
        self.keyspace = keyspace.to_string();
        self.table = table.to_string();
        self
    }

    pub fn where_(mut self, restriction: Restriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    pub fn and(self, restriction: Restriction) -> Self {
        self.where_(restriction)
    }

    pub fn allow_filtering(mut self) -> Self {
        self.allow_filtering = true;
        self
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = Some(n);
        self
    }

    pub fn cursor(mut self, token: &str) -> Self {
        self.cursor = Some(token.to_string());
        self
    }

    pub fn selects_all(&self) -> bool {
        self.select.is_empty() || self.select.iter().any(|c| c == "*")
    }
}

/// How rows are reached.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    FullScan,
    /// Every partition key column restricted by equality.
    PartitionScan { partition_key: Vec<Value> },
    IndexLookup {
        index: String,
        kind: IndexKind,
        lookup: Vec<Value>,
        /// Base partition key, for local indexes.
        partition_key: Option<Vec<Value>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub output_columns: Vec<String>,
    pub access: AccessPath,
    pub index_used: Option<String>,
    /// Restrictions the access path does not answer on its own.
    pub residual: Vec<Restriction>,
    pub requires_filtering: bool,
}

pub struct ColumnRef(String);

pub fn col(name: &str) -> ColumnRef {
    ColumnRef(name.to_string())
}

pub struct TupleRef(Vec<String>);

pub fn tuple(names: &[&str]) -> TupleRef {
    TupleRef(names.iter().map(|c| c.to_string()).collect())
}

pub trait IntoQueryValue {
    fn into_query_value(self) -> Value;
}

impl IntoQueryValue for Value {
    fn into_query_value(self) -> Value {
        self
    }
}

impl IntoQueryValue for bool {
    fn into_query_value(self) -> Value {
        Value::Boolean(self)
    }
}

impl IntoQueryValue for i64 {
    fn into_query_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoQueryValue for i32 {
    fn into_query_value(self) -> Value {
        Value::Integer(self as i64)
    }
}

impl IntoQueryValue for f64 {
    fn into_query_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoQueryValue for String {
    fn into_query_value(self) -> Value {
        Value::Text(self.into())
    }
}

impl IntoQueryValue for &str {
    fn into_query_value(self) -> Value {
        Value::Text(self.into())
    }
}

pub fn lit<T: IntoQueryValue>(value: T) -> Value {
    value.into_query_value()
}

impl ColumnRef {
    fn compare(self, op: Operator, value: Value) -> Restriction {
        Restriction::Column {
            column: self.0,
            op,
            value,
        }
    }

    pub fn eq(self, value: Value) -> Restriction {
        self.compare(Operator::Eq, value)
    }

    pub fn neq(self, value: Value) -> Restriction {
        self.compare(Operator::Ne, value)
    }

    pub fn gt(self, value: Value) -> Restriction {
        self.compare(Operator::Gt, value)
    }

    pub fn gte(self, value: Value) -> Restriction {
        self.compare(Operator::Gte, value)
    }

    pub fn lt(self, value: Value) -> Restriction {
        self.compare(Operator::Lt, value)
    }

    pub fn lte(self, value: Value) -> Restriction {
        self.compare(Operator::Lte, value)
    }

    pub fn in_(self, values: Vec<Value>) -> Restriction {
        Restriction::In {
            column: self.0,
            values,
        }
    }
}

impl TupleRef {
    fn compare(self, op: Operator, values: Vec<Value>) -> Restriction {
        Restriction::Tuple {
            columns: self.0,
            op,
            values,
        }
    }

    pub fn eq(self, values: Vec<Value>) -> Restriction {
        self.compare(Operator::Eq, values)
    }

    pub fn gt(self, values: Vec<Value>) -> Restriction {
        self.compare(Operator::Gt, values)
    }

    pub fn gte(self, values: Vec<Value>) -> Restriction {
        self.compare(Operator::Gte, values)
    }

    pub fn lt(self, values: Vec<Value>) -> Restriction {
        self.compare(Operator::Lt, values)
    }

    pub fn lte(self, values: Vec<Value>) -> Restriction {
        self.compare(Operator::Lte, values)
    }
}

#[cfg(test)]
mod tests {
    use super::{Operator, Query, Restriction, col, lit, tuple};
    use crate::catalog::types::Value;

    #[test]
    fn builder_keeps_written_order() {
        let query = Query::select(&["*"])
            .from("ks", "t")
            .where_(col("v3").eq(lit(1)))
            .and(col("v1").eq(lit(2)))
            .and(tuple(&["c1", "c2"]).lt(vec![lit(2), lit(0)]));
        let columns: Vec<Vec<&str>> = query.restrictions.iter().map(|r| r.columns()).collect();
        assert_eq!(columns, vec![vec!["v3"], vec!["v1"], vec!["c1", "c2"]]);
        assert_eq!(query.restrictions.eq_value("v1"), Some(&Value::Integer(2)));
        assert!(query.selects_all());
    }

    #[test]
    fn only_single_column_equality_has_eq_value() {
        assert!(col("v").gt(lit(1)).eq_value().is_none());
        assert!(col("v").in_(vec![lit(1)]).eq_value().is_none());
        let r = Restriction::Column {
            column: "v".into(),
            op: Operator::Eq,
            value: lit("x"),
        };
        assert_eq!(r.eq_value(), Some(("v", &Value::from("x"))));
    }
}
