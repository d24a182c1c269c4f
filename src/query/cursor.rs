use crate::catalog::types::Value;
use crate::query::error::QueryError;
use crate::query::plan::Query;
use crate::storage::encoded_key::EncodedKey;
use crate::storage::token::PartitionPosition;
use serde::{Deserialize, Serialize};

/// Position of the last row a page returned. Held by the client as an
/// opaque hex string and only valid for the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    pub fingerprint: u64,
    pub token: i64,
    pub partition_key: Vec<Value>,
    pub clustering: Vec<Value>,
    /// Lookup values of the index the page was read through; empty on scans.
    pub indexed_values: Vec<Value>,
}

impl PageCursor {
    pub fn position(&self) -> PartitionPosition {
        PartitionPosition {
            token: self.token,
            key: EncodedKey::from_values(&self.partition_key),
        }
    }

    pub fn encode(&self) -> Result<String, QueryError> {
        let bytes =
            rmp_serde::to_vec(self).map_err(|e| QueryError::InternalError(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    pub fn decode(encoded: &str) -> Result<Self, QueryError> {
        let bytes = hex::decode(encoded).map_err(|e| QueryError::InvalidCursor {
            reason: e.to_string(),
        })?;
        rmp_serde::from_slice(&bytes).map_err(|e| QueryError::InvalidCursor {
            reason: e.to_string(),
        })
    }

    /// Decodes `encoded` and checks it was issued for `query`.
    pub fn resume(encoded: &str, query: &Query) -> Result<Self, QueryError> {
        let cursor = Self::decode(encoded)?;
        let expected = query_fingerprint(query)?;
        if cursor.fingerprint != expected {
            return Err(QueryError::InvalidCursor {
                reason: "cursor was issued for a different query".into(),
            });
        }
        Ok(cursor)
    }
}

/// Identity of a query for paging purposes. Page size is left out so a
/// client may change it between pages.
pub fn query_fingerprint(query: &Query) -> Result<u64, QueryError> {
    let bytes = rmp_serde::to_vec(&(
        &query.keyspace,
        &query.table,
        &query.restrictions,
        &query.select,
        query.allow_filtering,
    ))
    .map_err(|e| QueryError::InternalError(e.to_string()))?;
    let digest = blake3::hash(&bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    Ok(u64::from_be_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::{PageCursor, query_fingerprint};
    use crate::catalog::types::Value;
    use crate::query::error::QueryError;
    use crate::query::plan::{Query, col, lit};

    fn query() -> Query {
        Query::select(&["*"])
            .from("ks", "t")
            .where_(col("v").eq(lit("a")))
    }

    fn cursor(fingerprint: u64) -> PageCursor {
        PageCursor {
            fingerprint,
            token: -42,
            partition_key: vec![Value::Integer(7)],
            clustering: vec![Value::Integer(3), Value::from("x")],
            indexed_values: vec![Value::from("a")],
        }
    }

    #[test]
    fn cursor_resumes_same_query_with_any_page_size() {
        let fingerprint = query_fingerprint(&query()).expect("fingerprint");
        let encoded = cursor(fingerprint).encode().expect("encode");
        let resumed = PageCursor::resume(&encoded, &query().page_size(3)).expect("resume");
        assert_eq!(resumed, cursor(fingerprint));
    }

    #[test]
    fn cursor_from_other_query_is_rejected() {
        let fingerprint = query_fingerprint(&query()).expect("fingerprint");
        let encoded = cursor(fingerprint).encode().expect("encode");
        let other = Query::select(&["*"])
            .from("ks", "t")
            .where_(col("v").eq(lit("b")));
        assert!(matches!(
            PageCursor::resume(&encoded, &other),
            Err(QueryError::InvalidCursor { .. })
        ));
        assert!(matches!(
            PageCursor::decode("zz"),
            Err(QueryError::InvalidCursor { .. })
        ));
    }
}
