use crate::catalog::schema::{ClusteringOrder, TableSchema};
use crate::catalog::types::Value;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ops::Bound;

/// Byte string whose lexicographic order matches the logical order of the
/// values it was built from. Every encoded component is prefix-free, so keys
/// can be concatenated and still compare component by component.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncodedKey {
    bytes: SmallVec<[u8; 64]>,
}

impl EncodedKey {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn from_values(values: &[Value]) -> Self {
        let mut out = SmallVec::<[u8; 64]>::new();
        for value in values {
            encode_value(value, &mut out);
        }
        Self { bytes: out }
    }

    pub fn from_single(value: &Value) -> Self {
        Self::from_values(std::slice::from_ref(value))
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &EncodedKey) -> EncodedKey {
        let mut bytes = self.bytes.clone();
        bytes.extend_from_slice(&other.bytes);
        EncodedKey { bytes }
    }

}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_successor(prefix: &EncodedKey) -> Option<EncodedKey> {
    let mut next = prefix.bytes.clone();
    for i in (0..next.len()).rev() {
        if next[i] != 0xFF {
            next[i] += 1;
            next.truncate(i + 1);
            return Some(EncodedKey { bytes: next });
        }
    }
    None
}

/// Half-open range covering exactly the keys that start with `prefix`.
pub fn prefix_bounds(prefix: &EncodedKey) -> (Bound<EncodedKey>, Bound<EncodedKey>) {
    if prefix.is_empty() {
        return (Bound::Unbounded, Bound::Unbounded);
    }
    let upper = match prefix_successor(prefix) {
        Some(next) => Bound::Excluded(next),
        None => Bound::Unbounded,
    };
    (Bound::Included(prefix.clone()), upper)
}

// Tags follow `Value` kind order, so mixed kinds sort the same way both encoded
// and decoded.
const TAG_NULL: u8 = 0x00;
const TAG_BOOLEAN: u8 = 0x10;
const TAG_INTEGER: u8 = 0x11;
const TAG_TIMESTAMP: u8 = 0x12;
const TAG_FLOAT: u8 = 0x13;
const TAG_TEXT: u8 = 0x14;
const TAG_BLOB: u8 = 0x15;

fn encode_value(v: &Value, out: &mut SmallVec<[u8; 64]>) {
    match v {
        Value::Null => out.push(TAG_NULL),
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(u8::from(*b));
        }
        Value::Integer(i) => {
            out.push(TAG_INTEGER);
            let shifted = (*i as u64) ^ 0x8000_0000_0000_0000;
            out.extend_from_slice(&shifted.to_be_bytes());
        }
        Value::Timestamp(ts) => {
            out.push(TAG_TIMESTAMP);
            let shifted = (*ts as u64) ^ 0x8000_0000_0000_0000;
            out.extend_from_slice(&shifted.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            let bits = f.to_bits();
            let mapped = if (bits >> 63) == 1 {
                !bits
            } else {
                bits ^ 0x8000_0000_0000_0000
            };
            out.extend_from_slice(&mapped.to_be_bytes());
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            append_escaped(s.as_bytes(), out);
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            append_escaped(b, out);
        }
    }
}

fn append_escaped(bytes: &[u8], out: &mut SmallVec<[u8; 64]>) {
    for byte in bytes {
        if *byte == 0 {
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(*byte);
        }
    }
    // Sorts below an escaped interior zero and below any continuation byte.
    out.extend_from_slice(&[0x00, 0x01]);
}

/// Encodes clustering values honoring each column's declared order.
///
/// Base tables, backing views and page cursors must all go through the same
/// codec. A descending column is stored with every byte of its component
/// inverted, which reverses its order while keeping it prefix-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteringCodec {
    orders: Vec<ClusteringOrder>,
}

impl ClusteringCodec {
    pub fn new(orders: Vec<ClusteringOrder>) -> Self {
        Self { orders }
    }

    pub fn for_schema(schema: &TableSchema) -> Self {
        Self::new(schema.clustering_orders())
    }

    /// Encodes a full clustering key or any leading prefix of it.
    pub fn encode(&self, values: &[Value]) -> EncodedKey {
        let mut out = SmallVec::<[u8; 64]>::new();
        for (idx, value) in values.iter().enumerate() {
            let order = self.orders.get(idx).copied().unwrap_or_default();
            encode_component(value, order, &mut out);
        }
        EncodedKey { bytes: out }
    }

    fn component(&self, position: usize, value: &Value) -> EncodedKey {
        let mut out = SmallVec::<[u8; 64]>::new();
        let order = self.orders.get(position).copied().unwrap_or_default();
        encode_component(value, order, &mut out);
        EncodedKey { bytes: out }
    }
}

fn encode_component(value: &Value, order: ClusteringOrder, out: &mut SmallVec<[u8; 64]>) {
    let start = out.len();
    encode_value(value, out);
    if order == ClusteringOrder::Desc {
        for byte in &mut out[start..] {
            *byte = !*byte;
        }
    }
}

/// A contiguous run of rows inside one partition: an equality prefix on the
/// leading clustering columns, optionally bounded on the next column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusteringSlice {
    pub prefix: Vec<Value>,
    /// `(value, inclusive)` in the column's logical order.
    pub lower: Option<(Value, bool)>,
    pub upper: Option<(Value, bool)>,
}

impl ClusteringSlice {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn prefix(values: Vec<Value>) -> Self {
        Self {
            prefix: values,
            ..Self::default()
        }
    }

    pub fn greater_than(mut self, value: impl Into<Value>, inclusive: bool) -> Self {
        self.lower = Some((value.into(), inclusive));
        self
    }

    pub fn less_than(mut self, value: impl Into<Value>, inclusive: bool) -> Self {
        self.upper = Some((value.into(), inclusive));
        self
    }

    /// Logical membership test against a full clustering key.
    pub fn contains(&self, clustering: &[Value]) -> bool {
        if clustering.len() < self.prefix.len()
            || clustering[..self.prefix.len()] != self.prefix[..]
        {
            return false;
        }
        let Some(next) = clustering.get(self.prefix.len()) else {
            return self.lower.is_none() && self.upper.is_none();
        };
        if let Some((bound, inclusive)) = &self.lower
            && (next < bound || (!inclusive && next == bound))
        {
            return false;
        }
        if let Some((bound, inclusive)) = &self.upper
            && (next > bound || (!inclusive && next == bound))
        {
            return false;
        }
        true
    }

    /// Encoded key range for this slice. On a descending column the logical
    /// lower bound becomes the encoded upper bound.
    pub fn encoded_bounds(&self, codec: &ClusteringCodec) -> (Bound<EncodedKey>, Bound<EncodedKey>) {
        let prefix = codec.encode(&self.prefix);
        let (mut lower, mut upper) = prefix_bounds(&prefix);
        if self.lower.is_none() && self.upper.is_none() {
            return (lower, upper);
        }
        let position = self.prefix.len();
        let descending = codec.orders.get(position) == Some(&ClusteringOrder::Desc);

        let start_at = |value: &Value, inclusive: bool| -> Bound<EncodedKey> {
            let key = prefix.concat(&codec.component(position, value));
            if inclusive {
                Bound::Included(key)
            } else {
                match prefix_successor(&key) {
                    Some(next) => Bound::Included(next),
                    None => Bound::Excluded(key),
                }
            }
        };
        let stop_at = |value: &Value, inclusive: bool| -> Bound<EncodedKey> {
            let key = prefix.concat(&codec.component(position, value));
            if inclusive {
                match prefix_successor(&key) {
                    Some(next) => Bound::Excluded(next),
                    None => Bound::Unbounded,
                }
            } else {
                Bound::Excluded(key)
            }
        };

        let (encoded_low, encoded_high) = if descending {
            (&self.upper, &self.lower)
        } else {
            (&self.lower, &self.upper)
        };
        if let Some((value, inclusive)) = encoded_low {
            lower = start_at(value, *inclusive);
        }
        if let Some((value, inclusive)) = encoded_high {
            upper = stop_at(value, *inclusive);
        }
        (lower, upper)
    }
}
