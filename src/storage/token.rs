use crate::catalog::types::Value;
use crate::storage::encoded_key::EncodedKey;
use serde::{Deserialize, Serialize};

/// Ring position of a partition key.
pub fn partition_token(partition_key: &[Value]) -> i64 {
    token_of_encoded(&EncodedKey::from_values(partition_key))
}

pub fn token_of_encoded(partition_key: &EncodedKey) -> i64 {
    let digest = blake3::hash(partition_key.as_slice());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_be_bytes(head)
}

/// Sort position of a partition: token first, then the encoded key to break
/// token collisions deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionPosition {
    pub token: i64,
    pub key: EncodedKey,
}

impl PartitionPosition {
    pub fn for_values(partition_key: &[Value]) -> Self {
        let key = EncodedKey::from_values(partition_key);
        Self {
            token: token_of_encoded(&key),
            key,
        }
    }
}
