use crate::storage::base::{StoredRow, TableData};
use crate::storage::encoded_key::EncodedKey;
use crate::storage::token::PartitionPosition;
use crate::storage::view::{ViewBatch, ViewMutation};
use crate::view::ViewTarget;
use im::OrdMap;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Groups view mutations per backing view and cuts them into batches of at
/// most `max_mutations`, preserving order within each view.
#[derive(Debug)]
pub struct ViewBatcher {
    max_mutations: usize,
    pending: BTreeMap<(String, String), ViewBatch>,
}

impl ViewBatcher {
    pub fn new(max_mutations: usize) -> Self {
        Self {
            max_mutations: max_mutations.max(1),
            pending: BTreeMap::new(),
        }
    }

    /// Queues a mutation; returns a batch once its view reaches the limit.
    pub fn push(&mut self, target: &ViewTarget, mutation: ViewMutation) -> Option<ViewBatch> {
        let key = (target.keyspace.clone(), target.view.clone());
        let batch = self.pending.entry(key.clone()).or_insert_with(|| ViewBatch {
            keyspace: target.keyspace.clone(),
            view: target.view.clone(),
            generation: target.generation,
            mutations: Vec::new(),
        });
        batch.mutations.push(mutation);
        if batch.mutations.len() >= self.max_mutations {
            return self.pending.remove(&key);
        }
        None
    }

    pub fn pending_mutations(&self) -> usize {
        self.pending.values().map(|b| b.mutations.len()).sum()
    }

    pub fn drain(&mut self) -> Vec<ViewBatch> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|b| !b.mutations.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WalkPosition {
    Start,
    Within(PartitionPosition, EncodedKey),
    After(PartitionPosition),
    Done,
}

/// Resumable walk over a table snapshot in bounded chunks. Each call copies
/// out at most `max` rows, so the working set never grows with the table.
#[derive(Debug, Clone)]
pub struct TableWalk {
    position: WalkPosition,
}

impl Default for TableWalk {
    fn default() -> Self {
        Self {
            position: WalkPosition::Start,
        }
    }
}

impl TableWalk {
    pub fn is_done(&self) -> bool {
        self.position == WalkPosition::Done
    }

    pub fn next_chunk(
        &mut self,
        table: &TableData,
        max: usize,
    ) -> Vec<(PartitionPosition, StoredRow)> {
        let max = max.max(1);
        let mut out = Vec::new();
        while out.len() < max {
            let (partition_lower, resume_after) = match &self.position {
                WalkPosition::Start => (Bound::Unbounded, None),
                WalkPosition::Within(position, key) => (
                    Bound::Included(position.clone()),
                    Some((position.clone(), key.clone())),
                ),
                WalkPosition::After(position) => (Bound::Excluded(position.clone()), None),
                WalkPosition::Done => break,
            };
            let next = table
                .partitions
                .range((partition_lower, Bound::Unbounded))
                .next()
                .map(|(position, partition)| (position.clone(), partition.rows.clone()));
            let Some((position, rows)) = next else {
                self.position = WalkPosition::Done;
                break;
            };
            let after = match resume_after {
                Some((resume, key)) if resume == position => Some(key),
                _ => None,
            };
            let room = max - out.len();
            let (chunk, last) = next_rows(&rows, after, room);
            let filled = chunk.len() == room;
            out.extend(chunk.into_iter().map(|stored| (position.clone(), stored)));
            self.position = match last {
                Some(key) if filled => WalkPosition::Within(position, key),
                _ => WalkPosition::After(position),
            };
        }
        out
    }
}

/// Up to `max` rows strictly after `after`, plus the last key returned.
pub fn next_rows(
    rows: &OrdMap<EncodedKey, StoredRow>,
    after: Option<EncodedKey>,
    max: usize,
) -> (Vec<StoredRow>, Option<EncodedKey>) {
    let lower = match after {
        Some(key) => Bound::Excluded(key),
        None => Bound::Unbounded,
    };
    let mut out = Vec::with_capacity(max.min(rows.len()));
    let mut last = None;
    for (key, stored) in rows.range((lower, Bound::Unbounded)).take(max) {
        out.push(stored.clone());
        last = Some(key.clone());
    }
    (out, last)
}
