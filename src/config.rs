use crate::error::SidxError;

/// Largest indexed value that fits in a backing-view key.
pub const MAX_INDEXED_VALUE_BYTES: usize = 65_535;

/// Runtime configuration for a [`crate::SidxInstance`].
#[derive(Debug, Clone)]
pub struct SidxConfig {
    pub max_indexed_value_bytes: usize,
    /// Upper bound on view mutations applied as one unit.
    pub view_batch_max_mutations: usize,
    pub view_batch_max_retries: u32,
    pub view_batch_retry_backoff_ms: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub index_ready_poll_interval_ms: u64,
    /// Work items the view maintainer may lag behind writers before commits
    /// on indexed tables are refused.
    pub max_pending_view_work: usize,
}

impl Default for SidxConfig {
    fn default() -> Self {
        Self {
            max_indexed_value_bytes: MAX_INDEXED_VALUE_BYTES,
            view_batch_max_mutations: 128,
            view_batch_max_retries: 8,
            view_batch_retry_backoff_ms: 20,
            default_page_size: 100,
            max_page_size: 10_000,
            index_ready_poll_interval_ms: 10,
            max_pending_view_work: 65_536,
        }
    }
}

impl SidxConfig {
    /// Small batches and fast retries, so batching boundaries show up in
    /// tests with modest row counts.
    pub fn development() -> Self {
        Self {
            view_batch_max_mutations: 16,
            view_batch_max_retries: 4,
            view_batch_retry_backoff_ms: 1,
            index_ready_poll_interval_ms: 2,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, max_mutations: usize) -> Self {
        self.view_batch_max_mutations = max_mutations;
        self
    }

    pub fn with_max_pending_view_work(mut self, items: usize) -> Self {
        self.max_pending_view_work = items;
        self
    }

    pub fn validate(&self) -> Result<(), SidxError> {
        if self.view_batch_max_mutations == 0 {
            return Err(SidxError::InvalidConfig {
                message: "view_batch_max_mutations must be at least 1".into(),
            });
        }
        if self.max_indexed_value_bytes == 0
            || self.max_indexed_value_bytes > MAX_INDEXED_VALUE_BYTES
        {
            return Err(SidxError::InvalidConfig {
                message: format!(
                    "max_indexed_value_bytes must be within 1..={MAX_INDEXED_VALUE_BYTES}"
                ),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(SidxError::InvalidConfig {
                message: "default_page_size must be within 1..=max_page_size".into(),
            });
        }
        if self.max_pending_view_work == 0 {
            return Err(SidxError::InvalidConfig {
                message: "max_pending_view_work must be at least 1".into(),
            });
        }
        if self.index_ready_poll_interval_ms == 0 {
            return Err(SidxError::InvalidConfig {
                message: "index_ready_poll_interval_ms must be positive".into(),
            });
        }
        Ok(())
    }
}
