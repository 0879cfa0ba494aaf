//! Streaming executor configuration
//!
//! Limits that govern how query results are batched into response
//! envelopes.

use serde::{Deserialize, Serialize};

/// Hard ceiling on the batch-row count a request may ask for.
pub const MAX_BATCH_ROWS: u32 = 10_000;

/// Batch-row count used when the request does not ask for one.
pub const DEFAULT_BATCH_ROWS: u32 = 1;

/// Envelope payload ceiling. An envelope is flushed once its encoded
/// rows reach this many bytes, regardless of the row count.
pub const MAX_ENVELOPE_BYTES: usize = 1 << 20;

/// Streaming executor limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Flush an envelope once its encoded rows reach this many bytes.
    pub max_envelope_bytes: usize,

    /// Upper clamp for the request's `prefer_batch_size`.
    pub max_batch_rows: u32,

    /// Batch-row count when the request leaves `prefer_batch_size` unset.
    pub default_batch_rows: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_envelope_bytes: MAX_ENVELOPE_BYTES,
            max_batch_rows: MAX_BATCH_ROWS,
            default_batch_rows: DEFAULT_BATCH_ROWS,
        }
    }
}

impl StreamConfig {
    /// Clamp a requested batch size into `[1, max_batch_rows]`,
    /// substituting the default when the request left it at zero.
    pub fn clamp_batch_rows(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.default_batch_rows
        } else {
            requested.min(self.max_batch_rows)
        }
    }
}
