//! Bounded batch of token entries for one engine decode step.
//!
//! Mirrors the engine's native batch layout: parallel columns for token id,
//! position, sequence membership, and the per-slot "compute logits" flag.
//! Capacity is fixed at construction and bounds both memory and the widest
//! single decode the engine will see.

use crate::error::SessionError;
use crate::token::TokenId;

/// Default capacity, matching the engine's usual maximum single-step width.
pub const DEFAULT_BATCH_CAPACITY: usize = 512;

/// One slot of a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub token: TokenId,
    pub pos: i32,
    pub seq_ids: Vec<i32>,
    pub wants_logits: bool,
}

/// A reusable, fixed-capacity sequence of batch entries.
///
/// `clear()` only resets the entry count; slot storage is kept so the batch
/// can be refilled every step without reallocating. Slots past [`Batch::len`]
/// are garbage and must never be read — engines consume [`Batch::entries`],
/// which exposes only the live prefix.
#[derive(Debug)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    len: usize,
    capacity: usize,
}

impl Batch {
    /// Create a batch holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            len: 0,
            capacity,
        }
    }

    /// Reset the entry count to zero without touching allocations. O(1).
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append one entry.
    ///
    /// Fails with [`SessionError::BatchOverflow`] when the batch is already
    /// at capacity; the entry count is left unchanged in that case.
    pub fn add(
        &mut self,
        token: TokenId,
        pos: i32,
        seq_ids: &[i32],
        wants_logits: bool,
    ) -> Result<(), SessionError> {
        if self.len == self.capacity {
            return Err(SessionError::BatchOverflow {
                capacity: self.capacity,
            });
        }

        if self.len < self.entries.len() {
            // Reuse the slot left over from an earlier fill.
            let slot = &mut self.entries[self.len];
            slot.token = token;
            slot.pos = pos;
            slot.seq_ids.clear();
            slot.seq_ids.extend_from_slice(seq_ids);
            slot.wants_logits = wants_logits;
        } else {
            self.entries.push(BatchEntry {
                token,
                pos,
                seq_ids: seq_ids.to_vec(),
                wants_logits,
            });
        }

        self.len += 1;
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entries have been added since the last clear.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The live entries, in submission order.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries[..self.len]
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CAPACITY)
    }
}
