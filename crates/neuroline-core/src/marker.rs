//! Per-preset marker queue
//!
//! Markers are nonzero doubles stamped onto the next pushed sample row of
//! their preset. 0.0 is the wire value for "no marker" and is rejected at
//! insertion. Markers are consumed strictly in insertion order, one per row.

use std::collections::VecDeque;

use crate::error::{BoardError, BoardResult};

/// FIFO of pending markers for one preset.
#[derive(Debug, Default)]
pub struct MarkerQueue {
    pending: VecDeque<f64>,
}

impl MarkerQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a marker for the next pushed row.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` when `value` is 0.0 (the reserved no-marker value)
    /// or not finite.
    pub fn insert(&mut self, value: f64) -> BoardResult<()> {
        if value.abs() < f64::EPSILON {
            return Err(BoardError::InvalidArguments(
                "0 is the reserved no-marker value".to_string(),
            ));
        }
        if !value.is_finite() {
            return Err(BoardError::InvalidArguments(format!(
                "marker must be finite, got {value}"
            )));
        }
        self.pending.push_back(value);
        Ok(())
    }

    /// Value to stamp on the next row: the oldest pending marker, or 0.0.
    pub fn take(&mut self) -> f64 {
        self.pending.pop_front().unwrap_or(0.0)
    }

    /// Number of markers waiting to be stamped.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop all pending markers.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
