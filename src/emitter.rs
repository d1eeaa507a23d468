//! Per-event delta buffering.
//!
//! The emitter collects the delta records produced while one input event is
//! being applied, packing them into chunk frames as it goes. It is also the
//! visibility filter: updates and inserts addressed at or beyond the top-20
//! window are dropped here, so the level store never needs to care whether a
//! mutation is visible downstream.
//!
//! Chunk overflow is impossible by construction: the maximum per-event delta
//! volume (worst case, a crossing that drains and refills the whole visible
//! window twice) is bounded, and the frame buffer is statically sized from
//! that bound. Exceeding it cannot happen through the book's mutation paths;
//! if it ever did it would be a bug-class invariant violation and aborts.

use crate::types::{AggQty, Count, OrderId, Price, Qty, Side, TickType, Token, DEPTH};
use crate::wire::{
    Chunk, Delta, CHUNK_PAYLOAD, CROSSING_COMPLETE_SIZE, INSERT_SIZE, TICK_INFO_SIZE, UPDATE_SIZE,
};

/// Worst-case payload volume of one event: a crossing that drains and
/// refills the visible window twice (an update plus a refill insert per
/// level), the event descriptors a reconciliation can stack up, the paired
/// top-of-book markers, and the completion marker.
const WORST_EVENT_BYTES: usize = 4 * TICK_INFO_SIZE
    + 2 * DEPTH * (UPDATE_SIZE + INSERT_SIZE)
    + 4 * UPDATE_SIZE
    + CROSSING_COMPLETE_SIZE;

/// A chunk is closed only when the next delta does not fit, so every closed
/// chunk carries strictly more payload than the largest record's remainder.
const MIN_CLOSED_CHUNK_FILL: usize = CHUNK_PAYLOAD - TICK_INFO_SIZE + 1;

/// Static per-event frame capacity, derived from the worst case above.
const MAX_EVENT_CHUNKS: usize = WORST_EVENT_BYTES / MIN_CLOSED_CHUNK_FILL + 1;

/// Buffers the chunk frames of a single event in a fixed-size array.
#[derive(Debug)]
pub struct DeltaEmitter {
    token: Token,
    record_idx: u32,
    chunks: [Chunk; MAX_EVENT_CHUNKS],
    len: usize,
}

impl Default for DeltaEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaEmitter {
    pub fn new() -> Self {
        Self {
            token: 0,
            record_idx: 0,
            chunks: [Chunk::new(0); MAX_EVENT_CHUNKS],
            len: 0,
        }
    }

    /// Start a new event scope. Discards any previous event's frames.
    pub fn reset(&mut self, token: Token, record_idx: u32) {
        self.token = token;
        self.record_idx = record_idx;
        self.len = 0;
    }

    /// Record index of the event currently being emitted.
    #[inline]
    pub fn record_idx(&self) -> u32 {
        self.record_idx
    }

    fn push(&mut self, delta: &Delta) {
        if self.len > 0 && self.chunks[self.len - 1].try_push(delta) {
            return;
        }
        assert!(
            self.len < MAX_EVENT_CHUNKS,
            "event delta volume exceeded its static frame bound"
        );
        let mut chunk = Chunk::new(self.token);
        let pushed = chunk.try_push(delta);
        debug_assert!(pushed, "delta larger than an empty chunk payload");
        self.chunks[self.len] = chunk;
        self.len += 1;
    }

    /// Emit the event-describing TickInfo. Must precede any level deltas in
    /// the event scope; a second TickInfo in the same scope denotes a derived
    /// secondary event.
    #[allow(clippy::too_many_arguments)]
    pub fn tick_info(
        &mut self,
        kind: TickType,
        is_exch_tick: bool,
        side: Side,
        price: Price,
        qty: Qty,
        order_id: OrderId,
        order_id2: OrderId,
    ) {
        let record_idx = self.record_idx;
        self.push(&Delta::TickInfo {
            kind,
            is_exch_tick,
            side,
            record_idx,
            price,
            qty,
            order_id,
            order_id2,
        });
    }

    /// Emit a signed level edit. Silently dropped when `index` falls outside
    /// the visible window.
    pub fn update(&mut self, side: Side, index: usize, qty_delta: AggQty, count_delta: i16) {
        if index >= DEPTH {
            return;
        }
        self.push(&Delta::Update {
            side,
            index: index as u8,
            qty_delta,
            count_delta,
        });
    }

    /// Emit an absolute level write. Silently dropped outside the window.
    pub fn insert(
        &mut self,
        side: Side,
        index: usize,
        shift: bool,
        price: Price,
        qty: AggQty,
        count: Count,
    ) {
        if index >= DEPTH {
            return;
        }
        self.push(&Delta::Insert {
            side,
            index: index as u8,
            shift,
            price,
            qty,
            count,
        });
    }

    /// Emit the crossing-complete marker.
    pub fn crossing_complete(&mut self) {
        self.push(&Delta::CrossingComplete);
    }

    /// Close the event scope: stamps the final bit on the last frame and
    /// returns the event's chunks.
    pub fn finalize(&mut self) -> &[Chunk] {
        if self.len > 0 {
            self.chunks[self.len - 1].set_final();
        }
        &self.chunks[..self.len]
    }

    /// Number of frames produced so far for the current event.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.len
    }
}
