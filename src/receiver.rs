//! Receiver-side reconstruction of the delta stream.
//!
//! The receiver consumes one event's chunk sequence at a time and maintains,
//! per token, a mirrored top-20 book plus one pending-aggressor record. From
//! those it materializes the observable snapshots: the primary event, any
//! derived secondary events carried as extra TickInfos, and the events it
//! must synthesize itself when a crossing completes (residual N/M, cancel
//! from a fully filled modify, the three-way self-trade expansion).
//!
//! The mirror applies deltas mechanically: an Update whose resulting
//! quantity drops to zero deletes its level and closes the gap; an Insert
//! with the shift flag opens a slot first; a refill Insert overwrites slot 19
//! in place and is not counted as "affecting" the side.

use ahash::AHashMap;

use crate::error::Result;
use crate::snapshot::{SnapLevel, Snapshot};
use crate::types::{AggQty, Count, InputRecord, OrderId, Price, Qty, Side, TickType, Token, DEPTH};
use crate::wire::{Chunk, Delta};

/// Origin of the pending aggressor (which preliminary event announced it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggressorOrigin {
    New,
    Modify,
}

/// The aggressor of an in-flight crossing, as seen from the receiver.
#[derive(Debug, Clone, Copy)]
struct PendingAggressor {
    id: OrderId,
    side: Side,
    price: Price,
    original_qty: Qty,
    remaining_qty: Qty,
    origin: AggressorOrigin,
}

/// One mirrored level. Quantity is widened internally; the snapshot codec
/// narrows it back to the wire type.
#[derive(Debug, Clone, Copy, Default)]
struct MirrorLevel {
    price: Price,
    qty: AggQty,
    count: Count,
}

/// Per-token mirror state.
struct TokenMirror {
    bids: [MirrorLevel; DEPTH],
    asks: [MirrorLevel; DEPTH],
    ltp: Price,
    ltq: Qty,
    pending: Option<PendingAggressor>,
}

impl TokenMirror {
    fn new() -> Self {
        Self {
            bids: [MirrorLevel::default(); DEPTH],
            asks: [MirrorLevel::default(); DEPTH],
            ltp: 0,
            ltq: 0,
            pending: None,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut [MirrorLevel; DEPTH] {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn apply_update(&mut self, side: Side, idx: usize, qty_delta: AggQty, count_delta: i16) {
        let levels = self.side_mut(side);
        let level = &mut levels[idx];
        level.qty += qty_delta;
        level.count += count_delta as Count;
        if level.qty <= 0 {
            // implicit deletion: close the gap and zero the tail
            levels.copy_within(idx + 1..DEPTH, idx);
            levels[DEPTH - 1] = MirrorLevel::default();
        }
    }

    fn apply_insert(
        &mut self,
        side: Side,
        idx: usize,
        shift: bool,
        price: Price,
        qty: AggQty,
        count: Count,
    ) {
        let levels = self.side_mut(side);
        if shift {
            levels.copy_within(idx..DEPTH - 1, idx + 1);
        }
        levels[idx] = MirrorLevel { price, qty, count };
    }

    fn snap_side(levels: &[MirrorLevel; DEPTH]) -> [SnapLevel; DEPTH] {
        let mut out = [SnapLevel::default(); DEPTH];
        for (slot, level) in out.iter_mut().zip(levels.iter()) {
            *slot = SnapLevel {
                price: level.price,
                qty: level.qty as Qty,
                num_orders: level.count,
            };
        }
        out
    }
}

/// Per-event affected-level tracking: minimum index touched by a non-refill
/// delta on each side, `DEPTH` when untouched.
#[derive(Debug, Clone, Copy)]
struct AffectedLevels {
    bid: usize,
    ask: usize,
}

impl AffectedLevels {
    fn fresh() -> Self {
        Self {
            bid: DEPTH,
            ask: DEPTH,
        }
    }

    fn touch(&mut self, side: Side, idx: usize) {
        match side {
            Side::Bid => self.bid = self.bid.min(idx),
            Side::Ask => self.ask = self.ask.min(idx),
        }
    }
}

/// Metadata of the TickInfo currently accumulating deltas.
#[derive(Debug, Clone, Copy)]
struct CurrentTick {
    kind: TickType,
    side: Side,
    record_idx: u32,
    price: Price,
    qty: Qty,
    order_id: OrderId,
    order_id2: OrderId,
}

/// Reconstructs per-token snapshots from the chunk stream.
pub struct Receiver {
    mirrors: AHashMap<Token, TokenMirror>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            mirrors: AHashMap::new(),
        }
    }

    /// Apply one event's chunk sequence and return the snapshots it
    /// produced, in delivery order.
    pub fn apply_event(&mut self, chunks: &[Chunk]) -> Result<Vec<Snapshot>> {
        let token = match chunks.first() {
            Some(chunk) => chunk.token,
            None => return Ok(Vec::new()),
        };
        let mirror = self.mirrors.entry(token).or_insert_with(TokenMirror::new);

        let mut deltas = Vec::new();
        for chunk in chunks {
            deltas.extend(chunk.deltas()?);
        }

        let mut out: Vec<Snapshot> = Vec::new();
        let mut current: Option<CurrentTick> = None;
        let mut affected = AffectedLevels::fresh();
        let mut current_consumed = false;
        let mut crossing_completed = false;
        let mut stashed_notice: Option<CurrentTick> = None;

        for delta in deltas {
            match delta {
                Delta::TickInfo {
                    kind,
                    side,
                    record_idx,
                    price,
                    qty,
                    order_id,
                    order_id2,
                    ..
                } => {
                    let tick = CurrentTick {
                        kind,
                        side,
                        record_idx,
                        price,
                        qty,
                        order_id,
                        order_id2,
                    };
                    if kind == TickType::SelfTradeNotice && mirror.pending.is_some() {
                        // no snapshot of its own; feeds the C expansion below
                        stashed_notice = Some(tick);
                        continue;
                    }
                    if let Some(prev) = current.take() {
                        if !current_consumed {
                            out.push(build_snapshot(mirror, token, &prev, &affected));
                        }
                    }
                    current = Some(tick);
                    affected = AffectedLevels::fresh();
                    current_consumed = false;

                    if kind.is_execution() {
                        mirror.ltp = price;
                        mirror.ltq = qty;
                        if let Some(pending) = mirror.pending.as_mut() {
                            pending.remaining_qty = (pending.remaining_qty - qty).max(0);
                        }
                    }
                    match kind {
                        TickType::NewCrossing => {
                            mirror.pending = Some(PendingAggressor {
                                id: order_id,
                                side,
                                price,
                                original_qty: qty,
                                remaining_qty: qty,
                                origin: AggressorOrigin::New,
                            });
                        }
                        TickType::ModifyCrossing => {
                            mirror.pending = Some(PendingAggressor {
                                id: order_id,
                                side,
                                price,
                                original_qty: qty,
                                remaining_qty: qty,
                                origin: AggressorOrigin::Modify,
                            });
                        }
                        TickType::Cancel => {
                            // a synthesized cancel resolves the aggressor
                            if mirror.pending.map(|p| p.id) == Some(order_id) {
                                mirror.pending = None;
                            }
                        }
                        _ => {}
                    }
                }
                Delta::Update {
                    side,
                    index,
                    qty_delta,
                    count_delta,
                } => {
                    affected.touch(side, index as usize);
                    mirror.apply_update(side, index as usize, qty_delta, count_delta);
                }
                Delta::Insert {
                    side,
                    index,
                    shift,
                    price,
                    qty,
                    count,
                } => {
                    if shift {
                        affected.touch(side, index as usize);
                    }
                    mirror.apply_insert(side, index as usize, shift, price, qty, count);
                }
                Delta::CrossingComplete => {
                    crossing_completed = true;
                    let tick = match current {
                        Some(tick) => tick,
                        None => continue,
                    };
                    if tick.kind == TickType::CancelCrossing {
                        // handled by the C expansion at end of event
                        continue;
                    }
                    if !current_consumed {
                        out.push(build_snapshot(mirror, token, &tick, &affected));
                        current_consumed = true;
                    }
                    // the trailing derived snapshot keeps the tracking of the
                    // trade/cancel that completed the crossing
                    if let Some(pending) = mirror.pending.take() {
                        if let Some(synth) =
                            synthesize_residual(mirror, token, &tick, &pending, &affected)
                        {
                            out.push(synth);
                        }
                    }
                }
            }
        }

        // end of event
        if let Some(tick) = current {
            if tick.kind == TickType::CancelCrossing && mirror.pending.is_some() {
                self_trade_expansion(
                    mirror,
                    token,
                    &tick,
                    &affected,
                    stashed_notice.as_ref(),
                    crossing_completed,
                    &mut out,
                );
            } else if !current_consumed {
                out.push(build_snapshot(mirror, token, &tick, &affected));
            }
        }

        Ok(out)
    }

    /// Direct projection of the current mirror for `token`, without an event.
    pub fn mirror_snapshot(&self, token: Token) -> Option<(Vec<SnapLevel>, Vec<SnapLevel>)> {
        self.mirrors.get(&token).map(|m| {
            (
                TokenMirror::snap_side(&m.bids).to_vec(),
                TokenMirror::snap_side(&m.asks).to_vec(),
            )
        })
    }

    /// Whether a pending aggressor is being tracked for `token`.
    pub fn has_pending_aggressor(&self, token: Token) -> bool {
        self.mirrors
            .get(&token)
            .map(|m| m.pending.is_some())
            .unwrap_or(false)
    }
}

fn event_record(token: Token, tick: &CurrentTick) -> InputRecord {
    InputRecord {
        record_idx: tick.record_idx,
        token,
        order_id: tick.order_id,
        order_id2: tick.order_id2,
        price: tick.price,
        qty: tick.qty,
        tick_type: tick.kind,
        is_ask: tick.side.is_ask() as u8,
    }
}

fn build_snapshot(
    mirror: &TokenMirror,
    token: Token,
    tick: &CurrentTick,
    affected: &AffectedLevels,
) -> Snapshot {
    let mut snap = Snapshot {
        record_idx: tick.record_idx,
        token,
        event: event_record(token, tick),
        ltp: mirror.ltp,
        ltq: mirror.ltq,
        bid_affected_lvl: affected.bid as i8,
        ask_affected_lvl: affected.ask as i8,
        bid_filled_lvls: 0,
        ask_filled_lvls: 0,
        is_ask: tick.side.is_ask() as u8,
        bids: TokenMirror::snap_side(&mirror.bids),
        asks: TokenMirror::snap_side(&mirror.asks),
    };
    let (bid_filled, ask_filled) = snap.filled_counts();
    snap.bid_filled_lvls = bid_filled;
    snap.ask_filled_lvls = ask_filled;
    snap
}

/// Trailing snapshot after a crossing completes: the aggressor's residual
/// becomes an N (new-origin) or M (modify-origin) event; a drained
/// modify-origin aggressor becomes an X against its announced state. A fully
/// consumed new-origin aggressor needs nothing.
fn synthesize_residual(
    mirror: &TokenMirror,
    token: Token,
    tick: &CurrentTick,
    pending: &PendingAggressor,
    affected: &AffectedLevels,
) -> Option<Snapshot> {
    let (kind, price, qty) = if pending.remaining_qty > 0 {
        let kind = match pending.origin {
            AggressorOrigin::New => TickType::New,
            AggressorOrigin::Modify => TickType::Modify,
        };
        (kind, pending.price, pending.remaining_qty)
    } else if pending.origin == AggressorOrigin::Modify {
        (TickType::Cancel, pending.price, pending.original_qty)
    } else {
        return None;
    };
    let synth = CurrentTick {
        kind,
        side: pending.side,
        record_idx: tick.record_idx,
        price,
        qty,
        order_id: pending.id,
        order_id2: 0,
    };
    Some(build_snapshot(mirror, token, &synth, affected))
}

/// Expand a self-trade cancellation into its observable snapshots: the C
/// event itself (both tops disturbed by definition), the S notice with the
/// cancelled order's own view, and, for a passive cancel, the aggressor's
/// remaining state as a residual N/M.
fn self_trade_expansion(
    mirror: &mut TokenMirror,
    token: Token,
    tick: &CurrentTick,
    affected: &AffectedLevels,
    stashed_notice: Option<&CurrentTick>,
    crossing_completed: bool,
    out: &mut Vec<Snapshot>,
) {
    let pending = match mirror.pending {
        Some(pending) => pending,
        None => return,
    };

    let mut c_snap = build_snapshot(mirror, token, tick, affected);
    c_snap.bid_affected_lvl = 0;
    c_snap.ask_affected_lvl = 0;
    out.push(c_snap);

    if let Some(notice) = stashed_notice {
        let mut s_snap = build_snapshot(mirror, token, notice, affected);
        s_snap.bid_affected_lvl = DEPTH as i8;
        s_snap.ask_affected_lvl = DEPTH as i8;
        out.push(s_snap);
    }

    let aggressor_cancelled = tick.order_id == pending.id;
    if !aggressor_cancelled {
        if let Some(synth) = synthesize_residual(mirror, token, tick, &pending, affected) {
            out.push(synth);
        }
    }
    if aggressor_cancelled || crossing_completed {
        mirror.pending = None;
    }
}
