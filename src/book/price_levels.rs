//! Aggregated price levels for one side of a book.
//!
//! Both sides share a single implementation by storing bid prices negated:
//! the ordered map then yields the most aggressive price first on either
//! side, and every comparison reduces to "smaller stored key wins". Public
//! operations accept and return actual prices. The extremal negative price is
//! rejected at the adapter boundary so negation cannot overflow.
//!
//! Besides the plain add/remove surface, this type carries the speculative
//! machinery of the crossing protocol: `cross` consumes levels best-first and
//! logs exactly what it took, trade confirmations drain the log from the
//! head, and `uncross` restores the unconfirmed tail.
//!
//! # Invariants
//!
//! - A level is present iff its aggregate quantity is positive; removal that
//!   drives the quantity to zero or below erases the level.
//! - Order counts may transiently disagree during crossing reconciliation
//!   (speculative consumption removes quantity with a zero count delta; the
//!   confirming trades settle the counts).

use std::collections::{BTreeMap, VecDeque};

use crate::emitter::DeltaEmitter;
use crate::types::{AggQty, Count, Price, Side, DEPTH};

/// One consumed slice recorded during speculative crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeculativeFill {
    pub price: Price,
    pub qty: AggQty,
    /// Order count the level carried when this slice was consumed; used to
    /// re-create the level if `uncross` has to bring it back from nothing.
    pub count_at_consumption: Count,
}

#[derive(Debug, Clone, Copy, Default)]
struct LevelEntry {
    qty: AggQty,
    count: Count,
}

/// Best-first aggregated levels for one side.
#[derive(Debug)]
pub struct PriceLevels {
    side: Side,
    levels: BTreeMap<i64, LevelEntry>,
    fills: VecDeque<SpeculativeFill>,
    pending_qty: AggQty,
    pending_count: Count,
}

impl PriceLevels {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            fills: VecDeque::new(),
            pending_qty: 0,
            pending_count: 0,
        }
    }

    /// Map an actual price to its stored key (negated for bids).
    #[inline]
    fn store(&self, price: Price) -> i64 {
        match self.side {
            Side::Ask => price,
            Side::Bid => -price,
        }
    }

    /// Map a stored key back to the actual price.
    #[inline]
    fn actual(&self, key: i64) -> Price {
        match self.side {
            Side::Ask => key,
            Side::Bid => -key,
        }
    }

    /// Most aggressive resting price, or 0 when the side is empty.
    pub fn best_price(&self) -> Price {
        self.levels
            .keys()
            .next()
            .map(|&k| self.actual(k))
            .unwrap_or(0)
    }

    /// 0-based rank of `price` when present inside the visible window, else
    /// `DEPTH`.
    pub fn get_level_index(&self, price: Price) -> usize {
        let key = self.store(price);
        self.levels
            .keys()
            .take(DEPTH)
            .position(|&k| k == key)
            .unwrap_or(DEPTH)
    }

    /// Aggregate state of the level at `price`, if present.
    pub fn level(&self, price: Price) -> Option<(AggQty, Count)> {
        self.levels
            .get(&self.store(price))
            .map(|e| (e.qty, e.count))
    }

    /// Number of resting levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Best-first projection of up to `n` levels.
    pub fn top(&self, n: usize) -> Vec<(Price, AggQty, Count)> {
        self.levels
            .iter()
            .take(n)
            .map(|(&k, e)| (self.actual(k), e.qty, e.count))
            .collect()
    }

    // =========================================================================
    // Plain mutation
    // =========================================================================

    /// Add `qty` (non-negative) and `count_delta` orders at `price`.
    ///
    /// A new level produces an Insert with the shift flag at its rank; a
    /// shift that lands past the current tail overwrites nothing and is
    /// benign. An existing level produces an Update.
    pub fn add_liquidity(
        &mut self,
        price: Price,
        qty: AggQty,
        count_delta: Count,
        emitter: &mut DeltaEmitter,
    ) {
        debug_assert!(qty >= 0);
        let key = self.store(price);
        if let Some(entry) = self.levels.get_mut(&key) {
            entry.qty += qty;
            entry.count += count_delta;
            let idx = self.get_level_index(price);
            emitter.update(self.side, idx, qty, count_delta as i16);
        } else {
            if qty <= 0 {
                return;
            }
            self.levels.insert(
                key,
                LevelEntry {
                    qty,
                    count: count_delta,
                },
            );
            let idx = self.get_level_index(price);
            emitter.insert(self.side, idx, true, price, qty, count_delta);
        }
    }

    /// Remove `qty` and `count_delta` orders from `price`. No-op when the
    /// level is absent. Erases the level when its quantity drops to zero or
    /// below, refilling slot 19 from the 21st-best if the erasure was
    /// visible.
    pub fn remove_liquidity(
        &mut self,
        price: Price,
        qty: AggQty,
        count_delta: Count,
        emitter: &mut DeltaEmitter,
    ) {
        let key = self.store(price);
        let idx = self.get_level_index(price);
        let entry = match self.levels.get_mut(&key) {
            Some(entry) => entry,
            None => return,
        };
        entry.qty -= qty;
        entry.count -= count_delta;
        emitter.update(self.side, idx, -qty, -(count_delta as i16));
        if entry.qty <= 0 {
            self.levels.remove(&key);
            if idx < DEPTH {
                // the previous 21st-best slides into view
                if let Some((&k, e)) = self.levels.iter().nth(DEPTH - 1) {
                    emitter.insert(self.side, DEPTH - 1, false, self.actual(k), e.qty, e.count);
                }
            }
        }
    }

    // =========================================================================
    // Crossing support
    // =========================================================================

    /// Speculatively consume resting liquidity against an aggressor priced at
    /// `limit_price` for up to `qty`. Walks best to worse, stopping at the
    /// first level that no longer crosses. Each touched slice is appended to
    /// the fills log; counts are left for the confirming trades to settle.
    /// Returns the total consumed.
    pub fn cross(&mut self, limit_price: Price, qty: AggQty, emitter: &mut DeltaEmitter) -> AggQty {
        let limit_key = self.store(limit_price);
        let mut remaining = qty;
        let mut consumed = 0;
        while remaining > 0 {
            let (key, level_qty, level_count) = match self.levels.iter().next() {
                Some((&k, e)) => (k, e.qty, e.count),
                None => break,
            };
            if key > limit_key {
                break;
            }
            let take = remaining.min(level_qty);
            let price = self.actual(key);
            self.fills.push_back(SpeculativeFill {
                price,
                qty: take,
                count_at_consumption: level_count,
            });
            self.pending_qty += take;
            if take == level_qty {
                self.pending_count += level_count;
            }
            self.remove_liquidity(price, take, 0, emitter);
            remaining -= take;
            consumed += take;
        }
        consumed
    }

    /// Unconfirmed speculative quantity still awaiting trades.
    #[inline]
    pub fn pending_qty(&self) -> AggQty {
        self.pending_qty
    }

    /// Unconfirmed count of fully consumed passive orders.
    #[inline]
    pub fn pending_count(&self) -> Count {
        self.pending_count
    }

    /// Confirm `fill_qty` of speculative consumption against the head of the
    /// pending counter. Returns the reconciled portion; whatever is left of
    /// `fill_qty` is the caller's to apply as a normal level removal.
    pub fn reconcile_cross_fill(&mut self, fill_qty: AggQty) -> AggQty {
        let reconciled = fill_qty.min(self.pending_qty).max(0);
        self.pending_qty -= reconciled;
        reconciled
    }

    /// A trade fully consumed one passive order of a speculative fill.
    pub fn reconcile_cross_count(&mut self, n: Count) {
        self.pending_count -= n;
    }

    /// A passive self-trade cancel voided `qty` of pending consumption (and
    /// one pending order).
    pub fn unreserve_cross_fill(&mut self, qty: AggQty) {
        self.pending_qty = (self.pending_qty - qty).max(0);
        self.pending_count -= 1;
    }

    /// Quantity recorded in the fills log since the crossing began.
    fn logged_qty(&self) -> AggQty {
        self.fills.iter().map(|f| f.qty).sum()
    }

    /// Restore the unconfirmed tail of the speculative fills. The head of
    /// the log, already covered by confirmed trades (or voided by
    /// unreserves), is skipped; the rest is added back, re-creating erased
    /// levels with their saved counts. Clears all pending state.
    pub fn uncross(&mut self, emitter: &mut DeltaEmitter) {
        let mut skip = self.logged_qty() - self.pending_qty;
        let fills = std::mem::take(&mut self.fills);
        for fill in fills {
            if skip >= fill.qty {
                skip -= fill.qty;
                continue;
            }
            let restore = fill.qty - skip;
            skip = 0;
            let count_delta = if self.levels.contains_key(&self.store(fill.price)) {
                0
            } else {
                fill.count_at_consumption
            };
            self.add_liquidity(fill.price, restore, count_delta, emitter);
        }
        self.pending_qty = 0;
        self.pending_count = 0;
    }

    /// Volume-weighted average price and total quantity of the unconfirmed
    /// tail. This is the aggressor's view of what is still pending, used to
    /// populate self-trade cancellation events.
    pub fn pending_cross_vwap(&self) -> (Price, AggQty) {
        let mut skip = self.logged_qty() - self.pending_qty;
        let mut notional: i128 = 0;
        let mut total: AggQty = 0;
        for fill in &self.fills {
            if skip >= fill.qty {
                skip -= fill.qty;
                continue;
            }
            let qty = fill.qty - skip;
            skip = 0;
            notional += fill.price as i128 * qty as i128;
            total += qty;
        }
        if total == 0 {
            (0, 0)
        } else {
            ((notional / total as i128) as Price, total)
        }
    }

    /// Drop the fills log after a crossing reconciles normally.
    pub fn clear_cross_fills(&mut self) {
        self.fills.clear();
        self.pending_qty = 0;
        self.pending_count = 0;
    }
}
