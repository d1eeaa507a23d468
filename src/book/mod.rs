//! Per-instrument order book.
//!
//! A `Book` owns the two aggregated sides, the order-id map, the per-event
//! delta emitter and the crossing state, and serializes all event processing
//! for its token. The four handlers mirror the exchange's order-level stream;
//! they never match orders or invent trades.
//!
//! # Crossing protocol
//!
//! With crossing enabled, an aggressive new/modify consumes opposite-side
//! liquidity speculatively and the book enters an active crossing. The
//! confirming trades drain the speculative log from the head; a cancel of the
//! aggressor restores the unconfirmed tail; a passive self-trade cancel voids
//! part of the log and re-crosses the freed quantity. At most one crossing is
//! active per book, and a new/modify arriving mid-crossing is a bug-class
//! condition.

mod price_levels;

pub use price_levels::{PriceLevels, SpeculativeFill};

use ahash::AHashMap;
use log::debug;

use crate::emitter::DeltaEmitter;
use crate::error::{EngineError, Result};
use crate::types::{AggQty, OrderId, OrderInfo, Price, Qty, Side, TickType, Token, DEPTH};
use crate::wire::Chunk;

/// Where the aggressor of the active crossing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualOrigin {
    New,
    Modify,
}

/// State of the one active crossing, populated when an aggressive order
/// consumes opposite-side liquidity ahead of its confirming trades.
#[derive(Debug, Clone, Copy)]
pub struct CrossingState {
    pub aggressor_id: OrderId,
    pub aggressor_side: Side,
    pub aggressor_price: Price,
    /// Resting price before the modify, for the modify-origin case.
    pub original_resting_price: Price,
    /// Resting quantity before the event that started the crossing.
    pub aggressor_original_qty: Qty,
    pub residual_origin: ResidualOrigin,
    /// Level index the aggressor occupied before the modify, so a synthesized
    /// cancel can be attributed to the right level downstream.
    pub original_affected_level: usize,
    /// Whether the residual actually landed on the aggressor's own level.
    pub aggressor_on_level: bool,
}

/// Order book for a single instrument token.
pub struct Book {
    token: Token,
    bids: PriceLevels,
    asks: PriceLevels,
    orders: AHashMap<OrderId, OrderInfo>,
    crossing: Option<CrossingState>,
    crossing_enabled: bool,
    /// Most recent id seen on a new/modify; tiebreaker for aggressor
    /// detection when both trade legs are resting.
    last_order_id: OrderId,
    emitter: DeltaEmitter,
}

/// Does an aggressor on `side` at `price` cross a resting opposite price?
#[inline]
fn price_crosses(side: Side, price: Price, opposite: Price) -> bool {
    match side {
        Side::Bid => price >= opposite,
        Side::Ask => price <= opposite,
    }
}

impl Book {
    pub fn new(token: Token, crossing_enabled: bool) -> Self {
        Self {
            token,
            bids: PriceLevels::new(Side::Bid),
            asks: PriceLevels::new(Side::Ask),
            orders: AHashMap::with_capacity(1024),
            crossing: None,
            crossing_enabled,
            last_order_id: 0,
            emitter: DeltaEmitter::new(),
        }
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn has_active_crossing(&self) -> bool {
        self.crossing.is_some()
    }

    /// Crossing state, if one is active.
    pub fn crossing(&self) -> Option<&CrossingState> {
        self.crossing.as_ref()
    }

    /// Number of resting orders tracked.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Resting order state, if tracked.
    pub fn order(&self, id: OrderId) -> Option<&OrderInfo> {
        self.orders.get(&id)
    }

    /// Best-first projection of one side, for direct-vs-reconstructed
    /// comparison.
    pub fn top_levels(&self, side: Side) -> Vec<(Price, AggQty, i32)> {
        self.levels(side).top(DEPTH)
    }

    fn levels(&self, side: Side) -> &PriceLevels {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Split borrows: (levels of `side`, levels of the opposite side, emitter).
    fn split(&mut self, side: Side) -> (&mut PriceLevels, &mut PriceLevels, &mut DeltaEmitter) {
        match side {
            Side::Bid => (&mut self.bids, &mut self.asks, &mut self.emitter),
            Side::Ask => (&mut self.asks, &mut self.bids, &mut self.emitter),
        }
    }

    /// Open the delta scope for one input event.
    pub fn begin_event(&mut self, record_idx: u32) {
        self.emitter.reset(self.token, record_idx);
    }

    /// Close the delta scope, stamping the final frame.
    pub fn finish_event(&mut self) -> &[Chunk] {
        self.emitter.finalize()
    }

    // =========================================================================
    // New
    // =========================================================================

    /// Handle a new order. An id of zero is a no-op.
    pub fn new_order(&mut self, id: OrderId, side: Side, price: Price, qty: Qty) -> Result<()> {
        if id == 0 {
            return Ok(());
        }
        if self.crossing.is_some() {
            return Err(EngineError::CrossingActive {
                op: 'N',
                order_id: id,
            });
        }

        let crossing_enabled = self.crossing_enabled;
        let (_, opp, em) = self.split(side);
        let opp_best = opp.best_price();
        let crosses =
            crossing_enabled && qty > 0 && opp_best != 0 && price_crosses(side, price, opp_best);

        if crosses {
            em.tick_info(TickType::NewCrossing, false, side, price, qty, id, 0);
        } else {
            em.tick_info(TickType::New, true, side, price, qty, id, 0);
        }

        let consumed = if crossing_enabled {
            opp.cross(price, qty as AggQty, em)
        } else {
            0
        };
        if (consumed > 0) != crosses {
            return Err(EngineError::CrossingPrediction {
                order_id: id,
                predicted: crosses,
                consumed,
            });
        }

        self.orders.insert(id, OrderInfo { side, price, qty });

        let residual = qty as AggQty - consumed;
        let mut on_level = false;
        if residual > 0 {
            let (own, _, em) = self.split(side);
            own.add_liquidity(price, residual, 1, em);
            on_level = true;
        }

        if consumed > 0 {
            debug!(
                "token {}: crossing opened by new order {} ({} consumed)",
                self.token, id, consumed
            );
            let original_affected_level = self.levels(side).get_level_index(price);
            self.crossing = Some(CrossingState {
                aggressor_id: id,
                aggressor_side: side,
                aggressor_price: price,
                original_resting_price: price,
                aggressor_original_qty: qty,
                residual_origin: ResidualOrigin::New,
                original_affected_level,
                aggressor_on_level: on_level,
            });
        }
        self.last_order_id = id;
        Ok(())
    }

    // =========================================================================
    // Modify
    // =========================================================================

    /// Handle a modify. Unknown ids are ignored (the stream may start
    /// mid-session); the caller can observe this through the return value.
    /// Returns whether the order was known.
    pub fn modify_order(&mut self, id: OrderId, new_price: Price, new_qty: Qty) -> Result<bool> {
        let info = match self.orders.get(&id) {
            Some(info) => *info,
            None => return Ok(false),
        };
        if self.crossing.is_some() {
            return Err(EngineError::CrossingActive {
                op: 'M',
                order_id: id,
            });
        }

        let side = info.side;
        let crossing_enabled = self.crossing_enabled;
        let original_affected_level = self.levels(side).get_level_index(info.price);

        let (own, opp, em) = self.split(side);
        let opp_best = opp.best_price();
        let crosses = crossing_enabled
            && new_qty > 0
            && opp_best != 0
            && price_crosses(side, new_price, opp_best);

        if crosses {
            em.tick_info(
                TickType::ModifyCrossing,
                false,
                side,
                new_price,
                new_qty,
                id,
                0,
            );
        } else {
            em.tick_info(TickType::Modify, true, side, new_price, new_qty, id, 0);
        }

        if new_price == info.price && !crosses {
            // price unchanged: a single signed edit settles the level
            let delta = new_qty as AggQty - info.qty as AggQty;
            if delta >= 0 {
                own.add_liquidity(info.price, delta, 0, em);
            } else {
                own.remove_liquidity(info.price, -delta, 0, em);
            }
            self.orders.insert(
                id,
                OrderInfo {
                    side,
                    price: new_price,
                    qty: new_qty,
                },
            );
            self.last_order_id = id;
            return Ok(true);
        }

        own.remove_liquidity(info.price, info.qty as AggQty, 1, em);
        let consumed = if crossing_enabled {
            opp.cross(new_price, new_qty as AggQty, em)
        } else {
            0
        };
        if (consumed > 0) != crosses {
            return Err(EngineError::CrossingPrediction {
                order_id: id,
                predicted: crosses,
                consumed,
            });
        }

        self.orders.insert(
            id,
            OrderInfo {
                side,
                price: new_price,
                qty: new_qty,
            },
        );

        let residual = new_qty as AggQty - consumed;
        let mut on_level = false;
        if residual > 0 {
            let (own, _, em) = self.split(side);
            own.add_liquidity(new_price, residual, 1, em);
            on_level = true;
        }

        if consumed > 0 {
            debug!(
                "token {}: crossing opened by modify of order {} ({} consumed)",
                self.token, id, consumed
            );
            self.crossing = Some(CrossingState {
                aggressor_id: id,
                aggressor_side: side,
                aggressor_price: new_price,
                original_resting_price: info.price,
                aggressor_original_qty: info.qty,
                residual_origin: ResidualOrigin::Modify,
                original_affected_level,
                aggressor_on_level: on_level,
            });
        }
        self.last_order_id = id;
        Ok(true)
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Handle a cancel. `side_hint` labels the event when the id is unknown
    /// (benign mid-session artifact: an X with zeroed price/qty is emitted and
    /// nothing mutates). Returns whether the order was known.
    pub fn cancel_order(&mut self, id: OrderId, side_hint: Side) -> Result<bool> {
        let info = match self.orders.get(&id) {
            Some(info) => *info,
            None => {
                self.emitter
                    .tick_info(TickType::Cancel, true, side_hint, 0, 0, id, 0);
                return Ok(false);
            }
        };

        if let Some(cross) = self.crossing {
            if cross.aggressor_id == id {
                self.cancel_aggressor(id, &info, &cross);
                return Ok(true);
            }
            let crossed_side = cross.aggressor_side.opposite();
            if info.side == crossed_side
                && price_crosses(cross.aggressor_side, cross.aggressor_price, info.price)
            {
                let pending = self.levels(crossed_side).pending_qty();
                let consumed_from_order = (info.qty as AggQty).min(pending);
                if consumed_from_order > 0 {
                    self.cancel_passive_in_cross(id, &info, &cross, consumed_from_order);
                    return Ok(true);
                }
            }
        }

        // regular cancel
        let (own, _, em) = self.split(info.side);
        em.tick_info(TickType::Cancel, true, info.side, info.price, info.qty, id, 0);
        own.remove_liquidity(info.price, info.qty as AggQty, 1, em);
        self.orders.remove(&id);
        Ok(true)
    }

    /// The aggressor of the active crossing was cancelled: report the pending
    /// consumption from its point of view, restore the unconfirmed tail on
    /// the crossed side, and take any placed residual back off its own level.
    fn cancel_aggressor(&mut self, id: OrderId, info: &OrderInfo, cross: &CrossingState) {
        debug!("token {}: aggressor {} cancelled mid-crossing", self.token, id);
        let (own, opp, em) = self.split(cross.aggressor_side);

        let (vwap, pending) = opp.pending_cross_vwap();
        em.tick_info(
            TickType::CancelCrossing,
            true,
            cross.aggressor_side,
            vwap,
            pending as Qty,
            id,
            0,
        );

        let residual_on_level = info.qty as AggQty - opp.pending_qty();
        opp.uncross(em);
        if cross.aggressor_on_level && residual_on_level > 0 {
            own.remove_liquidity(cross.aggressor_price, residual_on_level, 1, em);
        }

        em.tick_info(
            TickType::SelfTradeNotice,
            false,
            cross.aggressor_side,
            info.price,
            info.qty,
            id,
            0,
        );
        em.crossing_complete();

        self.crossing = None;
        self.orders.remove(&id);
    }

    /// A passive order inside the speculative log was cancelled (self-trade):
    /// void its pending portion, re-cross the freed quantity against what
    /// remains, and place any leftover back on the aggressor's level.
    fn cancel_passive_in_cross(
        &mut self,
        id: OrderId,
        info: &OrderInfo,
        cross: &CrossingState,
        consumed_from_order: AggQty,
    ) {
        debug!(
            "token {}: passive order {} cancelled mid-crossing ({} pending)",
            self.token, id, consumed_from_order
        );
        // `own` is the aggressor's side, `opp` the side being crossed
        let (own, opp, em) = self.split(cross.aggressor_side);

        let (vwap, pending) = opp.pending_cross_vwap();
        em.tick_info(
            TickType::CancelCrossing,
            true,
            cross.aggressor_side,
            vwap,
            pending as Qty,
            id,
            cross.aggressor_id,
        );

        let visible = info.qty as AggQty - consumed_from_order;
        opp.remove_liquidity(info.price, visible, 1, em);
        opp.unreserve_cross_fill(consumed_from_order);

        // the aggressor's freed quantity hunts for alternative liquidity
        let re_consumed = opp.cross(cross.aggressor_price, consumed_from_order, em);
        let residual = consumed_from_order - re_consumed;
        let mut on_level = cross.aggressor_on_level;
        if residual > 0 {
            let count_delta = if on_level { 0 } else { 1 };
            own.add_liquidity(cross.aggressor_price, residual, count_delta, em);
            on_level = true;
        }

        em.tick_info(
            TickType::SelfTradeNotice,
            false,
            info.side,
            info.price,
            info.qty,
            id,
            0,
        );

        if self.levels(cross.aggressor_side.opposite()).pending_qty() == 0 {
            let (_, opp, em) = self.split(cross.aggressor_side);
            opp.clear_cross_fills();
            em.crossing_complete();
            self.crossing = None;
        } else if let Some(state) = self.crossing.as_mut() {
            state.aggressor_on_level = on_level;
        }
        self.orders.remove(&id);
    }

    // =========================================================================
    // Trade
    // =========================================================================

    /// Handle a trade between `bid_id` and `ask_id` (zero means the leg never
    /// rested, as for IOC/market aggressors).
    pub fn trade(&mut self, bid_id: OrderId, ask_id: OrderId, price: Price, fill_qty: Qty) -> Result<()> {
        let bid_info = if bid_id != 0 {
            self.orders.get(&bid_id).copied()
        } else {
            None
        };
        let ask_info = if ask_id != 0 {
            self.orders.get(&ask_id).copied()
        } else {
            None
        };

        let aggressor_side = self.pick_aggressor(bid_id, ask_id, &bid_info, &ask_info);
        let (aggressor_id, aggressor_resting) = match aggressor_side {
            Side::Bid => (bid_id, bid_info.is_some()),
            Side::Ask => (ask_id, ask_info.is_some()),
        };
        let code = if aggressor_id == 0 {
            TickType::IocCrossing
        } else if !aggressor_resting {
            TickType::MarketCrossing
        } else {
            TickType::Trade
        };

        self.emitter
            .tick_info(code, true, aggressor_side, price, fill_qty, bid_id, ask_id);

        let passive_side = aggressor_side.opposite();
        let reconciled = {
            let (passive, _, _) = self.split(passive_side);
            passive.reconcile_cross_fill(fill_qty as AggQty)
        };
        let remaining = fill_qty as AggQty - reconciled;
        if reconciled > 0 {
            // mark both tops as touched by this trade
            self.emitter.update(Side::Bid, 0, 0, 0);
            self.emitter.update(Side::Ask, 0, 0, 0);
        }

        for (oid, maybe_info) in [(bid_id, bid_info), (ask_id, ask_info)] {
            let info = match maybe_info {
                Some(info) => info,
                None => continue,
            };
            if fill_qty > info.qty {
                return Err(EngineError::Overfill {
                    order_id: oid,
                    fill: fill_qty,
                    remaining: info.qty,
                });
            }
            let left = info.qty - fill_qty;
            let full = left == 0;

            {
                let (own, _, em) = self.split(info.side);
                own.remove_liquidity(info.price, remaining, if full { 1 } else { 0 }, em);
            }

            if full {
                self.orders.remove(&oid);
                if self.crossing.is_some() && info.side == passive_side {
                    let (passive, _, _) = self.split(passive_side);
                    passive.reconcile_cross_count(1);
                }
            } else {
                self.orders.insert(
                    oid,
                    OrderInfo {
                        qty: left,
                        ..info
                    },
                );
            }
        }

        if let Some(cross) = self.crossing {
            let crossed_side = cross.aggressor_side.opposite();
            if self.levels(crossed_side).pending_qty() == 0 {
                {
                    let (crossed, _, _) = self.split(crossed_side);
                    crossed.clear_cross_fills();
                }
                let aggressor_has_residual = self.orders.contains_key(&cross.aggressor_id);
                if !aggressor_has_residual && cross.residual_origin == ResidualOrigin::Modify {
                    // the modified order is gone: report a cancel against its
                    // original resting state so consumers see the right level
                    self.emitter.tick_info(
                        TickType::Cancel,
                        false,
                        cross.aggressor_side,
                        cross.original_resting_price,
                        cross.aggressor_original_qty,
                        cross.aggressor_id,
                        0,
                    );
                    self.emitter
                        .update(cross.aggressor_side, cross.original_affected_level, 0, 0);
                } else {
                    self.emitter.crossing_complete();
                }
                debug!("token {}: crossing reconciled", self.token);
                self.crossing = None;
            }
        }
        Ok(())
    }

    /// Aggressor detection: the leg that is not resting in the book removes
    /// liquidity. When both (or neither) rest, the most recent new/modify
    /// wins; a zero id marks a leg that never rested at all.
    fn pick_aggressor(
        &self,
        bid_id: OrderId,
        ask_id: OrderId,
        bid_info: &Option<OrderInfo>,
        ask_info: &Option<OrderInfo>,
    ) -> Side {
        if let Some(cross) = &self.crossing {
            if cross.aggressor_id != 0 {
                if cross.aggressor_id == bid_id {
                    return Side::Bid;
                }
                if cross.aggressor_id == ask_id {
                    return Side::Ask;
                }
            }
        }
        if bid_info.is_some() && ask_info.is_none() {
            Side::Ask
        } else if ask_info.is_some() && bid_info.is_none() {
            Side::Bid
        } else if bid_id != 0 && bid_id == self.last_order_id {
            Side::Bid
        } else if ask_id != 0 && ask_id == self.last_order_id {
            Side::Ask
        } else if bid_id == 0 && ask_id != 0 {
            Side::Bid
        } else {
            Side::Ask
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Delta;

    fn book(crossing: bool) -> Book {
        Book::new(1, crossing)
    }

    fn drain(book: &mut Book) -> Vec<Delta> {
        book.finish_event()
            .iter()
            .flat_map(|c| c.deltas().unwrap())
            .collect()
    }

    fn tick_kind(delta: &Delta) -> Option<(TickType, bool)> {
        match delta {
            Delta::TickInfo {
                kind, is_exch_tick, ..
            } => Some((*kind, *is_exch_tick)),
            _ => None,
        }
    }

    // =========================================================================
    // Plain handlers
    // =========================================================================

    #[test]
    fn test_new_order_into_empty_book() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Bid, 100, 10).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(tick_kind(&deltas[0]), Some((TickType::New, true)));
        assert_eq!(
            deltas[1],
            Delta::Insert {
                side: Side::Bid,
                index: 0,
                shift: true,
                price: 100,
                qty: 10,
                count: 1,
            }
        );
        assert_eq!(b.top_levels(Side::Bid), vec![(100, 10, 1)]);
        assert_eq!(b.order(1).unwrap().qty, 10);
    }

    #[test]
    fn test_better_priced_new_order_shifts_in_at_zero() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Bid, 100, 10).unwrap();
        b.begin_event(1);
        b.new_order(2, Side::Bid, 101, 5).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(
            deltas[1],
            Delta::Insert {
                side: Side::Bid,
                index: 0,
                shift: true,
                price: 101,
                qty: 5,
                count: 1,
            }
        );
        assert_eq!(b.top_levels(Side::Bid), vec![(101, 5, 1), (100, 10, 1)]);
    }

    #[test]
    fn test_new_order_with_zero_id_is_noop() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(0, Side::Bid, 100, 10).unwrap();
        assert!(drain(&mut b).is_empty());
        assert_eq!(b.order_count(), 0);
    }

    #[test]
    fn test_cancel_emits_update_and_erases() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Bid, 100, 10).unwrap();
        b.begin_event(1);
        b.new_order(2, Side::Bid, 101, 5).unwrap();
        b.begin_event(2);
        b.cancel_order(2, Side::Bid).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(tick_kind(&deltas[0]), Some((TickType::Cancel, true)));
        assert_eq!(
            deltas[1],
            Delta::Update {
                side: Side::Bid,
                index: 0,
                qty_delta: -5,
                count_delta: -1,
            }
        );
        assert_eq!(b.top_levels(Side::Bid), vec![(100, 10, 1)]);
        assert!(b.order(2).is_none());
    }

    #[test]
    fn test_cancel_unknown_emits_zeroed_tick_only() {
        let mut b = book(false);
        b.begin_event(0);
        b.cancel_order(99, Side::Ask).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(deltas.len(), 1);
        match deltas[0] {
            Delta::TickInfo {
                kind, price, qty, ..
            } => {
                assert_eq!(kind, TickType::Cancel);
                assert_eq!(price, 0);
                assert_eq!(qty, 0);
            }
            _ => panic!("expected TickInfo"),
        }
    }

    #[test]
    fn test_modify_same_price_qty_change_is_single_update() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Ask, 100, 10).unwrap();
        b.begin_event(1);
        b.modify_order(1, 100, 4).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(tick_kind(&deltas[0]), Some((TickType::Modify, true)));
        assert_eq!(
            deltas[1],
            Delta::Update {
                side: Side::Ask,
                index: 0,
                qty_delta: -6,
                count_delta: 0,
            }
        );
        assert_eq!(b.top_levels(Side::Ask), vec![(100, 4, 1)]);
    }

    #[test]
    fn test_modify_price_change_moves_order() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Ask, 100, 10).unwrap();
        b.begin_event(1);
        b.modify_order(1, 102, 7).unwrap();
        drain(&mut b);
        assert_eq!(b.top_levels(Side::Ask), vec![(102, 7, 1)]);
        let info = b.order(1).unwrap();
        assert_eq!((info.price, info.qty), (102, 7));
    }

    #[test]
    fn test_modify_unknown_is_ignored() {
        let mut b = book(false);
        b.begin_event(0);
        assert!(!b.modify_order(5, 100, 10).unwrap());
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_trade_between_resting_orders() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Ask, 100, 10).unwrap();
        b.begin_event(1);
        b.new_order(2, Side::Bid, 99, 8).unwrap();
        b.begin_event(2);
        b.trade(2, 1, 100, 8).unwrap();
        let deltas = drain(&mut b);
        // last new/modify was order 2 -> bid is the aggressor
        match deltas[0] {
            Delta::TickInfo { kind, side, .. } => {
                assert_eq!(kind, TickType::Trade);
                assert_eq!(side, Side::Bid);
            }
            _ => panic!("expected TickInfo"),
        }
        // bid fully filled, ask reduced
        assert!(b.order(2).is_none());
        assert_eq!(b.order(1).unwrap().qty, 2);
        assert_eq!(b.top_levels(Side::Ask), vec![(100, 2, 1)]);
        assert!(b.top_levels(Side::Bid).is_empty());
    }

    #[test]
    fn test_trade_overfill_is_fatal() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Ask, 100, 5).unwrap();
        b.begin_event(1);
        assert!(matches!(
            b.trade(0, 1, 100, 9),
            Err(EngineError::Overfill { order_id: 1, .. })
        ));
    }

    #[test]
    fn test_ioc_trade_against_unknown_legs() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Ask, 100, 5).unwrap();
        b.begin_event(1);
        // bid leg never rested: IOC
        b.trade(0, 1, 100, 5).unwrap();
        let deltas = drain(&mut b);
        match deltas[0] {
            Delta::TickInfo { kind, side, .. } => {
                assert_eq!(kind, TickType::IocCrossing);
                assert_eq!(side, Side::Bid);
            }
            _ => panic!("expected TickInfo"),
        }
        assert!(b.order(1).is_none());
    }

    #[test]
    fn test_market_order_aggressor_not_in_book() {
        let mut b = book(false);
        b.begin_event(0);
        b.new_order(1, Side::Ask, 100, 5).unwrap();
        b.begin_event(1);
        b.trade(777, 1, 100, 5).unwrap();
        let deltas = drain(&mut b);
        match deltas[0] {
            Delta::TickInfo { kind, side, .. } => {
                assert_eq!(kind, TickType::MarketCrossing);
                assert_eq!(side, Side::Bid);
            }
            _ => panic!("expected TickInfo"),
        }
    }

    // =========================================================================
    // Crossing protocol
    // =========================================================================

    /// Ask level (100, 8, order 9) resting, bid 10 crosses for 5.
    fn crossed_book() -> Book {
        let mut b = book(true);
        b.begin_event(0);
        b.new_order(9, Side::Ask, 100, 8).unwrap();
        b.begin_event(1);
        b.new_order(10, Side::Bid, 100, 5).unwrap();
        b
    }

    #[test]
    fn test_new_order_crossing_consumes_speculatively() {
        let mut b = crossed_book();
        let deltas = drain(&mut b);
        assert_eq!(tick_kind(&deltas[0]), Some((TickType::NewCrossing, false)));
        assert_eq!(
            deltas[1],
            Delta::Update {
                side: Side::Ask,
                index: 0,
                qty_delta: -5,
                count_delta: 0,
            }
        );
        let cross = b.crossing().unwrap();
        assert_eq!(cross.aggressor_id, 10);
        assert!(!cross.aggressor_on_level);
        assert_eq!(b.top_levels(Side::Ask), vec![(100, 3, 1)]);
        // order map keeps the original quantity until trades confirm
        assert_eq!(b.order(10).unwrap().qty, 5);
    }

    #[test]
    fn test_new_order_during_crossing_is_fatal() {
        let mut b = crossed_book();
        b.begin_event(2);
        assert!(matches!(
            b.new_order(11, Side::Bid, 99, 1),
            Err(EngineError::CrossingActive { op: 'N', .. })
        ));
    }

    #[test]
    fn test_confirming_trade_completes_crossing() {
        let mut b = crossed_book();
        b.begin_event(2);
        b.trade(10, 9, 100, 5).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(tick_kind(&deltas[0]), Some((TickType::Trade, true)));
        // zero-delta markers on both tops
        assert_eq!(
            deltas[1],
            Delta::Update {
                side: Side::Bid,
                index: 0,
                qty_delta: 0,
                count_delta: 0,
            }
        );
        assert_eq!(
            deltas[2],
            Delta::Update {
                side: Side::Ask,
                index: 0,
                qty_delta: 0,
                count_delta: 0,
            }
        );
        // order 9 still resting with qty 3, count untouched
        assert_eq!(
            deltas[3],
            Delta::Update {
                side: Side::Ask,
                index: 0,
                qty_delta: 0,
                count_delta: 0,
            }
        );
        assert_eq!(*deltas.last().unwrap(), Delta::CrossingComplete);
        assert!(!b.has_active_crossing());
        assert_eq!(b.order(9).unwrap().qty, 3);
        assert!(b.order(10).is_none());
        assert_eq!(b.top_levels(Side::Ask), vec![(100, 3, 1)]);
        assert!(b.top_levels(Side::Bid).is_empty());
    }

    #[test]
    fn test_aggressor_cancel_restores_crossed_side() {
        let mut b = book(true);
        b.begin_event(0);
        b.new_order(9, Side::Ask, 100, 8).unwrap();
        b.begin_event(1);
        b.new_order(10, Side::Bid, 100, 10).unwrap();
        // residual 2 landed on the bid level
        assert_eq!(b.top_levels(Side::Bid), vec![(100, 2, 1)]);
        assert!(b.top_levels(Side::Ask).is_empty());

        b.begin_event(2);
        b.cancel_order(10, Side::Bid).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(
            tick_kind(&deltas[0]),
            Some((TickType::CancelCrossing, true))
        );
        match deltas[0] {
            Delta::TickInfo { price, qty, .. } => {
                assert_eq!((price, qty), (100, 8));
            }
            _ => unreachable!(),
        }
        // restored exactly, aggressor residual removed
        assert_eq!(b.top_levels(Side::Ask), vec![(100, 8, 1)]);
        assert!(b.top_levels(Side::Bid).is_empty());
        assert!(!b.has_active_crossing());
        assert!(b.order(10).is_none());
        assert!(deltas.contains(&Delta::CrossingComplete));
        // S notice carries the aggressor's own view
        let s = deltas
            .iter()
            .filter_map(|d| match d {
                Delta::TickInfo {
                    kind: TickType::SelfTradeNotice,
                    price,
                    qty,
                    ..
                } => Some((*price, *qty)),
                _ => None,
            })
            .next()
            .unwrap();
        assert_eq!(s, (100, 10));
    }

    #[test]
    fn test_passive_self_trade_cancel_recrosses() {
        let mut b = book(true);
        b.begin_event(0);
        b.new_order(9, Side::Ask, 100, 8).unwrap();
        b.begin_event(1);
        b.new_order(10, Side::Bid, 100, 10).unwrap();

        b.begin_event(2);
        b.cancel_order(9, Side::Ask).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(
            tick_kind(&deltas[0]),
            Some((TickType::CancelCrossing, true))
        );
        match deltas[0] {
            Delta::TickInfo { price, qty, .. } => assert_eq!((price, qty), (100, 8)),
            _ => unreachable!(),
        }
        // freed 8 found no alternative liquidity and joined the residual
        assert_eq!(b.top_levels(Side::Bid), vec![(100, 10, 1)]);
        assert!(b.top_levels(Side::Ask).is_empty());
        assert!(!b.has_active_crossing());
        assert!(b.order(9).is_none());
        assert_eq!(b.order(10).unwrap().qty, 10);
        assert_eq!(*deltas.last().unwrap(), Delta::CrossingComplete);
        let s = deltas
            .iter()
            .filter_map(|d| match d {
                Delta::TickInfo {
                    kind: TickType::SelfTradeNotice,
                    side,
                    price,
                    qty,
                    ..
                } => Some((*side, *price, *qty)),
                _ => None,
            })
            .next()
            .unwrap();
        assert_eq!(s, (Side::Ask, 100, 8));
    }

    #[test]
    fn test_passive_cancel_recross_finds_alternative_liquidity() {
        let mut b = book(true);
        b.begin_event(0);
        b.new_order(9, Side::Ask, 100, 8).unwrap();
        b.begin_event(1);
        b.new_order(8, Side::Ask, 101, 6).unwrap();
        b.begin_event(2);
        // crosses both levels: consumes 8 @ 100 and 2 @ 101
        b.new_order(10, Side::Bid, 101, 10).unwrap();
        assert_eq!(b.top_levels(Side::Ask), vec![(101, 4, 1)]);

        b.begin_event(3);
        // self-trade cancel of the 8 @ 100: re-cross takes 4 more @ 101
        b.cancel_order(9, Side::Ask).unwrap();
        drain(&mut b);
        assert!(b.top_levels(Side::Ask).is_empty());
        // 8 freed - 4 re-consumed = 4 residual on the bid
        assert_eq!(b.top_levels(Side::Bid), vec![(101, 4, 1)]);
        // 2 + 4 consumed from order 8 still pending
        assert!(b.has_active_crossing());

        b.begin_event(4);
        b.trade(10, 8, 101, 6).unwrap();
        drain(&mut b);
        assert!(!b.has_active_crossing());
        assert!(b.order(8).is_none());
        assert_eq!(b.order(10).unwrap().qty, 4);
    }

    #[test]
    fn test_modify_crossing_full_fill_reports_original_cancel() {
        let mut b = book(true);
        b.begin_event(0);
        b.new_order(9, Side::Ask, 100, 8).unwrap();
        b.begin_event(1);
        b.new_order(10, Side::Bid, 95, 5).unwrap();
        b.begin_event(2);
        // modify lifts the bid into the ask: crossing, fully consumed
        b.modify_order(10, 100, 5).unwrap();
        let deltas = drain(&mut b);
        assert_eq!(
            tick_kind(&deltas[0]),
            Some((TickType::ModifyCrossing, false))
        );
        let cross = b.crossing().unwrap();
        assert_eq!(cross.residual_origin, ResidualOrigin::Modify);
        assert_eq!(cross.original_resting_price, 95);

        b.begin_event(3);
        b.trade(10, 9, 100, 5).unwrap();
        let deltas = drain(&mut b);
        // no residual and modify-origin: an X against the original price
        let x = deltas
            .iter()
            .filter_map(|d| match d {
                Delta::TickInfo {
                    kind: TickType::Cancel,
                    is_exch_tick,
                    price,
                    qty,
                    order_id,
                    ..
                } => Some((*is_exch_tick, *price, *qty, *order_id)),
                _ => None,
            })
            .next()
            .unwrap();
        assert_eq!(x, (false, 95, 5, 10));
        assert!(!deltas.contains(&Delta::CrossingComplete));
        assert!(!b.has_active_crossing());
    }

    #[test]
    fn test_partial_fill_leaves_crossing_then_completes() {
        let mut b = book(true);
        b.begin_event(0);
        b.new_order(9, Side::Ask, 100, 8).unwrap();
        b.begin_event(1);
        b.new_order(11, Side::Ask, 100, 4).unwrap();
        b.begin_event(2);
        b.new_order(10, Side::Bid, 100, 12).unwrap();
        assert!(b.has_active_crossing());

        b.begin_event(3);
        b.trade(10, 9, 100, 8).unwrap();
        // order 11's 4 still pending
        assert!(b.has_active_crossing());

        b.begin_event(4);
        b.trade(10, 11, 100, 4).unwrap();
        let deltas = drain(&mut b);
        assert!(!b.has_active_crossing());
        assert_eq!(*deltas.last().unwrap(), Delta::CrossingComplete);
        assert!(b.order(10).is_none());
        assert!(b.top_levels(Side::Ask).is_empty());
        assert!(b.top_levels(Side::Bid).is_empty());
    }
}
