//! Reference-stream comparison.
//!
//! Reconstructed snapshots are checked field by field against a reference
//! snapshot stream. The first difference stops processing and is reported
//! with a typed location code: negative codes are bid level indices
//! (`-(idx + 1)`), positive codes up to 20 are ask level indices
//! (`idx + 1`), and codes of 100 and above name a metadata field.
//!
//! Last-trade price/quantity comparison is opt-in: known reference
//! generators do not populate those fields, so the check is off by default
//! and enabled through [`Validator::with_last_trade_check`] once the
//! reference semantics are confirmed.

use crate::error::{EngineError, Result};
use crate::snapshot::Snapshot;

/// Metadata mismatch codes.
pub const MISMATCH_RECORD_IDX: i32 = 100;
pub const MISMATCH_TOKEN: i32 = 101;
pub const MISMATCH_EVENT: i32 = 102;
pub const MISMATCH_AFFECTED: i32 = 103;
pub const MISMATCH_FILLED: i32 = 104;
pub const MISMATCH_SIDE: i32 = 105;
pub const MISMATCH_LTP: i32 = 106;
pub const MISMATCH_LTQ: i32 = 107;

/// Compare `produced` against `reference`; `None` when they agree.
///
/// `check_last_trade` controls whether `ltp`/`ltq` participate. Level
/// comparisons run most-aggressive first so the reported code names the
/// shallowest disagreement.
pub fn compare(produced: &Snapshot, reference: &Snapshot, check_last_trade: bool) -> Option<i32> {
    if produced.record_idx != reference.record_idx {
        return Some(MISMATCH_RECORD_IDX);
    }
    if produced.token != reference.token {
        return Some(MISMATCH_TOKEN);
    }
    if produced.event != reference.event {
        return Some(MISMATCH_EVENT);
    }
    if check_last_trade {
        if produced.ltp != reference.ltp {
            return Some(MISMATCH_LTP);
        }
        if produced.ltq != reference.ltq {
            return Some(MISMATCH_LTQ);
        }
    }
    if produced.bid_affected_lvl != reference.bid_affected_lvl
        || produced.ask_affected_lvl != reference.ask_affected_lvl
    {
        return Some(MISMATCH_AFFECTED);
    }
    if produced.bid_filled_lvls != reference.bid_filled_lvls
        || produced.ask_filled_lvls != reference.ask_filled_lvls
    {
        return Some(MISMATCH_FILLED);
    }
    if produced.is_ask != reference.is_ask {
        return Some(MISMATCH_SIDE);
    }
    for (i, (a, b)) in produced.bids.iter().zip(reference.bids.iter()).enumerate() {
        if a != b {
            return Some(-(i as i32 + 1));
        }
    }
    for (i, (a, b)) in produced.asks.iter().zip(reference.asks.iter()).enumerate() {
        if a != b {
            return Some(i as i32 + 1);
        }
    }
    None
}

/// Sequential validator over a reference stream.
pub struct Validator {
    compared: u64,
    check_last_trade: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            compared: 0,
            check_last_trade: false,
        }
    }

    /// Enable/disable last-trade (`ltp`/`ltq`) comparison. Off by default
    /// until the reference stream is confirmed to populate these fields.
    pub fn with_last_trade_check(mut self, enabled: bool) -> Self {
        self.check_last_trade = enabled;
        self
    }

    /// Whether last-trade comparison is enabled.
    pub fn checks_last_trade(&self) -> bool {
        self.check_last_trade
    }

    /// Check the next produced snapshot against its reference counterpart.
    pub fn check(&mut self, produced: &Snapshot, reference: &Snapshot) -> Result<()> {
        self.compared += 1;
        match compare(produced, reference, self.check_last_trade) {
            None => Ok(()),
            Some(code) => Err(EngineError::SnapshotMismatch {
                record_idx: produced.record_idx,
                code,
            }),
        }
    }

    /// Snapshots compared so far.
    pub fn compared(&self) -> u64 {
        self.compared
    }
}
