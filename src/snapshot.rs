//! Top-20 snapshot produced per reconstructed event.
//!
//! This is the validation surface of the pipeline: the receiver materializes
//! one `Snapshot` per observable event, and the validator compares it byte
//! for byte against a reference stream. The wire layout is a packed 708-byte
//! little-endian record.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::types::{InputRecord, Price, Qty, Token, DEPTH, INPUT_RECORD_SIZE};

/// Wire size of one snapshot record.
pub const SNAPSHOT_SIZE: usize = 708;

/// Wire size of one snapshot level entry.
pub const SNAP_LEVEL_SIZE: usize = 16;

/// One aggregated level as exposed to consumers.
///
/// A zero price marks an empty slot; the dense arrays are filled from the
/// most aggressive price at index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SnapLevel {
    pub price: Price,
    pub qty: Qty,
    pub num_orders: i32,
}

impl SnapLevel {
    fn read_from(buf: &[u8]) -> Self {
        Self {
            price: LittleEndian::read_i64(&buf[0..8]),
            qty: LittleEndian::read_i32(&buf[8..12]),
            num_orders: LittleEndian::read_i32(&buf[12..16]),
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(&mut buf[0..8], self.price);
        LittleEndian::write_i32(&mut buf[8..12], self.qty);
        LittleEndian::write_i32(&mut buf[12..16], self.num_orders);
    }
}

/// Full per-event output record.
///
/// `event` echoes the derived TickInfo (not the raw input record): for
/// synthesized events such as a residual N after a crossing completes, it
/// describes the synthesized event. `bid_affected_lvl`/`ask_affected_lvl`
/// carry the minimum level index touched by a non-refill delta on that side,
/// or 20 when the side was untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub record_idx: u32,
    pub token: Token,
    pub event: InputRecord,
    pub ltp: Price,
    pub ltq: Qty,
    pub bid_affected_lvl: i8,
    pub ask_affected_lvl: i8,
    pub bid_filled_lvls: i8,
    pub ask_filled_lvls: i8,
    pub is_ask: u8,
    pub bids: [SnapLevel; DEPTH],
    pub asks: [SnapLevel; DEPTH],
}

impl Snapshot {
    /// An all-zero snapshot for the given token.
    pub fn empty(token: Token) -> Self {
        Self {
            record_idx: 0,
            token,
            event: InputRecord {
                record_idx: 0,
                token,
                order_id: 0,
                order_id2: 0,
                price: 0,
                qty: 0,
                tick_type: crate::types::TickType::New,
                is_ask: 0,
            },
            ltp: 0,
            ltq: 0,
            bid_affected_lvl: DEPTH as i8,
            ask_affected_lvl: DEPTH as i8,
            bid_filled_lvls: 0,
            ask_filled_lvls: 0,
            is_ask: 0,
            bids: [SnapLevel::default(); DEPTH],
            asks: [SnapLevel::default(); DEPTH],
        }
    }

    /// Decode one snapshot from a 708-byte slice.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < SNAPSHOT_SIZE {
            return Err(EngineError::TruncatedRecord {
                need: SNAPSHOT_SIZE,
                have: buf.len(),
            });
        }
        let event = InputRecord::read_from(&buf[8..8 + INPUT_RECORD_SIZE])?;
        let mut bids = [SnapLevel::default(); DEPTH];
        let mut asks = [SnapLevel::default(); DEPTH];
        for (i, level) in bids.iter_mut().enumerate() {
            let off = 68 + i * SNAP_LEVEL_SIZE;
            *level = SnapLevel::read_from(&buf[off..off + SNAP_LEVEL_SIZE]);
        }
        for (i, level) in asks.iter_mut().enumerate() {
            let off = 68 + DEPTH * SNAP_LEVEL_SIZE + i * SNAP_LEVEL_SIZE;
            *level = SnapLevel::read_from(&buf[off..off + SNAP_LEVEL_SIZE]);
        }
        Ok(Self {
            record_idx: LittleEndian::read_u32(&buf[0..4]),
            token: LittleEndian::read_u32(&buf[4..8]),
            event,
            ltp: LittleEndian::read_i64(&buf[48..56]),
            ltq: LittleEndian::read_i32(&buf[56..60]),
            bid_affected_lvl: buf[60] as i8,
            ask_affected_lvl: buf[61] as i8,
            bid_filled_lvls: buf[62] as i8,
            ask_filled_lvls: buf[63] as i8,
            is_ask: buf[64],
            bids,
            asks,
        })
    }

    /// Encode into a 708-byte buffer.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= SNAPSHOT_SIZE);
        LittleEndian::write_u32(&mut buf[0..4], self.record_idx);
        LittleEndian::write_u32(&mut buf[4..8], self.token);
        self.event.write_to(&mut buf[8..8 + INPUT_RECORD_SIZE]);
        LittleEndian::write_i64(&mut buf[48..56], self.ltp);
        LittleEndian::write_i32(&mut buf[56..60], self.ltq);
        buf[60] = self.bid_affected_lvl as u8;
        buf[61] = self.ask_affected_lvl as u8;
        buf[62] = self.bid_filled_lvls as u8;
        buf[63] = self.ask_filled_lvls as u8;
        buf[64] = self.is_ask;
        buf[65] = 0;
        buf[66] = 0;
        buf[67] = 0;
        for (i, level) in self.bids.iter().enumerate() {
            let off = 68 + i * SNAP_LEVEL_SIZE;
            level.write_to(&mut buf[off..off + SNAP_LEVEL_SIZE]);
        }
        for (i, level) in self.asks.iter().enumerate() {
            let off = 68 + DEPTH * SNAP_LEVEL_SIZE + i * SNAP_LEVEL_SIZE;
            level.write_to(&mut buf[off..off + SNAP_LEVEL_SIZE]);
        }
    }

    /// Count of populated levels on each side (bid, ask).
    pub fn filled_counts(&self) -> (i8, i8) {
        let bid = self.bids.iter().filter(|l| l.price != 0).count() as i8;
        let ask = self.asks.iter().filter(|l| l.price != 0).count() as i8;
        (bid, ask)
    }
}
