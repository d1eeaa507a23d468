//! Core data types for exchange events and book state.
//!
//! These types are designed to be:
//! - Memory efficient (fixed-size integer fields throughout)
//! - Byte-exact on the wire (explicit little-endian codecs, no layout tricks)
//! - Shared between the book side and the receiver side of the pipeline

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Exchange order identifier. Zero is reserved and never names a real order.
pub type OrderId = u64;

/// Instrument token multiplexing the input stream.
pub type Token = u32;

/// Price in integer tick units.
pub type Price = i64;

/// Per-order quantity.
pub type Qty = i32;

/// Aggregated per-level quantity.
pub type AggQty = i64;

/// Per-level order count.
pub type Count = i32;

/// Number of visible levels per side. Edits below this rank are tracked
/// internally but never communicated downstream.
pub const DEPTH: usize = 20;

/// Event code carried by input records and TickInfo deltas.
///
/// `New`/`Modify`/`Cancel`/`Trade` arrive on the exchange stream; the
/// remaining codes only ever appear on the output side, stamped by the book
/// when the crossing protocol reshapes an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TickType {
    /// New order enters the book
    New = b'N',
    /// Existing order changes price and/or quantity
    Modify = b'M',
    /// Order leaves the book
    Cancel = b'X',
    /// Execution against a resting order
    Trade = b'T',
    /// New order that crosses resting liquidity (preliminary view)
    NewCrossing = b'A',
    /// Modify that crosses resting liquidity (preliminary view)
    ModifyCrossing = b'B',
    /// Self-trade cancellation during a crossing
    CancelCrossing = b'C',
    /// Immediate-or-cancel execution (aggressor never booked, id zero)
    IocCrossing = b'D',
    /// Market-order execution (aggressor id unknown to the book)
    MarketCrossing = b'E',
    /// Informational notice carrying the cancelled order's own view
    SelfTradeNotice = b'S',
}

impl TickType {
    /// Parse an event code from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'N' => Some(TickType::New),
            b'M' => Some(TickType::Modify),
            b'X' => Some(TickType::Cancel),
            b'T' => Some(TickType::Trade),
            b'A' => Some(TickType::NewCrossing),
            b'B' => Some(TickType::ModifyCrossing),
            b'C' => Some(TickType::CancelCrossing),
            b'D' => Some(TickType::IocCrossing),
            b'E' => Some(TickType::MarketCrossing),
            b'S' => Some(TickType::SelfTradeNotice),
            _ => None,
        }
    }

    /// Wire byte for this code.
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Codes that describe an execution and carry last-trade price/qty.
    #[inline]
    pub fn is_execution(self) -> bool {
        matches!(
            self,
            TickType::Trade | TickType::IocCrossing | TickType::MarketCrossing
        )
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Bid = 0,
    Ask = 1,
}

impl Side {
    /// Parse from the input record's `is_ask` byte.
    #[inline]
    pub fn from_is_ask(byte: u8) -> Self {
        if byte == 0 {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    #[inline]
    pub fn is_ask(self) -> bool {
        matches!(self, Side::Ask)
    }

    /// The side across the book.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Wire size of one input record.
pub const INPUT_RECORD_SIZE: usize = 40;

/// One exchange event, as laid out in the input file.
///
/// Packed little-endian, 40 bytes:
///
/// | offset | field | type |
/// |--------|-------|------|
/// | 0  | record_idx | u32 |
/// | 4  | token      | u32 |
/// | 8  | order_id   | u64 |
/// | 16 | order_id2  | u64 |
/// | 24 | price      | i64 |
/// | 32 | qty        | i32 |
/// | 36 | tick_type  | u8 (ASCII code) |
/// | 37 | is_ask     | u8 |
/// | 38 | padding    | [u8; 2] |
///
/// For trades `order_id` is the bid-side order and `order_id2` the ask-side
/// order; `is_ask` is not meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub record_idx: u32,
    pub token: Token,
    pub order_id: OrderId,
    pub order_id2: OrderId,
    pub price: Price,
    pub qty: Qty,
    pub tick_type: TickType,
    pub is_ask: u8,
}

impl InputRecord {
    /// Decode one record from a 40-byte slice.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < INPUT_RECORD_SIZE {
            return Err(EngineError::TruncatedRecord {
                need: INPUT_RECORD_SIZE,
                have: buf.len(),
            });
        }
        let tick_byte = buf[36];
        let tick_type =
            TickType::from_byte(tick_byte).ok_or(EngineError::InvalidTickType(tick_byte))?;
        Ok(Self {
            record_idx: LittleEndian::read_u32(&buf[0..4]),
            token: LittleEndian::read_u32(&buf[4..8]),
            order_id: LittleEndian::read_u64(&buf[8..16]),
            order_id2: LittleEndian::read_u64(&buf[16..24]),
            price: LittleEndian::read_i64(&buf[24..32]),
            qty: LittleEndian::read_i32(&buf[32..36]),
            tick_type,
            is_ask: buf[37],
        })
    }

    /// Encode into a 40-byte buffer.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= INPUT_RECORD_SIZE);
        LittleEndian::write_u32(&mut buf[0..4], self.record_idx);
        LittleEndian::write_u32(&mut buf[4..8], self.token);
        LittleEndian::write_u64(&mut buf[8..16], self.order_id);
        LittleEndian::write_u64(&mut buf[16..24], self.order_id2);
        LittleEndian::write_i64(&mut buf[24..32], self.price);
        LittleEndian::write_i32(&mut buf[32..36], self.qty);
        buf[36] = self.tick_type.to_byte();
        buf[37] = self.is_ask;
        buf[38] = 0;
        buf[39] = 0;
    }

    /// Side of the event. Meaningless for trades.
    #[inline]
    pub fn side(&self) -> Side {
        Side::from_is_ask(self.is_ask)
    }

    /// Cheap adapter-boundary validation.
    ///
    /// `i64::MIN` is rejected so that price negation inside the level store
    /// cannot overflow.
    pub fn validate(&self) -> Result<()> {
        if self.price == i64::MIN {
            return Err(EngineError::InvalidPrice(self.price));
        }
        Ok(())
    }
}

/// Resting order state tracked by a book.
///
/// `qty` is the exchange-authoritative remaining quantity; trades decrement
/// it regardless of how much of the order is currently visible on a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderInfo {
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // TickType and Side tests
    // =========================================================================

    #[test]
    fn test_tick_type_round_trip() {
        for byte in [b'N', b'M', b'X', b'T', b'A', b'B', b'C', b'D', b'E', b'S'] {
            let tick = TickType::from_byte(byte).unwrap();
            assert_eq!(tick.to_byte(), byte);
        }
        assert_eq!(TickType::from_byte(b'Z'), None);
        assert_eq!(TickType::from_byte(0), None);
    }

    #[test]
    fn test_tick_type_execution_codes() {
        assert!(TickType::Trade.is_execution());
        assert!(TickType::IocCrossing.is_execution());
        assert!(TickType::MarketCrossing.is_execution());
        assert!(!TickType::New.is_execution());
        assert!(!TickType::CancelCrossing.is_execution());
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::from_is_ask(0), Side::Bid);
        assert_eq!(Side::from_is_ask(1), Side::Ask);
        assert_eq!(Side::from_is_ask(7), Side::Ask);
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite(), Side::Bid);
        assert!(Side::Ask.is_ask());
        assert!(!Side::Bid.is_ask());
    }

    // =========================================================================
    // InputRecord codec tests
    // =========================================================================

    fn sample_record() -> InputRecord {
        InputRecord {
            record_idx: 42,
            token: 0xBEEF,
            order_id: 1001,
            order_id2: 2002,
            price: -12_345,
            qty: 77,
            tick_type: TickType::Trade,
            is_ask: 1,
        }
    }

    #[test]
    fn test_input_record_codec_round_trip() {
        let rec = sample_record();
        let mut buf = [0u8; INPUT_RECORD_SIZE];
        rec.write_to(&mut buf);
        let back = InputRecord::read_from(&buf).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_input_record_layout_offsets() {
        let rec = sample_record();
        let mut buf = [0u8; INPUT_RECORD_SIZE];
        rec.write_to(&mut buf);

        assert_eq!(LittleEndian::read_u32(&buf[0..4]), 42);
        assert_eq!(LittleEndian::read_u32(&buf[4..8]), 0xBEEF);
        assert_eq!(LittleEndian::read_u64(&buf[8..16]), 1001);
        assert_eq!(LittleEndian::read_u64(&buf[16..24]), 2002);
        assert_eq!(LittleEndian::read_i64(&buf[24..32]), -12_345);
        assert_eq!(LittleEndian::read_i32(&buf[32..36]), 77);
        assert_eq!(buf[36], b'T');
        assert_eq!(buf[37], 1);
        assert_eq!(&buf[38..40], &[0, 0]);
    }

    #[test]
    fn test_input_record_truncated() {
        let buf = [0u8; 10];
        assert!(matches!(
            InputRecord::read_from(&buf),
            Err(EngineError::TruncatedRecord { .. })
        ));
    }

    #[test]
    fn test_input_record_invalid_tick_type() {
        let mut buf = [0u8; INPUT_RECORD_SIZE];
        sample_record().write_to(&mut buf);
        buf[36] = b'Q';
        assert!(matches!(
            InputRecord::read_from(&buf),
            Err(EngineError::InvalidTickType(b'Q'))
        ));
    }

    #[test]
    fn test_input_record_validate_rejects_extremal_price() {
        let mut rec = sample_record();
        assert!(rec.validate().is_ok());
        rec.price = i64::MIN;
        assert!(rec.validate().is_err());
    }
}
