//! Binary delta codec: fixed 64-byte chunk frames carrying variable-sized
//! delta records.
//!
//! Wire formats here are byte-exact contracts independent of in-memory
//! representation; everything goes through explicit little-endian read/write
//! routines. A chunk frame is:
//!
//! | offset | field | type |
//! |--------|-------|------|
//! | 0 | token      | u32 |
//! | 4 | flags      | u8 (bit 0 = final chunk of the event) |
//! | 5 | num_deltas | u8 |
//! | 6 | payload    | [u8; 58] |
//!
//! The payload is a back-to-back sequence of delta records, each prefixed by
//! a type byte. Within an event the first delta is always a TickInfo;
//! additional TickInfos in the same sequence denote derived secondary events.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{EngineError, Result};
use crate::types::{AggQty, Count, OrderId, Price, Qty, Side, TickType, Token};

/// Wire size of one chunk frame.
pub const CHUNK_SIZE: usize = 64;

/// Payload bytes available per chunk.
pub const CHUNK_PAYLOAD: usize = 58;

/// Chunk flag bit 0: last chunk of the event.
pub const CHUNK_FLAG_FINAL: u8 = 0x01;

/// Encoded sizes, type byte included.
pub const TICK_INFO_SIZE: usize = 36;
pub const UPDATE_SIZE: usize = 12;
pub const INSERT_SIZE: usize = 24;
pub const CROSSING_COMPLETE_SIZE: usize = 1;

const TYPE_TICK_INFO: u8 = 0;
const TYPE_UPDATE: u8 = 1;
const TYPE_INSERT: u8 = 2;
const TYPE_CROSSING_COMPLETE: u8 = 3;

// TickInfo flags byte
const FLAG_EXCH_TICK: u8 = 0x01;
const FLAG_SIDE_ASK: u8 = 0x02;

// Update / Insert side_index byte
const INDEX_MASK: u8 = 0x1f;
const SIDE_BIT: u8 = 0x20;
const SHIFT_BIT: u8 = 0x40;

/// One delta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    /// Event metadata; always first in an event's delta sequence. For
    /// executions, `price`/`qty` are the last-trade fields.
    TickInfo {
        kind: TickType,
        is_exch_tick: bool,
        side: Side,
        record_idx: u32,
        price: Price,
        qty: Qty,
        order_id: OrderId,
        order_id2: OrderId,
    },
    /// Signed in-place edit of a visible level. A resulting quantity of zero
    /// or below is an implicit deletion at the receiver.
    Update {
        side: Side,
        index: u8,
        qty_delta: AggQty,
        count_delta: i16,
    },
    /// Absolute level write. `shift` moves levels `[index..19]` down one slot
    /// first; without it the slot is overwritten in place (refill of level 19
    /// from the 21st-best).
    Insert {
        side: Side,
        index: u8,
        shift: bool,
        price: Price,
        qty: AggQty,
        count: Count,
    },
    /// The active crossing has fully reconciled.
    CrossingComplete,
}

impl Delta {
    /// Encoded size of this record, type byte included.
    #[inline]
    pub fn encoded_size(&self) -> usize {
        match self {
            Delta::TickInfo { .. } => TICK_INFO_SIZE,
            Delta::Update { .. } => UPDATE_SIZE,
            Delta::Insert { .. } => INSERT_SIZE,
            Delta::CrossingComplete => CROSSING_COMPLETE_SIZE,
        }
    }

    /// Encode into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        match *self {
            Delta::TickInfo {
                kind,
                is_exch_tick,
                side,
                record_idx,
                price,
                qty,
                order_id,
                order_id2,
            } => {
                buf[0] = TYPE_TICK_INFO;
                buf[1] = kind.to_byte();
                let mut flags = 0u8;
                if is_exch_tick {
                    flags |= FLAG_EXCH_TICK;
                }
                if side.is_ask() {
                    flags |= FLAG_SIDE_ASK;
                }
                buf[2] = flags;
                buf[3] = 0;
                LittleEndian::write_u32(&mut buf[4..8], record_idx);
                LittleEndian::write_i64(&mut buf[8..16], price);
                LittleEndian::write_i32(&mut buf[16..20], qty);
                LittleEndian::write_u64(&mut buf[20..28], order_id);
                LittleEndian::write_u64(&mut buf[28..36], order_id2);
                TICK_INFO_SIZE
            }
            Delta::Update {
                side,
                index,
                qty_delta,
                count_delta,
            } => {
                buf[0] = TYPE_UPDATE;
                let mut si = index & INDEX_MASK;
                if side.is_ask() {
                    si |= SIDE_BIT;
                }
                buf[1] = si;
                LittleEndian::write_i16(&mut buf[2..4], count_delta);
                LittleEndian::write_i64(&mut buf[4..12], qty_delta);
                UPDATE_SIZE
            }
            Delta::Insert {
                side,
                index,
                shift,
                price,
                qty,
                count,
            } => {
                buf[0] = TYPE_INSERT;
                let mut si = index & INDEX_MASK;
                if side.is_ask() {
                    si |= SIDE_BIT;
                }
                if shift {
                    si |= SHIFT_BIT;
                }
                buf[1] = si;
                buf[2] = 0;
                buf[3] = 0;
                LittleEndian::write_i64(&mut buf[4..12], price);
                LittleEndian::write_i64(&mut buf[12..20], qty);
                LittleEndian::write_i32(&mut buf[20..24], count);
                INSERT_SIZE
            }
            Delta::CrossingComplete => {
                buf[0] = TYPE_CROSSING_COMPLETE;
                CROSSING_COMPLETE_SIZE
            }
        }
    }

    /// Decode one record from the front of `buf`, returning it and the bytes
    /// consumed.
    pub fn read_from(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.is_empty() {
            return Err(EngineError::TruncatedRecord { need: 1, have: 0 });
        }
        match buf[0] {
            TYPE_TICK_INFO => {
                if buf.len() < TICK_INFO_SIZE {
                    return Err(EngineError::TruncatedRecord {
                        need: TICK_INFO_SIZE,
                        have: buf.len(),
                    });
                }
                let kind =
                    TickType::from_byte(buf[1]).ok_or(EngineError::InvalidTickType(buf[1]))?;
                let flags = buf[2];
                Ok((
                    Delta::TickInfo {
                        kind,
                        is_exch_tick: flags & FLAG_EXCH_TICK != 0,
                        side: if flags & FLAG_SIDE_ASK != 0 {
                            Side::Ask
                        } else {
                            Side::Bid
                        },
                        record_idx: LittleEndian::read_u32(&buf[4..8]),
                        price: LittleEndian::read_i64(&buf[8..16]),
                        qty: LittleEndian::read_i32(&buf[16..20]),
                        order_id: LittleEndian::read_u64(&buf[20..28]),
                        order_id2: LittleEndian::read_u64(&buf[28..36]),
                    },
                    TICK_INFO_SIZE,
                ))
            }
            TYPE_UPDATE => {
                if buf.len() < UPDATE_SIZE {
                    return Err(EngineError::TruncatedRecord {
                        need: UPDATE_SIZE,
                        have: buf.len(),
                    });
                }
                let si = buf[1];
                Ok((
                    Delta::Update {
                        side: if si & SIDE_BIT != 0 { Side::Ask } else { Side::Bid },
                        index: si & INDEX_MASK,
                        count_delta: LittleEndian::read_i16(&buf[2..4]),
                        qty_delta: LittleEndian::read_i64(&buf[4..12]),
                    },
                    UPDATE_SIZE,
                ))
            }
            TYPE_INSERT => {
                if buf.len() < INSERT_SIZE {
                    return Err(EngineError::TruncatedRecord {
                        need: INSERT_SIZE,
                        have: buf.len(),
                    });
                }
                let si = buf[1];
                Ok((
                    Delta::Insert {
                        side: if si & SIDE_BIT != 0 { Side::Ask } else { Side::Bid },
                        index: si & INDEX_MASK,
                        shift: si & SHIFT_BIT != 0,
                        price: LittleEndian::read_i64(&buf[4..12]),
                        qty: LittleEndian::read_i64(&buf[12..20]),
                        count: LittleEndian::read_i32(&buf[20..24]),
                    },
                    INSERT_SIZE,
                ))
            }
            TYPE_CROSSING_COMPLETE => Ok((Delta::CrossingComplete, CROSSING_COMPLETE_SIZE)),
            other => Err(EngineError::InvalidDeltaType(other)),
        }
    }
}

/// One 64-byte chunk frame.
#[derive(Debug, Clone, Copy)]
pub struct Chunk {
    pub token: Token,
    pub flags: u8,
    pub num_deltas: u8,
    payload: [u8; CHUNK_PAYLOAD],
    used: usize,
}

impl Chunk {
    /// Fresh empty chunk for `token`.
    pub fn new(token: Token) -> Self {
        Self {
            token,
            flags: 0,
            num_deltas: 0,
            payload: [0; CHUNK_PAYLOAD],
            used: 0,
        }
    }

    /// Remaining payload capacity in bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        CHUNK_PAYLOAD - self.used
    }

    /// Whether this is the last chunk of its event.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.flags & CHUNK_FLAG_FINAL != 0
    }

    /// Mark this chunk as the last of its event.
    #[inline]
    pub fn set_final(&mut self) {
        self.flags |= CHUNK_FLAG_FINAL;
    }

    /// Append a delta if it fits. Returns false (chunk untouched) when the
    /// remaining payload is too small.
    pub fn try_push(&mut self, delta: &Delta) -> bool {
        let size = delta.encoded_size();
        if size > self.remaining() {
            return false;
        }
        delta.write_to(&mut self.payload[self.used..self.used + size]);
        self.used += size;
        self.num_deltas += 1;
        true
    }

    /// Decode all deltas carried by this chunk.
    pub fn deltas(&self) -> Result<Vec<Delta>> {
        let mut out = Vec::with_capacity(self.num_deltas as usize);
        let mut off = 0usize;
        for _ in 0..self.num_deltas {
            let (delta, used) = Delta::read_from(&self.payload[off..])?;
            out.push(delta);
            off += used;
        }
        Ok(out)
    }

    /// Decode one chunk from a 64-byte slice.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < CHUNK_SIZE {
            return Err(EngineError::TruncatedRecord {
                need: CHUNK_SIZE,
                have: buf.len(),
            });
        }
        let mut payload = [0u8; CHUNK_PAYLOAD];
        payload.copy_from_slice(&buf[6..CHUNK_SIZE]);
        Ok(Self {
            token: LittleEndian::read_u32(&buf[0..4]),
            flags: buf[4],
            num_deltas: buf[5],
            payload,
            // `used` is only meaningful on the encode side
            used: CHUNK_PAYLOAD,
        })
    }

    /// Encode into a 64-byte buffer.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= CHUNK_SIZE);
        LittleEndian::write_u32(&mut buf[0..4], self.token);
        buf[4] = self.flags;
        buf[5] = self.num_deltas;
        buf[6..CHUNK_SIZE].copy_from_slice(&self.payload);
    }
}
