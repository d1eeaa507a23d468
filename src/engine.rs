//! Event dispatch across instruments.
//!
//! The engine routes each input record to the book for its token (creating
//! books lazily on first sight), runs the per-event emit cycle, copies the
//! produced chunk frames into a transport buffer, and feeds them straight
//! into the in-process receiver. In a split deployment the transport buffer
//! is what crosses the process boundary; the receiver then runs on the far
//! side against the same frames.

use ahash::AHashMap;
use log::warn;

use crate::book::Book;
use crate::error::Result;
use crate::receiver::Receiver;
use crate::snapshot::Snapshot;
use crate::types::{InputRecord, TickType, Token};
use crate::wire::Chunk;

/// Configuration for engine behavior.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Handle the exchange crossing protocol (speculative consumption with
    /// rollback). Off, aggressive orders are treated as plain adds and the
    /// trades do all the work.
    pub crossing_enabled: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable crossing-protocol handling.
    pub fn with_crossing(mut self, enabled: bool) -> Self {
        self.crossing_enabled = enabled;
        self
    }
}

/// Counters for monitoring a run.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Input records processed
    pub records_processed: u64,

    /// Snapshots delivered by the receiver
    pub snapshots_produced: u64,

    /// Chunk frames copied to the transport
    pub chunks_emitted: u64,

    /// Books created (distinct tokens seen)
    pub books_created: u64,

    /// Cancels naming an id the book never saw
    pub unknown_cancels: u64,

    /// Modifies naming an id the book never saw
    pub unknown_modifies: u64,

    /// Records with an event code the dispatcher does not route
    pub skipped_records: u64,
}

/// Routes input records to per-token books and mirrors the result.
pub struct Engine {
    config: EngineConfig,
    books: AHashMap<Token, Book>,
    receiver: Receiver,
    transport: Vec<Chunk>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            books: AHashMap::new(),
            receiver: Receiver::new(),
            transport: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    /// Process one input record to completion: book mutation, delta emission,
    /// transport copy, receiver application. Returns the snapshots the event
    /// produced, in delivery order.
    pub fn process_record(&mut self, rec: &InputRecord) -> Result<Vec<Snapshot>> {
        rec.validate()?;

        let crossing = self.config.crossing_enabled;
        let book = self.books.entry(rec.token).or_insert_with(|| {
            self.stats.books_created += 1;
            Book::new(rec.token, crossing)
        });

        book.begin_event(rec.record_idx);
        match rec.tick_type {
            TickType::New => {
                book.new_order(rec.order_id, rec.side(), rec.price, rec.qty)?;
            }
            TickType::Modify => {
                if !book.modify_order(rec.order_id, rec.price, rec.qty)? {
                    self.stats.unknown_modifies += 1;
                    warn!(
                        "record {}: modify of unknown order {} ignored",
                        rec.record_idx, rec.order_id
                    );
                }
            }
            TickType::Cancel => {
                if !book.cancel_order(rec.order_id, rec.side())? {
                    self.stats.unknown_cancels += 1;
                    warn!(
                        "record {}: cancel of unknown order {}",
                        rec.record_idx, rec.order_id
                    );
                }
            }
            TickType::Trade => {
                book.trade(rec.order_id, rec.order_id2, rec.price, rec.qty)?;
            }
            other => {
                self.stats.skipped_records += 1;
                warn!(
                    "record {}: unroutable input tick type '{}'",
                    rec.record_idx,
                    other.to_byte() as char
                );
                self.stats.records_processed += 1;
                return Ok(Vec::new());
            }
        }

        let chunks = book.finish_event();
        self.transport.clear();
        self.transport.extend_from_slice(chunks);
        self.stats.chunks_emitted += self.transport.len() as u64;

        let snapshots = self.receiver.apply_event(&self.transport)?;
        self.stats.records_processed += 1;
        self.stats.snapshots_produced += snapshots.len() as u64;
        Ok(snapshots)
    }

    /// Chunk frames of the most recently processed event, as handed to the
    /// transport.
    pub fn last_chunks(&self) -> &[Chunk] {
        &self.transport
    }

    /// Book for `token`, if one exists yet.
    pub fn book(&self, token: Token) -> Option<&Book> {
        self.books.get(&token)
    }

    /// Number of books created so far.
    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    /// The in-process receiver (mirror side).
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Run counters.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn rec(
        record_idx: u32,
        token: Token,
        tick_type: TickType,
        order_id: u64,
        order_id2: u64,
        side: Side,
        price: i64,
        qty: i32,
    ) -> InputRecord {
        InputRecord {
            record_idx,
            token,
            order_id,
            order_id2,
            price,
            qty,
            tick_type,
            is_ask: side.is_ask() as u8,
        }
    }

    #[test]
    fn test_books_created_lazily_per_token() {
        let mut engine = Engine::new(EngineConfig::new());
        engine
            .process_record(&rec(0, 1, TickType::New, 1, 0, Side::Bid, 100, 10))
            .unwrap();
        engine
            .process_record(&rec(1, 2, TickType::New, 1, 0, Side::Bid, 200, 5))
            .unwrap();
        engine
            .process_record(&rec(2, 1, TickType::New, 2, 0, Side::Ask, 101, 3))
            .unwrap();
        assert_eq!(engine.book_count(), 2);
        assert_eq!(engine.stats().books_created, 2);
        assert_eq!(engine.book(1).unwrap().order_count(), 2);
        assert_eq!(engine.book(2).unwrap().order_count(), 1);
    }

    #[test]
    fn test_snapshot_per_record() {
        let mut engine = Engine::new(EngineConfig::new());
        let snaps = engine
            .process_record(&rec(0, 7, TickType::New, 1, 0, Side::Bid, 100, 10))
            .unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].token, 7);
        assert_eq!(snaps[0].record_idx, 0);
        assert_eq!(snaps[0].bids[0].price, 100);
        assert!(engine.last_chunks().len() == 1);
    }

    #[test]
    fn test_unknown_cancel_counted_and_benign() {
        let mut engine = Engine::new(EngineConfig::new());
        let snaps = engine
            .process_record(&rec(0, 1, TickType::Cancel, 42, 0, Side::Bid, 0, 0))
            .unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].event.price, 0);
        assert_eq!(engine.stats().unknown_cancels, 1);
    }

    #[test]
    fn test_unknown_modify_produces_nothing() {
        let mut engine = Engine::new(EngineConfig::new());
        let snaps = engine
            .process_record(&rec(0, 1, TickType::Modify, 42, 0, Side::Bid, 100, 5))
            .unwrap();
        assert!(snaps.is_empty());
        assert_eq!(engine.stats().unknown_modifies, 1);
    }

    #[test]
    fn test_unroutable_tick_type_is_skipped() {
        let mut engine = Engine::new(EngineConfig::new());
        let snaps = engine
            .process_record(&rec(0, 1, TickType::SelfTradeNotice, 1, 0, Side::Bid, 1, 1))
            .unwrap();
        assert!(snaps.is_empty());
        assert_eq!(engine.stats().skipped_records, 1);
    }

    #[test]
    fn test_extremal_price_rejected() {
        let mut engine = Engine::new(EngineConfig::new());
        let result =
            engine.process_record(&rec(0, 1, TickType::New, 1, 0, Side::Bid, i64::MIN, 1));
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_roll_up() {
        let mut engine = Engine::new(EngineConfig::new());
        engine
            .process_record(&rec(0, 1, TickType::New, 1, 0, Side::Bid, 100, 10))
            .unwrap();
        engine
            .process_record(&rec(1, 1, TickType::Cancel, 1, 0, Side::Bid, 0, 0))
            .unwrap();
        let stats = engine.stats();
        assert_eq!(stats.records_processed, 2);
        assert_eq!(stats.snapshots_produced, 2);
        assert!(stats.chunks_emitted >= 2);
    }
}
