//! # mbo-delta-feed
//!
//! Market-By-Order book building for equity exchange feeds, with a compact
//! binary delta stream and receiver-side top-20 reconstruction.
//!
//! The engine ingests a time-ordered stream of per-order exchange events
//! (new, modify, cancel, trade) multiplexed by instrument token, maintains
//! per-instrument aggregated books, and produces two outputs: 64-byte chunk
//! frames suitable for shared-memory transport to strategy consumers, and a
//! full top-20 snapshot per observable event for validation against a
//! reference stream.
//!
//! The crossing protocol is handled end to end: an aggressive order's
//! preliminary book effect is applied speculatively, confirming trades drain
//! it, and self-trade cancellations roll it back (entirely for an aggressor
//! cancel, partially with a re-cross for a passive cancel).
//!
//! ## Quick Start
//!
//! ```rust
//! use mbo_delta_feed::{Engine, EngineConfig, InputRecord, Side, TickType};
//!
//! let mut engine = Engine::new(EngineConfig::new().with_crossing(true));
//!
//! let rec = InputRecord {
//!     record_idx: 0,
//!     token: 26000,
//!     order_id: 1001,
//!     order_id2: 0,
//!     price: 100,
//!     qty: 10,
//!     tick_type: TickType::New,
//!     is_ask: Side::Bid.is_ask() as u8,
//! };
//!
//! let snapshots = engine.process_record(&rec).unwrap();
//! assert_eq!(snapshots[0].bids[0].price, 100);
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Identifiers, event codes, the 40-byte input record |
//! | [`wire`] | Delta records and 64-byte chunk frames |
//! | [`emitter`] | Per-event chunk buffering and top-20 filtering |
//! | [`book`] | Per-token book: handlers and the crossing state machine |
//! | [`engine`] | Token dispatch, transport copy, integrated receiver |
//! | [`receiver`] | Mirror reconstruction and derived-event synthesis |
//! | [`snapshot`] | The 708-byte validation snapshot |
//! | [`validator`] | Reference comparison with typed mismatch codes |
//! | [`source`] | Memory-mapped input and reference files |

pub mod book;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod receiver;
pub mod snapshot;
pub mod source;
pub mod types;
pub mod validator;
pub mod wire;

// Re-exports - core types
pub use error::{EngineError, Result};
pub use types::{
    AggQty, Count, InputRecord, OrderId, OrderInfo, Price, Qty, Side, TickType, Token, DEPTH,
    INPUT_RECORD_SIZE,
};

// Re-exports - book side
pub use book::{Book, CrossingState, PriceLevels, ResidualOrigin};
pub use emitter::DeltaEmitter;
pub use engine::{Engine, EngineConfig, EngineStats};

// Re-exports - wire and receiver side
pub use receiver::Receiver;
pub use snapshot::{SnapLevel, Snapshot, SNAPSHOT_SIZE};
pub use validator::Validator;
pub use wire::{Chunk, Delta, CHUNK_SIZE};

// Re-exports - file access
pub use source::{crossing_mode_from_path, InputFile, ReferenceFile};
