//! Replay an input event file through the engine, optionally validating the
//! reconstructed snapshots against a reference stream.
//!
//! ```bash
//! # plain replay
//! mbo-feed data/session.bin
//!
//! # validate against a reference, crossing protocol on
//! mbo-feed data/session_crossing.bin data/session_crossing.ref --dump
//! ```
//!
//! Crossing mode is inferred from the input filename (`_crossing` without
//! `_nocrossing`) and can be forced with `--crossing`. Exits 0 on success,
//! 1 on the first validation mismatch or I/O failure.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use mbo_delta_feed::{
    crossing_mode_from_path, Engine, EngineConfig, InputFile, ReferenceFile, Validator,
};

#[derive(Parser, Debug)]
#[command(name = "mbo-feed", version, about = "MBO book builder and delta feed replay")]
struct Cli {
    /// Input event file (packed 40-byte records)
    input: PathBuf,

    /// Reference snapshot file (packed 708-byte records) to validate against
    reference: Option<PathBuf>,

    /// Force crossing-protocol handling on
    #[arg(long)]
    crossing: bool,

    /// Also compare last-trade price/quantity against the reference
    /// (requires a reference stream that populates those fields)
    #[arg(long)]
    check_last_trade: bool,

    /// Write one human-readable JSON line per output snapshot
    #[arg(long)]
    dump: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let crossing = cli.crossing || crossing_mode_from_path(&cli.input);
    info!(
        "input {} ({} mode)",
        cli.input.display(),
        if crossing { "crossing" } else { "plain" }
    );

    let input = InputFile::open(&cli.input)
        .with_context(|| format!("open input {}", cli.input.display()))?;
    let reference = match &cli.reference {
        Some(path) => Some(
            ReferenceFile::open(path).with_context(|| format!("open reference {}", path.display()))?,
        ),
        None => None,
    };

    let mut engine = Engine::new(EngineConfig::new().with_crossing(crossing));
    let mut validator = Validator::new().with_last_trade_check(cli.check_last_trade);
    let mut ref_cursor = 0usize;

    for i in 0..input.len() {
        let rec = input.record(i).with_context(|| format!("decode record {i}"))?;
        let snapshots = engine
            .process_record(&rec)
            .with_context(|| format!("process record {i} (idx {})", rec.record_idx))?;

        for snap in &snapshots {
            if let Some(reference) = &reference {
                if ref_cursor < reference.len() {
                    let expected = reference
                        .snapshot(ref_cursor)
                        .with_context(|| format!("decode reference snapshot {ref_cursor}"))?;
                    validator.check(snap, &expected).with_context(|| {
                        format!("validate snapshot {ref_cursor} (record idx {})", rec.record_idx)
                    })?;
                    ref_cursor += 1;
                }
            }
            if cli.dump {
                println!("{}", serde_json::to_string(snap)?);
            }
        }
    }

    let stats = engine.stats();
    info!(
        "done: {} records, {} snapshots, {} chunks, {} books, {} validated",
        stats.records_processed,
        stats.snapshots_produced,
        stats.chunks_emitted,
        stats.books_created,
        validator.compared()
    );
    if stats.unknown_cancels + stats.unknown_modifies + stats.skipped_records > 0 {
        info!(
            "benign artifacts: {} unknown cancels, {} unknown modifies, {} skipped records",
            stats.unknown_cancels, stats.unknown_modifies, stats.skipped_records
        );
    }
    Ok(())
}
