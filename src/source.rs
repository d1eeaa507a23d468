//! Input and reference file access.
//!
//! Both files are contiguous arrays of fixed-size packed records, typically
//! memory-mapped: 40-byte input records and 708-byte reference snapshots.
//! Records are decoded on access through the explicit codecs, so the mapping
//! itself stays a plain byte region with no alignment assumptions.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::warn;
use memmap2::Mmap;

use crate::error::Result;
use crate::snapshot::{Snapshot, SNAPSHOT_SIZE};
use crate::types::{InputRecord, INPUT_RECORD_SIZE};

/// Decide crossing mode from the input filename: `_crossing` opts in,
/// `_nocrossing` opts back out.
pub fn crossing_mode_from_path(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.contains("_crossing") && !name.contains("_nocrossing"),
        None => false,
    }
}

/// Memory-mapped input record stream.
pub struct InputFile {
    path: PathBuf,
    mmap: Mmap,
    records: usize,
}

impl InputFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let records = mmap.len() / INPUT_RECORD_SIZE;
        if mmap.len() % INPUT_RECORD_SIZE != 0 {
            warn!(
                "{}: {} trailing bytes ignored",
                path.display(),
                mmap.len() % INPUT_RECORD_SIZE
            );
        }
        Ok(Self {
            path,
            mmap,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of whole records in the file.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Decode record `i`.
    pub fn record(&self, i: usize) -> Result<InputRecord> {
        let off = i * INPUT_RECORD_SIZE;
        InputRecord::read_from(&self.mmap[off..off + INPUT_RECORD_SIZE])
    }

    /// Iterate all records in file order.
    pub fn iter(&self) -> impl Iterator<Item = Result<InputRecord>> + '_ {
        (0..self.records).map(move |i| self.record(i))
    }
}

/// Memory-mapped reference snapshot stream.
pub struct ReferenceFile {
    path: PathBuf,
    mmap: Mmap,
    records: usize,
}

impl ReferenceFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let records = mmap.len() / SNAPSHOT_SIZE;
        if mmap.len() % SNAPSHOT_SIZE != 0 {
            warn!(
                "{}: {} trailing bytes ignored",
                path.display(),
                mmap.len() % SNAPSHOT_SIZE
            );
        }
        Ok(Self {
            path,
            mmap,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Decode reference snapshot `i`.
    pub fn snapshot(&self, i: usize) -> Result<Snapshot> {
        let off = i * SNAPSHOT_SIZE;
        Snapshot::read_from(&self.mmap[off..off + SNAPSHOT_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, TickType};
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mbo_delta_feed_test_{}_{}", std::process::id(), name));
        path
    }

    fn write_records(path: &Path, records: &[InputRecord]) {
        let mut buf = vec![0u8; records.len() * INPUT_RECORD_SIZE];
        for (i, rec) in records.iter().enumerate() {
            rec.write_to(&mut buf[i * INPUT_RECORD_SIZE..(i + 1) * INPUT_RECORD_SIZE]);
        }
        let mut file = File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }

    #[test]
    fn test_crossing_mode_from_path() {
        assert!(crossing_mode_from_path(Path::new("data/feed_crossing.bin")));
        assert!(!crossing_mode_from_path(Path::new("data/feed_nocrossing.bin")));
        assert!(!crossing_mode_from_path(Path::new("data/feed.bin")));
        assert!(crossing_mode_from_path(Path::new(
            "deep/dir/sim_crossing_day2.bin"
        )));
    }

    #[test]
    fn test_input_file_round_trip() {
        let records = vec![
            InputRecord {
                record_idx: 0,
                token: 1,
                order_id: 10,
                order_id2: 0,
                price: 100,
                qty: 5,
                tick_type: TickType::New,
                is_ask: Side::Bid.is_ask() as u8,
            },
            InputRecord {
                record_idx: 1,
                token: 1,
                order_id: 10,
                order_id2: 0,
                price: 0,
                qty: 0,
                tick_type: TickType::Cancel,
                is_ask: 0,
            },
        ];
        let path = temp_path("input_round_trip.bin");
        write_records(&path, &records);

        let input = InputFile::open(&path).unwrap();
        assert_eq!(input.len(), 2);
        let back: Vec<_> = input.iter().map(|r| r.unwrap()).collect();
        assert_eq!(back, records);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reference_file_round_trip() {
        let mut snap = Snapshot::empty(3);
        snap.record_idx = 5;
        snap.bids[0].price = 100;
        snap.bids[0].qty = 10;
        snap.bids[0].num_orders = 1;

        let mut buf = vec![0u8; SNAPSHOT_SIZE];
        snap.write_to(&mut buf);
        let path = temp_path("reference_round_trip.bin");
        File::create(&path).unwrap().write_all(&buf).unwrap();

        let reference = ReferenceFile::open(&path).unwrap();
        assert_eq!(reference.len(), 1);
        assert_eq!(reference.snapshot(0).unwrap(), snap);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(InputFile::open("/definitely/not/here.bin").is_err());
        assert!(ReferenceFile::open("/definitely/not/here.bin").is_err());
    }
}
