//! Replay feeds for backtesting.
//!
//! The historical boundary: a feed yields pre-recorded pool-state
//! updates in monotone (t, intra_block_order) order. The shipped format
//! is JSON lines, one `PriceUpdate` per line, written by the
//! record-stream binary and consumed by the backtester.

use crate::types::PriceUpdate;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

/// A finite source of recorded price updates.
pub trait HistoricalFeed {
    fn next_update(&mut self) -> Result<Option<PriceUpdate>>;
}

/// In-memory feed, mostly for tests.
pub struct VecFeed {
    updates: std::vec::IntoIter<PriceUpdate>,
}

impl VecFeed {
    pub fn new(updates: Vec<PriceUpdate>) -> Self {
        Self {
            updates: updates.into_iter(),
        }
    }
}

impl HistoricalFeed for VecFeed {
    fn next_update(&mut self) -> Result<Option<PriceUpdate>> {
        Ok(self.updates.next())
    }
}

/// Reads a JSONL replay file lazily, one update per line.
pub struct JsonlReplayReader {
    lines: Lines<BufReader<File>>,
}

impl JsonlReplayReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open replay file {}", path.as_ref().display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl HistoricalFeed for JsonlReplayReader {
    fn next_update(&mut self) -> Result<Option<PriceUpdate>> {
        for line in self.lines.by_ref() {
            let line = line.context("failed to read replay line")?;
            if line.trim().is_empty() {
                continue;
            }
            let update: PriceUpdate =
                serde_json::from_str(&line).context("malformed replay line")?;
            return Ok(Some(update));
        }
        Ok(None)
    }
}

/// Appends price updates to a JSONL replay file.
pub struct JsonlReplayWriter {
    writer: BufWriter<File>,
}

impl JsonlReplayWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("failed to create replay file {}", path.as_ref().display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, update: &PriceUpdate) -> Result<()> {
        serde_json::to_writer(&mut self.writer, update)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pair;

    fn update(t: u64, order: u16) -> PriceUpdate {
        PriceUpdate {
            r_id: 7,
            b_id: 0,
            t_seconds: t,
            r_reserves: 10,
            b_reserves: 20,
            intra_block_order: order,
        }
    }

    #[test]
    fn test_jsonl_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");

        let mut writer = JsonlReplayWriter::create(&path).unwrap();
        writer.append(&update(100, 0)).unwrap();
        writer.append(&update(100, 1)).unwrap();
        writer.append(&update(101, 0)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader = JsonlReplayReader::open(&path).unwrap();
        let mut seen = Vec::new();
        while let Some(u) = reader.next_update().unwrap() {
            seen.push(u);
        }
        assert_eq!(seen, vec![update(100, 0), update(100, 1), update(101, 0)]);
        assert_eq!(seen[0].pair(), Pair::new(7, 0));
    }

    #[test]
    fn test_malformed_line_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let mut reader = JsonlReplayReader::open(&path).unwrap();
        assert!(reader.next_update().is_err());
    }
}
