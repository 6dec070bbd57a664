// windtunnel-store/src/reader.rs
// ============================================================================
// Module: Run Reader
// Description: Cursor-based tail reads over the per-run event streams.
// Purpose: Serve live observers and offline consumers without the writer.
// Dependencies: windtunnel-core, serde_json
// ============================================================================

//! ## Overview
//! Readers operate on the run directory alone; the writer is never involved.
//! A [`StreamCursors`] value remembers a byte offset and the next expected
//! sequence per stream, so a tailing observer re-reads only what was
//! appended since its last poll. Lines are self-contained JSON objects;
//! a torn trailing line (crash mid-write) is simply not yet visible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use windtunnel_core::core::identifiers::InstanceId;
use windtunnel_core::core::records::InstanceRecord;
use windtunnel_core::core::records::RunManifest;
use windtunnel_core::core::records::Stream;
use windtunnel_core::runtime::RunSummary;

use crate::store::StoreError;

// ============================================================================
// SECTION: Event Lines
// ============================================================================

/// One parsed stream line.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLine {
    /// Stream sequence number.
    pub seq: u64,
    /// Full line payload, envelope fields included.
    pub payload: Value,
}

/// Tail positions for every stream of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCursors {
    offsets: [u64; 3],
    next_seq: [u64; 3],
}

impl StreamCursors {
    /// Creates cursors at the start of every stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates cursors resuming after the given last-seen sequences.
    #[must_use]
    pub fn resuming(instances: u64, steps: u64, assertions: u64) -> Self {
        Self {
            offsets: [0; 3],
            next_seq: [instances, steps, assertions],
        }
    }

    /// Returns the next expected sequence for a stream.
    #[must_use]
    pub fn next_seq(&self, stream: Stream) -> u64 {
        self.next_seq[slot(stream)]
    }
}

const fn slot(stream: Stream) -> usize {
    match stream {
        Stream::Instances => 0,
        Stream::Steps => 1,
        Stream::Assertions => 2,
    }
}

// ============================================================================
// SECTION: Run Reader
// ============================================================================

/// Read-only view over one run directory.
#[derive(Debug, Clone)]
pub struct RunReader {
    run_dir: PathBuf,
}

impl RunReader {
    /// Creates a reader for a run under the given storage root.
    #[must_use]
    pub fn new(storage_root: &Path, run_id: &str) -> Self {
        Self {
            run_dir: storage_root.join(run_id),
        }
    }

    /// Creates a reader directly from a run directory.
    #[must_use]
    pub fn from_dir(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Returns true when the run directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.run_dir.is_dir()
    }

    /// Returns true once `summary.json` has been written.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.run_dir.join("summary.json").is_file()
    }

    /// Reads the run manifest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the manifest is missing or unparseable.
    pub fn read_manifest(&self) -> Result<RunManifest, StoreError> {
        let bytes = std::fs::read(self.run_dir.join("manifest.json"))
            .map_err(|err| StoreError::Io(format!("manifest read failed: {err}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::Corrupt(format!("manifest parse failed: {err}")))
    }

    /// Reads the final summary, when present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when the file exists but fails to
    /// parse.
    pub fn read_summary(&self) -> Result<Option<RunSummary>, StoreError> {
        let path = self.run_dir.join("summary.json");
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .map_err(|err| StoreError::Io(format!("summary read failed: {err}")))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Corrupt(format!("summary parse failed: {err}")))
    }

    /// Reads all lines of a stream with sequence at or above `from_seq`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures; unparseable complete lines
    /// surface as [`StoreError::Corrupt`].
    pub fn read_lines(&self, stream: Stream, from_seq: u64) -> Result<Vec<EventLine>, StoreError> {
        let mut cursors = StreamCursors::new();
        let lines = self.read_new(stream, &mut cursors)?;
        Ok(lines.into_iter().filter(|line| line.seq >= from_seq).collect())
    }

    /// Reads lines appended since the cursor's last position.
    ///
    /// Advances the cursor past every complete line consumed. A final line
    /// without a trailing newline is left for the next poll.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures or corrupt lines.
    pub fn read_new(
        &self,
        stream: Stream,
        cursors: &mut StreamCursors,
    ) -> Result<Vec<EventLine>, StoreError> {
        let path = self.run_dir.join(format!("{}.jsonl", stream.as_str()));
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&path)
            .map_err(|err| StoreError::Io(format!("open {} failed: {err}", path.display())))?;
        let slot = slot(stream);
        file.seek(SeekFrom::Start(cursors.offsets[slot]))
            .map_err(|err| StoreError::Io(format!("seek failed: {err}")))?;

        let mut reader = BufReader::new(file);
        let mut lines = Vec::new();
        loop {
            let mut buffer = String::new();
            let read = reader
                .read_line(&mut buffer)
                .map_err(|err| StoreError::Io(format!("read failed: {err}")))?;
            if read == 0 {
                break;
            }
            if !buffer.ends_with('\n') {
                // Torn tail from an in-progress write; retry next poll.
                break;
            }
            cursors.offsets[slot] += read as u64;
            let trimmed = buffer.trim();
            if trimmed.is_empty() {
                continue;
            }
            let payload: Value = serde_json::from_str(trimmed)
                .map_err(|err| StoreError::Corrupt(format!("line parse failed: {err}")))?;
            let seq = payload
                .get("seq")
                .and_then(Value::as_u64)
                .ok_or_else(|| StoreError::Corrupt("line missing seq".to_string()))?;
            if seq < cursors.next_seq[slot] {
                continue;
            }
            cursors.next_seq[slot] = seq + 1;
            lines.push(EventLine {
                seq,
                payload,
            });
        }
        Ok(lines)
    }

    /// Finds the completion record of one instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failures; `Ok(None)` when the instance
    /// has no completion record.
    pub fn find_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        for line in self.read_lines(Stream::Instances, 0)? {
            let matches = line
                .payload
                .get("instance_id")
                .and_then(Value::as_str)
                .is_some_and(|id| id == instance_id.as_str());
            if matches {
                let record: InstanceRecord = serde_json::from_value(line.payload)
                    .map_err(|err| StoreError::Corrupt(format!("instance parse failed: {err}")))?;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}
