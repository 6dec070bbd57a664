// windtunnel-live/src/lib.rs
// ============================================================================
// Module: Windtunnel Live Channel
// Description: Store-tailing sessions pushing typed frames to observers.
// Purpose: Stream instance completions and rolled-up stats with heartbeats.
// Dependencies: windtunnel-core, windtunnel-store, tokio
// ============================================================================

//! ## Overview
//! A live session tails the durably persisted event streams of one run, so
//! observers see exactly what a later report would see. Frames are typed:
//! `instance_complete` per completion line, `stats_update` with rolled-up
//! counters, `run_complete` once the store is finalized, and `heartbeat`
//! every five seconds while idle. Delivery is best-effort and in-order per
//! stream; a reconnecting client resumes by handing back its last-seen
//! cursors. Bursts are throttled by coalescing stats updates inside each
//! poll batch and bounding frames per window.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tokio::time::sleep;
use tokio::time::sleep_until;
use tracing::debug;
use windtunnel_core::core::records::Stream;
use windtunnel_store::EventLine;
use windtunnel_store::RunReader;
use windtunnel_store::StoreError;
use windtunnel_store::StreamCursors;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Heartbeat cadence while no stream activity is observed.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Store poll cadence while tailing.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Throttle window length.
const THROTTLE_WINDOW: Duration = Duration::from_millis(100);

/// Maximum frames delivered per throttle window.
const THROTTLE_MAX_EVENTS: u32 = 10;

// ============================================================================
// SECTION: Frames
// ============================================================================

/// Typed frames delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveFrame {
    /// One instance finished; summarized completion fields.
    InstanceComplete(Value),
    /// Rolled-up counters over completions seen so far.
    StatsUpdate(Value),
    /// The run was finalized; final stats attached.
    RunComplete(Value),
    /// Idle keep-alive.
    Heartbeat,
}

/// Last-seen stream positions a client hands back on reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCursors {
    /// Next instance-stream sequence the client expects.
    pub instances: u64,
    /// Next step-stream sequence the client expects.
    pub steps: u64,
    /// Next assertion-stream sequence the client expects.
    pub assertions: u64,
}

/// Errors raised while serving a live session.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The run directory does not exist.
    #[error("unknown run: {0}")]
    UnknownRun(String),
    /// The underlying store failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Channel
// ============================================================================

/// Factory for live sessions against one storage root.
#[derive(Debug, Clone)]
pub struct LiveChannel {
    reader: RunReader,
}

impl LiveChannel {
    /// Creates a channel over an existing run directory.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::UnknownRun`] when the run directory is missing.
    pub fn attach(storage_root: &std::path::Path, run_id: &str) -> Result<Self, LiveError> {
        let reader = RunReader::new(storage_root, run_id);
        if !reader.exists() {
            return Err(LiveError::UnknownRun(run_id.to_string()));
        }
        Ok(Self {
            reader,
        })
    }

    /// Opens a session from the start of every stream.
    #[must_use]
    pub fn session(&self) -> LiveSession {
        LiveSession::new(self.reader.clone(), StreamCursors::new())
    }

    /// Opens a session resuming from a client's last-seen cursors.
    #[must_use]
    pub fn session_from(&self, cursors: ClientCursors) -> LiveSession {
        LiveSession::new(
            self.reader.clone(),
            StreamCursors::resuming(cursors.instances, cursors.steps, cursors.assertions),
        )
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Rolled-up counters over observed completions.
#[derive(Debug, Clone, Copy, Default)]
struct LiveStats {
    total: u64,
    passed: u64,
    failed: u64,
    errored: u64,
    cancelled: u64,
}

impl LiveStats {
    fn absorb(&mut self, line: &EventLine) {
        self.total += 1;
        let status = line.payload.get("status").and_then(Value::as_str).unwrap_or_default();
        let cancelled = line
            .payload
            .get("error_kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind == "cancelled");
        match status {
            "passed" => self.passed += 1,
            "failed" => self.failed += 1,
            _ if cancelled => self.cancelled += 1,
            _ => self.errored += 1,
        }
    }

    fn to_json(self) -> Value {
        let pass_rate = if self.total == 0 {
            0.0
        } else {
            (self.passed as f64) / (self.total as f64) * 100.0
        };
        json!({
            "total": self.total,
            "passed": self.passed,
            "failed": self.failed,
            "errored": self.errored,
            "cancelled": self.cancelled,
            "pass_rate": (pass_rate * 10.0).round() / 10.0,
        })
    }
}

/// One observer's tailing session.
#[derive(Debug)]
pub struct LiveSession {
    reader: RunReader,
    cursors: StreamCursors,
    stats: LiveStats,
    pending: VecDeque<LiveFrame>,
    last_activity: Instant,
    window_start: Instant,
    window_count: u32,
    closed: bool,
}

impl LiveSession {
    fn new(reader: RunReader, cursors: StreamCursors) -> Self {
        let now = Instant::now();
        Self {
            reader,
            cursors,
            stats: LiveStats::default(),
            pending: VecDeque::new(),
            last_activity: now,
            window_start: now,
            window_count: 0,
            closed: false,
        }
    }

    /// Returns the session's current cursor positions.
    ///
    /// Clients persist these and hand them back on reconnect.
    #[must_use]
    pub fn cursors(&self) -> ClientCursors {
        ClientCursors {
            instances: self.cursors.next_seq(Stream::Instances),
            steps: self.cursors.next_seq(Stream::Steps),
            assertions: self.cursors.next_seq(Stream::Assertions),
        }
    }

    /// Delivers the next frame, or `None` once the run completed.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError`] on store failures.
    pub async fn next_frame(&mut self) -> Result<Option<LiveFrame>, LiveError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                self.throttle().await;
                return Ok(Some(frame));
            }
            if self.closed {
                return Ok(None);
            }

            let lines = self.reader.read_new(Stream::Instances, &mut self.cursors)?;
            if !lines.is_empty() {
                self.last_activity = Instant::now();
                for line in &lines {
                    self.stats.absorb(line);
                    self.pending
                        .push_back(LiveFrame::InstanceComplete(summarize_instance(line)));
                }
                // One coalesced stats frame per poll batch; latest wins.
                self.pending.push_back(LiveFrame::StatsUpdate(self.stats.to_json()));
                continue;
            }

            if self.reader.is_finalized() {
                let summary = self
                    .reader
                    .read_summary()?
                    .map(|summary| serde_json::to_value(&summary).unwrap_or(Value::Null))
                    .unwrap_or(Value::Null);
                self.pending.push_back(LiveFrame::RunComplete(summary));
                self.closed = true;
                debug!(dir = %self.reader.run_dir().display(), "live session closing");
                continue;
            }

            if self.last_activity.elapsed() >= HEARTBEAT_INTERVAL {
                self.last_activity = Instant::now();
                return Ok(Some(LiveFrame::Heartbeat));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Bounds delivery to the per-window frame budget.
    async fn throttle(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= THROTTLE_WINDOW {
            self.window_start = now;
            self.window_count = 0;
        }
        if self.window_count >= THROTTLE_MAX_EVENTS {
            let reopen = self.window_start + THROTTLE_WINDOW;
            sleep_until(reopen).await;
            self.window_start = Instant::now();
            self.window_count = 0;
        }
        self.window_count += 1;
    }
}

/// Builds the summarized instance-complete payload from a stream line.
fn summarize_instance(line: &EventLine) -> Value {
    let field = |name: &str| line.payload.get(name).cloned().unwrap_or(Value::Null);
    json!({
        "instance_id": field("instance_id"),
        "correlation_id": field("correlation_id"),
        "scenario_id": field("scenario_id"),
        "status": field("status"),
        "duration_ms": field("duration_ms"),
        "seq": line.seq,
    })
}
