// windtunnel-store/src/store.rs
// ============================================================================
// Module: Run Store and Writer
// Description: Exclusive run directories with a single writer task per run.
// Purpose: Serialize appends through a bounded queue with flush-on-write.
// Dependencies: windtunnel-core, tokio, serde_json, chrono
// ============================================================================

//! ## Overview
//! [`ArtifactStore`] is the process-wide registry of open runs; opening a
//! run is exclusive and spawns the run's writer task. The returned
//! [`RunWriter`] implements the core event-sink seam: appends serialize the
//! record, enqueue it, and resolve once the writer task has assigned the
//! stream's next dense sequence number, written the line, and flushed.
//! Finalizing writes `summary.json` exactly once and closes the queue.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use windtunnel_core::core::identifiers::InstanceId;
use windtunnel_core::core::identifiers::RunId;
use windtunnel_core::core::records::AssertionRecord;
use windtunnel_core::core::records::InstanceRecord;
use windtunnel_core::core::records::RunManifest;
use windtunnel_core::core::records::StepRecord;
use windtunnel_core::core::records::Stream;
use windtunnel_core::interfaces::RunEventSink;
use windtunnel_core::interfaces::SinkError;
use windtunnel_core::runtime::RunSummary;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bounded depth of the writer queue; enqueue blocks when saturated.
const WRITER_QUEUE_CAPACITY: usize = 1_024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("store io failure: {0}")]
    Io(String),
    /// The run is already open in this process.
    #[error("run already open: {0}")]
    AlreadyOpen(RunId),
    /// The run was already finalized.
    #[error("run already finalized: {0}")]
    Finalized(RunId),
    /// The writer task is gone.
    #[error("writer task closed")]
    WriterClosed,
    /// A stream line failed to parse.
    #[error("corrupt stream line: {0}")]
    Corrupt(String),
}

impl From<StoreError> for SinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(detail) => Self::Append(detail),
            StoreError::Finalized(_) => Self::Finalized,
            other => Self::Append(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Run Identifiers
// ============================================================================

/// Allocates a time-sorted run identifier.
///
/// The zero-padded millisecond prefix keeps directory listings in creation
/// order; the suffix disambiguates runs created in the same millisecond.
#[must_use]
pub fn new_run_id() -> RunId {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or_default();
    RunId::new(format!("run_{now_ms:013}_{:06x}", nanos & 0xff_ffff))
}

// ============================================================================
// SECTION: Store Registry
// ============================================================================

/// Process-wide registry of run directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    /// Root directory holding one subdirectory per run.
    root: PathBuf,
    /// Runs currently held open by a writer.
    open_runs: Arc<Mutex<BTreeSet<RunId>>>,
}

impl ArtifactStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open_runs: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory of one run.
    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    /// Opens a run exclusively, writes its manifest, and spawns the writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the run is already open or the directory
    /// cannot be initialized.
    pub fn open(&self, manifest: &RunManifest) -> Result<RunWriter, StoreError> {
        {
            let mut open_runs = self
                .open_runs
                .lock()
                .map_err(|_| StoreError::Io("open-run registry poisoned".to_string()))?;
            if !open_runs.insert(manifest.run_id.clone()) {
                return Err(StoreError::AlreadyOpen(manifest.run_id.clone()));
            }
        }

        let run_dir = self.run_dir(&manifest.run_id);
        match init_run_dir(&run_dir, manifest) {
            Ok(files) => {
                let (sender, receiver) = mpsc::channel(WRITER_QUEUE_CAPACITY);
                let run_id = manifest.run_id.clone();
                let registry = Arc::clone(&self.open_runs);
                let writer_dir = run_dir.clone();
                tokio::spawn(async move {
                    writer_task(writer_dir, files, receiver).await;
                    if let Ok(mut open_runs) = registry.lock() {
                        open_runs.remove(&run_id);
                    }
                });
                Ok(RunWriter {
                    run_id: manifest.run_id.clone(),
                    run_dir,
                    sender,
                })
            }
            Err(err) => {
                if let Ok(mut open_runs) = self.open_runs.lock() {
                    open_runs.remove(&manifest.run_id);
                }
                Err(err)
            }
        }
    }
}

// ============================================================================
// SECTION: Writer Handle
// ============================================================================

/// Commands accepted by the writer task.
enum WriterCommand {
    /// Append one line to a stream.
    Append {
        stream: Stream,
        payload: Value,
        ack: oneshot::Sender<Result<u64, StoreError>>,
    },
    /// Write one raw payload document.
    Payload {
        instance_id: InstanceId,
        name: String,
        payload: Value,
        ack: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Write summary.json and shut the writer down.
    Finalize {
        summary: Value,
        ack: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Exclusive writer handle for one run.
#[derive(Debug, Clone)]
pub struct RunWriter {
    run_id: RunId,
    run_dir: PathBuf,
    sender: mpsc::Sender<WriterCommand>,
}

impl std::fmt::Debug for WriterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append {
                stream, ..
            } => write!(f, "Append({})", stream.as_str()),
            Self::Payload {
                name, ..
            } => write!(f, "Payload({name})"),
            Self::Finalize {
                ..
            } => write!(f, "Finalize"),
        }
    }
}

impl RunWriter {
    /// Returns the run this writer owns.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Enqueues one stream append and waits for its sequence number.
    async fn append(&self, stream: Stream, payload: Value) -> Result<u64, StoreError> {
        let (ack, response) = oneshot::channel();
        self.sender
            .send(WriterCommand::Append {
                stream,
                payload,
                ack,
            })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        response.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Writes `summary.json` and closes the writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the summary cannot be serialized or
    /// written.
    pub async fn finalize(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let payload = serde_json::to_value(summary)
            .map_err(|err| StoreError::Io(format!("summary serialize failed: {err}")))?;
        let (ack, response) = oneshot::channel();
        self.sender
            .send(WriterCommand::Finalize {
                summary: payload,
                ack,
            })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        response.await.map_err(|_| StoreError::WriterClosed)?
    }
}

#[async_trait]
impl RunEventSink for RunWriter {
    async fn append_step(&self, record: StepRecord) -> Result<u64, SinkError> {
        let payload = serde_json::to_value(&record)
            .map_err(|err| SinkError::Append(format!("step serialize failed: {err}")))?;
        Ok(self.append(Stream::Steps, payload).await?)
    }

    async fn append_instance(&self, record: InstanceRecord) -> Result<u64, SinkError> {
        let payload = serde_json::to_value(&record)
            .map_err(|err| SinkError::Append(format!("instance serialize failed: {err}")))?;
        Ok(self.append(Stream::Instances, payload).await?)
    }

    async fn append_assertion(&self, record: AssertionRecord) -> Result<u64, SinkError> {
        let payload = serde_json::to_value(&record)
            .map_err(|err| SinkError::Append(format!("assertion serialize failed: {err}")))?;
        Ok(self.append(Stream::Assertions, payload).await?)
    }

    async fn write_payload(
        &self,
        instance_id: &InstanceId,
        name: &str,
        payload: &Value,
    ) -> Result<(), SinkError> {
        let (ack, response) = oneshot::channel();
        self.sender
            .send(WriterCommand::Payload {
                instance_id: instance_id.clone(),
                name: name.to_string(),
                payload: payload.clone(),
                ack,
            })
            .await
            .map_err(|_| SinkError::Payload("writer task closed".to_string()))?;
        response
            .await
            .map_err(|_| SinkError::Payload("writer task closed".to_string()))?
            .map_err(|err| SinkError::Payload(err.to_string()))
    }
}

// ============================================================================
// SECTION: Writer Task
// ============================================================================

/// Open stream files owned by the writer task.
struct StreamFiles {
    instances: BufWriter<File>,
    steps: BufWriter<File>,
    assertions: BufWriter<File>,
}

impl StreamFiles {
    fn for_stream(&mut self, stream: Stream) -> &mut BufWriter<File> {
        match stream {
            Stream::Instances => &mut self.instances,
            Stream::Steps => &mut self.steps,
            Stream::Assertions => &mut self.assertions,
        }
    }
}

/// Creates the run directory and opens stream files for appending.
fn init_run_dir(run_dir: &Path, manifest: &RunManifest) -> Result<StreamFiles, StoreError> {
    std::fs::create_dir_all(run_dir.join("artifacts"))
        .map_err(|err| StoreError::Io(format!("create run dir failed: {err}")))?;

    let manifest_json = serde_json::to_vec_pretty(manifest)
        .map_err(|err| StoreError::Io(format!("manifest serialize failed: {err}")))?;
    std::fs::write(run_dir.join("manifest.json"), manifest_json)
        .map_err(|err| StoreError::Io(format!("manifest write failed: {err}")))?;

    let open_stream = |stream: Stream| -> Result<BufWriter<File>, StoreError> {
        let path = run_dir.join(format!("{}.jsonl", stream.as_str()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| StoreError::Io(format!("open {} failed: {err}", path.display())))?;
        Ok(BufWriter::new(file))
    };

    Ok(StreamFiles {
        instances: open_stream(Stream::Instances)?,
        steps: open_stream(Stream::Steps)?,
        assertions: open_stream(Stream::Assertions)?,
    })
}

/// The single writer loop for one run.
async fn writer_task(
    run_dir: PathBuf,
    mut files: StreamFiles,
    mut receiver: mpsc::Receiver<WriterCommand>,
) {
    let mut seq = [0_u64; 3];
    let seq_slot = |stream: Stream| match stream {
        Stream::Instances => 0,
        Stream::Steps => 1,
        Stream::Assertions => 2,
    };

    while let Some(command) = receiver.recv().await {
        match command {
            WriterCommand::Append {
                stream,
                payload,
                ack,
            } => {
                let slot = seq_slot(stream);
                let assigned = seq[slot];
                let result = write_line(files.for_stream(stream), assigned, payload);
                if result.is_ok() {
                    seq[slot] += 1;
                }
                let _ = ack.send(result.map(|()| assigned));
            }
            WriterCommand::Payload {
                instance_id,
                name,
                payload,
                ack,
            } => {
                let result = write_payload_file(&run_dir, &instance_id, &name, &payload);
                let _ = ack.send(result);
            }
            WriterCommand::Finalize {
                summary,
                ack,
            } => {
                let result = write_summary(&run_dir, &summary, &mut files);
                let _ = ack.send(result);
                break;
            }
        }
    }
    // Remaining senders observe a closed channel and fail their appends.
    receiver.close();
    debug!(dir = %run_dir.display(), "writer task stopped");
}

/// Writes one enveloped line and flushes it.
fn write_line(file: &mut BufWriter<File>, seq: u64, payload: Value) -> Result<(), StoreError> {
    let mut line = match payload {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Io(format!("non-object record: {other}")));
        }
    };
    line.insert("seq".to_string(), Value::from(seq));
    line.insert("ts".to_string(), Value::String(Utc::now().to_rfc3339()));

    let serialized = serde_json::to_string(&Value::Object(line))
        .map_err(|err| StoreError::Io(format!("line serialize failed: {err}")))?;
    file.write_all(serialized.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.flush())
        .map_err(|err| StoreError::Io(format!("line write failed: {err}")))
}

/// Writes one raw payload document under the instance's artifact directory.
fn write_payload_file(
    run_dir: &Path,
    instance_id: &InstanceId,
    name: &str,
    payload: &Value,
) -> Result<(), StoreError> {
    let dir = run_dir.join("artifacts").join(instance_id.as_str());
    std::fs::create_dir_all(&dir)
        .map_err(|err| StoreError::Io(format!("create artifact dir failed: {err}")))?;
    let serialized = serde_json::to_vec_pretty(payload)
        .map_err(|err| StoreError::Io(format!("payload serialize failed: {err}")))?;
    std::fs::write(dir.join(name), serialized)
        .map_err(|err| StoreError::Io(format!("payload write failed: {err}")))
}

/// Flushes streams and writes `summary.json`.
fn write_summary(
    run_dir: &Path,
    summary: &Value,
    files: &mut StreamFiles,
) -> Result<(), StoreError> {
    for stream in Stream::ALL {
        files
            .for_stream(stream)
            .flush()
            .map_err(|err| StoreError::Io(format!("stream flush failed: {err}")))?;
    }
    let serialized = serde_json::to_vec_pretty(summary)
        .map_err(|err| StoreError::Io(format!("summary serialize failed: {err}")))?;
    std::fs::write(run_dir.join("summary.json"), serialized)
        .map_err(|err| StoreError::Io(format!("summary write failed: {err}")))
}
