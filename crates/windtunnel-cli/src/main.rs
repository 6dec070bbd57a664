// windtunnel-cli/src/main.rs
// ============================================================================
// Module: Windtunnel CLI Entry Point
// Description: Command dispatcher for run and replay workflows.
// Purpose: Drive the engine from the command line with stable exit codes.
// Dependencies: clap, windtunnel-{core,config,http,store}, tokio
// ============================================================================

//! ## Overview
//! The windtunnel CLI wires validated configuration into the instance
//! scheduler and the artifact store. `run` executes N instances under cap P
//! and exits 0 on success, 1 on any non-threshold failure, and 2 when a
//! configured pass-rate threshold is violated. `replay` re-executes one
//! recorded instance and emits live-style events to stdout. All user-facing
//! strings are routed through the i18n catalog.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::Utc;
use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use windtunnel_cli::t;
use windtunnel_core::core::identifiers::InstanceId;
use windtunnel_core::core::records::AssertionRecord;
use windtunnel_core::core::records::InstanceRecord;
use windtunnel_core::core::records::RunManifest;
use windtunnel_core::core::records::StepRecord;
use windtunnel_core::interfaces::RunEventSink;
use windtunnel_core::interfaces::SinkError;
use windtunnel_core::runtime::InstanceScheduler;
use windtunnel_core::runtime::RunOptions;
use windtunnel_core::runtime::replay_instance;
use windtunnel_http::ReqwestTransport;
use windtunnel_store::ArtifactStore;
use windtunnel_store::RunReader;
use windtunnel_store::new_run_id;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "windtunnel", disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute scenarios against a SUT.
    Run(RunCommand),
    /// Re-execute one recorded instance.
    Replay(ReplayCommand),
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
struct RunCommand {
    /// Path to the SUT configuration file.
    #[arg(long, short = 's', value_name = "PATH")]
    sut: PathBuf,
    /// Path to a scenario file or a directory of scenario files.
    #[arg(long, short = 'c', value_name = "PATH")]
    scenarios: PathBuf,
    /// Number of instances to execute.
    #[arg(long, short = 'n', default_value_t = 10)]
    instances: u64,
    /// Maximum concurrent instances.
    #[arg(long, short = 'p', default_value_t = 10)]
    parallel: usize,
    /// Run seed; derived from the clock when omitted.
    #[arg(long)]
    seed: Option<u64>,
    /// Root directory for run artifacts.
    #[arg(long, value_name = "DIR", default_value = "runs")]
    storage_root: PathBuf,
    /// Minimum pass rate percentage; violation exits with code 2.
    #[arg(long, value_name = "PCT")]
    threshold: Option<f64>,
    /// Optional per-instance deadline in seconds.
    #[arg(long, value_name = "SECONDS")]
    instance_timeout_seconds: Option<f64>,
    /// Grace period in seconds for in-flight instances on cancellation.
    #[arg(long, default_value_t = 5.0)]
    grace_seconds: f64,
}

/// Arguments for the `replay` command.
#[derive(Args, Debug)]
struct ReplayCommand {
    /// Run to replay from.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
    /// Instance to re-execute.
    #[arg(long, value_name = "INSTANCE_ID")]
    instance_id: String,
    /// Root directory for run artifacts.
    #[arg(long, value_name = "DIR", default_value = "runs")]
    storage_root: PathBuf,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        println!("{}", t!("main.version", version = version));
        return ExitCode::SUCCESS;
    }

    match cli.command {
        Some(Commands::Run(command)) => command_run(command).await,
        Some(Commands::Replay(command)) => command_replay(command).await,
        None => {
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            println!();
            ExitCode::SUCCESS
        }
    }
}

// ============================================================================
// SECTION: Run Command
// ============================================================================

/// Executes the `run` command.
async fn command_run(command: RunCommand) -> ExitCode {
    let sut = match windtunnel_config::load_sut(&command.sut) {
        Ok(sut) => sut,
        Err(err) => return emit_error(&t!("run.config.sut_failed", error = err)),
    };
    let scenarios = match windtunnel_config::load_scenarios(&command.scenarios) {
        Ok(scenarios) => scenarios,
        Err(err) => return emit_error(&t!("run.config.scenarios_failed", error = err)),
    };

    let seed = command.seed.unwrap_or_else(clock_seed);
    let run_id = new_run_id();
    let manifest = RunManifest {
        run_id: run_id.clone(),
        sut_name: sut.name.clone(),
        scenario_ids: scenarios.iter().map(|scenario| scenario.id.clone()).collect(),
        seed,
        parallelism: command.parallel,
        instance_target: command.instances,
        started_at: Utc::now(),
        sut: sut.clone(),
        scenarios: scenarios.clone(),
    };

    let store = ArtifactStore::new(&command.storage_root);
    let writer = match store.open(&manifest) {
        Ok(writer) => writer,
        Err(err) => return emit_error(&t!("run.store.open_failed", error = err)),
    };
    let transport = match ReqwestTransport::with_defaults() {
        Ok(transport) => transport,
        Err(err) => return emit_error(&t!("run.transport.build_failed", error = err)),
    };

    println!(
        "{}",
        t!(
            "run.started",
            run_id = run_id,
            instances = command.instances,
            parallelism = command.parallel
        )
    );

    let scheduler = InstanceScheduler::new(
        Arc::new(sut),
        scenarios.into_iter().map(Arc::new).collect(),
        Arc::new(transport),
        Arc::new(writer.clone()),
    );

    let mut options = RunOptions::new(command.instances, command.parallel, seed);
    options.grace = Duration::from_secs_f64(command.grace_seconds.max(0.0));
    options.instance_deadline =
        command.instance_timeout_seconds.map(Duration::from_secs_f64);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", t!("run.cancelled"));
            signal_cancel.cancel();
        }
    });

    let summary = match scheduler.execute(run_id.clone(), &options, cancel).await {
        Ok(summary) => summary,
        Err(err) => return emit_error(&t!("run.execute_failed", error = err)),
    };
    if let Err(err) = writer.finalize(&summary).await {
        return emit_error(&t!("run.finalize_failed", error = err));
    }

    println!(
        "{}",
        t!(
            "run.summary",
            run_id = run_id,
            passed = summary.totals.passed,
            failed = summary.totals.failed,
            errored = summary.totals.errored,
            cancelled = summary.totals.cancelled,
            pass_rate = format!("{:.1}", summary.pass_rate),
            duration_ms = format!("{:.0}", summary.duration_ms)
        )
    );

    if let Some(threshold) = command.threshold {
        if summary.pass_rate < threshold {
            eprintln!(
                "{}",
                t!(
                    "run.threshold.violated",
                    pass_rate = format!("{:.1}", summary.pass_rate),
                    threshold = threshold
                )
            );
            return ExitCode::from(2);
        }
        return ExitCode::SUCCESS;
    }

    let clean = summary.totals.failed == 0
        && summary.totals.errored == 0
        && summary.totals.cancelled == 0;
    if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Derives a run seed from the clock when none was given.
fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

// ============================================================================
// SECTION: Replay Command
// ============================================================================

/// Executes the `replay` command.
async fn command_replay(command: ReplayCommand) -> ExitCode {
    let reader = RunReader::new(&command.storage_root, &command.run_id);
    if !reader.exists() {
        return emit_error(&t!(
            "replay.reader_failed",
            run_id = command.run_id,
            error = "run directory not found"
        ));
    }
    let manifest = match reader.read_manifest() {
        Ok(manifest) => manifest,
        Err(err) => {
            return emit_error(&t!(
                "replay.manifest_failed",
                run_id = command.run_id,
                error = err
            ));
        }
    };
    let instance_id = InstanceId::new(command.instance_id.clone());
    let record = match reader.find_instance(&instance_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            return emit_error(&t!(
                "replay.instance_missing",
                instance_id = command.instance_id,
                run_id = command.run_id
            ));
        }
        Err(err) => {
            return emit_error(&t!("replay.failed", error = err));
        }
    };

    let transport = match ReqwestTransport::with_defaults() {
        Ok(transport) => transport,
        Err(err) => return emit_error(&t!("run.transport.build_failed", error = err)),
    };
    let sink = Arc::new(StdoutEventSink);
    let outcome =
        match replay_instance(&manifest, &record, Arc::new(transport), sink).await {
            Ok(outcome) => outcome,
            Err(err) => return emit_error(&t!("replay.failed", error = err)),
        };

    info!(instance = %instance_id, status = ?outcome.record.status, "replay complete");
    println!(
        "{}",
        t!(
            "replay.outcome",
            instance_id = command.instance_id,
            status = format!("{:?}", outcome.record.status).to_lowercase()
        )
    );
    match outcome.record.status {
        windtunnel_core::core::observation::InstanceStatus::Passed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

// ============================================================================
// SECTION: Stdout Event Sink
// ============================================================================

/// Sink emitting live-style event lines to stdout during replay.
struct StdoutEventSink;

impl StdoutEventSink {
    fn emit(kind: &str, data: Value) -> Result<u64, SinkError> {
        let line = json!({"type": kind, "data": data});
        let mut stdout = std::io::stdout();
        writeln!(&mut stdout, "{line}")
            .map_err(|err| SinkError::Append(t!("output.write_failed", error = err)))?;
        Ok(0)
    }
}

#[async_trait]
impl RunEventSink for StdoutEventSink {
    async fn append_step(&self, record: StepRecord) -> Result<u64, SinkError> {
        let data = serde_json::to_value(&record)
            .map_err(|err| SinkError::Append(err.to_string()))?;
        Self::emit("step_complete", data)
    }

    async fn append_instance(&self, record: InstanceRecord) -> Result<u64, SinkError> {
        let data = serde_json::to_value(&record)
            .map_err(|err| SinkError::Append(err.to_string()))?;
        Self::emit("instance_complete", data)
    }

    async fn append_assertion(&self, record: AssertionRecord) -> Result<u64, SinkError> {
        let data = serde_json::to_value(&record)
            .map_err(|err| SinkError::Append(err.to_string()))?;
        Self::emit("assertion_complete", data)
    }

    async fn write_payload(
        &self,
        _instance_id: &InstanceId,
        _name: &str,
        _payload: &Value,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    eprintln!("{message}");
    ExitCode::FAILURE
}
