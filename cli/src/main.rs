//! Command-line entry point: one subcommand per phase plus `run`, the
//! orchestrator driving every phase in order. Contains no pipeline logic of
//! its own; every subcommand is a call into the engine crate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use digest_pipeline_engine::orchestrator::phases;
use digest_pipeline_engine::publish::RestReleaseStore;
use digest_pipeline_engine::retention::Retention;
use digest_pipeline_engine::{Context, Orchestrator, PhaseOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "digest-pipeline", version, about = "Podcast digest pipeline")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, default_value = "pipeline.sqlite3")]
    db_path: PathBuf,

    /// Report what would happen without writing changes (retention only).
    #[arg(long, global = true)]
    dry_run: bool,

    /// Cap the number of units processed this invocation.
    #[arg(long, global = true)]
    limit: Option<i64>,

    /// Feed look-back window in days, overriding settings.
    #[arg(long, global = true)]
    days_back: Option<i64>,

    /// Restrict a run to a single episode GUID.
    #[arg(long, global = true)]
    episode_guid: Option<String>,

    /// Verbose logging (debug level).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Stop the `run` subcommand after this phase completes.
    #[arg(long, global = true)]
    phase: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every phase in order.
    Run,
    FeedIngest,
    Acquire,
    Chunk,
    Transcribe,
    Score,
    Digest,
    DialogueTts,
    Publish,
    Retention,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", serde_json::json!({"success": false, "error": err.to_string()}));
            1
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "digest_pipeline=debug" } else { "digest_pipeline=info" };
    let file_appender = tracing_appender::rolling::daily("logs", "digest-pipeline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.parse().unwrap()))
        .with_writer(non_blocking)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db = digest_pipeline_engine::db::Db::open(&cli.db_path)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let ctx = Context::new(db, run_id)?;

    match cli.command {
        Command::Run => {
            Orchestrator::run_all(&ctx, cli.phase.as_deref()).await?;
            info!("run complete");
            Ok(())
        }
        Command::FeedIngest => emit(Orchestrator::run_phase(&ctx, phases::FEED_INGEST).await, phases::FEED_INGEST),
        Command::Acquire => emit(Orchestrator::run_phase(&ctx, phases::ACQUIRE).await, phases::ACQUIRE),
        Command::Chunk => emit(Orchestrator::run_phase(&ctx, phases::CHUNK).await, phases::CHUNK),
        Command::Transcribe => emit(Orchestrator::run_phase(&ctx, phases::TRANSCRIBE).await, phases::TRANSCRIBE),
        Command::Score => emit(Orchestrator::run_phase(&ctx, phases::SCORE).await, phases::SCORE),
        Command::Digest => emit(Orchestrator::run_phase(&ctx, phases::DIGEST).await, phases::DIGEST),
        Command::DialogueTts => emit(Orchestrator::run_phase(&ctx, phases::DIALOGUE_TTS).await, phases::DIALOGUE_TTS),
        Command::Publish => emit(Orchestrator::run_phase(&ctx, phases::PUBLISH).await, phases::PUBLISH),
        Command::Retention => {
            let store = RestReleaseStore::new(ctx.http.clone(), "", "");
            emit(Retention::run_with_store(&ctx, &store, cli.dry_run).await, phases::RETENTION)
        }
    }
}

/// Emits the phase's JSON-line outcome on stdout and maps a fatal outcome
/// to a process error so `main` exits non-zero.
fn emit(outcome: PhaseOutcome, phase: &str) -> anyhow::Result<()> {
    println!("{}", outcome.to_json(phase));
    if let Some(err) = outcome.fatal {
        return Err(anyhow::anyhow!(err));
    }
    Ok(())
}
