use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing::info;
use triggerd::{
    config::DaemonConfig,
    exec::process::ProcessExecutionService,
    host::HeadlessHost,
    AppContext,
};

#[derive(Parser)]
#[command(
    name = "triggerd",
    about = "triggerd — automation trigger & run orchestration daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory for config.toml and daemon state
    #[arg(long, env = "TRIGGERD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TRIGGERD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TRIGGERD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Maximum simultaneously active automation runs
    #[arg(long, env = "TRIGGERD_MAX_RUNS")]
    max_runs: Option<usize>,

    /// Default run timeout in seconds when an automation sets none
    #[arg(long, env = "TRIGGERD_DEFAULT_TIMEOUT")]
    default_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon in the foreground (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    let _log_guard = init_logging(args.log.as_deref().unwrap_or("info"), args.log_file.clone());

    match args.command.take().unwrap_or(Command::Serve) {
        Command::Serve => serve(args).await,
    }
}

async fn serve(args: Args) -> Result<()> {
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let config = DaemonConfig::load(data_dir, args.max_runs, args.default_timeout);

    let exec = Arc::new(ProcessExecutionService::new());
    let host = Arc::new(HeadlessHost::new());
    let ctx = AppContext::new(config, exec, host);

    // Subscribe every enabled automation's trigger. Any app-lifecycle
    // `ready` triggers fire synchronously here — the host is already up.
    ctx.manager.register_all().await;
    info!("triggerd ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    ctx.manager.shutdown().await;
    Ok(())
}

fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".triggerd"),
        None => PathBuf::from(".triggerd"),
    }
}

/// Set up tracing: compact stdout, plus a daily-rotated file when requested.
/// Returns the appender guard that must stay alive for the process lifetime.
fn init_logging(
    log_level: &str,
    log_file: Option<PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("triggerd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .compact()
                .init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(EnvFilter::new(log_level))
            .with(fmt::layer().compact())
            .with(fmt::layer().with_writer(non_blocking))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
        None
    }
}
