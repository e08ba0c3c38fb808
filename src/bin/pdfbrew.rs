//! CLI binary for pdfbrew.
//!
//! Loads the configuration file, installs logging, then runs the watch
//! service until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use pdfbrew::{validate_directories, Service, Settings};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run with ./pdfbrew.yaml
  pdfbrew

  # Explicit config, debug logs appended to a file
  pdfbrew -c /etc/pdfbrew.yaml -l debug -o /var/log/pdfbrew.log

  # Validate configuration and directories, then exit
  pdfbrew -c /etc/pdfbrew.yaml --check

CONFIG FILE (YAML, JSON or TOML, chosen by extension):
  watch:
    /srv/spool/in: /srv/spool/out
  poll_interval: 5
  workers: 2
  fail_tries: 3
  delete_on_fail: false
  copy_original: false
  delete_original: true
  filetypes: [application/postscript]
  tool: ps2pdf
  ps2pdf_opts: "-sOwnerPassword=RANDOMPASS"
  purge_age: 604800

ENVIRONMENT VARIABLES:
  RUST_LOG            Overrides every other log level setting
  PDFBREW_CONFIG      Config file path
  PDFBREW_LOGLEVEL    Log level
  PDFBREW_LOGFILE     Append logs to this file
  PDFBREW_<KEY>       Overrides config key <key> (e.g. PDFBREW_WORKERS=4)
"#;

/// Watch folders and convert arriving documents to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "pdfbrew",
    version,
    about = "Watch folders and convert arriving documents to PDF",
    long_about = "Poll one or more input directories, convert every file whose content type is \
allowed with an external tool (ps2pdf by default) and publish the result atomically into the \
paired output directory. Failing files are retried until a configurable ceiling.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Configuration file (.yaml, .yml, .json or .toml).
    #[arg(short = 'c', long, env = "PDFBREW_CONFIG", default_value = "pdfbrew.yaml")]
    configfile: PathBuf,

    /// Log level or filter directive (error, warn, info, debug, trace).
    #[arg(short, long, env = "PDFBREW_LOGLEVEL")]
    loglevel: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(short = 'o', long, env = "PDFBREW_LOGFILE")]
    logfile: Option<PathBuf>,

    /// Show only errors on stderr. A log file keeps the configured level.
    #[arg(short, long, env = "PDFBREW_QUIET")]
    quiet: bool,

    /// Validate configuration and directories, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.configfile)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.configfile))?;
    if let Some(level) = cli.loglevel.clone() {
        settings.loglevel = level;
    }
    if let Some(path) = cli.logfile.clone() {
        settings.logfile = Some(path);
    }

    // ── Logging setup ────────────────────────────────────────────────────
    let logfile = settings.logfile.as_deref();
    init_logging(sink_level(&settings.loglevel, cli.quiet, logfile.is_some()), logfile)?;

    if cli.check {
        validate_directories(&settings).context("Directory check failed")?;
        println!(
            "{}: configuration OK, {} watch dir(s)",
            cli.configfile.display(),
            settings.watch.len()
        );
        return Ok(());
    }

    let service = Service::new(settings).context("Failed to start service")?;

    // ── Run until interrupted ────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    service.run(shutdown).await.context("Service failed")?;
    info!("pdfbrew stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM. A signal that cannot be listened for is
/// logged and ignored.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = interrupt => info!("SIGINT received, stopping"),
        _ = terminate => info!("SIGTERM received, stopping"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, stopping"),
        Err(e) => {
            warn!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await
        }
    }
}

/// Level for the active sink: `--quiet` only silences the console.
fn sink_level(loglevel: &str, quiet: bool, to_file: bool) -> &str {
    if quiet && !to_file {
        "error"
    } else {
        loglevel
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `filter`.
fn init_logging(filter: &str, logfile: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}
