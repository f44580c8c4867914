mod handlers;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use feedmark_core::{
    run_once, spawn_watch, AdvancePolicy, Config, EntryHandler, FeedProcessor, HttpSource,
    RunReport, WatermarkStore,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::handlers::{ExecHandler, OutputFormat, PrintHandler};

#[derive(Parser, Debug)]
#[command(
    name = "feedmark",
    about = "Poll RSS/Atom feeds and hand entries newer than the last run to a handler"
)]
struct Args {
    /// Feed URLs (or local paths); replaces the feeds listed in the config file
    feeds: Vec<String>,

    /// Config file (default: <config dir>/feedmark/config.json)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Watermark store (default: <data dir>/rss/latest.json)
    #[arg(long, value_name = "FILE")]
    db_file: Option<PathBuf>,

    /// Increase diagnostics; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Process feeds without saving the watermark store
    #[arg(long)]
    dry_run: bool,

    /// Hand every fetched entry to the handler, ignoring stored watermarks
    #[arg(long)]
    force: bool,

    /// Keep the watermark below entries the handler failed on so they are retried
    #[arg(long)]
    hold_on_failure: bool,

    /// How entries are written when no --exec command is given
    #[arg(long, value_enum, default_value_t = OutputFormat::Print)]
    format: OutputFormat,

    /// Shell command run once per entry (entry fields in ENTRY_* variables)
    #[arg(long, value_name = "COMMAND")]
    exec: Option<String>,

    /// Poll again every N seconds until interrupted
    #[arg(long, value_name = "SECONDS")]
    every: Option<u64>,
}

fn init_tracing(level: u8) {
    let default = match level {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load(&path)
        .with_context(|| format!("failed to load config from '{}'", path.display()))?;

    if args.db_file.is_some() {
        config.db_file = args.db_file.clone();
    }
    config.debug_level = config.debug_level.max(args.debug);
    config.dry_run |= args.dry_run;
    config.force |= args.force;
    if args.hold_on_failure {
        config.advance_policy = AdvancePolicy::HoldAtFailure;
    }
    if !args.feeds.is_empty() {
        config.feeds = args.feeds.clone();
    }
    Ok(config)
}

fn summarize(report: &RunReport) {
    for feed in report.failed_feeds() {
        if let Err(err) = &feed.result {
            eprintln!("{}: {}", feed.url, err);
        }
    }
    if let Err(err) = &report.flush {
        eprintln!("* Unable to save database: {err}");
    }
    info!(
        feeds = report.feeds.len(),
        handled = report.handled_entries(),
        "run finished"
    );
}

async fn run<H>(config: &Config, every: Option<u64>, handler: H) -> Result<bool>
where
    H: EntryHandler + Send + 'static,
{
    let source = HttpSource::new(&config.fetch_config()).context("failed to build HTTP client")?;
    let store = WatermarkStore::load_from(config.store_path(), config.dry_run).await;
    let mut processor = FeedProcessor::new(source, handler, config.process_options());

    let Some(seconds) = every else {
        let report = run_once(&mut processor, &store, &config.feeds).await;
        summarize(&report);
        return Ok(report.is_success());
    };

    let (report_tx, mut report_rx) = mpsc::channel(4);
    let handle = spawn_watch(
        processor,
        store,
        config.feeds.clone(),
        Duration::from_secs(seconds.max(1)),
        report_tx,
    );

    let mut ok = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                info!("interrupted; stopping");
                break;
            }
            report = report_rx.recv() => match report {
                Some(report) => {
                    summarize(&report);
                    ok = report.is_success();
                }
                None => break,
            }
        }
    }
    handle.stop().await.context("watch task panicked")?;
    Ok(ok)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(config.debug_level);

    if config.feeds.is_empty() {
        bail!("no feeds given on the command line or in the config file");
    }

    let ok = match &args.exec {
        Some(command) => run(&config, args.every, ExecHandler::new(command.clone())).await?,
        None => run(&config, args.every, PrintHandler::new(args.format)).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
