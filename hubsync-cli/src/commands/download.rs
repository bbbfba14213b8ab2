//! `download` command: start downloads and follow them until they finish.

use std::sync::Arc;

use clap::Args;
use hubsync::channel::{Connector, WebSocketConnector};
use hubsync::config::{ConfigFile, ConfigKey};
use hubsync::download::{
    CoordinatorConfig, DownloadCoordinator, DownloadKey, DownloadRecord, DownloadStatus,
    SourceParams,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::CliRunner;
use crate::ui::ProgressBoard;

/// Arguments for `hubsync download`.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Repository ids to download (e.g., org/model)
    #[arg(required = true)]
    pub repos: Vec<String>,

    /// Artifact kind
    #[arg(long, default_value = "checkpoints")]
    pub kind: String,

    /// Only fetch this file or folder inside each repository
    #[arg(long)]
    pub path: Option<String>,

    /// Glob of files to fetch (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// Glob of files to skip (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Override channel.endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Override channel.connect_timeout_secs
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Run the download command.
pub fn run(args: DownloadArgs) -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    runner.log_startup("download");

    let requests = build_requests(&args)?;
    let (endpoint, coordinator_config) = settings(&args, runner.config())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    println!("hubsync v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Endpoint: {}", endpoint);
    println!("Downloads: {}", requests.len());
    println!();
    println!("Press Ctrl+C to cancel.");
    println!();

    let connector: Arc<dyn Connector> = Arc::new(WebSocketConnector::new(endpoint));
    let mut board = ProgressBoard::new();
    let records = runtime.block_on(track(
        connector,
        coordinator_config,
        requests,
        &mut board,
        interrupt_rx,
    ))?;
    board.finish();

    print_summary(&records);

    let failed = records
        .iter()
        .filter(|record| record.status == DownloadStatus::Errored)
        .count();
    if failed > 0 {
        return Err(CliError::DownloadsFailed {
            failed,
            total: records.len(),
        });
    }
    Ok(())
}

/// One request per repository, deduplicated by key in argument order.
fn build_requests(args: &DownloadArgs) -> Result<Vec<(DownloadKey, SourceParams)>, CliError> {
    let mut requests: Vec<(DownloadKey, SourceParams)> = Vec::new();

    for repo in &args.repos {
        let mut source = SourceParams::new(repo.trim(), args.kind.trim());
        if let Some(path) = &args.path {
            source = source.with_path(path.clone());
        }
        for pattern in &args.include {
            source = source.with_include(pattern.clone());
        }
        for pattern in &args.exclude {
            source = source.with_exclude(pattern.clone());
        }
        source.validate()?;

        let key = DownloadKey::for_source(&source);
        if requests.iter().any(|(existing, _)| existing == &key) {
            warn!(key = %key, "duplicate download requested, ignoring");
            continue;
        }
        requests.push((key, source));
    }

    Ok(requests)
}

/// Endpoint and coordinator settings after command-line overrides.
fn settings(
    args: &DownloadArgs,
    config: &ConfigFile,
) -> Result<(String, CoordinatorConfig), CliError> {
    let mut config = config.clone();
    if let Some(endpoint) = &args.endpoint {
        ConfigKey::ChannelEndpoint.set(&mut config, endpoint)?;
    }
    if let Some(timeout) = args.timeout {
        ConfigKey::ChannelConnectTimeoutSecs.set(&mut config, &timeout.to_string())?;
    }

    // Records must survive until the summary is printed.
    let coordinator_config = config.coordinator_config().with_auto_purge_after(None);
    Ok((config.channel.endpoint, coordinator_config))
}

/// Start every request and redraw the board until all of them are terminal.
///
/// The first interrupt cancels whatever is still active; the loop then waits
/// for the cancellations to land.
async fn track(
    connector: Arc<dyn Connector>,
    config: CoordinatorConfig,
    requests: Vec<(DownloadKey, SourceParams)>,
    board: &mut ProgressBoard,
    mut interrupts: mpsc::UnboundedReceiver<()>,
) -> Result<Vec<DownloadRecord>, CliError> {
    let coordinator = DownloadCoordinator::builder(connector).config(config).spawn();
    let mut events = coordinator.events();

    let keys: Vec<DownloadKey> = requests.iter().map(|(key, _)| key.clone()).collect();
    for (key, source) in requests {
        coordinator.start_download(key, source)?;
    }

    let mut interrupted = false;
    while !all_terminal(&coordinator, &keys) {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(record) = coordinator.get_snapshot(event.key()) {
                        board.update(&record);
                    }
                }
                None => break,
            },
            Some(()) = interrupts.recv(), if !interrupted => {
                interrupted = true;
                warn!("interrupted, cancelling active downloads");
                for key in coordinator.store().active_keys() {
                    coordinator.cancel_download(&key)?;
                }
            }
        }
    }

    let records: Vec<DownloadRecord> = keys
        .iter()
        .filter_map(|key| coordinator.get_snapshot(key))
        .collect();
    for record in &records {
        board.update(record);
    }

    coordinator.shutdown().await?;
    info!(downloads = records.len(), interrupted, "download session finished");
    Ok(records)
}

fn all_terminal(coordinator: &DownloadCoordinator, keys: &[DownloadKey]) -> bool {
    keys.iter().all(|key| {
        coordinator
            .get_snapshot(key)
            .is_some_and(|record| record.is_terminal())
    })
}

fn print_summary(records: &[DownloadRecord]) {
    let count = |status: DownloadStatus| records.iter().filter(|r| r.status == status).count();

    println!();
    println!("Session Summary");
    println!("───────────────");
    println!("  Completed: {}", count(DownloadStatus::Completed));
    println!("  Cancelled: {}", count(DownloadStatus::Cancelled));
    println!("  Failed:    {}", count(DownloadStatus::Errored));

    for record in records.iter().filter(|r| r.status == DownloadStatus::Errored) {
        println!(
            "    {}: {}",
            record.key,
            record.message.as_deref().unwrap_or("unknown error")
        );
    }
}
