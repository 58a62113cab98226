//! `flightstream` - CLI for the flight telemetry stream client and log store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use flightstream::cli::{Cli, Command, ConfigCommand, ListenCommand, LogsCommand, ReplayCommand};
use flightstream::store::{AppendOutcome, FlightLogStore};
use flightstream::stream::{ClientOptions, StreamEvent, TelemetryStreamClient, WsConnector};
use flightstream::telemetry::{FlightMetadata, TelemetrySample};
use flightstream::{init_logging, Config, ReplaySession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Listen(cmd) => handle_listen(&config, cmd).await,
        Command::Logs(cmd) => handle_logs(&config, cmd),
        Command::Replay(cmd) => handle_replay(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn handle_listen(config: &Config, cmd: ListenCommand) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(endpoint) = cmd.endpoint {
        config.stream.endpoint = endpoint;
    }
    config.stream.start_paused |= cmd.paused;
    config.validate().context("invalid stream settings")?;

    let connector = Arc::new(WsConnector::new(config.stream.endpoint.as_str()));
    let mut client = TelemetryStreamClient::new(connector, &ClientOptions::from(&config.stream));

    client.on_sample(|sample, _| println!("{}", sample.payload()));

    let writer = if cmd.save {
        let store = Arc::new(FlightLogStore::open(config.database_path())?);
        info!("Saving samples to {}", store.path().display());

        let (tx, rx) = mpsc::unbounded_channel();
        client.on_sample(move |sample, flight_info| {
            let metadata = flight_info.cloned().unwrap_or_default();
            if tx.send((metadata, sample.clone())).is_err() {
                debug!("Writer stopped, sample not saved");
            }
        });
        Some(tokio::spawn(run_writer(store, rx)))
    } else {
        None
    };

    tokio::spawn(log_events(client.subscribe()));

    info!(
        "Streaming from {} ({}); type 'p' + Enter to pause/resume, Ctrl-C to stop",
        client.endpoint(),
        if config.stream.start_paused { "paused" } else { "listening" }
    );
    client.connect();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("p") => {
                    client.toggle_listening();
                }
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Stopped reading stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    info!("Shutting down");
    client.shutdown().await;
    drop(client);

    if let Some(writer) = writer {
        let (saved, failed) = writer.await.context("sample writer panicked")?;
        info!("Saved {} samples ({} failed)", saved, failed);
    }
    Ok(())
}

/// Appends samples in arrival order. Returns (saved, failed) counts.
async fn run_writer(
    store: Arc<FlightLogStore>,
    mut rx: mpsc::UnboundedReceiver<(FlightMetadata, TelemetrySample)>,
) -> (u64, u64) {
    let mut saved = 0;
    let mut failed = 0;

    while let Some((metadata, sample)) = rx.recv().await {
        let store = Arc::clone(&store);
        let result = tokio::task::spawn_blocking(move || store.append(&metadata, &sample)).await;

        match result {
            Ok(Ok(outcome)) => {
                saved += 1;
                match outcome {
                    AppendOutcome::Created { flight_key } => info!("Recording flight {}", flight_key),
                    AppendOutcome::Forked { flight_key, base_key } => {
                        warn!("Metadata for {} changed, forked to {}", base_key, flight_key);
                    }
                    AppendOutcome::Appended { .. } => {}
                }
            }
            Ok(Err(e)) => {
                failed += 1;
                warn!("Sample not saved: {}", e);
            }
            Err(e) => {
                failed += 1;
                warn!("Sample writer task failed: {}", e);
            }
        }
    }

    (saved, failed)
}

async fn log_events(mut events: broadcast::Receiver<StreamEvent>) {
    loop {
        match events.recv().await {
            Ok(StreamEvent::StatusChanged(status)) => info!("Status: {}", status),
            Ok(StreamEvent::ListeningChanged(listening)) => {
                info!("{}", if listening { "Listening" } else { "Paused" });
            }
            Ok(StreamEvent::FlightInfoChanged(info)) => info!("Flight: {}", info.to_value()),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("Skipped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn handle_logs(config: &Config, cmd: LogsCommand) -> anyhow::Result<()> {
    let store = FlightLogStore::open(config.database_path())?;

    match cmd {
        LogsCommand::List { json } => {
            let records = store.get_all()?;
            if json {
                let summaries: Vec<_> = records
                    .iter()
                    .map(|r| {
                        json!({
                            "flight_key": r.flight_key,
                            "base_key": r.base_key,
                            "metadata": r.metadata,
                            "sample_count": r.samples.len(),
                            "created_at": r.created_at,
                            "updated_at": r.updated_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if records.is_empty() {
                println!("No flights recorded.");
            } else {
                println!("{:<48} {:>8}  {:<20}", "FLIGHT", "SAMPLES", "LAST UPDATE");
                for record in &records {
                    let marker = if record.is_conflict_fork() { " (fork)" } else { "" };
                    println!(
                        "{:<48} {:>8}  {:<20}{}",
                        record.flight_key,
                        record.samples.len(),
                        record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                        marker
                    );
                }
            }
        }
        LogsCommand::Show { key, json } => {
            let Some(record) = store.get(&key)? else {
                bail!("no flight recorded under '{key}'");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("Flight:   {}", record.flight_key);
                if record.is_conflict_fork() {
                    println!("Fork of:  {}", record.base_key);
                }
                println!("Metadata: {}", record.metadata.to_value());
                println!("Created:  {}", record.created_at);
                println!("Updated:  {}", record.updated_at);
                println!("Samples:  {}", record.samples.len());
                for sample in &record.samples {
                    println!("  {}", sample.payload());
                }
            }
        }
        LogsCommand::Delete { key } => {
            if store.delete(&key)? {
                println!("Deleted {key}");
            } else {
                bail!("no flight recorded under '{key}'");
            }
        }
        LogsCommand::Stats { json } => {
            let stats = store.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Database:       {}", store.path().display());
                println!("Flights:        {}", stats.total_records);
                println!("Conflict forks: {}", stats.conflict_forks);
                println!("Samples:        {}", stats.total_samples);
                println!("Size:           {} bytes", stats.db_size_bytes);
            }
        }
    }
    Ok(())
}

async fn handle_replay(config: &Config, cmd: &ReplayCommand) -> anyhow::Result<()> {
    let store = FlightLogStore::open(config.database_path())?;
    let Some(record) = store.get(&cmd.key)? else {
        bail!("no flight recorded under '{}'", cmd.key);
    };

    let interval = match cmd.interval_ms {
        Some(0) => bail!("--interval-ms must be greater than 0"),
        Some(ms) => Duration::from_millis(ms),
        None => config.frame_interval(),
    };

    let mut session = ReplaySession::new();
    session.load(record.samples);
    if session.total_frames() == 0 {
        println!("Flight {} has no samples.", record.flight_key);
        return Ok(());
    }
    info!(
        "Replaying {} ({} frames, {:?} apart)",
        record.flight_key,
        session.total_frames(),
        interval
    );

    let mut ticker = tokio::time::interval(interval);
    while session.is_replaying() {
        if let Some(frame) = session.current() {
            println!(
                "[{:>3}%] {}/{} {}",
                session.progress(),
                session.current_index() + 1,
                session.total_frames(),
                frame.payload()
            );
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                session.stop();
                info!("Replay stopped");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        if session.next_frame().is_none() {
            break;
        }
    }

    info!("Replay finished");
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Stream]");
                println!("  Endpoint:          {}", config.stream.endpoint);
                println!("  Reconnect delay:   {:?}", config.reconnect_delay());
                println!("  Buffer capacity:   {}", config.stream.buffer_capacity);
                println!("  Start paused:      {}", config.stream.start_paused);
                println!();
                println!("[Storage]");
                println!("  Database path:     {}", config.database_path().display());
                println!();
                println!("[Replay]");
                println!("  Frame interval:    {:?}", config.frame_interval());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
