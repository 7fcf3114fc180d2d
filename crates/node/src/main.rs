//! Three-Phase Commit Node
//!
//! Main entry point for a 3PC node.
//! Supports both coordinator mode (drives transactions) and participant mode (votes and applies).
//! Every protocol transition is logged to disk and replayed on restart.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tpc_consensus::{
    run_termination_monitor, Coordinator, CoordinatorClient, MessageHandler, MessageServer,
    OutcomeSource, Participant, ParticipantRecord, ParticipantRegistry, PeerSource,
    TerminationMode, WsTransport,
};
use tpc_control::{ControlServer, ParticipantContext};
use tpc_txlog::{SledLog, TransactionLog};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::{parse_participant, NodeConfig};

/// Node mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Coordinator mode - drives transactions through the three phases
    Coordinator,
    /// Participant mode - votes, prepares and applies decisions
    Participant,
}

/// Behaviour of a prepared participant whose coordinator went silent
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Termination {
    Block,
    Cooperative,
}

impl From<Termination> for TerminationMode {
    fn from(t: Termination) -> Self {
        match t {
            Termination::Block => TerminationMode::Block,
            Termination::Cooperative => TerminationMode::Cooperative,
        }
    }
}

/// Three-phase commit coordinator / participant node
#[derive(Parser, Debug)]
#[command(name = "tpc")]
#[command(about = "Non-blocking atomic commitment with three-phase commit", long_about = None)]
struct Args {
    /// Node mode (coordinator or participant)
    #[arg(long, value_enum, default_value = "coordinator")]
    mode: Mode,

    /// Node id
    #[arg(long)]
    id: Option<String>,

    /// Protocol (WebSocket) bind address
    #[arg(long)]
    listen: Option<String>,

    /// HTTP control bind address
    #[arg(long)]
    control_addr: Option<String>,

    /// Coordinator protocol address (participant mode)
    #[arg(long)]
    coordinator_addr: Option<String>,

    /// Participant entry ID=ADDR, repeatable
    #[arg(long = "participant", value_name = "ID=ADDR")]
    participants: Vec<String>,

    /// Data directory for the durable log
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON config file providing defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-phase vote collection timeout in milliseconds
    #[arg(long)]
    phase_timeout_ms: Option<u64>,

    /// Termination mode for prepared participants
    #[arg(long, value_enum)]
    termination: Option<Termination>,

    /// Fault injection probability (participant mode)
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Merge the config file with command-line overrides
    fn config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(id) = &self.id {
            config.id = id.clone();
        }
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(addr) = &self.control_addr {
            config.control_addr = addr.clone();
        }
        if let Some(addr) = &self.coordinator_addr {
            config.coordinator_addr = addr.clone();
        }
        for entry in &self.participants {
            let (id, addr) = parse_participant(entry)?;
            config.participants.insert(id, addr);
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ms) = self.phase_timeout_ms {
            config.phase_timeout_ms = ms;
        }
        if let Some(termination) = self.termination {
            config.termination = termination.into();
        }
        if let Some(rate) = self.failure_rate {
            config.failure_rate = rate;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.config()?;

    match args.mode {
        Mode::Coordinator => run_coordinator(config).await,
        Mode::Participant => run_participant(config).await,
    }
}

fn open_log(config: &NodeConfig) -> Result<Arc<SledLog>> {
    std::fs::create_dir_all(&config.data_dir)?;
    Ok(Arc::new(SledLog::open(config.log_path())?))
}

/// Run in coordinator mode - accept transactions and drive them to a decision
async fn run_coordinator(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting 3PC node {} - COORDINATOR MODE", config.id);
    tracing::info!("  Protocol: {}", config.listen);
    tracing::info!("  HTTP control: {}", config.control_addr);
    tracing::info!("  Data directory: {:?}", config.data_dir);
    tracing::info!("  Static participants: {}", config.participants.len());

    let policy = config.retry_policy();
    let log = open_log(&config)?;
    let registry = Arc::new(ParticipantRegistry::with_participants(
        config.participants.clone(),
    ));
    let transport = Arc::new(WsTransport::new(policy.ack_timeout));

    let coordinator = Coordinator::new(
        config.id.clone(),
        log.clone(),
        registry,
        transport,
        policy,
    );

    // Resume whatever the log says was in flight
    let resumed = coordinator.recover()?;
    if resumed > 0 {
        tracing::info!("Resumed {} transactions from the log", resumed);
    }

    let server = MessageServer::new(coordinator.clone() as Arc<dyn MessageHandler>);
    let bound = server.start(&config.listen).await?;
    tracing::info!("Participants can connect to {}", bound);

    // Periodic decision redelivery
    let sweeper_coordinator = coordinator.clone();
    let interval = Duration::from_millis(config.redelivery_interval_ms);
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let scheduled = sweeper_coordinator.redeliver_pending();
            if scheduled > 0 {
                tracing::debug!("Redelivery sweep scheduled {} deliveries", scheduled);
            }
        }
    });

    // Start HTTP control server
    let control = ControlServer::coordinator(coordinator.clone());
    let control_addr = config.control_addr.clone();
    let http_server = tokio::spawn(async move {
        if let Err(e) = control.run(&control_addr).await {
            tracing::error!("HTTP control server error: {}", e);
        }
    });

    tracing::info!("Coordinator running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    let stats = coordinator.stats();
    tracing::info!(
        "{} transactions started, {} committed, {} aborted",
        stats.transactions_started,
        stats.committed,
        stats.aborted
    );

    sweeper.abort();
    http_server.abort();
    server.shutdown();

    if let Err(e) = log.flush() {
        tracing::error!("Failed to flush log: {}", e);
    }

    tracing::info!("Coordinator stopped");

    Ok(())
}

/// Run in participant mode - vote on transactions and apply decisions
async fn run_participant(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting 3PC node {} - PARTICIPANT MODE", config.id);
    tracing::info!("  Protocol: {}", config.listen);
    tracing::info!("  HTTP control: {}", config.control_addr);
    tracing::info!("  Coordinator: {}", config.coordinator_addr);
    tracing::info!("  Termination: {:?}", config.termination);

    let policy = config.retry_policy();
    let log = open_log(&config)?;
    let participant = Arc::new(
        Participant::new(config.id.clone(), log.clone()).with_policy(policy.clone()),
    );
    participant.set_failure_rate(config.failure_rate);

    let in_doubt = participant.recover()?;
    if in_doubt > 0 {
        tracing::warn!("{} transactions in doubt after restart", in_doubt);
    }

    let server = MessageServer::new(participant.clone() as Arc<dyn MessageHandler>);
    let bound = server.start(&config.listen).await?;

    let client = Arc::new(CoordinatorClient::new(
        config.id.clone(),
        bound.to_string(),
        config.coordinator_addr.clone(),
        policy.ack_timeout,
    ));

    // Announce ourselves and catch up on anything decided while we were down
    match client.register().await {
        Ok(()) => match client.request_history().await {
            Ok(history) => {
                let converged = participant.apply_history(&history);
                tracing::info!("Applied {} outcomes from coordinator history", converged);
            }
            Err(e) => tracing::warn!("History request failed: {}", e),
        },
        Err(e) => tracing::warn!("Coordinator unreachable at startup: {}", e),
    }

    // Termination sources: the coordinator first, then the other participants
    let transport = Arc::new(WsTransport::new(policy.ack_timeout));
    let mut sources = vec![client.clone() as Arc<dyn OutcomeSource>];
    for (id, addr) in &config.participants {
        if id == &config.id {
            continue;
        }
        sources.push(Arc::new(PeerSource::new(
            ParticipantRecord::new(id.clone(), addr.clone()),
            transport.clone(),
        )) as Arc<dyn OutcomeSource>);
    }
    let monitor = tokio::spawn(run_termination_monitor(
        participant.clone(),
        sources,
        Duration::from_millis(config.termination_interval_ms),
    ));

    // Start HTTP control server
    let control = ControlServer::participant(ParticipantContext {
        participant: participant.clone(),
        coordinator: Some(client),
    });
    let control_addr = config.control_addr.clone();
    let http_server = tokio::spawn(async move {
        if let Err(e) = control.run(&control_addr).await {
            tracing::error!("HTTP control server error: {}", e);
        }
    });

    tracing::info!("Participant listening on {}. Press Ctrl+C to stop.", bound);

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down participant...");

    monitor.abort();
    http_server.abort();
    server.shutdown();

    if let Err(e) = log.flush() {
        tracing::error!("Failed to flush log: {}", e);
    }

    tracing::info!("Participant stopped");

    Ok(())
}
