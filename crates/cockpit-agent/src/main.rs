//! Cockpit agent binary: runs the voice agent worker.
//!
//! Loads `.env`, reads the worker configuration from the environment, prewarms
//! the VAD and then serves jobs until SIGINT/SIGTERM.

use clap::{Parser, Subcommand};
use cockpit_agent::{
    AgentConfig, AgentError, EnergyVadLoader, GeminiConnector, JobRequest, LiveKitRoomConnector,
    LoggingConfig, RoomWatcher, VoiceAgent, Worker, WorkerOptions, JOB_QUEUE_CAPACITY,
};
use cockpit_voice::{shutdown_signal, VoiceError, VoiceService};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cockpit-agent", version, about = "Voice agent worker for the avatar cockpit")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch LiveKit and join every room that gains participants (default)
    Start,
    /// Join a single room and exit when its job ends
    Connect {
        /// Room to join
        #[arg(long)]
        room: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&LoggingConfig::from_env());

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    if let Err(e) = run(cli).await {
        tracing::error!("agent worker failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let config = AgentConfig::from_env()?;
    tracing::info!(
        url = %config.worker.ws_url,
        model = %config.session.model,
        voice = %config.session.voice,
        concurrency = config.worker.concurrency,
        "starting cockpit agent"
    );

    let service = Arc::new(VoiceService::new(config.livekit()));
    if !service.has_credentials() {
        return Err(VoiceError::MissingCredentials.into());
    }
    if config.session.api_key.is_none() {
        tracing::warn!("no GOOGLE_API_KEY or GOOGLE_GENAI_API_KEY set; sessions will fail to connect");
    }

    let rooms = Arc::new(LiveKitRoomConnector::new(Arc::clone(&service)));
    let agent = Arc::new(VoiceAgent::new(
        config.session.clone(),
        Arc::new(GeminiConnector::default()),
        Arc::new(EnergyVadLoader::default()),
    ));
    let worker = Worker::new(agent, rooms, WorkerOptions::new(config.worker.concurrency)).await?;

    let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    match cli.command.unwrap_or(Command::Start) {
        Command::Start => {
            let watcher = RoomWatcher::new(service, config.worker.room_poll_interval);
            tokio::spawn(watcher.run(jobs_tx));
        }
        Command::Connect { room } => {
            jobs_tx
                .send(JobRequest::for_room(room))
                .await
                .map_err(|_| AgentError::Config("job queue closed".to_string()))?;
            // Closing the queue lets the worker exit once this job ends.
            drop(jobs_tx);
        }
    }

    worker.run(jobs_rx, shutdown_signal()).await;
    tracing::info!("cockpit agent shut down");
    Ok(())
}
