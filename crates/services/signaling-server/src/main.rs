//! Signaling server binary entry point
//!
//! Pairs clients into rooms, assigns negotiation roles, and relays
//! negotiation envelopes and captions over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080)
//! cargo run -p captionroom-signaling-server
//!
//! # Custom address, room size and JSON logs
//! cargo run -p captionroom-signaling-server -- \
//!   --bind-address 127.0.0.1:9000 \
//!   --room-capacity 4 \
//!   --json-logs
//! ```

use anyhow::Context;
use captionroom_signaling::{SignalingServerConfig, WebSocketSignalingServer};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// captionroom signaling server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "CAPTIONROOM_BIND")]
    bind_address: String,

    /// Sessions admitted per room; members past the second get captions only
    #[arg(long, default_value_t = 2, env = "CAPTIONROOM_ROOM_CAPACITY")]
    room_capacity: usize,

    /// Largest caption text accepted, in bytes
    #[arg(long, default_value_t = 4096, env = "CAPTIONROOM_MAX_CAPTION_BYTES")]
    max_caption_bytes: usize,

    /// Largest negotiation payload accepted, in bytes
    #[arg(long, default_value_t = 65536, env = "CAPTIONROOM_MAX_PAYLOAD_BYTES")]
    max_payload_bytes: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "CAPTIONROOM_JSON_LOGS")]
    json_logs: bool,
}

impl Args {
    fn server_config(&self) -> SignalingServerConfig {
        SignalingServerConfig {
            bind_address: self.bind_address.clone(),
            room_capacity: self.room_capacity,
            max_caption_bytes: self.max_caption_bytes,
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_secs(5));
            eprintln!("Graceful shutdown timed out, forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.json_logs)?;

    let config = args.server_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        room_capacity = config.room_capacity,
        max_caption_bytes = config.max_caption_bytes,
        max_payload_bytes = config.max_payload_bytes,
        "captionroom signaling server starting"
    );

    let server = WebSocketSignalingServer::new(config).context("Invalid server configuration")?;
    let hub = server.hub();
    let handle = server
        .start()
        .await
        .context("Failed to start WebSocket server")?;

    info!("Listening on ws://{}. Press Ctrl+C to shutdown.", handle.local_addr());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!(
        rooms = hub.registry().room_count(),
        sessions = hub.registry().session_count(),
        connections = hub.mediator().connection_count(),
        "Shutdown signal received, closing connections"
    );
    handle.shutdown().await;
    info!("Signaling server shut down gracefully");

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    Ok(())
}
