//! Serve a clipscribe orchestrator over HTTP and WebSocket.
//!
//! # Usage
//!
//! ```bash
//! CLIPSCRIBE_TOKEN=... cargo run -p clipscribe-web -- --free-uses 3 --credits 10
//! cargo run -p clipscribe-web -- --port 8080 --service-url https://api.example.com
//! ```
//!
//! ## Driving a flow
//!
//! **REST**:
//! ```bash
//! curl -X POST localhost:3001/api/submit -H 'content-type: application/json' \
//!   -d '{"url": "https://youtu.be/dQw4w9WgXcQ", "tier": "QUICK_SCAN"}'
//! curl localhost:3001/api/state
//! curl -X POST localhost:3001/api/control -d '{"action": "dismiss"}' \
//!   -H 'content-type: application/json'
//! ```
//!
//! **WebSocket** (connect to `/ws`):
//! ```json
//! {"type": "submit", "url": "https://vm.tiktok.com/ZMabc123/"}
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clipscribe::prelude::*;
use clipscribe_web::{WebBroadcastHandler, WebConfig, WsMessage, spawn_web};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// HTTP control surface for the transcription orchestrator.
#[derive(Parser)]
#[command(name = "clipscribe-web", version)]
struct Args {
    /// Port for the web server.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Transcription service root URL.
    #[arg(long, default_value = clipscribe::DEFAULT_SERVICE_URL)]
    service_url: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Free uses available for the lifetime of the server.
    #[arg(long, default_value_t = 0)]
    free_uses: u32,

    /// Credit balance available for the lifetime of the server.
    #[arg(long, default_value_t = 0)]
    credits: u32,

    /// Maximum status polls per flow.
    #[arg(long, default_value_t = 20)]
    max_polls: u32,

    /// Delay between status polls in milliseconds.
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Directory of static frontend files to serve at `/`.
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args) -> Result<(), String> {
    let service = HttpTranscriptionService::new(
        HttpServiceConfig::default()
            .with_base_url(&args.service_url)
            .with_api_token_opt(std::env::var(clipscribe::TOKEN_ENV_VAR).ok())
            .with_timeout(Duration::from_secs(args.timeout_secs)),
    )?;
    let ledger = Arc::new(CreditLedger::new(args.free_uses, args.credits));
    let config = OrchestratorConfig::default()
        .with_max_polling_attempts(args.max_polls)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_request_timeout(Duration::from_secs(args.timeout_secs));

    let (ws_tx, _) = tokio::sync::broadcast::channel::<WsMessage>(256);
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(WebBroadcastHandler::new(ws_tx.clone()));
    let orchestrator =
        Arc::new(Orchestrator::new(Arc::new(service), ledger, config).with_event_handler(handler));

    let web_config = WebConfig {
        bind_addr: ([127, 0, 0, 1], args.port).into(),
        static_dir: args.static_dir,
    };
    let addr = spawn_web(orchestrator.clone(), ws_tx, web_config)
        .await
        .map_err(|e| format!("failed to bind web server: {e}"))?;
    println!("Control surface: http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for Ctrl-C: {e}"))?;
    if orchestrator.cancel() {
        eprintln!("Cancelling active flow...");
        // Give the flow a moment to refund its hold.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run(Args::parse()).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
