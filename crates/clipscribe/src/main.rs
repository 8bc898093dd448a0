//! Submit a video link for transcription and print the result.
//!
//! Reads the service bearer token from the `CLIPSCRIBE_TOKEN` environment
//! variable, if set.
//!
//! # Examples
//!
//! ```sh
//! # Transcribe a TikTok with one free use available
//! clipscribe submit "https://vm.tiktok.com/ZMabc123/" --free-uses 1
//!
//! # Paid analysis tier against a custom backend, with diagnostics
//! clipscribe submit "https://youtu.be/dQw4w9WgXcQ" --tier ai-analysis \
//!   --credits 5 --service-url https://api.example.com --diagnostics
//!
//! # Check what a pasted link normalizes to
//! clipscribe check "watch this https://www.youtube.com/watch?v=dQw4w9WgXcQ&si=abc"
//! ```
//!
//! Ctrl-C cancels a running flow; any reserved credit is released.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use clipscribe::prelude::*;
use clipscribe::timeline::OperationStep;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "clipscribe", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one transcription flow for a link
    Submit(SubmitArgs),
    /// Validate and normalize a link without contacting the service
    Check {
        /// Link or shared text containing a link
        url: String,
    },
}

#[derive(clap::Args)]
struct SubmitArgs {
    /// Link or shared text containing a link
    url: String,

    /// Processing tier
    #[arg(long, value_enum, default_value_t = TierArg::QuickScan)]
    tier: TierArg,

    // ── Service ────────────────────────────────────────────────
    /// Transcription service root URL
    #[arg(long, default_value = clipscribe::DEFAULT_SERVICE_URL)]
    service_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    // ── Account ────────────────────────────────────────────────
    /// Free uses available to this run
    #[arg(long, default_value_t = 0)]
    free_uses: u32,

    /// Credit balance available to this run
    #[arg(long, default_value_t = 0)]
    credits: u32,

    // ── Polling ────────────────────────────────────────────────
    /// Maximum status polls before giving up
    #[arg(long, default_value_t = 20)]
    max_polls: u32,

    /// Delay between status polls in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    // ── Output ─────────────────────────────────────────────────
    /// Print the diagnostic report after the flow ends
    #[arg(long)]
    diagnostics: bool,

    /// Suppress progress lines on stderr
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    QuickScan,
    AiAnalysis,
}

impl From<TierArg> for Tier {
    fn from(t: TierArg) -> Self {
        match t {
            TierArg::QuickScan => Tier::QuickScan,
            TierArg::AiAnalysis => Tier::AiAnalysis,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn progress_printer() -> impl EventHandler {
    FnEventHandler::new(|event| match event {
        OrchestratorEvent::StateChanged { to, .. } => eprintln!("  [{to}]"),
        OrchestratorEvent::TimelineAppended { entry, .. } if entry.step == OperationStep::Polling => {
            if let (Some(n), Some(max)) = (entry.polling_attempt, entry.max_polling_attempts) {
                eprintln!(
                    "  [poll {n}/{max}] {}",
                    entry.received.as_deref().unwrap_or("-")
                );
            }
        }
        _ => {}
    })
}

async fn run_submit(args: SubmitArgs) -> Result<(), String> {
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
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with_if(!args.quiet, progress_printer());
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(service), ledger.clone(), config).with_event_handler(handler),
    );

    let on_interrupt = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Cancelling...");
            on_interrupt.cancel();
        }
    });

    let outcome = orchestrator.submit(&args.url, args.tier.into()).await;
    let account = ledger.account();
    eprintln!(
        "  Account: {} free use(s), {} credit(s)",
        account.free_uses_remaining, account.credit_balance
    );
    if args.diagnostics {
        eprintln!("{}", orchestrator.formatted_text());
    }

    match outcome {
        Submission::Finished(OrchestratorResult::Success {
            transcript,
            language,
            confidence,
            ..
        }) => {
            if let Some(lang) = language {
                eprintln!("  Language: {lang}");
            }
            if let Some(c) = confidence {
                eprintln!("  Confidence: {:.0}%", c * 100.0);
            }
            println!("{transcript}");
            Ok(())
        }
        Submission::Finished(OrchestratorResult::Failure {
            reason,
            error_category,
            retryable,
            log_id,
        }) => {
            let hint = if retryable { " (retryable)" } else { "" };
            let log = log_id.map(|id| format!(" [log {id}]")).unwrap_or_default();
            Err(format!("{error_category}{hint}: {reason}{log}"))
        }
        Submission::Cancelled(_) => Err("cancelled".to_string()),
        Submission::Rejected(snapshot) => Err(format!("rejected: {}", snapshot.status_line())),
    }
}

fn run_check(url: &str) -> Result<(), String> {
    let normalized = normalize(url);
    let json = serde_json::to_string_pretty(&normalized)
        .map_err(|e| format!("failed to serialize result: {e}"))?;
    println!("{json}");
    if normalized.is_valid {
        Ok(())
    } else {
        Err(normalized
            .error_message
            .unwrap_or_else(|| "invalid URL".to_string()))
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Submit(args) => run_submit(args).await,
        Command::Check { url } => run_check(&url),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
