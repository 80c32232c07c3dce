//! Chat sync simulator binary.
//!
//! Runs a scripted session against the in-memory backend in virtual time
//! and logs every connection state transition.
//!
//! # Usage
//!
//! ```bash
//! # Default scenario
//! chatsync-sim
//!
//! # Different seed, aggressive drops, verbose logs
//! chatsync-sim --seed 7 --drop-every 2 --log-level debug
//! ```

mod scenario;

use std::time::Duration;

use chatsync_app::SessionConfig;
use chatsync_client::{DEFAULT_MAX_SEND_ATTEMPTS, DEFAULT_OUTBOX_CAPACITY};
use clap::Parser;
use scenario::ScenarioConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat sync simulator
#[derive(Parser, Debug)]
#[command(name = "chatsync-sim")]
#[command(about = "Run a scripted chat sync session against a simulated backend")]
#[command(version)]
struct Args {
    /// Seed for the simulated environment
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value = "1000")]
    base_delay_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[arg(long, default_value = "30000")]
    max_delay_ms: u64,

    /// Sends held while disconnected
    #[arg(long, default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    outbox_capacity: usize,

    /// Transmissions per send before it fails
    #[arg(long, default_value_t = DEFAULT_MAX_SEND_ATTEMPTS)]
    max_send_attempts: u32,

    /// Messages received and replies sent
    #[arg(short, long, default_value = "20")]
    messages: usize,

    /// Drop the connection after every N replies (0 never drops)
    #[arg(long, default_value = "5")]
    drop_every: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn scenario(&self) -> ScenarioConfig {
        let mut session = SessionConfig::default();
        session.connection.base_delay = Duration::from_millis(self.base_delay_ms);
        session.connection.max_delay = Duration::from_millis(self.max_delay_ms);
        session.reconciler.outbox_capacity = self.outbox_capacity;
        session.reconciler.max_send_attempts = self.max_send_attempts;

        ScenarioConfig { seed: self.seed, session, messages: self.messages, drop_every: self.drop_every }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    // Backoff and timeouts elapse in virtual time
    tokio::time::pause();

    tracing::info!(seed = args.seed, messages = args.messages, "chatsync simulation starting");

    let report = scenario::run(args.scenario()).await?;

    tracing::info!(
        connects = report.connects,
        disconnects = report.disconnects,
        received = report.received,
        delivered = report.delivered,
        failed = report.failed,
        dropped = report.health.dropped_sends,
        violations = report.violations,
        "simulation finished"
    );

    if report.violations > 0 {
        return Err(format!("{} invariant violations", report.violations).into());
    }
    Ok(())
}
