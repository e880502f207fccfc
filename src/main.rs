//! chaperoned entry point.
//!
//! Resolves the configured endpoints, binds the listener and runs the accept
//! loop until SIGINT/SIGTERM.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use chaperoned::cli::Args;
use chaperoned::config::{GatewayConfig, TuningConfig};
use chaperoned::error::GatewayError;
use chaperoned::server;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = run(args).await {
        error!(error = %e, "chaperoned failed");
        eprintln!("chaperoned: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), GatewayError> {
    let tuning = TuningConfig::from_env();
    let config = GatewayConfig::resolve(&args, tuning).await?;

    info!(
        listen = %config.listen,
        proxee = %config.proxee,
        guardian = %config.guardian,
        read_buffer_size = config.tuning.read_buffer_size,
        tcp_nodelay = config.tuning.tcp_nodelay,
        tcp_keepalive_secs = config.tuning.tcp_keepalive_secs,
        drain_timeout_secs = config.tuning.drain_timeout.as_secs(),
        "chaperoned starting"
    );

    let listener = server::bind(config.listen).await?;
    let summary = server::serve(listener, Arc::new(config), server::shutdown_signal()).await?;

    info!(
        accepted = summary.accepted,
        completed = summary.completed,
        aborted = summary.aborted,
        "chaperoned stopped"
    );
    Ok(())
}

/// Initialise the tracing subscriber on stderr.
///
/// `--verbose` forces the `debug` filter; otherwise `RUST_LOG` is honoured,
/// defaulting to `info`.
fn init_tracing(args: &Args) {
    use tracing_subscriber::EnvFilter;

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
