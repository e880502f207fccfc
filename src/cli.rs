//! Command-line arguments for the `chaperoned` binary.
//!
//! Defined outside `main.rs` so that tests can build [`Args`] directly when
//! exercising endpoint resolution.

use clap::Parser;

/// TCP gateway that mirrors client traffic to a guardian and releases either
/// the proxee's or the guardian's response depending on the guardian's verdict.
#[derive(Parser, Debug, Clone)]
#[command(name = "chaperoned", version, about, long_about = None)]
pub struct Args {
    /// Address to bind to, e.g. localhost:8080.
    #[arg(long, env = "CHAPERONED_LISTEN", default_value = "localhost:8080")]
    pub listen: String,

    /// TCP service to be proxied, e.g. google.com:80.
    #[arg(long, env = "CHAPERONED_PROXEE", default_value = "google.com:80")]
    pub proxee: String,

    /// Address of the guardian, e.g. localhost:4321.
    #[arg(long, env = "CHAPERONED_GUARDIAN", default_value = "localhost:4321")]
    pub guardian: String,

    /// Emit log lines as JSON objects.
    #[arg(long, env = "CHAPERONED_LOG_JSON")]
    pub log_json: bool,

    /// Enable debug logging (overrides RUST_LOG).
    #[arg(short, long)]
    pub verbose: bool,
}
