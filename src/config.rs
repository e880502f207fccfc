//! Runtime configuration for the chaperoned gateway.
//!
//! Endpoints come from the command line (see [`crate::cli::Args`]) and are
//! resolved exactly once, at startup. Socket tuning knobs come from the
//! environment through [`TuningConfig::from_env`].

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::cli::Args;
use crate::error::ConfigError;

/// Default size of a single client read, in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Socket and lifecycle tuning.
///
/// All parameters can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningConfig {
    /// Size of each chunk read from the client and mirrored to the backends.
    pub read_buffer_size: usize,

    /// Enable TCP_NODELAY on client and backend sockets.
    pub tcp_nodelay: bool,

    /// TCP keepalive idle time in seconds (0 disables keepalive tuning).
    pub tcp_keepalive_secs: u64,

    /// How long a shutting-down gateway waits for open connections to finish
    /// before closing them.
    pub drain_timeout: Duration,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tcp_nodelay: true,
            tcp_keepalive_secs: 60,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl TuningConfig {
    /// Load tuning from environment variables with defaults.
    ///
    /// # Environment Variables
    ///
    /// - `CHAPERONED_READ_BUFFER_SIZE` (default: 2048, `0` means default)
    /// - `CHAPERONED_TCP_NODELAY` (default: true)
    /// - `CHAPERONED_TCP_KEEPALIVE_SECS` (default: 60)
    /// - `CHAPERONED_DRAIN_TIMEOUT_SECS` (default: 30)
    ///
    /// Values that fail to parse are ignored in favour of the default.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            read_buffer_size: std::env::var("CHAPERONED_READ_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(default.read_buffer_size),

            tcp_nodelay: std::env::var("CHAPERONED_TCP_NODELAY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_nodelay),

            tcp_keepalive_secs: std::env::var("CHAPERONED_TCP_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_keepalive_secs),

            drain_timeout: std::env::var("CHAPERONED_DRAIN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.drain_timeout),
        }
    }

    /// Apply NODELAY and keepalive settings to a connected stream.
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.tcp_nodelay)?;

        if self.tcp_keepalive_secs > 0 {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(self.tcp_keepalive_secs));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Fully resolved gateway configuration, shared by the accept loop and every
/// connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// The protected service.
    pub proxee: SocketAddr,
    /// The policy service issuing verdicts.
    pub guardian: SocketAddr,
    /// Socket and lifecycle tuning.
    pub tuning: TuningConfig,
}

impl GatewayConfig {
    /// Resolve the three endpoints named in `args`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any endpoint fails to resolve. The caller is
    /// expected to abort startup.
    pub async fn resolve(args: &Args, tuning: TuningConfig) -> Result<Self, ConfigError> {
        let listen = resolve_endpoint(&args.listen).await?;
        let guardian = resolve_endpoint(&args.guardian).await?;
        let proxee = resolve_endpoint(&args.proxee).await?;

        Ok(Self {
            listen,
            proxee,
            guardian,
            tuning,
        })
    }
}

/// Resolve a `host:port` endpoint to its first socket address.
///
/// # Errors
///
/// [`ConfigError::Resolve`] when the lookup fails, [`ConfigError::NoAddress`]
/// when it succeeds with no results.
pub async fn resolve_endpoint(endpoint: &str) -> Result<SocketAddr, ConfigError> {
    let mut addrs = tokio::net::lookup_host(endpoint)
        .await
        .map_err(|source| ConfigError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| ConfigError::NoAddress {
        endpoint: endpoint.to_string(),
    })
}
