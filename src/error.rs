//! Error types for the chaperoned gateway.
//!
//! Only process-scoped failures are errors in the `Result` sense: endpoint
//! resolution and binding the listener. Everything that goes wrong inside a
//! single client connection is reported as a
//! [`ConnectionOutcome`](crate::connection::ConnectionOutcome) and never
//! escapes the connection's supervisor.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while turning the configured endpoints into socket addresses.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// DNS or syntax failure while resolving an endpoint.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// The endpoint as written on the command line.
        endpoint: String,
        /// The underlying resolver error.
        #[source]
        source: io::Error,
    },

    /// The endpoint resolved, but to an empty address list.
    #[error("{endpoint} did not resolve to any address")]
    NoAddress {
        /// The endpoint as written on the command line.
        endpoint: String,
    },
}

/// Errors that abort the whole gateway process.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Endpoint configuration could not be resolved.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listening socket could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        addr: SocketAddr,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Any other I/O error on the listener itself.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for gateway-level operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
