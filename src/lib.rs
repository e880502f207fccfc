//! chaperoned - a TCP gateway that puts a guardian in front of a service.
//!
//! For every client connection the gateway dials both the protected service
//! (the *proxee*) and a policy service (the *guardian*). Client bytes are
//! forwarded to the proxee and mirrored, byte for byte, to the guardian. The
//! guardian answers with a one-byte verdict choosing whose response stream the
//! client gets:
//!
//! ```text
//!   +--------+        +------------+      +--------+
//!   | client |  --->  | chaperoned | ---> | proxee |
//!   +--------+        +------------+      +--------+
//!                           |
//!                           V
//!                      +----------+
//!                      | guardian |
//!                      +----------+
//! ```
//!
//! This lets a separate service gate access to an unmodified TCP service, for
//! example adding cookie-based session checks in front of a plain HTTP server.
//! Any ambiguity from the guardian closes the connection (fail-closed).
//!
//! # Modules
//!
//! - [`decision`]: the verdict byte protocol.
//! - [`connection`]: the per-connection supervisor and its workers.
//! - [`registry`]: the accept loop's table of live connections.
//! - [`server`]: listener bootstrap, accept loop, graceful shutdown.
//! - [`config`] / [`cli`]: endpoints and tuning.

pub mod cli;
pub mod config;
pub mod connection;
pub mod decision;
pub mod error;
pub mod registry;
pub mod server;
