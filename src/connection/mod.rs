//! Per-connection supervisor.
//!
//! Every accepted client gets one supervisor, which dials the proxee and the
//! guardian and then runs this state machine:
//!
//! ```text
//! Dialing ─► Negotiating ─┬─► Forwarding(proxee)   ─┐
//!                         ├─► Forwarding(guardian) ─┼─► Closed
//!                         └─► Terminated(error) ────┘
//! ```
//!
//! While negotiating, client bytes go to both backends and the guardian owes
//! us a one-byte verdict. The verdict disables the losing write path, closes
//! the losing backend and starts the matching [response pump](pump).
//!
//! # Socket ownership
//!
//! Every socket is split into read and write halves and each half is moved
//! into exactly one worker:
//!
//! | Half           | Owner                                            |
//! |----------------|--------------------------------------------------|
//! | client read    | client reader                                    |
//! | client write   | supervisor, then the response pump               |
//! | guardian read  | decision reader, then supervisor, then pump      |
//! | guardian write | stream writer                                    |
//! | proxee read    | supervisor, then the proxee pump                 |
//! | proxee write   | stream writer                                    |
//!
//! No two tasks ever touch the same direction of a socket, so no locks are
//! needed. Closing a socket means dropping its halves; tearing the connection
//! down aborts every worker, which drops whatever halves they still hold.

mod client_reader;
mod decision_reader;
pub mod feedback;
mod pump;
pub mod writer;

use std::fmt;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use crate::config::GatewayConfig;
use crate::decision::{Backend, GuardianDecision};

use client_reader::client_reader;
use decision_reader::{DecisionReport, decision_reader};
use feedback::{FeedbackKind, FeedbackTx, WorkerFeedback, feedback_channel};
use pump::response_pump;
use writer::StreamWriter;

pub use feedback::{FEEDBACK_CAPACITY, Worker};
pub use writer::{MAX_ZERO_LENGTH_WRITES, WritePaths};

/// Client chunks in flight between the client reader and the stream writer.
///
/// Kept at one so a busy writer throttles the client.
const CLIENT_BUFFERS_CAPACITY: usize = 1;

/// Ordinal assigned by the accept loop, used as registry key and log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// A backend could not be reached; no worker was started.
    DialFailed(Backend),
    /// The guardian's verdict was missing or invalid.
    Rejected,
    /// A worker reported a fatal error.
    WorkerFailed(Worker),
    /// Neither backend receives client data any more.
    PathsExhausted,
    /// Every worker exited without reporting a fatal error.
    WorkersFinished,
}

impl fmt::Display for ConnectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DialFailed(backend) => write!(f, "dial_failed({backend})"),
            Self::Rejected => write!(f, "rejected"),
            Self::WorkerFailed(worker) => write!(f, "worker_failed({worker})"),
            Self::PathsExhausted => write!(f, "paths_exhausted"),
            Self::WorkersFinished => write!(f, "workers_finished"),
        }
    }
}

/// Run one client connection to completion.
///
/// Dials the proxee and then the guardian, negotiates, forwards, and returns
/// only after every socket belonging to the connection has been closed.
pub async fn handle_connection(
    conn_id: ConnectionId,
    client: TcpStream,
    config: &GatewayConfig,
) -> ConnectionOutcome {
    let outcome = match dial_backends(conn_id, config).await {
        Ok((proxee, guardian)) => {
            let (supervisor, feedback_rx, decision_rx) = Supervisor::start(
                conn_id,
                client,
                proxee,
                guardian,
                config.tuning.read_buffer_size,
            );
            supervisor.run(feedback_rx, decision_rx).await
        }
        Err(backend) => ConnectionOutcome::DialFailed(backend),
    };

    tracing::info!(%conn_id, %outcome, "connection closed");
    outcome
}

/// Connect to the proxee, then the guardian. Either failure is final.
async fn dial_backends(
    conn_id: ConnectionId,
    config: &GatewayConfig,
) -> Result<(TcpStream, TcpStream), Backend> {
    let proxee = dial(conn_id, Backend::Proxee, config).await?;
    let guardian = dial(conn_id, Backend::Guardian, config).await?;
    Ok((proxee, guardian))
}

async fn dial(
    conn_id: ConnectionId,
    backend: Backend,
    config: &GatewayConfig,
) -> Result<TcpStream, Backend> {
    let addr = match backend {
        Backend::Proxee => config.proxee,
        Backend::Guardian => config.guardian,
    };

    tracing::debug!(%conn_id, %backend, %addr, "connecting");
    let stream = TcpStream::connect(addr).await.map_err(|e| {
        tracing::warn!(%conn_id, %backend, %addr, error = %e, "failed to connect");
        backend
    })?;

    if let Err(e) = config.tuning.apply(&stream) {
        tracing::warn!(%conn_id, %backend, error = %e, "failed to configure socket");
    }
    Ok(stream)
}

/// Halves parked by the supervisor until the verdict picks a pump.
struct PendingPump {
    client_tx: OwnedWriteHalf,
    proxee_rx: OwnedReadHalf,
    feedback: FeedbackTx,
}

struct Supervisor {
    conn_id: ConnectionId,
    paths: WritePaths,
    paths_tx: watch::Sender<WritePaths>,
    decision: Option<GuardianDecision>,
    pending_pump: Option<PendingPump>,
    workers: JoinSet<()>,
}

impl Supervisor {
    /// Split the sockets, wire the channels and start the three negotiation
    /// workers.
    fn start(
        conn_id: ConnectionId,
        client: TcpStream,
        proxee: TcpStream,
        guardian: TcpStream,
        read_buffer_size: usize,
    ) -> (
        Self,
        mpsc::Receiver<WorkerFeedback>,
        oneshot::Receiver<DecisionReport<OwnedReadHalf>>,
    ) {
        let (client_rx, client_tx) = client.into_split();
        let (proxee_rx, proxee_tx) = proxee.into_split();
        let (guardian_rx, guardian_tx) = guardian.into_split();

        let (feedback, feedback_rx) = feedback_channel(conn_id);
        let (buffers_tx, buffers_rx) = mpsc::channel(CLIENT_BUFFERS_CAPACITY);
        let (decision_tx, decision_rx) = oneshot::channel();
        let (paths_tx, paths_rx) = watch::channel(WritePaths::BOTH);

        let mut workers = JoinSet::new();
        workers.spawn(client_reader(
            conn_id,
            client_rx,
            read_buffer_size,
            buffers_tx,
            feedback.clone(),
        ));
        workers.spawn(decision_reader(conn_id, guardian_rx, decision_tx));
        workers.spawn(
            StreamWriter::new(conn_id, guardian_tx, proxee_tx, paths_rx, feedback.clone())
                .run(buffers_rx),
        );

        let supervisor = Self {
            conn_id,
            paths: WritePaths::BOTH,
            paths_tx,
            decision: None,
            pending_pump: Some(PendingPump {
                client_tx,
                proxee_rx,
                feedback,
            }),
            workers,
        };
        (supervisor, feedback_rx, decision_rx)
    }

    async fn run(
        mut self,
        mut feedback_rx: mpsc::Receiver<WorkerFeedback>,
        mut decision_rx: oneshot::Receiver<DecisionReport<OwnedReadHalf>>,
    ) -> ConnectionOutcome {
        let outcome = loop {
            let ended = tokio::select! {
                report = &mut decision_rx, if self.decision.is_none() => self.on_decision(report),
                feedback = feedback_rx.recv() => match feedback {
                    Some(feedback) => self.on_feedback(feedback),
                    None => Some(ConnectionOutcome::WorkersFinished),
                },
            };

            if let Some(outcome) = ended {
                break outcome;
            }
            if !self.paths.any() {
                break ConnectionOutcome::PathsExhausted;
            }
        };

        self.teardown().await;
        outcome
    }

    fn on_decision(
        &mut self,
        report: Result<DecisionReport<OwnedReadHalf>, oneshot::error::RecvError>,
    ) -> Option<ConnectionOutcome> {
        let conn_id = self.conn_id;

        let Ok(DecisionReport {
            decision,
            guardian_rx,
        }) = report
        else {
            tracing::warn!(%conn_id, "decision reader exited without a verdict");
            self.decision = Some(GuardianDecision::Error);
            return Some(ConnectionOutcome::Rejected);
        };

        self.decision = Some(decision);
        tracing::info!(%conn_id, %decision, "guardian verdict");

        let Some(winner) = decision.selected_backend() else {
            return Some(ConnectionOutcome::Rejected);
        };
        let Some(PendingPump {
            client_tx,
            proxee_rx,
            feedback,
        }) = self.pending_pump.take()
        else {
            return None;
        };

        self.disable(winner.other());
        match winner {
            Backend::Proxee => {
                drop(guardian_rx);
                self.workers.spawn(response_pump(
                    conn_id,
                    Backend::Proxee,
                    proxee_rx,
                    client_tx,
                    feedback,
                ));
            }
            Backend::Guardian => {
                drop(proxee_rx);
                self.workers.spawn(response_pump(
                    conn_id,
                    Backend::Guardian,
                    guardian_rx,
                    client_tx,
                    feedback,
                ));
            }
        }
        None
    }

    fn on_feedback(&mut self, feedback: WorkerFeedback) -> Option<ConnectionOutcome> {
        match feedback.kind {
            FeedbackKind::FatalError => {
                tracing::debug!(conn_id = %self.conn_id, source = %feedback.source, "fatal worker feedback");
                Some(ConnectionOutcome::WorkerFailed(feedback.source))
            }
            FeedbackKind::DegradeGuardian => {
                tracing::info!(conn_id = %self.conn_id, "no longer mirroring to guardian");
                self.disable(Backend::Guardian);
                None
            }
        }
    }

    /// Turn a write path off and tell the stream writer.
    fn disable(&mut self, backend: Backend) {
        self.paths.disable(backend);
        self.paths_tx.send_replace(self.paths);
    }

    /// Abort the remaining workers and wait for them, which drops every socket
    /// half they own. Halves still parked here drop with `self`.
    async fn teardown(mut self) {
        self.workers.shutdown().await;
        tracing::debug!(conn_id = %self.conn_id, "connection workers stopped");
    }
}
