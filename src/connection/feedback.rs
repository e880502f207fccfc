//! Worker → supervisor signalling.
//!
//! Every worker holds a clone of [`FeedbackTx`]. The channel is bounded at
//! [`FEEDBACK_CAPACITY`], one slot per worker that can report at the same
//! time, so a worker never blocks on reporting after the supervisor has
//! already stopped listening.

use std::fmt;

use tokio::sync::mpsc;

use crate::decision::Backend;

use super::ConnectionId;

/// Client reader, decision reader, writer (guardian branch), writer (proxee
/// branch) and the active response pump.
pub const FEEDBACK_CAPACITY: usize = 5;

/// Which worker raised a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    /// Reads client bytes and hands them to the writer.
    ClientReader,
    /// Reads the one-byte verdict from the guardian.
    DecisionReader,
    /// Mirrors client bytes to the guardian and forwards them to the proxee.
    StreamWriter,
    /// Copies the selected backend's response to the client.
    ResponsePump(Backend),
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientReader => write!(f, "client_reader"),
            Self::DecisionReader => write!(f, "decision_reader"),
            Self::StreamWriter => write!(f, "stream_writer"),
            Self::ResponsePump(backend) => write!(f, "{backend}_pump"),
        }
    }
}

/// What the supervisor is being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// The connection cannot continue.
    FatalError,
    /// Stop mirroring client data to the guardian; the proxee path continues.
    DegradeGuardian,
}

/// A signal from a worker to its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerFeedback {
    pub source: Worker,
    pub kind: FeedbackKind,
}

/// Sending side of a connection's feedback channel.
#[derive(Debug, Clone)]
pub struct FeedbackTx {
    conn_id: ConnectionId,
    tx: mpsc::Sender<WorkerFeedback>,
}

impl FeedbackTx {
    /// Report a fatal condition.
    pub async fn fatal(&self, source: Worker) {
        self.report(WorkerFeedback {
            source,
            kind: FeedbackKind::FatalError,
        })
        .await;
    }

    /// Ask the supervisor to stop guardian mirroring.
    pub async fn degrade_guardian(&self) {
        self.report(WorkerFeedback {
            source: Worker::StreamWriter,
            kind: FeedbackKind::DegradeGuardian,
        })
        .await;
    }

    async fn report(&self, feedback: WorkerFeedback) {
        // A closed channel means the supervisor is already tearing down.
        if self.tx.send(feedback).await.is_err() {
            tracing::debug!(
                conn_id = %self.conn_id,
                source = %feedback.source,
                "supervisor gone, feedback dropped"
            );
        }
    }
}

/// Create the bounded feedback channel for one connection.
pub fn feedback_channel(conn_id: ConnectionId) -> (FeedbackTx, mpsc::Receiver<WorkerFeedback>) {
    let (tx, rx) = mpsc::channel(FEEDBACK_CAPACITY);
    (FeedbackTx { conn_id, tx }, rx)
}
