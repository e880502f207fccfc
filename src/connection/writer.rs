//! Stream writer: the only task that writes to the backend sockets.
//!
//! Each client chunk is written in full to the guardian (while mirroring is
//! on) and then in full to the proxee (while forwarding is on) before the next
//! chunk is taken, so both backends see the client's bytes in order.
//!
//! A guardian write failure only disables mirroring. A proxee write failure
//! ends the connection.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::decision::Backend;

use super::ConnectionId;
use super::feedback::{FeedbackTx, Worker};

/// Consecutive zero-length writes tolerated before a write is declared stalled.
pub const MAX_ZERO_LENGTH_WRITES: usize = 3;

/// Which backends still receive client data.
///
/// The supervisor owns the authoritative value and publishes it through a
/// `watch` channel; the writer only ever turns paths off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePaths {
    pub guardian: bool,
    pub proxee: bool,
}

impl WritePaths {
    /// Both paths enabled, the state of every new connection.
    pub const BOTH: Self = Self {
        guardian: true,
        proxee: true,
    };

    #[must_use]
    pub fn is_enabled(&self, backend: Backend) -> bool {
        match backend {
            Backend::Guardian => self.guardian,
            Backend::Proxee => self.proxee,
        }
    }

    pub fn disable(&mut self, backend: Backend) {
        match backend {
            Backend::Guardian => self.guardian = false,
            Backend::Proxee => self.proxee = false,
        }
    }

    /// At least one backend still receives client data.
    #[must_use]
    pub fn any(&self) -> bool {
        self.guardian || self.proxee
    }
}

/// Result of pushing one chunk down one path.
enum PathWrite {
    Written,
    /// The supervisor turned the path off before or during the write.
    Disabled,
    Failed(io::Error),
}

/// Owns the write halves of both backend sockets.
pub(crate) struct StreamWriter<W> {
    conn_id: ConnectionId,
    guardian_tx: Option<W>,
    proxee_tx: Option<W>,
    paths: watch::Receiver<WritePaths>,
    feedback: FeedbackTx,
}

impl<W> StreamWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        conn_id: ConnectionId,
        guardian_tx: W,
        proxee_tx: W,
        paths: watch::Receiver<WritePaths>,
        feedback: FeedbackTx,
    ) -> Self {
        Self {
            conn_id,
            guardian_tx: Some(guardian_tx),
            proxee_tx: Some(proxee_tx),
            paths,
            feedback,
        }
    }

    /// Consume client chunks until the client is done or no path is left.
    pub(crate) async fn run(mut self, mut buffers: mpsc::Receiver<Bytes>) {
        let conn_id = self.conn_id;

        loop {
            self.sync_paths();
            if self.guardian_tx.is_none() && self.proxee_tx.is_none() {
                tracing::debug!(%conn_id, "both write paths disabled");
                break;
            }

            let chunk = tokio::select! {
                biased;
                changed = self.paths.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                chunk = buffers.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => {
                        tracing::debug!(%conn_id, "client input exhausted");
                        break;
                    }
                },
            };

            match self.write_path(Backend::Guardian, &chunk).await {
                PathWrite::Written => {}
                PathWrite::Disabled => self.close_path(Backend::Guardian),
                PathWrite::Failed(e) => {
                    tracing::warn!(%conn_id, error = %e, "failed to write to guardian, mirroring disabled");
                    self.close_path(Backend::Guardian);
                    self.feedback.degrade_guardian().await;
                }
            }

            match self.write_path(Backend::Proxee, &chunk).await {
                PathWrite::Written => {}
                PathWrite::Disabled => self.close_path(Backend::Proxee),
                PathWrite::Failed(e) => {
                    tracing::warn!(%conn_id, error = %e, "failed to write to proxee");
                    self.feedback.fatal(Worker::StreamWriter).await;
                    break;
                }
            }
        }

        tracing::debug!(%conn_id, "stream writer returned");
    }

    /// Drop the write half of every path the supervisor has turned off.
    fn sync_paths(&mut self) {
        let paths = *self.paths.borrow_and_update();
        for backend in [Backend::Guardian, Backend::Proxee] {
            if !paths.is_enabled(backend) {
                self.close_path(backend);
            }
        }
    }

    fn close_path(&mut self, backend: Backend) {
        let sink = match backend {
            Backend::Guardian => self.guardian_tx.take(),
            Backend::Proxee => self.proxee_tx.take(),
        };
        if sink.is_some() {
            tracing::debug!(conn_id = %self.conn_id, %backend, "write path closed");
        }
    }

    /// Write `chunk` to one backend, abandoning the write if the supervisor
    /// disables that path meanwhile.
    async fn write_path(&mut self, backend: Backend, chunk: &[u8]) -> PathWrite {
        let sink = match backend {
            Backend::Guardian => self.guardian_tx.as_mut(),
            Backend::Proxee => self.proxee_tx.as_mut(),
        };
        let Some(sink) = sink else {
            return PathWrite::Written;
        };
        let paths = &mut self.paths;

        tokio::select! {
            biased;
            _ = async { paths.wait_for(|p| !p.is_enabled(backend)).await.map(|_| ()) } => {
                PathWrite::Disabled
            }
            result = write_chunk(sink, chunk) => match result {
                Ok(()) => PathWrite::Written,
                Err(e) => PathWrite::Failed(e),
            },
        }
    }
}

/// Write the whole of `chunk`, advancing an offset across short writes.
///
/// A write that accepts zero bytes is retried up to
/// [`MAX_ZERO_LENGTH_WRITES`] times in a row before failing with
/// [`io::ErrorKind::WriteZero`].
pub(crate) async fn write_chunk<W>(sink: &mut W, chunk: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut offset = 0;
    let mut zero_writes = 0;

    while offset < chunk.len() {
        match sink.write(&chunk[offset..]).await? {
            0 => {
                zero_writes += 1;
                tracing::debug!(offset, zero_writes, "backend accepted zero bytes");
                if zero_writes >= MAX_ZERO_LENGTH_WRITES {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "backend stalled on zero-length writes",
                    ));
                }
                tokio::task::yield_now().await;
            }
            written => {
                offset += written;
                zero_writes = 0;
            }
        }
    }

    sink.flush().await
}
