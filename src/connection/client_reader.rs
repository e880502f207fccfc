//! Client reader: turns client socket reads into buffers for the writer.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use super::ConnectionId;
use super::feedback::{FeedbackTx, Worker};

/// Read the client in chunks of at most `buffer_size` bytes and hand each
/// chunk, in order, to the stream writer.
///
/// End-of-stream and read errors are both terminal: the supervisor is told
/// the connection is over and `buffers` is dropped so the writer sees the end
/// of input.
pub(crate) async fn client_reader<R>(
    conn_id: ConnectionId,
    mut client_rx: R,
    buffer_size: usize,
    buffers: mpsc::Sender<Bytes>,
    feedback: FeedbackTx,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let mut chunk = BytesMut::zeroed(buffer_size);

        let bytes_read = match client_rx.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(%conn_id, "client closed its write side");
                feedback.fatal(Worker::ClientReader).await;
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "failed to read from client");
                feedback.fatal(Worker::ClientReader).await;
                break;
            }
        };

        chunk.truncate(bytes_read);
        tracing::trace!(%conn_id, bytes = bytes_read, "read from client");

        if buffers.send(chunk.freeze()).await.is_err() {
            // Writer is gone: both paths are off or the proxee failed, and the
            // supervisor already knows.
            tracing::debug!(%conn_id, "stream writer stopped, client reader exiting");
            break;
        }
    }

    tracing::debug!(%conn_id, "client reader returned");
}
