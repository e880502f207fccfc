//! Response pump: copies the winning backend's output to the client.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::decision::Backend;

use super::ConnectionId;
use super::feedback::{FeedbackTx, Worker};

/// Copy everything `source` sends to the client until end-of-stream.
///
/// On a clean end-of-stream the client's write direction is shut down, so the
/// client sees EOF while its own sends still reach the gateway. Any read or
/// write error is fatal for the connection.
pub(crate) async fn response_pump<R, W>(
    conn_id: ConnectionId,
    source: Backend,
    mut backend_rx: R,
    mut client_tx: W,
    feedback: FeedbackTx,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(%conn_id, backend = %source, "passing response to client");

    match tokio::io::copy(&mut backend_rx, &mut client_tx).await {
        Ok(bytes) => {
            if let Err(e) = client_tx.shutdown().await {
                tracing::debug!(%conn_id, error = %e, "client write side already gone");
            }
            tracing::debug!(%conn_id, backend = %source, bytes, "backend finished, client write side closed");
        }
        Err(e) => {
            tracing::warn!(%conn_id, backend = %source, error = %e, "failed to pump response to client");
            feedback.fatal(Worker::ResponsePump(source)).await;
        }
    }
}
