//! Guardian decision reader: the one and only verdict read.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use crate::decision::GuardianDecision;

use super::ConnectionId;

/// The verdict together with the guardian's read half, which the supervisor
/// hands to the guardian response pump when the guardian wins.
#[derive(Debug)]
pub(crate) struct DecisionReport<R> {
    pub decision: GuardianDecision,
    pub guardian_rx: R,
}

/// Read exactly one byte from the guardian and report the decision it encodes.
///
/// Never reads past the verdict byte: anything the guardian sends afterwards
/// is response data for the client.
pub(crate) async fn decision_reader<R>(
    conn_id: ConnectionId,
    mut guardian_rx: R,
    decision_tx: oneshot::Sender<DecisionReport<R>>,
) where
    R: AsyncRead + Unpin,
{
    let mut verdict = [0u8; 1];

    let decision = match guardian_rx.read(&mut verdict).await {
        Ok(0) => {
            tracing::warn!(%conn_id, "guardian closed connection before its verdict");
            GuardianDecision::Error
        }
        Ok(_) => {
            let decision = GuardianDecision::from_verdict_byte(verdict[0]);
            if decision == GuardianDecision::Error {
                tracing::warn!(%conn_id, byte = verdict[0], "guardian gave unrecognized verdict");
            }
            decision
        }
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "failed to read guardian verdict");
            GuardianDecision::Error
        }
    };

    if decision_tx
        .send(DecisionReport {
            decision,
            guardian_rx,
        })
        .is_err()
    {
        tracing::debug!(%conn_id, "supervisor gone before verdict was delivered");
    }

    tracing::debug!(%conn_id, %decision, "decision reader returned");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn decide(input: &[u8], close: bool) -> DecisionReport<tokio::io::DuplexStream> {
        let (mut guardian, gateway_side) = tokio::io::duplex(64);
        guardian.write_all(input).await.unwrap();
        if close {
            drop(guardian);
        } else {
            // Keep the guardian end alive until the verdict is read.
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                drop(guardian);
            });
        }

        let (tx, rx) = oneshot::channel();
        decision_reader(ConnectionId(1), gateway_side, tx).await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_pass_to_proxee() {
        let report = decide(b"p", false).await;
        assert_eq!(report.decision, GuardianDecision::PassToProxee);
    }

    #[tokio::test]
    async fn test_unknown_byte_is_error() {
        let report = decide(b"x", false).await;
        assert_eq!(report.decision, GuardianDecision::Error);
    }

    #[tokio::test]
    async fn test_eof_before_verdict_is_error() {
        let report = decide(b"", true).await;
        assert_eq!(report.decision, GuardianDecision::Error);
    }

    /// Bytes after the verdict stay unread for the response pump.
    #[tokio::test]
    async fn test_reads_only_the_verdict_byte() {
        let mut report = decide(b"gHTTP/1.1 403 Forbidden\r\n\r\n", true).await;
        assert_eq!(report.decision, GuardianDecision::PassToGuardian);

        let mut rest = Vec::new();
        report.guardian_rx.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"HTTP/1.1 403 Forbidden\r\n\r\n");
    }
}
