//! Shared fixtures for gateway integration tests.
//!
//! Provides a gateway running the real accept loop on an ephemeral port and
//! scripted mock backends (guardian / proxee) on loopback listeners.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chaperoned::config::{GatewayConfig, TuningConfig};
use chaperoned::error::GatewayResult;
use chaperoned::server::{ServeSummary, bind, serve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Upper bound for any single step of a test, so a regression hangs loudly.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// A gateway instance bound to `127.0.0.1:0`.
pub struct TestGateway {
    pub addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<GatewayResult<ServeSummary>>,
}

impl TestGateway {
    /// Start a gateway in front of the given backends.
    pub async fn start(proxee: SocketAddr, guardian: SocketAddr) -> Self {
        Self::start_with_drain(proxee, guardian, Duration::from_secs(5)).await
    }

    pub async fn start_with_drain(
        proxee: SocketAddr,
        guardian: SocketAddr,
        drain_timeout: Duration,
    ) -> Self {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(GatewayConfig {
            listen: addr,
            proxee,
            guardian,
            tuning: TuningConfig {
                drain_timeout,
                ..TuningConfig::default()
            },
        });

        let (stop, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, config, async move {
            let _ = stop_rx.await;
        }));

        Self { addr, stop, handle }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    /// Trigger shutdown and return the accept loop's summary.
    pub async fn stop(self) -> ServeSummary {
        let _ = self.stop.send(());
        tokio::time::timeout(STEP_TIMEOUT, self.handle)
            .await
            .expect("gateway did not stop in time")
            .unwrap()
            .unwrap()
    }
}

/// A loopback listener that runs `script` on the first connection it accepts.
pub async fn spawn_backend<F, Fut, T>(script: F) -> (SocketAddr, JoinHandle<T>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(stream).await
    });
    (addr, handle)
}

/// A loopback listener that runs `script` on every connection it accepts.
pub async fn spawn_backend_loop<F, Fut>(script: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(script(stream));
        }
    });
    addr
}

/// An address on which nothing is listening.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Read until EOF or error, returning whatever arrived before that.
///
/// Treats a reset like EOF: tests only care about bytes actually delivered.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(STEP_TIMEOUT, stream.read(&mut buf))
            .await
            .expect("peer never closed")
        {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
}

/// Read exactly `len` bytes, or fewer if the peer closes first.
pub async fn read_up_to(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(len);
    let mut buf = [0u8; 4096];
    while received.len() < len {
        let want = (len - received.len()).min(buf.len());
        match tokio::time::timeout(STEP_TIMEOUT, stream.read(&mut buf[..want]))
            .await
            .expect("peer stalled")
        {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    received
}

/// Send `response`, half-close, then wait for the gateway to hang up.
///
/// Returns everything received after the response was sent.
pub async fn respond_and_drain(stream: &mut TcpStream, response: &[u8]) -> Vec<u8> {
    let _ = stream.write_all(response).await;
    let _ = stream.shutdown().await;
    read_until_closed(stream).await
}
