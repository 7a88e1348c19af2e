//! Newline-delimited JSON event transport over TCP.
//!
//! Each connection gets the port list on connect, then exchanges
//! [`ClientRequest`] lines for [`ServerEvent`] lines. Telemetry from the hub
//! is interleaved with request replies on the same stream.

use crate::core::hub::Subscription;
use crate::core::relay::RelayEngine;
use crate::domain::events::{ClientRequest, ServerEvent};
use crate::utils::error::{RelayError, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const EVENT_QUEUE_DEPTH: usize = 64;

pub struct TransportServer {
    listener: TcpListener,
    relay: RelayEngine,
}

impl TransportServer {
    pub async fn bind(addr: &str, relay: RelayEngine) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(RelayError::TransportError)?;
        Ok(Self { listener, relay })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(RelayError::TransportError)
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Transport shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let relay = self.relay.clone();
                        tokio::spawn(handle_connection(stream, peer, relay));
                    }
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },
            }
        }
    }

    pub async fn serve(self) -> Result<()> {
        self.serve_until(std::future::pending()).await
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, relay: RelayEngine) {
    let (read_half, write_half) = stream.into_split();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let (subscription, greeting) = relay.connect().await;
    tracing::debug!("{} connected from {}", subscription.id(), peer);
    let _ = events_tx.send(greeting).await;

    let writer = tokio::spawn(write_events(write_half, events_rx, subscription));

    if let Err(e) = read_requests(read_half, &relay, &events_tx).await {
        tracing::warn!("Connection from {} ended with error: {}", peer, e);
    }

    drop(events_tx);
    let _ = writer.await;
}

async fn read_requests(
    read_half: OwnedReadHalf,
    relay: &RelayEngine,
    events: &mpsc::Sender<ServerEvent>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(read_half);
    let mut buf = String::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_BYTES as u64 + 1)
            .read_line(&mut buf)
            .await?;
        if read == 0 {
            return Ok(());
        }
        if read > MAX_REQUEST_BYTES {
            let _ = events
                .send(ServerEvent::Error {
                    message: format!("request exceeds {} bytes", MAX_REQUEST_BYTES),
                })
                .await;
            return Ok(());
        }

        let line = buf.trim();
        if line.is_empty() {
            continue;
        }

        match decode_request(line) {
            Ok(request) => relay.handle(request, events).await,
            Err(e) => {
                tracing::debug!("Malformed request {:?}: {}", line, e);
                let _ = events
                    .send(ServerEvent::Error {
                        message: format!("malformed request: {}", e),
                    })
                    .await;
            }
        }
    }
}

async fn write_events(
    mut write_half: OwnedWriteHalf,
    mut events: mpsc::Receiver<ServerEvent>,
    mut subscription: Subscription,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            telemetry = subscription.recv() => match telemetry {
                Some(telemetry) => ServerEvent::from(telemetry),
                None => break,
            },
        };

        let line = match encode_event(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode event: {}", e);
                continue;
            }
        };

        if write_half.write_all(&line).await.is_err() {
            break;
        }
    }
}

fn decode_request(line: &str) -> Result<ClientRequest> {
    Ok(serde_json::from_str(line)?)
}

fn encode_event(event: &ServerEvent) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    Ok(line)
}
