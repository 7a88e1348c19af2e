use crate::domain::model::TelemetryLine;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct HubInner {
    sender: broadcast::Sender<TelemetryLine>,
    clients: Mutex<BTreeSet<ClientId>>,
    next_id: AtomicU64,
}

/// Republishes device telemetry to every connected client.
#[derive(Clone)]
pub struct TelemetryHub {
    inner: Arc<HubInner>,
}

impl TelemetryHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                sender,
                clients: Mutex::new(BTreeSet::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a client. Dropping the subscription unregisters it.
    pub fn subscribe(&self) -> Subscription {
        let id = ClientId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let receiver = self.inner.sender.subscribe();
        if let Ok(mut clients) = self.inner.clients.lock() {
            clients.insert(id);
        }
        tracing::info!("New client connected: {}", id);

        Subscription {
            id,
            receiver,
            hub: self.inner.clone(),
        }
    }

    /// Sends a line to all live clients and returns how many were reached.
    pub fn publish(&self, line: impl Into<String>) -> usize {
        // 沒有客戶端時 send 會回傳錯誤，這是正常情況
        self.inner
            .sender
            .send(TelemetryLine::new(line))
            .unwrap_or(0)
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.inner
            .clients
            .lock()
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct Subscription {
    id: ClientId,
    receiver: broadcast::Receiver<TelemetryLine>,
    hub: Arc<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Next telemetry line, or `None` once the hub is gone.
    ///
    /// Lines missed by a slow client are skipped.
    pub async fn recv(&mut self) -> Option<TelemetryLine> {
        loop {
            match self.receiver.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("{} lagged behind, skipped {} telemetry lines", self.id, missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut clients) = self.hub.clients.lock() {
            clients.remove(&self.id);
        }
        tracing::info!("Client disconnected: {}", self.id);
    }
}
