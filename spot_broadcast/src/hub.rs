use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};

use crate::{snapshot::ParkingSnapshot, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct HubSettings {
    /// Upper bound on a single push into a subscriber's queue.
    pub send_timeout: Duration,
    /// Snapshots a subscriber may have pending before pushes start to wait.
    pub queue_depth: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            queue_depth: 4,
        }
    }
}

/// Outcome of one fan-out. Every addressed subscriber is either delivered or dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub addressed: usize,
    pub delivered: usize,
    pub dropped: Vec<SubscriberId>,
}

/// The set of connected subscribers and the fan-out to them.
///
/// Each subscriber owns the receiving half of a bounded queue; its connection
/// task drains the queue into the socket. A subscriber whose queue is closed,
/// or stays full for longer than `send_timeout`, is removed during the
/// broadcast that noticed it.
#[derive(Debug)]
pub struct Hub {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    settings: HubSettings,
}

impl Hub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            settings,
        }
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    pub async fn register(&self) -> (SubscriberId, mpsc::Receiver<Arc<str>>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.settings.queue_depth.max(1));
        self.subscribers.write().await.insert(id, tx);
        tracing::info!(subscriber = %id, "Client connected");
        (id, rx)
    }

    pub async fn unregister(&self, id: SubscriberId) {
        if self.subscribers.write().await.remove(&id).is_some() {
            tracing::info!(subscriber = %id, "Client disconnected");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn broadcast(&self, snapshot: &ParkingSnapshot) -> Result<DeliveryReport> {
        let payload: Arc<str> = snapshot.to_json()?.into();
        tracing::debug!(payload = %payload, "Sending parking snapshot");
        Ok(self.broadcast_text(payload).await)
    }

    /// Push one payload to every subscriber registered at the time of the call.
    pub async fn broadcast_text(&self, payload: Arc<str>) -> DeliveryReport {
        let addressed: Vec<_> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let timeout = self.settings.send_timeout;
        let pushes = addressed.into_iter().map(|(id, tx)| {
            let payload = payload.clone();
            async move { (id, tokio::time::timeout(timeout, tx.send(payload)).await) }
        });
        let outcomes = join_all(pushes).await;

        let mut report = DeliveryReport {
            addressed: outcomes.len(),
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(_)) => {
                    tracing::warn!(subscriber = %id, "Subscriber went away, dropping");
                    report.dropped.push(id);
                }
                Err(_) => {
                    tracing::warn!(
                        subscriber = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Subscriber delivery timed out, dropping"
                    );
                    report.dropped.push(id);
                }
            }
        }

        if !report.dropped.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &report.dropped {
                subscribers.remove(id);
            }
        }
        report
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}
