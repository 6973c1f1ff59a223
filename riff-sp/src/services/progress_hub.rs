//! Progress channel: client id → live WebSocket
//!
//! Each subscriber is the sending half of a bounded queue drained by its
//! connection's writer task. Dropping the sender closes the connection, so the
//! hub is the only place a subscriber is removed.
//!
//! Delivery is best-effort and at-most-once: no subscriber means the event is
//! dropped, and a subscriber whose queue is closed or stays full past the send
//! timeout is detached.

use riff_common::events::{CompletionData, ErrorData, ProgressData, ServerMessage};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::models::ClientId;

/// Outbound queue depth per subscriber
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Transport handle held by the hub
pub type SubscriberHandle = mpsc::Sender<ServerMessage>;

/// Create the queue pair for a new connection
pub fn subscriber_channel() -> (SubscriberHandle, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(SUBSCRIBER_QUEUE_DEPTH)
}

/// Hub timing
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// How often idle subscribers are swept
    pub sweep_interval: Duration,
    /// Idle time after which a subscriber is reclaimed
    pub stale_timeout: Duration,
    /// How long a send may wait on a full queue
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stale_timeout: Duration::from_secs(300),
            send_timeout: Duration::from_secs(5),
        }
    }
}

struct Subscriber {
    tx: SubscriberHandle,
    last_activity: Instant,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<ClientId, Subscriber>,
    sweeper_running: bool,
}

struct HubInner {
    config: HubConfig,
    state: Mutex<HubState>,
}

/// Connection registry shared by the orchestrator and the WebSocket handler
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl ProgressHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    pub fn config(&self) -> HubConfig {
        self.inner.config
    }

    /// Register a connection; an existing handle for the same id is replaced
    pub async fn register(&self, client_id: ClientId, handle: SubscriberHandle) {
        let mut state = self.inner.state.lock().await;
        let replaced = state
            .subscribers
            .insert(
                client_id,
                Subscriber {
                    tx: handle,
                    last_activity: Instant::now(),
                },
            )
            .is_some();

        if replaced {
            info!(client_id = %client_id, "Subscriber reconnected, previous connection closed");
        } else {
            info!(
                client_id = %client_id,
                subscribers = state.subscribers.len(),
                "Subscriber registered"
            );
        }

        if !state.sweeper_running {
            state.sweeper_running = true;
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(sweep_loop(weak));
        }
    }

    /// Remove a connection; false if none was registered
    pub async fn unregister(&self, client_id: ClientId) -> bool {
        let removed = self
            .inner
            .state
            .lock()
            .await
            .subscribers
            .remove(&client_id)
            .is_some();
        if removed {
            info!(client_id = %client_id, "Subscriber unregistered");
        }
        removed
    }

    /// Remove `client_id` only if it still maps to `handle`
    ///
    /// A connection closing after a reconnect under the same id must not
    /// detach the newer connection.
    pub async fn unregister_handle(&self, client_id: ClientId, handle: &SubscriberHandle) -> bool {
        let mut state = self.inner.state.lock().await;
        let same = state
            .subscribers
            .get(&client_id)
            .is_some_and(|s| s.tx.same_channel(handle));
        if same {
            state.subscribers.remove(&client_id);
            debug!(client_id = %client_id, "Subscriber detached");
        }
        same
    }

    /// Refresh a subscriber's last-activity timestamp
    pub async fn touch(&self, client_id: ClientId) {
        if let Some(sub) = self.inner.state.lock().await.subscribers.get_mut(&client_id) {
            sub.last_activity = Instant::now();
        }
    }

    pub async fn is_registered(&self, client_id: ClientId) -> bool {
        self.inner
            .state
            .lock()
            .await
            .subscribers
            .contains_key(&client_id)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.state.lock().await.subscribers.len()
    }

    /// True while the staleness sweep task is alive
    pub async fn sweeper_running(&self) -> bool {
        self.inner.state.lock().await.sweeper_running
    }

    /// Deliver one message; returns whether it was queued for the client
    pub async fn send(&self, client_id: ClientId, message: ServerMessage) -> bool {
        let tx = {
            let state = self.inner.state.lock().await;
            match state.subscribers.get(&client_id) {
                Some(sub) => sub.tx.clone(),
                None => {
                    debug!(
                        client_id = %client_id,
                        kind = message.kind(),
                        "No subscriber, event dropped"
                    );
                    return false;
                }
            }
        };

        self.deliver(client_id, &tx, message).await
    }

    async fn deliver(&self, client_id: ClientId, tx: &SubscriberHandle, message: ServerMessage) -> bool {
        let kind = message.kind();
        match tokio::time::timeout(self.inner.config.send_timeout, tx.send(message)).await {
            Ok(Ok(())) => {
                let mut state = self.inner.state.lock().await;
                if let Some(sub) = state.subscribers.get_mut(&client_id) {
                    if sub.tx.same_channel(tx) {
                        sub.last_activity = Instant::now();
                    }
                }
                true
            }
            Ok(Err(_)) => {
                debug!(client_id = %client_id, kind, "Subscriber queue closed");
                self.unregister_handle(client_id, tx).await;
                false
            }
            Err(_) => {
                warn!(client_id = %client_id, kind, "Subscriber send timed out");
                self.unregister_handle(client_id, tx).await;
                false
            }
        }
    }

    pub async fn send_progress(
        &self,
        client_id: ClientId,
        progress: f64,
        status: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let message = ServerMessage::Progress(ProgressData {
            progress,
            status: status.into(),
            metadata,
        });
        self.send(client_id, message).await
    }

    pub async fn send_completion(&self, client_id: ClientId, result: CompletionData) -> bool {
        self.send(client_id, ServerMessage::Complete(result)).await
    }

    pub async fn send_error(
        &self,
        client_id: ClientId,
        error: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> bool {
        let message = ServerMessage::Error(ErrorData {
            error: error.into(),
            details,
        });
        self.send(client_id, message).await
    }

    pub async fn send_cancelled(&self, client_id: ClientId, reason: impl Into<String>) -> bool {
        self.send(client_id, ServerMessage::cancelled(reason)).await
    }

    pub async fn send_pong(&self, client_id: ClientId) -> bool {
        self.send(client_id, ServerMessage::Pong).await
    }

    /// Deliver to every subscriber; returns how many accepted it
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let targets: Vec<(ClientId, SubscriberHandle)> = {
            let state = self.inner.state.lock().await;
            state
                .subscribers
                .iter()
                .map(|(id, sub)| (*id, sub.tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (client_id, tx) in targets {
            if self.deliver(client_id, &tx, message.clone()).await {
                delivered += 1;
            }
        }
        debug!(kind = message.kind(), delivered, "Broadcast sent");
        delivered
    }

    /// Drop every subscriber; their sockets close once the queues drain
    pub async fn close_all(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let count = state.subscribers.len();
        state.subscribers.clear();
        if count > 0 {
            info!(count, "Closed all subscribers");
        }
        count
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Periodic staleness sweep; exits once no subscribers remain
async fn sweep_loop(hub: Weak<HubInner>) {
    let interval = match hub.upgrade() {
        Some(inner) => inner.config.sweep_interval,
        None => return,
    };
    debug!(interval_ms = interval.as_millis() as u64, "Subscriber sweep started");

    loop {
        tokio::time::sleep(interval).await;

        let Some(inner) = hub.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;

        let stale_timeout = inner.config.stale_timeout;
        let stale: Vec<ClientId> = state
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.last_activity.elapsed() > stale_timeout)
            .map(|(id, _)| *id)
            .collect();

        for client_id in &stale {
            state.subscribers.remove(client_id);
            info!(client_id = %client_id, "Stale subscriber reclaimed");
        }

        if state.subscribers.is_empty() {
            state.sweeper_running = false;
            debug!("Subscriber sweep stopped, no subscribers");
            return;
        }
    }
}
