//! Multiplexed path subscriptions. `Subscriber` opens one feed per path
//! against the remote store, keeps a registry of last-known values, and
//! guarantees a closed feed never delivers another event, even one already
//! in flight.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::store::{RemoteStore, StoreError};

// ---------------------------------------------------------------------------
// Channel registry
// ---------------------------------------------------------------------------

/// Last-known state of one path. Written only by that path's forwarder task.
#[derive(Debug, Clone)]
pub struct Channel {
    pub value: Value,
    pub received_at: Instant,
}

type Registry = Arc<RwLock<HashMap<String, Channel>>>;

// ---------------------------------------------------------------------------
// Feed handle
// ---------------------------------------------------------------------------

/// A live subscription to one path. Dropping the feed tears the
/// subscription down; `close` does the same but is explicit and idempotent.
pub struct Feed {
    path: String,
    rx: mpsc::UnboundedReceiver<Value>,
    task: JoinHandle<()>,
    closed: bool,
}

impl Feed {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Latest value for this path, each time it changes. `None` once the
    /// feed is closed or the store side has gone away.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop delivery. Synchronous and idempotent: after this returns, no
    /// event is observable from this feed, including ones already queued.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.task.abort();
        self.rx.close();
        debug!(path = %self.path, "feed closed");
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Multiplexes subscriptions to named paths. Paths are independent: one
/// path's failure or closure never affects delivery on another.
pub struct Subscriber {
    store: Arc<dyn RemoteStore>,
    registry: Registry,
}

impl Subscriber {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a feed on `path`. Delivers the retained value immediately when
    /// the store holds one.
    pub async fn subscribe(&self, path: &str) -> Result<Feed, StoreError> {
        let mut stream = self.store.subscribe(path).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let registry = Arc::clone(&self.registry);
        let task_path = path.to_string();
        let task = tokio::spawn(async move {
            while let Some(value) = stream.next().await {
                {
                    let mut reg = registry.write().await;
                    reg.insert(
                        task_path.clone(),
                        Channel {
                            value: value.clone(),
                            received_at: Instant::now(),
                        },
                    );
                }
                if tx.send(value).is_err() {
                    // Feed handle gone; stop forwarding.
                    break;
                }
            }
            debug!(path = %task_path, "forwarder finished");
        });

        Ok(Feed {
            path: path.to_string(),
            rx,
            task,
            closed: false,
        })
    }

    /// Last value observed on `path`, if any delivery has happened yet.
    pub async fn latest(&self, path: &str) -> Option<Channel> {
        self.registry.read().await.get(path).cloned()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{paths, MemoryStore};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn subscriber() -> (MemoryStore, Subscriber) {
        let store = MemoryStore::new();
        let sub = Subscriber::new(Arc::new(store.clone()));
        (store, sub)
    }

    #[tokio::test]
    async fn retained_value_delivered_on_subscribe() {
        let (store, sub) = subscriber();
        store.seed(paths::SOIL_MOISTURE, json!(55));

        let mut feed = sub.subscribe(paths::SOIL_MOISTURE).await.unwrap();
        assert_eq!(feed.recv().await, Some(json!(55)));
    }

    #[tokio::test]
    async fn changes_delivered_in_order() {
        let (store, sub) = subscriber();
        let mut feed = sub.subscribe(paths::SOIL_MOISTURE).await.unwrap();

        store.write(paths::SOIL_MOISTURE, json!(10)).await.unwrap();
        store.write(paths::SOIL_MOISTURE, json!(20)).await.unwrap();

        assert_eq!(feed.recv().await, Some(json!(10)));
        assert_eq!(feed.recv().await, Some(json!(20)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_store, sub) = subscriber();
        let mut feed = sub.subscribe(paths::MODE).await.unwrap();

        feed.close();
        feed.close(); // second close must be a no-op
        assert_eq!(feed.recv().await, None);
    }

    #[tokio::test]
    async fn no_event_after_close_even_if_already_queued() {
        let (store, sub) = subscriber();
        store.seed(paths::SOIL_MOISTURE, json!(1));

        let mut feed = sub.subscribe(paths::SOIL_MOISTURE).await.unwrap();
        // The retained value is already scheduled on the feed's queue.
        feed.close();
        assert_eq!(feed.recv().await, None);
    }

    #[tokio::test]
    async fn closing_one_path_leaves_others_running() {
        let (store, sub) = subscriber();
        let mut soil = sub.subscribe(paths::SOIL_MOISTURE).await.unwrap();
        let mut pump = sub.subscribe(paths::PUMP_STATUS).await.unwrap();

        soil.close();
        store.write(paths::PUMP_STATUS, json!(1)).await.unwrap();

        assert_eq!(pump.recv().await, Some(json!(1)));
        assert_eq!(soil.recv().await, None);
    }

    #[tokio::test]
    async fn registry_tracks_last_value() {
        let (store, sub) = subscriber();
        let mut feed = sub.subscribe(paths::SOIL_MOISTURE).await.unwrap();

        store.write(paths::SOIL_MOISTURE, json!(42)).await.unwrap();
        assert_eq!(feed.recv().await, Some(json!(42)));

        let channel = sub.latest(paths::SOIL_MOISTURE).await.unwrap();
        assert_eq!(channel.value, json!(42));
    }

    #[tokio::test]
    async fn no_delivery_without_retained_value() {
        let (_store, sub) = subscriber();
        let mut feed = sub.subscribe(paths::DRIP_ON).await.unwrap();

        let res = timeout(Duration::from_millis(50), feed.recv()).await;
        assert!(res.is_err(), "nothing should be delivered yet");
    }
}
