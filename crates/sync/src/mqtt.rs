//! Production `RemoteStore` over MQTT. Paths map one-to-one onto topics and
//! all writes publish retained, so a fresh subscriber immediately receives
//! the last value for a path — the delivery contract `Subscriber` relies on.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::store::{RemoteStore, StoreError, ValueStream};

type Routes = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>>;

// ---------------------------------------------------------------------------
// Payload handling
// ---------------------------------------------------------------------------

/// Parse a publish payload. Values on the wire are JSON, so a bare `55` or
/// `"55"` both come through as expected.
fn parse_payload(payload: &[u8]) -> Option<Value> {
    serde_json::from_slice(payload).ok()
}

/// Deliver a value to every live subscriber of `topic`, pruning senders
/// whose feed has been closed.
fn dispatch(routes: &Routes, topic: &str, value: Value) {
    let mut routes = routes.lock().expect("mqtt routes poisoned");
    if let Some(senders) = routes.get_mut(topic) {
        senders.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct MqttStore {
    client: AsyncClient,
    routes: Routes,
    event_task: JoinHandle<()>,
}

impl MqttStore {
    /// Connect to the broker and start the event loop. A broken connection
    /// is retried forever; channels simply keep their last-known state
    /// until delivery resumes.
    pub fn connect(cfg: &StoreConfig) -> Self {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 20);
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

        let task_routes = Arc::clone(&routes);
        let task_client = client.clone();
        let event_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => match parse_payload(&p.payload) {
                        Some(value) => dispatch(&task_routes, &p.topic, value),
                        // One bad payload degrades one delivery, nothing else.
                        None => warn!(topic = %p.topic, "unparseable payload ignored"),
                    },
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt connected");
                        resubscribe(&task_client, &task_routes);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt error: {e}. reconnecting...");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            routes,
            event_task,
        }
    }
}

/// Re-issue every active subscription after a reconnect so the broker sends
/// the retained values again. Runs off the event loop task to avoid filling
/// the request queue from inside it.
fn resubscribe(client: &AsyncClient, routes: &Routes) {
    let topics: Vec<String> = routes
        .lock()
        .expect("mqtt routes poisoned")
        .keys()
        .cloned()
        .collect();
    if topics.is_empty() {
        return;
    }
    let client = client.clone();
    tokio::spawn(async move {
        for topic in topics {
            if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                warn!(topic = %topic, "resubscribe failed: {e}");
            }
        }
    });
}

impl Drop for MqttStore {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

#[async_trait]
impl RemoteStore for MqttStore {
    async fn subscribe(&self, path: &str) -> Result<ValueStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Register the route first so the retained delivery cannot slip
        // between the broker subscribe and the route insert.
        self.routes
            .lock()
            .expect("mqtt routes poisoned")
            .entry(path.to_string())
            .or_default()
            .push(tx);

        self.client
            .subscribe(path, QoS::AtLeastOnce)
            .await
            .map_err(|e| StoreError::Subscribe {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(ValueStream::new(rx))
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(&value).map_err(|e| StoreError::Write {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        self.client
            .publish(path, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| StoreError::Write {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- parse_payload -----------------------------------------------------

    #[test]
    fn parse_payload_bare_number() {
        assert_eq!(parse_payload(b"55"), Some(json!(55)));
    }

    #[test]
    fn parse_payload_quoted_number() {
        assert_eq!(parse_payload(b"\"55\""), Some(json!("55")));
    }

    #[test]
    fn parse_payload_object() {
        assert_eq!(
            parse_payload(br#"{"-Nabc":{"ts":1,"val":2}}"#),
            Some(json!({"-Nabc": {"ts": 1, "val": 2}}))
        );
    }

    #[test]
    fn parse_payload_garbage() {
        assert_eq!(parse_payload(b"not json"), None);
        assert_eq!(parse_payload(b""), None);
    }

    // -- dispatch ----------------------------------------------------------

    #[test]
    fn dispatch_routes_to_matching_topic_only() {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (soil_tx, mut soil_rx) = mpsc::unbounded_channel();
        let (pump_tx, mut pump_rx) = mpsc::unbounded_channel();
        {
            let mut r = routes.lock().unwrap();
            r.insert("system/soilMoisture".to_string(), vec![soil_tx]);
            r.insert("system/pumpStatus".to_string(), vec![pump_tx]);
        }

        dispatch(&routes, "system/soilMoisture", json!(42));

        assert_eq!(soil_rx.try_recv().unwrap(), json!(42));
        assert!(pump_rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_prunes_dropped_subscribers() {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (dead_tx, dead_rx) = mpsc::unbounded_channel::<Value>();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        drop(dead_rx);
        routes
            .lock()
            .unwrap()
            .insert("system/mode".to_string(), vec![dead_tx, live_tx]);

        dispatch(&routes, "system/mode", json!(1));

        assert_eq!(live_rx.try_recv().unwrap(), json!(1));
        assert_eq!(routes.lock().unwrap()["system/mode"].len(), 1);
    }

    #[test]
    fn dispatch_unknown_topic_is_a_no_op() {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        dispatch(&routes, "some/other/topic", json!(1));
    }
}
