//! The remote key-value store seam: the `RemoteStore` trait every component
//! talks through, the stable path constants, and `MemoryStore`, an in-process
//! implementation used by tests and local runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Path namespace
// ---------------------------------------------------------------------------

/// Paths in the remote store. These are stable contracts shared with the
/// device firmware and the presentation layer — do not rename.
pub mod paths {
    pub const SOIL_MOISTURE: &str = "system/soilMoisture";
    pub const PUMP_STATUS: &str = "system/pumpStatus";
    pub const THRESHOLD_MIN: &str = "system/threshold/min";
    pub const THRESHOLD_MAX: &str = "system/threshold/max";
    pub const MODE: &str = "system/mode";
    pub const DRIP_ON: &str = "system/drip/on";
    pub const DRIP_OFF: &str = "system/drip/off";
    pub const HISTORY: &str = "history";
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subscribe to '{path}' failed: {reason}")]
    Subscribe { path: String, reason: String },

    #[error("write to '{path}' failed: {reason}")]
    Write { path: String, reason: String },
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// A stream of value-changed events for a single path. Each item is the
/// latest full value for the path, not a diff.
pub struct ValueStream {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl ValueStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }

    /// Next value change, or `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// The external real-time key-value store. Implementations must deliver the
/// current value immediately on subscribe when one is known, and must keep
/// per-path delivery order. Constructed once and passed explicitly into each
/// component so tests can substitute `MemoryStore`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn subscribe(&self, path: &str) -> Result<ValueStream, StoreError>;

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Value coercion
// ---------------------------------------------------------------------------

/// Interpret a wire value as a finite number. Producers are inconsistent:
/// some firmware versions publish numbers, some publish numeric strings.
pub fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// 0/1 pump flag (also tolerates JSON booleans).
pub fn value_as_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        _ => value_as_f64(v).map(|f| f != 0.0),
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
    writes: Vec<(String, Value)>,
    reject_writes: bool,
}

/// In-process `RemoteStore`. Mirrors the production semantics: a subscriber
/// receives the retained value immediately, then every subsequent write to
/// that path, in order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without recording it in the write log, as if the device
    /// had published it before we connected.
    pub fn seed(&self, path: &str, value: Value) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.values.insert(path.to_string(), value.clone());
        notify(&mut inner, path, value);
    }

    /// All writes issued through `RemoteStore::write`, in order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.inner.lock().expect("memory store poisoned").writes.clone()
    }

    /// Make every subsequent write fail, for exercising the no-retry path.
    pub fn reject_writes(&self, reject: bool) {
        self.inner.lock().expect("memory store poisoned").reject_writes = reject;
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .values
            .get(path)
            .cloned()
    }
}

fn notify(inner: &mut MemoryInner, path: &str, value: Value) {
    if let Some(senders) = inner.subscribers.get_mut(path) {
        // Prune subscribers whose receiving side is gone.
        senders.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe(&self, path: &str) -> Result<ValueStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if let Some(current) = inner.values.get(path) {
            // Retained delivery: latest value lands before any new change.
            let _ = tx.send(current.clone());
        }
        inner
            .subscribers
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok(ValueStream::new(rx))
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if inner.reject_writes {
            return Err(StoreError::Write {
                path: path.to_string(),
                reason: "store rejected the write".to_string(),
            });
        }
        inner.values.insert(path.to_string(), value.clone());
        inner.writes.push((path.to_string(), value.clone()));
        notify(&mut inner, path, value);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- value_as_f64 ------------------------------------------------------

    #[test]
    fn value_as_f64_number() {
        assert_eq!(value_as_f64(&json!(42.5)), Some(42.5));
    }

    #[test]
    fn value_as_f64_integer() {
        assert_eq!(value_as_f64(&json!(7)), Some(7.0));
    }

    #[test]
    fn value_as_f64_numeric_string() {
        assert_eq!(value_as_f64(&json!("55")), Some(55.0));
        assert_eq!(value_as_f64(&json!(" 12.5 ")), Some(12.5));
    }

    #[test]
    fn value_as_f64_non_numeric_string() {
        assert_eq!(value_as_f64(&json!("dry")), None);
        assert_eq!(value_as_f64(&json!("")), None);
    }

    #[test]
    fn value_as_f64_other_types() {
        assert_eq!(value_as_f64(&json!(null)), None);
        assert_eq!(value_as_f64(&json!({"ts": 1})), None);
        assert_eq!(value_as_f64(&json!([1])), None);
    }

    // -- value_as_flag -----------------------------------------------------

    #[test]
    fn value_as_flag_zero_one() {
        assert_eq!(value_as_flag(&json!(0)), Some(false));
        assert_eq!(value_as_flag(&json!(1)), Some(true));
    }

    #[test]
    fn value_as_flag_bool() {
        assert_eq!(value_as_flag(&json!(true)), Some(true));
    }

    #[test]
    fn value_as_flag_garbage() {
        assert_eq!(value_as_flag(&json!("maybe")), None);
    }

    // -- MemoryStore -------------------------------------------------------

    #[tokio::test]
    async fn subscribe_delivers_retained_value() {
        let store = MemoryStore::new();
        store.seed(paths::SOIL_MOISTURE, json!(55));

        let mut stream = store.subscribe(paths::SOIL_MOISTURE).await.unwrap();
        assert_eq!(stream.next().await, Some(json!(55)));
    }

    #[tokio::test]
    async fn subscribe_then_write_delivers_change() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe(paths::PUMP_STATUS).await.unwrap();

        store.write(paths::PUMP_STATUS, json!(1)).await.unwrap();
        assert_eq!(stream.next().await, Some(json!(1)));
    }

    #[tokio::test]
    async fn writes_preserve_per_path_order() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe(paths::SOIL_MOISTURE).await.unwrap();

        for v in [10, 20, 30] {
            store.write(paths::SOIL_MOISTURE, json!(v)).await.unwrap();
        }
        assert_eq!(stream.next().await, Some(json!(10)));
        assert_eq!(stream.next().await, Some(json!(20)));
        assert_eq!(stream.next().await, Some(json!(30)));
    }

    #[tokio::test]
    async fn paths_are_independent() {
        let store = MemoryStore::new();
        let mut soil = store.subscribe(paths::SOIL_MOISTURE).await.unwrap();
        let _pump = store.subscribe(paths::PUMP_STATUS).await.unwrap();

        store.write(paths::SOIL_MOISTURE, json!(33)).await.unwrap();
        assert_eq!(soil.next().await, Some(json!(33)));
    }

    #[tokio::test]
    async fn rejected_write_returns_error_and_mutates_nothing() {
        let store = MemoryStore::new();
        store.reject_writes(true);

        let err = store.write(paths::MODE, json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(store.get(paths::MODE).is_none());
        assert!(store.writes().is_empty());
    }
}
