//! Engine wiring: one feed task per system path plus the history feed, the
//! staleness check, and the task that mirrors the offline flag into shared
//! state. Everything the engine spawns is torn down as a unit.

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::history;
use crate::liveness::StalenessMonitor;
use crate::state::{DashboardState, Mode, SharedState};
use crate::store::{paths, value_as_f64, value_as_flag, RemoteStore, StoreError};
use crate::subscribe::{Feed, Subscriber};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    monitor: Arc<StalenessMonitor>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Subscribe every path and start the derived-state machinery. The
    /// engine only reads through `store`; commands go through
    /// `CommandDispatcher` and come back around via these subscriptions.
    pub async fn start(
        store: Arc<dyn RemoteStore>,
        shared: SharedState,
    ) -> Result<Engine, StoreError> {
        let subscriber = Subscriber::new(Arc::clone(&store));
        let monitor = Arc::new(StalenessMonitor::new());
        let mut tasks = Vec::new();

        // ── Liveness channel ────────────────────────────────────────
        // Soil moisture doubles as the liveness signal: every delivery
        // refreshes the staleness clock.
        let soil = subscriber.subscribe(paths::SOIL_MOISTURE).await?;
        tasks.push(spawn_soil(soil, Arc::clone(&shared), Arc::clone(&monitor)));

        // ── Plain value channels ────────────────────────────────────
        let pump = subscriber.subscribe(paths::PUMP_STATUS).await?;
        tasks.push(spawn_pump(pump, Arc::clone(&shared)));

        let min = subscriber.subscribe(paths::THRESHOLD_MIN).await?;
        tasks.push(spawn_numeric(min, Arc::clone(&shared), 40.0, |st, v| {
            st.set_threshold_min(v)
        }));

        let max = subscriber.subscribe(paths::THRESHOLD_MAX).await?;
        tasks.push(spawn_numeric(max, Arc::clone(&shared), 70.0, |st, v| {
            st.set_threshold_max(v)
        }));

        let mode = subscriber.subscribe(paths::MODE).await?;
        tasks.push(spawn_mode(mode, Arc::clone(&shared)));

        let drip_on = subscriber.subscribe(paths::DRIP_ON).await?;
        tasks.push(spawn_numeric(drip_on, Arc::clone(&shared), 5.0, |st, v| {
            st.set_drip_on(v.max(0.0) as u32)
        }));

        let drip_off = subscriber.subscribe(paths::DRIP_OFF).await?;
        tasks.push(spawn_numeric(drip_off, Arc::clone(&shared), 10.0, |st, v| {
            st.set_drip_off(v.max(0.0) as u32)
        }));

        // ── History feed ────────────────────────────────────────────
        let history = subscriber.subscribe(paths::HISTORY).await?;
        tasks.push(spawn_history(history, Arc::clone(&shared)));

        // ── Staleness machinery ─────────────────────────────────────
        tasks.push(monitor.spawn());
        tasks.push(spawn_offline_mirror(monitor.watch(), Arc::clone(&shared)));

        info!("sync engine started");
        Ok(Engine { monitor, tasks })
    }

    pub fn offline(&self) -> bool {
        self.monitor.offline()
    }

    /// Tear down every feed, the staleness check and the mirror task as a
    /// unit. Nothing spawned by this engine runs afterwards.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("sync engine stopped");
    }
}

// ---------------------------------------------------------------------------
// Feed tasks
// ---------------------------------------------------------------------------

/// Resolve a wire value to a number, treating null as "not set" with the
/// path's default. Anything else non-numeric degrades that one delivery.
fn resolve_numeric(value: &Value, default: f64) -> Option<f64> {
    match value {
        Value::Null => Some(default),
        other => value_as_f64(other),
    }
}

fn spawn_numeric(
    mut feed: Feed,
    shared: SharedState,
    default: f64,
    apply: impl Fn(&mut DashboardState, f64) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = feed.recv().await {
            match resolve_numeric(&value, default) {
                Some(v) => {
                    let mut st = shared.write().await;
                    apply(&mut st, v);
                }
                None => warn!(path = %feed.path(), %value, "non-numeric payload ignored"),
            }
        }
    })
}

fn spawn_soil(
    mut feed: Feed,
    shared: SharedState,
    monitor: Arc<StalenessMonitor>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = feed.recv().await {
            match resolve_numeric(&value, 0.0) {
                Some(v) => {
                    monitor.record_update();
                    let mut st = shared.write().await;
                    st.set_soil_moisture(v);
                }
                None => warn!(path = %feed.path(), %value, "non-numeric payload ignored"),
            }
        }
    })
}

fn spawn_pump(mut feed: Feed, shared: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = feed.recv().await {
            let on = match &value {
                Value::Null => Some(false),
                other => value_as_flag(other),
            };
            match on {
                Some(on) => {
                    let mut st = shared.write().await;
                    st.set_pump(on);
                }
                None => warn!(path = %feed.path(), %value, "unreadable pump payload ignored"),
            }
        }
    })
}

fn spawn_mode(mut feed: Feed, shared: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = feed.recv().await {
            let mode = match &value {
                Value::Null => Some(Mode::Manual),
                other => value_as_f64(other).and_then(|v| Mode::from_code(v as i64)),
            };
            match mode {
                Some(mode) => {
                    let mut st = shared.write().await;
                    st.set_mode(mode);
                }
                // Unknown codes leave the previous mode in place.
                None => warn!(path = %feed.path(), %value, "unknown mode code ignored"),
            }
        }
    })
}

fn spawn_history(mut feed: Feed, shared: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = feed.recv().await {
            let points = history::reconcile_feed(&value);
            let mut st = shared.write().await;
            st.set_history(points);
        }
    })
}

fn spawn_offline_mirror(
    mut rx: tokio::sync::watch::Receiver<bool>,
    shared: SharedState,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let offline = *rx.borrow_and_update();
            let mut st = shared.write().await;
            st.set_offline(offline);
        }
    })
}

// ===========================================================================
// Tests
// ===========================================================================
