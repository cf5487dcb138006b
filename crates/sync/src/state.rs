//! Shared in-process state fed by the subscriber tasks and read by the
//! presentation layer. All mutation goes through methods that keep the
//! derived alert in step with its inputs.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::alert::{self, Alert};
use crate::history::HistoryPoint;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<DashboardState>>;

// ---------------------------------------------------------------------------
// Data-model types
// ---------------------------------------------------------------------------

/// Pump thresholds in percent. Invariant `min < max` is enforced on the
/// write path; values arriving from the store are trusted as written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub min: f64,
    pub max: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min: 40.0,
            max: 70.0,
        }
    }
}

/// Drip cycle timing in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DripTiming {
    pub on_sec: u32,
    pub off_sec: u32,
}

impl Default for DripTiming {
    fn default() -> Self {
        Self {
            on_sec: 5,
            off_sec: 10,
        }
    }
}

/// Operating mode as stored at `system/mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Manual,
    AutoSensor,
    AutoDrip,
}

impl Mode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Mode::Manual),
            1 => Some(Mode::AutoSensor),
            2 => Some(Mode::AutoDrip),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Mode::Manual => 0,
            Mode::AutoSensor => 1,
            Mode::AutoDrip => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Core state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub soil_moisture: f64,
    pub pump_on: bool,
    pub mode: Mode,
    pub thresholds: Thresholds,
    pub drip: DripTiming,
    pub offline: bool,
    pub alert: Alert,
    pub history: Vec<HistoryPoint>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            soil_moisture: 0.0,
            pump_on: false,
            mode: Mode::default(),
            thresholds: Thresholds::default(),
            drip: DripTiming::default(),
            offline: false,
            alert: Alert::None,
            history: Vec::new(),
        }
    }
}

impl DashboardState {
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    // -- Mutators (each keeps the alert current) ---------------------------

    pub fn set_soil_moisture(&mut self, value: f64) {
        self.soil_moisture = value;
        self.refresh_alert();
    }

    pub fn set_pump(&mut self, on: bool) {
        self.pump_on = on;
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn set_threshold_min(&mut self, min: f64) {
        self.thresholds.min = min;
        self.refresh_alert();
    }

    pub fn set_threshold_max(&mut self, max: f64) {
        self.thresholds.max = max;
        self.refresh_alert();
    }

    pub fn set_drip_on(&mut self, on_sec: u32) {
        self.drip.on_sec = on_sec;
    }

    pub fn set_drip_off(&mut self, off_sec: u32) {
        self.drip.off_sec = off_sec;
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
        self.refresh_alert();
    }

    pub fn set_history(&mut self, history: Vec<HistoryPoint>) {
        self.history = history;
    }

    fn refresh_alert(&mut self) {
        self.alert = alert::evaluate(self.soil_moisture, &self.thresholds, self.offline);
    }

    /// Build the JSON-serialisable snapshot for the presentation layer.
    pub fn to_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            soil_moisture: self.soil_moisture,
            pump_on: self.pump_on,
            mode: self.mode,
            thresholds: self.thresholds,
            drip: self.drip,
            offline: self.offline,
            alert: self.alert.clone(),
            alert_message: self.alert.to_string(),
            history: self
                .history
                .iter()
                .map(|p| HistoryPointView {
                    time: p.display_time(),
                    value: p.value,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON snapshot (what the presentation layer consumes)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusSnapshot {
    pub soil_moisture: f64,
    pub pump_on: bool,
    pub mode: Mode,
    pub thresholds: Thresholds,
    pub drip: DripTiming,
    pub offline: bool,
    pub alert: Alert,
    pub alert_message: String,
    pub history: Vec<HistoryPointView>,
}

#[derive(Serialize)]
pub struct HistoryPointView {
    pub time: String,
    pub value: f64,
}

// ===========================================================================
// Tests
// ===========================================================================
