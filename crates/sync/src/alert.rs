//! Alert classification: a pure projection of the current sensor value, the
//! configured thresholds and the offline flag onto at most one alert.

use serde::Serialize;
use std::fmt;

use crate::state::Thresholds;

/// How far below `min` the reading must fall before the dry alert fires.
pub const DRY_MARGIN: f64 = 5.0;

/// How far above `max` the reading must rise before the wet alert fires.
pub const WET_MARGIN: f64 = 10.0;

// ---------------------------------------------------------------------------
// Alert type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Alert {
    None,
    /// Soil dangerously dry; carries the reading that tripped it.
    TooDry { value: f64 },
    /// Soil dangerously wet; carries the reading that tripped it.
    TooWet { value: f64 },
    /// Device has stopped reporting.
    Offline,
}

impl Alert {
    pub fn is_none(&self) -> bool {
        matches!(self, Alert::None)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::None => Ok(()),
            Alert::TooDry { value } => write!(f, "warning: soil too dry ({value}%)"),
            Alert::TooWet { value } => write!(f, "warning: soil too wet ({value}%)"),
            Alert::Offline => write!(f, "connection lost: device is not responding"),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Classify the current reading. First match wins: offline beats everything,
/// then dry, then wet. The margins keep the alert from flapping when the
/// live value hovers at a threshold.
pub fn evaluate(value: f64, thresholds: &Thresholds, offline: bool) -> Alert {
    if offline {
        Alert::Offline
    } else if value < thresholds.min - DRY_MARGIN {
        Alert::TooDry { value }
    } else if value > thresholds.max + WET_MARGIN {
        Alert::TooWet { value }
    } else {
        Alert::None
    }
}

// ===========================================================================
// Tests
// ===========================================================================
