//! Operator command dispatch: local validation, then a single write per
//! field through the remote store. Rejections never touch the store; write
//! failures surface once and are not retried.

use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::state::Mode;
use crate::store::{paths, RemoteStore, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("min threshold {0} out of range [0, 100]")]
    MinRange(f64),

    #[error("max threshold {0} out of range [0, 100]")]
    MaxRange(f64),

    #[error("min threshold {min} must be below max threshold {max}")]
    MinNotBelowMax { min: f64, max: f64 },

    #[error("drip on-time {0}s out of range [1, 300]")]
    DripOnRange(u32),

    #[error("drip off-time {0}s out of range [1, 3600]")]
    DripOffRange(u32),
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// Validation failed; every violated field is reported, not just the
    /// first one found.
    #[error("command rejected: {}", join_fields(.0))]
    Rejected(Vec<FieldError>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_thresholds(min: f64, max: f64) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if !(0.0..=100.0).contains(&min) {
        errors.push(FieldError::MinRange(min));
    }
    if !(0.0..=100.0).contains(&max) {
        errors.push(FieldError::MaxRange(max));
    }
    if min >= max {
        errors.push(FieldError::MinNotBelowMax { min, max });
    }
    errors
}

fn validate_drip(on_sec: u32, off_sec: u32) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if !(1..=300).contains(&on_sec) {
        errors.push(FieldError::DripOnRange(on_sec));
    }
    if !(1..=3600).contains(&off_sec) {
        errors.push(FieldError::DripOffRange(off_sec));
    }
    errors
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Forwards validated operator intents to the store. Holds no state of its
/// own: the new values come back through the subscription loop like any
/// other remote change.
pub struct CommandDispatcher {
    store: Arc<dyn RemoteStore>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Write both pump thresholds, one write per field. Rejected unless
    /// both lie in [0, 100] and `min < max`.
    pub async fn set_thresholds(&self, min: f64, max: f64) -> Result<(), CommandError> {
        let errors = validate_thresholds(min, max);
        if !errors.is_empty() {
            warn!(min, max, "threshold command rejected: {}", join_fields(&errors));
            return Err(CommandError::Rejected(errors));
        }

        self.store.write(paths::THRESHOLD_MIN, json!(min)).await?;
        self.store.write(paths::THRESHOLD_MAX, json!(max)).await?;
        info!(min, max, "thresholds written");
        Ok(())
    }

    /// Write the drip cycle timing, one write per field. The two ranges are
    /// independent; there is no cross-field rule.
    pub async fn set_drip(&self, on_sec: u32, off_sec: u32) -> Result<(), CommandError> {
        let errors = validate_drip(on_sec, off_sec);
        if !errors.is_empty() {
            warn!(on_sec, off_sec, "drip command rejected: {}", join_fields(&errors));
            return Err(CommandError::Rejected(errors));
        }

        self.store.write(paths::DRIP_ON, json!(on_sec)).await?;
        self.store.write(paths::DRIP_OFF, json!(off_sec)).await?;
        info!(on_sec, off_sec, "drip timing written");
        Ok(())
    }

    /// Switch the operating mode. The domain is the `Mode` enum itself, so
    /// there is nothing to validate.
    pub async fn set_mode(&self, mode: Mode) -> Result<(), CommandError> {
        self.store.write(paths::MODE, json!(mode.code())).await?;
        info!(?mode, "mode written");
        Ok(())
    }

    /// Manual pump on/off. Whether manual control is currently permitted
    /// (mode Manual) is the presentation layer's gate, not ours.
    pub async fn set_pump(&self, on: bool) -> Result<(), CommandError> {
        let value = if on { 1 } else { 0 };
        self.store.write(paths::PUMP_STATUS, json!(value)).await?;
        info!(on, "pump command written");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
