//! History reconciliation: turn the raw history feed into a bounded,
//! time-ordered series, recovering a usable timestamp even for entries whose
//! stored `ts` is a server-side placeholder that never resolved in a cached
//! snapshot.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::store::value_as_f64;

/// Upper bound kept by the history feed. Entries beyond the newest 20 are
/// dropped before reconciliation.
pub const HISTORY_LIMIT: usize = 20;

// ---------------------------------------------------------------------------
// Raw and reconciled shapes
// ---------------------------------------------------------------------------

/// One entry as stored, keyed by the store's sequence key. `ts` is a
/// millisecond timestamp from well-behaved producers, but may arrive as a
/// numeric string or as an unresolved placeholder object when a read races
/// the server's timestamp substitution.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub ts: Option<Value>,
    #[serde(default)]
    pub val: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl HistoryPoint {
    /// `HH:MM:SS` in local time, for chart axis labels.
    pub fn display_time(&self) -> String {
        self.time
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Timestamp recovery
// ---------------------------------------------------------------------------

/// Sequence keys embed the producer's monotonic millisecond clock in their
/// characters at offsets 1..=8, base-36. This is the structural fallback for
/// entries whose `ts` field never resolved.
fn timestamp_from_key(key: &str) -> Option<i64> {
    let encoded = key.get(1..9)?;
    i64::from_str_radix(encoded, 36).ok()
}

/// Two-step decode: trust a finite numeric `ts` (number or numeric string),
/// otherwise fall back to the sequence key. `None` means both steps failed.
fn decode_timestamp_ms(key: &str, ts: Option<&Value>) -> Option<i64> {
    if let Some(ms) = ts.and_then(value_as_f64) {
        return Some(ms as i64);
    }
    timestamp_from_key(key)
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Decode raw entries, oldest first. Input order is the sequence-key order
/// (`BTreeMap` iteration), which is the producer's append order; it is
/// preserved regardless of which entries needed the fallback. An entry
/// unparseable by both steps is dropped from the series, never guessed at.
pub fn reconcile(entries: &BTreeMap<String, RawEntry>) -> Vec<HistoryPoint> {
    let mut points = Vec::with_capacity(entries.len());

    for (key, entry) in entries {
        let Some(ms) = decode_timestamp_ms(key, entry.ts.as_ref()) else {
            warn!(key = %key, "history entry has no decodable timestamp, dropping");
            continue;
        };
        let Some(time) = Utc.timestamp_millis_opt(ms).single() else {
            warn!(key = %key, ms, "history timestamp out of range, dropping");
            continue;
        };

        let value = entry.val.as_ref().and_then(value_as_f64).unwrap_or(0.0);
        points.push(HistoryPoint { time, value });
    }

    points
}

/// Reconcile the feed's wholesale value: a JSON object of sequence key to
/// entry, replaced in full on every update. Bounds the series at the newest
/// `HISTORY_LIMIT` keys. Null (no history yet) yields an empty series.
pub fn reconcile_feed(raw: &Value) -> Vec<HistoryPoint> {
    let mut entries: BTreeMap<String, RawEntry> = match raw {
        Value::Null => return Vec::new(),
        other => match serde_json::from_value(other.clone()) {
            Ok(map) => map,
            Err(e) => {
                warn!("history feed is not a key/entry object: {e}");
                return Vec::new();
            }
        },
    };

    while entries.len() > HISTORY_LIMIT {
        entries.pop_first();
    }

    reconcile(&entries)
}

// ===========================================================================
// Tests
// ===========================================================================
