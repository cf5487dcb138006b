//! Offline detection: a two-state machine driven by the liveness channel's
//! update recency. Only the periodic check can declare the device offline;
//! only a fresh update can bring it back.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{info, warn};

/// Silence on the liveness channel longer than this means offline.
pub const OFFLINE_AFTER: Duration = Duration::from_secs(65);

/// How often the staleness check runs. Much smaller than `OFFLINE_AFTER`
/// so an update can never land exactly inside a check race.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct StalenessMonitor {
    last_update: Arc<Mutex<Instant>>,
    offline_tx: watch::Sender<bool>,
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StalenessMonitor {
    /// Starts in the online state, with the window measured from now.
    pub fn new() -> Self {
        let (offline_tx, _) = watch::channel(false);
        Self {
            last_update: Arc::new(Mutex::new(Instant::now())),
            offline_tx,
        }
    }

    /// A value arrived on the liveness channel. Clears the offline state
    /// immediately, regardless of where the periodic timer is in its phase.
    pub fn record_update(&self) {
        *self.last_update.lock().expect("liveness clock poisoned") = Instant::now();
        let recovered = self.offline_tx.send_if_modified(|offline| {
            if *offline {
                *offline = false;
                true
            } else {
                false
            }
        });
        if recovered {
            info!("device back online");
        }
    }

    pub fn offline(&self) -> bool {
        *self.offline_tx.borrow()
    }

    /// Observe offline transitions.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.offline_tx.subscribe()
    }

    /// Start the periodic staleness check. Aborting the returned handle
    /// tears the check down as a unit; no tick fires afterwards.
    pub fn spawn(&self) -> JoinHandle<()> {
        let last_update = Arc::clone(&self.last_update);
        let offline_tx = self.offline_tx.clone();

        tokio::spawn(async move {
            let mut ticker = interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let last = *last_update.lock().expect("liveness clock poisoned");
                if Instant::now().duration_since(last) > OFFLINE_AFTER {
                    let went_offline = offline_tx.send_if_modified(|offline| {
                        if !*offline {
                            *offline = true;
                            true
                        } else {
                            false
                        }
                    });
                    if went_offline {
                        warn!(
                            window_sec = OFFLINE_AFTER.as_secs(),
                            "no liveness update inside the window, device offline"
                        );
                    }
                }
            }
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn stays_online_inside_window() {
        let monitor = StalenessMonitor::new();
        let _check = monitor.spawn();

        sleep(Duration::from_secs(60)).await;
        assert!(!monitor.offline());
    }

    #[tokio::test(start_paused = true)]
    async fn goes_offline_after_window_of_silence() {
        let monitor = StalenessMonitor::new();
        let _check = monitor.spawn();
        let mut rx = monitor.watch();

        let flipped = tokio::time::timeout(
            Duration::from_secs(120),
            rx.wait_for(|offline| *offline),
        )
        .await;
        assert!(flipped.is_ok(), "monitor never went offline");
    }

    #[tokio::test(start_paused = true)]
    async fn update_clears_offline_immediately() {
        let monitor = StalenessMonitor::new();
        let _check = monitor.spawn();
        let mut rx = monitor.watch();
        rx.wait_for(|offline| *offline).await.unwrap();

        // Recovery does not wait for the next tick.
        monitor.record_update();
        assert!(!monitor.offline());
    }

    #[tokio::test(start_paused = true)]
    async fn updates_keep_monitor_online() {
        let monitor = StalenessMonitor::new();
        let _check = monitor.spawn();

        // Update every 30s: never a 65s gap, never offline.
        for _ in 0..6 {
            sleep(Duration::from_secs(30)).await;
            monitor.record_update();
            assert!(!monitor.offline());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_check_never_fires_again() {
        let monitor = StalenessMonitor::new();
        let check = monitor.spawn();
        check.abort();

        sleep(Duration::from_secs(300)).await;
        assert!(!monitor.offline());
    }

    #[tokio::test(start_paused = true)]
    async fn only_a_tick_can_set_offline() {
        let monitor = StalenessMonitor::new();
        // No check task running: silence alone never flips the flag.
        sleep(Duration::from_secs(300)).await;
        assert!(!monitor.offline());
    }
}
