//! Real-time synchronization and derived-state engine for an irrigation
//! device. Subscribes to named paths in a remote key-value store, derives an
//! offline flag and an operator alert from the live values, reconciles the
//! rolling sensor history, and forwards validated operator commands back
//! through the same store.

pub mod alert;
pub mod command;
pub mod config;
pub mod engine;
pub mod history;
pub mod liveness;
pub mod mqtt;
pub mod state;
pub mod store;
pub mod subscribe;

pub use alert::Alert;
pub use command::{CommandDispatcher, CommandError, FieldError};
pub use engine::Engine;
pub use history::HistoryPoint;
pub use liveness::StalenessMonitor;
pub use state::{DashboardState, DripTiming, Mode, SharedState, Thresholds};
pub use store::{MemoryStore, RemoteStore, StoreError};
pub use subscribe::{Feed, Subscriber};
