//! Common utilities and types shared across minizab

pub mod config;
pub mod ensemble;
pub mod error;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, NodeConfig, StorageBackend};
pub use ensemble::{quorum_reached, Ensemble};
pub use error::{Error, Result};
pub use utils::{client_timestamp, duration_millis, parse_duration, timestamp_now};
