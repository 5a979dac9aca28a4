pub mod config;
pub mod engine;
pub mod metrics_server;
pub mod observability;
pub mod provider;

pub use engine::{NarEngine, NarOutcome, NarReport, NarRequest};
