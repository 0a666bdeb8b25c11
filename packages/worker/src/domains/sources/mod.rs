//! Job sources and their scrape/circuit-breaker bookkeeping.

pub mod models;

pub use models::{JobSource, SourceType, CIRCUIT_BREAK_COOLDOWN_HOURS, CIRCUIT_BREAK_THRESHOLD};
