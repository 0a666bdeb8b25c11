pub mod source;

pub use source::{JobSource, SourceType, CIRCUIT_BREAK_COOLDOWN_HOURS, CIRCUIT_BREAK_THRESHOLD};
