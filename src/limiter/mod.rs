pub mod config;
pub mod engine;
pub mod gain;

pub use config::LimiterConfig;
pub use engine::{EngineSnapshot, EngineState, LimiterEngine, Phase, MANUAL_CHANGE_EPSILON};
