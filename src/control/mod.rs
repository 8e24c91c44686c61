pub mod handle;
pub mod runner;

pub use handle::ConfigHandle;
pub use runner::{ControlLoop, LoopOptions, PeakScale, TickOutcome, WRITE_EPSILON};
