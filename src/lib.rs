pub mod app;
pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod limiter;

pub use error::{Result, TameError};
