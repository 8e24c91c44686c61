pub mod cli;
pub mod lock;
pub mod logging;
