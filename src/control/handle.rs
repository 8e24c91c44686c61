use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::limiter::LimiterConfig;

/// Publishes whole [`LimiterConfig`] snapshots to the control loop.
///
/// Only validated configs get through; a rejected update leaves the
/// previous snapshot in effect.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<LimiterConfig>>,
}

impl ConfigHandle {
    pub fn new(initial: LimiterConfig) -> Result<Self> {
        initial.validate()?;
        let (tx, _rx) = watch::channel(initial);
        Ok(Self { tx: Arc::new(tx) })
    }

    pub fn update(&self, config: LimiterConfig) -> Result<()> {
        config.validate()?;
        self.tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        });
        Ok(())
    }

    pub fn current(&self) -> LimiterConfig {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LimiterConfig> {
        self.tx.subscribe()
    }
}
