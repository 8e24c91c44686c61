use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::handle::ConfigHandle;
use crate::audio::{PeakSource, VolumeChannel};
use crate::error::{Result, TameError};
use crate::limiter::{EngineSnapshot, LimiterConfig, LimiterEngine};

/// Writes closer than this to the current volume are skipped.
pub const WRITE_EPSILON: f32 = 0.001;

/// What the peak source measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakScale {
    /// The signal before the system volume is applied.
    #[default]
    PreVolume,
    /// The signal after the system volume (e.g. a post-fader meter); divided back out.
    PostVolume,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub interval: Duration,
    /// Bound on every single device call.
    pub io_timeout: Duration,
    pub peak_scale: PeakScale,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
            io_timeout: Duration::from_millis(250),
            peak_scale: PeakScale::PreVolume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Volume unreadable, or a device call timed out or is still running;
    /// the previous target stays in effect.
    Skipped,
    /// Target within [`WRITE_EPSILON`] of the current volume.
    Unchanged,
    Written(f32),
    Rejected,
}

/// Device health, so failures are logged once rather than every tick.
#[derive(Debug, Default)]
struct Health {
    source_down: bool,
    volume_down: bool,
    writes_rejected: bool,
}

/// A device call that outlived `io_timeout`. No other call is issued until
/// it finishes, so hung devices cannot pile up blocking threads.
enum Stalled {
    Read(JoinHandle<Result<f32>>),
    /// A write that may still land; `previous` is the volume it replaces.
    Write {
        task: JoinHandle<Result<()>>,
        previous: f32,
    },
}

impl Stalled {
    fn is_finished(&self) -> bool {
        match self {
            Stalled::Read(task) => task.is_finished(),
            Stalled::Write { task, .. } => task.is_finished(),
        }
    }
}

/// Result of a bounded call: finished in time, or still running.
enum Call<T> {
    Done(Result<T>),
    TimedOut(JoinHandle<Result<T>>),
}

/// Drives the engine: read, decide, write, sleep.
pub struct ControlLoop {
    engine: LimiterEngine,
    peak: Arc<dyn PeakSource>,
    volume: Arc<dyn VolumeChannel>,
    config: watch::Receiver<LimiterConfig>,
    options: LoopOptions,
    status: watch::Sender<EngineSnapshot>,
    health: Health,
    stalled: Option<Stalled>,
}

impl ControlLoop {
    pub fn new(
        peak: Arc<dyn PeakSource>,
        volume: Arc<dyn VolumeChannel>,
        config: &ConfigHandle,
        options: LoopOptions,
    ) -> Self {
        let mut config = config.subscribe();
        let engine = LimiterEngine::new(config.borrow_and_update().clone());
        let (status, _) = watch::channel(engine.snapshot());
        Self {
            engine,
            peak,
            volume,
            config,
            options,
            status,
            health: Health::default(),
            stalled: None,
        }
    }

    /// Engine snapshots, updated after every evaluated tick.
    pub fn status(&self) -> watch::Receiver<EngineSnapshot> {
        self.status.subscribe()
    }

    pub fn engine(&self) -> &LimiterEngine {
        &self.engine
    }

    /// Runs until `shutdown` turns true or its sender goes away.
    ///
    /// A tick in progress is abandoned on shutdown; whatever volume is in
    /// effect at that point is left as-is.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            peak = %self.peak.name(),
            volume = %self.volume.name(),
            interval_ms = self.options.interval.as_millis() as u64,
            "control loop started"
        );
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = async {
                    interval.tick().await;
                    self.tick().await
                } => {}
            }
        }
        info!(phase = ?self.engine.phase(), "control loop stopped");
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if !self.settle_stalled().await {
            return TickOutcome::Skipped;
        }

        if self.config.has_changed().unwrap_or(false) {
            let next = self.config.borrow_and_update().clone();
            info!(cap = next.cap, enabled = next.enabled, "limiter config updated");
            self.engine.set_config(next);
        }

        let channel = self.volume.clone();
        let volume = match self.read("volume read", move || channel.read_volume()).await {
            Ok(volume) => {
                if std::mem::take(&mut self.health.volume_down) {
                    info!("volume channel is back");
                }
                volume
            }
            Err(e) => {
                if !std::mem::replace(&mut self.health.volume_down, true) {
                    warn!("skipping ticks, {}", e);
                }
                return TickOutcome::Skipped;
            }
        };

        let source = self.peak.clone();
        let peak = match self.read("peak read", move || source.read_peak()).await {
            Ok(peak) => {
                if std::mem::take(&mut self.health.source_down) {
                    info!("peak source is back");
                }
                peak
            }
            Err(TameError::Timeout(what)) => {
                debug!("{} timed out, skipping tick", what);
                return TickOutcome::Skipped;
            }
            Err(e) => {
                if !std::mem::replace(&mut self.health.source_down, true) {
                    warn!("limiting paused, {}", e);
                }
                0.0
            }
        };
        let peak = match self.options.peak_scale {
            PeakScale::PreVolume => peak,
            PeakScale::PostVolume if volume > 0.01 => (peak / volume).min(1.0),
            PeakScale::PostVolume => peak,
        };

        let before = self.engine.phase();
        let target = self.engine.step(peak, volume, Instant::now().into_std());
        let after = self.engine.phase();
        if before != after {
            let snapshot = self.engine.snapshot();
            info!(
                from = ?before,
                to = ?after,
                volume,
                target,
                baseline = snapshot.baseline_volume,
                "phase change"
            );
        }
        self.status.send_replace(self.engine.snapshot());

        if (target - volume).abs() <= WRITE_EPSILON {
            return TickOutcome::Unchanged;
        }

        let channel = self.volume.clone();
        match self.call(move || channel.write_volume(target)).await {
            Call::Done(Ok(())) => {
                self.write_landed();
                TickOutcome::Written(target)
            }
            Call::Done(Err(e)) => {
                self.write_failed(e, volume);
                TickOutcome::Rejected
            }
            Call::TimedOut(task) => {
                // The write may still land: the engine keeps expecting `target`
                // until the task says otherwise.
                debug!("volume write timed out, waiting for it");
                self.stalled = Some(Stalled::Write { task, previous: volume });
                TickOutcome::Skipped
            }
        }
    }

    /// Collects a call left over from an earlier tick.
    ///
    /// `false` while it is still running.
    async fn settle_stalled(&mut self) -> bool {
        let Some(stalled) = self.stalled.take() else {
            return true;
        };
        if !stalled.is_finished() {
            self.stalled = Some(stalled);
            return false;
        }
        match stalled {
            Stalled::Read(task) => {
                let _ = task.await;
            }
            Stalled::Write { task, previous } => match task.await {
                Ok(Ok(())) => self.write_landed(),
                Ok(Err(e)) => self.write_failed(e, previous),
                Err(join) => self.write_failed(TameError::Io(std::io::Error::other(join)), previous),
            },
        }
        true
    }

    fn write_landed(&mut self) {
        if std::mem::take(&mut self.health.writes_rejected) {
            info!("volume writes accepted again");
        }
    }

    fn write_failed(&mut self, e: TameError, actual: f32) {
        if !std::mem::replace(&mut self.health.writes_rejected, true) {
            warn!("{}, retrying next tick", e);
        }
        self.engine.write_rejected(actual);
    }

    /// A bounded read; on timeout the call is parked and the tick skipped.
    async fn read<F>(&mut self, what: &'static str, f: F) -> Result<f32>
    where
        F: FnOnce() -> Result<f32> + Send + 'static,
    {
        match self.call(f).await {
            Call::Done(result) => result,
            Call::TimedOut(task) => {
                self.stalled = Some(Stalled::Read(task));
                Err(TameError::Timeout(what))
            }
        }
    }

    /// Runs a blocking device call off the async workers, bounded by `io_timeout`.
    async fn call<T, F>(&self, f: F) -> Call<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut task = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.options.io_timeout, &mut task).await {
            Ok(Ok(result)) => Call::Done(result),
            Ok(Err(join)) => Call::Done(Err(TameError::Io(std::io::Error::other(join)))),
            Err(_) => Call::TimedOut(task),
        }
    }
}
