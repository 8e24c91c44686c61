//! In-memory audio device for tests and dry runs.

use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{PeakSource, VolumeChannel};
use crate::error::{Result, TameError};

#[derive(Debug, Default)]
struct SimState {
    peak: f32,
    volume: f32,
    source_down: bool,
    reject_writes: bool,
    writes: Vec<f32>,
}

/// A fake output device: a settable peak and a volume knob that records writes.
///
/// Cloning shares the same device, so a test can keep one handle while the
/// control loop owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new(volume: f32) -> Self {
        let device = Self::default();
        device.lock().volume = volume;
        device
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not take the device down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_peak(&self, peak: f32) {
        self.lock().peak = peak;
    }

    /// Change the volume the way a user would, bypassing the write log.
    pub fn user_set_volume(&self, volume: f32) {
        self.lock().volume = volume;
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    pub fn set_source_down(&self, down: bool) {
        self.lock().source_down = down;
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    /// Every volume the limiter successfully wrote, oldest first.
    pub fn writes(&self) -> Vec<f32> {
        self.lock().writes.clone()
    }
}

impl PeakSource for SimulatedDevice {
    fn read_peak(&self) -> Result<f32> {
        let state = self.lock();
        if state.source_down {
            return Err(TameError::SourceUnavailable("simulated device unplugged".into()));
        }
        Ok(state.peak)
    }

    fn name(&self) -> String {
        "simulated".to_string()
    }
}

impl VolumeChannel for SimulatedDevice {
    fn read_volume(&self) -> Result<f32> {
        Ok(self.lock().volume)
    }

    fn write_volume(&self, volume: f32) -> Result<()> {
        let mut state = self.lock();
        if state.reject_writes {
            return Err(TameError::VolumeWriteRejected("simulated device unplugged".into()));
        }
        let volume = volume.clamp(0.0, 1.0);
        state.volume = volume;
        state.writes.push(volume);
        Ok(())
    }

    fn name(&self) -> String {
        "simulated".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let device = SimulatedDevice::new(0.5);
        let handle = device.clone();
        handle.set_peak(0.7);
        device.write_volume(0.3).unwrap();

        assert_eq!(handle.read_peak().unwrap(), 0.7);
        assert_eq!(handle.volume(), 0.3);
        assert_eq!(handle.writes(), vec![0.3]);
    }

    #[test]
    fn test_injected_failures() {
        let device = SimulatedDevice::new(0.5);
        device.set_source_down(true);
        device.set_reject_writes(true);

        assert!(matches!(device.read_peak(), Err(TameError::SourceUnavailable(_))));
        assert!(matches!(device.write_volume(0.1), Err(TameError::VolumeWriteRejected(_))));
        assert_eq!(device.volume(), 0.5);
        assert!(device.writes().is_empty());
    }
}
