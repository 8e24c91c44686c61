use crate::error::Result;

/// Instantaneous output peak, normalized to `[0, 1]` as if the volume were at 100%.
pub trait PeakSource: Send + Sync {
    /// Fails with [`TameError::SourceUnavailable`](crate::error::TameError::SourceUnavailable)
    /// when the device is absent or disconnected.
    fn read_peak(&self) -> Result<f32>;

    fn name(&self) -> String {
        "peak source".to_string()
    }
}

/// The system volume knob, normalized to `[0, 1]`.
pub trait VolumeChannel: Send + Sync {
    fn read_volume(&self) -> Result<f32>;

    /// Fails with [`TameError::VolumeWriteRejected`](crate::error::TameError::VolumeWriteRejected)
    /// when the device refuses the change.
    fn write_volume(&self, volume: f32) -> Result<()>;

    fn name(&self) -> String {
        "volume channel".to_string()
    }
}
