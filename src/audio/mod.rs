#[cfg(feature = "meter")]
pub mod meter;
pub mod simulated;
pub mod system;
pub mod traits;

#[cfg(feature = "meter")]
pub use meter::PeakMeter;
pub use simulated::SimulatedDevice;
pub use system::SystemVolume;
pub use traits::{PeakSource, VolumeChannel};
