//! Live peak meter on a cpal input device.
//!
//! Point it at a loopback or monitor device ("Monitor of ..." on PulseAudio,
//! BlackHole on macOS) to meter what is actually being played.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use super::traits::PeakSource;
use crate::error::{Result, TameError};

/// Holds the loudest sample seen since the last read.
///
/// The cpal stream lives on its own thread since streams are not `Send`
/// on every host.
pub struct PeakMeter {
    level: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
    device_name: String,
}

impl PeakMeter {
    /// Open `device_name`, or the default input device when `None`.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let level = Arc::new(AtomicU32::new(0));
        let alive = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<String, String>>();

        let wanted = device_name.map(str::to_string);
        let (lv, al, run) = (level.clone(), alive.clone(), running.clone());
        let handle = thread::spawn(move || {
            let stream = match open_stream(wanted.as_deref(), lv, al) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            while run.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        });

        let device_name = match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(TameError::SourceUnavailable(e));
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                return Err(TameError::SourceUnavailable("input stream did not start".into()));
            }
        };
        tracing::info!(device = %device_name, "peak meter started");

        Ok(Self {
            level,
            alive,
            running,
            thread_handle: Some(handle),
            device_name,
        })
    }

    /// Names of the input devices the default host can meter.
    pub fn input_devices() -> Vec<String> {
        let host = cpal::default_host();
        let names: Vec<String> = host
            .input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default();
        unique_names(names)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeakMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PeakSource for PeakMeter {
    fn read_peak(&self) -> Result<f32> {
        if !self.alive.load(Ordering::Relaxed) {
            return Err(TameError::SourceUnavailable(format!(
                "{} disconnected",
                self.device_name
            )));
        }
        let bits = self.level.swap(0, Ordering::Relaxed);
        Ok(f32::from_bits(bits).min(1.0))
    }

    fn name(&self) -> String {
        self.device_name.clone()
    }
}

/// Drops repeated names anywhere in the list, keeping host order.
fn unique_names(mut names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
    names
}

fn open_stream(
    wanted: Option<&str>,
    level: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
) -> std::result::Result<(cpal::Stream, String), String> {
    let host = cpal::default_host();
    let device = match wanted {
        Some(name) => host
            .input_devices()
            .map_err(|e| format!("Failed to list input devices: {}", e))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("No input device named {}", name))?,
        None => host
            .default_input_device()
            .ok_or("No input device available")?,
    };
    let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| format!("Failed to query input config: {}", e))?;
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_meter_stream::<f32>(&device, &config, level, alive),
        SampleFormat::I16 => build_meter_stream::<i16>(&device, &config, level, alive),
        SampleFormat::U16 => build_meter_stream::<u16>(&device, &config, level, alive),
        SampleFormat::I32 => build_meter_stream::<i32>(&device, &config, level, alive),
        other => return Err(format!("Unsupported sample format {:?}", other)),
    }
    .map_err(|e| format!("Failed to build input stream: {}", e))?;

    stream.play().map_err(|e| format!("Failed to start input stream: {}", e))?;
    Ok((stream, name))
}

fn build_meter_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    level: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let peak = data
                .iter()
                .fold(0.0f32, |acc, &s| acc.max(f32::from_sample(s).abs()));
            // Non-negative floats order the same as their bit patterns.
            level.fetch_max(peak.to_bits(), Ordering::Relaxed);
        },
        move |err| {
            tracing::warn!("peak meter stream error: {}", err);
            alive.store(false, Ordering::Relaxed);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names_drops_non_adjacent_duplicates() {
        let names = ["Monitor", "Mic", "Monitor", "Line In", "Mic"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(unique_names(names), vec!["Monitor", "Mic", "Line In"]);
    }
}
