//! System volume through the platform's command line tools.
//!
//! macOS goes through `osascript`, Linux through PulseAudio/PipeWire's `pactl`.

use anyhow::{Context, Result as AnyResult};
use std::process::Command;

use super::traits::VolumeChannel;
use crate::error::{Result, TameError};

/// `pactl` raw volume for 100%.
const PA_VOLUME_NORM: f32 = 65536.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeBackend {
    AppleScript,
    Pactl,
}

/// The default output device's master volume.
#[derive(Debug, Clone)]
pub struct SystemVolume {
    backend: VolumeBackend,
}

impl SystemVolume {
    /// Pick the backend for this platform, checking that its tool answers.
    pub fn detect() -> Result<Self> {
        let backend = if cfg!(target_os = "macos") {
            VolumeBackend::AppleScript
        } else if cfg!(target_os = "linux") {
            VolumeBackend::Pactl
        } else {
            return Err(TameError::VolumeUnavailable(format!(
                "no volume backend for {}",
                std::env::consts::OS
            )));
        };
        let system = Self { backend };
        system.read_volume()?;
        Ok(system)
    }

    pub fn backend(&self) -> VolumeBackend {
        self.backend
    }
}

impl VolumeChannel for SystemVolume {
    fn read_volume(&self) -> Result<f32> {
        let parsed = match self.backend {
            VolumeBackend::AppleScript => {
                run_command("osascript", &["-e", "output volume of (get volume settings)"])
                    .map(|out| parse_osascript_volume(&out))
            }
            VolumeBackend::Pactl => run_command("pactl", &["get-sink-volume", "@DEFAULT_SINK@"])
                .map(|out| parse_pactl_volume(&out)),
        };
        match parsed {
            Ok(Some(volume)) => Ok(volume),
            Ok(None) => Err(TameError::VolumeUnavailable("unrecognized volume output".into())),
            Err(e) => Err(TameError::VolumeUnavailable(format!("{e:#}"))),
        }
    }

    fn write_volume(&self, volume: f32) -> Result<()> {
        let volume = volume.clamp(0.0, 1.0);
        let result = match self.backend {
            VolumeBackend::AppleScript => {
                let percent = (volume * 100.0).round() as u32;
                let script = format!("set volume output volume {percent}");
                run_command("osascript", &["-e", &script])
            }
            VolumeBackend::Pactl => {
                let raw = (volume * PA_VOLUME_NORM).round() as u32;
                run_command("pactl", &["set-sink-volume", "@DEFAULT_SINK@", &raw.to_string()])
            }
        };
        result
            .map(|_| ())
            .map_err(|e| TameError::VolumeWriteRejected(format!("{e:#}")))
    }

    fn name(&self) -> String {
        match self.backend {
            VolumeBackend::AppleScript => "macOS output volume".to_string(),
            VolumeBackend::Pactl => "PulseAudio default sink".to_string(),
        }
    }
}

fn run_command(program: &str, args: &[&str]) -> AnyResult<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} error: {}", program, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `osascript` prints 0-100, or `missing value` when the device has no volume control.
fn parse_osascript_volume(output: &str) -> Option<f32> {
    let percent: f32 = output.trim().parse().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

/// Reads the raw value of the first channel from `pactl get-sink-volume`.
fn parse_pactl_volume(output: &str) -> Option<f32> {
    let line = output
        .lines()
        .find(|l| l.trim_start().starts_with("Volume:"))?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let raw = tokens
        .windows(2)
        .find_map(|w| (w[1] == "/").then(|| w[0].parse::<u32>().ok()).flatten())?;
    Some((raw as f32 / PA_VOLUME_NORM).min(1.0))
}
