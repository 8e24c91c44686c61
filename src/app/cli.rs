use clap::{Parser, ValueEnum};

use crate::config::SettingsOverrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Real system volume and a live peak meter
    System,
    /// In-memory device, for trying settings without touching the volume
    Simulated,
}

/// Tame - turns the system volume down when audio gets too loud
#[derive(Parser, Debug)]
#[command(name = "tame", version, about)]
pub struct Args {
    /// Maximum projected output level (0-1]; 1.0 disables limiting
    #[arg(long)]
    pub cap: Option<f32>,

    /// How long a peak must last before limiting (ms)
    #[arg(long)]
    pub attack_ms: Option<u64>,

    /// Time to ramp back to the original volume (ms)
    #[arg(long)]
    pub release_ms: Option<u64>,

    /// Time to hold the reduced volume before releasing (ms)
    #[arg(long)]
    pub hold_ms: Option<u64>,

    /// Pause after you change the volume yourself (s)
    #[arg(long)]
    pub cooldown_s: Option<f32>,

    /// Soft knee width above the cap (dB)
    #[arg(long)]
    pub leeway_db: Option<f32>,

    /// Max extra reduction for sustained peaks (1.0 = off)
    #[arg(long)]
    pub dampening: Option<f32>,

    /// Seconds to reach full dampening (0 = instant)
    #[arg(long)]
    pub dampening_speed_s: Option<f32>,

    /// Polling interval (ms)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Input device to meter, e.g. a monitor/loopback device
    #[arg(long)]
    pub input_device: Option<String>,

    #[arg(long, value_enum, default_value_t = Backend::System)]
    pub backend: Backend,

    /// List meterable input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Print engine status as JSON lines on every phase change
    #[arg(long)]
    pub status: bool,

    /// Do not reload config.toml while running
    #[arg(long)]
    pub no_watch: bool,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "tame=trace"
    #[arg(long)]
    pub log_level: Option<String>,

    /// Generate default config.toml to stdout
    #[arg(long)]
    pub generate_config: bool,
}

impl Args {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            volume_cap: self.cap,
            attack_ms: self.attack_ms,
            release_ms: self.release_ms,
            hold_ms: self.hold_ms,
            cooldown_s: self.cooldown_s,
            leeway_db: self.leeway_db,
            dampening: self.dampening,
            dampening_speed_s: self.dampening_speed_s,
            poll_interval_ms: self.interval_ms,
            input_device: self.input_device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_become_overrides() {
        let args = Args::parse_from(["tame", "--cap", "0.3", "--hold-ms", "200", "--backend", "simulated"]);
        assert_eq!(args.backend, Backend::Simulated);
        let overrides = args.overrides();
        assert_eq!(overrides.volume_cap, Some(0.3));
        assert_eq!(overrides.hold_ms, Some(200));
        assert_eq!(overrides.attack_ms, None);
    }

    #[test]
    fn test_defaults_to_system_backend() {
        let args = Args::parse_from(["tame"]);
        assert_eq!(args.backend, Backend::System);
        assert!(!args.status);
    }
}
