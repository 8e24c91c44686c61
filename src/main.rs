use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use tame::app::cli::{Args, Backend};
use tame::app::{lock, logging};
use tame::audio::{PeakSource, SimulatedDevice, SystemVolume, VolumeChannel};
use tame::config::{FileConfigProvider, Settings};
use tame::control::{ConfigHandle, ControlLoop};
use tame::limiter::Phase;

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();
    let args = Args::parse();

    if args.generate_config {
        print!("{}", Settings::default().to_toml()?);
        return Ok(());
    }
    if args.list_devices {
        list_devices();
        return Ok(());
    }

    let _log_guard = logging::init(&Settings::log_dir(), args.log_level.as_deref())?;

    let overrides = args.overrides();
    let mut settings = Settings::load();
    overrides.apply(&mut settings);
    let handle = ConfigHandle::new(settings.to_limiter_config()?)?;

    // Two limiters on one volume knob would read each other as manual changes
    let instance_lock = match args.backend {
        Backend::System => match lock::try_acquire_instance_lock() {
            Some(file) => Some(file),
            None => anyhow::bail!("another tame instance is already running"),
        },
        Backend::Simulated => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (peak, volume) = open_devices(&args, &settings, shutdown_rx.clone())?;

    let control = ControlLoop::new(peak, volume, &handle, settings.loop_options());
    if args.status {
        spawn_status_printer(control.status());
    }
    if !args.no_watch {
        let provider = FileConfigProvider::new(Settings::config_path(), handle.clone(), overrides);
        tokio::spawn(provider.run(shutdown_rx.clone()));
    }

    let worker = tokio::spawn(control.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        warn!("control loop ended abnormally: {}", e);
    }

    if instance_lock.is_some() {
        lock::release_instance_lock();
    }
    Ok(())
}

type Devices = (Arc<dyn PeakSource>, Arc<dyn VolumeChannel>);

fn open_devices(args: &Args, settings: &Settings, shutdown: watch::Receiver<bool>) -> Result<Devices> {
    match args.backend {
        Backend::System => {
            let volume = SystemVolume::detect()?;
            info!(channel = %volume.name(), "volume channel ready");
            Ok((open_meter(settings)?, Arc::new(volume)))
        }
        Backend::Simulated => {
            let device = SimulatedDevice::new(0.5);
            tokio::spawn(demo_signal(device.clone(), shutdown));
            Ok((Arc::new(device.clone()), Arc::new(device)))
        }
    }
}

#[cfg(feature = "meter")]
fn open_meter(settings: &Settings) -> Result<Arc<dyn PeakSource>> {
    let meter = tame::audio::PeakMeter::open(settings.input_device.as_deref())?;
    Ok(Arc::new(meter))
}

#[cfg(not(feature = "meter"))]
fn open_meter(_settings: &Settings) -> Result<Arc<dyn PeakSource>> {
    anyhow::bail!("built without the `meter` feature; only --backend simulated is available")
}

#[cfg(feature = "meter")]
fn list_devices() {
    for name in tame::audio::PeakMeter::input_devices() {
        println!("{}", name);
    }
}

#[cfg(not(feature = "meter"))]
fn list_devices() {
    eprintln!("built without the `meter` feature");
}

/// Loud one-second bursts every four seconds.
async fn demo_signal(device: SimulatedDevice, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut elapsed_ms: u64 = 0;
    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = interval.tick() => {
                let loud = elapsed_ms % 4000 < 1000;
                device.set_peak(if loud { 0.8 } else { 0.15 });
                elapsed_ms += 100;
            }
        }
    }
}

fn spawn_status_printer(mut status: watch::Receiver<tame::limiter::EngineSnapshot>) {
    tokio::spawn(async move {
        let mut last: Option<Phase> = None;
        while status.changed().await.is_ok() {
            let snapshot = *status.borrow_and_update();
            if last == Some(snapshot.phase) {
                continue;
            }
            last = Some(snapshot.phase);
            match serde_json::to_string(&snapshot) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("could not encode status: {}", e),
            }
        }
    });
}
