//! Level math for the limiter: dB conversion, the soft knee and dampening.
//!
//! Volumes and peaks are linear amplitudes in `[0, 1]`; attenuation is
//! expressed in positive dB.

use std::time::Duration;

/// Linear amplitude to dB. Non-positive input maps to `-inf`.
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.log10()
}

/// Gain factor for a (positive) attenuation in dB.
pub fn attenuation_to_gain(attenuation_db: f32) -> f32 {
    10.0_f32.powf(-attenuation_db / 20.0)
}

/// How far `projected` sits above `cap`, in dB. `None` when it does not exceed the cap.
pub fn excess_db(projected: f32, cap: f32) -> Option<f32> {
    if projected > cap && cap > 0.0 {
        Some(amplitude_to_db(projected / cap))
    } else {
        None
    }
}

/// Attenuation required for a given excess.
///
/// Inside the knee the correction ramps linearly from nothing at the cap to
/// the full excess at `leeway_db`; past the knee the full excess is removed,
/// which puts the projected output exactly on the cap.
pub fn knee_attenuation_db(excess_db: f32, leeway_db: f32) -> f32 {
    if excess_db <= 0.0 {
        return 0.0;
    }
    if leeway_db <= 0.0 || excess_db >= leeway_db {
        return excess_db;
    }
    excess_db * (excess_db / leeway_db)
}

/// Dampening multiplier after `sustained` of continuous excess.
pub fn dampening_factor(sustained: Duration, max: f32, speed: Duration) -> f32 {
    if max <= 1.0 {
        return 1.0;
    }
    let progress = if speed.is_zero() {
        1.0
    } else {
        (sustained.as_secs_f32() / speed.as_secs_f32()).min(1.0)
    };
    (1.0 + (max - 1.0) * progress).clamp(1.0, max)
}

/// Volume that keeps `peak` within the cap, starting from `ceiling`.
///
/// Never exceeds `ceiling`, never goes below zero. A silent peak leaves
/// `ceiling` unconstrained.
pub fn limited_volume(peak: f32, ceiling: f32, cap: f32, leeway_db: f32, dampening: f32) -> f32 {
    if peak <= 0.0 {
        return ceiling;
    }
    let Some(excess) = excess_db(peak * ceiling, cap) else {
        return ceiling;
    };
    let attenuation = knee_attenuation_db(excess, leeway_db) * dampening.max(1.0);
    (ceiling * attenuation_to_gain(attenuation)).clamp(0.0, ceiling)
}
