use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TameError};

/// Parameters of one limiter session.
///
/// Values are only trusted after [`LimiterConfig::validate`]; the engine
/// never sees an unvalidated config through [`crate::control::ConfigHandle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Master switch. `false` behaves like a cap of 1.0 (passthrough).
    pub enabled: bool,
    /// Maximum projected output level, `(0, 1]`. A cap of 1.0 or more disables limiting.
    pub cap: f32,
    pub attack: Duration,
    pub release: Duration,
    pub hold: Duration,
    /// Automatic control pause after a manual volume change.
    pub cooldown: Duration,
    /// Soft knee width above the cap, in dB.
    pub leeway_db: f32,
    /// Upper bound of the progressive attenuation multiplier.
    pub dampening_max: f32,
    /// Time to ramp the multiplier from 1.0 to `dampening_max`. Zero jumps straight there.
    pub dampening_speed: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cap: 0.2,
            attack: Duration::from_millis(50),
            release: Duration::from_millis(500),
            hold: Duration::from_millis(150),
            cooldown: Duration::from_secs(2),
            leeway_db: 3.0,
            dampening_max: 1.0,
            dampening_speed: Duration::ZERO,
        }
    }
}

impl LimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cap.is_finite() || self.cap <= 0.0 {
            return Err(TameError::invalid("cap", format!("must be positive, got {}", self.cap)));
        }
        for (field, value) in [
            ("attack", self.attack),
            ("release", self.release),
            ("hold", self.hold),
            ("cooldown", self.cooldown),
        ] {
            if value.is_zero() {
                return Err(TameError::invalid(field, "must be a positive duration"));
            }
        }
        if !self.leeway_db.is_finite() || self.leeway_db < 0.0 {
            return Err(TameError::invalid(
                "leeway_db",
                format!("must be >= 0, got {}", self.leeway_db),
            ));
        }
        if !self.dampening_max.is_finite() || self.dampening_max < 1.0 {
            return Err(TameError::invalid(
                "dampening_max",
                format!("must be >= 1.0, got {}", self.dampening_max),
            ));
        }
        Ok(())
    }

    /// True when the engine should leave the volume alone entirely.
    pub fn is_passthrough(&self) -> bool {
        !self.enabled || self.cap >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LimiterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let bad = [
            LimiterConfig { cap: 0.0, ..Default::default() },
            LimiterConfig { cap: f32::NAN, ..Default::default() },
            LimiterConfig { attack: Duration::ZERO, ..Default::default() },
            LimiterConfig { cooldown: Duration::ZERO, ..Default::default() },
            LimiterConfig { leeway_db: -1.0, ..Default::default() },
            LimiterConfig { dampening_max: 0.5, ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(TameError::InvalidConfig { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_cap_at_or_above_one_is_passthrough() {
        let config = LimiterConfig { cap: 1.0, ..Default::default() };
        assert!(config.validate().is_ok());
        assert!(config.is_passthrough());

        let disabled = LimiterConfig { enabled: false, ..Default::default() };
        assert!(disabled.is_passthrough());
        assert!(!LimiterConfig::default().is_passthrough());
    }
}
