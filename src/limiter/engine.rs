use serde::Serialize;
use std::time::{Duration, Instant};

use super::config::LimiterConfig;
use super::gain;

/// Volume difference that counts as somebody else touching the volume.
pub const MANUAL_CHANGE_EPSILON: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    /// Excess seen, waiting for it to outlast the attack time.
    Attacking,
    Limiting,
    Holding,
    Releasing,
    /// Automatic control suspended after a manual volume change.
    Cooldown,
}

impl Phase {
    /// Phases in which the output volume is below what the user asked for.
    pub fn is_engaged(self) -> bool {
        matches!(self, Phase::Limiting | Phase::Holding | Phase::Releasing)
    }
}

/// Mutable history of the engine. Only [`LimiterEngine`] writes to it.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub phase: Phase,
    pub phase_entered_at: Option<Instant>,
    /// Level to restore once released: the user's requested volume.
    pub baseline_volume: f32,
    pub dampening_factor: f32,
    pub sustained_since: Option<Instant>,
    /// Last volume the engine produced or adopted from outside.
    pub last_observed_volume: Option<f32>,
    /// Level that limiting computes down from.
    ceiling: f32,
    /// Output frozen while holding, start point of the release ramp.
    held_volume: f32,
    last_projected: f32,
    last_target: f32,
}

impl EngineState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            phase_entered_at: None,
            baseline_volume: 0.0,
            dampening_factor: 1.0,
            sustained_since: None,
            last_observed_volume: None,
            ceiling: 0.0,
            held_volume: 0.0,
            last_projected: 0.0,
            last_target: 0.0,
        }
    }
}

/// Diagnostic view of the engine after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub baseline_volume: f32,
    pub dampening_factor: f32,
    pub projected_output: f32,
    pub target_volume: f32,
}

/// The limiter state machine.
///
/// Call [`step`](Self::step) once per tick with a non-decreasing `now`; it
/// returns the volume that should be in effect. The engine never touches a
/// device itself.
pub struct LimiterEngine {
    config: LimiterConfig,
    state: EngineState,
}

impl LimiterEngine {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: EngineState::new(),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Swap parameters without disturbing the phase in flight.
    pub fn set_config(&mut self, config: LimiterConfig) {
        self.config = config;
    }

    pub fn reset(&mut self) {
        self.state = EngineState::new();
    }

    /// The last target could not be applied; `actual` is the volume really in effect.
    ///
    /// Re-anchors change detection so the failed write is not mistaken for
    /// a manual change. The phase is kept and the write retried next tick.
    pub fn write_rejected(&mut self, actual: f32) {
        self.state.last_observed_volume = Some(sanitize(actual));
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            phase: self.state.phase,
            baseline_volume: self.state.baseline_volume,
            dampening_factor: self.state.dampening_factor,
            projected_output: self.state.last_projected,
            target_volume: self.state.last_target,
        }
    }

    pub fn step(&mut self, peak: f32, current_volume: f32, now: Instant) -> f32 {
        let peak = sanitize(peak);
        let volume = sanitize(current_volume);

        let target = self.evaluate(peak, volume, now);
        self.state.last_observed_volume = Some(target);
        self.state.last_target = target;
        target
    }

    fn evaluate(&mut self, peak: f32, volume: f32, now: Instant) -> f32 {
        let manual_change = self
            .state
            .last_observed_volume
            .is_some_and(|last| (volume - last).abs() > MANUAL_CHANGE_EPSILON);
        if manual_change {
            self.enter_cooldown(volume, now);
        }

        if self.state.phase == Phase::Cooldown {
            if self.elapsed(now) < self.config.cooldown {
                self.state.last_projected = peak * volume;
                return volume;
            }
            self.enter(Phase::Idle, now);
        }

        if self.config.is_passthrough() {
            return self.passthrough(peak, volume, now);
        }

        let reference = if self.state.phase.is_engaged() {
            self.state.baseline_volume
        } else {
            volume
        };
        let projected = peak * reference;
        self.state.last_projected = projected;
        let over = peak > 0.0 && projected > self.config.cap;
        self.update_dampening(over, now);

        let next = self.next_phase(over, now);
        if next != self.state.phase {
            if let Some(settled) = self.on_transition(next, volume, now) {
                return settled;
            }
        }
        self.output(peak, volume, now)
    }

    /// Transition table. Timing guards read the time spent in the current phase.
    fn next_phase(&self, over: bool, now: Instant) -> Phase {
        let elapsed = self.elapsed(now);
        match (self.state.phase, over) {
            (Phase::Idle, false) => Phase::Idle,
            (Phase::Idle, true) => Phase::Attacking,
            (Phase::Attacking, false) => Phase::Idle,
            (Phase::Attacking, true) if elapsed >= self.config.attack => Phase::Limiting,
            (Phase::Attacking, true) => Phase::Attacking,
            (Phase::Limiting, true) => Phase::Limiting,
            (Phase::Limiting, false) => Phase::Holding,
            (Phase::Holding, true) => Phase::Limiting,
            (Phase::Holding, false) if elapsed >= self.config.hold => Phase::Releasing,
            (Phase::Holding, false) => Phase::Holding,
            (Phase::Releasing, true) => Phase::Limiting,
            (Phase::Releasing, false) if elapsed >= self.config.release => Phase::Idle,
            (Phase::Releasing, false) => Phase::Releasing,
            (Phase::Cooldown, _) => Phase::Idle,
        }
    }

    /// Entry actions. Returns the tick's output when the transition settles it.
    fn on_transition(&mut self, next: Phase, volume: f32, now: Instant) -> Option<f32> {
        let mut settled = None;
        match (self.state.phase, next) {
            (Phase::Attacking, Phase::Limiting) => {
                self.state.baseline_volume = volume;
                self.state.ceiling = volume;
            }
            // Abort mid-release: limit down from where the ramp got to.
            (Phase::Releasing, Phase::Limiting) => {
                self.state.ceiling = self.release_level(now);
            }
            (Phase::Holding, Phase::Releasing) => {
                self.state.ceiling = self.state.held_volume;
            }
            (Phase::Releasing, Phase::Idle) => {
                settled = Some(self.state.baseline_volume);
            }
            _ => {}
        }
        self.enter(next, now);
        settled
    }

    fn output(&mut self, peak: f32, volume: f32, now: Instant) -> f32 {
        match self.state.phase {
            Phase::Idle | Phase::Attacking | Phase::Cooldown => volume,
            Phase::Limiting => {
                let limited = gain::limited_volume(
                    peak,
                    self.state.ceiling,
                    self.config.cap,
                    self.config.leeway_db,
                    self.state.dampening_factor,
                );
                self.state.held_volume = limited;
                limited
            }
            Phase::Holding => self.state.held_volume,
            Phase::Releasing => self.release_level(now),
        }
    }

    /// Linear ramp from the held level (stored in `ceiling`) back to the baseline.
    fn release_level(&self, now: Instant) -> f32 {
        let from = self.state.ceiling;
        let to = self.state.baseline_volume;
        let progress =
            (self.elapsed(now).as_secs_f32() / self.config.release.as_secs_f32()).clamp(0.0, 1.0);
        from + (to - from) * progress
    }

    fn passthrough(&mut self, peak: f32, volume: f32, now: Instant) -> f32 {
        let restore = self.state.phase.is_engaged();
        self.state.sustained_since = None;
        self.state.dampening_factor = 1.0;
        self.state.last_projected = peak * volume;
        if self.state.phase != Phase::Idle {
            self.enter(Phase::Idle, now);
        }
        if restore {
            self.state.baseline_volume
        } else {
            volume
        }
    }

    fn update_dampening(&mut self, over: bool, now: Instant) {
        if !over {
            self.state.sustained_since = None;
            self.state.dampening_factor = 1.0;
            return;
        }
        let since = *self.state.sustained_since.get_or_insert(now);
        self.state.dampening_factor = gain::dampening_factor(
            now.saturating_duration_since(since),
            self.config.dampening_max,
            self.config.dampening_speed,
        );
    }

    fn enter_cooldown(&mut self, volume: f32, now: Instant) {
        self.state.baseline_volume = volume;
        self.state.ceiling = volume;
        self.state.sustained_since = None;
        self.state.dampening_factor = 1.0;
        self.enter(Phase::Cooldown, now);
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        self.state.phase = phase;
        self.state.phase_entered_at = Some(now);
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.state
            .phase_entered_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn hard_config() -> LimiterConfig {
        LimiterConfig {
            cap: 0.2,
            leeway_db: 0.0,
            attack: ms(50),
            hold: ms(150),
            release: ms(500),
            ..Default::default()
        }
    }

    /// Drives the engine to Limiting at volume 0.5 / peak 0.5 and returns the start instant.
    fn engage(engine: &mut LimiterEngine) -> Instant {
        let t0 = Instant::now();
        assert_eq!(engine.step(0.5, 0.5, t0), 0.5);
        assert_eq!(engine.phase(), Phase::Attacking);
        let v = engine.step(0.5, 0.5, t0 + ms(50));
        assert_eq!(engine.phase(), Phase::Limiting);
        assert!((v - 0.4).abs() < 1e-4);
        t0
    }

    #[test]
    fn test_idle_under_cap_is_passthrough() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = Instant::now();
        assert_eq!(engine.step(0.3, 0.5, t0), 0.5);
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_short_excess_reverts_to_idle() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = Instant::now();
        assert_eq!(engine.step(0.9, 0.5, t0), 0.5);
        assert_eq!(engine.step(0.9, 0.5, t0 + ms(30)), 0.5);
        assert_eq!(engine.phase(), Phase::Attacking);
        assert_eq!(engine.step(0.1, 0.5, t0 + ms(40)), 0.5);
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_holding_returns_to_limiting_without_attack() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = engage(&mut engine);
        engine.step(0.0, 0.4, t0 + ms(60));
        assert_eq!(engine.phase(), Phase::Holding);
        engine.step(0.5, 0.4, t0 + ms(70));
        assert_eq!(engine.phase(), Phase::Limiting);
    }

    #[test]
    fn test_release_abort_does_not_snap_up() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = engage(&mut engine);
        engine.step(0.0, 0.4, t0 + ms(60));
        engine.step(0.0, 0.4, t0 + ms(210));
        assert_eq!(engine.phase(), Phase::Releasing);
        let mid = engine.step(0.0, 0.4, t0 + ms(460));
        assert!((mid - 0.45).abs() < 1e-3);

        // A quieter peak that alone would allow the full 0.5 back.
        let v = engine.step(0.41, mid, t0 + ms(470));
        assert_eq!(engine.phase(), Phase::Limiting);
        assert!(v < 0.46, "limiting jumped from {mid} to {v}");
        assert_eq!(engine.state().baseline_volume, 0.5);
    }

    #[test]
    fn test_write_rejected_is_not_a_manual_change() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = engage(&mut engine);
        // 0.4 never reached the device
        engine.write_rejected(0.5);
        let v = engine.step(0.5, 0.5, t0 + ms(70));
        assert_eq!(engine.phase(), Phase::Limiting);
        assert!((v - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_manual_change_overrides_every_phase() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = engage(&mut engine);
        assert_eq!(engine.step(0.5, 0.8, t0 + ms(60)), 0.8);
        assert_eq!(engine.phase(), Phase::Cooldown);
        assert_eq!(engine.state().baseline_volume, 0.8);
    }

    #[test]
    fn test_disabling_mid_limit_restores_baseline() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = engage(&mut engine);
        engine.set_config(LimiterConfig { enabled: false, ..hard_config() });
        assert_eq!(engine.step(0.5, 0.4, t0 + ms(60)), 0.5);
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_config_swap_keeps_phase() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = engage(&mut engine);
        engine.set_config(LimiterConfig { cap: 0.1, ..hard_config() });
        let v = engine.step(0.5, 0.4, t0 + ms(60));
        assert_eq!(engine.phase(), Phase::Limiting);
        assert!((v - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_out_of_range_inputs_are_sanitized() {
        let mut engine = LimiterEngine::new(hard_config());
        let t0 = Instant::now();
        assert_eq!(engine.step(f32::NAN, 1.7, t0), 1.0);
        assert_eq!(engine.step(-3.0, 1.0, t0), 1.0);
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_snapshot_tracks_last_tick() {
        let mut engine = LimiterEngine::new(hard_config());
        engage(&mut engine);
        let snap = engine.snapshot();
        assert_eq!(snap.phase, Phase::Limiting);
        assert_eq!(snap.baseline_volume, 0.5);
        assert!((snap.projected_output - 0.25).abs() < 1e-6);
        assert!((snap.target_volume - 0.4).abs() < 1e-4);

        engine.reset();
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.state().last_observed_volume, None);
    }
}
