//! Fixed-point PID controller.
//!
//! Gains are integers scaled by a configurable factor (1000 by default), so
//! `kp = 1500` with the default scale is a proportional gain of 1.5. The
//! integrator runs in 64-bit milli-output units and is clamped to the
//! configured integral bounds for anti-windup. The derivative acts on the
//! measurement by default, which avoids output spikes on setpoint steps;
//! D-on-error is available for profile-following applications.

/// PID configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Proportional gain, scaled by `scale`.
    pub kp: i32,
    /// Integral gain, scaled by `scale`, per second.
    pub ki: i32,
    /// Derivative gain, scaled by `scale`, per second.
    pub kd: i32,
    /// Fixed-point gain scale.
    pub scale: i32,
    /// Error deadband subtracted before the terms are computed.
    pub deadband: i32,
    /// Output saturation bounds.
    pub out_min: i32,
    /// Output saturation bounds.
    pub out_max: i32,
    /// Integral term bounds; default to the output bounds.
    pub integral_min: i32,
    /// Integral term bounds; default to the output bounds.
    pub integral_max: i32,
    /// Differentiate the error instead of the measurement.
    pub d_on_error: bool,
    /// Zero the integrator whenever the setpoint changes.
    pub reset_integral_on_setpoint_change: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kp: 0,
            ki: 0,
            kd: 0,
            scale: 1000,
            deadband: 0,
            out_min: -1000,
            out_max: 1000,
            integral_min: -1000,
            integral_max: 1000,
            d_on_error: false,
            reset_integral_on_setpoint_change: false,
        }
    }
}

impl Config {
    /// Plain proportional controller with symmetric output bounds.
    pub fn proportional(kp: i32, out: i32) -> Self {
        Self {
            kp,
            out_min: -out,
            out_max: out,
            integral_min: -out,
            integral_max: out,
            ..Self::default()
        }
    }
}

/// PID runtime state.
#[derive(Debug, Clone, Default)]
pub struct State {
    integrator_milli: i64,
    prev_measurement: i32,
    prev_error: i32,
    prev_setpoint: i32,
    last_output: i32,
    seeded: bool,
}

impl State {
    /// Fresh state with a zero integrator.
    pub const fn new() -> Self {
        Self {
            integrator_milli: 0,
            prev_measurement: 0,
            prev_error: 0,
            prev_setpoint: 0,
            last_output: 0,
            seeded: false,
        }
    }

    /// Zero the integrator and derivative history, e.g. on mode change.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Run one controller step; `dt_ms == 0` is a no-op returning the prior
/// output.
pub fn update(
    state: &mut State,
    config: &Config,
    setpoint: i32,
    measurement: i32,
    dt_ms: u32,
) -> i32 {
    if dt_ms == 0 {
        return state.last_output;
    }
    let scale = i64::from(if config.scale == 0 { 1000 } else { config.scale });
    let dt = i64::from(dt_ms);

    let raw_error = i64::from(setpoint) - i64::from(measurement);
    let deadband = i64::from(config.deadband.max(0));
    let error = raw_error - raw_error.clamp(-deadband, deadband);

    if !state.seeded {
        // First sample seeds the derivative history so start-up produces no
        // derivative kick.
        state.prev_measurement = measurement;
        state.prev_error = error as i32;
        state.prev_setpoint = setpoint;
        state.seeded = true;
    }

    if config.reset_integral_on_setpoint_change && setpoint != state.prev_setpoint {
        state.integrator_milli = 0;
    }
    state.prev_setpoint = setpoint;

    let p = i64::from(config.kp) * error / scale;

    state.integrator_milli += i64::from(config.ki) * error * dt / scale;
    state.integrator_milli = state.integrator_milli.clamp(
        i64::from(config.integral_min) * 1000,
        i64::from(config.integral_max) * 1000,
    );
    let i = state.integrator_milli / 1000;

    let d = if config.d_on_error {
        let delta = error - i64::from(state.prev_error);
        i64::from(config.kd) * delta * 1000 / (scale * dt)
    } else {
        let delta = i64::from(measurement) - i64::from(state.prev_measurement);
        -(i64::from(config.kd) * delta * 1000) / (scale * dt)
    };
    state.prev_error = error as i32;
    state.prev_measurement = measurement;

    let output = (p + i + d).clamp(i64::from(config.out_min), i64::from(config.out_max)) as i32;
    state.last_output = output;
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_step() {
        // kp=1000, ki=kd=0, scale=1000, out in [-1000, 1000]:
        // setpoint 100, measurement 0, dt 10 -> output 100.
        let config = Config::proportional(1000, 1000);
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 100, 0, 10), 100);
    }

    #[test]
    fn proportional_sign_matches_error_sign() {
        let config = Config::proportional(1000, 1000);
        let mut state = State::new();
        for (sp, meas) in [(100, 0), (0, 100), (50, 50), (-10, 10), (10, -10)] {
            let out = update(&mut state, &config, sp, meas, 10);
            assert_eq!(out.signum(), (sp - meas).signum(), "sp={sp} meas={meas}");
        }
    }

    #[test]
    fn zero_dt_returns_prior_output() {
        let config = Config::proportional(1000, 1000);
        let mut state = State::new();
        let out = update(&mut state, &config, 100, 0, 10);
        assert_eq!(update(&mut state, &config, -500, 0, 0), out);
    }

    #[test]
    fn integrator_accumulates_and_winds_up_bounded() {
        let config = Config {
            ki: 1000,
            out_min: -100,
            out_max: 100,
            integral_min: -100,
            integral_max: 100,
            ..Config::default()
        };
        let mut state = State::new();
        // error 50, ki 1.0/s: roughly 50 units per second of integration.
        let mut last = 0;
        for _ in 0..10 {
            last = update(&mut state, &config, 50, 0, 100);
        }
        assert_eq!(last, 50, "1 s at error 50");
        for _ in 0..100 {
            last = update(&mut state, &config, 50, 0, 100);
        }
        assert_eq!(last, 100, "anti-windup clamps at integral_max");
        // Integrator unwinds immediately once the error reverses.
        for _ in 0..100 {
            last = update(&mut state, &config, -50, 0, 100);
        }
        assert_eq!(last, -100);
    }

    #[test]
    fn derivative_on_measurement_opposes_motion() {
        let config = Config {
            kd: 1000,
            ..Config::default()
        };
        let mut state = State::new();
        update(&mut state, &config, 0, 0, 10);
        // Measurement rising at 10 units / 10 ms -> D pushes negative.
        let out = update(&mut state, &config, 0, 10, 10);
        assert!(out < 0, "got {out}");
        // No derivative kick from a pure setpoint step.
        let mut state = State::new();
        update(&mut state, &config, 0, 0, 10);
        let out = update(&mut state, &config, 1000, 0, 10);
        assert_eq!(out, 0);
    }

    #[test]
    fn derivative_on_error_kicks_on_setpoint_step() {
        let config = Config {
            kd: 1000,
            d_on_error: true,
            ..Config::default()
        };
        let mut state = State::new();
        update(&mut state, &config, 0, 0, 10);
        let out = update(&mut state, &config, 10, 0, 10);
        assert!(out > 0, "got {out}");
    }

    #[test]
    fn deadband_suppresses_small_errors() {
        let config = Config {
            deadband: 10,
            ..Config::proportional(1000, 1000)
        };
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 5, 0, 10), 0);
        assert_eq!(update(&mut state, &config, 10, 0, 10), 0);
        // Outside the deadband the error is reduced by it.
        assert_eq!(update(&mut state, &config, 30, 0, 10), 20);
        assert_eq!(update(&mut state, &config, -30, 0, 10), -20);
    }

    #[test]
    fn output_saturates() {
        let config = Config::proportional(1000, 100);
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 100_000, 0, 10), 100);
        assert_eq!(update(&mut state, &config, -100_000, 0, 10), -100);
    }

    #[test]
    fn setpoint_change_resets_integral_when_configured() {
        let config = Config {
            ki: 1000,
            reset_integral_on_setpoint_change: true,
            ..Config::default()
        };
        let mut state = State::new();
        for _ in 0..10 {
            update(&mut state, &config, 50, 0, 100);
        }
        assert!(state.integrator_milli > 0);
        update(&mut state, &config, 60, 0, 100);
        // Integrator restarted from zero: one step's worth only.
        assert_eq!(state.integrator_milli, 6000);
    }
}
