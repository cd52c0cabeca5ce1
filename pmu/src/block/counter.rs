//! Up/down counter block with edge- or level-sensitive triggers.

use super::value_to_bool;

/// Counter configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Lower bound; also the value a reset returns to.
    pub min: i32,
    /// Upper bound.
    pub max: i32,
    /// Increment applied per trigger.
    pub step: i32,
    /// Wrap around modulo `(max - min + 1)` instead of clamping.
    pub wrap: bool,
    /// Count rising edges only; in level mode every tick with an active
    /// trigger counts.
    pub edge_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min: 0,
            max: i32::MAX,
            step: 1,
            wrap: false,
            edge_mode: true,
        }
    }
}

/// Counter runtime state, owned by the executor node.
#[derive(Debug, Clone, Default)]
pub struct State {
    value: i32,
    prev_inc: bool,
    prev_dec: bool,
    prev_reset: bool,
    seeded: bool,
}

impl State {
    /// Fresh state; the first update seeds the value at `config.min`.
    pub const fn new() -> Self {
        Self {
            value: 0,
            prev_inc: false,
            prev_dec: false,
            prev_reset: false,
            seeded: false,
        }
    }
}

/// Advance the counter from the three trigger inputs and return its value.
pub fn update(state: &mut State, config: &Config, inc: i32, dec: i32, reset: i32) -> i32 {
    if !state.seeded {
        state.value = config.min;
        state.seeded = true;
    }
    let inc_active = trigger(config, value_to_bool(inc), &mut state.prev_inc);
    let dec_active = trigger(config, value_to_bool(dec), &mut state.prev_dec);
    let reset_active = trigger(config, value_to_bool(reset), &mut state.prev_reset);

    if reset_active {
        state.value = config.min;
        return state.value;
    }
    if inc_active {
        state.value = advance(state.value, config.step, config);
    }
    if dec_active {
        state.value = advance(state.value, -config.step, config);
    }
    state.value
}

fn trigger(config: &Config, level: bool, history: &mut bool) -> bool {
    let fired = if config.edge_mode {
        level && !*history
    } else {
        level
    };
    *history = level;
    fired
}

fn advance(value: i32, step: i32, config: &Config) -> i32 {
    let next = i64::from(value) + i64::from(step);
    let (min, max) = (i64::from(config.min), i64::from(config.max));
    if min > max {
        return value;
    }
    if config.wrap {
        let span = max - min + 1;
        (min + (next - min).rem_euclid(span)) as i32
    } else {
        next.clamp(min, max) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min: i32, max: i32, wrap: bool) -> Config {
        Config {
            min,
            max,
            wrap,
            ..Config::default()
        }
    }

    #[test]
    fn edge_mode_counts_rising_edges_only() {
        let config = cfg(0, 10, false);
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 1, 0, 0), 1);
        // Held high: no further counting.
        assert_eq!(update(&mut state, &config, 1, 0, 0), 1);
        assert_eq!(update(&mut state, &config, 0, 0, 0), 1);
        assert_eq!(update(&mut state, &config, 1, 0, 0), 2);
    }

    #[test]
    fn level_mode_counts_every_tick() {
        let config = Config {
            edge_mode: false,
            ..cfg(0, 10, false)
        };
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 1, 0, 0), 1);
        assert_eq!(update(&mut state, &config, 1, 0, 0), 2);
        assert_eq!(update(&mut state, &config, 1, 0, 0), 3);
    }

    #[test]
    fn clamps_at_bounds() {
        let config = cfg(0, 2, false);
        let mut state = State::new();
        for _ in 0..5 {
            update(&mut state, &config, 1, 0, 0);
            update(&mut state, &config, 0, 0, 0);
        }
        assert_eq!(update(&mut state, &config, 0, 0, 0), 2);
        // Down past min clamps as well.
        for _ in 0..5 {
            update(&mut state, &config, 0, 1, 0);
            update(&mut state, &config, 0, 0, 0);
        }
        assert_eq!(update(&mut state, &config, 0, 0, 0), 0);
    }

    #[test]
    fn wraps_modulo_span() {
        let config = cfg(0, 2, true);
        let mut state = State::new();
        update(&mut state, &config, 1, 0, 0); // 1
        update(&mut state, &config, 0, 0, 0);
        update(&mut state, &config, 1, 0, 0); // 2
        update(&mut state, &config, 0, 0, 0);
        assert_eq!(update(&mut state, &config, 1, 0, 0), 0, "2 wraps to 0");
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 0, 1, 0), 2, "0 wraps down to 2");
    }

    #[test]
    fn reset_returns_to_min_and_wins() {
        let config = cfg(5, 10, false);
        let mut state = State::new();
        update(&mut state, &config, 1, 0, 0);
        update(&mut state, &config, 0, 0, 0);
        update(&mut state, &config, 1, 0, 0);
        assert_eq!(update(&mut state, &config, 1, 0, 1), 5, "reset wins over inc");
    }

    #[test]
    fn seeds_at_min() {
        let config = cfg(-3, 3, false);
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 0, 0, 0), -3);
    }

    #[test]
    fn custom_step() {
        let config = Config {
            step: 5,
            ..cfg(0, 100, false)
        };
        let mut state = State::new();
        assert_eq!(update(&mut state, &config, 1, 0, 0), 5);
    }
}
