//! Hysteresis comparators: two-threshold, window and multi-level.

use super::bool_to_value;

/// Two-threshold comparator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Output rises when the input reaches this level.
    pub th_high: i32,
    /// Output falls when the input drops to this level.
    pub th_low: i32,
    /// Invert the output.
    pub invert: bool,
}

/// Comparator state.
#[derive(Debug, Clone, Copy, Default)]
pub struct State {
    active: bool,
}

impl State {
    /// Fresh, inactive state.
    pub const fn new() -> Self {
        Self { active: false }
    }
}

/// Two-threshold comparator: rises at `input >= th_high`, falls at
/// `input <= th_low`, holds in between.
pub fn update(state: &mut State, config: &Config, input: i32) -> i32 {
    if input >= config.th_high {
        state.active = true;
    } else if input <= config.th_low {
        state.active = false;
    }
    bool_to_value(state.active != config.invert)
}

/// Window comparator configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Lower window edge.
    pub low: i32,
    /// Upper window edge.
    pub high: i32,
    /// Symmetric hysteresis applied outside the window.
    pub hysteresis: i32,
}

/// Window comparator: true while the input is inside `[low, high]`; once
/// inside, the input must leave by more than the hysteresis to turn off.
pub fn window_update(state: &mut State, config: &WindowConfig, input: i32) -> i32 {
    if input >= config.low && input <= config.high {
        state.active = true;
    } else if input < config.low.saturating_sub(config.hysteresis)
        || input > config.high.saturating_add(config.hysteresis)
    {
        state.active = false;
    }
    bool_to_value(state.active)
}

/// Maximum number of multi-level thresholds.
pub const LEVELS_MAX: usize = 8;

/// One level of a multi-level comparator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Level {
    /// Input level that activates this step.
    pub threshold_up: i32,
    /// Input level that deactivates this step.
    pub threshold_down: i32,
}

/// Multi-level comparator over up to [`LEVELS_MAX`] steps.
#[derive(Debug, Clone)]
pub struct MultiLevel {
    levels: [Level; LEVELS_MAX],
    count: usize,
    current: usize,
}

impl MultiLevel {
    /// Build from per-level thresholds; levels beyond [`LEVELS_MAX`] are
    /// ignored.
    pub fn new(levels: &[Level]) -> Self {
        let count = levels.len().min(LEVELS_MAX);
        let mut storage = [Level::default(); LEVELS_MAX];
        storage[..count].copy_from_slice(&levels[..count]);
        Self {
            levels: storage,
            count,
            current: 0,
        }
    }

    /// Feed a sample; returns the active level count (0..=levels).
    pub fn update(&mut self, input: i32) -> i32 {
        while self.current < self.count && input >= self.levels[self.current].threshold_up {
            self.current += 1;
        }
        while self.current > 0 && input <= self.levels[self.current - 1].threshold_down {
            self.current -= 1;
        }
        self.current as i32
    }
}
