//! Timer blocks: on-delay, off-delay, pulse and blink.

use super::{bool_to_value, value_to_bool};

/// Timer behaviour.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Output rises `preset_ms` after the input rises and falls with it.
    OnDelay,
    /// Output follows a rising input immediately and holds for `preset_ms`
    /// after the input falls.
    OffDelay,
    /// A rising edge emits one `preset_ms` wide pulse.
    Pulse,
    /// While the input is true the output toggles `preset_ms` on /
    /// `off_ms` off.
    Blink,
}

/// Timer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Behaviour selector.
    pub mode: Mode,
    /// Primary interval in milliseconds.
    pub preset_ms: u32,
    /// Off phase for [`Mode::Blink`]; ignored elsewhere.
    pub off_ms: u32,
    /// A new rising edge during a running pulse restarts it.
    pub retriggerable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::OnDelay,
            preset_ms: 1000,
            off_ms: 1000,
            retriggerable: false,
        }
    }
}

/// Timer runtime state.
#[derive(Debug, Clone, Default)]
pub struct State {
    elapsed_ms: u32,
    output: bool,
    prev_input: bool,
    running: bool,
}

impl State {
    /// Fresh idle state.
    pub const fn new() -> Self {
        Self {
            elapsed_ms: 0,
            output: false,
            prev_input: false,
            running: false,
        }
    }

    /// Milliseconds accumulated in the current phase, for diagnostics.
    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms
    }
}

/// Advance the timer by `dt_ms` with the given input level; returns 0 or 1.
pub fn update(state: &mut State, config: &Config, input: i32, dt_ms: u32) -> i32 {
    let input = value_to_bool(input);
    let rising = input && !state.prev_input;
    state.prev_input = input;

    match config.mode {
        Mode::OnDelay => {
            if !input {
                state.elapsed_ms = 0;
                state.output = false;
            } else {
                if !state.output {
                    state.elapsed_ms = state.elapsed_ms.saturating_add(dt_ms);
                }
                if state.elapsed_ms >= config.preset_ms {
                    state.output = true;
                }
            }
        }
        Mode::OffDelay => {
            if input {
                state.output = true;
                state.elapsed_ms = 0;
            } else if state.output {
                state.elapsed_ms = state.elapsed_ms.saturating_add(dt_ms);
                if state.elapsed_ms >= config.preset_ms {
                    state.output = false;
                    state.elapsed_ms = 0;
                }
            }
        }
        Mode::Pulse => {
            if rising && (!state.running || config.retriggerable) {
                state.running = true;
                state.elapsed_ms = 0;
                state.output = true;
            }
            if state.running {
                state.elapsed_ms = state.elapsed_ms.saturating_add(dt_ms);
                if state.elapsed_ms >= config.preset_ms {
                    state.running = false;
                    state.output = false;
                }
            }
        }
        Mode::Blink => {
            if !input {
                state.output = false;
                state.elapsed_ms = 0;
            } else {
                if rising {
                    state.output = true;
                    state.elapsed_ms = 0;
                }
                state.elapsed_ms = state.elapsed_ms.saturating_add(dt_ms);
                let phase = if state.output {
                    config.preset_ms
                } else {
                    config.off_ms
                };
                if state.elapsed_ms >= phase {
                    state.output = !state.output;
                    state.elapsed_ms = 0;
                }
            }
        }
    }
    bool_to_value(state.output)
}
