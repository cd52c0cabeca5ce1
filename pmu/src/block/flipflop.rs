//! Latches, flip-flops and edge detection helpers.

use super::{bool_to_value, value_to_bool};

/// One-bit storage shared by all latch and flip-flop variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct State {
    q: bool,
    prev_clock: bool,
}

impl State {
    /// Fresh state with `Q = 0`.
    pub const fn new() -> Self {
        Self {
            q: false,
            prev_clock: false,
        }
    }

    /// Current stored bit.
    pub fn q(&self) -> bool {
        self.q
    }
}

/// SR latch. Reset has priority when both inputs are active; callers should
/// avoid the S=R=1 case regardless.
pub fn sr_latch(state: &mut State, set: i32, reset: i32) -> i32 {
    if value_to_bool(reset) {
        state.q = false;
    } else if value_to_bool(set) {
        state.q = true;
    }
    bool_to_value(state.q)
}

/// D flip-flop: captures `d` on the rising edge of `clock`.
pub fn d_flip_flop(state: &mut State, d: i32, clock: i32) -> i32 {
    let clock = value_to_bool(clock);
    if clock && !state.prev_clock {
        state.q = value_to_bool(d);
    }
    state.prev_clock = clock;
    bool_to_value(state.q)
}

/// D latch: transparent while `enable` is high, frozen while low.
pub fn d_latch(state: &mut State, d: i32, enable: i32) -> i32 {
    if value_to_bool(enable) {
        state.q = value_to_bool(d);
    }
    bool_to_value(state.q)
}

/// T flip-flop: toggles on the rising edge of `clock` while `t` is high.
pub fn t_flip_flop(state: &mut State, t: i32, clock: i32) -> i32 {
    let clock = value_to_bool(clock);
    if clock && !state.prev_clock && value_to_bool(t) {
        state.q = !state.q;
    }
    state.prev_clock = clock;
    bool_to_value(state.q)
}

/// JK flip-flop: on the rising clock edge J sets, K resets, J=K=1 toggles.
pub fn jk_flip_flop(state: &mut State, j: i32, k: i32, clock: i32) -> i32 {
    let clock = value_to_bool(clock);
    if clock && !state.prev_clock {
        match (value_to_bool(j), value_to_bool(k)) {
            (true, true) => state.q = !state.q,
            (true, false) => state.q = true,
            (false, true) => state.q = false,
            (false, false) => {}
        }
    }
    state.prev_clock = clock;
    bool_to_value(state.q)
}

/// Rising-edge detector; `history` is the caller-owned one-bit memory.
pub fn rising_edge(history: &mut bool, input: i32) -> bool {
    let level = value_to_bool(input);
    let edge = level && !*history;
    *history = level;
    edge
}

/// Falling-edge detector.
pub fn falling_edge(history: &mut bool, input: i32) -> bool {
    let level = value_to_bool(input);
    let edge = !level && *history;
    *history = level;
    edge
}

/// Any-edge detector.
pub fn any_edge(history: &mut bool, input: i32) -> bool {
    let level = value_to_bool(input);
    let edge = level != *history;
    *history = level;
    edge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sr_latch_set_reset_priority() {
        let mut state = State::new();
        assert_eq!(sr_latch(&mut state, 1, 0), 1);
        assert_eq!(sr_latch(&mut state, 0, 0), 1, "holds");
        assert_eq!(sr_latch(&mut state, 0, 1), 0);
        assert_eq!(sr_latch(&mut state, 0, 0), 0, "holds");
        // Illegal S=R=1: reset wins.
        assert_eq!(sr_latch(&mut state, 1, 1), 0);
    }

    #[test]
    fn d_flip_flop_samples_on_rising_edge() {
        let mut state = State::new();
        assert_eq!(d_flip_flop(&mut state, 1, 0), 0);
        assert_eq!(d_flip_flop(&mut state, 1, 1), 1, "rising edge");
        assert_eq!(d_flip_flop(&mut state, 0, 1), 1, "clock held, no capture");
        assert_eq!(d_flip_flop(&mut state, 0, 0), 1);
        assert_eq!(d_flip_flop(&mut state, 0, 1), 0, "next edge captures 0");
    }

    #[test]
    fn d_latch_transparent_while_enabled() {
        let mut state = State::new();
        assert_eq!(d_latch(&mut state, 1, 1), 1);
        assert_eq!(d_latch(&mut state, 0, 1), 0);
        assert_eq!(d_latch(&mut state, 1, 0), 0, "frozen");
    }

    #[test]
    fn t_flip_flop_toggles() {
        let mut state = State::new();
        assert_eq!(t_flip_flop(&mut state, 1, 1), 1);
        assert_eq!(t_flip_flop(&mut state, 1, 0), 1);
        assert_eq!(t_flip_flop(&mut state, 1, 1), 0);
        assert_eq!(t_flip_flop(&mut state, 0, 0), 0);
        assert_eq!(t_flip_flop(&mut state, 0, 1), 0, "T low holds");
    }

    #[test]
    fn jk_all_modes() {
        let mut state = State::new();
        assert_eq!(jk_flip_flop(&mut state, 1, 0, 1), 1, "J sets");
        jk_flip_flop(&mut state, 0, 0, 0);
        assert_eq!(jk_flip_flop(&mut state, 0, 1, 1), 0, "K resets");
        jk_flip_flop(&mut state, 0, 0, 0);
        assert_eq!(jk_flip_flop(&mut state, 1, 1, 1), 1, "JK toggles");
        jk_flip_flop(&mut state, 0, 0, 0);
        assert_eq!(jk_flip_flop(&mut state, 1, 1, 1), 0, "JK toggles back");
    }

    #[test]
    fn edge_detectors() {
        let mut hist = false;
        assert!(rising_edge(&mut hist, 1));
        assert!(!rising_edge(&mut hist, 1));
        assert!(!rising_edge(&mut hist, 0));
        assert!(rising_edge(&mut hist, 1));

        let mut hist = false;
        assert!(!falling_edge(&mut hist, 1));
        assert!(falling_edge(&mut hist, 0));
        assert!(!falling_edge(&mut hist, 0));

        let mut hist = false;
        assert!(any_edge(&mut hist, 1));
        assert!(!any_edge(&mut hist, 1));
        assert!(any_edge(&mut hist, 0));
    }
}
