//! The pure block library.
//!
//! Every block is a `{Config, State, update}` triple: configuration is
//! immutable once loaded, state is owned by the caller (the executor owns one
//! state per configured node) and `update` is a pure function of
//! `(state, config, inputs, dt_ms)`. Blocks never allocate, never touch
//! global state and never fail — arithmetic saturates, division by zero
//! yields 0 and malformed input slices fall back to 0. This is what lets the
//! same block code run on-device and in desktop simulation.
//!
//! Values are `i32` throughout; fractional quantities are fixed-point with a
//! scale declared by the channel that carries them.

pub mod counter;
pub mod filter;
pub mod flipflop;
pub mod hysteresis;
pub mod logic;
pub mod math;
pub mod pid;
pub mod switch;
pub mod table;
pub mod timer;

/// Canonical boolean encoding of the block library: 0 is false, everything
/// else is true; block outputs use exactly 0 and 1.
#[inline]
pub fn bool_to_value(b: bool) -> i32 {
    i32::from(b)
}

/// Canonical truthiness of a channel value.
#[inline]
pub fn value_to_bool(v: i32) -> bool {
    v != 0
}
