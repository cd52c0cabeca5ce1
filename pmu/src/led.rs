//! Status LED patterns.
//!
//! The LED encodes coarse device state: green-once at a clean start,
//! green-twice once a configuration is loaded, fast red for startup,
//! configuration or fault conditions, slow yellow for warnings, and a
//! short blue pulse overlaid on any pattern while the serial link is
//! active.

use pmu_core::StatusLed;

/// Coarse device state shown on the LED.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusPattern {
    /// LED off.
    #[default]
    Off,
    /// One green blink: startup OK.
    StartupOk,
    /// Two green blinks: configuration loaded.
    ConfigLoaded,
    /// Fast red: startup error.
    StartupError,
    /// Fast red: configuration error.
    ConfigError,
    /// Slow yellow: warning.
    Warning,
    /// Fast red: fault.
    Fault,
}

/// Blink length of the one-shot green patterns.
const BLINK_MS: u32 = 250;
/// Fast (red) blink period.
const FAST_MS: u32 = 100;
/// Slow (yellow) blink period.
const SLOW_MS: u32 = 500;
/// Length of the communication pulse.
const COMM_PULSE_MS: u32 = 30;

/// Drives the tri-colour status LED from the selected pattern.
pub struct StatusIndicator {
    pattern: StatusPattern,
    pattern_since_ms: u32,
    comm_until_ms: u32,
    comm_active: bool,
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusIndicator {
    /// An indicator showing [`StatusPattern::Off`].
    pub const fn new() -> Self {
        Self {
            pattern: StatusPattern::Off,
            pattern_since_ms: 0,
            comm_until_ms: 0,
            comm_active: false,
        }
    }

    /// Switch patterns; one-shot patterns restart.
    pub fn set_pattern(&mut self, pattern: StatusPattern, now_ms: u32) {
        self.pattern = pattern;
        self.pattern_since_ms = now_ms;
    }

    /// Current pattern.
    pub fn pattern(&self) -> StatusPattern {
        self.pattern
    }

    /// Record link activity; the next ticks overlay a blue pulse.
    pub fn notify_comm(&mut self, now_ms: u32) {
        self.comm_until_ms = now_ms.wrapping_add(COMM_PULSE_MS);
        self.comm_active = true;
    }

    /// Update the physical LED.
    pub fn tick(&mut self, now_ms: u32, led: &mut impl StatusLed) {
        if self.comm_active {
            if now_ms.wrapping_sub(self.comm_until_ms) < i32::MAX as u32 {
                self.comm_active = false;
            } else {
                led.set_rgb(0, 0, 255);
                return;
            }
        }
        let elapsed = now_ms.wrapping_sub(self.pattern_since_ms);
        let (r, g, b) = match self.pattern {
            StatusPattern::Off => (0, 0, 0),
            StatusPattern::StartupOk => {
                if elapsed < BLINK_MS {
                    (0, 255, 0)
                } else {
                    (0, 0, 0)
                }
            }
            StatusPattern::ConfigLoaded => {
                // Two blinks separated by one gap.
                let phase = elapsed / BLINK_MS;
                if phase == 0 || phase == 2 {
                    (0, 255, 0)
                } else {
                    (0, 0, 0)
                }
            }
            StatusPattern::StartupError | StatusPattern::ConfigError | StatusPattern::Fault => {
                if (elapsed / FAST_MS) % 2 == 0 {
                    (255, 0, 0)
                } else {
                    (0, 0, 0)
                }
            }
            StatusPattern::Warning => {
                if (elapsed / SLOW_MS) % 2 == 0 {
                    (255, 180, 0)
                } else {
                    (0, 0, 0)
                }
            }
        };
        led.set_rgb(r, g, b);
    }
}
