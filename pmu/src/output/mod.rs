//! Power output drivers: high-side switches and H-bridges.
//!
//! Drivers sit between the registry and the [`pmu_core`] power stages. Each
//! tick they read their command from the registry (written there by the
//! executor's output links, a configured source channel or a remote
//! override), run protection logic — soft start, inrush/steady current
//! limiting, retry, stall detection — and command the hardware. Faults latch
//! into per-output flags that the supervisor and the transport can read.

pub mod hbridge;
pub mod highside;

pub use hbridge::{BridgeMode, HBridge, HBridgeBank, HBridgeConfig};
pub use highside::{Output, OutputBank, OutputConfig};

use bitfield::bitfield;

/// Driver state of one output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputState {
    /// De-energised.
    #[default]
    Off,
    /// Fully on.
    On,
    /// PWM-modulated.
    Pwm,
    /// Latched fault; sticky until explicitly cleared.
    Fault,
}

bitfield! {
    /// Latched fault flags of one output.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct OutputFaults(u8);
    impl Debug;
    /// Load current exceeded the active limit.
    pub overcurrent, set_overcurrent: 0;
    /// Hard short detected by the stage.
    pub short_circuit, set_short_circuit: 1;
    /// Commanded on with no measurable load current.
    pub open_load, set_open_load: 2;
    /// Stage temperature above limit.
    pub over_temperature, set_over_temperature: 3;
    /// Motor stall (H-bridge only).
    pub stall, set_stall: 4;
    /// Position feedback lost (H-bridge only).
    pub position_lost, set_position_lost: 5;
    /// Command source stopped updating (H-bridge failsafe entered).
    pub signal_loss, set_signal_loss: 6;
}

impl OutputFaults {
    /// `true` when any fault bit is latched.
    pub fn any(self) -> bool {
        self.0 != 0
    }

    /// Raw bit mask.
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Default delay before a faulted output retries.
pub const RETRY_DELAY_MS: u32 = 100;
