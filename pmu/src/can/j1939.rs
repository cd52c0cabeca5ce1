//! J1939 identity synthesis and CAN keypad integration.
//!
//! Keypads (membrane button panels with RGB LEDs) talk proprietary-A J1939:
//! 29-bit identifiers built as `0x18 | PF | PS | SA`. Button states arrive as
//! command `0x01` frames, a periodic `0xF9` heartbeat supervises presence,
//! and LED colour, brightness and backlight are commanded with small TX
//! frames addressed to the keypad.

use embedded_can::{ExtendedId, Id};
use pmu_core::CanTx;

use crate::channel::{ChannelId, Registry};

/// PF of peer-to-peer command frames.
pub const PF_COMMAND: u8 = 0xEF;
/// PF of keypad status broadcasts (variant 1).
pub const PF_STATUS_1: u8 = 0xA7;
/// PF of keypad status broadcasts (variant 2).
pub const PF_STATUS_2: u8 = 0xA6;

/// Keypad RX command: button state bitmask.
pub const CMD_BUTTON_STATE: u8 = 0x01;
/// Keypad RX command: LED acknowledge.
pub const CMD_LED_ACK: u8 = 0x02;
/// Keypad RX command: firmware version report.
pub const CMD_VERSION: u8 = 0x04;
/// Keypad RX command: heartbeat.
pub const CMD_HEARTBEAT: u8 = 0xF9;

/// Keypad TX command: LED colour/state.
pub const CMD_SET_LED: u8 = 0x01;
/// Keypad TX command: LED brightness.
pub const CMD_SET_BRIGHTNESS: u8 = 0x02;
/// Keypad TX command: backlight colour/level.
pub const CMD_SET_BACKLIGHT: u8 = 0x7B;

/// Maximum buttons a keypad maps to channels.
pub const BUTTONS_MAX: usize = 16;

/// Build a 29-bit J1939 identifier: `(0x18 << 24) | (PF << 16) | (PS << 8) |
/// SA` (priority 6, data page 0).
pub fn build_id(pf: u8, ps: u8, sa: u8) -> ExtendedId {
    let raw =
        (0x18u32 << 24) | (u32::from(pf) << 16) | (u32::from(ps) << 8) | u32::from(sa);
    // 0x18xxxxxx always fits in 29 bits.
    ExtendedId::new(raw).unwrap_or(ExtendedId::ZERO)
}

/// LED colours of the keypad buttons.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedColor {
    /// LED off.
    Off = 0,
    /// Red.
    Red = 1,
    /// Green.
    Green = 2,
    /// Blue.
    Blue = 3,
    /// Yellow.
    Yellow = 4,
    /// Cyan.
    Cyan = 5,
    /// Magenta.
    Magenta = 6,
    /// White.
    White = 7,
    /// Amber.
    Amber = 8,
}

/// LED drive state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedState {
    /// Steady off.
    Off = 0,
    /// Steady on.
    On = 1,
    /// Blinking.
    Blink = 2,
}

/// Static keypad description.
#[derive(Debug, Clone)]
pub struct KeypadConfig {
    /// Bus the keypad is attached to.
    pub bus: u8,
    /// Keypad source address.
    pub keypad_sa: u8,
    /// Our source address (the keypad addresses its commands here).
    pub own_sa: u8,
    /// Number of physical buttons.
    pub button_count: u8,
    /// Channel published per button, resolved once at configuration load.
    pub buttons: [ChannelId; BUTTONS_MAX],
    /// Heartbeat supervision window; 0 disables.
    pub heartbeat_timeout_ms: u32,
}

impl Default for KeypadConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            keypad_sa: 0x21,
            own_sa: 0x30,
            button_count: 0,
            buttons: [crate::channel::UNBOUND; BUTTONS_MAX],
            heartbeat_timeout_ms: 1000,
        }
    }
}

/// One connected keypad.
#[derive(Debug)]
pub struct Keypad {
    config: KeypadConfig,
    last_heartbeat_ms: u32,
    alive: bool,
    version: u32,
}

impl Keypad {
    /// A keypad that has not been heard from yet.
    pub fn new(config: KeypadConfig) -> Self {
        Self {
            config,
            last_heartbeat_ms: 0,
            alive: false,
            version: 0,
        }
    }

    /// Configuration access.
    pub fn config(&self) -> &KeypadConfig {
        &self.config
    }

    /// `true` while heartbeats arrive within the supervision window.
    pub fn alive(&self) -> bool {
        self.alive
    }

    /// Last reported firmware version, 0 if never reported.
    pub fn version(&self) -> u32 {
        self.version
    }

    fn rx_id(&self) -> Id {
        Id::Extended(build_id(PF_COMMAND, self.config.own_sa, self.config.keypad_sa))
    }

    fn status_ids(&self) -> [Id; 2] {
        [
            Id::Extended(build_id(PF_STATUS_1, self.config.own_sa, self.config.keypad_sa)),
            Id::Extended(build_id(PF_STATUS_2, self.config.own_sa, self.config.keypad_sa)),
        ]
    }

    /// Feed one received hardware frame. Returns `true` when it belonged to
    /// this keypad.
    pub fn handle_rx<const CAP: usize>(
        &mut self,
        bus: u8,
        id: Id,
        data: &[u8],
        now_ms: u32,
        registry: &mut Registry<CAP>,
    ) -> bool {
        if bus != self.config.bus {
            return false;
        }
        if id != self.rx_id() && !self.status_ids().contains(&id) {
            return false;
        }
        let Some(&command) = data.first() else {
            return true;
        };
        match command {
            CMD_BUTTON_STATE => {
                // Bytes 1..3 carry the button bitmask, LSB first.
                let mask = u16::from(data.get(1).copied().unwrap_or(0))
                    | (u16::from(data.get(2).copied().unwrap_or(0)) << 8);
                let count = usize::from(self.config.button_count).min(BUTTONS_MAX);
                for button in 0..count {
                    let channel = self.config.buttons[button];
                    if channel.is_unbound() {
                        continue;
                    }
                    let pressed = mask & (1 << button) != 0;
                    let _ = registry.set_value(channel, i32::from(pressed));
                }
                self.last_heartbeat_ms = now_ms;
                self.alive = true;
            }
            CMD_HEARTBEAT => {
                self.last_heartbeat_ms = now_ms;
                self.alive = true;
            }
            CMD_VERSION => {
                self.version = u32::from(data.get(1).copied().unwrap_or(0)) << 16
                    | u32::from(data.get(2).copied().unwrap_or(0)) << 8
                    | u32::from(data.get(3).copied().unwrap_or(0));
            }
            CMD_LED_ACK => {}
            _ => {}
        }
        true
    }

    /// Heartbeat supervision; on loss the button channels fall to 0.
    pub fn tick<const CAP: usize>(&mut self, now_ms: u32, registry: &mut Registry<CAP>) {
        if !self.alive || self.config.heartbeat_timeout_ms == 0 {
            return;
        }
        if now_ms.wrapping_sub(self.last_heartbeat_ms) >= self.config.heartbeat_timeout_ms {
            self.alive = false;
            let count = usize::from(self.config.button_count).min(BUTTONS_MAX);
            for button in 0..count {
                let channel = self.config.buttons[button];
                if channel.is_unbound() {
                    continue;
                }
                let _ = registry.set_value(channel, 0);
                let _ = registry.set_fault(channel, true);
            }
        }
    }

    fn tx_id(&self) -> Id {
        Id::Extended(build_id(PF_COMMAND, self.config.keypad_sa, self.config.own_sa))
    }

    /// Command one button LED.
    pub fn set_led<T: CanTx>(
        &self,
        can: &mut T,
        button: u8,
        color: LedColor,
        state: LedState,
    ) -> nb::Result<(), T::Error> {
        let payload = [
            CMD_SET_LED,
            button,
            color as u8,
            state as u8,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        can.transmit(self.config.bus, self.tx_id(), &payload)
    }

    /// Command the global LED brightness (0..=100).
    pub fn set_brightness<T: CanTx>(&self, can: &mut T, percent: u8) -> nb::Result<(), T::Error> {
        let payload = [
            CMD_SET_BRIGHTNESS,
            percent.min(100),
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        can.transmit(self.config.bus, self.tx_id(), &payload)
    }

    /// Command the backlight colour and level (0..=100).
    pub fn set_backlight<T: CanTx>(
        &self,
        can: &mut T,
        color: LedColor,
        percent: u8,
    ) -> nb::Result<(), T::Error> {
        let payload = [
            CMD_SET_BACKLIGHT,
            color as u8,
            percent.min(100),
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        can.transmit(self.config.bus, self.tx_id(), &payload)
    }
}
