#![no_std]
#![warn(missing_docs)]

//! `pmu-core` provides the set of platform contracts that sit between the
//! platform independent [`pmu`] runtime and board/HAL specific crates (in
//! documentation also referred to as _target HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs
//! (or by test doubles in desktop simulation).
//!
//! The runtime core never touches a hardware register. Every hardware effect
//! — switching a high-side output, sampling an ADC, putting a frame on a CAN
//! bus, programming flash — crosses one of these traits. Integrators are
//! responsible for the soundness of their implementations: the core assumes
//! that an index it was configured with addresses real hardware and that the
//! monotonic clock never jumps backwards.
//!
//! Flash is not abstracted here; persistence code in the runtime is generic
//! over [`embedded_storage::nor_flash::NorFlash`] instead, so any existing
//! flash driver plugs in directly.
//!
//! [`pmu`]: <https://docs.rs/crate/pmu/>

pub use embedded_can;
pub use embedded_storage;
pub use fugit;

use embedded_can::Id;

/// Monotonic time source driving every tick-scheduled subsystem.
///
/// The millisecond counter is the scheduling clock: executor `dt`, debounce,
/// soft-start ramps, CAN timeouts and protocol staleness all derive from it.
/// It may wrap; the core only ever computes forward differences with
/// `wrapping_sub`. The microsecond counter is used for executor load
/// measurement only and may be a coarser approximation.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch, monotonic, wrapping.
    fn now_ms(&self) -> u32;

    /// Microseconds since an arbitrary epoch, monotonic, wrapping.
    fn now_us(&self) -> u32;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }
}

/// Bank of high-side power stages (PROFET or similar smart switches).
///
/// One implementor controls all physical outputs, addressed by the hardware
/// index the configuration assigned. Duty cycles are in permille; an
/// implementation without PWM capability on a given stage should treat any
/// non-zero duty as fully on.
pub trait PowerStage {
    /// Drive a stage fully on or off.
    fn set_enabled(&mut self, index: usize, on: bool);

    /// Drive a stage with a PWM duty cycle in permille (0..=1000).
    fn set_duty(&mut self, index: usize, duty_permille: u16);

    /// Configure the PWM carrier frequency for a stage.
    fn set_frequency(&mut self, index: usize, freq: fugit::HertzU32);

    /// Measured load current in milliamps.
    fn current_ma(&self, index: usize) -> i32;

    /// Stage temperature in millidegrees Celsius.
    fn temperature_mc(&self, index: usize) -> i32;
}

/// Drive command for one half of an H-bridge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HalfBridge {
    /// High-impedance, both transistors off.
    Off,
    /// Closed path to the supply rail.
    On,
    /// PWM with the given duty in permille.
    Pwm(u16),
}

/// Bank of H-bridge motor stages.
pub trait BridgeStage {
    /// Command both halves of a bridge in one call.
    ///
    /// Implementations must order the transitions so that both halves are
    /// never conducting to opposite rails at the same instant; shoot-through
    /// protection is on the HAL side.
    fn set_bridge(&mut self, index: usize, a: HalfBridge, b: HalfBridge);

    /// Measured motor current in milliamps.
    fn current_ma(&self, index: usize) -> i32;
}

/// Raw analog sampling, one 10-bit value per acquisition channel.
pub trait AnalogSource {
    /// Latest raw sample for the channel, right-aligned, 0..=1023.
    fn sample(&mut self, index: usize) -> u16;
}

/// Raw digital pin states for the digital-input bank.
pub trait DigitalSource {
    /// Current electrical level of the pin (true = high).
    fn level(&self, index: usize) -> bool;
}

/// Outgoing CAN interface, multiplexed over the buses the board exposes.
///
/// Reception does not come through a trait: the platform's RX interrupt (or
/// polling loop) drains hardware frames and hands them to the codec's
/// `handle_rx`.
pub trait CanTx {
    /// Transmit error type.
    type Error;

    /// Queue one frame for transmission on `bus`.
    ///
    /// Returns [`nb::Error::WouldBlock`] when all hardware mailboxes are
    /// occupied; the codec retries on the next TX pass.
    fn transmit(&mut self, bus: u8, id: Id, data: &[u8]) -> nb::Result<(), Self::Error>;
}

/// LIN transceiver access for one LIN channel.
///
/// The runtime owns framing (break/sync/PID/checksum); the port only moves
/// bytes and generates the physical break / wake conditions.
pub trait LinPort {
    /// Port error type.
    type Error;

    /// Transmit a break field (≥ 13 dominant bits at the configured rate).
    fn send_break(&mut self) -> Result<(), Self::Error>;

    /// Transmit a dominant wake-up pulse of at least 150 µs.
    fn send_wakeup(&mut self) -> Result<(), Self::Error>;

    /// Write bytes after the break (sync, PID, data, checksum).
    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Read one received byte, if any.
    fn read(&mut self) -> nb::Result<u8, Self::Error>;
}

/// Battery-backed (or otherwise reset-surviving) memory for the bootloader
/// handshake block.
///
/// The block is small (tens of bytes); implementations typically map it onto
/// backup-domain SRAM or RTC registers.
pub trait BackupDomain {
    /// Copy the stored block into `buf`; `buf.len()` bytes are read.
    fn load(&self, buf: &mut [u8]);

    /// Persist `buf` into the backup block.
    fn store(&mut self, buf: &[u8]);
}

/// Reset and boot-path control, used only by the bootloader flow and the
/// RESET protocol command.
pub trait SystemControl {
    /// Reset the MCU. Does not return.
    fn reset(&mut self) -> !;

    /// Jump to an application image at `entry`. Does not return.
    ///
    /// # Safety
    /// `entry` must be the entry point of a valid application image whose
    /// vector table and stack setup match the platform's boot protocol.
    unsafe fn jump(&mut self, entry: u32) -> !;
}

/// Tri-colour status LED.
pub trait StatusLed {
    /// Set the LED colour; (0, 0, 0) is off.
    fn set_rgb(&mut self, r: u8, g: u8, b: u8);
}
