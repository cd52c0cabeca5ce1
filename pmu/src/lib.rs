#![no_std]
#![warn(missing_docs)]
//! # PMU core runtime
//!
//! ## Overview
//! This crate provides the platform-agnostic core of a vehicle power
//! management unit: a controller that drives up to 30 high-side power
//! outputs, reads 20 analog and up to 20 digital inputs, controls
//! H-bridge motors, speaks CAN/LIN to the vehicle network and accepts
//! remote configuration and telemetry over a framed serial link.
//!
//! It provides the following subsystems:
//!
//! - a [`channel`] registry: every input, output and computational block is
//!   addressable through a stable 16-bit channel id shared with the host
//!   configuration tool
//! - a pure [`block`] library (logic, math, tables, switches, counters,
//!   timers, PID, filters, flip-flops, hysteresis) and the [`executor`]
//!   that evaluates configured block graphs every tick
//! - input [`acquire`]ment with per-channel conditioning and debounce
//! - protected [`output`] drivers: soft start, inrush/steady current
//!   limiting with retry, stall detection and H-bridge position control
//! - the two-level [`can`] codec (frame objects + signal channels with
//!   timeout policy), J1939 keypad support and a [`lin`] master/slave
//!   codec
//! - a protection supervisor ([`protect`]) with fault aggregation and
//!   priority-ordered load shedding
//! - the framed [`transport`] protocol with telemetry streaming and
//!   binary configuration upload
//! - [`persist`]ence: wear-levelled system parameters, dual-slot
//!   configuration storage and a dual-bank bootloader with staged OTA
//!   updates and rollback
//!
//! The core never touches a hardware register. Boards integrate by
//! implementing the contracts in [`pmu_core`] (re-exported as
//! [`core`](crate::core)) and any
//! [`embedded_storage`](pmu_core::embedded_storage) NOR-flash driver;
//! everything above those traits — including the whole test suite — runs
//! identically on-device and on the host.
//!
//! ## Example
//!
//! ```no_run
//! use pmu::channel::{ChannelId, Registry};
//! use pmu::executor::{BlockConfig, Executor};
//!
//! struct TickClock;
//! impl pmu::core::Clock for TickClock {
//!     fn now_ms(&self) -> u32 {
//!         0
//!     }
//!     fn now_us(&self) -> u32 {
//!         0
//!     }
//! }
//!
//! let mut registry: Registry = Registry::new();
//! registry.register_system_channels();
//!
//! let mut executor = Executor::new();
//! executor
//!     .add_channel(ChannelId(500), BlockConfig::Constant(42), &mut registry)
//!     .unwrap();
//! executor.tick(&mut registry, &TickClock);
//! assert_eq!(registry.get_value(ChannelId(500)), 42);
//! ```
//!
//! In firmware the same `tick` runs from the main loop at 500 Hz or
//! 1 kHz, between the acquisition pass and the output-driver pass; see
//! the module documentation of [`executor`] for the ordering contract.

#[cfg(test)]
extern crate std;

pub mod acquire;
pub mod block;
pub mod can;
pub mod channel;
pub mod config;
pub mod crc;
pub mod executor;
pub mod led;
pub mod lin;
pub mod output;
pub mod persist;
pub mod prelude;
pub mod protect;
pub mod transport;

pub use embedded_can;
pub use generic_array;
pub use pmu_core as core;
