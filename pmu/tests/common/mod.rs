//! Shared test doubles: an in-memory NOR flash, a settable clock and fake
//! power stages.

#![allow(dead_code)]

use core::cell::Cell;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use pmu::core::{AnalogSource, Clock, DigitalSource, PowerStage};
use pmu::crc::crc32;

#[derive(Debug)]
pub struct MemFlashError(pub NorFlashErrorKind);

impl NorFlashError for MemFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        self.0
    }
}

pub struct MemFlash<const SIZE: usize> {
    pub data: Vec<u8>,
}

impl<const SIZE: usize> MemFlash<SIZE> {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; SIZE],
        }
    }
}

impl<const SIZE: usize> ErrorType for MemFlash<SIZE> {
    type Error = MemFlashError;
}

impl<const SIZE: usize> ReadNorFlash for MemFlash<SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        if offset + bytes.len() > SIZE {
            return Err(MemFlashError(NorFlashErrorKind::OutOfBounds));
        }
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        SIZE
    }
}

impl<const SIZE: usize> NorFlash for MemFlash<SIZE> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = 2048;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if from % Self::ERASE_SIZE != 0 || to % Self::ERASE_SIZE != 0 {
            return Err(MemFlashError(NorFlashErrorKind::NotAligned));
        }
        if to > SIZE || from > to {
            return Err(MemFlashError(NorFlashErrorKind::OutOfBounds));
        }
        self.data[from..to].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        if offset + bytes.len() > SIZE {
            return Err(MemFlashError(NorFlashErrorKind::OutOfBounds));
        }
        for (slot, &byte) in self.data[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *slot &= byte;
        }
        Ok(())
    }
}

/// Manually advanced millisecond clock.
pub struct TestClock {
    ms: Cell<u32>,
}

impl TestClock {
    pub fn new() -> Self {
        Self { ms: Cell::new(0) }
    }

    pub fn advance(&self, ms: u32) {
        self.ms.set(self.ms.get() + ms);
    }

    pub fn now(&self) -> u32 {
        self.ms.get()
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u32 {
        self.ms.get()
    }
    fn now_us(&self) -> u32 {
        self.ms.get().wrapping_mul(1000)
    }
}

/// Recording high-side power stage.
#[derive(Default)]
pub struct FakeStage {
    pub enabled: [bool; 32],
    pub duty: [u16; 32],
    pub current: [i32; 32],
    pub temperature: [i32; 32],
}

impl PowerStage for FakeStage {
    fn set_enabled(&mut self, index: usize, on: bool) {
        self.enabled[index] = on;
        self.duty[index] = if on { 1000 } else { 0 };
    }
    fn set_duty(&mut self, index: usize, duty_permille: u16) {
        self.duty[index] = duty_permille;
        self.enabled[index] = duty_permille > 0;
    }
    fn set_frequency(&mut self, _index: usize, _freq: pmu::core::fugit::HertzU32) {}
    fn current_ma(&self, index: usize) -> i32 {
        self.current[index]
    }
    fn temperature_mc(&self, index: usize) -> i32 {
        self.temperature[index]
    }
}

/// Settable digital pin levels.
#[derive(Default)]
pub struct FakePins {
    pub level: [bool; 20],
}

impl DigitalSource for FakePins {
    fn level(&self, index: usize) -> bool {
        self.level[index]
    }
}

/// Settable raw ADC samples.
pub struct FakeAdc {
    pub raw: [u16; 20],
}

impl Default for FakeAdc {
    fn default() -> Self {
        Self { raw: [0; 20] }
    }
}

impl AnalogSource for FakeAdc {
    fn sample(&mut self, index: usize) -> u16 {
        self.raw[index]
    }
}

/// Binary configuration image builder mirroring the v3 wire format.
pub struct ImageBuilder {
    records: Vec<u8>,
    count: u16,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            count: 0,
        }
    }

    pub fn record(&mut self, record_type: u8, payload: &[u8]) -> &mut Self {
        self.records.push(record_type);
        self.records
            .extend_from_slice(&(payload.len() as u16).to_le_bytes());
        self.records.extend_from_slice(payload);
        self.count += 1;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&pmu::config::MAGIC.to_le_bytes());
        image.extend_from_slice(&pmu::config::VERSION.to_le_bytes());
        image.extend_from_slice(&self.count.to_le_bytes());
        image.extend_from_slice(&self.records);
        let crc = crc32(&image);
        image.extend_from_slice(&crc.to_le_bytes());
        image
    }
}
