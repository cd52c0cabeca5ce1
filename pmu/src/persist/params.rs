//! System parameter storage: serial, calibration, thresholds and wear
//! counters in a small wear-levelled internal-flash region.
//!
//! The 4 KB region is split into two 2 KB halves. Every save goes to the
//! half holding the older copy with an incremented `write_count`; loads
//! pick the valid half with the newer one. The CRC-32 covers everything up
//! to (and excluding) the trailing CRC word.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use super::{StoreError, MAGIC_CONF};
use crate::crc::crc32;

/// Size of one wear-levelled half.
pub const HALF_SIZE: u32 = 0x800;
/// Serialized parameter block length.
pub const BLOCK_LEN: usize = 108;
/// Number of per-ADC calibration offsets.
pub const CAL_CHANNELS: usize = 20;

/// Persisted system parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemParams {
    /// Device serial number.
    pub serial: u32,
    /// Hardware revision.
    pub hw_revision: u16,
    /// Per-ADC-channel offset calibration in millivolts.
    pub calibration_mv: [i16; CAL_CHANNELS],
    /// Undervoltage threshold in millivolts.
    pub voltage_min_mv: u16,
    /// Overvoltage threshold in millivolts.
    pub voltage_max_mv: u16,
    /// Warning temperature in degrees Celsius.
    pub temp_warning_c: i16,
    /// Critical temperature in degrees Celsius.
    pub temp_critical_c: i16,
    /// Total current budget in milliamps.
    pub max_current_ma: u32,
    /// Lifetime output switch cycles (all outputs summed).
    pub total_switch_cycles: u32,
    /// Lifetime energised hours (all outputs summed).
    pub total_on_hours: u32,
    /// Completed boot count.
    pub boot_count: u32,
    /// Save counter; maintained by the store, not the caller.
    pub write_count: u32,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            serial: 0,
            hw_revision: 0,
            calibration_mv: [0; CAL_CHANNELS],
            voltage_min_mv: 9_000,
            voltage_max_mv: 16_000,
            temp_warning_c: 100,
            temp_critical_c: 125,
            max_current_ma: 100_000,
            total_switch_cycles: 0,
            total_on_hours: 0,
            boot_count: 0,
            write_count: 0,
        }
    }
}

impl SystemParams {
    fn serialize(&self) -> [u8; BLOCK_LEN] {
        let mut block = [0u8; BLOCK_LEN];
        block[0..4].copy_from_slice(&MAGIC_CONF.to_le_bytes());
        block[4..8].copy_from_slice(&self.write_count.to_le_bytes());
        block[8..12].copy_from_slice(&self.serial.to_le_bytes());
        block[12..14].copy_from_slice(&self.hw_revision.to_le_bytes());
        let mut at = 14;
        for cal in self.calibration_mv {
            block[at..at + 2].copy_from_slice(&cal.to_le_bytes());
            at += 2;
        }
        block[54..56].copy_from_slice(&self.voltage_min_mv.to_le_bytes());
        block[56..58].copy_from_slice(&self.voltage_max_mv.to_le_bytes());
        block[58..60].copy_from_slice(&self.temp_warning_c.to_le_bytes());
        block[60..62].copy_from_slice(&self.temp_critical_c.to_le_bytes());
        block[62..66].copy_from_slice(&self.max_current_ma.to_le_bytes());
        block[66..70].copy_from_slice(&self.total_switch_cycles.to_le_bytes());
        block[70..74].copy_from_slice(&self.total_on_hours.to_le_bytes());
        block[74..78].copy_from_slice(&self.boot_count.to_le_bytes());
        // 78..104 reserved.
        let crc = crc32(&block[..BLOCK_LEN - 4]);
        block[BLOCK_LEN - 4..].copy_from_slice(&crc.to_le_bytes());
        block
    }

    fn deserialize(block: &[u8; BLOCK_LEN]) -> Result<Self, StoreError> {
        let stored_crc = u32::from_le_bytes(block[BLOCK_LEN - 4..].try_into().unwrap());
        if crc32(&block[..BLOCK_LEN - 4]) != stored_crc {
            return Err(StoreError::CrcMismatch);
        }
        if u32::from_le_bytes(block[0..4].try_into().unwrap()) != MAGIC_CONF {
            return Err(StoreError::MagicMismatch);
        }
        let mut calibration_mv = [0i16; CAL_CHANNELS];
        for (i, cal) in calibration_mv.iter_mut().enumerate() {
            let at = 14 + i * 2;
            *cal = i16::from_le_bytes(block[at..at + 2].try_into().unwrap());
        }
        Ok(Self {
            write_count: u32::from_le_bytes(block[4..8].try_into().unwrap()),
            serial: u32::from_le_bytes(block[8..12].try_into().unwrap()),
            hw_revision: u16::from_le_bytes(block[12..14].try_into().unwrap()),
            calibration_mv,
            voltage_min_mv: u16::from_le_bytes(block[54..56].try_into().unwrap()),
            voltage_max_mv: u16::from_le_bytes(block[56..58].try_into().unwrap()),
            temp_warning_c: i16::from_le_bytes(block[58..60].try_into().unwrap()),
            temp_critical_c: i16::from_le_bytes(block[60..62].try_into().unwrap()),
            max_current_ma: u32::from_le_bytes(block[62..66].try_into().unwrap()),
            total_switch_cycles: u32::from_le_bytes(block[66..70].try_into().unwrap()),
            total_on_hours: u32::from_le_bytes(block[70..74].try_into().unwrap()),
            boot_count: u32::from_le_bytes(block[74..78].try_into().unwrap()),
        })
    }
}

/// Wear-levelled parameter store over a 4 KB flash region.
pub struct ParamStore {
    base: u32,
}

impl ParamStore {
    /// A store rooted at `base` (byte offset into the flash device).
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    fn read_half<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        half: u32,
    ) -> Result<SystemParams, StoreError> {
        let mut block = [0u8; BLOCK_LEN];
        flash.read(self.base + half * HALF_SIZE, &mut block)?;
        SystemParams::deserialize(&block)
    }

    /// Load the newest valid copy.
    pub fn load<F: ReadNorFlash>(&self, flash: &mut F) -> Result<SystemParams, StoreError> {
        let halves = [self.read_half(flash, 0), self.read_half(flash, 1)];
        match halves {
            [Ok(a), Ok(b)] => Ok(if a.write_count >= b.write_count { a } else { b }),
            [Ok(a), Err(_)] => Ok(a),
            [Err(_), Ok(b)] => Ok(b),
            [Err(_), Err(_)] => Err(StoreError::NoValidData),
        }
    }

    /// Persist `params` into the older half with a bumped write counter.
    ///
    /// The caller's `write_count` field is ignored; the store maintains it.
    pub fn save<F: NorFlash + ReadNorFlash>(
        &self,
        flash: &mut F,
        params: &SystemParams,
    ) -> Result<(), StoreError> {
        let halves = [self.read_half(flash, 0), self.read_half(flash, 1)];
        let count = |r: &Result<SystemParams, StoreError>| {
            r.as_ref().map(|p| p.write_count).unwrap_or(0)
        };
        let (count_a, count_b) = (count(&halves[0]), count(&halves[1]));
        // The half with the older copy (or an invalid one) is overwritten.
        let target = match (&halves[0], &halves[1]) {
            (Err(_), _) => 0,
            (_, Err(_)) => 1,
            _ if count_a <= count_b => 0,
            _ => 1,
        };
        let mut to_store = params.clone();
        to_store.write_count = count_a.max(count_b) + 1;
        let block = to_store.serialize();

        let offset = self.base + target * HALF_SIZE;
        flash.erase(offset, offset + HALF_SIZE)?;
        flash.write(offset, &block)?;

        // Verify the programmed copy before trusting it.
        let read_back = self.read_half(flash, target)?;
        if read_back != to_store {
            return Err(StoreError::CrcMismatch);
        }
        Ok(())
    }
}
