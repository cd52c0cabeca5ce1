//! Dual-slot configuration storage in external flash.
//!
//! Two 128 KB slots hold configuration images; a save always writes the
//! inactive slot and only then invalidates the old header, so a power cut
//! at any point leaves at least one loadable configuration. Each slot
//! starts with a 256-byte header page `{magic | seq | len | data_crc |
//! header_crc}`; the image follows from byte 256.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use super::{external, StoreError, MAGIC_CONF};
use crate::crc::crc32;

/// Header page size.
pub const HEADER_LEN: usize = 256;
/// Serialized header fields.
const HEADER_FIELDS: usize = 20;
/// Upper bound on a stored configuration image.
pub const CONFIG_MAX: usize = 120 * 1024;

#[derive(Debug, Clone, Copy)]
struct SlotHeader {
    seq: u32,
    len: u32,
    data_crc: u32,
}

impl SlotHeader {
    fn serialize(&self) -> [u8; HEADER_FIELDS] {
        let mut bytes = [0u8; HEADER_FIELDS];
        bytes[0..4].copy_from_slice(&MAGIC_CONF.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.seq.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.len.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.data_crc.to_le_bytes());
        let crc = crc32(&bytes[..16]);
        bytes[16..20].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    fn deserialize(bytes: &[u8; HEADER_FIELDS]) -> Result<Self, StoreError> {
        let stored = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        if crc32(&bytes[..16]) != stored {
            return Err(StoreError::CrcMismatch);
        }
        if u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != MAGIC_CONF {
            return Err(StoreError::MagicMismatch);
        }
        Ok(Self {
            seq: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            len: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            data_crc: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }
}

/// The dual-slot configuration store.
pub struct ConfigSlots {
    base: u32,
    slot_size: u32,
}

impl Default for ConfigSlots {
    fn default() -> Self {
        Self::new(external::CONFIG_OFFSET, external::CONFIG_SLOT_SIZE)
    }
}

impl ConfigSlots {
    /// A store of two `slot_size` slots starting at `base`.
    pub const fn new(base: u32, slot_size: u32) -> Self {
        Self { base, slot_size }
    }

    fn slot_offset(&self, slot: u32) -> u32 {
        self.base + slot * self.slot_size
    }

    fn read_header<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        slot: u32,
    ) -> Result<SlotHeader, StoreError> {
        let mut bytes = [0u8; HEADER_FIELDS];
        flash.read(self.slot_offset(slot), &mut bytes)?;
        SlotHeader::deserialize(&bytes)
    }

    fn active_slot<F: ReadNorFlash>(&self, flash: &mut F) -> Option<(u32, SlotHeader)> {
        let a = self.read_header(flash, 0).ok();
        let b = self.read_header(flash, 1).ok();
        match (a, b) {
            (Some(a), Some(b)) => {
                if a.seq >= b.seq {
                    Some((0, a))
                } else {
                    Some((1, b))
                }
            }
            (Some(a), None) => Some((0, a)),
            (None, Some(b)) => Some((1, b)),
            (None, None) => None,
        }
    }

    /// Persist a configuration image.
    ///
    /// Writes data and header into the inactive slot, verifies both, then
    /// erases the old slot's header page so only one header carries the
    /// newest sequence number.
    pub fn save<F: NorFlash + ReadNorFlash>(
        &self,
        flash: &mut F,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        if bytes.len() > CONFIG_MAX || bytes.len() as u32 + HEADER_LEN as u32 > self.slot_size {
            return Err(StoreError::TooLarge);
        }
        let active = self.active_slot(flash);
        let target = match active {
            Some((0, _)) => 1,
            Some((1, _)) | None => 0,
            Some(_) => 0,
        };
        let seq = active.map(|(_, h)| h.seq + 1).unwrap_or(1);

        let offset = self.slot_offset(target);
        flash.erase(offset, offset + self.slot_size)?;
        flash.write(offset + HEADER_LEN as u32, bytes)?;

        let header = SlotHeader {
            seq,
            len: bytes.len() as u32,
            data_crc: crc32(bytes),
        };
        flash.write(offset, &header.serialize())?;

        // Verify before invalidating the previous configuration.
        let read_back = self.read_header(flash, target)?;
        if read_back.seq != seq || read_back.data_crc != header.data_crc {
            return Err(StoreError::CrcMismatch);
        }

        if let Some((old, _)) = active {
            if old != target {
                let old_offset = self.slot_offset(old);
                flash.erase(old_offset, old_offset + erase_span::<F>())?;
            }
        }
        Ok(())
    }

    /// Load the newest valid configuration into `buf`; returns its length.
    pub fn load<F: ReadNorFlash>(
        &self,
        flash: &mut F,
        buf: &mut [u8],
    ) -> Result<usize, StoreError> {
        let (slot, header) = self.active_slot(flash).ok_or(StoreError::NoValidData)?;
        let len = header.len as usize;
        if len > buf.len() || len > CONFIG_MAX {
            return Err(StoreError::TooLarge);
        }
        flash.read(self.slot_offset(slot) + HEADER_LEN as u32, &mut buf[..len])?;
        if crc32(&buf[..len]) != header.data_crc {
            return Err(StoreError::CrcMismatch);
        }
        Ok(len)
    }

    /// Invalidate both slots.
    pub fn clear<F: NorFlash>(&self, flash: &mut F) -> Result<(), StoreError> {
        for slot in 0..2 {
            let offset = self.slot_offset(slot);
            flash.erase(offset, offset + erase_span::<F>())?;
        }
        Ok(())
    }
}

/// Smallest erase covering a header page.
fn erase_span<F: NorFlash>() -> u32 {
    (F::ERASE_SIZE as u32).max(HEADER_LEN as u32)
}
