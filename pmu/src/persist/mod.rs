//! Persistence: flash layouts, system parameters, configuration slots and
//! the dual-bank bootloader.
//!
//! Everything is generic over [`embedded_storage::nor_flash::NorFlash`], so
//! the same code runs against the MCU's internal flash, an external QSPI
//! part, or an in-memory double in tests. Flash programming and erase are
//! the only long operations in the system; they are called synchronously
//! and only ever from explicit command handlers or the bootloader, never
//! from the tick path.

pub mod boot;
pub mod params;
pub mod slots;

use embedded_storage::nor_flash::NorFlashErrorKind;

/// ASCII `"PMU0"`: application header magic.
pub const MAGIC_APP: u32 = 0x504D_5530;
/// ASCII `"BOOT"`: battery-backed shared-data magic.
pub const MAGIC_BOOT: u32 = 0x424F_4F54;
/// ASCII `"CONF"`: configuration and parameter region magic.
pub const MAGIC_CONF: u32 = 0x434F_4E46;
/// ASCII `"UPDT"`: OTA staging marker magic.
pub const MAGIC_UPDT: u32 = 0x5550_4454;
/// ASCII `"PLOG"`: data-log file header magic.
pub const MAGIC_PLOG: u32 = 0x474F_4C50;

/// Internal flash layout (2 MB part).
pub mod internal {
    /// Bootloader region.
    pub const BOOTLOADER_OFFSET: u32 = 0x00_0000;
    /// Bootloader region size.
    pub const BOOTLOADER_SIZE: u32 = 0x01_0000;
    /// Active application header (one 4 KB sector).
    pub const APP_HEADER_OFFSET: u32 = 0x01_0000;
    /// Application header size.
    pub const APP_HEADER_SIZE: u32 = 0x1000;
    /// Active application image.
    pub const APP_OFFSET: u32 = 0x01_1000;
    /// Maximum application size.
    pub const APP_SIZE: u32 = 0x0E_F000;
    /// Backup application header.
    pub const BACKUP_HEADER_OFFSET: u32 = 0x10_0000;
    /// Backup application image.
    pub const BACKUP_OFFSET: u32 = 0x10_1000;
    /// System parameter region (two wear-levelled 2 KB halves).
    pub const SYS_PARAMS_OFFSET: u32 = 0x1F_0000;
    /// System parameter region size.
    pub const SYS_PARAMS_SIZE: u32 = 0x1000;
    /// Reserved configuration scratch.
    pub const CONFIG_SCRATCH_OFFSET: u32 = 0x1F_1000;
    /// Total size.
    pub const TOTAL_SIZE: u32 = 0x20_0000;
}

/// External flash layout (64 MB part).
pub mod external {
    /// OTA staging buffer (marker page + image).
    pub const STAGING_OFFSET: u32 = 0x00_0000;
    /// OTA staging buffer size.
    pub const STAGING_SIZE: u32 = 0x10_0000;
    /// Offset of the staged image within the staging buffer (the first
    /// sector holds the marker).
    pub const STAGING_IMAGE_OFFSET: u32 = 0x1000;
    /// Configuration backup area: two slots.
    pub const CONFIG_OFFSET: u32 = 0x10_0000;
    /// Size of one configuration slot.
    pub const CONFIG_SLOT_SIZE: u32 = 0x2_0000;
    /// Data-log area.
    pub const LOG_OFFSET: u32 = 0x14_0000;
}

/// Persistence failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying flash driver failure.
    Flash(NorFlashErrorKind),
    /// No region held valid data.
    NoValidData,
    /// Stored CRC does not match the data.
    CrcMismatch,
    /// Stored magic does not match the region.
    MagicMismatch,
    /// Data does not fit the region (or the caller's buffer).
    TooLarge,
}

impl<E: embedded_storage::nor_flash::NorFlashError> From<E> for StoreError {
    fn from(e: E) -> Self {
        Self::Flash(e.kind())
    }
}
