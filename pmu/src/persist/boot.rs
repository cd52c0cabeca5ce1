//! Dual-bank bootloader: shared-data handshake, staged OTA updates,
//! image validation and rollback.
//!
//! The boot flow runs before the main loop ever ticks:
//!
//! 1. Read the shared-data block from battery-backed memory; zero it when
//!    its checksum fails.
//! 2. If an update was requested and the staged image validates, copy it
//!    over the active application.
//! 3. Validate the active application header and code CRCs.
//! 4. After too many failed boot attempts, roll back to the backup image.
//! 5. Hand the entry point to the platform jump.
//!
//! The decision logic is pure over flash contents and returns an outcome;
//! the actual non-returning jump stays behind
//! [`pmu_core::SystemControl::jump`] so the whole flow is testable on the
//! host.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use pmu_core::BackupDomain;

use super::{external, internal, StoreError, MAGIC_APP, MAGIC_BOOT, MAGIC_UPDT};
use crate::crc::{crc32, Crc32};

/// Boot attempts before the bootloader rolls back to the backup image.
pub const MAX_BOOT_ATTEMPTS: u8 = 3;
/// Serialized shared-data length.
pub const SHARED_LEN: usize = 16;
/// Serialized application header length.
pub const APP_HEADER_LEN: usize = 92;
/// Staging marker length.
pub const STAGING_MARKER_LEN: usize = 16;

/// Why the current boot happened, kept across resets in the shared block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootReason {
    /// Cold power-on.
    #[default]
    PowerOn = 0,
    /// Watchdog reset.
    Watchdog = 1,
    /// Brownout reset.
    Brownout = 2,
    /// Software-requested reset.
    Software = 3,
    /// A staged update was applied on this boot.
    UpdateApplied = 4,
    /// A staged update was refused (bad CRC).
    InvalidApp = 5,
    /// The boot-loop guard rolled back to the backup image.
    RolledBack = 6,
}

impl BootReason {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Watchdog,
            2 => Self::Brownout,
            3 => Self::Software,
            4 => Self::UpdateApplied,
            5 => Self::InvalidApp,
            6 => Self::RolledBack,
            _ => Self::PowerOn,
        }
    }
}

/// Reset-surviving handshake block between application and bootloader.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharedData {
    /// Why the current boot happened.
    pub boot_reason: BootReason,
    /// The application staged an update and requested a reboot.
    pub update_requested: bool,
    /// Boots since the application last reported healthy.
    pub boot_count: u8,
    /// Fault address of the last crash, if the HAL recorded one.
    pub last_crash_addr: u32,
}

impl SharedData {
    /// Read the block; an invalid checksum yields a zeroed block.
    pub fn load(backup: &impl BackupDomain) -> Self {
        let mut bytes = [0u8; SHARED_LEN];
        backup.load(&mut bytes);
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let stored = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        if magic != MAGIC_BOOT || crc32(&bytes[..12]) != stored {
            return Self::default();
        }
        Self {
            boot_reason: BootReason::from_u8(bytes[4]),
            update_requested: bytes[5] != 0,
            boot_count: bytes[6],
            last_crash_addr: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        }
    }

    /// Persist the block with a fresh checksum.
    pub fn store(&self, backup: &mut impl BackupDomain) {
        let mut bytes = [0u8; SHARED_LEN];
        bytes[0..4].copy_from_slice(&MAGIC_BOOT.to_le_bytes());
        bytes[4] = self.boot_reason as u8;
        bytes[5] = u8::from(self.update_requested);
        bytes[6] = self.boot_count;
        bytes[8..12].copy_from_slice(&self.last_crash_addr.to_le_bytes());
        let crc = crc32(&bytes[..12]);
        bytes[12..16].copy_from_slice(&crc.to_le_bytes());
        backup.store(&bytes);
    }
}

/// Application image header, stored in its own 4 KB sector ahead of the
/// code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppHeader {
    /// Image version word.
    pub version: u32,
    /// Build identifier.
    pub build: u32,
    /// Code size in bytes.
    pub app_size: u32,
    /// CRC-32 over the code.
    pub app_crc32: u32,
    /// Entry point address.
    pub entry_point: u32,
    /// Detached signature (opaque to the core; checked by platforms that
    /// carry keys).
    pub signature: [u8; 64],
}

impl AppHeader {
    /// Serialize with the trailing header CRC.
    pub fn serialize(&self) -> [u8; APP_HEADER_LEN] {
        let mut bytes = [0u8; APP_HEADER_LEN];
        bytes[0..4].copy_from_slice(&MAGIC_APP.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.build.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.app_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.app_crc32.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.entry_point.to_le_bytes());
        bytes[24..88].copy_from_slice(&self.signature);
        let crc = crc32(&bytes[..88]);
        bytes[88..92].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Parse and CRC-check a header.
    pub fn deserialize(bytes: &[u8; APP_HEADER_LEN]) -> Result<Self, StoreError> {
        let stored = u32::from_le_bytes(bytes[88..92].try_into().unwrap());
        if crc32(&bytes[..88]) != stored {
            return Err(StoreError::CrcMismatch);
        }
        if u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != MAGIC_APP {
            return Err(StoreError::MagicMismatch);
        }
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[24..88]);
        Ok(Self {
            version: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            build: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            app_size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            app_crc32: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            entry_point: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
            signature,
        })
    }
}

/// Outcome of the boot decision.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOutcome {
    /// Jump to this entry point.
    Jump {
        /// Application entry point.
        entry: u32,
        /// Reason recorded for the application to read.
        reason: BootReason,
    },
    /// Neither bank holds a valid image; stay in the bootloader.
    NoValidApp,
}

/// Application banks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Bank {
    Active,
    Backup,
}

impl Bank {
    fn header_offset(self) -> u32 {
        match self {
            Self::Active => internal::APP_HEADER_OFFSET,
            Self::Backup => internal::BACKUP_HEADER_OFFSET,
        }
    }

    fn app_offset(self) -> u32 {
        match self {
            Self::Active => internal::APP_OFFSET,
            Self::Backup => internal::BACKUP_OFFSET,
        }
    }
}

/// CRC over a flash range, read in small chunks.
fn flash_crc32<F: ReadNorFlash>(flash: &mut F, offset: u32, len: u32) -> Result<u32, StoreError> {
    let mut digest = Crc32::new();
    let mut chunk = [0u8; 256];
    let mut done = 0;
    while done < len {
        let take = (len - done).min(chunk.len() as u32);
        flash.read(offset + done, &mut chunk[..take as usize])?;
        digest.update(&chunk[..take as usize]);
        done += take;
    }
    Ok(digest.finish())
}

fn read_header<F: ReadNorFlash>(flash: &mut F, bank: Bank) -> Result<AppHeader, StoreError> {
    let mut bytes = [0u8; APP_HEADER_LEN];
    flash.read(bank.header_offset(), &mut bytes)?;
    AppHeader::deserialize(&bytes)
}

/// Validate one bank: header CRC, then code CRC.
fn validate_bank<F: ReadNorFlash>(flash: &mut F, bank: Bank) -> Result<AppHeader, StoreError> {
    let header = read_header(flash, bank)?;
    if header.app_size == 0 || header.app_size > internal::APP_SIZE {
        return Err(StoreError::TooLarge);
    }
    let code_crc = flash_crc32(flash, bank.app_offset(), header.app_size)?;
    if code_crc != header.app_crc32 {
        return Err(StoreError::CrcMismatch);
    }
    Ok(header)
}

/// Staged-update marker in the first page of the staging area.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StagingMarker {
    /// Total image length (header sector + code).
    pub image_len: u32,
    /// CRC-32 over the staged image.
    pub image_crc: u32,
}

impl StagingMarker {
    fn serialize(&self) -> [u8; STAGING_MARKER_LEN] {
        let mut bytes = [0u8; STAGING_MARKER_LEN];
        bytes[0..4].copy_from_slice(&MAGIC_UPDT.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.image_len.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.image_crc.to_le_bytes());
        let crc = crc32(&bytes[..12]);
        bytes[12..16].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    fn deserialize(bytes: &[u8; STAGING_MARKER_LEN]) -> Result<Self, StoreError> {
        let stored = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        if crc32(&bytes[..12]) != stored {
            return Err(StoreError::CrcMismatch);
        }
        if u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != MAGIC_UPDT {
            return Err(StoreError::MagicMismatch);
        }
        Ok(Self {
            image_len: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            image_crc: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }
}

/// Writes an incoming firmware image into the staging buffer.
pub struct StagingUpdater {
    written: u32,
}

impl Default for StagingUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingUpdater {
    /// A fresh updater; the first chunk at offset 0 erases the staging
    /// area.
    pub const fn new() -> Self {
        Self { written: 0 }
    }

    /// Append an image chunk at `offset` (sequential).
    pub fn write_chunk<F: NorFlash + ReadNorFlash>(
        &mut self,
        flash: &mut F,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        if offset != self.written {
            return Err(StoreError::TooLarge);
        }
        if offset + bytes.len() as u32 > external::STAGING_SIZE - external::STAGING_IMAGE_OFFSET {
            return Err(StoreError::TooLarge);
        }
        if offset == 0 {
            flash.erase(
                external::STAGING_OFFSET,
                external::STAGING_OFFSET + external::STAGING_SIZE,
            )?;
        }
        flash.write(external::STAGING_IMAGE_OFFSET + offset, bytes)?;
        self.written = offset + bytes.len() as u32;
        Ok(())
    }

    /// Record the expected CRC and arm the update for the next boot.
    pub fn finalize<F: NorFlash + ReadNorFlash>(
        &mut self,
        flash: &mut F,
        total_len: u32,
        image_crc: u32,
        backup: &mut impl BackupDomain,
    ) -> Result<(), StoreError> {
        let marker = StagingMarker {
            image_len: total_len,
            image_crc,
        };
        flash.write(external::STAGING_OFFSET, &marker.serialize())?;
        let mut shared = SharedData::load(backup);
        shared.update_requested = true;
        shared.store(backup);
        self.written = 0;
        Ok(())
    }

    /// Abandon the staged image.
    pub fn cancel<F: NorFlash>(
        &mut self,
        flash: &mut F,
        backup: &mut impl BackupDomain,
    ) -> Result<(), StoreError> {
        flash.erase(
            external::STAGING_OFFSET,
            external::STAGING_OFFSET + (F::ERASE_SIZE as u32).max(STAGING_MARKER_LEN as u32),
        )?;
        let mut shared = SharedData::load(backup);
        shared.update_requested = false;
        shared.store(backup);
        self.written = 0;
        Ok(())
    }
}

fn read_marker<F: ReadNorFlash>(flash: &mut F) -> Result<StagingMarker, StoreError> {
    let mut bytes = [0u8; STAGING_MARKER_LEN];
    flash.read(external::STAGING_OFFSET, &mut bytes)?;
    StagingMarker::deserialize(&bytes)
}

/// Copy a flash range between devices through a small RAM window.
fn copy_range<Src: ReadNorFlash, Dst: NorFlash>(
    src: &mut Src,
    src_offset: u32,
    dst: &mut Dst,
    dst_offset: u32,
    len: u32,
) -> Result<(), StoreError> {
    let mut chunk = [0u8; 256];
    let mut done = 0;
    while done < len {
        let take = (len - done).min(chunk.len() as u32);
        src.read(src_offset + done, &mut chunk[..take as usize])?;
        dst.write(dst_offset + done, &chunk[..take as usize])?;
        done += take;
    }
    Ok(())
}

/// Apply the staged image: erase the active bank and copy header + code.
fn apply_staged<FI, FE>(internal_flash: &mut FI, external_flash: &mut FE) -> Result<(), StoreError>
where
    FI: NorFlash + ReadNorFlash,
    FE: NorFlash + ReadNorFlash,
{
    let marker = read_marker(external_flash)?;
    if marker.image_len <= internal::APP_HEADER_SIZE
        || marker.image_len > internal::APP_HEADER_SIZE + internal::APP_SIZE
    {
        return Err(StoreError::TooLarge);
    }
    let actual = flash_crc32(external_flash, external::STAGING_IMAGE_OFFSET, marker.image_len)?;
    if actual != marker.image_crc {
        return Err(StoreError::CrcMismatch);
    }

    let code_len = marker.image_len - internal::APP_HEADER_SIZE;
    internal_flash.erase(
        internal::APP_HEADER_OFFSET,
        align_up(internal::APP_OFFSET + code_len, FI::ERASE_SIZE as u32),
    )?;
    // Header sector first, then the code.
    copy_range(
        external_flash,
        external::STAGING_IMAGE_OFFSET,
        internal_flash,
        internal::APP_HEADER_OFFSET,
        internal::APP_HEADER_SIZE,
    )?;
    copy_range(
        external_flash,
        external::STAGING_IMAGE_OFFSET + internal::APP_HEADER_SIZE,
        internal_flash,
        internal::APP_OFFSET,
        code_len,
    )?;
    validate_bank(internal_flash, Bank::Active)?;
    Ok(())
}

/// Copy the backup bank over the active bank.
fn roll_back<FI: NorFlash + ReadNorFlash>(flash: &mut FI) -> Result<AppHeader, StoreError> {
    let header = validate_bank(flash, Bank::Backup)?;
    let code_len = header.app_size;
    flash.erase(
        internal::APP_HEADER_OFFSET,
        align_up(internal::APP_OFFSET + code_len, FI::ERASE_SIZE as u32),
    )?;
    let mut chunk = [0u8; 256];
    let mut done = 0;
    let total = internal::APP_HEADER_SIZE + code_len;
    while done < total {
        let take = (total - done).min(chunk.len() as u32);
        flash.read(internal::BACKUP_HEADER_OFFSET + done, &mut chunk[..take as usize])?;
        flash.write(internal::APP_HEADER_OFFSET + done, &chunk[..take as usize])?;
        done += take;
    }
    validate_bank(flash, Bank::Active)
}

fn align_up(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

/// Run the boot decision.
///
/// Mutates flash (update application, rollback) and the shared block; the
/// caller jumps or stays in the loader according to the outcome.
pub fn run<FI, FE, B>(
    internal_flash: &mut FI,
    external_flash: &mut FE,
    backup: &mut B,
) -> BootOutcome
where
    FI: NorFlash + ReadNorFlash,
    FE: NorFlash + ReadNorFlash,
    B: BackupDomain,
{
    let mut shared = SharedData::load(backup);
    let mut reason = shared.boot_reason;

    // Staged update, if requested and intact.
    if shared.update_requested {
        match apply_staged(internal_flash, external_flash) {
            Ok(()) => {
                reason = BootReason::UpdateApplied;
                shared.boot_count = 0;
                // Clear the marker so a reset cannot re-apply.
                let _ = external_flash.erase(
                    external::STAGING_OFFSET,
                    external::STAGING_OFFSET + FE::ERASE_SIZE as u32,
                );
            }
            Err(_) => {
                reason = BootReason::InvalidApp;
            }
        }
        shared.update_requested = false;
    }

    // Boot-loop guard.
    if shared.boot_count >= MAX_BOOT_ATTEMPTS {
        if let Ok(header) = roll_back(internal_flash) {
            shared.boot_count = 0;
            shared.boot_reason = BootReason::RolledBack;
            shared.update_requested = false;
            shared.store(backup);
            return BootOutcome::Jump {
                entry: header.entry_point,
                reason: BootReason::RolledBack,
            };
        }
    }

    // Normal path: validate active, fall back to backup.
    let header = match validate_bank(internal_flash, Bank::Active) {
        Ok(header) => header,
        Err(_) => match roll_back(internal_flash) {
            Ok(header) => {
                reason = BootReason::RolledBack;
                header
            }
            Err(_) => {
                shared.store(backup);
                return BootOutcome::NoValidApp;
            }
        },
    };

    shared.boot_count = shared.boot_count.saturating_add(1);
    shared.boot_reason = reason;
    shared.store(backup);
    BootOutcome::Jump {
        entry: header.entry_point,
        reason,
    }
}

/// Called by a healthy application to clear the boot-loop counter.
pub fn mark_boot_ok(backup: &mut impl BackupDomain) {
    let mut shared = SharedData::load(backup);
    shared.boot_count = 0;
    shared.store(backup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::testflash::MemFlash;

    const INT_SIZE: usize = internal::TOTAL_SIZE as usize;
    const EXT_SIZE: usize = 0x20_0000;

    struct Backup([u8; SHARED_LEN]);

    impl BackupDomain for Backup {
        fn load(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0[..buf.len()]);
        }
        fn store(&mut self, buf: &[u8]) {
            self.0[..buf.len()].copy_from_slice(buf);
        }
    }

    fn image(entry: u32, fill: u8, code_len: u32) -> std::vec::Vec<u8> {
        let code = std::vec![fill; code_len as usize];
        let header = AppHeader {
            version: 1,
            build: 42,
            app_size: code_len,
            app_crc32: crc32(&code),
            entry_point: entry,
            signature: [0; 64],
        };
        let mut bytes = std::vec![0xFFu8; internal::APP_HEADER_SIZE as usize];
        bytes[..APP_HEADER_LEN].copy_from_slice(&header.serialize());
        bytes.extend_from_slice(&code);
        bytes
    }

    fn flash_with_app(entry: u32) -> MemFlash<INT_SIZE> {
        let mut flash = MemFlash::new();
        let image = image(entry, 0xAB, 1024);
        flash.data[internal::APP_HEADER_OFFSET as usize
            ..internal::APP_HEADER_OFFSET as usize + internal::APP_HEADER_SIZE as usize]
            .copy_from_slice(&image[..internal::APP_HEADER_SIZE as usize]);
        flash.data[internal::APP_OFFSET as usize..internal::APP_OFFSET as usize + 1024]
            .copy_from_slice(&image[internal::APP_HEADER_SIZE as usize..]);
        flash
    }

    fn install_backup(flash: &mut MemFlash<INT_SIZE>, entry: u32) {
        let image = image(entry, 0xCD, 512);
        flash.data[internal::BACKUP_HEADER_OFFSET as usize
            ..internal::BACKUP_HEADER_OFFSET as usize + internal::APP_HEADER_SIZE as usize]
            .copy_from_slice(&image[..internal::APP_HEADER_SIZE as usize]);
        flash.data[internal::BACKUP_OFFSET as usize..internal::BACKUP_OFFSET as usize + 512]
            .copy_from_slice(&image[internal::APP_HEADER_SIZE as usize..]);
    }

    #[test]
    fn shared_data_round_trip_and_corruption() {
        let mut backup = Backup([0; SHARED_LEN]);
        let shared = SharedData {
            boot_reason: BootReason::Software,
            update_requested: true,
            boot_count: 2,
            last_crash_addr: 0x0800_1234,
        };
        shared.store(&mut backup);
        assert_eq!(SharedData::load(&backup), shared);
        backup.0[8] ^= 0xFF;
        assert_eq!(SharedData::load(&backup), SharedData::default());
    }

    #[test]
    fn clean_boot_jumps_to_active() {
        let mut internal_flash = flash_with_app(0x0801_1000);
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);
        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(
            outcome,
            BootOutcome::Jump {
                entry: 0x0801_1000,
                reason: BootReason::PowerOn
            }
        );
        assert_eq!(SharedData::load(&backup).boot_count, 1);
    }

    #[test]
    fn staged_update_applies_and_clears_flag() {
        let mut internal_flash = flash_with_app(0x1000_0000);
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);

        // Stage a new image through the updater.
        let new_image = image(0x2000_0000, 0x5A, 2048);
        let mut updater = StagingUpdater::new();
        for (i, chunk) in new_image.chunks(512).enumerate() {
            updater
                .write_chunk(&mut external_flash, (i * 512) as u32, chunk)
                .unwrap();
        }
        updater
            .finalize(
                &mut external_flash,
                new_image.len() as u32,
                crc32(&new_image),
                &mut backup,
            )
            .unwrap();
        assert!(SharedData::load(&backup).update_requested);

        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(
            outcome,
            BootOutcome::Jump {
                entry: 0x2000_0000,
                reason: BootReason::UpdateApplied
            }
        );
        let shared = SharedData::load(&backup);
        assert!(!shared.update_requested, "flag cleared");
        // A second boot runs the new image without re-applying.
        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(
            outcome,
            BootOutcome::Jump {
                entry: 0x2000_0000,
                reason: BootReason::UpdateApplied
            }
        );
    }

    #[test]
    fn bad_staged_crc_refused_current_image_survives() {
        let mut internal_flash = flash_with_app(0x1000_0000);
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);

        let new_image = image(0x2000_0000, 0x5A, 2048);
        let mut updater = StagingUpdater::new();
        updater
            .write_chunk(&mut external_flash, 0, &new_image)
            .unwrap();
        updater
            .finalize(&mut external_flash, new_image.len() as u32, 0xBAD0_BAD0, &mut backup)
            .unwrap();

        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(
            outcome,
            BootOutcome::Jump {
                entry: 0x1000_0000,
                reason: BootReason::InvalidApp
            }
        );
        assert!(!SharedData::load(&backup).update_requested);
    }

    #[test]
    fn boot_loop_rolls_back_to_backup() {
        let mut internal_flash = flash_with_app(0x1000_0000);
        install_backup(&mut internal_flash, 0x3000_0000);
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);
        SharedData {
            boot_count: MAX_BOOT_ATTEMPTS,
            ..SharedData::default()
        }
        .store(&mut backup);

        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(
            outcome,
            BootOutcome::Jump {
                entry: 0x3000_0000,
                reason: BootReason::RolledBack
            }
        );
        assert_eq!(SharedData::load(&backup).boot_count, 0);
    }

    #[test]
    fn corrupt_active_falls_back_to_backup() {
        let mut internal_flash = flash_with_app(0x1000_0000);
        install_backup(&mut internal_flash, 0x3000_0000);
        internal_flash.corrupt(internal::APP_OFFSET as usize + 10);
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);
        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(
            outcome,
            BootOutcome::Jump {
                entry: 0x3000_0000,
                reason: BootReason::RolledBack
            }
        );
    }

    #[test]
    fn no_valid_app_anywhere() {
        let mut internal_flash: MemFlash<INT_SIZE> = MemFlash::new();
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);
        let outcome = run(&mut internal_flash, &mut external_flash, &mut backup);
        assert_eq!(outcome, BootOutcome::NoValidApp);
    }

    #[test]
    fn cancel_clears_marker_and_flag() {
        let mut external_flash: MemFlash<EXT_SIZE> = MemFlash::new();
        let mut backup = Backup([0; SHARED_LEN]);
        let mut updater = StagingUpdater::new();
        updater.write_chunk(&mut external_flash, 0, &[1, 2, 3]).unwrap();
        updater
            .finalize(&mut external_flash, 3, crc32(&[1, 2, 3]), &mut backup)
            .unwrap();
        assert!(read_marker(&mut external_flash).is_ok());
        updater.cancel(&mut external_flash, &mut backup).unwrap();
        assert!(read_marker(&mut external_flash).is_err());
        assert!(!SharedData::load(&backup).update_requested);
    }

    #[test]
    fn mark_boot_ok_clears_counter() {
        let mut backup = Backup([0; SHARED_LEN]);
        SharedData {
            boot_count: 2,
            ..SharedData::default()
        }
        .store(&mut backup);
        mark_boot_ok(&mut backup);
        assert_eq!(SharedData::load(&backup).boot_count, 0);
    }
}
