//! Checksums shared by the framed transport and the flash layouts.
//!
//! Two algorithms cover the whole system: CRC-16/CCITT (poly `0x1021`, init
//! `0xFFFF`, unreflected, no final xor) over protocol frames, and CRC-32
//! IEEE 802.3 (reflected poly `0xEDB88320`, init and final xor `0xFFFFFFFF`)
//! over flash headers, images and configuration slots. The transfer-frame
//! variant of the transport additionally uses CRC-8 (poly `0x07`).
//!
//! All three are bitwise implementations; none of the data paths is hot
//! enough to justify table storage.

/// Running CRC-16/CCITT digest.
#[derive(Copy, Clone)]
pub struct Crc16(u16);

impl Crc16 {
    /// Start a new digest at the `0xFFFF` init value.
    pub const fn new() -> Self {
        Self(0xFFFF)
    }

    /// Absorb `bytes` into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.0;
        for &byte in bytes {
            crc ^= u16::from(byte) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x1021
                } else {
                    crc << 1
                };
            }
        }
        self.0 = crc;
    }

    /// Current digest value.
    pub const fn finish(self) -> u16 {
        self.0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-16/CCITT of a single contiguous buffer.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut digest = Crc16::new();
    digest.update(bytes);
    digest.finish()
}

/// Running CRC-32/IEEE digest.
#[derive(Copy, Clone)]
pub struct Crc32(u32);

impl Crc32 {
    /// Start a new digest.
    pub const fn new() -> Self {
        Self(0xFFFF_FFFF)
    }

    /// Absorb `bytes` into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.0;
        for &byte in bytes {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
        self.0 = crc;
    }

    /// Current digest value (final xor applied).
    pub const fn finish(self) -> u32 {
        self.0 ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32/IEEE of a single contiguous buffer.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut digest = Crc32::new();
    digest.update(bytes);
    digest.finish()
}

/// CRC-8 (poly `0x07`, init 0) used by the COBS transfer frame.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16(CHECK), 0x29B1);
    }

    #[test]
    fn crc16_incremental_matches_oneshot() {
        let mut digest = Crc16::new();
        digest.update(b"1234");
        digest.update(b"56789");
        assert_eq!(digest.finish(), crc16(CHECK));
    }

    #[test]
    fn crc16_empty_is_init() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn crc16_bit_flip_changes_digest() {
        let reference = crc16(CHECK);
        let mut copy = [0u8; 9];
        copy.copy_from_slice(CHECK);
        for byte in 0..copy.len() {
            for bit in 0..8 {
                copy[byte] ^= 1 << bit;
                assert_ne!(crc16(&copy), reference, "flip at {byte}:{bit}");
                copy[byte] ^= 1 << bit;
            }
        }
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(CHECK), 0xCBF4_3926);
    }

    #[test]
    fn crc32_incremental_matches_oneshot() {
        let mut digest = Crc32::new();
        digest.update(b"12");
        digest.update(b"3456789");
        assert_eq!(digest.finish(), crc32(CHECK));
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn crc8_check_value() {
        assert_eq!(crc8(CHECK), 0xF4);
    }
}
