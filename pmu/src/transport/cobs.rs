//! The alternate transfer-frame encoding: `0x7E | id | COBS(len | payload |
//! CRC-8) | 0x81`.
//!
//! Consistent-overhead byte stuffing removes zero bytes from the framed
//! block; the first stuffed byte is the frame's "overhead" byte. The
//! primary `0xAA` framing (see the parent module) is mandatory; this
//! encoding is kept for links that already speak a COBS transport. Both
//! sides of a link pick one encoding, there is no in-band negotiation.

use crate::crc::crc8;

/// Frame start marker.
pub const START: u8 = 0x7E;
/// Frame end marker.
pub const END: u8 = 0x81;
/// Largest payload of a transfer frame.
pub const PAYLOAD_MAX: usize = 192;

/// COBS-encode `input` into `out`; returns the encoded length.
///
/// `out` must have room for `input.len() + input.len() / 254 + 1` bytes;
/// returns `None` when it does not.
pub fn cobs_encode(input: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut code_at = 0;
    let mut code: u8 = 1;
    let mut written = 1;
    for &byte in input {
        if byte == 0 {
            *out.get_mut(code_at)? = code;
            code_at = written;
            written += 1;
            code = 1;
        } else {
            *out.get_mut(written)? = byte;
            written += 1;
            code += 1;
            if code == 0xFF {
                *out.get_mut(code_at)? = code;
                code_at = written;
                written += 1;
                code = 1;
            }
        }
    }
    *out.get_mut(code_at)? = code;
    Some(written)
}

/// COBS-decode `input` into `out`; returns the decoded length, or `None`
/// on a malformed block or when `out` is too small.
pub fn cobs_decode(input: &[u8], out: &mut [u8]) -> Option<usize> {
    let mut read = 0;
    let mut written = 0;
    while read < input.len() {
        let code = input[read];
        if code == 0 {
            return None;
        }
        read += 1;
        for _ in 1..code {
            *out.get_mut(written)? = *input.get(read)?;
            read += 1;
            written += 1;
        }
        if code != 0xFF && read < input.len() {
            *out.get_mut(written)? = 0;
            written += 1;
        }
    }
    Some(written)
}

/// Encode a transfer frame into `out`; returns the total length.
pub fn encode_transfer(id: u8, payload: &[u8], out: &mut [u8]) -> Option<usize> {
    if payload.len() > PAYLOAD_MAX {
        return None;
    }
    // Block to stuff: len | payload | crc8(id | len | payload).
    let mut block = [0u8; PAYLOAD_MAX + 2];
    block[0] = payload.len() as u8;
    block[1..1 + payload.len()].copy_from_slice(payload);
    let mut crc_input = [0u8; PAYLOAD_MAX + 2];
    crc_input[0] = id;
    crc_input[1] = payload.len() as u8;
    crc_input[2..2 + payload.len()].copy_from_slice(payload);
    block[1 + payload.len()] = crc8(&crc_input[..2 + payload.len()]);

    *out.first_mut()? = START;
    *out.get_mut(1)? = id;
    let stuffed = cobs_encode(&block[..2 + payload.len()], out.get_mut(2..)?)?;
    *out.get_mut(2 + stuffed)? = END;
    Some(3 + stuffed)
}

/// Decoder state machine for transfer frames.
///
/// The stuffed block is decoded incrementally, so the embedded length byte
/// (the first decoded byte) bounds the frame without scanning for the end
/// marker — which is important because the marker value may legally appear
/// inside stuffed data.
pub struct TransferParser {
    state: TransferState,
    id: u8,
    decoded: heapless::Vec<u8, { PAYLOAD_MAX + 2 }>,
    group_left: u8,
    pending_zero: bool,
    started: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TransferState {
    Seek,
    Id,
    Block,
    End,
}

/// A decoded transfer frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Transfer<'a> {
    /// Frame identifier byte.
    pub id: u8,
    /// Decoded payload.
    pub payload: &'a [u8],
}

impl Default for TransferParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferParser {
    /// A parser hunting for a start marker.
    pub fn new() -> Self {
        Self {
            state: TransferState::Seek,
            id: 0,
            decoded: heapless::Vec::new(),
            group_left: 0,
            pending_zero: false,
            started: false,
        }
    }

    fn target(&self) -> Option<usize> {
        self.decoded.first().map(|&len| usize::from(len) + 2)
    }

    fn resync(&mut self) {
        self.state = TransferState::Seek;
    }

    /// Feed one byte; on a complete valid frame the decoded payload is
    /// written into `scratch` and returned.
    pub fn push<'a>(&mut self, byte: u8, scratch: &'a mut [u8]) -> Option<Transfer<'a>> {
        match self.state {
            TransferState::Seek => {
                if byte == START {
                    self.state = TransferState::Id;
                }
                None
            }
            TransferState::Id => {
                self.id = byte;
                self.decoded.clear();
                self.group_left = 0;
                self.pending_zero = false;
                self.started = false;
                self.state = TransferState::Block;
                None
            }
            TransferState::Block => {
                if self.group_left == 0 {
                    // Code byte opens the next stuffed group.
                    if byte == 0 {
                        self.resync();
                        return None;
                    }
                    if self.started && self.pending_zero && self.decoded.push(0).is_err() {
                        self.resync();
                        return None;
                    }
                    self.started = true;
                    self.group_left = byte - 1;
                    self.pending_zero = byte != 0xFF;
                } else {
                    if self.decoded.push(byte).is_err() {
                        self.resync();
                        return None;
                    }
                    self.group_left -= 1;
                }
                if self.group_left == 0 {
                    if let Some(target) = self.target() {
                        if self.decoded.len() >= target {
                            self.state = TransferState::End;
                        }
                    }
                }
                None
            }
            TransferState::End => {
                self.state = TransferState::Seek;
                if byte != END {
                    return None;
                }
                let target = self.target()?;
                if self.decoded.len() != target {
                    return None;
                }
                let payload_len = target - 2;
                if payload_len > scratch.len() {
                    return None;
                }
                let mut crc_input = [0u8; PAYLOAD_MAX + 2];
                crc_input[0] = self.id;
                crc_input[1] = self.decoded[0];
                crc_input[2..2 + payload_len]
                    .copy_from_slice(&self.decoded[1..1 + payload_len]);
                if crc8(&crc_input[..2 + payload_len]) != self.decoded[1 + payload_len] {
                    return None;
                }
                scratch[..payload_len].copy_from_slice(&self.decoded[1..1 + payload_len]);
                Some(Transfer {
                    id: self.id,
                    payload: &scratch[..payload_len],
                })
            }
        }
    }
}
