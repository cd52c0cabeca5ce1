//! Protocol command dispatch.
//!
//! The handler owns the telemetry streamer and the binary-configuration
//! staging buffer. Everything it does to the rest of the system goes
//! through the [`Services`] contract, so the transport stays decoupled
//! from the concrete executor/codec/persistence types the firmware wires
//! together. Long flash operations (SAVE_CONFIG, staged-image
//! finalisation) run synchronously inside the service call, which is why
//! they are only ever triggered from command handlers and never from the
//! tick path.

use heapless::Vec;

use super::telemetry::{StreamMask, Telemetry};
use super::{command, encode_frame, read_i32, read_u16, read_u32, reason, Frame};
use crate::channel::ChannelId;
use crate::crc::crc32;

/// Identity reported by GET_VERSION.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Protocol version.
    pub protocol: u8,
    /// Firmware version triple.
    pub firmware: (u8, u8, u8),
    /// Device serial number.
    pub serial: u32,
    /// Capability bits.
    pub capabilities: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            protocol: 3,
            firmware: (0, 1, 0),
            serial: 0,
            capabilities: 0,
        }
    }
}

/// Channel record snapshot returned by [`Services::read_channel`].
#[derive(Debug, Copy, Clone)]
pub struct ChannelInfo {
    /// Current value.
    pub value: i32,
    /// Raw channel flags.
    pub flags: u8,
    /// Lower clamp bound.
    pub min: i32,
    /// Upper clamp bound.
    pub max: i32,
}

/// System effects the firmware provides to the transport.
pub trait Services {
    /// Apply a configuration image to the runtime; returns the number of
    /// applied records, or a NACK reason.
    fn apply_config(&mut self, bytes: &[u8]) -> Result<u16, u8>;

    /// Persist the active configuration; returns a NACK reason on failure.
    fn save_config(&mut self) -> Result<(), u8>;

    /// Clear the runtime configuration (and the persisted copy).
    fn clear_config(&mut self) -> Result<(), u8>;

    /// The active configuration image, for GET_CONFIG.
    fn active_config(&self) -> &[u8];

    /// Write a channel value as a remote override; `false` when the
    /// channel rejects the write.
    fn write_channel(&mut self, id: ChannelId, value: i32) -> bool;

    /// Snapshot one channel record.
    fn read_channel(&self, id: ChannelId) -> Option<ChannelInfo>;
}

/// Side effects the main loop must execute after a handled frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// Reset the MCU once the response has been flushed.
    Reset,
}

/// Bytes per CONFIG_DATA chunk.
const CONFIG_CHUNK: usize = 1024;

/// The protocol request handler.
///
/// `STAGING` bounds the LOAD_BINARY_CONFIG image size.
pub struct Handler<const STAGING: usize = 4096> {
    staging: Vec<u8, STAGING>,
    telemetry: Telemetry,
}

impl<const STAGING: usize> Default for Handler<STAGING> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const STAGING: usize> Handler<STAGING> {
    /// A handler with an empty staging buffer and no stream running.
    pub fn new() -> Self {
        Self {
            staging: Vec::new(),
            telemetry: Telemetry::new(),
        }
    }

    /// Telemetry streamer access (the main loop calls [`Telemetry::tick`]
    /// through this).
    pub fn telemetry(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }

    /// Handle one request frame; complete response frames are pushed into
    /// `out`.
    pub fn handle<S: Services>(
        &mut self,
        frame: &Frame<'_>,
        services: &mut S,
        info: &DeviceInfo,
        now_ms: u32,
        out: &mut impl FnMut(&[u8]),
    ) -> Option<Action> {
        let seq = frame.seq;
        match frame.command {
            command::PING => {
                respond(out, command::PONG, seq, &[]);
                None
            }
            command::GET_VERSION => {
                let mut payload = [0u8; 12];
                payload[0] = info.protocol;
                payload[1] = info.firmware.0;
                payload[2] = info.firmware.1;
                payload[3] = info.firmware.2;
                payload[4..8].copy_from_slice(&info.serial.to_le_bytes());
                payload[8..12].copy_from_slice(&info.capabilities.to_le_bytes());
                respond(out, command::INFO_RESP, seq, &payload);
                None
            }
            command::GET_CONFIG => {
                send_config(services.active_config(), seq, out);
                None
            }
            command::LOAD_CONFIG => {
                match services.apply_config(frame.payload) {
                    Ok(count) => {
                        let mut payload = [0u8; 3];
                        payload[0] = 1;
                        payload[1..3].copy_from_slice(&count.to_le_bytes());
                        respond(out, command::CONFIG_ACK, seq, &payload);
                    }
                    Err(why) => nack(out, seq, why),
                }
                None
            }
            command::SAVE_CONFIG => {
                match services.save_config() {
                    Ok(()) => respond(out, command::FLASH_ACK, seq, &[1]),
                    Err(why) => nack(out, seq, why),
                }
                None
            }
            command::CLEAR_CONFIG => {
                match services.clear_config() {
                    Ok(()) => respond(out, command::CLEAR_CONFIG_ACK, seq, &[1]),
                    Err(why) => nack(out, seq, why),
                }
                None
            }
            command::START_STREAM => {
                let Some(rate) = read_u16(frame.payload, 1) else {
                    nack(out, seq, reason::BAD_PAYLOAD);
                    return None;
                };
                let mask = StreamMask(frame.payload[0]);
                self.telemetry.start(mask, rate, now_ms);
                respond(out, command::ACK, seq, &[command::START_STREAM]);
                None
            }
            command::STOP_STREAM => {
                self.telemetry.stop();
                respond(out, command::ACK, seq, &[command::STOP_STREAM]);
                None
            }
            command::SET_OUTPUT => {
                let (Some(id), Some(value)) =
                    (read_u16(frame.payload, 0), read_i32(frame.payload, 2))
                else {
                    nack(out, seq, reason::BAD_PAYLOAD);
                    return None;
                };
                let id = ChannelId(id);
                let ok = services.write_channel(id, value);
                let mut payload = [0u8; 3];
                payload[0..2].copy_from_slice(&id.0.to_le_bytes());
                payload[2] = u8::from(ok);
                respond(out, command::OUTPUT_ACK, seq, &payload);
                None
            }
            command::GET_CHANNEL => {
                let Some(id) = read_u16(frame.payload, 0) else {
                    nack(out, seq, reason::BAD_PAYLOAD);
                    return None;
                };
                let id = ChannelId(id);
                match services.read_channel(id) {
                    Some(info) => {
                        let mut payload = [0u8; 15];
                        payload[0..2].copy_from_slice(&id.0.to_le_bytes());
                        payload[2..6].copy_from_slice(&info.value.to_le_bytes());
                        payload[6] = info.flags;
                        payload[7..11].copy_from_slice(&info.min.to_le_bytes());
                        payload[11..15].copy_from_slice(&info.max.to_le_bytes());
                        respond(out, command::CHANNEL_DATA, seq, &payload);
                    }
                    None => nack(out, seq, reason::BAD_PAYLOAD),
                }
                None
            }
            command::LOAD_BINARY_CONFIG => {
                self.handle_binary_chunk(frame, services, out);
                None
            }
            command::RESET => {
                respond(out, command::ACK, seq, &[command::RESET]);
                Some(Action::Reset)
            }
            _ => {
                nack(out, seq, reason::UNKNOWN_COMMAND);
                None
            }
        }
    }

    fn handle_binary_chunk<S: Services>(
        &mut self,
        frame: &Frame<'_>,
        services: &mut S,
        out: &mut impl FnMut(&[u8]),
    ) {
        let seq = frame.seq;
        let (Some(head), Some(length)) = (read_u32(frame.payload, 0), read_u16(frame.payload, 4))
        else {
            nack(out, seq, reason::BAD_PAYLOAD);
            return;
        };
        if length == 0 {
            // Terminator: the leading u32 carries the image CRC.
            let expected = head;
            let actual = crc32(&self.staging);
            if actual != expected {
                self.staging.clear();
                nack(out, seq, reason::CRC_MISMATCH);
                return;
            }
            let applied = services.apply_config(&self.staging);
            self.staging.clear();
            match applied {
                Ok(count) => {
                    let mut payload = [0u8; 3];
                    payload[0] = 1;
                    payload[1..3].copy_from_slice(&count.to_le_bytes());
                    respond(out, command::BINARY_CONFIG_ACK, seq, &payload);
                }
                Err(why) => nack(out, seq, why),
            }
            return;
        }

        let offset = head as usize;
        let length = usize::from(length);
        let Some(bytes) = frame.payload.get(6..6 + length) else {
            nack(out, seq, reason::BAD_PAYLOAD);
            return;
        };
        if offset != self.staging.len() || offset + length > STAGING {
            // Out-of-order or oversized upload restarts the transfer.
            self.staging.clear();
            nack(out, seq, reason::TOO_LARGE);
            return;
        }
        // Capacity was checked above.
        let _ = self.staging.extend_from_slice(bytes);
        let mut payload = [0u8; 5];
        payload[0] = 1;
        payload[1..5].copy_from_slice(&(self.staging.len() as u32).to_le_bytes());
        respond(out, command::BINARY_CONFIG_ACK, seq, &payload);
    }
}

fn send_config(active: &[u8], seq: u16, out: &mut impl FnMut(&[u8])) {
    let mut offset = 0;
    while offset < active.len() {
        let chunk = (active.len() - offset).min(CONFIG_CHUNK);
        let mut payload = [0u8; 6 + CONFIG_CHUNK];
        payload[0..4].copy_from_slice(&(offset as u32).to_le_bytes());
        payload[4..6].copy_from_slice(&(chunk as u16).to_le_bytes());
        payload[6..6 + chunk].copy_from_slice(&active[offset..offset + chunk]);
        respond(out, command::CONFIG_DATA, seq, &payload[..6 + chunk]);
        offset += chunk;
    }
    // Terminator mirrors the upload format: CRC in the leading u32.
    let mut payload = [0u8; 6];
    payload[0..4].copy_from_slice(&crc32(active).to_le_bytes());
    respond(out, command::CONFIG_DATA, seq, &payload);
}

fn respond(out: &mut impl FnMut(&[u8]), cmd: u8, seq: u16, payload: &[u8]) {
    let mut frame = [0u8; 8 + 6 + CONFIG_CHUNK];
    if let Some(len) = encode_frame(cmd, seq, payload, &mut frame) {
        out(&frame[..len]);
    }
}

fn nack(out: &mut impl FnMut(&[u8]), seq: u16, why: u8) {
    respond(out, command::NACK, seq, &[why]);
}
