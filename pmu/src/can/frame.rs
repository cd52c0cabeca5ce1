//! Level-1 frame objects: wire identity, buffer lifetime and TX scheduling.

use embedded_can::Id;
use heapless::String;

use crate::channel::ChannelId;

/// Maximum frame payload the codec buffers (CAN FD).
pub const FRAME_BUF: usize = 64;
/// Maximum length of a frame object's string key.
pub const KEY_LEN: usize = 16;
/// Maximum sub-frames of a compound message.
pub const COMPOUND_MAX: u8 = 8;

/// Wire-level message layout variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// Plain single frame.
    #[default]
    Normal,
    /// One identifier multiplexing up to [`COMPOUND_MAX`] logical frames,
    /// selected by the first payload byte.
    Compound(u8),
    /// Fixed status layout broadcast by a peer unit, variant 1.
    PmuStatus1,
    /// Fixed status layout broadcast by a peer unit, variant 2.
    PmuStatus2,
    /// Fixed status layout broadcast by a peer unit, variant 3.
    PmuStatus3,
}

impl MessageType {
    /// Number of logical sub-frames the buffer holds.
    pub fn frame_count(self) -> u8 {
        match self {
            Self::Compound(n) => n.clamp(1, COMPOUND_MAX),
            _ => 1,
        }
    }
}

/// Transmit scheduling of a TX frame.
#[derive(Debug, Clone, Default)]
pub struct TxSchedule {
    /// Cycle period in milliseconds; 0 disables periodic transmission.
    pub cycle_ms: u32,
    /// Transmit on the rising edge of this channel; unbound disables.
    pub trigger: ChannelId,
}

/// Static description of one frame object.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// String key the host configuration uses to reference this frame;
    /// resolved to a [`FrameRef`] at link time.
    pub key: String<KEY_LEN>,
    /// Bus index the frame lives on.
    pub bus: u8,
    /// Wire identifier; standard/extended is part of the identity.
    pub id: Option<Id>,
    /// Payload length in bytes.
    pub dlc: u8,
    /// Layout variant.
    pub message_type: MessageType,
    /// RX staleness window in milliseconds; 0 disables timeout handling.
    pub timeout_ms: u32,
    /// TX scheduling; `None` marks an RX frame.
    pub tx: Option<TxSchedule>,
}

/// Stable reference to a frame slot, invalidated by [`clear`] through the
/// generation counter.
///
/// [`clear`]: super::Codec::clear
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameRef {
    pub(super) slot: u16,
    pub(super) generation: u16,
}

/// One live frame object.
#[derive(Debug, Clone)]
pub struct FrameObject {
    /// Static configuration.
    pub config: FrameConfig,
    pub(super) buffer: [u8; FRAME_BUF],
    pub(super) last_rx_ms: u32,
    pub(super) received: bool,
    pub(super) timed_out: bool,
    pub(super) rx_count: u32,
    pub(super) compound_idx: u8,
    pub(super) next_tx_ms: u32,
    pub(super) trigger_prev: bool,
}

impl FrameObject {
    pub(super) fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: [0; FRAME_BUF],
            last_rx_ms: 0,
            received: false,
            timed_out: false,
            rx_count: 0,
            compound_idx: 0,
            next_tx_ms: 0,
            trigger_prev: false,
        }
    }

    /// `true` when the frame matches a received identity.
    pub fn matches(&self, bus: u8, id: Id) -> bool {
        self.config.bus == bus && self.config.id == Some(id)
    }

    /// Store a received payload; compound frames demultiplex on the first
    /// byte.
    pub(super) fn accept(&mut self, data: &[u8], now_ms: u32) {
        let count = self.config.message_type.frame_count();
        if count > 1 {
            let Some(&selector) = data.first() else {
                return;
            };
            if selector >= count {
                return;
            }
            self.compound_idx = selector;
            let base = usize::from(selector) * 8;
            let len = data.len().min(8);
            self.buffer[base..base + len].copy_from_slice(&data[..len]);
        } else {
            let len = data.len().min(FRAME_BUF);
            self.buffer[..len].copy_from_slice(&data[..len]);
        }
        self.last_rx_ms = now_ms;
        self.received = true;
        self.timed_out = false;
        self.rx_count = self.rx_count.wrapping_add(1);
    }

    /// Received payload buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Frames received since configuration load.
    pub fn rx_count(&self) -> u32 {
        self.rx_count
    }

    /// `true` while the RX staleness window is exceeded.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Sub-frame index of the most recent compound reception.
    pub fn compound_idx(&self) -> u8 {
        self.compound_idx
    }
}

/// One arena slot: a generation counter plus the (possibly absent) frame.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    pub(super) generation: u16,
    pub(super) frame: Option<FrameObject>,
}

/// Copy `key` into a bounded frame key, truncating if it does not fit.
pub fn truncate_key(key: &str) -> String<KEY_LEN> {
    let mut out = String::new();
    for ch in key.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Decoded payload length for a CAN-FD DLC.
pub fn dlc_to_len(dlc: u8) -> usize {
    match dlc {
        0..=8 => usize::from(dlc),
        9 => 12,
        10 => 16,
        11 => 20,
        12 => 24,
        13 => 32,
        14 => 48,
        15.. => 64,
    }
}

/// Smallest DLC that carries at least `len` bytes.
pub fn len_to_dlc(len: usize) -> u8 {
    match len {
        0..=8 => len as u8,
        9..=12 => 9,
        13..=16 => 10,
        17..=20 => 11,
        21..=24 => 12,
        25..=32 => 13,
        33..=48 => 14,
        _ => 15,
    }
}
