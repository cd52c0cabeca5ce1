//! Telemetry streaming: periodic DATA frames carrying a masked channel
//! subset.

use bitfield::bitfield;

use super::{command, encode_frame, SEQ_BROADCAST};
use crate::channel::{self, ChannelId, Registry};

bitfield! {
    /// Selection mask of a telemetry stream.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct StreamMask(u8);
    impl Debug;
    /// Power outputs and H-bridges (ids 100..=133).
    pub outputs, set_outputs: 0;
    /// Analog and digital inputs (ids 1..=69).
    pub inputs, set_inputs: 1;
    /// CAN signal channels (ids 200..=399).
    pub can, set_can: 2;
    /// Temperature system channels.
    pub temps, set_temps: 3;
    /// Voltage system channels.
    pub voltages, set_voltages: 4;
    /// Supervisor fault mask.
    pub faults, set_faults: 5;
    /// Block channels (ids 400..=999).
    pub channels, set_channels: 6;
}

/// Entries per DATA frame before a second frame is started.
pub const ENTRIES_MAX: usize = 300;

/// Stream rate bounds in hertz.
pub const RATE_MIN_HZ: u16 = 1;
/// Stream rate bounds in hertz.
pub const RATE_MAX_HZ: u16 = 1000;

/// The telemetry streamer.
#[derive(Debug, Default)]
pub struct Telemetry {
    mask: StreamMask,
    period_ms: u32,
    next_due_ms: u32,
    active: bool,
}

impl Telemetry {
    /// An inactive streamer.
    pub const fn new() -> Self {
        Self {
            mask: StreamMask(0),
            period_ms: 0,
            next_due_ms: 0,
            active: false,
        }
    }

    /// Start streaming `mask` at `rate_hz` (clamped to 1..=1000 Hz).
    pub fn start(&mut self, mask: StreamMask, rate_hz: u16, now_ms: u32) {
        let rate = rate_hz.clamp(RATE_MIN_HZ, RATE_MAX_HZ);
        self.mask = mask;
        self.period_ms = u32::from(1000 / rate).max(1);
        self.next_due_ms = now_ms;
        self.active = true;
    }

    /// Stop streaming.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// `true` while a stream is configured.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Emit due DATA frames; `out` receives complete encoded frames.
    pub fn tick<const CAP: usize>(
        &mut self,
        registry: &Registry<CAP>,
        now_ms: u32,
        out: &mut impl FnMut(&[u8]),
    ) {
        if !self.active || now_ms.wrapping_sub(self.next_due_ms) >= i32::MAX as u32 {
            return;
        }
        self.next_due_ms = now_ms.wrapping_add(self.period_ms);

        let mut payload = [0u8; 6 + ENTRIES_MAX * 6];
        payload[0..4].copy_from_slice(&now_ms.to_le_bytes());
        let mut count: u16 = 0;
        let mut at = 6;
        for (id, record) in registry.iter() {
            if !self.selected(id) {
                continue;
            }
            if usize::from(count) == ENTRIES_MAX {
                break;
            }
            payload[at..at + 2].copy_from_slice(&id.0.to_le_bytes());
            payload[at + 2..at + 6].copy_from_slice(&record.value().to_le_bytes());
            at += 6;
            count += 1;
        }
        payload[4..6].copy_from_slice(&count.to_le_bytes());

        let mut frame = [0u8; 8 + 6 + ENTRIES_MAX * 6];
        if let Some(len) = encode_frame(command::DATA, SEQ_BROADCAST, &payload[..at], &mut frame)
        {
            out(&frame[..len]);
        }
    }

    fn selected(&self, id: ChannelId) -> bool {
        let raw = id.0;
        (self.mask.outputs() && (100..=133).contains(&raw))
            || (self.mask.inputs() && (1..=69).contains(&raw))
            || (self.mask.can() && (200..=399).contains(&raw))
            || (self.mask.temps()
                && (id == channel::MCU_TEMPERATURE || id == channel::BOARD_TEMPERATURE))
            || (self.mask.voltages() && id == channel::BATTERY_VOLTAGE)
            || (self.mask.faults() && id == channel::FAULT_MASK)
            || (self.mask.channels() && (400..=999).contains(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, Direction, Record, ValueFormat};
    use crate::transport::Parser;

    fn registry() -> Registry<64> {
        let mut reg = Registry::new();
        reg.register_system_channels();
        let _ = reg.register(
            ChannelId(100),
            Record::new(ChannelKind::PowerOutput, Direction::Bidir, ValueFormat::Raw),
        );
        let _ = reg.register(
            ChannelId(400),
            Record::new(ChannelKind::Logic, Direction::Input, ValueFormat::Bool),
        );
        reg
    }

    fn decode(frames: &[u8]) -> (u32, heapless::Vec<(u16, i32), 32>) {
        let mut parser = Parser::new();
        let mut timestamp = 0;
        let mut entries = heapless::Vec::new();
        for &byte in frames {
            if let Some(frame) = parser.push(byte, 0) {
                assert_eq!(frame.command, command::DATA);
                assert_eq!(frame.seq, SEQ_BROADCAST);
                timestamp = u32::from_le_bytes(frame.payload[0..4].try_into().unwrap());
                let count = u16::from_le_bytes(frame.payload[4..6].try_into().unwrap());
                for i in 0..usize::from(count) {
                    let at = 6 + i * 6;
                    let id = u16::from_le_bytes(frame.payload[at..at + 2].try_into().unwrap());
                    let value =
                        i32::from_le_bytes(frame.payload[at + 2..at + 6].try_into().unwrap());
                    entries.push((id, value)).unwrap();
                }
            }
        }
        (timestamp, entries)
    }

    #[test]
    fn masked_subset_streams_at_rate() {
        let mut reg = registry();
        reg.set_value(ChannelId(100), 1).unwrap();
        reg.set_value(ChannelId(400), 1).unwrap();
        reg.set_value(channel::BATTERY_VOLTAGE, 12_500).unwrap();

        let mut telemetry = Telemetry::new();
        let mut mask = StreamMask(0);
        mask.set_outputs(true);
        mask.set_voltages(true);
        telemetry.start(mask, 100, 0);

        let mut bytes = heapless::Vec::<u8, 512>::new();
        telemetry.tick(&reg, 0, &mut |frame| {
            bytes.extend_from_slice(frame).unwrap();
        });
        let (timestamp, entries) = decode(&bytes);
        assert_eq!(timestamp, 0);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&(100, 1)));
        assert!(entries.contains(&(1000, 12_500)));
        assert!(!entries.iter().any(|(id, _)| *id == 400), "mask excludes");

        // Not due again until the period elapses.
        let mut again = false;
        telemetry.tick(&reg, 5, &mut |_| again = true);
        assert!(!again);
        telemetry.tick(&reg, 10, &mut |_| again = true);
        assert!(again, "10 ms period at 100 Hz");
    }

    #[test]
    fn stop_halts_stream() {
        let reg = registry();
        let mut telemetry = Telemetry::new();
        let mut mask = StreamMask(0);
        mask.set_faults(true);
        telemetry.start(mask, 10, 0);
        telemetry.stop();
        let mut fired = false;
        telemetry.tick(&reg, 100, &mut |_| fired = true);
        assert!(!fired);
    }

    #[test]
    fn rate_clamps() {
        let mut telemetry = Telemetry::new();
        telemetry.start(StreamMask(0xFF), 0, 0);
        assert_eq!(telemetry.period_ms, 1000);
        telemetry.start(StreamMask(0xFF), 5000, 0);
        assert_eq!(telemetry.period_ms, 1);
    }
}
