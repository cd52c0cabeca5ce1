//! CAN codec: the two-level frame/signal model.
//!
//! Level-1 [`FrameObject`]s own wire identity and buffer lifetime; Level-2
//! signal channels ([`RxSignal`], [`TxSignal`]) extract and pack bit fields
//! over those buffers with scaling and timeout policy. Frame objects live in
//! a generation-counted arena: signal channels hold `(slot, generation)`
//! references resolved once at configuration link time, so clearing the
//! frame table safely invalidates every outstanding reference instead of
//! leaving dangling pointers around.
//!
//! Table sizes are chosen by the integrator through the [`Capacities`]
//! trait, mirroring how message RAM capacities are selected in `mcan`.

pub mod frame;
pub mod j1939;
pub mod signal;

pub use frame::{
    dlc_to_len, len_to_dlc, FrameConfig, FrameObject, FrameRef, FrameSlot, MessageType,
    TxSchedule,
};
pub use signal::{ByteOrder, DataType, RxSignal, Scaling, TimeoutBehaviour, TxSignal};

use embedded_can::Id;
use generic_array::{ArrayLength, GenericArray};
use pmu_core::CanTx;

use crate::block::flipflop;
use crate::channel::Registry;

/// Table capacities of the codec storage.
///
/// ```
/// use pmu::generic_array::typenum::consts::*;
/// struct Capacities;
/// impl pmu::can::Capacities for Capacities {
///     type Frames = U32;
///     type RxSignals = U100;
///     type TxSignals = U100;
/// }
/// ```
pub trait Capacities {
    /// Maximum number of frame objects.
    type Frames: ArrayLength<FrameSlot>;
    /// Maximum number of RX signal channels.
    type RxSignals: ArrayLength<RxSignal>;
    /// Maximum number of TX signal channels.
    type TxSignals: ArrayLength<TxSignal>;
}

/// One hardware frame recorded by a CAN RX interrupt.
///
/// ISRs only enqueue these into an [`RxQueue`]; the main loop drains the
/// queue into [`Codec::handle_rx`]. The codec itself is never called from
/// interrupt context.
#[derive(Debug, Clone)]
pub struct RxEvent {
    /// Bus the frame arrived on.
    pub bus: u8,
    /// Wire identifier.
    pub id: Id,
    /// Payload length in bytes.
    pub len: u8,
    /// Payload bytes.
    pub data: [u8; frame::FRAME_BUF],
}

/// Queue between the CAN RX interrupts and the main loop.
pub type RxQueue = heapless::spsc::Queue<RxEvent, 16>;

/// Codec configuration failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The frame table is full.
    FramesFull,
    /// The signal table is full.
    SignalsFull,
    /// A frame with this key already exists.
    DuplicateKey,
    /// No frame with this key.
    UnknownKey,
    /// The referenced frame is gone (stale generation).
    StaleRef,
}

/// The two-level CAN codec.
pub struct Codec<C: Capacities> {
    frames: GenericArray<FrameSlot, C::Frames>,
    rx_signals: GenericArray<RxSignal, C::RxSignals>,
    rx_len: usize,
    tx_signals: GenericArray<TxSignal, C::TxSignals>,
    tx_len: usize,
}

impl<C: Capacities> Default for Codec<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Capacities> Codec<C> {
    /// An empty codec.
    pub fn new() -> Self {
        Self {
            frames: GenericArray::default(),
            rx_signals: GenericArray::default(),
            rx_len: 0,
            tx_signals: GenericArray::default(),
            tx_len: 0,
        }
    }

    /// Create a frame object; returns its arena reference.
    pub fn add_frame(&mut self, config: FrameConfig) -> Result<FrameRef, CodecError> {
        if !config.key.is_empty() && self.frame_by_key(config.key.as_str()).is_some() {
            return Err(CodecError::DuplicateKey);
        }
        let slot_idx = self
            .frames
            .iter()
            .position(|s| s.frame.is_none())
            .ok_or(CodecError::FramesFull)?;
        let slot = &mut self.frames[slot_idx];
        slot.generation = slot.generation.wrapping_add(1);
        slot.frame = Some(FrameObject::new(config));
        Ok(FrameRef {
            slot: slot_idx as u16,
            generation: slot.generation,
        })
    }

    /// Resolve a string key to the frame's arena reference.
    pub fn frame_by_key(&self, key: &str) -> Option<FrameRef> {
        self.frames.iter().enumerate().find_map(|(idx, slot)| {
            let frame = slot.frame.as_ref()?;
            (frame.config.key.as_str() == key).then_some(FrameRef {
                slot: idx as u16,
                generation: slot.generation,
            })
        })
    }

    /// Access the frame behind a reference; `None` once the table was
    /// cleared.
    pub fn resolve(&self, frame: FrameRef) -> Option<&FrameObject> {
        let slot = self.frames.get(usize::from(frame.slot))?;
        if slot.generation != frame.generation {
            return None;
        }
        slot.frame.as_ref()
    }

    /// Register an RX signal channel.
    pub fn add_rx_signal(&mut self, signal: RxSignal) -> Result<(), CodecError> {
        self.resolve(signal.frame).ok_or(CodecError::StaleRef)?;
        if self.rx_len >= self.rx_signals.len() {
            return Err(CodecError::SignalsFull);
        }
        self.rx_signals[self.rx_len] = signal;
        self.rx_len += 1;
        Ok(())
    }

    /// Register a TX signal channel.
    pub fn add_tx_signal(&mut self, signal: TxSignal) -> Result<(), CodecError> {
        self.resolve(signal.frame).ok_or(CodecError::StaleRef)?;
        if self.tx_len >= self.tx_signals.len() {
            return Err(CodecError::SignalsFull);
        }
        self.tx_signals[self.tx_len] = signal;
        self.tx_len += 1;
        Ok(())
    }

    /// Registered RX signal channels.
    pub fn rx_signals(&self) -> &[RxSignal] {
        &self.rx_signals[..self.rx_len]
    }

    /// Registered TX signal channels.
    pub fn tx_signals(&self) -> &[TxSignal] {
        &self.tx_signals[..self.tx_len]
    }

    /// Drop every frame and signal. Generation counters advance so stale
    /// [`FrameRef`]s held elsewhere stop resolving.
    pub fn clear(&mut self) {
        for slot in self.frames.iter_mut() {
            if slot.frame.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.rx_len = 0;
        self.tx_len = 0;
    }

    /// Feed one received hardware frame into the codec.
    ///
    /// Returns `true` when a frame object matched.
    pub fn handle_rx(&mut self, bus: u8, id: Id, data: &[u8], now_ms: u32) -> bool {
        let mut matched = false;
        for slot in self.frames.iter_mut() {
            let Some(frame) = slot.frame.as_mut() else {
                continue;
            };
            if frame.config.tx.is_none() && frame.matches(bus, id) {
                frame.accept(data, now_ms);
                matched = true;
            }
        }
        matched
    }

    /// Periodic staleness pass (run at ≥ 100 Hz): flags timed-out frames and
    /// fires each referencing signal's timeout action exactly once per
    /// timeout.
    pub fn run_timeouts<const CAP: usize>(&mut self, now_ms: u32, registry: &mut Registry<CAP>) {
        for slot in self.frames.iter_mut() {
            let Some(frame) = slot.frame.as_mut() else {
                continue;
            };
            if frame.config.timeout_ms == 0 || frame.config.tx.is_some() || !frame.received {
                continue;
            }
            if now_ms.wrapping_sub(frame.last_rx_ms) >= frame.config.timeout_ms {
                frame.timed_out = true;
            }
        }
        let frames = &self.frames;
        for signal in self.rx_signals[..self.rx_len].iter_mut() {
            let Some(slot) = frames.get(usize::from(signal.frame.slot)) else {
                continue;
            };
            if slot.generation != signal.frame.generation {
                continue;
            }
            let Some(frame) = slot.frame.as_ref() else {
                continue;
            };
            if frame.timed_out && !signal.timed_out {
                signal.timed_out = true;
                match signal.timeout_behaviour {
                    TimeoutBehaviour::UseDefault => {
                        let _ = registry.set_value(signal.target, signal.default_value);
                    }
                    TimeoutBehaviour::HoldLast => {}
                    TimeoutBehaviour::Zero => {
                        let _ = registry.set_value(signal.target, 0);
                    }
                }
                let _ = registry.set_fault(signal.target, true);
            }
        }
    }

    /// Walk the RX signal channels and publish fresh values.
    pub fn process_inputs<const CAP: usize>(&mut self, registry: &mut Registry<CAP>) {
        let frames = &self.frames;
        for signal in self.rx_signals[..self.rx_len].iter_mut() {
            let Some(slot) = frames.get(usize::from(signal.frame.slot)) else {
                continue;
            };
            if slot.generation != signal.frame.generation {
                continue;
            }
            let Some(frame) = slot.frame.as_ref() else {
                continue;
            };
            if !frame.received || frame.timed_out {
                continue;
            }
            if signal.timed_out {
                signal.timed_out = false;
                let _ = registry.set_fault(signal.target, false);
            }
            let value = signal.decode(&frame.buffer);
            let _ = registry.set_value(signal.target, value);
        }
    }

    /// Pack and transmit due TX frames.
    pub fn tick_tx<const CAP: usize>(
        &mut self,
        now_ms: u32,
        registry: &Registry<CAP>,
        can: &mut impl CanTx,
    ) {
        for (slot_idx, slot) in self.frames.iter_mut().enumerate() {
            let Some(frame) = slot.frame.as_mut() else {
                continue;
            };
            let Some(schedule) = frame.config.tx.clone() else {
                continue;
            };
            let mut due = false;
            if schedule.cycle_ms > 0 && now_ms.wrapping_sub(frame.next_tx_ms) < i32::MAX as u32 {
                due = true;
            }
            if !schedule.trigger.is_unbound() {
                let level = registry.get_value(schedule.trigger);
                if flipflop::rising_edge(&mut frame.trigger_prev, level) {
                    due = true;
                }
            }
            if !due {
                continue;
            }

            // Pack every signal sourced from the registry into the buffer.
            for signal in self.tx_signals[..self.tx_len].iter() {
                if usize::from(signal.frame.slot) != slot_idx
                    || signal.frame.generation != slot.generation
                {
                    continue;
                }
                let value = registry.get_value(signal.source);
                signal.encode(value, &mut frame.buffer);
            }

            let Some(id) = frame.config.id else {
                continue;
            };
            let len = dlc_to_len(frame.config.dlc).min(frame::FRAME_BUF);
            match can.transmit(frame.config.bus, id, &frame.buffer[..len]) {
                Ok(()) => {
                    if schedule.cycle_ms > 0 {
                        frame.next_tx_ms = now_ms.wrapping_add(schedule.cycle_ms);
                    }
                }
                // Mailboxes full: leave the frame due and retry next tick.
                Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(_)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelId, ChannelKind, Direction, Record, ValueFormat};
    use embedded_can::StandardId;
    use generic_array::typenum::consts::*;
    use signal::Layout;

    struct TestCaps;
    impl Capacities for TestCaps {
        type Frames = U8;
        type RxSignals = U16;
        type TxSignals = U16;
    }

    struct TxLog {
        sent: heapless::Vec<(u8, u32, heapless::Vec<u8, 8>), 16>,
        block: bool,
    }

    impl TxLog {
        fn new() -> Self {
            Self {
                sent: heapless::Vec::new(),
                block: false,
            }
        }
    }

    impl CanTx for TxLog {
        type Error = ();
        fn transmit(&mut self, bus: u8, id: Id, data: &[u8]) -> nb::Result<(), ()> {
            if self.block {
                return Err(nb::Error::WouldBlock);
            }
            let raw = match id {
                Id::Standard(id) => u32::from(id.as_raw()),
                Id::Extended(id) => id.as_raw(),
            };
            let mut payload = heapless::Vec::new();
            payload.extend_from_slice(&data[..data.len().min(8)]).unwrap();
            self.sent.push((bus, raw, payload)).unwrap();
            Ok(())
        }
    }

    fn std_id(raw: u16) -> Id {
        Id::Standard(StandardId::new(raw).unwrap())
    }

    fn registry() -> Registry<64> {
        let mut reg = Registry::new();
        for id in 200..=203u16 {
            let _ = reg.register(
                ChannelId(id),
                Record::new(ChannelKind::CanRxSignal, Direction::Input, ValueFormat::Raw),
            );
        }
        for id in 300..=301u16 {
            let _ = reg.register(
                ChannelId(id),
                Record::new(ChannelKind::CanTxSignal, Direction::Output, ValueFormat::Raw),
            );
        }
        let _ = reg.register(
            ChannelId(400),
            Record::new(ChannelKind::Logic, Direction::Input, ValueFormat::Bool),
        );
        reg
    }

    fn rx_frame(codec: &mut Codec<TestCaps>, key: &str, raw_id: u16, timeout_ms: u32) -> FrameRef {
        codec
            .add_frame(FrameConfig {
                key: frame::truncate_key(key),
                bus: 0,
                id: Some(std_id(raw_id)),
                dlc: 8,
                timeout_ms,
                ..FrameConfig::default()
            })
            .unwrap()
    }

    fn u16_signal(frame: FrameRef, byte_offset: u8, target: u16) -> RxSignal {
        RxSignal {
            frame,
            layout: Layout {
                byte_offset,
                start_bit: 0,
                bit_length: 16,
                ..Layout::default()
            },
            target: ChannelId(target),
            ..RxSignal::default()
        }
    }

    #[test]
    fn rx_to_registry() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let mut reg = registry();
        let frame = rx_frame(&mut codec, "status", 0x123, 0);
        codec.add_rx_signal(u16_signal(frame, 0, 200)).unwrap();
        assert!(codec.handle_rx(0, std_id(0x123), &[0x34, 0x12, 0, 0, 0, 0, 0, 0], 5));
        codec.process_inputs(&mut reg);
        assert_eq!(reg.get_value(ChannelId(200)), 0x1234);
        // Unknown id does not match.
        assert!(!codec.handle_rx(0, std_id(0x124), &[0; 8], 6));
        assert!(!codec.handle_rx(1, std_id(0x123), &[0; 8], 6));
    }

    #[test]
    fn key_resolution_and_duplicates() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let frame = rx_frame(&mut codec, "engine", 0x100, 0);
        assert_eq!(codec.frame_by_key("engine"), Some(frame));
        assert_eq!(codec.frame_by_key("missing"), None);
        let dup = codec.add_frame(FrameConfig {
            key: frame::truncate_key("engine"),
            id: Some(std_id(0x101)),
            ..FrameConfig::default()
        });
        assert_eq!(dup.unwrap_err(), CodecError::DuplicateKey);
    }

    #[test]
    fn clear_invalidates_refs() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let frame = rx_frame(&mut codec, "f", 0x100, 0);
        assert!(codec.resolve(frame).is_some());
        codec.clear();
        assert!(codec.resolve(frame).is_none(), "stale generation");
        // A new frame reusing the slot gets a fresh generation.
        let fresh = rx_frame(&mut codec, "f", 0x100, 0);
        assert!(codec.resolve(frame).is_none());
        assert!(codec.resolve(fresh).is_some());
        assert_eq!(
            codec.add_rx_signal(u16_signal(frame, 0, 200)).unwrap_err(),
            CodecError::StaleRef
        );
    }

    #[test]
    fn timeout_use_default_fires_once() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let mut reg = registry();
        let frame = rx_frame(&mut codec, "f", 0x123, 100);
        let mut signal = u16_signal(frame, 0, 200);
        signal.default_value = 0xFFFF;
        signal.timeout_behaviour = TimeoutBehaviour::UseDefault;
        codec.add_rx_signal(signal).unwrap();

        codec.handle_rx(0, std_id(0x123), &[0x01, 0x00, 0, 0, 0, 0, 0, 0], 0);
        codec.process_inputs(&mut reg);
        assert_eq!(reg.get_value(ChannelId(200)), 1);

        // No further frames: at t=100 the default is published.
        codec.run_timeouts(99, &mut reg);
        assert_eq!(reg.get_value(ChannelId(200)), 1);
        codec.run_timeouts(100, &mut reg);
        assert_eq!(reg.get_value(ChannelId(200)), 0xFFFF);
        assert!(reg.get_info(ChannelId(200)).unwrap().flags.fault());

        // The action fired exactly once: overwrite and re-check.
        reg.set_value(ChannelId(200), 42).unwrap();
        codec.run_timeouts(200, &mut reg);
        assert_eq!(reg.get_value(ChannelId(200)), 42);

        // Reception clears the timeout and the fault flag.
        codec.handle_rx(0, std_id(0x123), &[0x05, 0x00, 0, 0, 0, 0, 0, 0], 250);
        codec.process_inputs(&mut reg);
        assert_eq!(reg.get_value(ChannelId(200)), 5);
        assert!(!reg.get_info(ChannelId(200)).unwrap().flags.fault());
    }

    #[test]
    fn timeout_zero_and_hold_last() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let mut reg = registry();
        let frame = rx_frame(&mut codec, "f", 0x123, 50);
        let mut zero = u16_signal(frame, 0, 201);
        zero.timeout_behaviour = TimeoutBehaviour::Zero;
        codec.add_rx_signal(zero).unwrap();
        let mut hold = u16_signal(frame, 2, 202);
        hold.timeout_behaviour = TimeoutBehaviour::HoldLast;
        codec.add_rx_signal(hold).unwrap();

        codec.handle_rx(0, std_id(0x123), &[7, 0, 9, 0, 0, 0, 0, 0], 0);
        codec.process_inputs(&mut reg);
        assert_eq!(reg.get_value(ChannelId(201)), 7);
        assert_eq!(reg.get_value(ChannelId(202)), 9);

        codec.run_timeouts(60, &mut reg);
        assert_eq!(reg.get_value(ChannelId(201)), 0, "zero behaviour");
        assert_eq!(reg.get_value(ChannelId(202)), 9, "hold-last behaviour");
        assert!(reg.get_info(ChannelId(202)).unwrap().flags.fault());

        // While timed out, stale data is not re-published.
        codec.process_inputs(&mut reg);
        assert_eq!(reg.get_value(ChannelId(201)), 0);
    }

    #[test]
    fn cyclic_tx_packs_from_registry() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let mut reg = registry();
        let frame = codec
            .add_frame(FrameConfig {
                key: frame::truncate_key("cmd"),
                bus: 1,
                id: Some(std_id(0x321)),
                dlc: 8,
                tx: Some(TxSchedule {
                    cycle_ms: 100,
                    trigger: crate::channel::UNBOUND,
                }),
                ..FrameConfig::default()
            })
            .unwrap();
        codec
            .add_tx_signal(TxSignal {
                frame,
                layout: Layout {
                    byte_offset: 0,
                    start_bit: 0,
                    bit_length: 16,
                    ..Layout::default()
                },
                source: ChannelId(300),
                ..TxSignal::default()
            })
            .unwrap();
        reg.set_value(ChannelId(300), 0x0ABC).unwrap();

        let mut can = TxLog::new();
        codec.tick_tx(0, &reg, &mut can);
        assert_eq!(can.sent.len(), 1);
        let (bus, id, payload) = &can.sent[0];
        assert_eq!((*bus, *id), (1, 0x321));
        assert_eq!(&payload[..2], &[0xBC, 0x0A]);

        // Not due again until the cycle elapses.
        codec.tick_tx(50, &reg, &mut can);
        assert_eq!(can.sent.len(), 1);
        codec.tick_tx(100, &reg, &mut can);
        assert_eq!(can.sent.len(), 2);
    }

    #[test]
    fn would_block_retries_next_tick() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let reg = registry();
        codec
            .add_frame(FrameConfig {
                key: frame::truncate_key("cmd"),
                id: Some(std_id(0x321)),
                dlc: 8,
                tx: Some(TxSchedule {
                    cycle_ms: 100,
                    trigger: crate::channel::UNBOUND,
                }),
                ..FrameConfig::default()
            })
            .unwrap();
        let mut can = TxLog::new();
        can.block = true;
        codec.tick_tx(0, &reg, &mut can);
        assert!(can.sent.is_empty());
        can.block = false;
        codec.tick_tx(1, &reg, &mut can);
        assert_eq!(can.sent.len(), 1);
    }

    #[test]
    fn triggered_tx_on_rising_edge() {
        let mut codec: Codec<TestCaps> = Codec::new();
        let mut reg = registry();
        codec
            .add_frame(FrameConfig {
                key: frame::truncate_key("evt"),
                id: Some(std_id(0x50)),
                dlc: 2,
                tx: Some(TxSchedule {
                    cycle_ms: 0,
                    trigger: ChannelId(400),
                }),
                ..FrameConfig::default()
            })
            .unwrap();
        let mut can = TxLog::new();
        codec.tick_tx(0, &reg, &mut can);
        assert!(can.sent.is_empty());
        reg.set_value(ChannelId(400), 1).unwrap();
        codec.tick_tx(1, &reg, &mut can);
        assert_eq!(can.sent.len(), 1);
        // Held high: no retransmit.
        codec.tick_tx(2, &reg, &mut can);
        assert_eq!(can.sent.len(), 1);
        reg.set_value(ChannelId(400), 0).unwrap();
        codec.tick_tx(3, &reg, &mut can);
        reg.set_value(ChannelId(400), 1).unwrap();
        codec.tick_tx(4, &reg, &mut can);
        assert_eq!(can.sent.len(), 2);
    }
}
