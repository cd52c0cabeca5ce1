//! LIN codec: protected-ID framing, classic/enhanced checksums, a master
//! schedule table and slave response handling.
//!
//! The same two-level split as the CAN codec applies: frame objects own the
//! buffer and wire identity, input/output signals extract and pack bit
//! fields over them. The physical layer stays behind [`pmu_core::LinPort`]:
//! the port moves bytes and generates break/wake conditions, the codec owns
//! everything from the sync byte up.

use heapless::Vec;
use pmu_core::LinPort;

use crate::can::signal::{self, Layout, Scaling, TimeoutBehaviour};
use crate::channel::{ChannelId, Registry};

/// Maximum LIN frames per channel.
pub const FRAMES_MAX: usize = 16;
/// Maximum signals per direction.
pub const SIGNALS_MAX: usize = 32;
/// Maximum master schedule slots.
pub const SCHEDULE_MAX: usize = 16;
/// LIN sync byte, transmitted after every break.
pub const SYNC: u8 = 0x55;
/// Diagnostic master-request frame id.
pub const DIAG_MASTER_REQUEST: u8 = 0x3C;
/// Go-to-sleep command byte (first data byte of the 0x3C frame).
pub const SLEEP_COMMAND: u8 = 0x00;

/// Checksum variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChecksumMode {
    /// Data bytes only (LIN 1.x and diagnostic frames).
    Classic,
    /// Protected ID included in the sum (LIN 2.x).
    #[default]
    Enhanced,
}

/// Direction of a frame from this node's point of view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameDirection {
    /// Another node publishes; we read the response.
    #[default]
    Subscribe,
    /// We publish the response.
    Publish,
}

/// Node role on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Drives the schedule table and sends headers.
    #[default]
    Master,
    /// Responds only when addressed.
    Slave,
}

/// LIN wire or configuration errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinError {
    /// Sync byte was not `0x55`.
    Sync,
    /// Protected-ID parity mismatch.
    Parity,
    /// Response checksum mismatch.
    Checksum,
    /// Response did not complete in time.
    Timeout,
    /// A table is full.
    Full,
}

/// Compute the protected ID: the 6-bit frame id plus the two parity bits
/// `p0 = id0 ⊕ id1 ⊕ id2 ⊕ id4` (bit 6) and `p1 = ¬(id1 ⊕ id3 ⊕ id4 ⊕ id5)`
/// (bit 7).
pub fn protected_id(frame_id: u8) -> u8 {
    let id = frame_id & 0x3F;
    let bit = |n: u8| (id >> n) & 1;
    let p0 = bit(0) ^ bit(1) ^ bit(2) ^ bit(4);
    let p1 = (bit(1) ^ bit(3) ^ bit(4) ^ bit(5)) ^ 1;
    id | (p0 << 6) | (p1 << 7)
}

/// Validate a received protected ID; returns the frame id.
pub fn check_protected_id(pid: u8) -> Result<u8, LinError> {
    if protected_id(pid & 0x3F) == pid {
        Ok(pid & 0x3F)
    } else {
        Err(LinError::Parity)
    }
}

/// LIN checksum: byte sum with end-around carry, inverted. Enhanced mode
/// seeds the sum with the protected ID.
pub fn checksum(mode: ChecksumMode, pid: u8, data: &[u8]) -> u8 {
    let mut sum: u16 = match mode {
        ChecksumMode::Classic => 0,
        ChecksumMode::Enhanced => u16::from(pid),
    };
    for &byte in data {
        sum += u16::from(byte);
        if sum > 0xFF {
            sum -= 0xFF;
        }
    }
    !(sum as u8)
}

/// Static description of one LIN frame.
#[derive(Debug, Clone)]
pub struct LinFrameConfig {
    /// 6-bit frame identifier.
    pub frame_id: u8,
    /// Payload length, 1..=8.
    pub dlc: u8,
    /// Checksum variant.
    pub checksum: ChecksumMode,
    /// Publish or subscribe.
    pub direction: FrameDirection,
    /// Subscribe staleness window in milliseconds; 0 disables.
    pub timeout_ms: u32,
}

impl Default for LinFrameConfig {
    fn default() -> Self {
        Self {
            frame_id: 0,
            dlc: 8,
            checksum: ChecksumMode::Enhanced,
            direction: FrameDirection::Subscribe,
            timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LinFrame {
    config: LinFrameConfig,
    buffer: [u8; 8],
    last_rx_ms: u32,
    received: bool,
    timed_out: bool,
}

/// An input signal over a subscribed frame.
#[derive(Debug, Clone)]
pub struct LinInput {
    /// Index into the frame table.
    pub frame: usize,
    /// Bit layout within the 8-byte response.
    pub layout: Layout,
    /// Scaling into channel units.
    pub scaling: Scaling,
    /// Destination channel.
    pub target: ChannelId,
    /// Published on timeout with [`TimeoutBehaviour::UseDefault`].
    pub default_value: i32,
    /// Timeout policy.
    pub timeout_behaviour: TimeoutBehaviour,
}

/// An output signal over a published frame.
#[derive(Debug, Clone)]
pub struct LinOutput {
    /// Index into the frame table.
    pub frame: usize,
    /// Bit layout within the 8-byte response.
    pub layout: Layout,
    /// Scaling from channel units.
    pub scaling: Scaling,
    /// Channel supplying the value.
    pub source: ChannelId,
}

/// One slot of the master schedule table.
#[derive(Debug, Copy, Clone)]
pub struct ScheduleSlot {
    /// Frame id sent in this slot.
    pub frame_id: u8,
    /// Delay to the next slot in milliseconds.
    pub delay_ms: u32,
}

#[derive(Debug, Copy, Clone)]
enum RxPhase {
    Idle,
    Pid,
    Data {
        frame: usize,
        collected: u8,
        deadline_ms: u32,
    },
}

/// The LIN channel codec and scheduler.
pub struct LinChannel {
    role: Role,
    frames: Vec<LinFrame, FRAMES_MAX>,
    inputs: Vec<LinInput, SIGNALS_MAX>,
    input_timeouts: Vec<bool, SIGNALS_MAX>,
    outputs: Vec<LinOutput, SIGNALS_MAX>,
    schedule: Vec<ScheduleSlot, SCHEDULE_MAX>,
    slot: usize,
    next_slot_ms: u32,
    phase: RxPhase,
    sleeping: bool,
}

impl LinChannel {
    /// An empty channel in the given role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            frames: Vec::new(),
            inputs: Vec::new(),
            input_timeouts: Vec::new(),
            outputs: Vec::new(),
            schedule: Vec::new(),
            slot: 0,
            next_slot_ms: 0,
            phase: RxPhase::Idle,
            sleeping: false,
        }
    }

    /// Register a frame; returns its table index.
    pub fn add_frame(&mut self, config: LinFrameConfig) -> Result<usize, LinError> {
        let index = self.frames.len();
        self.frames
            .push(LinFrame {
                config,
                buffer: [0; 8],
                last_rx_ms: 0,
                received: false,
                timed_out: false,
            })
            .map_err(|_| LinError::Full)?;
        Ok(index)
    }

    /// Register an input signal.
    pub fn add_input(&mut self, input: LinInput) -> Result<(), LinError> {
        self.inputs.push(input).map_err(|_| LinError::Full)?;
        self.input_timeouts.push(false).map_err(|_| LinError::Full)
    }

    /// Register an output signal.
    pub fn add_output(&mut self, output: LinOutput) -> Result<(), LinError> {
        self.outputs.push(output).map_err(|_| LinError::Full)
    }

    /// Append a master schedule slot.
    pub fn add_schedule_slot(&mut self, slot: ScheduleSlot) -> Result<(), LinError> {
        self.schedule.push(slot).map_err(|_| LinError::Full)
    }

    /// Drop all frames, signals and schedule entries.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.inputs.clear();
        self.input_timeouts.clear();
        self.outputs.clear();
        self.schedule.clear();
        self.slot = 0;
        self.phase = RxPhase::Idle;
        self.sleeping = false;
    }

    /// `true` after a go-to-sleep command was sent or received.
    pub fn sleeping(&self) -> bool {
        self.sleeping
    }

    /// Received buffer of a frame, for diagnostics.
    pub fn frame_buffer(&self, index: usize) -> Option<&[u8]> {
        self.frames.get(index).map(|f| &f.buffer[..])
    }

    fn frame_by_id(&self, frame_id: u8) -> Option<usize> {
        self.frames
            .iter()
            .position(|f| f.config.frame_id == frame_id & 0x3F)
    }

    fn pack_response<const CAP: usize>(&mut self, frame_idx: usize, registry: &Registry<CAP>) {
        // Split borrows: outputs are read while the frame buffer is written.
        let (frames, outputs) = (&mut self.frames, &self.outputs);
        let frame = &mut frames[frame_idx];
        for output in outputs.iter().filter(|o| o.frame == frame_idx) {
            let value = registry.get_value(output.source);
            signal::encode_field(output.layout, output.scaling, 0, value, &mut frame.buffer);
        }
    }

    fn publish_inputs<const CAP: usize>(&mut self, frame_idx: usize, registry: &mut Registry<CAP>) {
        let frame_buffer = self.frames[frame_idx].buffer;
        for (input, timed_out) in self
            .inputs
            .iter()
            .zip(self.input_timeouts.iter_mut())
            .filter(|(s, _)| s.frame == frame_idx)
        {
            if *timed_out {
                *timed_out = false;
                let _ = registry.set_fault(input.target, false);
            }
            let value = signal::decode_field(input.layout, input.scaling, 0, &frame_buffer);
            let _ = registry.set_value(input.target, value);
        }
    }

    /// Subscribe staleness pass, mirroring the CAN timeout policy.
    pub fn run_timeouts<const CAP: usize>(&mut self, now_ms: u32, registry: &mut Registry<CAP>) {
        for frame in self.frames.iter_mut() {
            if frame.config.timeout_ms == 0
                || frame.config.direction != FrameDirection::Subscribe
                || !frame.received
            {
                continue;
            }
            if now_ms.wrapping_sub(frame.last_rx_ms) >= frame.config.timeout_ms {
                frame.timed_out = true;
            }
        }
        let frames = &self.frames;
        for (signal, timed_out) in self.inputs.iter().zip(self.input_timeouts.iter_mut()) {
            let Some(frame) = frames.get(signal.frame) else {
                continue;
            };
            if frame.timed_out && !*timed_out {
                *timed_out = true;
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

    /// Master pass: walk the schedule, send headers and publish/collect
    /// responses.
    pub fn tick_master<P: LinPort, const CAP: usize>(
        &mut self,
        port: &mut P,
        registry: &mut Registry<CAP>,
        now_ms: u32,
    ) -> Result<(), P::Error> {
        if self.role != Role::Master || self.schedule.is_empty() || self.sleeping {
            return Ok(());
        }

        // Finish collecting an outstanding subscribe response first.
        if let RxPhase::Data {
            frame,
            mut collected,
            deadline_ms,
        } = self.phase
        {
            loop {
                match port.read() {
                    Ok(byte) => {
                        let object = &mut self.frames[frame];
                        let dlc = usize::from(object.config.dlc.clamp(1, 8));
                        if usize::from(collected) < dlc {
                            object.buffer[usize::from(collected)] = byte;
                            collected += 1;
                            self.phase = RxPhase::Data {
                                frame,
                                collected,
                                deadline_ms,
                            };
                        } else {
                            // Checksum byte closes the response.
                            let pid = protected_id(object.config.frame_id);
                            let expected =
                                checksum(object.config.checksum, pid, &object.buffer[..dlc]);
                            if byte == expected {
                                object.received = true;
                                object.timed_out = false;
                                object.last_rx_ms = now_ms;
                                self.phase = RxPhase::Idle;
                                self.publish_inputs(frame, registry);
                            } else {
                                self.phase = RxPhase::Idle;
                            }
                            break;
                        }
                    }
                    Err(nb::Error::WouldBlock) => break,
                    Err(nb::Error::Other(e)) => return Err(e),
                }
            }
            if let RxPhase::Data { deadline_ms, .. } = self.phase {
                if now_ms.wrapping_sub(deadline_ms) < i32::MAX as u32 {
                    // Response never completed.
                    self.phase = RxPhase::Idle;
                }
            }
        }

        if !matches!(self.phase, RxPhase::Idle) {
            return Ok(());
        }
        if now_ms.wrapping_sub(self.next_slot_ms) >= i32::MAX as u32 {
            return Ok(());
        }

        let slot = self.schedule[self.slot];
        self.slot = (self.slot + 1) % self.schedule.len();
        self.next_slot_ms = now_ms.wrapping_add(slot.delay_ms.max(1));

        let Some(frame_idx) = self.frame_by_id(slot.frame_id) else {
            return Ok(());
        };
        let pid = protected_id(slot.frame_id);
        port.send_break()?;
        port.write(&[SYNC, pid])?;

        let direction = self.frames[frame_idx].config.direction;
        match direction {
            FrameDirection::Publish => {
                self.pack_response(frame_idx, registry);
                let object = &self.frames[frame_idx];
                let dlc = usize::from(object.config.dlc.clamp(1, 8));
                let sum = checksum(object.config.checksum, pid, &object.buffer[..dlc]);
                port.write(&object.buffer[..dlc])?;
                port.write(&[sum])?;
            }
            FrameDirection::Subscribe => {
                self.phase = RxPhase::Data {
                    frame: frame_idx,
                    collected: 0,
                    deadline_ms: now_ms.wrapping_add(50),
                };
            }
        }
        Ok(())
    }

    /// Slave pass: parse incoming headers and answer publish frames.
    pub fn tick_slave<P: LinPort, const CAP: usize>(
        &mut self,
        port: &mut P,
        registry: &mut Registry<CAP>,
        now_ms: u32,
    ) -> Result<(), P::Error> {
        if self.role != Role::Slave {
            return Ok(());
        }
        loop {
            let byte = match port.read() {
                Ok(byte) => byte,
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
            };
            match self.phase {
                RxPhase::Idle => {
                    if byte == SYNC {
                        self.phase = RxPhase::Pid;
                    }
                }
                RxPhase::Pid => {
                    self.phase = RxPhase::Idle;
                    let Ok(frame_id) = check_protected_id(byte) else {
                        continue;
                    };
                    self.sleeping = false;
                    let Some(frame_idx) = self.frame_by_id(frame_id) else {
                        continue;
                    };
                    match self.frames[frame_idx].config.direction {
                        FrameDirection::Publish => {
                            self.pack_response(frame_idx, registry);
                            let object = &self.frames[frame_idx];
                            let dlc = usize::from(object.config.dlc.clamp(1, 8));
                            let sum = checksum(object.config.checksum, byte, &object.buffer[..dlc]);
                            let buffer = object.buffer;
                            port.write(&buffer[..dlc])?;
                            port.write(&[sum])?;
                        }
                        FrameDirection::Subscribe => {
                            self.phase = RxPhase::Data {
                                frame: frame_idx,
                                collected: 0,
                                deadline_ms: now_ms.wrapping_add(50),
                            };
                        }
                    }
                }
                RxPhase::Data {
                    frame,
                    collected,
                    deadline_ms,
                } => {
                    let object = &mut self.frames[frame];
                    let dlc = usize::from(object.config.dlc.clamp(1, 8));
                    if usize::from(collected) < dlc {
                        object.buffer[usize::from(collected)] = byte;
                        self.phase = RxPhase::Data {
                            frame,
                            collected: collected + 1,
                            deadline_ms,
                        };
                    } else {
                        let pid = protected_id(object.config.frame_id);
                        let expected = checksum(object.config.checksum, pid, &object.buffer[..dlc]);
                        self.phase = RxPhase::Idle;
                        if byte == expected {
                            object.received = true;
                            object.timed_out = false;
                            object.last_rx_ms = now_ms;
                            // Sleep command on the diagnostic frame.
                            if object.config.frame_id == DIAG_MASTER_REQUEST & 0x3F
                                && object.buffer[0] == SLEEP_COMMAND
                            {
                                self.sleeping = true;
                            }
                            self.publish_inputs(frame, registry);
                        }
                    }
                }
            }
        }
    }

    /// Master: send the go-to-sleep command and stop the schedule.
    pub fn send_sleep<P: LinPort>(&mut self, port: &mut P) -> Result<(), P::Error> {
        let pid = protected_id(DIAG_MASTER_REQUEST);
        let data = [SLEEP_COMMAND, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let sum = checksum(ChecksumMode::Classic, pid, &data);
        port.send_break()?;
        port.write(&[SYNC, pid])?;
        port.write(&data)?;
        port.write(&[sum])?;
        self.sleeping = true;
        Ok(())
    }

    /// Issue a wake-up pulse (≥ 150 µs dominant) and resume the schedule.
    pub fn wake<P: LinPort>(&mut self, port: &mut P) -> Result<(), P::Error> {
        port.send_wakeup()?;
        self.sleeping = false;
        Ok(())
    }
}
