//! Binary v3 configuration image: parsing and application.
//!
//! The image is the only configuration form the core consumes (text/JSON
//! schemas are a host-tool concern):
//!
//! ```text
//! header:  magic "PMUC" | version u16 le (=3) | record_count u16 le
//! records: { record_type u8 | length u16 le | payload } x record_count
//! trailer: crc32 le over header + records
//! ```
//!
//! [`apply`] is idempotent: it clears every target subsystem before
//! loading, so applying the same bytes twice yields an identical channel
//! set and identical values after one tick from the same inputs. String
//! frame keys are resolved to arena references here, at link time; nothing
//! downstream ever sees a string reference again.

use embedded_can::{ExtendedId, Id, StandardId};
use fugit::RateExtU32;

use crate::acquire::{
    AdcBank, AdcInput, DigitalBank, DigitalInput, FrequencyConfig, LinearConfig, RotaryConfig,
    SwitchConfig as AdcSwitchConfig,
};
use crate::block::filter::DebounceConfig;
use crate::block::hysteresis::{self, Level, MultiLevel};
use crate::block::table::{Table2d, Table3d};
use crate::block::{counter, logic, math, pid, timer};
use crate::can::signal::{ByteOrder, DataType, Layout, Scaling, TimeoutBehaviour};
use crate::can::{self, frame, Codec, FrameConfig, MessageType, TxSchedule};
use crate::channel::{ChannelId, ChannelKind, Direction, Record, Registry, ValueFormat};
use crate::executor::{BlockConfig, Executor, FilterKind, FlipFlopKind, Inputs, SwitchConfig};
use crate::lin::{
    ChecksumMode, FrameDirection, LinChannel, LinFrameConfig, LinInput, LinOutput,
};
use crate::output::hbridge::{
    BridgeMode, FailsafeAction, HBridgeBank, HBridgeConfig, PwmSource, BRIDGE_BASE,
};
use crate::output::highside::{OutputBank, OutputConfig, PwmConfig, OUTPUT_BASE};
use crate::can::j1939::{Keypad, KeypadConfig, BUTTONS_MAX};
use crate::crc::crc32;

/// ASCII `"PMUC"`: configuration image magic.
pub const MAGIC: u32 = 0x4355_4D50;
/// Supported schema version.
pub const VERSION: u16 = 3;

/// Record type tags.
#[allow(missing_docs)]
pub mod record {
    pub const CAN_FRAME: u8 = 0x01;
    pub const CAN_RX_SIGNAL: u8 = 0x02;
    pub const CAN_TX_SIGNAL: u8 = 0x03;
    pub const LOGIC: u8 = 0x10;
    pub const MATH: u8 = 0x11;
    pub const TABLE_2D: u8 = 0x12;
    pub const TABLE_3D: u8 = 0x13;
    pub const SWITCH: u8 = 0x14;
    pub const COUNTER: u8 = 0x15;
    pub const TIMER: u8 = 0x16;
    pub const FILTER: u8 = 0x17;
    pub const FLIP_FLOP: u8 = 0x18;
    pub const HYSTERESIS: u8 = 0x19;
    pub const PID: u8 = 0x1A;
    pub const OUTPUT: u8 = 0x20;
    pub const HBRIDGE: u8 = 0x21;
    pub const ADC_INPUT: u8 = 0x30;
    pub const DIGITAL_INPUT: u8 = 0x31;
    pub const LIN_FRAME: u8 = 0x40;
    pub const LIN_SIGNAL: u8 = 0x41;
    pub const OUTPUT_LINK: u8 = 0x50;
    pub const KEYPAD: u8 = 0x60;
}

/// Configuration failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Image shorter than its structure claims.
    Truncated,
    /// Header magic mismatch.
    BadMagic,
    /// Unsupported schema version.
    BadVersion,
    /// Trailing CRC mismatch.
    BadCrc,
    /// Unknown record type.
    UnknownRecord,
    /// A record payload failed validation.
    BadRecord,
    /// A table ran out of capacity.
    Capacity,
}

/// Every subsystem a configuration image populates.
pub struct Targets<'a, C: can::Capacities, const CAP: usize> {
    /// Channel registry; cleared and re-seeded with the system channels.
    pub registry: &'a mut Registry<CAP>,
    /// Block executor.
    pub executor: &'a mut Executor,
    /// ADC bank.
    pub adc: &'a mut AdcBank,
    /// Digital input bank.
    pub digital: &'a mut DigitalBank,
    /// High-side outputs.
    pub outputs: &'a mut OutputBank,
    /// H-bridges.
    pub bridges: &'a mut HBridgeBank,
    /// CAN codec.
    pub codec: &'a mut Codec<C>,
    /// LIN channel.
    pub lin: &'a mut LinChannel,
    /// J1939 keypad, if configured.
    pub keypad: &'a mut Option<Keypad>,
}

/// Little-endian payload reader.
struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    fn u8(&mut self) -> Result<u8, ConfigError> {
        let value = *self.bytes.get(self.at).ok_or(ConfigError::Truncated)?;
        self.at += 1;
        Ok(value)
    }

    fn u16(&mut self) -> Result<u16, ConfigError> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, ConfigError> {
        Ok(u32::from_le_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn i32(&mut self) -> Result<i32, ConfigError> {
        self.u32().map(|v| v as i32)
    }

    fn channel(&mut self) -> Result<ChannelId, ConfigError> {
        self.u16().map(ChannelId)
    }

    fn key(&mut self) -> Result<heapless::String<{ frame::KEY_LEN }>, ConfigError> {
        let len = usize::from(self.u8()?);
        if len > frame::KEY_LEN {
            return Err(ConfigError::BadRecord);
        }
        let bytes = self
            .bytes
            .get(self.at..self.at + len)
            .ok_or(ConfigError::Truncated)?;
        self.at += len;
        let text = core::str::from_utf8(bytes).map_err(|_| ConfigError::BadRecord)?;
        Ok(frame::truncate_key(text))
    }
}

/// Validate the image envelope; returns `(record_count, records_bytes)`.
fn check_envelope(bytes: &[u8]) -> Result<(u16, &[u8]), ConfigError> {
    if bytes.len() < 12 {
        return Err(ConfigError::Truncated);
    }
    let body = &bytes[..bytes.len() - 4];
    let stored = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
    if crc32(body) != stored {
        return Err(ConfigError::BadCrc);
    }
    if u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != MAGIC {
        return Err(ConfigError::BadMagic);
    }
    if u16::from_le_bytes(bytes[4..6].try_into().unwrap()) != VERSION {
        return Err(ConfigError::BadVersion);
    }
    let count = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
    Ok((count, &body[8..]))
}

/// Apply a configuration image to every target subsystem.
///
/// Returns the number of applied records. On any error the targets are
/// left cleared, never half-configured.
pub fn apply<C: can::Capacities, const CAP: usize>(
    bytes: &[u8],
    targets: &mut Targets<'_, C, CAP>,
) -> Result<u16, ConfigError> {
    let (count, mut records) = check_envelope(bytes)?;

    clear(targets);

    let mut applied = 0u16;
    let result = (|| {
        for _ in 0..count {
            if records.len() < 3 {
                return Err(ConfigError::Truncated);
            }
            let record_type = records[0];
            let length = usize::from(u16::from_le_bytes([records[1], records[2]]));
            let payload = records.get(3..3 + length).ok_or(ConfigError::Truncated)?;
            records = &records[3 + length..];
            apply_record(record_type, payload, targets)?;
            applied += 1;
        }
        Ok(())
    })();

    match result {
        Ok(()) => Ok(applied),
        Err(error) => {
            clear(targets);
            Err(error)
        }
    }
}

/// Clear every target subsystem back to the power-on state.
pub fn clear<C: can::Capacities, const CAP: usize>(targets: &mut Targets<'_, C, CAP>) {
    targets.registry.clear();
    targets.registry.register_system_channels();
    targets.executor.clear(targets.registry);
    targets.adc.clear();
    targets.digital.clear();
    targets.outputs.clear();
    targets.bridges.clear();
    targets.codec.clear();
    targets.lin.clear();
    *targets.keypad = None;
}

fn register_io<const CAP: usize>(
    registry: &mut Registry<CAP>,
    id: ChannelId,
    kind: ChannelKind,
    direction: Direction,
    format: ValueFormat,
) {
    let _ = registry.register(id, Record::new(kind, direction, format));
}

fn apply_record<C: can::Capacities, const CAP: usize>(
    record_type: u8,
    payload: &[u8],
    targets: &mut Targets<'_, C, CAP>,
) -> Result<(), ConfigError> {
    let mut cursor = Cursor::new(payload);
    match record_type {
        record::CAN_FRAME => {
            let key = cursor.key()?;
            let bus = cursor.u8()?;
            let raw_id = cursor.u32()?;
            let dlc = cursor.u8()?;
            let message_type = match (cursor.u8()?, cursor.u8()?) {
                (0, _) => MessageType::Normal,
                (1, frames) => MessageType::Compound(frames),
                (2, _) => MessageType::PmuStatus1,
                (3, _) => MessageType::PmuStatus2,
                (4, _) => MessageType::PmuStatus3,
                _ => return Err(ConfigError::BadRecord),
            };
            let timeout_ms = cursor.u32()?;
            let tx = if cursor.u8()? != 0 {
                Some(TxSchedule {
                    cycle_ms: cursor.u32()?,
                    trigger: cursor.channel()?,
                })
            } else {
                None
            };
            // Bit 31 selects a 29-bit identifier.
            let id = if raw_id & 0x8000_0000 != 0 {
                Id::Extended(
                    ExtendedId::new(raw_id & 0x1FFF_FFFF).ok_or(ConfigError::BadRecord)?,
                )
            } else {
                Id::Standard(
                    StandardId::new((raw_id & 0x7FF) as u16).ok_or(ConfigError::BadRecord)?,
                )
            };
            targets
                .codec
                .add_frame(FrameConfig {
                    key,
                    bus,
                    id: Some(id),
                    dlc,
                    message_type,
                    timeout_ms,
                    tx,
                })
                .map_err(|_| ConfigError::Capacity)?;
            Ok(())
        }
        record::CAN_RX_SIGNAL => {
            let key = cursor.key()?;
            let frame = targets
                .codec
                .frame_by_key(key.as_str())
                .ok_or(ConfigError::BadRecord)?;
            let frame_index = cursor.u8()?;
            let layout = read_layout(&mut cursor)?;
            let scaling = read_scaling(&mut cursor)?;
            let default_value = cursor.i32()?;
            let timeout_behaviour = match cursor.u8()? {
                0 => TimeoutBehaviour::UseDefault,
                1 => TimeoutBehaviour::HoldLast,
                2 => TimeoutBehaviour::Zero,
                _ => return Err(ConfigError::BadRecord),
            };
            let target = cursor.channel()?;
            register_io(
                targets.registry,
                target,
                ChannelKind::CanRxSignal,
                Direction::Input,
                ValueFormat::Signed,
            );
            let mut signal = can::RxSignal::default();
            signal.frame = frame;
            signal.frame_index = frame_index;
            signal.layout = layout;
            signal.scaling = scaling;
            signal.default_value = default_value;
            signal.timeout_behaviour = timeout_behaviour;
            signal.target = target;
            targets
                .codec
                .add_rx_signal(signal)
                .map_err(|_| ConfigError::Capacity)?;
            Ok(())
        }
        record::CAN_TX_SIGNAL => {
            let key = cursor.key()?;
            let frame = targets
                .codec
                .frame_by_key(key.as_str())
                .ok_or(ConfigError::BadRecord)?;
            let own = cursor.channel()?;
            let frame_index = cursor.u8()?;
            let layout = read_layout(&mut cursor)?;
            let scaling = read_scaling(&mut cursor)?;
            let source = cursor.channel()?;
            register_io(
                targets.registry,
                own,
                ChannelKind::CanTxSignal,
                Direction::Output,
                ValueFormat::Signed,
            );
            targets
                .codec
                .add_tx_signal(can::TxSignal {
                    frame,
                    frame_index,
                    layout,
                    scaling,
                    source,
                })
                .map_err(|_| ConfigError::Capacity)?;
            Ok(())
        }
        record::LOGIC => {
            let id = cursor.channel()?;
            let op = logic_op(cursor.u8()?)?;
            let inputs = read_inputs(&mut cursor)?;
            add_block(targets, id, BlockConfig::Logic { op, inputs })
        }
        record::MATH => {
            let id = cursor.channel()?;
            let op = math_op(cursor.u8()?)?;
            let inputs = read_inputs(&mut cursor)?;
            add_block(targets, id, BlockConfig::Math { op, inputs })
        }
        record::TABLE_2D => {
            let id = cursor.channel()?;
            let input = cursor.channel()?;
            let count = usize::from(cursor.u8()?);
            let mut points = heapless::Vec::<(i32, i32), 16>::new();
            for _ in 0..count {
                let x = cursor.i32()?;
                let y = cursor.i32()?;
                points.push((x, y)).map_err(|_| ConfigError::BadRecord)?;
            }
            let table = Table2d::new(&points).map_err(|_| ConfigError::BadRecord)?;
            add_block(targets, id, BlockConfig::Table2d { input, table })
        }
        record::TABLE_3D => {
            let id = cursor.channel()?;
            let x = cursor.channel()?;
            let y = cursor.channel()?;
            let x_count = usize::from(cursor.u8()?);
            let y_count = usize::from(cursor.u8()?);
            if x_count > 8 || y_count > 8 {
                return Err(ConfigError::BadRecord);
            }
            let mut xs = [0i32; 8];
            let mut ys = [0i32; 8];
            for slot in xs.iter_mut().take(x_count) {
                *slot = cursor.i32()?;
            }
            for slot in ys.iter_mut().take(y_count) {
                *slot = cursor.i32()?;
            }
            let mut values = [[0i32; 8]; 8];
            for row in values.iter_mut().take(y_count) {
                for slot in row.iter_mut().take(x_count) {
                    *slot = cursor.i32()?;
                }
            }
            let rows: heapless::Vec<&[i32], 8> =
                values.iter().take(y_count).map(|r| &r[..x_count]).collect();
            let table =
                Table3d::new(&xs[..x_count], &ys[..y_count], &rows).map_err(|_| ConfigError::BadRecord)?;
            add_block(targets, id, BlockConfig::Table3d { x, y, table })
        }
        record::SWITCH => {
            let id = cursor.channel()?;
            let config = match cursor.u8()? {
                0 => SwitchConfig::Select {
                    index: cursor.channel()?,
                    inputs: read_inputs(&mut cursor)?,
                },
                1 => {
                    let input = cursor.channel()?;
                    let default = cursor.i32()?;
                    let count = usize::from(cursor.u8()?);
                    let mut cases = heapless::Vec::new();
                    for _ in 0..count {
                        let matched = cursor.i32()?;
                        let output = cursor.i32()?;
                        cases
                            .push((matched, output))
                            .map_err(|_| ConfigError::BadRecord)?;
                    }
                    SwitchConfig::Case {
                        input,
                        cases,
                        default,
                    }
                }
                2 => {
                    let input = cursor.channel()?;
                    let count = usize::from(cursor.u8()?);
                    let mut thresholds = heapless::Vec::new();
                    let mut outputs = heapless::Vec::new();
                    for _ in 0..count {
                        thresholds
                            .push(cursor.i32()?)
                            .map_err(|_| ConfigError::BadRecord)?;
                    }
                    for _ in 0..count {
                        outputs
                            .push(cursor.i32()?)
                            .map_err(|_| ConfigError::BadRecord)?;
                    }
                    SwitchConfig::RangeCase {
                        input,
                        thresholds,
                        outputs,
                    }
                }
                3 => SwitchConfig::Ternary {
                    condition: cursor.channel()?,
                    if_true: cursor.channel()?,
                    if_false: cursor.channel()?,
                },
                4 => SwitchConfig::Priority {
                    inputs: read_inputs(&mut cursor)?,
                },
                _ => return Err(ConfigError::BadRecord),
            };
            add_block(targets, id, BlockConfig::Switch(config))
        }
        record::COUNTER => {
            let id = cursor.channel()?;
            let inc = cursor.channel()?;
            let dec = cursor.channel()?;
            let reset = cursor.channel()?;
            let min = cursor.i32()?;
            let max = cursor.i32()?;
            let step = cursor.i32()?;
            let flags = cursor.u8()?;
            add_block(
                targets,
                id,
                BlockConfig::Counter {
                    inc,
                    dec,
                    reset,
                    config: counter::Config {
                        min,
                        max,
                        step,
                        wrap: flags & 0x01 != 0,
                        edge_mode: flags & 0x02 != 0,
                    },
                },
            )
        }
        record::TIMER => {
            let id = cursor.channel()?;
            let input = cursor.channel()?;
            let mode = match cursor.u8()? {
                0 => timer::Mode::OnDelay,
                1 => timer::Mode::OffDelay,
                2 => timer::Mode::Pulse,
                3 => timer::Mode::Blink,
                _ => return Err(ConfigError::BadRecord),
            };
            let preset_ms = cursor.u32()?;
            let off_ms = cursor.u32()?;
            let flags = cursor.u8()?;
            add_block(
                targets,
                id,
                BlockConfig::Timer {
                    input,
                    config: timer::Config {
                        mode,
                        preset_ms,
                        off_ms,
                        retriggerable: flags & 0x01 != 0,
                    },
                },
            )
        }
        record::FILTER => {
            let id = cursor.channel()?;
            let input = cursor.channel()?;
            let kind = match cursor.u8()? {
                0 => FilterKind::Sma(cursor.u32()? as usize),
                1 => FilterKind::Ema(cursor.u32()? as u8),
                2 => FilterKind::LowPass(cursor.u32()?),
                3 => FilterKind::Median(cursor.u32()? as usize),
                4 => FilterKind::RateLimit(cursor.u32()?, cursor.u32()?),
                5 => FilterKind::Debounce(DebounceConfig {
                    debounce_ms: cursor.u32()?,
                    hysteresis: cursor.i32()?,
                }),
                _ => return Err(ConfigError::BadRecord),
            };
            add_block(targets, id, BlockConfig::Filter { input, kind })
        }
        record::FLIP_FLOP => {
            let id = cursor.channel()?;
            let kind = match cursor.u8()? {
                0 => FlipFlopKind::Sr,
                1 => FlipFlopKind::D,
                2 => FlipFlopKind::DLatch,
                3 => FlipFlopKind::T,
                4 => FlipFlopKind::Jk,
                _ => return Err(ConfigError::BadRecord),
            };
            let a = cursor.channel()?;
            let b = cursor.channel()?;
            let c = cursor.channel()?;
            add_block(targets, id, BlockConfig::FlipFlop { kind, a, b, c })
        }
        record::HYSTERESIS => {
            let id = cursor.channel()?;
            let variant = cursor.u8()?;
            let input = cursor.channel()?;
            let config = match variant {
                0 => BlockConfig::Hysteresis {
                    input,
                    config: hysteresis::Config {
                        th_high: cursor.i32()?,
                        th_low: cursor.i32()?,
                        invert: cursor.u8()? != 0,
                    },
                },
                1 => BlockConfig::Window {
                    input,
                    config: hysteresis::WindowConfig {
                        low: cursor.i32()?,
                        high: cursor.i32()?,
                        hysteresis: cursor.i32()?,
                    },
                },
                2 => {
                    let count = usize::from(cursor.u8()?);
                    let mut levels = heapless::Vec::<Level, 8>::new();
                    for _ in 0..count {
                        let threshold_up = cursor.i32()?;
                        let threshold_down = cursor.i32()?;
                        levels
                            .push(Level {
                                threshold_up,
                                threshold_down,
                            })
                            .map_err(|_| ConfigError::BadRecord)?;
                    }
                    BlockConfig::MultiLevel {
                        input,
                        levels: MultiLevel::new(&levels),
                    }
                }
                _ => return Err(ConfigError::BadRecord),
            };
            add_block(targets, id, config)
        }
        record::PID => {
            let id = cursor.channel()?;
            let setpoint = cursor.channel()?;
            let measurement = cursor.channel()?;
            let kp = cursor.i32()?;
            let ki = cursor.i32()?;
            let kd = cursor.i32()?;
            let scale = cursor.i32()?;
            let deadband = cursor.i32()?;
            let out_min = cursor.i32()?;
            let out_max = cursor.i32()?;
            let integral_min = cursor.i32()?;
            let integral_max = cursor.i32()?;
            let flags = cursor.u8()?;
            add_block(
                targets,
                id,
                BlockConfig::Pid {
                    setpoint,
                    measurement,
                    config: pid::Config {
                        kp,
                        ki,
                        kd,
                        scale,
                        deadband,
                        out_min,
                        out_max,
                        integral_min,
                        integral_max,
                        d_on_error: flags & 0x01 != 0,
                        reset_integral_on_setpoint_change: flags & 0x02 != 0,
                    },
                },
            )
        }
        record::OUTPUT => {
            let index = usize::from(cursor.u8()?);
            let pin_count = usize::from(cursor.u8()?);
            let mut pins = heapless::Vec::new();
            for _ in 0..pin_count {
                pins.push(cursor.u8()?).map_err(|_| ConfigError::BadRecord)?;
            }
            let source_channel = cursor.channel()?;
            let pwm_enabled = cursor.u8()? != 0;
            let freq_hz = cursor.u32()?;
            let duty_channel = cursor.channel()?;
            let fixed_duty = cursor.u16()?;
            let soft_start_ms = cursor.u32()?;
            let current_limit_ma = cursor.i32()?;
            let inrush_current_ma = cursor.i32()?;
            let inrush_time_ms = cursor.u32()?;
            let retry_count = cursor.u8()?;
            let flags = cursor.u8()?;
            let open_load_threshold_ma = cursor.i32()?;
            let open_load_time_ms = cursor.u32()?;
            let shed_priority = cursor.u8()?;
            if index >= crate::output::highside::OUTPUT_COUNT {
                return Err(ConfigError::BadRecord);
            }
            register_io(
                targets.registry,
                ChannelId(OUTPUT_BASE + index as u16),
                ChannelKind::PowerOutput,
                Direction::Bidir,
                ValueFormat::Raw,
            );
            targets.outputs.configure(
                index,
                OutputConfig {
                    pins,
                    source_channel,
                    pwm: PwmConfig {
                        enabled: pwm_enabled,
                        freq: freq_hz.max(1).Hz(),
                        duty_channel,
                        fixed_duty,
                    },
                    soft_start_ms,
                    current_limit_ma,
                    inrush_current_ma,
                    inrush_time_ms,
                    retry_count,
                    retry_forever: flags & 0x01 != 0,
                    open_load_threshold_ma,
                    open_load_time_ms,
                    shed_priority,
                },
            );
            Ok(())
        }
        record::HBRIDGE => {
            let index = usize::from(cursor.u8()?);
            let mode = match cursor.u8()? {
                0 => BridgeMode::Coast,
                1 => BridgeMode::Forward,
                2 => BridgeMode::Reverse,
                3 => BridgeMode::Brake,
                4 => BridgeMode::WiperPark,
                5 => BridgeMode::PidPosition,
                _ => return Err(ConfigError::BadRecord),
            };
            let mode_channel = cursor.channel()?;
            let pwm_source = match cursor.u8()? {
                0 => PwmSource::Fixed(cursor.u16()?),
                1 => PwmSource::Channel(ChannelId(cursor.u16()?)),
                2 => PwmSource::Bidirectional(ChannelId(cursor.u16()?)),
                _ => return Err(ConfigError::BadRecord),
            };
            let position_channel = cursor.channel()?;
            let target_channel = cursor.channel()?;
            let position_min = cursor.i32()?;
            let position_max = cursor.i32()?;
            let deadband = cursor.i32()?;
            let position_park = cursor.i32()?;
            let stall_current_ma = cursor.i32()?;
            let stall_time_ms = cursor.u32()?;
            let signal_timeout_ms = cursor.u32()?;
            let failsafe = match cursor.u8()? {
                0 => FailsafeAction::Park,
                1 => FailsafeAction::Brake,
                2 => FailsafeAction::Coast,
                3 => FailsafeAction::CustomPosition(cursor.i32()?),
                _ => return Err(ConfigError::BadRecord),
            };
            let flags = cursor.u8()?;
            let kp = cursor.i32()?;
            let ki = cursor.i32()?;
            let kd = cursor.i32()?;
            if index >= crate::output::hbridge::BRIDGE_COUNT {
                return Err(ConfigError::BadRecord);
            }
            register_io(
                targets.registry,
                ChannelId(BRIDGE_BASE + index as u16),
                ChannelKind::HBridge,
                Direction::Bidir,
                ValueFormat::Enum,
            );
            targets.bridges.configure(
                index,
                HBridgeConfig {
                    mode_channel,
                    mode,
                    pwm_source,
                    position_channel,
                    target_channel,
                    position_min,
                    position_max,
                    deadband,
                    position_park,
                    stall_current_ma,
                    stall_time_ms,
                    signal_timeout_ms,
                    failsafe,
                    auto_recovery: flags & 0x01 != 0,
                    pid: pid::Config {
                        kp,
                        ki,
                        kd,
                        out_min: -255,
                        out_max: 255,
                        integral_min: -255,
                        integral_max: 255,
                        ..pid::Config::default()
                    },
                },
            );
            Ok(())
        }
        record::ADC_INPUT => {
            let index = usize::from(cursor.u8()?);
            if index >= crate::acquire::ADC_CHANNELS {
                return Err(ConfigError::BadRecord);
            }
            let input = match cursor.u8()? {
                kind @ (0 | 1) => {
                    let active_high = kind == 1;
                    let config = AdcSwitchConfig {
                        threshold_high_mv: cursor.i32()?,
                        threshold_low_mv: cursor.i32()?,
                        debounce_ms: cursor.u32()?,
                    };
                    if active_high {
                        AdcInput::SwitchActiveHigh(config)
                    } else {
                        AdcInput::SwitchActiveLow(config)
                    }
                }
                2 => AdcInput::Rotary(RotaryConfig {
                    positions: cursor.u8()?,
                    debounce_ms: cursor.u32()?,
                }),
                3 => AdcInput::Linear(LinearConfig {
                    in_lo_mv: cursor.i32()?,
                    in_hi_mv: cursor.i32()?,
                    out_lo: cursor.i32()?,
                    out_hi: cursor.i32()?,
                }),
                4 => {
                    let count = usize::from(cursor.u8()?);
                    let mut points = heapless::Vec::<(i32, i32), 16>::new();
                    for _ in 0..count {
                        let x = cursor.i32()?;
                        let y = cursor.i32()?;
                        points.push((x, y)).map_err(|_| ConfigError::BadRecord)?;
                    }
                    AdcInput::Calibrated(
                        Table2d::new(&points).map_err(|_| ConfigError::BadRecord)?,
                    )
                }
                5 => AdcInput::Frequency(FrequencyConfig {
                    threshold_mv: cursor.i32()?,
                    window_ms: cursor.u32()?,
                }),
                _ => return Err(ConfigError::BadRecord),
            };
            if index != 0 {
                register_io(
                    targets.registry,
                    ChannelId(index as u16),
                    ChannelKind::AnalogInput,
                    Direction::Input,
                    ValueFormat::Signed,
                );
            }
            targets.adc.configure(index, input);
            Ok(())
        }
        record::DIGITAL_INPUT => {
            let index = usize::from(cursor.u8()?);
            if index >= crate::acquire::DIGITAL_PINS {
                return Err(ConfigError::BadRecord);
            }
            let input = match cursor.u8()? {
                0 => DigitalInput::Switch {
                    debounce_ms: cursor.u32()?,
                    active_low: cursor.u8()? != 0,
                },
                1 => DigitalInput::Frequency {
                    teeth: cursor.u16()?,
                    window_ms: cursor.u32()?,
                },
                2 => DigitalInput::Rpm {
                    teeth: cursor.u16()?,
                    window_ms: cursor.u32()?,
                },
                _ => return Err(ConfigError::BadRecord),
            };
            register_io(
                targets.registry,
                ChannelId(crate::acquire::DIGITAL_BASE + index as u16),
                ChannelKind::DigitalInput,
                Direction::Input,
                ValueFormat::Bool,
            );
            targets.digital.configure(index, input);
            Ok(())
        }
        record::LIN_FRAME => {
            let frame_id = cursor.u8()?;
            let dlc = cursor.u8()?;
            let checksum = if cursor.u8()? == 0 {
                ChecksumMode::Classic
            } else {
                ChecksumMode::Enhanced
            };
            let direction = if cursor.u8()? == 0 {
                FrameDirection::Subscribe
            } else {
                FrameDirection::Publish
            };
            let timeout_ms = cursor.u32()?;
            targets
                .lin
                .add_frame(LinFrameConfig {
                    frame_id,
                    dlc,
                    checksum,
                    direction,
                    timeout_ms,
                })
                .map_err(|_| ConfigError::Capacity)?;
            Ok(())
        }
        record::LIN_SIGNAL => {
            let frame_index = usize::from(cursor.u8()?);
            let is_output = cursor.u8()? != 0;
            let layout = read_layout(&mut cursor)?;
            let scaling = read_scaling(&mut cursor)?;
            let default_value = cursor.i32()?;
            let timeout_behaviour = match cursor.u8()? {
                0 => TimeoutBehaviour::UseDefault,
                1 => TimeoutBehaviour::HoldLast,
                2 => TimeoutBehaviour::Zero,
                _ => return Err(ConfigError::BadRecord),
            };
            let channel = cursor.channel()?;
            if is_output {
                targets
                    .lin
                    .add_output(LinOutput {
                        frame: frame_index,
                        layout,
                        scaling,
                        source: channel,
                    })
                    .map_err(|_| ConfigError::Capacity)?;
            } else {
                register_io(
                    targets.registry,
                    channel,
                    ChannelKind::CanRxSignal,
                    Direction::Input,
                    ValueFormat::Signed,
                );
                targets
                    .lin
                    .add_input(LinInput {
                        frame: frame_index,
                        layout,
                        scaling,
                        target: channel,
                        default_value,
                        timeout_behaviour,
                    })
                    .map_err(|_| ConfigError::Capacity)?;
            }
            Ok(())
        }
        record::OUTPUT_LINK => {
            let output = cursor.channel()?;
            let source = cursor.channel()?;
            let hw_index = cursor.u8()?;
            targets
                .executor
                .add_output_link(output, source, hw_index)
                .map_err(|_| ConfigError::Capacity)?;
            Ok(())
        }
        record::KEYPAD => {
            let bus = cursor.u8()?;
            let keypad_sa = cursor.u8()?;
            let own_sa = cursor.u8()?;
            let button_count = cursor.u8()?;
            let heartbeat_timeout_ms = cursor.u32()?;
            let mut buttons = [crate::channel::UNBOUND; BUTTONS_MAX];
            for slot in buttons
                .iter_mut()
                .take(usize::from(button_count).min(BUTTONS_MAX))
            {
                *slot = cursor.channel()?;
                if !slot.is_unbound() {
                    register_io(
                        targets.registry,
                        *slot,
                        slot.kind().ok_or(ConfigError::BadRecord)?,
                        Direction::Input,
                        ValueFormat::Bool,
                    );
                }
            }
            *targets.keypad = Some(Keypad::new(KeypadConfig {
                bus,
                keypad_sa,
                own_sa,
                button_count,
                buttons,
                heartbeat_timeout_ms,
            }));
            Ok(())
        }
        _ => Err(ConfigError::UnknownRecord),
    }
}

fn add_block<C: can::Capacities, const CAP: usize>(
    targets: &mut Targets<'_, C, CAP>,
    id: ChannelId,
    config: BlockConfig,
) -> Result<(), ConfigError> {
    targets
        .executor
        .add_channel(id, config, targets.registry)
        .map_err(|_| ConfigError::BadRecord)
}

fn read_inputs(cursor: &mut Cursor<'_>) -> Result<Inputs, ConfigError> {
    let count = usize::from(cursor.u8()?);
    let mut inputs = Inputs::new();
    for _ in 0..count {
        inputs
            .push(cursor.channel()?)
            .map_err(|_| ConfigError::BadRecord)?;
    }
    Ok(inputs)
}

fn read_layout(cursor: &mut Cursor<'_>) -> Result<Layout, ConfigError> {
    let byte_offset = cursor.u8()?;
    let start_bit = cursor.u8()?;
    let bit_length = cursor.u8()?;
    let byte_order = match cursor.u8()? {
        0 => ByteOrder::LittleEndian,
        1 => ByteOrder::BigEndian,
        _ => return Err(ConfigError::BadRecord),
    };
    let data_type = match cursor.u8()? {
        0 => DataType::Unsigned,
        1 => DataType::Signed,
        2 => DataType::Float,
        _ => return Err(ConfigError::BadRecord),
    };
    Ok(Layout {
        byte_offset,
        start_bit,
        bit_length,
        byte_order,
        data_type,
    })
}

fn read_scaling(cursor: &mut Cursor<'_>) -> Result<Scaling, ConfigError> {
    Ok(Scaling {
        multiplier: cursor.i32()?,
        divider: cursor.i32()?,
        offset: cursor.i32()?,
    })
}

fn logic_op(raw: u8) -> Result<logic::LogicOp, ConfigError> {
    use logic::LogicOp::*;
    Ok(match raw {
        0 => And,
        1 => Or,
        2 => Xor,
        3 => Nand,
        4 => Nor,
        5 => IsTrue,
        6 => IsFalse,
        7 => Gt,
        8 => Gte,
        9 => Lt,
        10 => Lte,
        11 => Eq,
        12 => Neq,
        13 => InRange,
        14 => OutsideRange,
        _ => return Err(ConfigError::BadRecord),
    })
}

fn math_op(raw: u8) -> Result<math::MathOp, ConfigError> {
    use math::MathOp::*;
    Ok(match raw {
        0 => Add,
        1 => Sub,
        2 => Mul,
        3 => Div,
        4 => Mod,
        5 => Abs,
        6 => Neg,
        7 => Min,
        8 => Max,
        9 => Avg,
        10 => Clamp,
        11 => Map,
        12 => Scale,
        13 => Lerp,
        _ => return Err(ConfigError::BadRecord),
    })
}
