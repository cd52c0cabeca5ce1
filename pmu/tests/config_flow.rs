//! Remote configuration flow: chunked binary upload over the framed
//! protocol, persistence into the dual-slot store, reload after a
//! "reboot".

mod common;

use common::{ImageBuilder, MemFlash};
use generic_array::typenum::consts::*;
use pmu::acquire::{AdcBank, DigitalBank};
use pmu::can::j1939::Keypad;
use pmu::can::Codec;
use pmu::channel::{ChannelId, Registry};
use pmu::config::{self, record};
use pmu::crc::crc32;
use pmu::executor::Executor;
use pmu::lin::{LinChannel, Role};
use pmu::output::{HBridgeBank, OutputBank};
use pmu::persist::slots::ConfigSlots;
use pmu::transport::{
    command, encode_frame, Action, ChannelInfo, DeviceInfo, Handler, Parser, Services,
};

struct Caps;
impl pmu::can::Capacities for Caps {
    type Frames = U8;
    type RxSignals = U16;
    type TxSignals = U16;
}

/// The firmware-side wiring of runtime, persistence and transport.
struct Firmware {
    registry: Registry<256>,
    executor: Executor,
    adc: AdcBank,
    digital: DigitalBank,
    outputs: OutputBank,
    bridges: HBridgeBank,
    codec: Codec<Caps>,
    lin: LinChannel,
    keypad: Option<Keypad>,
    flash: MemFlash<0x10000>,
    slots: ConfigSlots,
    active: Vec<u8>,
}

impl Firmware {
    fn new() -> Self {
        let mut registry = Registry::new();
        registry.register_system_channels();
        Self {
            registry,
            executor: Executor::new(),
            adc: AdcBank::new(),
            digital: DigitalBank::new(),
            outputs: OutputBank::new(),
            bridges: HBridgeBank::new(),
            codec: Codec::new(),
            lin: LinChannel::new(Role::Master),
            keypad: None,
            flash: MemFlash::new(),
            slots: ConfigSlots::new(0, 0x8000),
            active: Vec::new(),
        }
    }

    /// Boot-time restore of the persisted configuration.
    fn restore(&mut self) -> bool {
        let mut buf = [0u8; 4096];
        let Ok(len) = self.slots.load(&mut self.flash, &mut buf) else {
            return false;
        };
        self.apply_config(&buf[..len]).is_ok()
    }
}

impl Services for Firmware {
    fn apply_config(&mut self, bytes: &[u8]) -> Result<u16, u8> {
        let mut targets = config::Targets {
            registry: &mut self.registry,
            executor: &mut self.executor,
            adc: &mut self.adc,
            digital: &mut self.digital,
            outputs: &mut self.outputs,
            bridges: &mut self.bridges,
            codec: &mut self.codec,
            lin: &mut self.lin,
            keypad: &mut self.keypad,
        };
        match config::apply(bytes, &mut targets) {
            Ok(count) => {
                self.active.clear();
                self.active.extend_from_slice(bytes);
                Ok(count)
            }
            Err(_) => Err(pmu::transport::reason::CONFIG_ERROR),
        }
    }

    fn save_config(&mut self) -> Result<(), u8> {
        self.slots
            .save(&mut self.flash, &self.active)
            .map_err(|_| pmu::transport::reason::FLASH_ERROR)
    }

    fn clear_config(&mut self) -> Result<(), u8> {
        let mut targets = config::Targets {
            registry: &mut self.registry,
            executor: &mut self.executor,
            adc: &mut self.adc,
            digital: &mut self.digital,
            outputs: &mut self.outputs,
            bridges: &mut self.bridges,
            codec: &mut self.codec,
            lin: &mut self.lin,
            keypad: &mut self.keypad,
        };
        config::clear(&mut targets);
        self.active.clear();
        self.slots
            .clear(&mut self.flash)
            .map_err(|_| pmu::transport::reason::FLASH_ERROR)
    }

    fn active_config(&self) -> &[u8] {
        &self.active
    }

    fn write_channel(&mut self, id: ChannelId, value: i32) -> bool {
        if self.registry.set_value(id, value).is_err() {
            return false;
        }
        if let Some(record) = self.registry.get_info_mut(id) {
            record.flags.set_overridden(true);
        }
        true
    }

    fn read_channel(&self, id: ChannelId) -> Option<ChannelInfo> {
        self.registry.get_info(id).map(|record| ChannelInfo {
            value: record.value(),
            flags: record.flags.0,
            min: record.min,
            max: record.max,
        })
    }
}

fn demo_image() -> Vec<u8> {
    let mut logic = Vec::new();
    logic.extend_from_slice(&400u16.to_le_bytes());
    logic.push(0u8); // And
    logic.push(2u8);
    logic.extend_from_slice(&50u16.to_le_bytes());
    logic.extend_from_slice(&51u16.to_le_bytes());

    let mut timer = Vec::new();
    timer.extend_from_slice(&600u16.to_le_bytes());
    timer.extend_from_slice(&400u16.to_le_bytes());
    timer.push(0u8); // on delay
    timer.extend_from_slice(&100u32.to_le_bytes());
    timer.extend_from_slice(&0u32.to_le_bytes());
    timer.push(0u8);

    ImageBuilder::new()
        .record(record::LOGIC, &logic)
        .record(record::TIMER, &timer)
        .build()
}

/// Send one request through the wire parser and handler; returns the
/// parsed responses.
fn request(
    firmware: &mut Firmware,
    handler: &mut Handler<4096>,
    cmd: u8,
    seq: u16,
    payload: &[u8],
) -> (Option<Action>, Vec<(u8, u16, Vec<u8>)>) {
    let mut wire = vec![0u8; pmu::transport::MAX_PAYLOAD + 8];
    let len = encode_frame(cmd, seq, payload, &mut wire).unwrap();

    let mut parser = Parser::new();
    let info = DeviceInfo::default();
    let mut responses = Vec::new();
    let mut action = None;
    for &byte in &wire[..len] {
        if let Some(frame) = parser.push(byte, 0) {
            action = handler.handle(&frame, firmware, &info, 0, &mut |bytes| {
                responses.extend_from_slice(bytes)
            });
        }
    }

    let mut parser = Parser::new();
    let mut frames = Vec::new();
    for &byte in &responses {
        if let Some(frame) = parser.push(byte, 0) {
            frames.push((frame.command, frame.seq, frame.payload.to_vec()));
        }
    }
    (action, frames)
}

#[test]
fn upload_save_reboot_restore() {
    let image = demo_image();
    let mut firmware = Firmware::new();
    let mut handler: Handler<4096> = Handler::new();

    // Chunked upload.
    let mut seq = 1u16;
    for (index, chunk) in image.chunks(16).enumerate() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&((index * 16) as u32).to_le_bytes());
        payload.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
        payload.extend_from_slice(chunk);
        let (_, frames) = request(
            &mut firmware,
            &mut handler,
            command::LOAD_BINARY_CONFIG,
            seq,
            &payload,
        );
        assert_eq!(frames[0].0, command::BINARY_CONFIG_ACK, "chunk {index}");
        assert_eq!(frames[0].1, seq, "response echoes the request seq");
        seq += 1;
    }

    // Terminator applies the configuration.
    let mut terminator = [0u8; 6];
    terminator[0..4].copy_from_slice(&crc32(&image).to_le_bytes());
    let (_, frames) = request(
        &mut firmware,
        &mut handler,
        command::LOAD_BINARY_CONFIG,
        seq,
        &terminator,
    );
    assert_eq!(frames[0].0, command::BINARY_CONFIG_ACK);
    assert_eq!(u16::from_le_bytes([frames[0].2[1], frames[0].2[2]]), 2);
    assert_eq!(firmware.executor.node_count(), 2);
    assert!(firmware.registry.get_info(ChannelId(600)).is_some());

    // Persist, then "reboot" into a fresh runtime sharing the flash.
    let (_, frames) = request(&mut firmware, &mut handler, command::SAVE_CONFIG, 100, &[]);
    assert_eq!(frames[0].0, command::FLASH_ACK);

    let mut rebooted = Firmware::new();
    rebooted.flash = firmware.flash;
    assert!(rebooted.restore(), "configuration restored from flash");
    assert_eq!(rebooted.executor.node_count(), 2);
    assert_eq!(rebooted.active, image);
}

#[test]
fn get_config_round_trips_upload() {
    let image = demo_image();
    let mut firmware = Firmware::new();
    let mut handler: Handler<4096> = Handler::new();
    firmware.apply_config(&image).unwrap();

    let (_, frames) = request(&mut firmware, &mut handler, command::GET_CONFIG, 9, &[]);
    // Reassemble the chunks, validating the terminator CRC.
    let mut reassembled = Vec::new();
    for (cmd, seq, payload) in &frames {
        assert_eq!(*cmd, command::CONFIG_DATA);
        assert_eq!(*seq, 9);
        let length = u16::from_le_bytes([payload[4], payload[5]]);
        if length == 0 {
            let crc = u32::from_le_bytes(payload[0..4].try_into().unwrap());
            assert_eq!(crc, crc32(&reassembled));
        } else {
            reassembled.extend_from_slice(&payload[6..6 + usize::from(length)]);
        }
    }
    assert_eq!(reassembled, image);
}

#[test]
fn ping_scenario_bytes_on_the_wire() {
    // PING with seq 0x1234 is AA 00 00 34 12 01 crc crc on the wire and
    // yields PONG with the same seq.
    let mut firmware = Firmware::new();
    let mut handler: Handler<4096> = Handler::new();

    let mut wire = [0u8; 16];
    let len = encode_frame(command::PING, 0x1234, &[], &mut wire).unwrap();
    assert_eq!(&wire[..6], &[0xAA, 0x00, 0x00, 0x34, 0x12, 0x01]);

    let mut parser = Parser::new();
    let info = DeviceInfo::default();
    let mut responses = Vec::new();
    for &byte in &wire[..len] {
        if let Some(frame) = parser.push(byte, 0) {
            handler.handle(&frame, &mut firmware, &info, 0, &mut |bytes| {
                responses.extend_from_slice(bytes)
            });
        }
    }
    let mut parser = Parser::new();
    let mut got = None;
    for &byte in &responses {
        if let Some(frame) = parser.push(byte, 0) {
            got = Some((frame.command, frame.seq));
        }
    }
    assert_eq!(got, Some((command::PONG, 0x1234)));
}

#[test]
fn clear_config_wipes_runtime_and_flash() {
    let image = demo_image();
    let mut firmware = Firmware::new();
    let mut handler: Handler<4096> = Handler::new();
    firmware.apply_config(&image).unwrap();
    firmware.save_config().unwrap();

    let (_, frames) = request(&mut firmware, &mut handler, command::CLEAR_CONFIG, 5, &[]);
    assert_eq!(frames[0].0, command::CLEAR_CONFIG_ACK);
    assert_eq!(firmware.executor.node_count(), 0);

    let mut rebooted = Firmware::new();
    rebooted.flash = firmware.flash;
    assert!(!rebooted.restore(), "nothing left to restore");
}
