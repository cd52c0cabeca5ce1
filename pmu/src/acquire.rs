//! Input acquisition: ADC conditioning and digital-input debounce.
//!
//! The ADC bank samples every configured channel once per tick (nominally
//! 1 kHz), pushes the raw 10-bit value through an 8-sample moving average,
//! applies the channel's input-type processing and publishes the result to
//! the registry under ids 0..=19. Digital inputs publish under ids 50..=69.
//!
//! Channel id 0 doubles as the unbound sentinel, so ADC index 0 is sampled
//! and exposed through [`AdcBank::scaled`] but never published to the
//! registry.

use crate::block::filter::{Debounce, DebounceConfig, Sma};
use crate::block::hysteresis;
use crate::block::table::Table2d;
use crate::channel::{ChannelId, Registry};
use pmu_core::{AnalogSource, DigitalSource};

/// Number of ADC channels.
pub const ADC_CHANNELS: usize = 20;
/// Number of digital input pins.
pub const DIGITAL_PINS: usize = 20;
/// First digital-input channel id.
pub const DIGITAL_BASE: u16 = 50;

/// ADC reference voltage in millivolts.
pub const VREF_MV: i32 = 3300;
/// Full-scale raw count of the 10-bit converter.
pub const ADC_FULL_SCALE: i32 = 1023;

/// Moving-average window applied between the raw read and all further
/// processing.
const ADC_AVG_WINDOW: usize = 8;

/// Convert a raw 10-bit sample to millivolts.
#[inline]
pub fn raw_to_mv(raw: u16) -> i32 {
    i32::from(raw.min(ADC_FULL_SCALE as u16)) * VREF_MV / ADC_FULL_SCALE
}

/// Per-channel input processing.
#[derive(Debug, Clone)]
pub enum AdcInput {
    /// Switch to ground (reads low when closed).
    SwitchActiveLow(SwitchConfig),
    /// Switch to battery (reads high when closed).
    SwitchActiveHigh(SwitchConfig),
    /// Rotary switch dividing the reference into equal position bands.
    Rotary(RotaryConfig),
    /// Two-point linear scaling from millivolts to engineering units.
    Linear(LinearConfig),
    /// Piecewise-linear calibration over up to 16 points (mv -> value).
    Calibrated(Table2d),
    /// Frequency measurement from threshold crossings.
    Frequency(FrequencyConfig),
}

/// Threshold switch configuration.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Crossing this level (mV) asserts the switch.
    pub threshold_high_mv: i32,
    /// Crossing this level (mV) releases it.
    pub threshold_low_mv: i32,
    /// Stability window before a state change is published.
    pub debounce_ms: u32,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            threshold_high_mv: 2000,
            threshold_low_mv: 1000,
            debounce_ms: 20,
        }
    }
}

/// Rotary switch configuration.
#[derive(Debug, Clone)]
pub struct RotaryConfig {
    /// Number of detent positions (2..=16).
    pub positions: u8,
    /// Stability window before a new position is published.
    pub debounce_ms: u32,
}

/// Two-point linear scaling.
#[derive(Debug, Clone)]
pub struct LinearConfig {
    /// Input range start, millivolts.
    pub in_lo_mv: i32,
    /// Input range end, millivolts.
    pub in_hi_mv: i32,
    /// Output at `in_lo_mv`.
    pub out_lo: i32,
    /// Output at `in_hi_mv`.
    pub out_hi: i32,
}

/// Frequency input configuration.
#[derive(Debug, Clone)]
pub struct FrequencyConfig {
    /// Comparator threshold in millivolts.
    pub threshold_mv: i32,
    /// Measurement window; edges are counted per window.
    pub window_ms: u32,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            threshold_mv: VREF_MV / 2,
            window_ms: 100,
        }
    }
}

struct AdcChannel {
    input: AdcInput,
    average: Sma,
    debounce: Debounce,
    comparator: hysteresis::State,
    edges: u32,
    window_start_ms: u32,
    level: bool,
    value: i32,
}

impl AdcChannel {
    fn new(input: AdcInput) -> Self {
        Self {
            input,
            average: Sma::new(ADC_AVG_WINDOW),
            debounce: Debounce::new(),
            comparator: hysteresis::State::new(),
            edges: 0,
            window_start_ms: 0,
            level: false,
            value: 0,
        }
    }
}

/// The ADC acquisition bank.
pub struct AdcBank {
    channels: [Option<AdcChannel>; ADC_CHANNELS],
}

impl Default for AdcBank {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcBank {
    /// A bank with no channels configured.
    pub fn new() -> Self {
        Self {
            channels: [const { None }; ADC_CHANNELS],
        }
    }

    /// Configure processing for one ADC index; replaces any previous
    /// configuration and restarts its filters.
    pub fn configure(&mut self, index: usize, input: AdcInput) {
        if index < ADC_CHANNELS {
            self.channels[index] = Some(AdcChannel::new(input));
        }
    }

    /// Drop the configuration of one ADC index.
    pub fn deconfigure(&mut self, index: usize) {
        if index < ADC_CHANNELS {
            self.channels[index] = None;
        }
    }

    /// Drop all channel configurations.
    pub fn clear(&mut self) {
        self.channels = [const { None }; ADC_CHANNELS];
    }

    /// Last processed value of a channel, bypassing the registry.
    pub fn scaled(&self, index: usize) -> i32 {
        self.channels
            .get(index)
            .and_then(|c| c.as_ref())
            .map(|c| c.value)
            .unwrap_or(0)
    }

    /// Sample every configured channel once and publish the results.
    pub fn tick<const CAP: usize>(
        &mut self,
        adc: &mut impl AnalogSource,
        registry: &mut Registry<CAP>,
        now_ms: u32,
        dt_ms: u32,
    ) {
        for index in 0..ADC_CHANNELS {
            let Some(channel) = self.channels[index].as_mut() else {
                continue;
            };
            let raw = adc.sample(index);
            let averaged_raw = channel.average.update(i32::from(raw.min(1023)));
            let mv = averaged_raw * VREF_MV / ADC_FULL_SCALE;

            let value = match &channel.input {
                AdcInput::SwitchActiveLow(cfg) => {
                    let pressed = switch_level(
                        &mut channel.comparator,
                        &mut channel.debounce,
                        cfg,
                        mv,
                        dt_ms,
                    );
                    i32::from(!pressed)
                }
                AdcInput::SwitchActiveHigh(cfg) => {
                    let pressed = switch_level(
                        &mut channel.comparator,
                        &mut channel.debounce,
                        cfg,
                        mv,
                        dt_ms,
                    );
                    i32::from(pressed)
                }
                AdcInput::Rotary(cfg) => {
                    let positions = i32::from(cfg.positions.clamp(2, 16));
                    let position = (mv * positions / (VREF_MV + 1)).clamp(0, positions - 1);
                    let debounce = DebounceConfig {
                        debounce_ms: cfg.debounce_ms,
                        hysteresis: 0,
                    };
                    channel.debounce.update(&debounce, position, dt_ms)
                }
                AdcInput::Linear(cfg) => {
                    crate::block::math::map(mv, cfg.in_lo_mv, cfg.in_hi_mv, cfg.out_lo, cfg.out_hi)
                }
                AdcInput::Calibrated(table) => table.lookup(mv),
                AdcInput::Frequency(cfg) => {
                    let th = hysteresis::Config {
                        th_high: cfg.threshold_mv,
                        th_low: cfg.threshold_mv - cfg.threshold_mv / 8,
                        invert: false,
                    };
                    let level = hysteresis::update(&mut channel.comparator, &th, mv) != 0;
                    if level && !channel.level {
                        channel.edges += 1;
                    }
                    channel.level = level;
                    let elapsed = now_ms.wrapping_sub(channel.window_start_ms);
                    if elapsed >= cfg.window_ms && cfg.window_ms > 0 {
                        channel.value = (channel.edges.saturating_mul(1000) / elapsed) as i32;
                        channel.edges = 0;
                        channel.window_start_ms = now_ms;
                    }
                    channel.value
                }
            };
            channel.value = value;
            if index != 0 {
                let _ = registry.set_value(ChannelId(index as u16), value);
            }
        }
    }
}

fn switch_level(
    comparator: &mut hysteresis::State,
    debounce: &mut Debounce,
    cfg: &SwitchConfig,
    mv: i32,
    dt_ms: u32,
) -> bool {
    let th = hysteresis::Config {
        th_high: cfg.threshold_high_mv,
        th_low: cfg.threshold_low_mv,
        invert: false,
    };
    let raw_state = hysteresis::update(comparator, &th, mv);
    let config = DebounceConfig {
        debounce_ms: cfg.debounce_ms,
        hysteresis: 0,
    };
    debounce.update(&config, raw_state, dt_ms) != 0
}

/// Per-pin digital input processing.
#[derive(Debug, Clone)]
pub enum DigitalInput {
    /// Debounced on/off input.
    Switch {
        /// Stability window before a state change is published.
        debounce_ms: u32,
        /// Invert the electrical level.
        active_low: bool,
    },
    /// Pulse frequency in hertz over a measurement window.
    Frequency {
        /// Pulses per mechanical revolution (tone-wheel teeth).
        teeth: u16,
        /// Measurement window.
        window_ms: u32,
    },
    /// Rotational speed in RPM derived from pulse frequency.
    Rpm {
        /// Pulses per mechanical revolution.
        teeth: u16,
        /// Measurement window.
        window_ms: u32,
    },
}

struct DigitalChannel {
    input: DigitalInput,
    debounce: Debounce,
    level: bool,
    edges: u32,
    window_start_ms: u32,
    value: i32,
}

/// The digital input bank, ids 50..=69.
pub struct DigitalBank {
    pins: [Option<DigitalChannel>; DIGITAL_PINS],
}

impl Default for DigitalBank {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalBank {
    /// A bank with no pins configured.
    pub fn new() -> Self {
        Self {
            pins: [const { None }; DIGITAL_PINS],
        }
    }

    /// Configure one pin; replaces any previous configuration.
    pub fn configure(&mut self, index: usize, input: DigitalInput) {
        if index < DIGITAL_PINS {
            self.pins[index] = Some(DigitalChannel {
                input,
                debounce: Debounce::new(),
                level: false,
                edges: 0,
                window_start_ms: 0,
                value: 0,
            });
        }
    }

    /// Drop all pin configurations.
    pub fn clear(&mut self) {
        self.pins = [const { None }; DIGITAL_PINS];
    }

    /// Sample every configured pin once and publish the results.
    pub fn tick<const CAP: usize>(
        &mut self,
        source: &impl DigitalSource,
        registry: &mut Registry<CAP>,
        now_ms: u32,
        dt_ms: u32,
    ) {
        for index in 0..DIGITAL_PINS {
            let Some(pin) = self.pins[index].as_mut() else {
                continue;
            };
            let level = source.level(index);
            let value = match &pin.input {
                DigitalInput::Switch {
                    debounce_ms,
                    active_low,
                } => {
                    let logical = level != *active_low;
                    let config = DebounceConfig {
                        debounce_ms: *debounce_ms,
                        hysteresis: 0,
                    };
                    pin.debounce.update(&config, i32::from(logical), dt_ms)
                }
                DigitalInput::Frequency { teeth, window_ms }
                | DigitalInput::Rpm { teeth, window_ms } => {
                    if level && !pin.level {
                        pin.edges += 1;
                    }
                    let elapsed = now_ms.wrapping_sub(pin.window_start_ms);
                    if elapsed >= *window_ms && *window_ms > 0 && elapsed > 0 {
                        let teeth = u32::from(*teeth).max(1);
                        let hz_milli = pin.edges.saturating_mul(1_000_000) / elapsed / teeth;
                        pin.value = match pin.input {
                            DigitalInput::Rpm { .. } => (hz_milli.saturating_mul(60) / 1000) as i32,
                            _ => (hz_milli / 1000) as i32,
                        };
                        pin.edges = 0;
                        pin.window_start_ms = now_ms;
                    }
                    pin.value
                }
            };
            pin.level = level;
            pin.value = value;
            let _ = registry.set_value(ChannelId(DIGITAL_BASE + index as u16), value);
        }
    }
}
