//! High-side switch outputs with soft start, current limiting and retry.

use super::{OutputFaults, OutputState, RETRY_DELAY_MS};
use crate::channel::{ChannelId, Registry};
use fugit::{HertzU32, RateExtU32};
use pmu_core::PowerStage;

/// Number of high-side outputs (channel ids 100..=129).
pub const OUTPUT_COUNT: usize = 30;
/// First power-output channel id.
pub const OUTPUT_BASE: u16 = 100;
/// Maximum physical stages ganged into one logical output.
pub const PINS_MAX: usize = 4;

/// PWM settings of one output.
#[derive(Debug, Clone)]
pub struct PwmConfig {
    /// Modulate instead of switching hard.
    pub enabled: bool,
    /// Carrier frequency.
    pub freq: HertzU32,
    /// Channel supplying the duty in permille; unbound uses `fixed_duty`.
    pub duty_channel: ChannelId,
    /// Fallback duty in permille.
    pub fixed_duty: u16,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            freq: 200u32.Hz(),
            duty_channel: crate::channel::UNBOUND,
            fixed_duty: 1000,
        }
    }
}

/// Configuration of one high-side output.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Physical stage indexes ganged together (parallel pins share load).
    pub pins: heapless::Vec<u8, PINS_MAX>,
    /// Channel whose truthiness commands the output; unbound leaves the
    /// output to remote control and executor links only.
    pub source_channel: ChannelId,
    /// PWM settings.
    pub pwm: PwmConfig,
    /// Linear duty ramp length after an off→on edge; 0 disables.
    pub soft_start_ms: u32,
    /// Steady-state current limit in milliamps.
    pub current_limit_ma: i32,
    /// Elevated limit tolerated directly after turn-on.
    pub inrush_current_ma: i32,
    /// Length of the inrush window.
    pub inrush_time_ms: u32,
    /// Retries after an overcurrent trip before latching off.
    pub retry_count: u8,
    /// Retry forever instead of latching.
    pub retry_forever: bool,
    /// Commanded on below this current for `open_load_time_ms` flags an
    /// open load; 0 disables the check.
    pub open_load_threshold_ma: i32,
    /// Persistence window of the open-load check.
    pub open_load_time_ms: u32,
    /// Load-shedding order; lower sheds first.
    pub shed_priority: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pins: heapless::Vec::new(),
            source_channel: crate::channel::UNBOUND,
            pwm: PwmConfig::default(),
            soft_start_ms: 0,
            current_limit_ma: 10_000,
            inrush_current_ma: 20_000,
            inrush_time_ms: 100,
            retry_count: 0,
            retry_forever: false,
            open_load_threshold_ma: 0,
            open_load_time_ms: 100,
            shed_priority: 0,
        }
    }
}

/// One high-side output with its protection state.
#[derive(Debug)]
pub struct Output {
    config: OutputConfig,
    state: OutputState,
    faults: OutputFaults,
    fault_count: u16,
    retries_left: u8,
    retry_due_ms: u32,
    retry_pending: bool,
    on_since_ms: u32,
    on_time_ms: u64,
    switch_cycles: u32,
    open_load_ms: u32,
    shed: bool,
    current_ma: i32,
    temperature_mc: i32,
    duty: u16,
}

impl Output {
    fn new(config: OutputConfig) -> Self {
        Self {
            retries_left: config.retry_count,
            config,
            state: OutputState::Off,
            faults: OutputFaults::default(),
            fault_count: 0,
            retry_due_ms: 0,
            retry_pending: false,
            on_since_ms: 0,
            on_time_ms: 0,
            switch_cycles: 0,
            open_load_ms: 0,
            shed: false,
            current_ma: 0,
            temperature_mc: 0,
            duty: 0,
        }
    }

    /// Driver state.
    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Latched fault flags.
    pub fn faults(&self) -> OutputFaults {
        self.faults
    }

    /// Total number of faults latched since power-up.
    pub fn fault_count(&self) -> u16 {
        self.fault_count
    }

    /// Last measured load current in milliamps (sum over ganged pins).
    pub fn current_ma(&self) -> i32 {
        self.current_ma
    }

    /// Last measured stage temperature in millidegrees Celsius (hottest
    /// ganged pin).
    pub fn temperature_mc(&self) -> i32 {
        self.temperature_mc
    }

    /// Cumulative energised time in milliseconds.
    pub fn on_time_ms(&self) -> u64 {
        self.on_time_ms
    }

    /// Number of off→on transitions.
    pub fn switch_cycles(&self) -> u32 {
        self.switch_cycles
    }

    /// Configuration access.
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Effective duty currently driven, in permille.
    pub fn duty(&self) -> u16 {
        self.duty
    }

    /// Clear latched faults and re-arm the retry budget.
    pub fn clear_faults(&mut self) {
        self.faults = OutputFaults::default();
        self.retries_left = self.config.retry_count;
        self.retry_pending = false;
        if self.state == OutputState::Fault {
            self.state = OutputState::Off;
        }
    }

    fn latch_overcurrent(&mut self, now_ms: u32) {
        self.faults.set_overcurrent(true);
        self.fault_count = self.fault_count.saturating_add(1);
        self.state = OutputState::Fault;
        if self.config.retry_forever {
            self.retry_pending = true;
            self.retry_due_ms = now_ms.wrapping_add(RETRY_DELAY_MS);
        } else if self.retries_left > 0 {
            self.retries_left -= 1;
            self.retry_pending = true;
            self.retry_due_ms = now_ms.wrapping_add(RETRY_DELAY_MS);
        } else {
            self.retry_pending = false;
        }
    }

    /// Duty target for the commanded state, before soft start.
    fn target_duty<const CAP: usize>(&self, registry: &Registry<CAP>) -> u16 {
        if !self.config.pwm.enabled {
            return 1000;
        }
        if self.config.pwm.duty_channel.is_unbound() {
            self.config.pwm.fixed_duty.min(1000)
        } else {
            registry
                .get_value(self.config.pwm.duty_channel)
                .clamp(0, 1000) as u16
        }
    }
}

/// The bank of high-side outputs.
pub struct OutputBank {
    outputs: [Option<Output>; OUTPUT_COUNT],
}

impl Default for OutputBank {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBank {
    /// A bank with no outputs configured.
    pub fn new() -> Self {
        Self {
            outputs: [const { None }; OUTPUT_COUNT],
        }
    }

    /// Configure one output; replaces any previous configuration.
    pub fn configure(&mut self, index: usize, config: OutputConfig) {
        if index < OUTPUT_COUNT {
            self.outputs[index] = Some(Output::new(config));
        }
    }

    /// Drop all output configurations.
    pub fn clear(&mut self) {
        self.outputs = [const { None }; OUTPUT_COUNT];
    }

    /// Access one output.
    pub fn get(&self, index: usize) -> Option<&Output> {
        self.outputs.get(index).and_then(|o| o.as_ref())
    }

    /// Exclusive access to one output.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index).and_then(|o| o.as_mut())
    }

    /// Iterate over configured outputs with their indexes.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Output)> {
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|o| (i, o)))
    }

    /// Force an output off for load shedding; a shed output ignores its
    /// command until restored.
    pub fn shed(&mut self, index: usize, shed: bool) {
        if let Some(output) = self.get_mut(index) {
            output.shed = shed;
        }
    }

    /// `true` while the output is shed.
    pub fn is_shed(&self, index: usize) -> bool {
        self.get(index).map(|o| o.shed).unwrap_or(false)
    }

    /// Estimated total load current over all outputs, in milliamps.
    pub fn total_current_ma(&self) -> i32 {
        self.iter().map(|(_, o)| o.current_ma.max(0)).sum()
    }

    /// Run the per-tick driver pass.
    ///
    /// Command resolution: a configured `source_channel` is copied into the
    /// output's own channel (ids 100..=129) unless a remote override is
    /// active there; the own channel's truthiness is the commanded state.
    pub fn tick<const CAP: usize>(
        &mut self,
        registry: &mut Registry<CAP>,
        stage: &mut impl PowerStage,
        now_ms: u32,
        dt_ms: u32,
    ) {
        for index in 0..OUTPUT_COUNT {
            let Some(output) = self.outputs[index].as_mut() else {
                continue;
            };
            let own_id = ChannelId(OUTPUT_BASE + index as u16);

            // Route the command source into the output's channel.
            let overridden = registry
                .get_info(own_id)
                .map(|r| r.flags.overridden())
                .unwrap_or(false);
            if !output.config.source_channel.is_unbound() && !overridden {
                let commanded = registry.get_value(output.config.source_channel);
                let _ = registry.set_value(own_id, commanded);
            }
            let commanded = registry.get_value(own_id) != 0 && !output.shed;

            // Measurements: ganged pins sum current, hottest pin wins.
            output.current_ma = output
                .config
                .pins
                .iter()
                .map(|&pin| stage.current_ma(usize::from(pin)))
                .sum();
            output.temperature_mc = output
                .config
                .pins
                .iter()
                .map(|&pin| stage.temperature_mc(usize::from(pin)))
                .max()
                .unwrap_or(0);

            // Fault handling and retry.
            if output.state == OutputState::Fault {
                if output.retry_pending
                    && now_ms.wrapping_sub(output.retry_due_ms) < i32::MAX as u32
                {
                    output.retry_pending = false;
                    output.faults.set_overcurrent(false);
                    output.state = OutputState::Off;
                } else {
                    apply(stage, &output.config, 0, false);
                    output.duty = 0;
                    let _ = registry.set_fault(own_id, true);
                    continue;
                }
            }

            let next_state = if commanded {
                if output.config.pwm.enabled {
                    OutputState::Pwm
                } else {
                    OutputState::On
                }
            } else {
                OutputState::Off
            };

            // Off -> on edge bookkeeping.
            let was_off = output.state == OutputState::Off;
            if was_off && next_state != OutputState::Off {
                output.on_since_ms = now_ms;
                output.switch_cycles = output.switch_cycles.saturating_add(1);
                output.open_load_ms = 0;
            }
            output.state = next_state;

            if output.state == OutputState::Off {
                apply(stage, &output.config, 0, false);
                output.duty = 0;
                let _ = registry.set_fault(own_id, output.faults.any());
                continue;
            }

            output.on_time_ms = output.on_time_ms.saturating_add(u64::from(dt_ms));
            let since_on = now_ms.wrapping_sub(output.on_since_ms);

            // Soft start ramps the duty linearly to the target.
            let target = output.target_duty(registry);
            let duty = if output.config.soft_start_ms > 0 && since_on < output.config.soft_start_ms
            {
                (u32::from(target) * since_on / output.config.soft_start_ms) as u16
            } else {
                target
            };
            output.duty = duty;

            // Inrush window selects the active current limit.
            let limit = if since_on < output.config.inrush_time_ms {
                output.config.inrush_current_ma
            } else {
                output.config.current_limit_ma
            };
            if output.current_ma > limit {
                output.latch_overcurrent(now_ms);
                apply(stage, &output.config, 0, false);
                output.duty = 0;
                let _ = registry.set_fault(own_id, true);
                continue;
            }

            // Open-load: commanded on but no current flows.
            if output.config.open_load_threshold_ma > 0 {
                if output.current_ma < output.config.open_load_threshold_ma {
                    output.open_load_ms = output.open_load_ms.saturating_add(dt_ms);
                    if output.open_load_ms >= output.config.open_load_time_ms {
                        output.faults.set_open_load(true);
                    }
                } else {
                    output.open_load_ms = 0;
                    output.faults.set_open_load(false);
                }
            }

            let modulated = output.state == OutputState::Pwm
                || (output.config.soft_start_ms > 0 && since_on < output.config.soft_start_ms);
            apply(stage, &output.config, duty, !modulated);
            let _ = registry.set_fault(own_id, output.faults.any());
        }
    }
}

fn apply(stage: &mut impl PowerStage, config: &OutputConfig, duty: u16, hard: bool) {
    for &pin in config.pins.iter() {
        let pin = usize::from(pin);
        if duty == 0 {
            stage.set_enabled(pin, false);
        } else if hard {
            stage.set_enabled(pin, true);
        } else {
            stage.set_frequency(pin, config.pwm.freq);
            stage.set_duty(pin, duty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, Direction, Record, ValueFormat};

    #[derive(Default)]
    struct FakeStage {
        enabled: [bool; 32],
        duty: [u16; 32],
        current: [i32; 32],
        temperature: [i32; 32],
    }

    impl PowerStage for FakeStage {
        fn set_enabled(&mut self, index: usize, on: bool) {
            self.enabled[index] = on;
            if !on {
                self.duty[index] = 0;
            } else {
                self.duty[index] = 1000;
            }
        }
        fn set_duty(&mut self, index: usize, duty_permille: u16) {
            self.duty[index] = duty_permille;
            self.enabled[index] = duty_permille > 0;
        }
        fn set_frequency(&mut self, _index: usize, _freq: HertzU32) {}
        fn current_ma(&self, index: usize) -> i32 {
            self.current[index]
        }
        fn temperature_mc(&self, index: usize) -> i32 {
            self.temperature[index]
        }
    }

    fn registry() -> Registry<64> {
        let mut reg = Registry::new();
        for i in 0..4u16 {
            let _ = reg.register(
                ChannelId(OUTPUT_BASE + i),
                Record::new(ChannelKind::PowerOutput, Direction::Bidir, ValueFormat::Raw),
            );
        }
        let _ = reg.register(
            ChannelId(400),
            Record::new(ChannelKind::Logic, Direction::Input, ValueFormat::Bool),
        );
        let _ = reg.register(
            ChannelId(500),
            Record::new(ChannelKind::Number, Direction::Input, ValueFormat::Raw),
        );
        reg
    }

    fn config(pin: u8) -> OutputConfig {
        let mut pins = heapless::Vec::new();
        pins.push(pin).unwrap();
        OutputConfig {
            pins,
            source_channel: ChannelId(400),
            ..OutputConfig::default()
        }
    }

    #[test]
    fn follows_source_channel() {
        let mut bank = OutputBank::new();
        bank.configure(0, config(0));
        let mut reg = registry();
        let mut stage = FakeStage::default();

        bank.tick(&mut reg, &mut stage, 0, 1);
        assert!(!stage.enabled[0]);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::Off);

        reg.set_value(ChannelId(400), 1).unwrap();
        bank.tick(&mut reg, &mut stage, 1, 1);
        assert!(stage.enabled[0]);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::On);
        assert_eq!(reg.get_value(ChannelId(OUTPUT_BASE)), 1);

        reg.set_value(ChannelId(400), 0).unwrap();
        bank.tick(&mut reg, &mut stage, 2, 1);
        assert!(!stage.enabled[0]);
    }

    #[test]
    fn soft_start_ramps_duty() {
        let mut bank = OutputBank::new();
        let mut cfg = config(0);
        cfg.soft_start_ms = 200;
        cfg.pwm.enabled = true;
        cfg.pwm.fixed_duty = 800;
        bank.configure(0, cfg);
        let mut reg = registry();
        let mut stage = FakeStage::default();

        reg.set_value(ChannelId(400), 1).unwrap();
        bank.tick(&mut reg, &mut stage, 0, 1);
        // Duty at 50, 100, 150, 200 ms equals 200, 400, 600, 800 permille
        // of the 80% target.
        for (t, want) in [(50, 200), (100, 400), (150, 600), (200, 800)] {
            bank.tick(&mut reg, &mut stage, t, 1);
            assert_eq!(bank.get(0).unwrap().duty(), want, "t={t}");
        }
        bank.tick(&mut reg, &mut stage, 300, 1);
        assert_eq!(bank.get(0).unwrap().duty(), 800);
    }

    #[test]
    fn inrush_window_tolerates_high_current() {
        let mut bank = OutputBank::new();
        let mut cfg = config(0);
        cfg.current_limit_ma = 5_000;
        cfg.inrush_current_ma = 20_000;
        cfg.inrush_time_ms = 100;
        bank.configure(0, cfg);
        let mut reg = registry();
        let mut stage = FakeStage::default();
        stage.current[0] = 15_000;

        reg.set_value(ChannelId(400), 1).unwrap();
        bank.tick(&mut reg, &mut stage, 0, 1);
        bank.tick(&mut reg, &mut stage, 50, 1);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::On, "inrush ok");
        // Past the inrush window the steady limit applies.
        bank.tick(&mut reg, &mut stage, 101, 1);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::Fault);
        assert!(bank.get(0).unwrap().faults().overcurrent());
        assert!(!stage.enabled[0]);
    }

    #[test]
    fn retry_then_latch() {
        let mut bank = OutputBank::new();
        let mut cfg = config(0);
        cfg.current_limit_ma = 5_000;
        cfg.inrush_current_ma = 5_000;
        cfg.inrush_time_ms = 0;
        cfg.retry_count = 1;
        bank.configure(0, cfg);
        let mut reg = registry();
        let mut stage = FakeStage::default();
        stage.current[0] = 9_000;
        reg.set_value(ChannelId(400), 1).unwrap();

        bank.tick(&mut reg, &mut stage, 0, 1);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::Fault);
        // Before the retry delay: still faulted.
        bank.tick(&mut reg, &mut stage, 50, 1);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::Fault);
        // Retry fires, trips again, budget exhausted -> latched.
        bank.tick(&mut reg, &mut stage, 100, 1);
        bank.tick(&mut reg, &mut stage, 250, 1);
        bank.tick(&mut reg, &mut stage, 400, 1);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::Fault);
        assert_eq!(bank.get(0).unwrap().fault_count(), 2);
        // clear_faults re-arms.
        stage.current[0] = 0;
        bank.get_mut(0).unwrap().clear_faults();
        bank.tick(&mut reg, &mut stage, 500, 1);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::On);
    }

    #[test]
    fn shed_output_ignores_command() {
        let mut bank = OutputBank::new();
        bank.configure(0, config(0));
        let mut reg = registry();
        let mut stage = FakeStage::default();
        reg.set_value(ChannelId(400), 1).unwrap();
        bank.tick(&mut reg, &mut stage, 0, 1);
        assert!(stage.enabled[0]);
        bank.shed(0, true);
        bank.tick(&mut reg, &mut stage, 1, 1);
        assert!(!stage.enabled[0]);
        bank.shed(0, false);
        bank.tick(&mut reg, &mut stage, 2, 1);
        assert!(stage.enabled[0]);
    }

    #[test]
    fn open_load_detection() {
        let mut bank = OutputBank::new();
        let mut cfg = config(0);
        cfg.open_load_threshold_ma = 50;
        cfg.open_load_time_ms = 30;
        bank.configure(0, cfg);
        let mut reg = registry();
        let mut stage = FakeStage::default();
        reg.set_value(ChannelId(400), 1).unwrap();
        for t in 0..40 {
            bank.tick(&mut reg, &mut stage, t, 1);
        }
        assert!(bank.get(0).unwrap().faults().open_load());
        // Current returning clears the (non-latching) flag.
        stage.current[0] = 500;
        bank.tick(&mut reg, &mut stage, 41, 1);
        assert!(!bank.get(0).unwrap().faults().open_load());
    }

    #[test]
    fn pwm_duty_from_channel() {
        let mut bank = OutputBank::new();
        let mut cfg = config(0);
        cfg.pwm.enabled = true;
        cfg.pwm.duty_channel = ChannelId(500);
        bank.configure(0, cfg);
        let mut reg = registry();
        let mut stage = FakeStage::default();
        reg.set_value(ChannelId(400), 1).unwrap();
        reg.set_value(ChannelId(500), 650).unwrap();
        bank.tick(&mut reg, &mut stage, 0, 1);
        bank.tick(&mut reg, &mut stage, 1, 1);
        assert_eq!(stage.duty[0], 650);
        assert_eq!(bank.get(0).unwrap().state(), OutputState::Pwm);
    }

    #[test]
    fn ganged_pins_sum_current() {
        let mut bank = OutputBank::new();
        let mut cfg = config(0);
        cfg.pins.push(1).unwrap();
        bank.configure(0, cfg);
        let mut reg = registry();
        let mut stage = FakeStage::default();
        stage.current[0] = 1000;
        stage.current[1] = 2000;
        reg.set_value(ChannelId(400), 1).unwrap();
        bank.tick(&mut reg, &mut stage, 0, 1);
        assert_eq!(bank.get(0).unwrap().current_ma(), 3000);
        assert!(stage.enabled[0] && stage.enabled[1]);
    }
}
