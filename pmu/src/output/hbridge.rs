//! H-bridge motor outputs: direction control, position PID, wiper park,
//! stall detection and signal-loss failsafe.

use super::{OutputFaults, OutputState};
use crate::block::pid;
use crate::channel::{ChannelId, Registry};
use pmu_core::{BridgeStage, HalfBridge};

/// Number of H-bridges (channel ids 130..=133).
pub const BRIDGE_COUNT: usize = 4;
/// First H-bridge channel id.
pub const BRIDGE_BASE: u16 = 130;

/// Drive mode of an H-bridge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeMode {
    /// Both halves off; the motor freewheels.
    #[default]
    Coast,
    /// Drive forward with the configured PWM source.
    Forward,
    /// Drive reverse with the configured PWM source.
    Reverse,
    /// Both low sides on; the motor is shorted and brakes.
    Brake,
    /// Drive toward the park position, then brake.
    WiperPark,
    /// Closed-loop position control from the feedback channel.
    PidPosition,
}

/// Where the PWM magnitude comes from.
#[derive(Debug, Clone)]
pub enum PwmSource {
    /// Fixed duty in permille.
    Fixed(u16),
    /// Duty in permille from a channel.
    Channel(ChannelId),
    /// A single channel commands both direction and magnitude: 0..=500
    /// permille maps to full..zero reverse, 500..=1000 to zero..full
    /// forward.
    Bidirectional(ChannelId),
}

impl Default for PwmSource {
    fn default() -> Self {
        Self::Fixed(1000)
    }
}

/// Failsafe action when the command source is lost.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailsafeAction {
    /// Drive to the park position, then brake.
    Park,
    /// Short the motor.
    Brake,
    /// Freewheel.
    #[default]
    Coast,
    /// Hold a custom position with the PID.
    CustomPosition(i32),
}

/// Configuration of one H-bridge.
#[derive(Debug, Clone)]
pub struct HBridgeConfig {
    /// Channel selecting the mode (value cast from [`BridgeMode`] discriminant
    /// order); unbound keeps the statically configured `mode`.
    pub mode_channel: ChannelId,
    /// Static drive mode.
    pub mode: BridgeMode,
    /// PWM magnitude source.
    pub pwm_source: PwmSource,
    /// Position feedback channel (potentiometer or encoder count).
    pub position_channel: ChannelId,
    /// Target-position channel for [`BridgeMode::PidPosition`].
    pub target_channel: ChannelId,
    /// Valid feedback range; outside it the feedback is considered lost.
    pub position_min: i32,
    /// Valid feedback range; outside it the feedback is considered lost.
    pub position_max: i32,
    /// Position error tolerance.
    pub deadband: i32,
    /// Park position for wiper mode and the park failsafe.
    pub position_park: i32,
    /// Stall current threshold in milliamps; 0 disables.
    pub stall_current_ma: i32,
    /// How long the current must exceed the threshold.
    pub stall_time_ms: u32,
    /// Source-loss window: the command source must show a fault for this
    /// long before the failsafe engages; 0 disables.
    pub signal_timeout_ms: u32,
    /// Failsafe action on source loss.
    pub failsafe: FailsafeAction,
    /// Leave the failsafe automatically once the source recovers.
    pub auto_recovery: bool,
    /// Position-loop PID gains.
    pub pid: pid::Config,
}

impl Default for HBridgeConfig {
    fn default() -> Self {
        Self {
            mode_channel: crate::channel::UNBOUND,
            mode: BridgeMode::Coast,
            pwm_source: PwmSource::default(),
            position_channel: crate::channel::UNBOUND,
            target_channel: crate::channel::UNBOUND,
            position_min: 0,
            position_max: 1000,
            deadband: 10,
            position_park: 0,
            stall_current_ma: 0,
            stall_time_ms: 200,
            signal_timeout_ms: 0,
            failsafe: FailsafeAction::default(),
            auto_recovery: true,
            pid: pid::Config {
                kp: 2000,
                out_min: -255,
                out_max: 255,
                integral_min: -255,
                integral_max: 255,
                ..pid::Config::default()
            },
        }
    }
}

/// One H-bridge with its runtime state.
#[derive(Debug)]
pub struct HBridge {
    config: HBridgeConfig,
    state: OutputState,
    faults: OutputFaults,
    pid_state: pid::State,
    stall_ms: u32,
    signal_lost_ms: u32,
    in_failsafe: bool,
    parked: bool,
    current_ma: i32,
    drive: (HalfBridge, HalfBridge),
}

impl HBridge {
    fn new(config: HBridgeConfig) -> Self {
        Self {
            config,
            state: OutputState::Off,
            faults: OutputFaults::default(),
            pid_state: pid::State::new(),
            stall_ms: 0,
            signal_lost_ms: 0,
            in_failsafe: false,
            parked: false,
            current_ma: 0,
            drive: (HalfBridge::Off, HalfBridge::Off),
        }
    }

    /// Latched fault flags.
    pub fn faults(&self) -> OutputFaults {
        self.faults
    }

    /// Driver state.
    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Last measured motor current in milliamps.
    pub fn current_ma(&self) -> i32 {
        self.current_ma
    }

    /// `true` while the signal-loss failsafe is driving the bridge.
    pub fn in_failsafe(&self) -> bool {
        self.in_failsafe
    }

    /// `true` once wiper-park has reached the park position and brakes.
    pub fn is_parked(&self) -> bool {
        self.parked
    }

    /// Last commanded half-bridge pair, for diagnostics.
    pub fn drive(&self) -> (HalfBridge, HalfBridge) {
        self.drive
    }

    /// Configuration access.
    pub fn config(&self) -> &HBridgeConfig {
        &self.config
    }

    /// Clear latched faults and restart the position loop.
    pub fn clear_faults(&mut self) {
        self.faults = OutputFaults::default();
        self.pid_state.reset();
        self.stall_ms = 0;
        if self.state == OutputState::Fault {
            self.state = OutputState::Off;
        }
    }

    fn effective_mode<const CAP: usize>(&self, registry: &Registry<CAP>) -> BridgeMode {
        if self.config.mode_channel.is_unbound() {
            return self.config.mode;
        }
        match registry.get_value(self.config.mode_channel) {
            1 => BridgeMode::Forward,
            2 => BridgeMode::Reverse,
            3 => BridgeMode::Brake,
            4 => BridgeMode::WiperPark,
            5 => BridgeMode::PidPosition,
            _ => BridgeMode::Coast,
        }
    }

    /// Signed drive command in -1000..=1000 from the PWM source.
    fn signed_duty<const CAP: usize>(
        &self,
        registry: &Registry<CAP>,
        mode: BridgeMode,
    ) -> i32 {
        let magnitude = match &self.config.pwm_source {
            PwmSource::Fixed(duty) => i32::from(*duty).clamp(0, 1000),
            PwmSource::Channel(id) => registry.get_value(*id).clamp(0, 1000),
            PwmSource::Bidirectional(id) => {
                let centred = registry.get_value(*id).clamp(0, 1000) - 500;
                // 0..=500 permille is reverse, 500..=1000 forward.
                return centred * 2;
            }
        };
        match mode {
            BridgeMode::Reverse => -magnitude,
            _ => magnitude,
        }
    }

    fn position_drive<const CAP: usize>(
        &mut self,
        registry: &Registry<CAP>,
        target: i32,
        dt_ms: u32,
    ) -> i32 {
        let position = registry.get_value(self.config.position_channel);
        if position < self.config.position_min || position > self.config.position_max {
            self.faults.set_position_lost(true);
            return 0;
        }
        if (target - position).abs() <= self.config.deadband {
            self.pid_state.reset();
            return i32::MIN; // sentinel: in position, brake
        }
        let output = pid::update(&mut self.pid_state, &self.config.pid, target, position, dt_ms);
        // PID output is in -255..=255; rescale to permille.
        output * 1000 / 255
    }
}

/// The bank of H-bridges.
pub struct HBridgeBank {
    bridges: [Option<HBridge>; BRIDGE_COUNT],
}

impl Default for HBridgeBank {
    fn default() -> Self {
        Self::new()
    }
}

impl HBridgeBank {
    /// A bank with no bridges configured.
    pub fn new() -> Self {
        Self {
            bridges: [const { None }; BRIDGE_COUNT],
        }
    }

    /// Configure one bridge; replaces any previous configuration.
    pub fn configure(&mut self, index: usize, config: HBridgeConfig) {
        if index < BRIDGE_COUNT {
            self.bridges[index] = Some(HBridge::new(config));
        }
    }

    /// Drop all bridge configurations.
    pub fn clear(&mut self) {
        self.bridges = [const { None }; BRIDGE_COUNT];
    }

    /// Access one bridge.
    pub fn get(&self, index: usize) -> Option<&HBridge> {
        self.bridges.get(index).and_then(|b| b.as_ref())
    }

    /// Exclusive access to one bridge.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut HBridge> {
        self.bridges.get_mut(index).and_then(|b| b.as_mut())
    }

    /// Run the per-tick driver pass.
    pub fn tick<const CAP: usize>(
        &mut self,
        registry: &mut Registry<CAP>,
        stage: &mut impl BridgeStage,
        dt_ms: u32,
    ) {
        for index in 0..BRIDGE_COUNT {
            let Some(bridge) = self.bridges[index].as_mut() else {
                continue;
            };
            let own_id = ChannelId(BRIDGE_BASE + index as u16);
            bridge.current_ma = stage.current_ma(index);

            // Stall supervision runs regardless of mode.
            if bridge.config.stall_current_ma > 0 {
                let driving = bridge.drive != (HalfBridge::Off, HalfBridge::Off);
                if driving && bridge.current_ma > bridge.config.stall_current_ma {
                    bridge.stall_ms = bridge.stall_ms.saturating_add(dt_ms);
                    if bridge.stall_ms > bridge.config.stall_time_ms {
                        bridge.faults.set_stall(true);
                        bridge.state = OutputState::Fault;
                    }
                } else {
                    bridge.stall_ms = 0;
                }
            }

            if bridge.state == OutputState::Fault {
                bridge.drive = (HalfBridge::Off, HalfBridge::Off);
                stage.set_bridge(index, HalfBridge::Off, HalfBridge::Off);
                let _ = registry.set_fault(own_id, true);
                continue;
            }

            let mut mode = bridge.effective_mode(registry);

            // Signal-loss failsafe: the command source carries a fault flag
            // (e.g. its CAN frame timed out).
            if bridge.config.signal_timeout_ms > 0 {
                let source = match (&bridge.config.pwm_source, mode) {
                    (PwmSource::Channel(id), _) | (PwmSource::Bidirectional(id), _) => *id,
                    (_, BridgeMode::PidPosition) => bridge.config.target_channel,
                    _ => bridge.config.mode_channel,
                };
                let lost = registry
                    .get_info(source)
                    .map(|r| r.flags.fault())
                    .unwrap_or(false);
                if lost {
                    bridge.signal_lost_ms = bridge.signal_lost_ms.saturating_add(dt_ms);
                    if bridge.signal_lost_ms >= bridge.config.signal_timeout_ms {
                        bridge.in_failsafe = true;
                        bridge.faults.set_signal_loss(true);
                    }
                } else {
                    bridge.signal_lost_ms = 0;
                    if bridge.in_failsafe && bridge.config.auto_recovery {
                        bridge.in_failsafe = false;
                        bridge.faults.set_signal_loss(false);
                    }
                }
            }

            let mut failsafe_target = None;
            if bridge.in_failsafe {
                mode = match bridge.config.failsafe {
                    FailsafeAction::Park => BridgeMode::WiperPark,
                    FailsafeAction::Brake => BridgeMode::Brake,
                    FailsafeAction::Coast => BridgeMode::Coast,
                    FailsafeAction::CustomPosition(target) => {
                        failsafe_target = Some(target);
                        BridgeMode::PidPosition
                    }
                };
            }

            let (a, b) = match mode {
                BridgeMode::Coast => (HalfBridge::Off, HalfBridge::Off),
                BridgeMode::Brake => (HalfBridge::On, HalfBridge::On),
                BridgeMode::Forward | BridgeMode::Reverse => {
                    pair_from_duty(bridge.signed_duty(registry, mode))
                }
                BridgeMode::WiperPark => {
                    let target = bridge.config.position_park;
                    match bridge.position_drive(registry, target, dt_ms) {
                        i32::MIN => {
                            bridge.parked = true;
                            (HalfBridge::On, HalfBridge::On)
                        }
                        duty => {
                            bridge.parked = false;
                            pair_from_duty(duty)
                        }
                    }
                }
                BridgeMode::PidPosition => {
                    let target = failsafe_target
                        .unwrap_or_else(|| registry.get_value(bridge.config.target_channel));
                    match bridge.position_drive(registry, target, dt_ms) {
                        i32::MIN => (HalfBridge::On, HalfBridge::On),
                        duty => pair_from_duty(duty),
                    }
                }
            };

            bridge.state = match (a, b) {
                (HalfBridge::Off, HalfBridge::Off) => OutputState::Off,
                (HalfBridge::On, HalfBridge::On) => OutputState::On,
                _ => OutputState::Pwm,
            };
            bridge.drive = (a, b);
            stage.set_bridge(index, a, b);
            let _ = registry.set_value(own_id, mode_value(mode));
            let _ = registry.set_fault(own_id, bridge.faults.any());
        }
    }
}

/// Split a signed permille duty into the half-bridge pair.
fn pair_from_duty(duty: i32) -> (HalfBridge, HalfBridge) {
    let magnitude = duty.unsigned_abs().min(1000) as u16;
    if magnitude == 0 {
        (HalfBridge::Off, HalfBridge::Off)
    } else if duty > 0 {
        (HalfBridge::Pwm(magnitude), HalfBridge::Off)
    } else {
        (HalfBridge::Off, HalfBridge::Pwm(magnitude))
    }
}

fn mode_value(mode: BridgeMode) -> i32 {
    match mode {
        BridgeMode::Coast => 0,
        BridgeMode::Forward => 1,
        BridgeMode::Reverse => 2,
        BridgeMode::Brake => 3,
        BridgeMode::WiperPark => 4,
        BridgeMode::PidPosition => 5,
    }
}
