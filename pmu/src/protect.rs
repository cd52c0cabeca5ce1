//! Protection supervisor: voltage/temperature/current monitoring, fault
//! aggregation and load shedding.
//!
//! Runs at the slow tick (≥ 100 Hz). Measurements come out of the system
//! channels (battery voltage, temperatures) that the platform glue and the
//! acquisition layer publish; the total output current is estimated from
//! the output bank's sense readings and published back to the registry.

use bitfield::bitfield;
use heapless::Vec;

use crate::channel::{self, Registry};
use crate::output::highside::{OutputBank, OUTPUT_COUNT};

bitfield! {
    /// Aggregated system fault mask.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct SystemFaults(u16);
    impl Debug;
    /// Battery below the minimum for the configured sample count.
    pub undervoltage, set_undervoltage: 0;
    /// Battery above the maximum for the configured sample count.
    pub overvoltage, set_overvoltage: 1;
    /// Reverse supply polarity reported by the input stage.
    pub reverse_polarity, set_reverse_polarity: 2;
    /// Board temperature above the warning level.
    pub overtemp_warning, set_overtemp_warning: 3;
    /// Board temperature above the critical level.
    pub overtemp_critical, set_overtemp_critical: 4;
    /// Summed output current above the system limit.
    pub overcurrent_total, set_overcurrent_total: 5;
    /// Load shedding active to stay inside the power budget.
    pub power_limit, set_power_limit: 6;
    /// Watchdog reset recorded at boot.
    pub watchdog, set_watchdog: 7;
    /// Brownout reset recorded at boot.
    pub brownout, set_brownout: 8;
    /// Persistence layer reported a flash failure.
    pub flash_error, set_flash_error: 9;
}

impl SystemFaults {
    /// Raw mask for telemetry.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// `true` when any fault bit is set.
    pub fn any(self) -> bool {
        self.0 != 0
    }
}

/// Supervisor thresholds.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Undervoltage threshold in millivolts.
    pub voltage_min_mv: i32,
    /// Overvoltage threshold in millivolts.
    pub voltage_max_mv: i32,
    /// Consecutive out-of-range samples before a voltage fault raises.
    pub sample_count: u8,
    /// Warning temperature in millidegrees Celsius.
    pub temp_warning_mc: i32,
    /// Critical temperature in millidegrees Celsius; escalates to load
    /// shedding.
    pub temp_critical_mc: i32,
    /// Total current budget in milliamps.
    pub max_current_ma: i32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            voltage_min_mv: 9_000,
            voltage_max_mv: 16_000,
            sample_count: 3,
            temp_warning_mc: 100_000,
            temp_critical_mc: 125_000,
            max_current_ma: 100_000,
        }
    }
}

/// The protection supervisor.
pub struct Supervisor {
    config: SupervisorConfig,
    faults: SystemFaults,
    under_samples: u8,
    over_samples: u8,
    voltage_ok_samples: u8,
    shed_order: Vec<u8, OUTPUT_COUNT>,
    uptime_acc_ms: u32,
    uptime_s: u32,
}

impl Supervisor {
    /// A supervisor with no faults latched.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            faults: SystemFaults::default(),
            under_samples: 0,
            over_samples: 0,
            voltage_ok_samples: 0,
            shed_order: Vec::new(),
            uptime_acc_ms: 0,
            uptime_s: 0,
        }
    }

    /// Current fault mask.
    pub fn faults(&self) -> SystemFaults {
        self.faults
    }

    /// Latch a boot-derived or externally detected fault bit.
    pub fn latch(&mut self, set: impl FnOnce(&mut SystemFaults)) {
        set(&mut self.faults);
    }

    /// `true` while load shedding holds outputs off.
    pub fn shedding(&self) -> bool {
        !self.shed_order.is_empty()
    }

    /// Run one supervision pass.
    pub fn tick<const CAP: usize>(
        &mut self,
        registry: &mut Registry<CAP>,
        outputs: &mut OutputBank,
        dt_ms: u32,
    ) {
        // Uptime bookkeeping.
        self.uptime_acc_ms += dt_ms;
        while self.uptime_acc_ms >= 1000 {
            self.uptime_acc_ms -= 1000;
            self.uptime_s = self.uptime_s.wrapping_add(1);
            let _ = registry.set_value(channel::UPTIME_SECONDS, self.uptime_s as i32);
        }

        // Voltage window with consecutive-sample filtering.
        let voltage = registry.get_value(channel::BATTERY_VOLTAGE);
        let n = self.config.sample_count.max(1);
        if voltage < self.config.voltage_min_mv {
            self.under_samples = self.under_samples.saturating_add(1);
            self.voltage_ok_samples = 0;
        } else if voltage > self.config.voltage_max_mv {
            self.over_samples = self.over_samples.saturating_add(1);
            self.voltage_ok_samples = 0;
        } else {
            self.under_samples = 0;
            self.over_samples = 0;
            self.voltage_ok_samples = self.voltage_ok_samples.saturating_add(1);
        }
        if self.under_samples >= n {
            self.faults.set_undervoltage(true);
        }
        if self.over_samples >= n {
            self.faults.set_overvoltage(true);
        }
        if self.voltage_ok_samples >= n {
            self.faults.set_undervoltage(false);
            self.faults.set_overvoltage(false);
        }

        // Temperature ladder.
        let board = registry.get_value(channel::BOARD_TEMPERATURE);
        let mcu = registry.get_value(channel::MCU_TEMPERATURE);
        let temp = board.max(mcu);
        self.faults.set_overtemp_warning(temp >= self.config.temp_warning_mc);
        if temp >= self.config.temp_critical_mc {
            self.faults.set_overtemp_critical(true);
        } else if temp < self.config.temp_warning_mc {
            self.faults.set_overtemp_critical(false);
        }

        // Total current estimate.
        let total = outputs.total_current_ma();
        let _ = registry.set_value(channel::TOTAL_CURRENT, total);
        self.faults.set_overcurrent_total(total > self.config.max_current_ma);

        // Critical temperature or a blown budget escalate to shedding.
        if self.faults.overtemp_critical() || total > self.config.max_current_ma {
            self.activate_load_shedding(self.config.max_current_ma, outputs);
        } else if self.shedding() && !self.faults.overtemp_critical() {
            // Conditions cleared: bring loads back.
            self.deactivate_load_shedding(outputs);
        }
        self.faults.set_power_limit(self.shedding());
        let _ = registry.set_value(channel::FAULT_MASK, i32::from(self.faults.bits()));
    }

    /// Turn outputs off in ascending `shed_priority` order until the
    /// estimated total current drops to `target_ma`.
    pub fn activate_load_shedding(&mut self, target_ma: i32, outputs: &mut OutputBank) {
        let mut total = outputs.total_current_ma();
        while total > target_ma {
            // Next victim: lowest priority among outputs still on.
            let victim = outputs
                .iter()
                .filter(|(idx, output)| {
                    !outputs.is_shed(*idx) && output.current_ma() > 0
                })
                .min_by_key(|(_, output)| output.config().shed_priority)
                .map(|(idx, output)| (idx, output.current_ma()));
            let Some((idx, current)) = victim else {
                break;
            };
            outputs.shed(idx, true);
            if self.shed_order.push(idx as u8).is_err() {
                break;
            }
            total -= current;
        }
    }

    /// Restore shed outputs in reverse order.
    pub fn deactivate_load_shedding(&mut self, outputs: &mut OutputBank) {
        while let Some(idx) = self.shed_order.pop() {
            outputs.shed(usize::from(idx), false);
        }
    }
}
