//! The channel executor: tick-scheduled evaluation of configured block
//! nodes.
//!
//! Nodes are evaluated in registration order, not topologically sorted: a
//! producer registered after its consumer feeds that consumer a one-tick
//! stale value. This is deliberate and part of the contract — graphs that
//! need zero-stale reads must register producers first.
//!
//! Each node is a tagged configuration variant paired with a state variant
//! from the pure block library; the executor owns both and is the only code
//! that mutates node state.

use heapless::Vec;
use pmu_core::Clock;

use crate::block::filter::{Debounce, DebounceConfig, Ema, LowPass, Median, RateLimit, Sma};
use crate::block::hysteresis::{self, MultiLevel};
use crate::block::table::{Table2d, Table3d};
use crate::block::{counter, flipflop, logic, math, pid, switch, timer};
use crate::channel::{ChannelId, Direction, Record, Registry, RegistryError, ValueFormat};

/// Maximum executable nodes.
pub const NODES_MAX: usize = 128;
/// Maximum output links.
pub const LINKS_MAX: usize = 64;
/// Maximum block input references.
pub const INPUTS_MAX: usize = 8;

/// Bounded list of input channel references.
pub type Inputs = Vec<ChannelId, INPUTS_MAX>;

/// Filter selection of a filter node.
#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Simple moving average over a window.
    Sma(usize),
    /// Exponential moving average with an 8-bit alpha.
    Ema(u8),
    /// First-order low-pass with a time constant in milliseconds.
    LowPass(u32),
    /// Median over a window.
    Median(usize),
    /// Slew-rate limiter, rise/fall in units per second.
    RateLimit(u32, u32),
    /// Stability debounce.
    Debounce(DebounceConfig),
}

/// Flip-flop selection of a latch node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlipFlopKind {
    /// Set/reset latch, reset priority.
    Sr,
    /// Rising-edge D flip-flop.
    D,
    /// Transparent D latch.
    DLatch,
    /// Toggle flip-flop.
    T,
    /// JK flip-flop.
    Jk,
}

/// Switch-family node configuration.
#[derive(Debug, Clone)]
pub enum SwitchConfig {
    /// `inputs[index]` with a clamped index.
    Select {
        /// Channel supplying the index.
        index: ChannelId,
        /// Value channels.
        inputs: Inputs,
    },
    /// First matching `(match, output)` pair, else the default.
    Case {
        /// Channel supplying the discriminant.
        input: ChannelId,
        /// Match/output pairs.
        cases: Vec<(i32, i32), INPUTS_MAX>,
        /// Fallback output.
        default: i32,
    },
    /// Last threshold not exceeding the input selects the output.
    RangeCase {
        /// Channel supplying the value.
        input: ChannelId,
        /// Ascending thresholds.
        thresholds: Vec<i32, INPUTS_MAX>,
        /// Outputs paired with the thresholds.
        outputs: Vec<i32, INPUTS_MAX>,
    },
    /// `condition ? a : b` over three channels.
    Ternary {
        /// Condition channel.
        condition: ChannelId,
        /// Selected when the condition is true.
        if_true: ChannelId,
        /// Selected when the condition is false.
        if_false: ChannelId,
    },
    /// Index of the first true input, -1 when none.
    Priority {
        /// Condition channels.
        inputs: Inputs,
    },
}

/// Configuration of one executable node.
#[derive(Debug, Clone)]
pub enum BlockConfig {
    /// Constant value source.
    Constant(i32),
    /// Logic/comparison over input channels.
    Logic {
        /// Operator.
        op: logic::LogicOp,
        /// Input channels.
        inputs: Inputs,
    },
    /// Arithmetic over input channels.
    Math {
        /// Operator.
        op: math::MathOp,
        /// Input channels.
        inputs: Inputs,
    },
    /// 2D lookup of one input channel.
    Table2d {
        /// Input channel.
        input: ChannelId,
        /// Breakpoint table.
        table: Table2d,
    },
    /// 3D lookup of two input channels.
    Table3d {
        /// X-axis channel.
        x: ChannelId,
        /// Y-axis channel.
        y: ChannelId,
        /// Grid table.
        table: Table3d,
    },
    /// Switch family.
    Switch(SwitchConfig),
    /// Up/down counter with trigger channels.
    Counter {
        /// Increment trigger channel.
        inc: ChannelId,
        /// Decrement trigger channel.
        dec: ChannelId,
        /// Reset trigger channel.
        reset: ChannelId,
        /// Counter parameters.
        config: counter::Config,
    },
    /// Timer driven by one input channel.
    Timer {
        /// Input channel.
        input: ChannelId,
        /// Timer parameters.
        config: timer::Config,
    },
    /// PID controller over setpoint/measurement channels.
    Pid {
        /// Setpoint channel.
        setpoint: ChannelId,
        /// Measurement channel.
        measurement: ChannelId,
        /// Controller parameters.
        config: pid::Config,
    },
    /// Signal filter over one input channel.
    Filter {
        /// Input channel.
        input: ChannelId,
        /// Filter selection.
        kind: FilterKind,
    },
    /// Latch/flip-flop over up to three input channels.
    FlipFlop {
        /// Latch selection.
        kind: FlipFlopKind,
        /// First input (S, D, T, J).
        a: ChannelId,
        /// Second input (R, clock/enable, K).
        b: ChannelId,
        /// Clock input for three-input variants.
        c: ChannelId,
    },
    /// Two-threshold comparator.
    Hysteresis {
        /// Input channel.
        input: ChannelId,
        /// Thresholds.
        config: hysteresis::Config,
    },
    /// Window comparator.
    Window {
        /// Input channel.
        input: ChannelId,
        /// Window and hysteresis.
        config: hysteresis::WindowConfig,
    },
    /// Multi-level comparator.
    MultiLevel {
        /// Input channel.
        input: ChannelId,
        /// Level table.
        levels: MultiLevel,
    },
}

#[derive(Debug)]
enum BlockState {
    Stateless,
    Counter(counter::State),
    Timer(timer::State),
    Pid(pid::State),
    Sma(Sma),
    Ema(Ema),
    LowPass(LowPass),
    Median(Median),
    RateLimit(RateLimit),
    Debounce(Debounce),
    FlipFlop(flipflop::State),
    Hysteresis(hysteresis::State),
    MultiLevel(MultiLevel),
}

impl BlockState {
    fn for_config(config: &BlockConfig) -> Self {
        match config {
            BlockConfig::Counter { .. } => Self::Counter(counter::State::new()),
            BlockConfig::Timer { .. } => Self::Timer(timer::State::new()),
            BlockConfig::Pid { .. } => Self::Pid(pid::State::new()),
            BlockConfig::Filter { kind, .. } => match kind {
                FilterKind::Sma(window) => Self::Sma(Sma::new(*window)),
                FilterKind::Ema(_) => Self::Ema(Ema::new()),
                FilterKind::LowPass(_) => Self::LowPass(LowPass::new()),
                FilterKind::Median(window) => Self::Median(Median::new(*window)),
                FilterKind::RateLimit(..) => Self::RateLimit(RateLimit::new()),
                FilterKind::Debounce(_) => Self::Debounce(Debounce::new()),
            },
            BlockConfig::FlipFlop { .. } => Self::FlipFlop(flipflop::State::new()),
            BlockConfig::Hysteresis { .. } | BlockConfig::Window { .. } => {
                Self::Hysteresis(hysteresis::State::new())
            }
            BlockConfig::MultiLevel { levels, .. } => Self::MultiLevel(levels.clone()),
            _ => Self::Stateless,
        }
    }
}

struct Node {
    id: ChannelId,
    config: BlockConfig,
    state: BlockState,
    enabled: bool,
    fault_count: u16,
}

/// A link routing a source channel's value into an output channel.
#[derive(Debug, Copy, Clone)]
pub struct OutputLink {
    /// Destination output channel (ids 100..=133).
    pub output: ChannelId,
    /// Source channel.
    pub source: ChannelId,
    /// Hardware index recorded for diagnostics.
    pub hw_index: u8,
}

/// Executor health counters, read by the supervisor.
#[derive(Debug, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Metrics {
    /// Completed tick count.
    pub exec_count: u32,
    /// Duration of the most recent tick in microseconds.
    pub last_exec_us: u32,
}

/// Executor configuration and node failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExecutorError {
    /// The node table is full.
    Full,
    /// A node with this id already exists.
    DuplicateId,
    /// No node with this id.
    NotFound,
    /// Registration in the registry failed.
    Registry(RegistryError),
}

impl From<RegistryError> for ExecutorError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

/// The channel executor.
pub struct Executor {
    nodes: Vec<Node, NODES_MAX>,
    links: Vec<OutputLink, LINKS_MAX>,
    metrics: Metrics,
    last_tick_ms: u32,
    ticked: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// An executor with no nodes.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            metrics: Metrics::default(),
            last_tick_ms: 0,
            ticked: false,
        }
    }

    /// Register a node under `id` and create its registry channel.
    pub fn add_channel<const CAP: usize>(
        &mut self,
        id: ChannelId,
        config: BlockConfig,
        registry: &mut Registry<CAP>,
    ) -> Result<(), ExecutorError> {
        if self.nodes.iter().any(|n| n.id == id) {
            return Err(ExecutorError::DuplicateId);
        }
        let kind = id.kind().ok_or(ExecutorError::Registry(RegistryError::OutOfRange))?;
        let format = match &config {
            BlockConfig::Logic { .. }
            | BlockConfig::FlipFlop { .. }
            | BlockConfig::Hysteresis { .. }
            | BlockConfig::Window { .. }
            | BlockConfig::Timer { .. } => ValueFormat::Bool,
            _ => ValueFormat::Signed,
        };
        registry.register(id, Record::new(kind, Direction::Input, format))?;
        let state = BlockState::for_config(&config);
        if self
            .nodes
            .push(Node {
                id,
                config,
                state,
                enabled: true,
                fault_count: 0,
            })
            .is_err()
        {
            let _ = registry.unregister(id);
            return Err(ExecutorError::Full);
        }
        Ok(())
    }

    /// Route `source` into `output` every tick.
    pub fn add_output_link(
        &mut self,
        output: ChannelId,
        source: ChannelId,
        hw_index: u8,
    ) -> Result<(), ExecutorError> {
        self.links
            .push(OutputLink {
                output,
                source,
                hw_index,
            })
            .map_err(|_| ExecutorError::Full)
    }

    /// Remove one node and its registry channel.
    pub fn remove_channel<const CAP: usize>(
        &mut self,
        id: ChannelId,
        registry: &mut Registry<CAP>,
    ) -> Result<(), ExecutorError> {
        let at = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or(ExecutorError::NotFound)?;
        self.nodes.remove(at);
        let _ = registry.unregister(id);
        Ok(())
    }

    /// Remove every node and link, unregistering their channels.
    pub fn clear<const CAP: usize>(&mut self, registry: &mut Registry<CAP>) {
        for node in self.nodes.iter() {
            let _ = registry.unregister(node.id);
        }
        self.nodes.clear();
        self.links.clear();
        self.ticked = false;
    }

    /// Enable or disable one node; disabled nodes are skipped entirely.
    pub fn set_enabled(&mut self, id: ChannelId, enabled: bool) -> Result<(), ExecutorError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(ExecutorError::NotFound)?;
        node.enabled = enabled;
        Ok(())
    }

    /// Reinitialise one node's runtime state.
    pub fn reset(&mut self, id: ChannelId) -> Result<(), ExecutorError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(ExecutorError::NotFound)?;
        node.state = BlockState::for_config(&node.config);
        Ok(())
    }

    /// Number of configured nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Accumulated write-failure count of one node.
    pub fn fault_count(&self, id: ChannelId) -> Option<u16> {
        self.nodes.iter().find(|n| n.id == id).map(|n| n.fault_count)
    }

    /// Health counters.
    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    /// Configured output links.
    pub fn links(&self) -> &[OutputLink] {
        &self.links
    }

    /// Run one executor tick: evaluate every enabled node in registration
    /// order, then route the output links.
    pub fn tick<const CAP: usize>(&mut self, registry: &mut Registry<CAP>, clock: &impl Clock) {
        let started_us = clock.now_us();
        let now_ms = clock.now_ms();
        let dt_ms = if self.ticked {
            now_ms.wrapping_sub(self.last_tick_ms)
        } else {
            0
        };
        self.last_tick_ms = now_ms;
        self.ticked = true;

        for node in self.nodes.iter_mut() {
            if !node.enabled {
                continue;
            }
            let value = evaluate(&node.config, &mut node.state, registry, dt_ms);
            if registry.set_value(node.id, value).is_err() {
                node.fault_count = node.fault_count.saturating_add(1);
            }
        }

        for link in self.links.iter() {
            let value = registry.get_value(link.source);
            let _ = registry.set_value(link.output, value);
        }

        self.metrics.exec_count = self.metrics.exec_count.wrapping_add(1);
        self.metrics.last_exec_us = clock.now_us().wrapping_sub(started_us);
    }
}

fn gather<const CAP: usize>(
    registry: &Registry<CAP>,
    ids: &[ChannelId],
    buf: &mut [i32; INPUTS_MAX],
) -> usize {
    let len = ids.len().min(INPUTS_MAX);
    for (slot, id) in buf.iter_mut().zip(ids.iter()) {
        *slot = registry.get_value(*id);
    }
    len
}

fn evaluate<const CAP: usize>(
    config: &BlockConfig,
    state: &mut BlockState,
    registry: &Registry<CAP>,
    dt_ms: u32,
) -> i32 {
    let mut scratch = [0i32; INPUTS_MAX];
    match (config, state) {
        (BlockConfig::Constant(value), _) => *value,
        (BlockConfig::Logic { op, inputs }, _) => {
            let len = gather(registry, inputs, &mut scratch);
            logic::evaluate(*op, &scratch[..len])
        }
        (BlockConfig::Math { op, inputs }, _) => {
            let len = gather(registry, inputs, &mut scratch);
            math::evaluate(*op, &scratch[..len])
        }
        (BlockConfig::Table2d { input, table }, _) => table.lookup(registry.get_value(*input)),
        (BlockConfig::Table3d { x, y, table }, _) => {
            table.lookup(registry.get_value(*x), registry.get_value(*y))
        }
        (BlockConfig::Switch(config), _) => evaluate_switch(config, registry, &mut scratch),
        (
            BlockConfig::Counter {
                inc,
                dec,
                reset,
                config,
            },
            BlockState::Counter(state),
        ) => counter::update(
            state,
            config,
            registry.get_value(*inc),
            registry.get_value(*dec),
            registry.get_value(*reset),
        ),
        (BlockConfig::Timer { input, config }, BlockState::Timer(state)) => {
            timer::update(state, config, registry.get_value(*input), dt_ms)
        }
        (
            BlockConfig::Pid {
                setpoint,
                measurement,
                config,
            },
            BlockState::Pid(state),
        ) => pid::update(
            state,
            config,
            registry.get_value(*setpoint),
            registry.get_value(*measurement),
            dt_ms,
        ),
        (BlockConfig::Filter { input, kind }, state) => {
            let sample = registry.get_value(*input);
            match (kind, state) {
                (FilterKind::Sma(_), BlockState::Sma(filter)) => filter.update(sample),
                (FilterKind::Ema(alpha), BlockState::Ema(filter)) => filter.update(*alpha, sample),
                (FilterKind::LowPass(tau), BlockState::LowPass(filter)) => {
                    filter.update(*tau, sample, dt_ms)
                }
                (FilterKind::Median(_), BlockState::Median(filter)) => filter.update(sample),
                (FilterKind::RateLimit(rise, fall), BlockState::RateLimit(filter)) => {
                    filter.update(*rise, *fall, sample, dt_ms)
                }
                (FilterKind::Debounce(config), BlockState::Debounce(filter)) => {
                    filter.update(config, sample, dt_ms)
                }
                _ => 0,
            }
        }
        (BlockConfig::FlipFlop { kind, a, b, c }, BlockState::FlipFlop(state)) => {
            let (a, b, c) = (
                registry.get_value(*a),
                registry.get_value(*b),
                registry.get_value(*c),
            );
            match kind {
                FlipFlopKind::Sr => flipflop::sr_latch(state, a, b),
                FlipFlopKind::D => flipflop::d_flip_flop(state, a, b),
                FlipFlopKind::DLatch => flipflop::d_latch(state, a, b),
                FlipFlopKind::T => flipflop::t_flip_flop(state, a, b),
                FlipFlopKind::Jk => flipflop::jk_flip_flop(state, a, b, c),
            }
        }
        (BlockConfig::Hysteresis { input, config }, BlockState::Hysteresis(state)) => {
            hysteresis::update(state, config, registry.get_value(*input))
        }
        (BlockConfig::Window { input, config }, BlockState::Hysteresis(state)) => {
            hysteresis::window_update(state, config, registry.get_value(*input))
        }
        (BlockConfig::MultiLevel { input, .. }, BlockState::MultiLevel(levels)) => {
            levels.update(registry.get_value(*input))
        }
        // Mismatched config/state pairing cannot happen through the public
        // API; degrade to the defined fallback.
        _ => 0,
    }
}

fn evaluate_switch<const CAP: usize>(
    config: &SwitchConfig,
    registry: &Registry<CAP>,
    scratch: &mut [i32; INPUTS_MAX],
) -> i32 {
    match config {
        SwitchConfig::Select { index, inputs } => {
            let len = gather(registry, inputs, scratch);
            switch::select(&scratch[..len], registry.get_value(*index))
        }
        SwitchConfig::Case {
            input,
            cases,
            default,
        } => switch::case(registry.get_value(*input), cases, *default),
        SwitchConfig::RangeCase {
            input,
            thresholds,
            outputs,
        } => switch::range_case(registry.get_value(*input), thresholds, outputs),
        SwitchConfig::Ternary {
            condition,
            if_true,
            if_false,
        } => switch::ternary(
            registry.get_value(*condition),
            registry.get_value(*if_true),
            registry.get_value(*if_false),
        ),
        SwitchConfig::Priority { inputs } => {
            let len = gather(registry, inputs, scratch);
            switch::priority(&scratch[..len])
        }
    }
}
