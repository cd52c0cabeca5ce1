//! Channel identities and the central value registry.
//!
//! Every input, output and computational block in the system is addressable
//! through a stable 16-bit [`ChannelId`]. The id space is partitioned into
//! fixed ranges shared with the host configuration tool, so ids travel over
//! the wire without translation. The [`Registry`] is the single shared store
//! the executor, codecs, drivers and transport read and write each tick.

use heapless::String;

use bitfield::bitfield;

/// Maximum length of a channel name kept for diagnostics.
pub const NAME_LEN: usize = 24;

/// Stable 16-bit channel identity.
///
/// `ChannelId(0)` is the reserved "unbound" sentinel: reading it yields 0 and
/// it can never be registered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelId(pub u16);

/// The sentinel id for an unconnected input reference.
pub const UNBOUND: ChannelId = ChannelId(0);

/// Battery voltage in millivolts, written by the supervisor.
pub const BATTERY_VOLTAGE: ChannelId = ChannelId(1000);
/// Total output current in milliamps, written by the supervisor.
pub const TOTAL_CURRENT: ChannelId = ChannelId(1001);
/// MCU die temperature in millidegrees Celsius.
pub const MCU_TEMPERATURE: ChannelId = ChannelId(1002);
/// Board temperature in millidegrees Celsius.
pub const BOARD_TEMPERATURE: ChannelId = ChannelId(1003);
/// Uptime in whole seconds.
pub const UPTIME_SECONDS: ChannelId = ChannelId(1004);
/// Aggregated supervisor fault mask, written by the supervisor.
pub const FAULT_MASK: ChannelId = ChannelId(1005);

/// What a channel id addresses, derived from its range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelKind {
    /// ADC input, ids 0..=19.
    AnalogInput,
    /// Debounced digital input, ids 50..=69.
    DigitalInput,
    /// High-side power output, ids 100..=129.
    PowerOutput,
    /// H-bridge, ids 130..=133.
    HBridge,
    /// CAN RX signal, ids 200..=299.
    CanRxSignal,
    /// CAN TX signal, ids 300..=399.
    CanTxSignal,
    /// Logic block, ids 400..=499.
    Logic,
    /// Number/math block, ids 500..=599.
    Number,
    /// Timer block, ids 600..=699.
    Timer,
    /// Filter block, ids 700..=799.
    Filter,
    /// Switch/selector block, ids 800..=899.
    Switch,
    /// PID controller, ids 900..=915.
    Pid,
    /// User-defined channel, ids 1000 and up (1000..=1023 are reserved for
    /// the pre-registered system channels).
    User,
}

impl ChannelId {
    /// Range-derived kind of this id, or `None` for ids in one of the gaps
    /// between the fixed ranges (including the unbound sentinel).
    pub fn kind(self) -> Option<ChannelKind> {
        match self.0 {
            0 => None,
            1..=19 => Some(ChannelKind::AnalogInput),
            50..=69 => Some(ChannelKind::DigitalInput),
            100..=129 => Some(ChannelKind::PowerOutput),
            130..=133 => Some(ChannelKind::HBridge),
            200..=299 => Some(ChannelKind::CanRxSignal),
            300..=399 => Some(ChannelKind::CanTxSignal),
            400..=499 => Some(ChannelKind::Logic),
            500..=599 => Some(ChannelKind::Number),
            600..=699 => Some(ChannelKind::Timer),
            700..=799 => Some(ChannelKind::Filter),
            800..=899 => Some(ChannelKind::Switch),
            900..=915 => Some(ChannelKind::Pid),
            1000.. => Some(ChannelKind::User),
            _ => None,
        }
    }

    /// Index within the id's range (ADC index, output index, allocation
    /// order, ...). `None` when [`Self::kind`] is `None`.
    pub fn index(self) -> Option<usize> {
        let base = match self.kind()? {
            ChannelKind::AnalogInput => 0,
            ChannelKind::DigitalInput => 50,
            ChannelKind::PowerOutput => 100,
            ChannelKind::HBridge => 130,
            ChannelKind::CanRxSignal => 200,
            ChannelKind::CanTxSignal => 300,
            ChannelKind::Logic => 400,
            ChannelKind::Number => 500,
            ChannelKind::Timer => 600,
            ChannelKind::Filter => 700,
            ChannelKind::Switch => 800,
            ChannelKind::Pid => 900,
            ChannelKind::User => 1000,
        };
        Some(usize::from(self.0) - base)
    }

    /// `true` for the reserved unbound sentinel.
    pub fn is_unbound(self) -> bool {
        self.0 == 0
    }
}

impl From<u16> for ChannelId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// Data flow direction of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Written by a producer (acquisition, CAN RX, block output).
    #[default]
    Input,
    /// Read by a consumer that drives hardware or the bus.
    Output,
    /// Both readable and writable from remote tooling.
    Bidir,
}

/// Interpretation of the stored integer value.
///
/// Values are always `i32`; fractional quantities carry a declared scale via
/// [`Record::decimal_places`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueFormat {
    /// Unscaled raw counts.
    #[default]
    Raw,
    /// Percent, usually scaled ×10.
    Percent,
    /// Millivolts.
    Millivolt,
    /// Milliamps.
    Milliamp,
    /// 0 or 1.
    Bool,
    /// Enumerated selector value.
    Enum,
    /// Signed engineering value with `decimal_places` scaling.
    Signed,
}

bitfield! {
    /// Per-channel status and behaviour flags.
    #[derive(Copy, Clone, Default)]
    pub struct Flags(u8);
    impl Debug;
    /// Channel participates in execution; disabled channels reject writes.
    pub enabled, set_enabled: 0;
    /// Logical inversion for `Bool`-format channels.
    pub inverted, set_inverted: 1;
    /// Latched fault indication.
    pub fault, set_fault: 2;
    /// Value is being forced by a remote override (SET_OUTPUT).
    pub overridden, set_overridden: 3;
    /// Raise the fault flag when a write had to be clamped.
    pub fault_on_clamp, set_fault_on_clamp: 4;
}

/// One live channel: value, limits, flags and diagnostic metadata.
#[derive(Debug, Clone)]
pub struct Record {
    /// Range-consistent kind; checked at registration.
    pub kind: ChannelKind,
    /// Data flow direction.
    pub direction: Direction,
    /// Interpretation of `value`.
    pub format: ValueFormat,
    value: i32,
    /// Lower clamp bound.
    pub min: i32,
    /// Upper clamp bound.
    pub max: i32,
    /// Number of implied decimal places on `value`.
    pub decimal_places: u8,
    /// Status and behaviour flags.
    pub flags: Flags,
    /// Diagnostic name; lookups use the first match.
    pub name: String<NAME_LEN>,
}

impl Record {
    /// A full-range, enabled record with a zero value.
    pub fn new(kind: ChannelKind, direction: Direction, format: ValueFormat) -> Self {
        let mut flags = Flags::default();
        flags.set_enabled(true);
        Self {
            kind,
            direction,
            format,
            value: 0,
            min: i32::MIN,
            max: i32::MAX,
            decimal_places: 0,
            flags,
            name: String::new(),
        }
    }

    /// Same record with the clamp bounds replaced.
    pub fn with_bounds(mut self, min: i32, max: i32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Same record with the diagnostic name replaced (truncated to fit).
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = truncate_name(name);
        self
    }

    /// Current value.
    pub fn value(&self) -> i32 {
        self.value
    }
}

/// Copy `name` into a bounded diagnostic string, truncating on a character
/// boundary if it does not fit.
pub fn truncate_name(name: &str) -> String<NAME_LEN> {
    let mut out = String::new();
    for ch in name.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Registry operation failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// The id is the unbound sentinel or falls in a reserved gap.
    OutOfRange,
    /// The id is already registered.
    DuplicateId,
    /// The record's kind does not match the id's range.
    KindMismatch,
    /// No live channel with this id.
    NotFound,
    /// The channel exists but is disabled.
    Disabled,
    /// The registry is at capacity.
    Full,
}

struct Entry {
    id: u16,
    record: Record,
}

/// Central `ChannelId` → [`Record`] store.
///
/// Entries are kept sorted by id; reads are a binary search. All main-loop
/// code shares one registry without synchronisation (see the concurrency
/// model: ISRs never touch it).
pub struct Registry<const CAP: usize = 512> {
    entries: heapless::Vec<Entry, CAP>,
}

impl<const CAP: usize> Default for Registry<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> Registry<CAP> {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Pre-register the system channels (ids 1000..=1004).
    ///
    /// Idempotent: already-present ids are left untouched.
    pub fn register_system_channels(&mut self) {
        let system: [(ChannelId, ValueFormat, &str); 6] = [
            (BATTERY_VOLTAGE, ValueFormat::Millivolt, "battery_voltage"),
            (TOTAL_CURRENT, ValueFormat::Milliamp, "total_current"),
            (MCU_TEMPERATURE, ValueFormat::Signed, "mcu_temperature"),
            (BOARD_TEMPERATURE, ValueFormat::Signed, "board_temperature"),
            (UPTIME_SECONDS, ValueFormat::Raw, "uptime_seconds"),
            (FAULT_MASK, ValueFormat::Enum, "fault_mask"),
        ];
        for (id, format, name) in system {
            let record =
                Record::new(ChannelKind::User, Direction::Input, format).with_name(name);
            let _ = self.register(id, record);
        }
    }

    fn position(&self, id: ChannelId) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&id.0, |e| e.id)
    }

    /// Register `record` under `id`.
    pub fn register(&mut self, id: ChannelId, record: Record) -> Result<(), RegistryError> {
        let kind = id.kind().ok_or(RegistryError::OutOfRange)?;
        if kind != record.kind {
            return Err(RegistryError::KindMismatch);
        }
        match self.position(id) {
            Ok(_) => Err(RegistryError::DuplicateId),
            Err(at) => self
                .entries
                .insert(at, Entry { id: id.0, record })
                .map_err(|_| RegistryError::Full),
        }
    }

    /// Remove the channel with this id.
    pub fn unregister(&mut self, id: ChannelId) -> Result<(), RegistryError> {
        let at = self.position(id).map_err(|_| RegistryError::NotFound)?;
        self.entries.remove(at);
        Ok(())
    }

    /// Remove every channel, system ids included.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Current value of `id`; 0 for unknown or unbound ids. Never faults.
    pub fn get_value(&self, id: ChannelId) -> i32 {
        match self.position(id) {
            Ok(at) => self.entries[at].record.value,
            Err(_) => 0,
        }
    }

    /// Write a value, clamping into `[min, max]` and honouring the
    /// `inverted` flag on `Bool`-format channels.
    ///
    /// A clamped write raises the fault flag when the record asks for it
    /// (`fault_on_clamp`); the write itself still succeeds with the clamped
    /// value, upholding the `min ≤ value ≤ max` invariant.
    pub fn set_value(&mut self, id: ChannelId, value: i32) -> Result<(), RegistryError> {
        let at = self.position(id).map_err(|_| RegistryError::NotFound)?;
        let record = &mut self.entries[at].record;
        if !record.flags.enabled() {
            return Err(RegistryError::Disabled);
        }
        let mut value = if record.format == ValueFormat::Bool && record.flags.inverted() {
            i32::from(value == 0)
        } else {
            value
        };
        if value < record.min || value > record.max {
            value = value.clamp(record.min, record.max);
            if record.flags.fault_on_clamp() {
                record.flags.set_fault(true);
            }
        }
        record.value = value;
        Ok(())
    }

    /// Latch or clear the fault flag without altering the value.
    pub fn set_fault(&mut self, id: ChannelId, fault: bool) -> Result<(), RegistryError> {
        let at = self.position(id).map_err(|_| RegistryError::NotFound)?;
        self.entries[at].record.flags.set_fault(fault);
        Ok(())
    }

    /// Shared access to a channel record.
    pub fn get_info(&self, id: ChannelId) -> Option<&Record> {
        self.position(id).ok().map(|at| &self.entries[at].record)
    }

    /// Exclusive access to a channel record.
    pub fn get_info_mut(&mut self, id: ChannelId) -> Option<&mut Record> {
        match self.position(id) {
            Ok(at) => Some(&mut self.entries[at].record),
            Err(_) => None,
        }
    }

    /// First channel whose name matches, in id order. Duplicate names are
    /// allowed; later ones are shadowed for lookup purposes.
    pub fn find_by_name(&self, name: &str) -> Option<ChannelId> {
        self.entries
            .iter()
            .find(|e| e.record.name.as_str() == name)
            .map(|e| ChannelId(e.id))
    }

    /// Iterate over all live channels in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Record)> {
        self.entries.iter().map(|e| (ChannelId(e.id), &e.record))
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
