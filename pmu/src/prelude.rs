//! Convenience re-export of common members
//!
//! Like the standard library's prelude, this module simplifies importing of
//! common items. Unlike the standard prelude, the contents of this module
//! must be imported manually:
//!
//! ```
//! use pmu::prelude::*;
//! ```

pub use pmu_core::embedded_storage::nor_flash::NorFlash as _;
pub use pmu_core::embedded_storage::nor_flash::ReadNorFlash as _;
pub use pmu_core::AnalogSource as _;
pub use pmu_core::BackupDomain as _;
pub use pmu_core::BridgeStage as _;
pub use pmu_core::CanTx as _;
pub use pmu_core::Clock as _;
pub use pmu_core::DigitalSource as _;
pub use pmu_core::LinPort as _;
pub use pmu_core::PowerStage as _;
pub use pmu_core::StatusLed as _;
pub use pmu_core::SystemControl as _;

pub use crate::transport::Services as _;
