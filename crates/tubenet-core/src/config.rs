//! Engine configuration.
//!
//! Every field has a default, so a config file only needs to mention what it
//! changes. Files are loaded by the `tubenet-data` crate.

use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::item::SlotBuffer;
use serde::{Deserialize, Serialize};

/// Tunables for topology maintenance and traveller routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum number of distinct destination positions a routing source
    /// discovers per search.
    pub discovery_limit: usize,
    /// Path steps a traveller advances per update. One hop is taken per
    /// whole unit of accumulated progress.
    pub traveller_speed: f64,
    /// Slots in an entry device's overflow buffer.
    pub entry_buffer_slots: usize,
    /// Maximum items per buffer slot.
    pub slot_limit: u32,
    /// Run split detection after every node removal.
    pub validate_on_removal: bool,
}

impl NetworkConfig {
    /// Traveller speed as a fixed-point step.
    pub fn speed(&self) -> Fixed64 {
        f64_to_fixed64(self.traveller_speed)
    }

    /// An empty overflow buffer sized for an entry device.
    pub fn entry_buffer(&self) -> SlotBuffer {
        SlotBuffer::new(self.entry_buffer_slots, self.slot_limit)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_limit: 6,
            traveller_speed: 1.0,
            entry_buffer_slots: 9,
            slot_limit: 64,
            validate_on_removal: true,
        }
    }
}
