use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a device in the engine's device arena.
    pub struct DeviceId;
}

/// Identifies a world network. Unique within its dimension's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{:08X}", self.0)
    }
}

/// Identifies a world (dimension). Each dimension has its own database and
/// position pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DimensionId(pub i32);

/// Identity of a traveller. Survives serialization and moves between
/// networks unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TravellerId(pub u64);

/// Identifies an item type carried by travellers. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemTypeId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_ordering_follows_value() {
        assert!(NetworkId(1) < NetworkId(2));
        assert_eq!(NetworkId(7), NetworkId(7));
    }

    #[test]
    fn network_id_display() {
        assert_eq!(NetworkId(255).to_string(), "net#000000FF");
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(TravellerId(0), "first");
        map.insert(TravellerId(1), "second");
        assert_eq!(map[&TravellerId(1)], "second");
    }
}
