//! Versioned binary snapshots of a dimension.
//!
//! A snapshot holds one dimension's [`DatabaseRecord`]: every network with
//! its nodes and travellers, the remap table and the id counters. It is
//! encoded with `bitcode` behind a [`SnapshotHeader`] that is checked
//! before anything is rebuilt.
//!
//! Loading registers nodes immediately. Travellers are restored by each
//! network's first update, so a traveller whose node did not come back is
//! counted and dropped there rather than failing the whole load.

use crate::database::{DatabaseRecord, NetworkDatabase};
use crate::device::DeviceFactory;
use crate::engine::Engine;
use crate::id::DimensionId;
use crate::network::NetworkContext;
use crate::registry::DimensionPositions;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a tubenet dimension snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x7B5E_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("dimension {0:?} already has live networks")]
    DimensionInUse(DimensionId),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot. Enables format detection
/// and version checking before the payload is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Engine tick at the time the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DimensionSnapshot {
    header: SnapshotHeader,
    database: DatabaseRecord,
}

/// Read the header of a snapshot without rebuilding anything.
///
/// bitcode has no partial decoding, so the whole snapshot is decoded.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: DimensionSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Engine entry points
// ---------------------------------------------------------------------------

impl Engine {
    /// Serialize one dimension. An unknown dimension gives an empty snapshot.
    pub fn save_dimension(&self, dimension: DimensionId) -> Result<Vec<u8>, SerializeError> {
        let empty_positions = DimensionPositions::default();
        let positions = self.positions.dimension(dimension).unwrap_or(&empty_positions);
        let database = match self.databases.get(&dimension) {
            Some(database) => database.to_record(positions, &self.devices),
            None => NetworkDatabase::new(dimension).to_record(positions, &self.devices),
        };
        let snapshot = DimensionSnapshot {
            header: SnapshotHeader::new(self.tick),
            database,
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Rebuild a dimension from a snapshot. Devices are recreated through
    /// `factory`. Fails when the dimension already has networks.
    pub fn load_dimension(
        &mut self,
        data: &[u8],
        factory: &mut dyn DeviceFactory,
    ) -> Result<DimensionId, DeserializeError> {
        let snapshot: DimensionSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let dimension = DimensionId(snapshot.database.dimension);
        if self.databases.get(&dimension).is_some_and(|db| !db.is_empty()) {
            return Err(DeserializeError::DimensionInUse(dimension));
        }

        let Engine {
            positions,
            databases,
            devices,
            event_bus,
            config,
            ..
        } = self;
        let mut ctx = NetworkContext {
            positions: positions.dimension_mut(dimension),
            devices,
            events: event_bus,
            config,
        };
        let database = NetworkDatabase::from_record(&snapshot.database, &mut ctx, factory);
        debug!(
            dimension = ?dimension,
            networks = database.len(),
            tick = snapshot.header.tick,
            "dimension loaded"
        );
        databases.insert(dimension, database);
        Ok(dimension)
    }
}
