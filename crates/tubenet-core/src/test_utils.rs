//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::config::NetworkConfig;
use crate::device::{
    Device, DeviceArena, DeviceFactory, ProbeData, ProbeDataProvider, TopologyListener,
    TransferEndpoint,
};
use crate::engine::{Engine, Placement};
use crate::event::EventBus;
use crate::id::{DeviceId, DimensionId, ItemTypeId, NetworkId};
use crate::item::{ItemStack, SlotBuffer};
use crate::network::{NetworkContext, WorldNetwork};
use crate::node::{Node, NodeKey};
use crate::pathing::{DestinationSet, NetworkView};
use crate::position::{Face, FaceSet, Position};
use crate::registry::DimensionPositions;
use crate::traveller::Traveller;
use serde::{Deserialize, Serialize};
use std::any::Any;

// ===========================================================================
// Items
// ===========================================================================

pub fn ore(quantity: u32) -> ItemStack {
    ItemStack::new(ItemTypeId(10), quantity)
}

pub fn ingot(quantity: u32) -> ItemStack {
    ItemStack::new(ItemTypeId(20), quantity)
}

// ===========================================================================
// Devices
// ===========================================================================

/// Persisted form of the test devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestDeviceData {
    Chest { face: Face, buffer: SlotBuffer },
    Entry { face: Face },
    Retriever { face: Option<Face>, limit: usize },
}

fn encode(data: &TestDeviceData) -> Vec<u8> {
    bitcode::serialize(data).unwrap_or_default()
}

/// A storage endpoint open on one face. Takes any traveller arriving
/// through that face while it has room.
#[derive(Debug, Clone)]
pub struct Chest {
    pub face: Face,
    pub buffer: SlotBuffer,
}

impl Chest {
    pub fn facing(face: Face) -> Self {
        Self::with_buffer(face, SlotBuffer::new(9, 64))
    }

    pub fn with_buffer(face: Face, buffer: SlotBuffer) -> Self {
        Self { face, buffer }
    }

    pub fn total(&self) -> u32 {
        self.buffer.total()
    }
}

impl Device for Chest {
    fn create_node(&self, network: Option<NetworkId>, position: Position) -> Node {
        Node {
            network,
            ..Node::endpoint(position, Some(self.face), FaceSet::only(self.face))
        }
    }

    fn can_connect_to(&self, face: Face) -> bool {
        face == self.face
    }

    fn can_accept_traveller(&self, _traveller: &Traveller, from: Face) -> bool {
        from == self.face && self.buffer.has_space()
    }

    fn accept_traveller(&mut self, traveller: &Traveller, _from: Face) -> ItemStack {
        self.buffer.insert(traveller.stack.clone())
    }

    fn transfer_faces(&self) -> FaceSet {
        FaceSet::only(self.face)
    }

    fn as_transfer(&mut self) -> Option<&mut dyn TransferEndpoint> {
        Some(self)
    }

    fn as_probe(&self) -> Option<&dyn ProbeDataProvider> {
        Some(self)
    }

    fn serialize_data(&self) -> Vec<u8> {
        encode(&TestDeviceData::Chest {
            face: self.face,
            buffer: self.buffer.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl TransferEndpoint for Chest {
    fn insert(&mut self, face: Face, stack: ItemStack, simulate: bool) -> ItemStack {
        if face != self.face {
            return stack;
        }
        if simulate {
            return self.buffer.clone().insert(stack);
        }
        self.buffer.insert(stack)
    }

    fn extract(&mut self, face: Face, max: u32, simulate: bool) -> Option<ItemStack> {
        if face != self.face {
            return None;
        }
        if simulate {
            return self.buffer.clone().extract_first(max);
        }
        self.buffer.extract_first(max)
    }
}

impl ProbeDataProvider for Chest {
    fn provide_probe_data(&self, data: &mut Vec<ProbeData>) {
        data.push(ProbeData {
            label: format!("chest: {} items", self.total()),
            stacks: self.buffer.stacks().cloned().collect(),
        });
    }
}

/// An entry point pushing payloads out through one face.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub face: Face,
}

impl Device for Entry {
    fn create_node(&self, network: Option<NetworkId>, position: Position) -> Node {
        Node {
            network,
            ..Node::endpoint(position, Some(self.face), FaceSet::only(self.face))
        }
    }

    fn can_connect_to(&self, face: Face) -> bool {
        face == self.face
    }

    fn serialize_data(&self) -> Vec<u8> {
        encode(&TestDeviceData::Entry { face: self.face })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A routing source that keeps the transfer endpoints around it up to date
/// from topology notifications.
#[derive(Debug, Clone, Default)]
pub struct Retriever {
    pub face: Option<Face>,
    /// Own cap on discovered positions; the configured cap still applies.
    pub limit: usize,
    pub destinations: DestinationSet,
    pub added: usize,
    pub removed: usize,
}

impl Retriever {
    pub fn facing(face: Face) -> Self {
        Self {
            face: Some(face),
            limit: NetworkConfig::default().discovery_limit,
            ..Self::default()
        }
    }
}

impl Device for Retriever {
    fn create_node(&self, network: Option<NetworkId>, position: Position) -> Node {
        let connects = self.face.map_or(FaceSet::all(), FaceSet::only);
        Node {
            network,
            ..Node::endpoint(position, self.face, connects)
        }
    }

    fn can_connect_to(&self, face: Face) -> bool {
        self.face.is_none_or(|f| f == face)
    }

    fn listen_to_network_change(&self) -> bool {
        true
    }

    fn as_listener(&mut self) -> Option<&mut dyn TopologyListener> {
        Some(self)
    }

    fn serialize_data(&self) -> Vec<u8> {
        encode(&TestDeviceData::Retriever {
            face: self.face,
            limit: self.limit,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl TopologyListener for Retriever {
    fn on_node_added(&mut self, this: &Node, added: &Node, view: &NetworkView<'_>) {
        self.added += 1;
        let limit = self.limit.min(view.discovery_limit());
        self.destinations.on_node_added(this, added, view, limit);
    }

    fn on_node_removed(&mut self, _this: &Node, removed: &Node) {
        self.removed += 1;
        self.destinations.on_node_removed(removed);
    }
}

/// Rebuilds the test devices from their persisted data.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestFactory;

impl DeviceFactory for TestFactory {
    fn create(
        &mut self,
        _position: Position,
        _face: Option<Face>,
        data: &[u8],
    ) -> Option<Box<dyn Device>> {
        let data: TestDeviceData = bitcode::deserialize(data).ok()?;
        let device: Box<dyn Device> = match data {
            TestDeviceData::Chest { face, buffer } => Box::new(Chest::with_buffer(face, buffer)),
            TestDeviceData::Entry { face } => Box::new(Entry { face }),
            TestDeviceData::Retriever { face, limit } => Box::new(Retriever {
                face,
                limit,
                ..Retriever::default()
            }),
        };
        Some(device)
    }
}

// ===========================================================================
// Fixtures
// ===========================================================================

/// The shared state of one dimension, for driving a network directly.
#[derive(Debug, Default)]
pub struct Fixture {
    pub positions: DimensionPositions,
    pub devices: DeviceArena,
    pub events: EventBus,
    pub config: NetworkConfig,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ctx(&mut self) -> NetworkContext<'_> {
        NetworkContext {
            positions: &mut self.positions,
            devices: &mut self.devices,
            events: &mut self.events,
            config: &self.config,
        }
    }
}

/// Entry at x = 0 facing east, `tubes` tubes, then a chest facing west.
/// Returns the entry key and the chest's device id.
pub fn line(fx: &mut Fixture, network: &mut WorldNetwork, tubes: i32) -> (NodeKey, DeviceId) {
    let mut ctx = fx.ctx();
    let (_, entry) = ctx
        .devices
        .attach(Box::new(Entry { face: Face::East }), Position::new(0, 0, 0));
    let entry = network.register_node(&mut ctx, entry);
    for x in 1..=tubes {
        network.register_node(&mut ctx, Node::pass_through(Position::new(x, 0, 0)));
    }
    let (chest, node) = ctx
        .devices
        .attach(Box::new(Chest::facing(Face::West)), Position::new(tubes + 1, 0, 0));
    network.register_node(&mut ctx, node);
    (entry, chest)
}

pub fn tube_at(engine: &mut Engine, dimension: DimensionId, x: i32, z: i32) -> Placement {
    engine.place_node(dimension, Node::pass_through(Position::new(x, 0, z)))
}

/// [`line`] built through engine placement. Returns the entry key and the
/// chest position.
pub fn east_line(engine: &mut Engine, dimension: DimensionId, tubes: i32) -> (NodeKey, Position) {
    let entry = engine.place_device(
        dimension,
        Position::new(0, 0, 0),
        Box::new(Entry { face: Face::East }),
    );
    for x in 1..=tubes {
        tube_at(engine, dimension, x, 0);
    }
    let chest = Position::new(tubes + 1, 0, 0);
    engine.place_device(dimension, chest, Box::new(Chest::facing(Face::West)));
    (entry.node, chest)
}
