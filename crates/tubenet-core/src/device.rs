//! The device contract and the device arena.
//!
//! Devices are external collaborators (tubes with behaviour, chests,
//! transposers, sorting machines). The network only talks to them through
//! the [`Device`] trait and three optional capabilities:
//!
//! - [`TransferEndpoint`] -- insert/extract keyed by face.
//! - [`TopologyListener`] -- node added/removed notifications.
//! - [`ProbeDataProvider`] -- diagnostic data for inspection tools.
//!
//! Capabilities are resolved once, when the node is created, into the
//! node's [`Capabilities`] record. Devices live in a [`DeviceArena`] and
//! nodes refer to them by [`DeviceId`].

use crate::id::{DeviceId, NetworkId};
use crate::item::ItemStack;
use crate::node::{Capabilities, Node};
use crate::pathing::NetworkView;
use crate::position::{Face, FaceSet, Position};
use crate::traveller::Traveller;
use slotmap::SlotMap;
use std::any::Any;
use std::fmt;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Insert/extract interface exposed on some faces of a device.
pub trait TransferEndpoint {
    /// Insert `stack` through `face`. Returns what could not be inserted.
    /// With `simulate` set, nothing is changed.
    fn insert(&mut self, face: Face, stack: ItemStack, simulate: bool) -> ItemStack;

    /// Extract up to `max` items through `face`.
    fn extract(&mut self, face: Face, max: u32, simulate: bool) -> Option<ItemStack>;
}

/// Receives topology notifications for the network its node belongs to.
///
/// `this` is the listener's own node, `view` the network as it is after the
/// change. Notifications are delivered after the change is applied, so a
/// listener may inspect the network freely.
pub trait TopologyListener {
    fn on_node_added(&mut self, this: &Node, added: &Node, view: &NetworkView<'_>);
    fn on_node_removed(&mut self, this: &Node, removed: &Node);
}

/// One line of diagnostic data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeData {
    pub label: String,
    pub stacks: Vec<ItemStack>,
}

impl ProbeData {
    pub fn text(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stacks: Vec::new(),
        }
    }
}

/// Supplies diagnostic data about a device.
pub trait ProbeDataProvider {
    fn provide_probe_data(&self, data: &mut Vec<ProbeData>);
}

// ---------------------------------------------------------------------------
// Device trait
// ---------------------------------------------------------------------------

/// A device attached to a network node.
///
/// Only `create_node`, `can_connect_to`, `as_any` and `as_any_mut` are
/// required. The rest default to a device that accepts nothing and ignores
/// topology changes.
pub trait Device: fmt::Debug {
    /// Build the node this device contributes at `position`. The node's
    /// device id and capabilities are filled in by the engine.
    fn create_node(&self, network: Option<NetworkId>, position: Position) -> Node;

    /// Whether the device accepts connections arriving on `face`.
    fn can_connect_to(&self, face: Face) -> bool;

    /// Whether a traveller arriving through `from` may end its trip here.
    fn can_accept_traveller(&self, traveller: &Traveller, from: Face) -> bool {
        let _ = (traveller, from);
        false
    }

    /// Take the traveller's payload. Returns whatever was not taken.
    fn accept_traveller(&mut self, traveller: &Traveller, from: Face) -> ItemStack {
        let _ = from;
        traveller.stack.clone()
    }

    fn listen_to_network_change(&self) -> bool {
        false
    }

    /// Faces on which [`Device::as_transfer`] is usable.
    fn transfer_faces(&self) -> FaceSet {
        FaceSet::empty()
    }

    fn as_transfer(&mut self) -> Option<&mut dyn TransferEndpoint> {
        None
    }

    fn as_listener(&mut self) -> Option<&mut dyn TopologyListener> {
        None
    }

    fn as_probe(&self) -> Option<&dyn ProbeDataProvider> {
        None
    }

    /// Device-specific persisted data. Stored instead of raw node data.
    fn serialize_data(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Downcast to `&dyn Any` for type-safe access to concrete device types.
    fn as_any(&self) -> &dyn Any;

    /// Downcast to `&mut dyn Any` for type-safe mutable access.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Rebuilds devices from persisted node data.
pub trait DeviceFactory {
    /// Return `None` to skip the node (unknown or corrupt device data).
    fn create(
        &mut self,
        position: Position,
        face: Option<Face>,
        data: &[u8],
    ) -> Option<Box<dyn Device>>;
}

/// Resolve a device's capabilities into the record stored on its node.
pub fn resolve_capabilities(device: &dyn Device) -> Capabilities {
    Capabilities {
        transfer: device.transfer_faces(),
        listener: device.listen_to_network_change(),
        probe: device.as_probe().is_some(),
    }
}

// ---------------------------------------------------------------------------
// DeviceArena
// ---------------------------------------------------------------------------

/// Owns every device. Nodes hold [`DeviceId`]s into this arena.
#[derive(Debug, Default)]
pub struct DeviceArena {
    devices: SlotMap<DeviceId, Box<dyn Device>>,
}

impl DeviceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.devices.insert(device)
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.devices.remove(id)
    }

    pub fn get(&self, id: DeviceId) -> Option<&dyn Device> {
        self.devices.get(id).map(|d| d.as_ref())
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.devices.get_mut(id).map(|d| d.as_mut())
    }

    /// Downcast a device to its concrete type.
    pub fn downcast<T: 'static>(&self, id: DeviceId) -> Option<&T> {
        self.get(id)?.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: 'static>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.get_mut(id)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Build a node for `device`, store the device and link the two.
    pub fn attach(&mut self, device: Box<dyn Device>, position: Position) -> (DeviceId, Node) {
        let mut node = device.create_node(None, position);
        node.capabilities = resolve_capabilities(device.as_ref());
        node.connects = FaceSet::from_fn(|f| device.can_connect_to(f));
        let id = self.devices.insert(device);
        node.device = Some(id);
        (id, node)
    }

    pub(crate) fn notify_added(&mut self, listener: &Node, added: &Node, view: &NetworkView<'_>) {
        if let Some(l) = listener
            .device
            .and_then(|id| self.devices.get_mut(id))
            .and_then(|d| d.as_listener())
        {
            l.on_node_added(listener, added, view);
        }
    }

    pub(crate) fn notify_removed(&mut self, listener: &Node, removed: &Node) {
        if let Some(l) = listener
            .device
            .and_then(|id| self.devices.get_mut(id))
            .and_then(|d| d.as_listener())
        {
            l.on_node_removed(listener, removed);
        }
    }

    /// Whether the device behind `node` will take `traveller` through `from`.
    pub fn accepts(&self, node: &Node, traveller: &Traveller, from: Face) -> bool {
        node.device
            .and_then(|id| self.get(id))
            .is_some_and(|d| d.can_accept_traveller(traveller, from))
    }

    /// Hand the traveller to the device behind `node`. Returns the leftover.
    pub fn deliver(&mut self, node: &Node, traveller: &Traveller, from: Face) -> ItemStack {
        match node.device.and_then(|id| self.get_mut(id)) {
            Some(device) => device.accept_traveller(traveller, from),
            None => traveller.stack.clone(),
        }
    }

    /// Persisted data of the device behind `node`, if it has one.
    pub fn serialize_data(&self, node: &Node) -> Option<Vec<u8>> {
        node.device.and_then(|id| self.get(id)).map(|d| d.serialize_data())
    }

    pub fn probe(&self, node: &Node, data: &mut Vec<ProbeData>) {
        if let Some(p) = node.device.and_then(|id| self.get(id)).and_then(|d| d.as_probe()) {
            p.provide_probe_data(data);
        }
    }
}
