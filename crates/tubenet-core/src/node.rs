//! Network nodes and the containers that bind them to a network.
//!
//! A [`Node`] is a vertex at a grid position, optionally bound to one
//! connection face. Faceless nodes accept any face (open tube segments);
//! faced nodes are capability endpoints bound to one side of a device.
//!
//! Back-references are plain identifiers: a node names its network by
//! [`NetworkId`] and its device by [`DeviceId`]. Device capabilities are
//! resolved once at registration into a [`Capabilities`] record, so topology
//! code never has to ask the device what it is.

use crate::id::{DeviceId, NetworkId};
use crate::position::{Face, FaceSet, Position};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a requested face matches a node's face.
///
/// An unset request matches every node; a set request matches only nodes
/// bound to exactly that face. Used for both lookup and removal.
pub fn face_matches(requested: Option<Face>, actual: Option<Face>) -> bool {
    requested.is_none() || requested == actual
}

// ---------------------------------------------------------------------------
// NodeKey
// ---------------------------------------------------------------------------

/// The identity of a node within a network: its position and face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub position: Position,
    pub face: Option<Face>,
}

impl NodeKey {
    pub fn new(position: Position, face: Option<Face>) -> Self {
        Self { position, face }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.face {
            Some(face) => write!(f, "{}@{:?}", self.position, face),
            None => write!(f, "{}", self.position),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Device capabilities, resolved from the device when the node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Faces on which the device offers an insert/extract interface.
    pub transfer: FaceSet,
    /// The device wants topology add/remove notifications.
    pub listener: bool,
    /// The device contributes probe (diagnostic) data.
    pub probe: bool,
}

impl Capabilities {
    pub fn offers_transfer(&self, face: Face) -> bool {
        self.transfer.contains(face)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A vertex of a world network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub position: Position,
    /// The device side this node is bound to, or `None` for any-face nodes.
    pub face: Option<Face>,
    /// Owning network. Set by registration.
    pub network: Option<NetworkId>,
    /// False while the region containing the node is not active.
    pub loaded: bool,
    /// Attached device. Endpoint nodes have one, pass-through nodes do not.
    pub device: Option<DeviceId>,
    /// Faces this node accepts connections from.
    pub connects: FaceSet,
    /// Cost of routing a traveller through this node.
    pub cost: u32,
    pub capabilities: Capabilities,
}

impl Node {
    /// A pass-through node that connects on every face.
    pub fn pass_through(position: Position) -> Self {
        Self {
            position,
            face: None,
            network: None,
            loaded: true,
            device: None,
            connects: FaceSet::all(),
            cost: 1,
            capabilities: Capabilities::default(),
        }
    }

    /// A node bound to a device, connecting only on the given faces.
    pub fn endpoint(position: Position, face: Option<Face>, connects: FaceSet) -> Self {
        Self {
            face,
            connects,
            ..Self::pass_through(position)
        }
    }

    #[must_use]
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn with_connects(mut self, connects: FaceSet) -> Self {
        self.connects = connects;
        self
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.position, self.face)
    }

    /// Whether this node accepts a connection arriving on `face`.
    pub fn can_connect_to(&self, face: Face) -> bool {
        self.connects.contains(face)
    }

    /// Endpoints have a device attached.
    pub fn is_endpoint(&self) -> bool {
        self.device.is_some()
    }

    pub fn listens(&self) -> bool {
        self.device.is_some() && self.capabilities.listener
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node{{{}", self.key())?;
        if let Some(network) = self.network {
            write!(f, ", {network}")?;
        }
        if !self.loaded {
            f.write_str(", unloaded")?;
        }
        if self.device.is_some() {
            f.write_str(", endpoint")?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------------------
// NodeContainer
// ---------------------------------------------------------------------------

/// Registry record binding a node to the network that registered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContainer {
    pub network: NetworkId,
    pub node: Node,
}

impl NodeContainer {
    pub fn position(&self) -> Position {
        self.node.position
    }

    pub fn face(&self) -> Option<Face> {
        self.node.face
    }
}
