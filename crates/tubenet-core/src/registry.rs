//! The position registry: every node membership at every grid cell.
//!
//! The registry is keyed by dimension, then position. Each [`PositionEntry`]
//! maps a network id to the containers that network registered at the cell.
//! Normally one network owns a cell; during a merge or split two networks
//! can briefly hold containers at the same position.
//!
//! Entries are created lazily. Containers belonging to networks that no
//! longer exist in the database are removed by [`DimensionPositions::collect_garbage`].

use crate::id::{DimensionId, NetworkId};
use crate::node::{Node, NodeContainer, face_matches};
use crate::position::{Face, Position};
use std::collections::{BTreeMap, HashMap};

// ---------------------------------------------------------------------------
// PositionEntry
// ---------------------------------------------------------------------------

/// Node memberships at one grid cell, across all networks.
#[derive(Debug, Clone)]
pub struct PositionEntry {
    position: Position,
    containers: BTreeMap<NetworkId, Vec<NodeContainer>>,
}

impl PositionEntry {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            containers: BTreeMap::new(),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Containers registered here by `network`. Empty if none.
    pub fn containers(&self, network: NetworkId) -> &[NodeContainer] {
        self.containers
            .get(&network)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn containers_mut(&mut self, network: NetworkId) -> Option<&mut Vec<NodeContainer>> {
        self.containers.get_mut(&network)
    }

    /// Register `node` for `network`. A container with the same face for the
    /// same network is replaced.
    pub fn insert(&mut self, network: NetworkId, mut node: Node) -> &NodeContainer {
        node.position = self.position;
        node.network = Some(network);
        let list = self.containers.entry(network).or_default();
        list.retain(|c| c.face() != node.face);
        list.push(NodeContainer { network, node });
        let last = list.len() - 1;
        &list[last]
    }

    /// Remove and return `network`'s containers whose face matches `face`.
    pub fn remove_matching(
        &mut self,
        network: NetworkId,
        face: Option<Face>,
    ) -> Vec<NodeContainer> {
        self.remove_where(network, |c| face_matches(face, c.face()))
    }

    /// Remove and return the container with exactly this face, if any.
    pub fn remove_exact(
        &mut self,
        network: NetworkId,
        face: Option<Face>,
    ) -> Option<NodeContainer> {
        self.remove_where(network, |c| c.face() == face).pop()
    }

    fn remove_where(
        &mut self,
        network: NetworkId,
        mut predicate: impl FnMut(&NodeContainer) -> bool,
    ) -> Vec<NodeContainer> {
        let Some(list) = self.containers.get_mut(&network) else {
            return Vec::new();
        };
        let (removed, kept): (Vec<_>, Vec<_>) = list.drain(..).partition(|c| predicate(c));
        *list = kept;
        self.containers.retain(|_, l| !l.is_empty());
        removed
    }

    /// Drop every container of `network`.
    pub fn remove_network(&mut self, network: NetworkId) -> Vec<NodeContainer> {
        self.containers.remove(&network).unwrap_or_default()
    }

    pub fn network_ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.containers.keys().copied()
    }

    pub fn has_network(&self, network: NetworkId) -> bool {
        self.containers.contains_key(&network)
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DimensionPositions
// ---------------------------------------------------------------------------

/// All position entries of one dimension.
#[derive(Debug, Clone, Default)]
pub struct DimensionPositions {
    entries: HashMap<Position, PositionEntry>,
}

impl DimensionPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, position: Position) -> Option<&PositionEntry> {
        self.entries.get(&position)
    }

    /// Get the entry at `position`, creating it if needed.
    pub fn entry(&mut self, position: Position) -> &mut PositionEntry {
        self.entries
            .entry(position)
            .or_insert_with(|| PositionEntry::new(position))
    }

    pub(crate) fn get_mut(&mut self, position: Position) -> Option<&mut PositionEntry> {
        self.entries.get_mut(&position)
    }

    /// Containers `network` registered at `position`.
    pub fn containers(&self, network: NetworkId, position: Position) -> &[NodeContainer] {
        self.entries
            .get(&position)
            .map(|e| e.containers(network))
            .unwrap_or_default()
    }

    /// Remove the entry at `position` if no network holds containers there.
    pub fn remove_if_empty(&mut self, position: Position) {
        if self.entries.get(&position).is_some_and(PositionEntry::is_empty) {
            self.entries.remove(&position);
        }
    }

    /// Drop containers of networks for which `is_present` is false, then drop
    /// entries left empty. Returns the number of network memberships removed.
    pub fn collect_garbage(&mut self, mut is_present: impl FnMut(NetworkId) -> bool) -> usize {
        let mut removed = 0;
        for entry in self.entries.values_mut() {
            let stale: Vec<NetworkId> = entry.network_ids().filter(|&id| !is_present(id)).collect();
            for id in stale {
                entry.remove_network(id);
                removed += 1;
            }
        }
        self.entries.retain(|_, e| !e.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PositionRegistry
// ---------------------------------------------------------------------------

/// The position pool for every dimension.
#[derive(Debug, Clone, Default)]
pub struct PositionRegistry {
    dimensions: HashMap<DimensionId, DimensionPositions>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(&self, dimension: DimensionId) -> Option<&DimensionPositions> {
        self.dimensions.get(&dimension)
    }

    /// The pool for `dimension`, created on first use.
    pub fn dimension_mut(&mut self, dimension: DimensionId) -> &mut DimensionPositions {
        self.dimensions.entry(dimension).or_default()
    }

    /// Look up the entry at `(dimension, position)`, creating it if needed.
    pub fn entry(&mut self, dimension: DimensionId, position: Position) -> &mut PositionEntry {
        self.dimension_mut(dimension).entry(position)
    }

    /// Forget a dimension entirely (world unload).
    pub fn remove_dimension(&mut self, dimension: DimensionId) -> Option<DimensionPositions> {
        self.dimensions.remove(&dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::FaceSet;

    fn faced(face: Face) -> Node {
        Node::endpoint(Position::new(0, 0, 0), Some(face), FaceSet::only(face))
    }

    #[test]
    fn insert_sets_network_and_position() {
        let mut entry = PositionEntry::new(Position::new(4, 5, 6));
        let container = entry.insert(NetworkId(1), Node::pass_through(Position::new(0, 0, 0)));
        assert_eq!(container.position(), Position::new(4, 5, 6));
        assert_eq!(container.node.network, Some(NetworkId(1)));
    }

    #[test]
    fn insert_replaces_same_face() {
        let mut entry = PositionEntry::new(Position::new(0, 0, 0));
        entry.insert(NetworkId(1), faced(Face::Up));
        entry.insert(NetworkId(1), faced(Face::Up).with_cost(7));
        entry.insert(NetworkId(1), faced(Face::Down));
        let list = entry.containers(NetworkId(1));
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|c| c.node.cost == 7));
    }

    #[test]
    fn remove_matching_unset_face_takes_all() {
        let mut entry = PositionEntry::new(Position::new(0, 0, 0));
        entry.insert(NetworkId(1), faced(Face::Up));
        entry.insert(NetworkId(1), faced(Face::Down));
        let removed = entry.remove_matching(NetworkId(1), None);
        assert_eq!(removed.len(), 2);
        assert!(entry.is_empty());
    }

    #[test]
    fn remove_matching_set_face_is_exact() {
        let mut entry = PositionEntry::new(Position::new(0, 0, 0));
        entry.insert(NetworkId(1), faced(Face::Up));
        entry.insert(NetworkId(1), Node::pass_through(Position::new(0, 0, 0)));
        let removed = entry.remove_matching(NetworkId(1), Some(Face::Up));
        assert_eq!(removed.len(), 1);
        assert_eq!(entry.containers(NetworkId(1)).len(), 1);
        assert_eq!(entry.containers(NetworkId(1))[0].face(), None);
    }

    #[test]
    fn concurrent_networks_at_one_position() {
        let mut entry = PositionEntry::new(Position::new(0, 0, 0));
        entry.insert(NetworkId(1), faced(Face::Up));
        entry.insert(NetworkId(2), faced(Face::Up));
        assert_eq!(entry.network_ids().count(), 2);
        entry.remove_network(NetworkId(1));
        assert!(!entry.has_network(NetworkId(1)));
        assert!(entry.has_network(NetworkId(2)));
    }

    #[test]
    fn garbage_collection_drops_missing_networks() {
        let mut registry = PositionRegistry::new();
        let dim = DimensionId(0);
        registry.entry(dim, Position::new(0, 0, 0)).insert(NetworkId(1), faced(Face::Up));
        registry.entry(dim, Position::new(1, 0, 0)).insert(NetworkId(2), faced(Face::Up));
        let removed = registry
            .dimension_mut(dim)
            .collect_garbage(|id| id == NetworkId(2));
        assert_eq!(removed, 1);
        let positions = registry.dimension(dim).unwrap();
        assert_eq!(positions.len(), 1);
        assert!(positions.get(Position::new(0, 0, 0)).is_none());
    }

    #[test]
    fn entries_are_created_lazily() {
        let mut registry = PositionRegistry::new();
        assert!(registry.dimension(DimensionId(3)).is_none());
        registry.entry(DimensionId(3), Position::new(0, 0, 0));
        assert_eq!(registry.dimension(DimensionId(3)).map(|d| d.len()), Some(1));
        registry.dimension_mut(DimensionId(3)).remove_if_empty(Position::new(0, 0, 0));
        assert!(registry.dimension(DimensionId(3)).unwrap().is_empty());
    }
}
