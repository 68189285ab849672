//! Graph searches over a network: destination discovery and traveller routing.
//!
//! Both searches work on a read-only [`NetworkView`] and build an ephemeral
//! [`PathArena`] of [`PathNode`]s linked by index. Nothing here is persisted
//! or outlives a single call.
//!
//! - [`discover_endpoints`] is the bounded depth-first search a routing
//!   source runs to find transfer-capable neighbours. It stops once the
//!   configured number of distinct destination positions is found.
//! - [`find_route`] is a uniform-cost search from a traveller's node to the
//!   cheapest node satisfying an acceptance predicate.
//!
//! [`DestinationSet`] keeps discovered destinations ordered by cost, ties by
//! insertion order, and updates incrementally from topology notifications.

use crate::config::NetworkConfig;
use crate::id::NetworkId;
use crate::node::{Node, NodeContainer, NodeKey};
use crate::position::{Face, Position};
use crate::registry::DimensionPositions;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet};

// ---------------------------------------------------------------------------
// NetworkView
// ---------------------------------------------------------------------------

/// Read-only view of one network's nodes.
#[derive(Clone, Copy)]
pub struct NetworkView<'a> {
    network: NetworkId,
    positions: &'a DimensionPositions,
    discovery_limit: usize,
}

impl<'a> NetworkView<'a> {
    pub fn new(network: NetworkId, positions: &'a DimensionPositions) -> Self {
        Self {
            network,
            positions,
            discovery_limit: NetworkConfig::default().discovery_limit,
        }
    }

    /// Use the configured cap for listeners searching through this view.
    pub fn with_config(mut self, config: &NetworkConfig) -> Self {
        self.discovery_limit = config.discovery_limit;
        self
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Distinct destination positions a routing source should look for.
    pub fn discovery_limit(&self) -> usize {
        self.discovery_limit
    }

    /// This network's containers at `position`.
    pub fn containers(&self, position: Position) -> &'a [NodeContainer] {
        self.positions.containers(self.network, position)
    }

    pub fn is_node_present(&self, position: Position) -> bool {
        !self.containers(position).is_empty()
    }

    /// Best node at `position` for `face`.
    ///
    /// Faceless nodes match any request and any node matches an unset
    /// request. When a face is requested, a node bound to exactly that face
    /// wins over a faceless one.
    pub fn node(&self, position: Position, face: Option<Face>) -> Option<&'a Node> {
        let mut candidates = self
            .containers(position)
            .iter()
            .map(|c| &c.node)
            .filter(|n| n.face.is_none() || face.is_none() || n.face == face);
        match face {
            None => candidates.next(),
            Some(_) => {
                let mut fallback = None;
                for node in candidates {
                    if node.face == face {
                        return Some(node);
                    }
                    fallback.get_or_insert(node);
                }
                fallback
            }
        }
    }

    /// The node with exactly this key.
    pub fn node_exact(&self, key: NodeKey) -> Option<&'a Node> {
        self.containers(key.position)
            .iter()
            .map(|c| &c.node)
            .find(|n| n.face == key.face)
    }
}

// ---------------------------------------------------------------------------
// Path nodes
// ---------------------------------------------------------------------------

/// One hop of a computed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub position: Position,
    pub face: Option<Face>,
    /// Face of the step's cell the traveller enters through.
    pub from: Face,
}

impl PathStep {
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.position, self.face)
    }
}

/// A search-tree node: parent link, real node, entry face, accumulated cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
    pub parent: Option<usize>,
    pub node: NodeKey,
    pub from: Option<Face>,
    pub cost: u32,
}

/// Arena of path nodes for a single traversal.
#[derive(Debug, Default)]
pub struct PathArena {
    nodes: Vec<PathNode>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        parent: Option<usize>,
        node: NodeKey,
        from: Option<Face>,
        cost: u32,
    ) -> usize {
        self.nodes.push(PathNode {
            parent,
            node,
            from,
            cost,
        });
        self.nodes.len() - 1
    }

    pub fn get(&self, index: usize) -> &PathNode {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Steps from the root (exclusive) down to `index` (inclusive).
    pub fn steps_to(&self, index: usize) -> Vec<PathStep> {
        let mut steps = Vec::new();
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            let node = &self.nodes[i];
            if let Some(from) = node.from {
                steps.push(PathStep {
                    position: node.node.position,
                    face: node.node.face,
                    from,
                });
            }
            cursor = node.parent;
        }
        steps.reverse();
        steps
    }
}

/// An endpoint found by discovery: its path node and the face it was
/// reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointData {
    pub path: usize,
    pub face: Face,
}

// ---------------------------------------------------------------------------
// Destination discovery
// ---------------------------------------------------------------------------

/// A transfer endpoint reachable from a routing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub node: NodeKey,
    /// Face of the destination the route arrives through.
    pub from: Face,
    pub cost: u32,
    pub route: Vec<PathStep>,
}

/// Bounded depth-first search for transfer endpoints around `origin`.
///
/// Neighbours are visited in [`Face::ALL`] order. A neighbour offering a
/// transfer interface on the face looking back at the searcher is recorded
/// as a destination; any other neighbour accepting the connection is
/// searched further. Stops once `limit` distinct destination positions are
/// known or nothing is left to search.
pub fn discover_endpoints(view: &NetworkView<'_>, origin: &Node, limit: usize) -> Vec<Destination> {
    let mut arena = PathArena::new();
    let mut stack = vec![arena.push(None, origin.key(), None, 0)];
    let mut visited: HashSet<Position> = HashSet::new();
    let mut found: Vec<EndpointData> = Vec::new();
    let mut found_keys: HashSet<(Position, Face)> = HashSet::new();
    let mut distinct: HashSet<Position> = HashSet::new();

    'search: while let Some(index) = stack.pop() {
        if distinct.len() >= limit {
            break;
        }
        let PathNode { node: key, cost, .. } = *arena.get(index);
        let Some(current) = view.node_exact(key) else {
            continue;
        };

        for direction in Face::ALL {
            if !current.can_connect_to(direction) {
                continue;
            }
            let neighbour_pos = key.position.offset(direction);
            let back = direction.opposite();
            if neighbour_pos == origin.position
                || visited.contains(&neighbour_pos)
                || found_keys.contains(&(neighbour_pos, back))
            {
                continue;
            }
            let Some(neighbour) = view.node(neighbour_pos, Some(back)) else {
                continue;
            };

            let child_cost = cost + neighbour.cost;
            if neighbour.is_endpoint() && neighbour.capabilities.offers_transfer(back) {
                let path = arena.push(Some(index), neighbour.key(), Some(back), child_cost);
                found.push(EndpointData { path, face: back });
                found_keys.insert((neighbour_pos, back));
                distinct.insert(neighbour_pos);
                if distinct.len() >= limit {
                    break 'search;
                }
            } else if !neighbour.is_endpoint() && neighbour.can_connect_to(back) {
                stack.push(arena.push(Some(index), neighbour.key(), Some(back), child_cost));
                visited.insert(neighbour_pos);
            }
        }
    }

    found
        .into_iter()
        .map(|endpoint| {
            let path_node = arena.get(endpoint.path);
            Destination {
                node: path_node.node,
                from: endpoint.face,
                cost: path_node.cost,
                route: arena.steps_to(endpoint.path),
            }
        })
        .collect()
}

/// Cost-ordered multiset of destinations. Equal costs keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct DestinationSet {
    entries: BTreeMap<(u32, u64), Destination>,
    next_seq: u64,
}

impl DestinationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, destination: Destination) {
        self.entries.insert((destination.cost, self.next_seq), destination);
        self.next_seq += 1;
    }

    /// Whether a destination at `position` reached through `from` is known.
    pub fn contains(&self, position: Position, from: Face) -> bool {
        self.entries
            .values()
            .any(|d| d.node.position == position && d.from == from)
    }

    /// Destinations, cheapest first.
    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.entries.values()
    }

    pub fn cheapest(&self) -> Option<&Destination> {
        self.entries.values().next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Topology notification: a node joined `this`'s network.
    ///
    /// Searches again when the new node is a transfer endpoint that is not
    /// yet a destination, and adds what was not known before.
    pub fn on_node_added(
        &mut self,
        this: &Node,
        added: &Node,
        view: &NetworkView<'_>,
        limit: usize,
    ) {
        if !added.is_endpoint() || added.capabilities.transfer.is_empty() {
            return;
        }
        if self.entries.values().any(|d| d.node == added.key()) {
            return;
        }
        for destination in discover_endpoints(view, this, limit) {
            if !self.contains(destination.node.position, destination.from) {
                self.insert(destination);
            }
        }
    }

    /// Topology notification: drop destinations at the removed node.
    pub fn on_node_removed(&mut self, removed: &Node) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, d| d.node != removed.key() && d.node.position != removed.position);
        before - self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// A path to an accepting node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub steps: Vec<PathStep>,
    pub cost: u32,
}

impl Route {
    pub fn target(&self) -> Option<NodeKey> {
        self.steps.last().map(PathStep::key)
    }
}

/// Uniform-cost search from `start` to the cheapest endpoint for which
/// `accept(node, from)` holds.
///
/// A hop from A to B across direction `d` requires A to connect on `d` and
/// B on the opposite face. Endpoints are terminal: they are tested against
/// `accept` but never expanded. The start node is never a target. Ties are
/// settled in discovery order.
pub fn find_route(
    view: &NetworkView<'_>,
    start: NodeKey,
    mut accept: impl FnMut(&Node, Face) -> bool,
) -> Option<Route> {
    view.node_exact(start)?;

    let mut arena = PathArena::new();
    let root = arena.push(None, start, None, 0);
    let mut heap = BinaryHeap::new();
    let mut seq: u64 = 0;
    heap.push(Reverse((0u32, seq, root)));
    let mut settled: HashSet<NodeKey> = HashSet::new();

    while let Some(Reverse((cost, _, index))) = heap.pop() {
        let path_node = *arena.get(index);
        if !settled.insert(path_node.node) {
            continue;
        }
        let Some(node) = view.node_exact(path_node.node) else {
            continue;
        };

        if let Some(from) = path_node.from {
            if node.is_endpoint() {
                if accept(node, from) {
                    return Some(Route {
                        steps: arena.steps_to(index),
                        cost,
                    });
                }
                continue;
            }
        }

        for direction in Face::ALL {
            if !node.can_connect_to(direction) {
                continue;
            }
            let back = direction.opposite();
            let Some(neighbour) = view.node(node.position.offset(direction), Some(back)) else {
                continue;
            };
            if !neighbour.can_connect_to(back) || settled.contains(&neighbour.key()) {
                continue;
            }
            let child_cost = cost + neighbour.cost;
            let child = arena.push(Some(index), neighbour.key(), Some(back), child_cost);
            seq += 1;
            heap.push(Reverse((child_cost, seq, child)));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DeviceId;
    use crate::position::FaceSet;
    use slotmap::KeyData;

    const NET: NetworkId = NetworkId(1);

    fn tube(positions: &mut DimensionPositions, x: i32, z: i32) {
        let pos = Position::new(x, 0, z);
        positions.entry(pos).insert(NET, Node::pass_through(pos));
    }

    /// An endpoint at (x, 0, z) offering transfer on `face`.
    fn endpoint(positions: &mut DimensionPositions, x: i32, z: i32, face: Face) {
        let pos = Position::new(x, 0, z);
        let mut node = Node::endpoint(pos, Some(face), FaceSet::only(face));
        node.device = Some(DeviceId::from(KeyData::from_ffi(1)));
        node.capabilities.transfer = FaceSet::only(face);
        positions.entry(pos).insert(NET, node);
    }

    fn origin(positions: &DimensionPositions, x: i32, z: i32) -> Node {
        positions.containers(NET, Position::new(x, 0, z))[0].node.clone()
    }

    #[test]
    fn view_prefers_exact_face() {
        let mut positions = DimensionPositions::new();
        let pos = Position::new(0, 0, 0);
        positions.entry(pos).insert(NET, Node::pass_through(pos));
        positions
            .entry(pos)
            .insert(NET, Node::endpoint(pos, Some(Face::Up), FaceSet::all()));
        let view = NetworkView::new(NET, &positions);

        assert_eq!(view.node(pos, Some(Face::Up)).and_then(|n| n.face), Some(Face::Up));
        assert_eq!(view.node(pos, Some(Face::Down)).map(|n| n.face), Some(None));
        assert!(view.node(Position::new(1, 0, 0), None).is_none());
    }

    #[test]
    fn view_faced_only_rejects_other_face() {
        let mut positions = DimensionPositions::new();
        let pos = Position::new(0, 0, 0);
        positions
            .entry(pos)
            .insert(NET, Node::endpoint(pos, Some(Face::Up), FaceSet::all()));
        let view = NetworkView::new(NET, &positions);
        assert!(view.node(pos, Some(Face::Down)).is_none());
        assert!(view.node(pos, None).is_some());
    }

    #[test]
    fn route_follows_line_of_tubes() {
        let mut positions = DimensionPositions::new();
        endpoint(&mut positions, 0, 0, Face::East);
        tube(&mut positions, 1, 0);
        tube(&mut positions, 2, 0);
        endpoint(&mut positions, 3, 0, Face::West);
        let view = NetworkView::new(NET, &positions);

        let start = origin(&positions, 0, 0).key();
        let route = find_route(&view, start, |_, _| true).expect("route");
        let xs: Vec<i32> = route.steps.iter().map(|s| s.position.x).collect();
        assert_eq!(xs, vec![1, 2, 3]);
        assert_eq!(route.cost, 3);
        assert_eq!(route.steps[2].from, Face::West);
        assert_eq!(route.target().map(|k| k.face), Some(Some(Face::West)));
    }

    #[test]
    fn route_prefers_cheaper_branch() {
        // Direct line through (2, 0) costs 10 at that tube; the detour
        // along z = 1 reaches the same cell through its south face.
        let mut positions = DimensionPositions::new();
        endpoint(&mut positions, 0, 0, Face::East);
        tube(&mut positions, 1, 0);
        let expensive = Position::new(2, 0, 0);
        positions
            .entry(expensive)
            .insert(NET, Node::pass_through(expensive).with_cost(10));
        endpoint(&mut positions, 3, 0, Face::West);
        tube(&mut positions, 1, 1);
        tube(&mut positions, 2, 1);
        tube(&mut positions, 3, 1);
        let mut south = Node::endpoint(
            Position::new(3, 0, 0),
            Some(Face::South),
            FaceSet::only(Face::South),
        );
        south.device = Some(DeviceId::from(KeyData::from_ffi(2)));
        positions.entry(Position::new(3, 0, 0)).insert(NET, south);
        let view = NetworkView::new(NET, &positions);

        let start = origin(&positions, 0, 0).key();
        let route = find_route(&view, start, |_, _| true).expect("route");
        assert_eq!(route.target().map(|k| k.face), Some(Some(Face::South)));
        assert_eq!(route.cost, 5);
    }

    #[test]
    fn route_respects_predicate_and_missing_start() {
        let mut positions = DimensionPositions::new();
        endpoint(&mut positions, 0, 0, Face::East);
        tube(&mut positions, 1, 0);
        endpoint(&mut positions, 2, 0, Face::West);
        let view = NetworkView::new(NET, &positions);

        let start = origin(&positions, 0, 0).key();
        assert!(find_route(&view, start, |_, _| false).is_none());
        let ghost = NodeKey::new(Position::new(9, 9, 9), None);
        assert!(find_route(&view, ghost, |_, _| true).is_none());
    }

    #[test]
    fn discovery_finds_endpoints_in_cost_order() {
        let mut positions = DimensionPositions::new();
        endpoint(&mut positions, 0, 0, Face::East);
        tube(&mut positions, 1, 0);
        tube(&mut positions, 2, 0);
        endpoint(&mut positions, 3, 0, Face::West);
        endpoint(&mut positions, 1, -1, Face::South);
        let view = NetworkView::new(NET, &positions);
        let this = origin(&positions, 0, 0);

        let mut set = DestinationSet::new();
        for d in discover_endpoints(&view, &this, 6) {
            set.insert(d);
        }
        let order: Vec<(i32, u32)> = set.iter().map(|d| (d.node.position.x, d.cost)).collect();
        assert_eq!(order, vec![(1, 2), (3, 3)]);
        assert_eq!(set.cheapest().map(|d| d.route.len()), Some(2));
    }

    #[test]
    fn discovery_stops_at_limit() {
        let mut positions = DimensionPositions::new();
        endpoint(&mut positions, 0, 0, Face::East);
        for x in 1..=8 {
            tube(&mut positions, x, 0);
            endpoint(&mut positions, x, 1, Face::North);
        }
        let view = NetworkView::new(NET, &positions);
        let this = origin(&positions, 0, 0);
        assert_eq!(discover_endpoints(&view, &this, 6).len(), 6);
        assert_eq!(discover_endpoints(&view, &this, 2).len(), 2);
        assert_eq!(discover_endpoints(&view, &this, 100).len(), 8);
    }

    #[test]
    fn equal_costs_keep_insertion_order() {
        let mut set = DestinationSet::new();
        for x in [5, 2, 9] {
            set.insert(Destination {
                node: NodeKey::new(Position::new(x, 0, 0), Some(Face::Up)),
                from: Face::Up,
                cost: 4,
                route: Vec::new(),
            });
        }
        let xs: Vec<i32> = set.iter().map(|d| d.node.position.x).collect();
        assert_eq!(xs, vec![5, 2, 9]);
    }

    #[test]
    fn removal_drops_matching_destinations() {
        let mut positions = DimensionPositions::new();
        endpoint(&mut positions, 0, 0, Face::East);
        tube(&mut positions, 1, 0);
        endpoint(&mut positions, 2, 0, Face::West);
        endpoint(&mut positions, 1, 1, Face::North);
        let view = NetworkView::new(NET, &positions);
        let this = origin(&positions, 0, 0);
        let added = origin(&positions, 2, 0);

        let mut set = DestinationSet::new();
        set.on_node_added(&this, &added, &view, 6);
        assert_eq!(set.len(), 2);
        set.on_node_added(&this, &added, &view, 6);
        assert_eq!(set.len(), 2);

        assert_eq!(set.on_node_removed(&added), 1);
        assert_eq!(set.len(), 1);
        assert!(set.contains(Position::new(1, 0, 1), Face::North));
    }

    #[test]
    fn arena_steps_exclude_root() {
        let mut arena = PathArena::new();
        let root = arena.push(None, NodeKey::new(Position::new(0, 0, 0), None), None, 0);
        let a = arena.push(
            Some(root),
            NodeKey::new(Position::new(1, 0, 0), None),
            Some(Face::West),
            1,
        );
        let b = arena.push(
            Some(a),
            NodeKey::new(Position::new(2, 0, 0), None),
            Some(Face::West),
            2,
        );
        let steps = arena.steps_to(b);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].position.x, 1);
        assert_eq!(arena.len(), 3);
    }
}
