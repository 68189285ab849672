//! The per-dimension network directory.
//!
//! A [`NetworkDatabase`] owns every [`WorldNetwork`] of one dimension,
//! allocates network and traveller ids, and keeps the [`RemapTable`] that
//! tells a reloading node which network it rejoins. Merge and split live
//! here because they retire and create networks.

use crate::device::{DeviceArena, DeviceFactory};
use crate::event::Event;
use crate::id::{DimensionId, NetworkId, TravellerId};
use crate::network::{NetworkContext, NetworkRecord, UpdateReport, WorldNetwork};
use crate::node::{Node, NodeKey};
use crate::position::{Face, Position, face_to_index, index_to_face};
use crate::registry::DimensionPositions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// RemapTable
// ---------------------------------------------------------------------------

/// Where unloaded nodes went while their region was inactive.
///
/// At most one entry per node key. Recording a node always drops the old
/// entry first; only unloaded nodes get a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    entries: BTreeMap<NodeKey, NetworkId>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that the node `key` now belongs to `network`.
    pub fn record(&mut self, key: NodeKey, network: NetworkId, loaded: bool) {
        self.entries.remove(&key);
        if !loaded {
            self.entries.insert(key, network);
        }
    }

    /// Consume the remap for `key`.
    pub fn resolve(&mut self, key: NodeKey) -> Option<NetworkId> {
        self.entries.remove(&key)
    }

    pub fn get(&self, key: NodeKey) -> Option<NetworkId> {
        self.entries.get(&key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, NetworkId)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// NetworkDatabase
// ---------------------------------------------------------------------------

/// All networks of one dimension.
#[derive(Debug)]
pub struct NetworkDatabase {
    dimension: DimensionId,
    networks: BTreeMap<NetworkId, WorldNetwork>,
    remaps: RemapTable,
    next_network: u64,
    next_traveller: u64,
}

impl NetworkDatabase {
    pub fn new(dimension: DimensionId) -> Self {
        Self {
            dimension,
            networks: BTreeMap::new(),
            remaps: RemapTable::new(),
            next_network: 1,
            next_traveller: 1,
        }
    }

    pub fn dimension(&self) -> DimensionId {
        self.dimension
    }

    /// Reserve a fresh network id.
    pub fn allocate_id(&mut self) -> NetworkId {
        let id = NetworkId(self.next_network);
        self.next_network += 1;
        id
    }

    pub fn allocate_traveller_id(&mut self) -> TravellerId {
        let id = TravellerId(self.next_traveller);
        self.next_traveller += 1;
        id
    }

    /// Create an empty network and return its id.
    pub fn create_network(&mut self, ctx: &mut NetworkContext<'_>) -> NetworkId {
        let id = self.allocate_id();
        self.networks.insert(id, WorldNetwork::new(id, self.dimension));
        ctx.events.emit(Event::NetworkCreated {
            dimension: self.dimension,
            network: id,
        });
        debug!(dimension = ?self.dimension, network = %id, "network created");
        id
    }

    pub fn get(&self, id: NetworkId) -> Option<&WorldNetwork> {
        self.networks.get(&id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut WorldNetwork> {
        self.networks.get_mut(&id)
    }

    pub fn remove(&mut self, id: NetworkId) -> Option<WorldNetwork> {
        self.networks.remove(&id)
    }

    pub fn is_present(&self, id: NetworkId) -> bool {
        self.networks.contains_key(&id)
    }

    pub fn networks(&self) -> impl Iterator<Item = &WorldNetwork> {
        self.networks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.networks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// The live network holding a node matching `face` at `position`.
    pub fn network_at(
        &self,
        positions: &DimensionPositions,
        position: Position,
        face: Option<Face>,
    ) -> Option<NetworkId> {
        positions
            .get(position)?
            .network_ids()
            .filter(|id| self.networks.contains_key(id))
            .find(|id| {
                positions
                    .containers(*id, position)
                    .iter()
                    .any(|c| crate::node::face_matches(face, c.face()))
            })
    }

    /// Live networks whose nodes at `position` match `face`.
    pub fn networks_at(
        &self,
        positions: &DimensionPositions,
        position: Position,
        face: Option<Face>,
    ) -> Vec<NetworkId> {
        let Some(entry) = positions.get(position) else {
            return Vec::new();
        };
        entry
            .network_ids()
            .filter(|id| self.networks.contains_key(id))
            .filter(|id| {
                positions
                    .containers(*id, position)
                    .iter()
                    .any(|c| crate::node::face_matches(face, c.face()))
            })
            .collect()
    }

    pub fn remaps(&self) -> &RemapTable {
        &self.remaps
    }

    pub fn record_remap(&mut self, key: NodeKey, network: NetworkId, loaded: bool) {
        self.remaps.record(key, network, loaded);
    }

    /// Consume the remap for `key`: the network a reloading node rejoins.
    pub fn resolve_remap(&mut self, key: NodeKey) -> Option<NetworkId> {
        self.remaps.resolve(key)
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Networks adjacent to `node` that connect with it in both directions.
    pub fn neighbour_networks(
        &self,
        positions: &DimensionPositions,
        node: &Node,
    ) -> BTreeSet<NetworkId> {
        let mut found = BTreeSet::new();
        for direction in Face::ALL.into_iter().filter(|&d| node.can_connect_to(d)) {
            let neighbour = node.position.offset(direction);
            let Some(entry) = positions.get(neighbour) else {
                continue;
            };
            for id in entry.network_ids().filter(|id| self.networks.contains_key(id)) {
                if entry
                    .containers(id)
                    .iter()
                    .any(|c| c.node.can_connect_to(direction.opposite()))
                {
                    found.insert(id);
                }
            }
        }
        found
    }

    /// Register `node` in the network it touches, merging when it touches
    /// several and creating one when it touches none.
    pub fn place(&mut self, ctx: &mut NetworkContext<'_>, node: Node) -> (NetworkId, NodeKey) {
        let neighbours: Vec<NetworkId> = self
            .neighbour_networks(ctx.positions, &node)
            .into_iter()
            .collect();
        let target = match neighbours.as_slice() {
            [] => self.create_network(ctx),
            [only] => *only,
            several => match self.merge(ctx, several) {
                Some(id) => id,
                None => self.create_network(ctx),
            },
        };
        let key = match self.networks.get_mut(&target) {
            Some(network) => network.register_node(ctx, node),
            None => {
                let mut network = WorldNetwork::new(target, self.dimension);
                let key = network.register_node(ctx, node);
                self.networks.insert(target, network);
                key
            }
        };
        (target, key)
    }

    /// Remove the nodes matching `face` at `position` from every network
    /// holding them, then check those networks for splits.
    pub fn remove_at(
        &mut self,
        ctx: &mut NetworkContext<'_>,
        position: Position,
        face: Option<Face>,
    ) -> Vec<Node> {
        let mut removed = Vec::new();
        for id in self.networks_at(ctx.positions, position, face) {
            let Some(network) = self.networks.get_mut(&id) else {
                continue;
            };
            removed.extend(network.unregister_at(ctx, position, face));
            if ctx.config.validate_on_removal {
                self.validate(ctx, id);
            }
            self.drop_if_dead(id);
        }
        removed
    }

    fn drop_if_dead(&mut self, id: NetworkId) {
        if self
            .networks
            .get(&id)
            .is_some_and(|n| n.is_empty() && n.traveller_count() == 0 && n.deferred_count() == 0)
        {
            self.networks.remove(&id);
            debug!(network = %id, "empty network retired");
        }
    }

    // -----------------------------------------------------------------------
    // Merge / split
    // -----------------------------------------------------------------------

    /// Move every node and traveller of `sources` into a brand-new network,
    /// then re-announce every node to every listener of the result.
    ///
    /// Unknown ids are ignored. A single live source is returned unchanged.
    pub fn merge(
        &mut self,
        ctx: &mut NetworkContext<'_>,
        sources: &[NetworkId],
    ) -> Option<NetworkId> {
        let ids: BTreeSet<NetworkId> = sources
            .iter()
            .copied()
            .filter(|id| self.networks.contains_key(id))
            .collect();
        if ids.len() <= 1 {
            return ids.first().copied();
        }

        let mut merged = WorldNetwork::new(self.allocate_id(), self.dimension);
        for id in &ids {
            if let Some(mut source) = self.networks.remove(id) {
                source.transfer_network_data(ctx.positions, &mut merged, &mut self.remaps);
            }
        }
        merged.announce_all(ctx);

        let into = merged.id();
        debug!(
            sources = ?ids,
            %into,
            nodes = merged.node_count(ctx.positions),
            travellers = merged.traveller_count(),
            "networks merged"
        );
        ctx.events.emit(Event::NetworkMerged {
            dimension: self.dimension,
            sources: ids.into_iter().collect(),
            into,
        });
        self.networks.insert(into, merged);
        Some(into)
    }

    /// Split `id` into its connected components. The component containing
    /// the lowest position keeps the id; every other component becomes a
    /// new network. Returns the ids created.
    pub fn validate(&mut self, ctx: &mut NetworkContext<'_>, id: NetworkId) -> Vec<NetworkId> {
        let Some(mut network) = self.networks.remove(&id) else {
            return Vec::new();
        };
        network.flush_pending(ctx.events);

        let mut components = network.components(ctx.positions);
        if components.len() <= 1 {
            self.networks.insert(id, network);
            return Vec::new();
        }

        let mut parts = Vec::with_capacity(components.len() - 1);
        for component in components.drain(1..) {
            let mut fresh = WorldNetwork::new(self.allocate_id(), self.dimension);
            let travellers = network.extract_component(
                ctx.positions,
                &component,
                &mut fresh,
                &mut self.remaps,
            );
            debug!(
                source = %id,
                created = %fresh.id(),
                positions = component.len(),
                travellers,
                "component split off"
            );
            parts.push(fresh);
        }

        // Listeners forget everything that ended up in another part.
        let groups: Vec<(NetworkId, Vec<Node>)> = std::iter::once(&network)
            .chain(parts.iter())
            .map(|n| (n.id(), n.nodes(ctx.positions).cloned().collect()))
            .collect();
        for part in std::iter::once(&network).chain(parts.iter()) {
            let gone: Vec<Node> = groups
                .iter()
                .filter(|(group, _)| *group != part.id())
                .flat_map(|(_, nodes)| nodes.iter().cloned())
                .collect();
            part.announce_removed(ctx, &gone);
        }

        let created: Vec<NetworkId> = parts.iter().map(WorldNetwork::id).collect();
        ctx.events.emit(Event::NetworkSplit {
            dimension: self.dimension,
            source: id,
            created: created.clone(),
        });
        self.networks.insert(id, network);
        for part in parts {
            self.networks.insert(part.id(), part);
        }
        created
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Update every network, then retire networks left with nothing in them.
    pub fn update_all(&mut self, ctx: &mut NetworkContext<'_>) -> UpdateReport {
        let mut report = UpdateReport::default();
        for network in self.networks.values_mut() {
            report.absorb(network.update(ctx));
        }
        let dead: Vec<NetworkId> = self
            .networks
            .values()
            .filter(|n| n.is_empty() && n.traveller_count() == 0 && n.deferred_count() == 0)
            .map(WorldNetwork::id)
            .collect();
        for id in dead {
            self.drop_if_dead(id);
        }
        report
    }

    /// Drop registry containers of networks that no longer exist.
    pub fn collect_garbage(&self, positions: &mut DimensionPositions) -> usize {
        positions.collect_garbage(|id| self.networks.contains_key(&id))
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn to_record(
        &self,
        positions: &DimensionPositions,
        devices: &DeviceArena,
    ) -> DatabaseRecord {
        DatabaseRecord {
            dimension: self.dimension.0,
            next_network: self.next_network,
            next_traveller: self.next_traveller,
            remaps: self
                .remaps
                .iter()
                .map(|(key, network)| RemapRecord {
                    position: key.position.to_long(),
                    face: face_to_index(key.face),
                    network: network.0,
                })
                .collect(),
            networks: self.networks.values().map(|n| n.to_record(positions, devices)).collect(),
        }
    }

    /// Rebuild a database. Nodes are registered into `ctx.positions` as
    /// each network is read; travellers wait for the first update.
    pub fn from_record(
        record: &DatabaseRecord,
        ctx: &mut NetworkContext<'_>,
        factory: &mut dyn DeviceFactory,
    ) -> Self {
        let dimension = DimensionId(record.dimension);
        let mut database = NetworkDatabase::new(dimension);
        database.next_traveller = record.next_traveller;
        for network_record in &record.networks {
            let network = WorldNetwork::from_record(network_record, dimension, ctx, factory);
            database.next_network = database.next_network.max(network.id().0 + 1);
            database.networks.insert(network.id(), network);
        }
        database.next_network = database.next_network.max(record.next_network);
        for remap in &record.remaps {
            match index_to_face(remap.face) {
                Ok(face) => {
                    let key = NodeKey::new(Position::from_long(remap.position), face);
                    database.remaps.record(key, NetworkId(remap.network), false);
                }
                Err(index) => {
                    warn!(dimension = ?dimension, index, "skipping remap with invalid face")
                }
            }
        }
        database
    }
}

/// Persisted form of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub dimension: i32,
    pub next_network: u64,
    pub next_traveller: u64,
    pub remaps: Vec<RemapRecord>,
    pub networks: Vec<NetworkRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapRecord {
    pub position: i64,
    pub face: i8,
    pub network: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::FaceSet;
    use crate::test_utils::Fixture;

    fn tube(x: i32, z: i32) -> Node {
        Node::pass_through(Position::new(x, 0, z))
    }

    #[test]
    fn remap_record_overwrites_and_resolve_consumes() {
        let mut table = RemapTable::new();
        let key = NodeKey::new(Position::new(1, 2, 3), Some(Face::Up));
        table.record(key, NetworkId(4), false);
        table.record(key, NetworkId(5), false);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(key), Some(NetworkId(5)));
        table.record(key, NetworkId(6), true);
        assert!(table.is_empty());

        table.record(key, NetworkId(7), false);
        assert_eq!(table.resolve(key), Some(NetworkId(7)));
        assert_eq!(table.resolve(key), None);
    }

    #[test]
    fn ids_are_unique() {
        let mut db = NetworkDatabase::new(DimensionId(0));
        let a = db.allocate_id();
        let b = db.allocate_id();
        assert_ne!(a, b);
        assert_ne!(db.allocate_traveller_id(), db.allocate_traveller_id());
    }

    #[test]
    fn placement_creates_joins_and_merges() {
        let mut fx = Fixture::new();
        let mut db = NetworkDatabase::new(DimensionId(0));
        let mut ctx = fx.ctx();

        let (a, _) = db.place(&mut ctx, tube(0, 0));
        let (b, _) = db.place(&mut ctx, tube(2, 0));
        assert_ne!(a, b);
        assert_eq!(db.len(), 2);

        let (same, _) = db.place(&mut ctx, tube(0, 1));
        assert_eq!(same, a);

        let (merged, _) = db.place(&mut ctx, tube(1, 0));
        assert!(merged != a && merged != b);
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(merged).map(|n| n.node_count(ctx.positions)), Some(4));
        assert!(!db.is_present(a));
        assert_eq!(db.collect_garbage(ctx.positions), 0);
    }

    #[test]
    fn placement_ignores_one_way_contact() {
        let mut fx = Fixture::new();
        let mut db = NetworkDatabase::new(DimensionId(0));
        let mut ctx = fx.ctx();
        let (a, _) = db.place(&mut ctx, tube(0, 0));
        let faced = Node::endpoint(
            Position::new(1, 0, 0),
            Some(Face::East),
            FaceSet::only(Face::East),
        );
        let (b, _) = db.place(&mut ctx, faced);
        assert_ne!(a, b);
    }

    #[test]
    fn removal_splits_and_retires_empty_networks() {
        let mut fx = Fixture::new();
        let mut db = NetworkDatabase::new(DimensionId(0));
        let mut ctx = fx.ctx();
        for x in 0..5 {
            db.place(&mut ctx, tube(x, 0));
        }
        assert_eq!(db.len(), 1);

        let removed = db.remove_at(&mut ctx, Position::new(2, 0, 0), None);
        assert_eq!(removed.len(), 1);
        assert_eq!(db.len(), 2);
        let mut sizes: Vec<usize> = db.networks().map(|n| n.node_count(ctx.positions)).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 2]);

        let lone = db.network_at(ctx.positions, Position::new(0, 0, 0), None);
        db.remove_at(&mut ctx, Position::new(0, 0, 0), None);
        db.remove_at(&mut ctx, Position::new(1, 0, 0), None);
        assert!(lone.is_some_and(|id| !db.is_present(id)));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn merge_ignores_unknown_ids() {
        let mut fx = Fixture::new();
        let mut db = NetworkDatabase::new(DimensionId(0));
        let mut ctx = fx.ctx();
        let (a, _) = db.place(&mut ctx, tube(0, 0));
        assert_eq!(db.merge(&mut ctx, &[a, NetworkId(99)]), Some(a));
        assert_eq!(db.merge(&mut ctx, &[NetworkId(99)]), None);
    }

    #[test]
    fn split_records_remaps_for_unloaded_nodes() {
        let mut fx = Fixture::new();
        let mut db = NetworkDatabase::new(DimensionId(0));
        let mut ctx = fx.ctx();
        for x in 0..3 {
            db.place(&mut ctx, tube(x, 0));
        }
        let id = db.network_at(ctx.positions, Position::new(0, 0, 0), None).expect("network");
        let far = Position::new(2, 0, 0);
        db.get(id).expect("network").set_loaded(ctx.positions, far, false);

        db.remove_at(&mut ctx, Position::new(1, 0, 0), None);
        let moved_to = db.network_at(ctx.positions, far, None).expect("split network");
        assert_ne!(moved_to, id);
        assert_eq!(db.resolve_remap(NodeKey::new(far, None)), Some(moved_to));
        assert_eq!(db.resolve_remap(NodeKey::new(far, None)), None);
        assert_eq!(db.remaps().len(), 0);
    }
}
