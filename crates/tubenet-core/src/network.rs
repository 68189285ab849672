//! World networks: connected topologies of nodes plus the travellers
//! moving across them.
//!
//! A [`WorldNetwork`] does not own its nodes. Nodes live in the dimension's
//! [`DimensionPositions`]; the network keeps the set of positions where it
//! has containers, its listener keys, its travellers and the traveller
//! removal queue. Everything shared (positions, devices, events, config) is
//! handed in through a [`NetworkContext`].
//!
//! # Update
//!
//! Each `update()` runs:
//! 1. **Restore** -- travellers loaded from a snapshot are rebuilt against
//!    the now-registered nodes; failures are counted and dropped
//! 2. **Flush** -- queued traveller removals are applied
//! 3. **Advance** -- each traveller accumulates progress and hops
//! 4. **Flush** -- removals queued during advancement are applied

use crate::config::NetworkConfig;
use crate::database::RemapTable;
use crate::device::{DeviceArena, DeviceFactory};
use crate::event::{Event, EventBus, TravellerAction, TravellerMessage, TravellerSnapshot};
use crate::fixed::Fixed64;
use crate::id::{DimensionId, NetworkId, TravellerId};
use crate::node::{Node, NodeContainer, NodeKey, face_matches};
use crate::pathing::NetworkView;
use crate::position::{Face, FaceSet, Position, face_to_index, index_to_face};
use crate::registry::DimensionPositions;
use crate::traveller::{Traveller, TravellerError, TravellerRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Shared state a network operates on.
pub struct NetworkContext<'a> {
    pub positions: &'a mut DimensionPositions,
    pub devices: &'a mut DeviceArena,
    pub events: &'a mut EventBus,
    pub config: &'a NetworkConfig,
}

/// What one traveller hop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Moved,
    /// The path was rebuilt instead of moving.
    Rerouted,
    /// The payload was fully taken by the endpoint at this key.
    Delivered(NodeKey),
    /// No route is left; the payload goes back to the world.
    Ejected,
}

/// Counters from one network update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub moved: usize,
    pub rerouted: usize,
    pub delivered: usize,
    pub ejected: usize,
    /// Travellers that failed to restore from a snapshot.
    pub lost: usize,
    pub removed: usize,
}

impl UpdateReport {
    pub fn absorb(&mut self, other: UpdateReport) {
        self.moved += other.moved;
        self.rerouted += other.rerouted;
        self.delivered += other.delivered;
        self.ejected += other.ejected;
        self.lost += other.lost;
        self.removed += other.removed;
    }
}

// ---------------------------------------------------------------------------
// WorldNetwork
// ---------------------------------------------------------------------------

/// A connected topology of nodes and the travellers on it.
#[derive(Debug)]
pub struct WorldNetwork {
    id: NetworkId,
    dimension: DimensionId,
    positions: BTreeSet<Position>,
    travellers: BTreeMap<TravellerId, Traveller>,
    listeners: BTreeSet<NodeKey>,
    pending_unregister: Vec<TravellerId>,
    /// Traveller records waiting for the first update after a load.
    deferred: Vec<TravellerRecord>,
}

impl WorldNetwork {
    pub fn new(id: NetworkId, dimension: DimensionId) -> Self {
        Self {
            id,
            dimension,
            positions: BTreeSet::new(),
            travellers: BTreeMap::new(),
            listeners: BTreeSet::new(),
            pending_unregister: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn dimension(&self) -> DimensionId {
        self.dimension
    }

    pub fn view<'a>(&self, positions: &'a DimensionPositions) -> NetworkView<'a> {
        NetworkView::new(self.id, positions)
    }

    /// Positions where this network has containers.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.positions.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn nodes<'a>(
        &'a self,
        positions: &'a DimensionPositions,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.positions
            .iter()
            .flat_map(move |&p| positions.containers(self.id, p).iter().map(|c| &c.node))
    }

    pub fn node_count(&self, positions: &DimensionPositions) -> usize {
        self.nodes(positions).count()
    }

    /// Best node at `position` for `face`. See [`NetworkView::node`].
    pub fn get_node<'a>(
        &self,
        positions: &'a DimensionPositions,
        position: Position,
        face: Option<Face>,
    ) -> Option<&'a Node> {
        self.view(positions).node(position, face)
    }

    pub fn is_node_present(&self, positions: &DimensionPositions, position: Position) -> bool {
        self.positions.contains(&position) && !positions.containers(self.id, position).is_empty()
    }

    /// Whether a node matching `face` exists at `position`.
    pub fn is_face_present(
        &self,
        positions: &DimensionPositions,
        position: Position,
        face: Option<Face>,
    ) -> bool {
        positions
            .containers(self.id, position)
            .iter()
            .any(|c| face_matches(face, c.face()))
    }

    pub fn node_containers_at<'a>(
        &self,
        positions: &'a DimensionPositions,
        position: Position,
    ) -> &'a [NodeContainer] {
        positions.containers(self.id, position)
    }

    pub fn listeners(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.listeners.iter().copied()
    }

    pub fn travellers(&self) -> impl Iterator<Item = &Traveller> {
        self.travellers.values()
    }

    pub fn traveller(&self, id: TravellerId) -> Option<&Traveller> {
        self.travellers.get(&id)
    }

    pub fn traveller_count(&self) -> usize {
        self.travellers.len()
    }

    pub fn pending_unregistrations(&self) -> &[TravellerId] {
        &self.pending_unregister
    }

    /// Traveller records loaded but not yet restored.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    // -----------------------------------------------------------------------
    // Topology edit
    // -----------------------------------------------------------------------

    /// Add `node` to this network and tell every listener about it.
    pub fn register_node(&mut self, ctx: &mut NetworkContext<'_>, node: Node) -> NodeKey {
        let added = ctx.positions.entry(node.position).insert(self.id, node).node.clone();
        let key = added.key();
        self.positions.insert(key.position);
        debug!(network = %self.id, node = %key, "node registered");

        self.prune_listeners(ctx.positions);
        let listeners = self.listener_nodes(ctx.positions, Some(key));
        let view = self.view(ctx.positions).with_config(ctx.config);
        for listener in &listeners {
            ctx.devices.notify_added(listener, &added, &view);
        }
        if added.listens() {
            self.listeners.insert(key);
        }
        key
    }

    pub fn unregister_node(&mut self, ctx: &mut NetworkContext<'_>, node: &Node) -> Vec<Node> {
        self.unregister_at(ctx, node.position, node.face)
    }

    /// Remove the nodes at `position` matching `face` and return them with
    /// their network cleared.
    ///
    /// A removed listener is told about every node it leaves behind; the
    /// remaining listeners are told about every removed node.
    pub fn unregister_at(
        &mut self,
        ctx: &mut NetworkContext<'_>,
        position: Position,
        face: Option<Face>,
    ) -> Vec<Node> {
        let removed: Vec<Node> = ctx
            .positions
            .get_mut(position)
            .map(|entry| entry.remove_matching(self.id, face))
            .unwrap_or_default()
            .into_iter()
            .map(|c| Node { network: None, ..c.node })
            .collect();
        if removed.is_empty() {
            return removed;
        }

        ctx.positions.remove_if_empty(position);
        if ctx.positions.containers(self.id, position).is_empty() {
            self.positions.remove(&position);
        }
        for node in &removed {
            self.listeners.remove(&node.key());
            debug!(network = %self.id, node = %node.key(), "node unregistered");
        }

        if removed.iter().any(Node::listens) {
            let remaining: Vec<Node> = self.nodes(ctx.positions).cloned().collect();
            for gone in removed.iter().filter(|n| n.listens()) {
                for other in &remaining {
                    ctx.devices.notify_removed(gone, other);
                }
            }
        }

        self.prune_listeners(ctx.positions);
        for listener in self.listener_nodes(ctx.positions, None) {
            for gone in &removed {
                ctx.devices.notify_removed(&listener, gone);
            }
        }
        removed
    }

    /// Mark this network's nodes at `position` (un)loaded. Returns how many
    /// nodes changed.
    pub fn set_loaded(
        &self,
        positions: &mut DimensionPositions,
        position: Position,
        loaded: bool,
    ) -> usize {
        let Some(list) = positions.get_mut(position).and_then(|e| e.containers_mut(self.id)) else {
            return 0;
        };
        let mut changed = 0;
        for container in list.iter_mut().filter(|c| c.node.loaded != loaded) {
            container.node.loaded = loaded;
            changed += 1;
        }
        changed
    }

    /// Drop listener keys whose node is gone or no longer listens.
    fn prune_listeners(&mut self, positions: &DimensionPositions) {
        let id = self.id;
        self.listeners.retain(|key| {
            positions
                .containers(id, key.position)
                .iter()
                .any(|c| c.face() == key.face && c.node.listens())
        });
    }

    /// Snapshot of the listener nodes, taken before any notification runs.
    fn listener_nodes(
        &self,
        positions: &DimensionPositions,
        exclude: Option<NodeKey>,
    ) -> Vec<Node> {
        let view = self.view(positions);
        self.listeners
            .iter()
            .filter(|&&key| Some(key) != exclude)
            .filter_map(|&key| view.node_exact(key))
            .filter(|n| n.listens())
            .cloned()
            .collect()
    }

    /// Tell every listener about every other node of the network.
    pub(crate) fn announce_all(&self, ctx: &mut NetworkContext<'_>) {
        let listeners = self.listener_nodes(ctx.positions, None);
        if listeners.is_empty() {
            return;
        }
        let nodes: Vec<Node> = self.nodes(ctx.positions).cloned().collect();
        let view = self.view(ctx.positions).with_config(ctx.config);
        for listener in &listeners {
            for node in nodes.iter().filter(|n| n.key() != listener.key()) {
                ctx.devices.notify_added(listener, node, &view);
            }
        }
    }

    /// Tell every listener that `gone` left the network.
    pub(crate) fn announce_removed(&self, ctx: &mut NetworkContext<'_>, gone: &[Node]) {
        for listener in self.listener_nodes(ctx.positions, None) {
            for node in gone {
                ctx.devices.notify_removed(&listener, node);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Merge / split support
    // -----------------------------------------------------------------------

    /// Move every node, traveller and queued removal into `to`.
    ///
    /// Each moved node first loses any remap recorded for its key; an
    /// unloaded node then gets a remap to `to`. No listener is notified.
    pub fn transfer_network_data(
        &mut self,
        positions: &mut DimensionPositions,
        to: &mut WorldNetwork,
        remaps: &mut RemapTable,
    ) {
        let all = std::mem::take(&mut self.positions);
        self.move_positions(positions, &all, to, remaps);
        for (id, mut traveller) in std::mem::take(&mut self.travellers) {
            traveller.network = to.id;
            to.travellers.insert(id, traveller);
        }
        to.pending_unregister.append(&mut self.pending_unregister);
        to.deferred.append(&mut self.deferred);
        debug!(from = %self.id, to = %to.id, "network data transferred");
    }

    /// Move one connected component into `to`, together with the
    /// travellers standing on it. Returns the number of travellers moved.
    pub(crate) fn extract_component(
        &mut self,
        positions: &mut DimensionPositions,
        component: &BTreeSet<Position>,
        to: &mut WorldNetwork,
        remaps: &mut RemapTable,
    ) -> usize {
        self.move_positions(positions, component, to, remaps);

        let moving: Vec<TravellerId> = self
            .travellers
            .values()
            .filter(|t| component.contains(&t.position()))
            .map(|t| t.id)
            .collect();
        for id in &moving {
            if let Some(mut traveller) = self.travellers.remove(id) {
                traveller.network = to.id;
                to.travellers.insert(*id, traveller);
            }
        }
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|r| component.contains(&Position::from_long(r.position)));
        self.deferred = kept;
        to.deferred.extend(moved);
        moving.len()
    }

    fn move_positions(
        &mut self,
        positions: &mut DimensionPositions,
        moved: &BTreeSet<Position>,
        to: &mut WorldNetwork,
        remaps: &mut RemapTable,
    ) {
        for &position in moved {
            self.positions.remove(&position);
            let Some(entry) = positions.get_mut(position) else {
                continue;
            };
            let faces: Vec<Option<Face>> = entry
                .containers(self.id)
                .iter()
                .map(NodeContainer::face)
                .collect();
            for face in faces {
                let Some(container) = entry.remove_exact(self.id, face) else {
                    continue;
                };
                let node = container.node;
                remaps.record(node.key(), to.id, node.loaded);
                if node.listens() {
                    to.listeners.insert(node.key());
                }
                entry.insert(to.id, node);
                to.positions.insert(position);
            }
        }
        self.listeners.retain(|k| !moved.contains(&k.position));
    }

    /// Connected components of this network, lowest position first.
    ///
    /// The fill steps from a position to an adjacent one when some node at
    /// the neighbour accepts a connection from the shared face. The node
    /// being left is not asked. Uses a work list and a visited set.
    pub fn components(&self, positions: &DimensionPositions) -> Vec<BTreeSet<Position>> {
        let accepts = |position: Position, face: Face| {
            positions
                .containers(self.id, position)
                .iter()
                .any(|c| c.node.can_connect_to(face))
        };

        let mut unvisited = self.positions.clone();
        let mut components = Vec::new();
        while let Some(start) = unvisited.pop_first() {
            let mut component = BTreeSet::from([start]);
            let mut work = vec![start];
            while let Some(position) = work.pop() {
                for direction in Face::ALL {
                    let neighbour = position.offset(direction);
                    if !unvisited.contains(&neighbour) {
                        continue;
                    }
                    if accepts(neighbour, direction.opposite()) {
                        unvisited.remove(&neighbour);
                        component.insert(neighbour);
                        work.push(neighbour);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    // -----------------------------------------------------------------------
    // Travellers
    // -----------------------------------------------------------------------

    /// Take ownership of `traveller` and broadcast its registration.
    pub fn register_traveller(
        &mut self,
        events: &mut EventBus,
        mut traveller: Traveller,
    ) -> TravellerId {
        traveller.network = self.id;
        events.emit(Event::Traveller(TravellerMessage {
            action: TravellerAction::Register,
            dimension: self.dimension,
            snapshot: TravellerSnapshot::of(&traveller),
        }));
        let id = traveller.id;
        self.travellers.insert(id, traveller);
        id
    }

    /// Queue a traveller for removal at the next flush. Returns false when
    /// the traveller is unknown or already queued.
    pub fn unregister_traveller(&mut self, id: TravellerId) -> bool {
        if !self.travellers.contains_key(&id) || self.pending_unregister.contains(&id) {
            return false;
        }
        self.pending_unregister.push(id);
        true
    }

    /// Apply queued removals, broadcasting each one.
    pub(crate) fn flush_pending(&mut self, events: &mut EventBus) -> usize {
        let mut removed = 0;
        for id in std::mem::take(&mut self.pending_unregister) {
            if let Some(traveller) = self.travellers.remove(&id) {
                events.emit(Event::Traveller(TravellerMessage {
                    action: TravellerAction::Unregister,
                    dimension: self.dimension,
                    snapshot: TravellerSnapshot::of(&traveller),
                }));
                removed += 1;
            }
        }
        removed
    }

    /// Rebuild the travellers of a freshly loaded network.
    fn restore_deferred(&mut self, ctx: &mut NetworkContext<'_>) -> usize {
        if self.deferred.is_empty() {
            return 0;
        }
        let mut lost = 0;
        for record in std::mem::take(&mut self.deferred) {
            let restored = Traveller::from_record(&record, self.id).and_then(|t| {
                if NetworkView::new(self.id, ctx.positions).node_exact(t.current).is_some() {
                    Ok(t)
                } else {
                    Err(TravellerError::Detached {
                        traveller: t.id,
                        network: self.id,
                        at: t.current,
                    })
                }
            });
            match restored {
                Ok(traveller) => {
                    self.register_traveller(ctx.events, traveller);
                }
                Err(error) => {
                    lost += 1;
                    warn!(network = %self.id, %error, "dropping traveller that failed to load");
                }
            }
        }
        if lost > 0 {
            ctx.events.emit(Event::TravellersLost {
                dimension: self.dimension,
                network: self.id,
                count: lost,
            });
        }
        lost
    }

    /// Advance every traveller by one tick.
    pub fn update(&mut self, ctx: &mut NetworkContext<'_>) -> UpdateReport {
        let mut report = UpdateReport {
            lost: self.restore_deferred(ctx),
            ..UpdateReport::default()
        };
        report.removed += self.flush_pending(ctx.events);

        let speed = ctx.config.speed();
        let ids: Vec<TravellerId> = self.travellers.keys().copied().collect();
        for id in ids {
            match self.step_traveller(ctx, id, speed) {
                Some(Hop::Moved) => report.moved += 1,
                Some(Hop::Rerouted) => report.rerouted += 1,
                Some(Hop::Delivered(_)) => report.delivered += 1,
                Some(Hop::Ejected) => report.ejected += 1,
                None => {}
            }
        }

        report.removed += self.flush_pending(ctx.events);
        report
    }

    fn step_traveller(
        &mut self,
        ctx: &mut NetworkContext<'_>,
        id: TravellerId,
        speed: Fixed64,
    ) -> Option<Hop> {
        if self.pending_unregister.contains(&id) {
            return None;
        }
        let traveller = self.travellers.get_mut(&id)?;
        let view = NetworkView::new(self.id, ctx.positions);

        traveller.progress += speed;
        let mut last = None;
        while traveller.progress >= Fixed64::ONE {
            traveller.progress -= Fixed64::ONE;
            let hop = hop(&view, ctx.devices, traveller);
            last = Some(hop);
            if hop != Hop::Moved {
                break;
            }
        }

        match last {
            Some(Hop::Delivered(at)) => {
                ctx.events.emit(Event::TravellerDelivered {
                    dimension: self.dimension,
                    network: self.id,
                    traveller: id,
                    at,
                });
                self.pending_unregister.push(id);
            }
            Some(Hop::Ejected) => {
                debug!(
                    network = %self.id,
                    traveller = ?id,
                    at = %traveller.current,
                    "traveller ejected"
                );
                ctx.events.emit(Event::PayloadDropped {
                    dimension: self.dimension,
                    position: traveller.position(),
                    stack: traveller.stack.clone(),
                });
                self.pending_unregister.push(id);
            }
            _ => {}
        }
        last
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn to_record(
        &self,
        positions: &DimensionPositions,
        devices: &DeviceArena,
    ) -> NetworkRecord {
        let nodes = self
            .nodes(positions)
            .map(|node| NodeRecord {
                position: node.position.to_long(),
                face: face_to_index(node.face),
                data: match devices.serialize_data(node) {
                    Some(data) => NodeData::Device(data),
                    None => NodeData::Raw {
                        connects: node.connects,
                        cost: node.cost,
                    },
                },
            })
            .collect();
        let mut travellers: Vec<TravellerRecord> =
            self.travellers.values().map(Traveller::to_record).collect();
        travellers.extend(self.deferred.iter().cloned());
        NetworkRecord {
            id: self.id.0,
            nodes,
            travellers,
        }
    }

    /// Rebuild a network: nodes are registered immediately, travellers are
    /// deferred to the first update. Nodes with a bad face index or device
    /// data the factory rejects are skipped.
    pub fn from_record(
        record: &NetworkRecord,
        dimension: DimensionId,
        ctx: &mut NetworkContext<'_>,
        factory: &mut dyn DeviceFactory,
    ) -> Self {
        let mut network = WorldNetwork::new(NetworkId(record.id), dimension);
        for entry in &record.nodes {
            let position = Position::from_long(entry.position);
            let face = match index_to_face(entry.face) {
                Ok(face) => face,
                Err(index) => {
                    warn!(
                        network = %network.id,
                        %position,
                        index,
                        "skipping node with invalid face"
                    );
                    continue;
                }
            };
            let node = match &entry.data {
                NodeData::Raw { connects, cost } => Node {
                    face,
                    connects: *connects,
                    cost: *cost,
                    ..Node::pass_through(position)
                },
                NodeData::Device(data) => match factory.create(position, face, data) {
                    Some(device) => ctx.devices.attach(device, position).1,
                    None => {
                        warn!(
                            network = %network.id,
                            %position,
                            "skipping node whose device could not be rebuilt"
                        );
                        continue;
                    }
                },
            };
            network.register_node(ctx, node);
        }
        network.deferred = record.travellers.clone();
        network
    }
}

/// One traveller hop.
///
/// Rebuilds the path when it is empty, when the next step no longer
/// connects, or when the final endpoint now refuses the traveller. A
/// partial delivery keeps the leftover on board and reroutes it.
fn hop(view: &NetworkView<'_>, devices: &mut DeviceArena, traveller: &mut Traveller) -> Hop {
    let Some(current) = view.node_exact(traveller.current) else {
        return Hop::Ejected;
    };
    let Some(step) = traveller.path.front().copied() else {
        return reroute(view, devices, traveller);
    };
    let last = traveller.path.len() == 1;
    let next = view.node_exact(step.key()).filter(|next| {
        current.position.offset(step.from.opposite()) == next.position
            && current.can_connect_to(step.from.opposite())
            && next.can_connect_to(step.from)
            && if last {
                traveller.can_end_at(next, step.from, devices)
            } else {
                !next.is_endpoint()
            }
    });
    let Some(next) = next else {
        return reroute(view, devices, traveller);
    };

    traveller.advance();
    if !last {
        return Hop::Moved;
    }
    let leftover = devices.deliver(next, traveller, step.from);
    if leftover.is_empty() {
        return Hop::Delivered(step.key());
    }
    traveller.stack = leftover;
    reroute(view, devices, traveller)
}

fn reroute(view: &NetworkView<'_>, devices: &DeviceArena, traveller: &mut Traveller) -> Hop {
    match traveller.regenerate_path(view, devices) {
        Ok(()) => Hop::Rerouted,
        Err(error) => {
            debug!(%error, "no route left");
            Hop::Ejected
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted form of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: u64,
    pub nodes: Vec<NodeRecord>,
    pub travellers: Vec<TravellerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Linear position encoding.
    pub position: i64,
    /// Face index, `-1` for none.
    pub face: i8,
    pub data: NodeData,
}

/// Device-specific data, or the raw node fields for device-less nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeData {
    Device(Vec<u8>),
    Raw { connects: FaceSet, cost: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ItemTypeId;
    use crate::item::ItemStack;
    use crate::test_utils::{Chest, Fixture, TestFactory, line};

    const NET: NetworkId = NetworkId(1);
    const DIM: DimensionId = DimensionId(0);

    #[test]
    fn register_and_unregister_are_symmetric() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let mut ctx = fx.ctx();
        let key = network.register_node(&mut ctx, Node::pass_through(Position::new(0, 0, 0)));
        assert!(network.is_node_present(ctx.positions, key.position));

        let removed = network.unregister_at(&mut ctx, key.position, None);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].network, None);
        assert!(!network.is_node_present(ctx.positions, key.position));
        assert!(ctx.positions.is_empty());
        assert!(network.is_empty());
    }

    #[test]
    fn faced_removal_leaves_other_faces() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let mut ctx = fx.ctx();
        let pos = Position::new(0, 0, 0);
        network.register_node(
            &mut ctx,
            Node::endpoint(pos, Some(Face::Up), FaceSet::only(Face::Up)),
        );
        network.register_node(
            &mut ctx,
            Node::endpoint(pos, Some(Face::Down), FaceSet::only(Face::Down)),
        );

        assert_eq!(network.unregister_at(&mut ctx, pos, Some(Face::Up)).len(), 1);
        assert!(network.is_face_present(ctx.positions, pos, Some(Face::Down)));
        assert!(!network.is_face_present(ctx.positions, pos, Some(Face::Up)));
        assert!(network.is_node_present(ctx.positions, pos));
    }

    #[test]
    fn components_of_connected_line() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let mut ctx = fx.ctx();
        for x in 0..5 {
            network.register_node(&mut ctx, Node::pass_through(Position::new(x, 0, 0)));
        }
        let components = network.components(ctx.positions);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 5);
    }

    #[test]
    fn components_ask_only_the_neighbour() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let mut ctx = fx.ctx();
        // Only opens upwards, but the tube east of it accepts it anyway.
        let up_only =
            Node::pass_through(Position::new(0, 0, 0)).with_connects(FaceSet::only(Face::Up));
        network.register_node(&mut ctx, up_only);
        network.register_node(&mut ctx, Node::pass_through(Position::new(1, 0, 0)));

        let components = network.components(ctx.positions);
        assert_eq!(
            components,
            vec![BTreeSet::from([Position::new(0, 0, 0), Position::new(1, 0, 0)])]
        );
    }

    #[test]
    fn components_stop_at_a_refusing_neighbour() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let mut ctx = fx.ctx();
        network.register_node(&mut ctx, Node::pass_through(Position::new(0, 0, 0)));
        // Faces east, so it does not accept the tube to its west.
        let blocked = Position::new(1, 0, 0);
        network.register_node(
            &mut ctx,
            Node::endpoint(blocked, Some(Face::East), FaceSet::only(Face::East)),
        );
        network.register_node(&mut ctx, Node::pass_through(Position::new(2, 0, 0)));

        let components = network.components(ctx.positions);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], BTreeSet::from([Position::new(0, 0, 0)]));
    }

    #[test]
    fn set_loaded_counts_changes() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let mut ctx = fx.ctx();
        let pos = Position::new(3, 3, 3);
        network.register_node(&mut ctx, Node::pass_through(pos));
        assert_eq!(network.set_loaded(ctx.positions, pos, false), 1);
        assert_eq!(network.set_loaded(ctx.positions, pos, false), 0);
        assert_eq!(network.get_node(ctx.positions, pos, None).map(|n| n.loaded), Some(false));
    }

    #[test]
    fn traveller_walks_line_and_is_delivered() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let (start, chest) = line(&mut fx, &mut network, 3);

        let mut ctx = fx.ctx();
        let mut traveller =
            Traveller::new(TravellerId(1), NET, start, ItemStack::new(ItemTypeId(1), 4));
        traveller.regenerate_path(&network.view(ctx.positions), ctx.devices).expect("route");
        network.register_traveller(ctx.events, traveller);

        let mut delivered = 0;
        for _ in 0..10 {
            delivered += network.update(&mut ctx).delivered;
        }
        assert_eq!(delivered, 1);
        assert_eq!(network.traveller_count(), 0);
        assert_eq!(fx.devices.downcast::<Chest>(chest).map(|c| c.total()), Some(4));
    }

    #[test]
    fn unregister_traveller_is_deferred() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let (start, _) = line(&mut fx, &mut network, 2);
        let mut ctx = fx.ctx();
        let id = network.register_traveller(
            ctx.events,
            Traveller::new(TravellerId(5), NET, start, ItemStack::new(ItemTypeId(1), 1)),
        );
        assert!(network.unregister_traveller(id));
        assert!(!network.unregister_traveller(id));
        assert_eq!(network.traveller_count(), 1);
        network.update(&mut ctx);
        assert_eq!(network.traveller_count(), 0);
        assert!(network.pending_unregistrations().is_empty());
    }

    #[test]
    fn corrupt_traveller_records_are_counted() {
        let mut fx = Fixture::new();
        let mut network = WorldNetwork::new(NET, DIM);
        let (start, _) = line(&mut fx, &mut network, 3);
        let ctx = fx.ctx();
        let good = Traveller::new(TravellerId(1), NET, start, ItemStack::new(ItemTypeId(1), 1));
        let mut record = network.to_record(ctx.positions, ctx.devices);
        let mut bad = good.to_record();
        bad.face = 40;
        record.travellers = vec![good.to_record(), bad];

        let mut fx2 = Fixture::new();
        let mut factory = TestFactory;
        let mut ctx2 = fx2.ctx();
        let mut restored = WorldNetwork::from_record(&record, DIM, &mut ctx2, &mut factory);
        assert_eq!(restored.deferred_count(), 2);
        let report = restored.update(&mut ctx2);
        assert_eq!(report.lost, 1);
        assert_eq!(restored.deferred_count(), 0);
        assert!(
            ctx2.events
                .pending()
                .iter()
                .any(|(_, e)| matches!(e, Event::TravellersLost { count: 1, .. }))
        );
    }
}
