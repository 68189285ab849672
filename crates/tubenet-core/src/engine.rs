//! The engine: the session object that owns every dimension's networks.
//!
//! # Architecture
//!
//! The `Engine` owns:
//! - A [`PositionRegistry`] (every node membership, per dimension)
//! - One [`NetworkDatabase`] per dimension
//! - A [`DeviceArena`] holding the devices behind endpoint nodes
//! - An [`EventBus`] for engine events and traveller broadcasts
//! - The [`NetworkConfig`]
//!
//! Networks never hold references to any of these. Operations borrow the
//! pieces they need through a [`NetworkContext`] built per call.
//!
//! # Placement
//!
//! [`Engine::place_device`] and [`Engine::place_node`] join a new node to
//! the networks it touches: none creates a network, one is joined, several
//! are merged first. [`Engine::remove_node`] unregisters and, unless
//! disabled in the config, checks the affected network for splits.

use crate::config::NetworkConfig;
use crate::database::NetworkDatabase;
use crate::device::{Device, DeviceArena, ProbeData};
use crate::event::EventBus;
use crate::fixed::{Ticks, fixed64_to_f64};
use crate::id::{DeviceId, DimensionId, NetworkId};
use crate::network::{NetworkContext, UpdateReport, WorldNetwork};
use crate::node::{Node, NodeKey};
use crate::position::{Face, Position};
use crate::registry::{DimensionPositions, PositionRegistry};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a node ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub network: NetworkId,
    pub node: NodeKey,
    pub device: Option<DeviceId>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Engine {
    /// Node memberships for every dimension.
    pub positions: PositionRegistry,

    pub(crate) databases: BTreeMap<DimensionId, NetworkDatabase>,

    /// Devices behind endpoint nodes.
    pub devices: DeviceArena,

    /// Buffered engine events and observer mailboxes.
    pub event_bus: EventBus,

    pub(crate) config: NetworkConfig,

    pub(crate) tick: Ticks,
}

impl Engine {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn tick(&self) -> Ticks {
        self.tick
    }

    /// Split the engine into a dimension's database and a context over the
    /// rest. The database is created on first use.
    pub(crate) fn parts(
        &mut self,
        dimension: DimensionId) -> (&mut NetworkDatabase, NetworkContext<'_>,
    ) {
        let Engine {
            positions,
            databases,
            devices,
            event_bus,
            config,
            ..
        } = self;
        let database = databases
            .entry(dimension)
            .or_insert_with(|| NetworkDatabase::new(dimension));
        let ctx = NetworkContext {
            positions: positions.dimension_mut(dimension),
            devices,
            events: event_bus,
            config,
        };
        (database, ctx)
    }

    pub fn database(&self, dimension: DimensionId) -> Option<&NetworkDatabase> {
        self.databases.get(&dimension)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = DimensionId> + '_ {
        self.databases.keys().copied()
    }

    pub fn dimension_positions(&self, dimension: DimensionId) -> Option<&DimensionPositions> {
        self.positions.dimension(dimension)
    }

    pub fn network(&self, dimension: DimensionId, id: NetworkId) -> Option<&WorldNetwork> {
        self.database(dimension)?.get(id)
    }

    /// The network holding a node matching `face` at `position`.
    pub fn network_at(
        &self,
        dimension: DimensionId,
        position: Position,
        face: Option<Face>,
    ) -> Option<NetworkId> {
        let positions = self.positions.dimension(dimension)?;
        self.database(dimension)?.network_at(positions, position, face)
    }

    /// The best node at `position` for `face`, in whichever network holds it.
    pub fn node(
        &self,
        dimension: DimensionId,
        position: Position,
        face: Option<Face>,
    ) -> Option<&Node> {
        let positions = self.positions.dimension(dimension)?;
        let id = self.database(dimension)?.network_at(positions, position, face)?;
        self.network(dimension, id)?.get_node(positions, position, face)
    }

    /// Number of nodes in a network, if it exists.
    pub fn node_count(&self, dimension: DimensionId, id: NetworkId) -> Option<usize> {
        let positions = self.positions.dimension(dimension)?;
        Some(self.network(dimension, id)?.node_count(positions))
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Attach `device` at `position` and place the node it creates.
    pub fn place_device(
        &mut self,
        dimension: DimensionId,
        position: Position,
        device: Box<dyn Device>,
    ) -> Placement {
        let (_, node) = self.devices.attach(device, position);
        let placement = self.place_node(dimension, node);
        debug!(
            dimension = ?dimension,
            node = %placement.node,
            network = %placement.network,
            "device placed"
        );
        placement
    }

    /// Join `node` to the networks around it.
    pub fn place_node(&mut self, dimension: DimensionId, node: Node) -> Placement {
        let device = node.device;
        let (database, mut ctx) = self.parts(dimension);
        let (network, key) = database.place(&mut ctx, node);
        Placement {
            network,
            node: key,
            device,
        }
    }

    /// Remove the nodes matching `face` at `position` and drop their
    /// devices. Returns the removed nodes.
    pub fn remove_node(
        &mut self,
        dimension: DimensionId,
        position: Position,
        face: Option<Face>,
    ) -> Vec<Node> {
        let (database, mut ctx) = self.parts(dimension);
        let removed = database.remove_at(&mut ctx, position, face);
        for id in removed.iter().filter_map(|n| n.device) {
            self.devices.remove(id);
        }
        removed
    }

    /// Mark every node at `positions` (un)loaded. Returns how many changed.
    pub fn set_loaded(
        &mut self,
        dimension: DimensionId,
        positions: &[Position],
        loaded: bool,
    ) -> usize {
        let (database, ctx) = self.parts(dimension);
        let mut changed = 0;
        for &position in positions {
            for id in database.networks_at(ctx.positions, position, None) {
                if let Some(network) = database.get(id) {
                    changed += network.set_loaded(ctx.positions, position, loaded);
                }
            }
        }
        changed
    }

    /// A node's region came back. Consumes its remap, if any, and returns
    /// the network it rejoins: the remap target, else `last_known` when
    /// that network still exists.
    pub fn load_node(
        &mut self,
        dimension: DimensionId,
        key: NodeKey,
        last_known: Option<NetworkId>,
    ) -> Option<NetworkId> {
        let (database, ctx) = self.parts(dimension);
        let remapped = database.resolve_remap(key);
        let target = remapped.or(last_known).filter(|id| database.is_present(*id))?;
        if let Some(network) = database.get(target) {
            network.set_loaded(ctx.positions, key.position, true);
        }
        if remapped.is_some() {
            debug!(node = %key, network = %target, "node rejoined through remap");
        }
        Some(target)
    }

    pub fn merge(&mut self, dimension: DimensionId, sources: &[NetworkId]) -> Option<NetworkId> {
        let (database, mut ctx) = self.parts(dimension);
        database.merge(&mut ctx, sources)
    }

    /// Split `network` into its connected components.
    pub fn validate(&mut self, dimension: DimensionId, network: NetworkId) -> Vec<NetworkId> {
        let (database, mut ctx) = self.parts(dimension);
        database.validate(&mut ctx, network)
    }

    /// Forget a dimension: its networks, its registry and the devices of
    /// its nodes.
    pub fn unload_dimension(&mut self, dimension: DimensionId) -> bool {
        let database = self.databases.remove(&dimension);
        if let Some(positions) = self.positions.remove_dimension(dimension) {
            if let Some(database) = &database {
                for network in database.networks() {
                    for id in network.nodes(&positions).filter_map(|n| n.device) {
                        self.devices.remove(id);
                    }
                }
            }
        }
        database.is_some()
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Update every network of every dimension, then collect registry
    /// garbage and advance the tick counter.
    pub fn step(&mut self) -> UpdateReport {
        self.event_bus.set_tick(self.tick);
        let dimensions: Vec<DimensionId> = self.databases.keys().copied().collect();
        let mut report = UpdateReport::default();
        for dimension in dimensions {
            let (database, mut ctx) = self.parts(dimension);
            report.absorb(database.update_all(&mut ctx));
            let collected = database.collect_garbage(ctx.positions);
            if collected > 0 {
                debug!(dimension = ?dimension, collected, "registry garbage collected");
            }
        }
        self.tick += 1;
        report
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Diagnostic lines for the node at `position`: its network, its state,
    /// the travellers on it and whatever its device reports.
    pub fn probe(
        &self,
        dimension: DimensionId,
        position: Position,
        face: Option<Face>,
    ) -> Vec<ProbeData> {
        let mut data = Vec::new();
        let Some(positions) = self.positions.dimension(dimension) else {
            return data;
        };
        let Some(database) = self.database(dimension) else {
            return data;
        };
        for id in database.networks_at(positions, position, face) {
            let Some(network) = database.get(id) else {
                continue;
            };
            data.push(ProbeData::text(format!(
                "{id}: {} nodes, {} travellers",
                network.node_count(positions),
                network.traveller_count()
            )));
            for container in network
                .node_containers_at(positions, position)
                .iter()
                .filter(|c| crate::node::face_matches(face, c.face()))
            {
                data.push(ProbeData::text(container.node.to_string()));
                self.devices.probe(&container.node, &mut data);
            }
            for traveller in network.travellers().filter(|t| t.position() == position) {
                data.push(ProbeData {
                    label: format!(
                        "traveller {} ({:.2} of a hop)",
                        traveller.id.0,
                        fixed64_to_f64(traveller.progress)
                    ),
                    stacks: vec![traveller.stack.clone()],
                });
            }
        }
        data
    }

    /// Probe output flattened into one line, for logging.
    pub fn describe(
        &self,
        dimension: DimensionId,
        position: Position,
        face: Option<Face>,
    ) -> String {
        let lines: Vec<String> = self
            .probe(dimension, position, face)
            .into_iter()
            .map(|d| d.label)
            .collect();
        if lines.is_empty() {
            format!("nothing at {position}")
        } else {
            lines.join("; ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::test_utils::{Chest, east_line, tube_at};

    const DIM: DimensionId = DimensionId(0);

    #[test]
    fn place_device_resolves_capabilities() {
        let mut engine = Engine::default();
        let placement = engine.place_device(
            DIM,
            Position::new(0, 0, 0),
            Box::new(Chest::facing(Face::West)),
        );
        let node = engine.node(DIM, Position::new(0, 0, 0), Some(Face::West)).expect("node");
        assert_eq!(node.device, placement.device);
        assert!(node.capabilities.offers_transfer(Face::West));
        assert_eq!(engine.network_at(DIM, Position::new(0, 0, 0), None), Some(placement.network));
    }

    #[test]
    fn remove_node_drops_device() {
        let mut engine = Engine::default();
        let placement = engine.place_device(
            DIM,
            Position::new(0, 0, 0),
            Box::new(Chest::facing(Face::West)),
        );
        let removed = engine.remove_node(DIM, Position::new(0, 0, 0), None);
        assert_eq!(removed.len(), 1);
        assert!(placement.device.is_some_and(|id| !engine.devices.contains(id)));
        assert!(engine.database(DIM).is_some_and(|db| db.is_empty()));
    }

    #[test]
    fn step_advances_tick() {
        let mut engine = Engine::default();
        tube_at(&mut engine, DIM, 0, 0);
        engine.step();
        engine.step();
        assert_eq!(engine.tick(), 2);
    }

    #[test]
    fn load_node_consumes_remap_once() {
        let mut engine = Engine::default();
        for x in 0..3 {
            tube_at(&mut engine, DIM, x, 0);
        }
        let far = Position::new(2, 0, 0);
        assert_eq!(engine.set_loaded(DIM, &[far], false), 1);
        engine.remove_node(DIM, Position::new(1, 0, 0), None);
        let split = engine.network_at(DIM, far, None).expect("split");

        let key = NodeKey::new(far, None);
        assert_eq!(engine.load_node(DIM, key, None), Some(split));
        assert_eq!(engine.load_node(DIM, key, None), None);
        assert_eq!(engine.node(DIM, far, None).map(|n| n.loaded), Some(true));
    }

    #[test]
    fn probe_reports_network_and_device() {
        let mut engine = Engine::default();
        let (_, chest_pos) = east_line(&mut engine, DIM, 1);
        let lines = engine.probe(DIM, chest_pos, None);
        assert!(lines.iter().any(|l| l.label.starts_with("net#")));
        assert!(lines.iter().any(|l| l.label.contains("chest")));
        assert!(engine.describe(DIM, Position::new(50, 50, 50), None).starts_with("nothing"));
    }

    #[test]
    fn probe_lists_travellers_on_the_node() {
        let mut engine = Engine::default();
        let (entry, _) = east_line(&mut engine, DIM, 2);
        let mut buffer = crate::item::SlotBuffer::new(1, 64);
        engine
            .insert_payload(DIM, entry, crate::test_utils::ore(2), &mut buffer)
            .expect("insert");
        engine.step();
        let described = engine.describe(DIM, Position::new(1, 0, 0), None);
        assert!(described.contains("(0.00 of a hop)"), "{described}");
    }

    #[test]
    fn merge_emits_event() {
        let mut engine = Engine::default();
        tube_at(&mut engine, DIM, 0, 0);
        tube_at(&mut engine, DIM, 2, 0);
        engine.event_bus.drain();
        tube_at(&mut engine, DIM, 1, 0);
        assert!(
            engine
                .event_bus
                .drain()
                .iter()
                .any(|(_, e)| matches!(
                    e,
                    Event::NetworkMerged { sources, .. } if sources.len() == 2
                ))
        );
    }

    #[test]
    fn unload_dimension_drops_devices() {
        let mut engine = Engine::default();
        east_line(&mut engine, DIM, 2);
        assert_eq!(engine.devices.len(), 2);
        assert!(engine.unload_dimension(DIM));
        assert!(engine.devices.is_empty());
        assert!(engine.dimension_positions(DIM).is_none());
        assert!(!engine.unload_dimension(DIM));
    }
}
