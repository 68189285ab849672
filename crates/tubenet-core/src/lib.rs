//! Tubenet Core -- spatial logistics networks on a 3D grid.
//!
//! Devices placed on grid cells connect into networks. Payloads
//! ("travellers") are routed across a network from entry points to
//! endpoints that accept them. This crate keeps the topology correct while
//! devices are placed and broken and regions load and unload, routes
//! travellers with a cost-aware search, and persists all of it.
//!
//! # Topology Edits
//!
//! Placement goes through [`engine::Engine`]:
//!
//! ```rust,ignore
//! let placed = engine.place_device(dim, Position::new(0, 0, 0), Box::new(chest));
//! engine.place_node(dim, Node::pass_through(Position::new(1, 0, 0)));
//! engine.remove_node(dim, Position::new(1, 0, 0), None);
//! ```
//!
//! A placed node joins the networks it touches: none creates a network, one
//! is joined, several are merged. A removal checks the network for splits.
//!
//! # Update
//!
//! Each call to [`engine::Engine::step`] updates every network:
//!
//! 1. **Restore** -- travellers read from a snapshot are rebuilt.
//! 2. **Flush** -- queued traveller removals are applied.
//! 3. **Advance** -- travellers accumulate progress and hop along their path.
//! 4. **Flush** -- removals queued while advancing are applied.
//!
//! Then the position registry is cleaned of networks that no longer exist.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Session object owning everything below.
//! - [`registry::PositionRegistry`] -- Node memberships per dimension and cell.
//! - [`network::WorldNetwork`] -- A connected topology and its travellers.
//! - [`database::NetworkDatabase`] -- Networks of one dimension, merge/split,
//!   remaps for unloaded nodes.
//! - [`pathing`] -- Routing and destination discovery.
//! - [`device::Device`] -- The contract external devices implement.
//! - [`event::EventBus`] -- Engine events and traveller broadcasts.
//! - [`serialize`] -- Versioned dimension snapshots via bitcode.

pub mod config;
pub mod database;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod fixed;
pub mod id;
pub mod item;
pub mod network;
pub mod node;
pub mod pathing;
pub mod position;
pub mod registry;
pub mod serialize;
pub mod traveller;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
