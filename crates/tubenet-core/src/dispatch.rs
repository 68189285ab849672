//! Entry dispatch: how entry devices put payloads onto a network.
//!
//! An entry device owns a [`SlotBuffer`], usually sized by
//! [`NetworkConfig::entry_buffer`](crate::config::NetworkConfig::entry_buffer).
//! A payload with nowhere to go is parked there; what the buffer cannot
//! hold is dropped into the world. Nothing offered to the network is lost
//! silently.

use crate::engine::Engine;
use crate::event::Event;
use crate::id::{DimensionId, NetworkId, TravellerId};
use crate::item::{ItemStack, SlotBuffer};
use crate::node::NodeKey;
use crate::position::Position;
use crate::traveller::Traveller;
use tracing::error;

/// Topology references that should exist but do not.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("no node at {key} in {dimension:?}")]
    MissingNode { dimension: DimensionId, key: NodeKey },
    #[error("{network} is not in {dimension:?}")]
    MissingNetwork { dimension: DimensionId, network: NetworkId },
}

/// What happened to an inserted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A traveller is on its way.
    Sent(TravellerId),
    /// No destination; the whole payload went into the buffer.
    Buffered,
    /// No destination and the buffer was full; `dropped` went to the world.
    Overflowed { dropped: ItemStack },
}

impl Engine {
    /// Offer `stack` to the network at the entry node.
    pub fn insert_payload(
        &mut self,
        dimension: DimensionId,
        entry: NodeKey,
        stack: ItemStack,
        buffer: &mut SlotBuffer,
    ) -> Result<InsertOutcome, TopologyError> {
        self.insert_payload_to(dimension, entry, stack, None, buffer)
    }

    /// Like [`Engine::insert_payload`], but only endpoints at `destination`
    /// may take the payload.
    pub fn insert_payload_to(
        &mut self,
        dimension: DimensionId,
        entry: NodeKey,
        stack: ItemStack,
        destination: Option<Position>,
        buffer: &mut SlotBuffer,
    ) -> Result<InsertOutcome, TopologyError> {
        let (database, ctx) = self.parts(dimension);
        let network_id = database
            .network_at(ctx.positions, entry.position, entry.face)
            .ok_or(TopologyError::MissingNode { dimension, key: entry })?;
        if database
            .get(network_id)
            .and_then(|n| n.view(ctx.positions).node_exact(entry))
            .is_none()
        {
            return Err(TopologyError::MissingNode { dimension, key: entry });
        }

        let id = database.allocate_traveller_id();
        let mut traveller = Traveller::new(id, network_id, entry, stack);
        traveller.destination = destination;
        let network = database.get_mut(network_id).ok_or(TopologyError::MissingNetwork {
            dimension,
            network: network_id,
        })?;

        if traveller.regenerate_path(&network.view(ctx.positions), ctx.devices).is_ok() {
            network.register_traveller(ctx.events, traveller);
            return Ok(InsertOutcome::Sent(id));
        }

        let leftover = buffer.insert(traveller.stack);
        if leftover.is_empty() {
            return Ok(InsertOutcome::Buffered);
        }
        ctx.events.emit(Event::PayloadDropped {
            dimension,
            position: entry.position,
            stack: leftover.clone(),
        });
        Ok(InsertOutcome::Overflowed { dropped: leftover })
    }

    /// Send up to `max` items from the front of `buffer`.
    ///
    /// Topology errors are logged with the state around the entry and
    /// leave the buffer as it was.
    pub fn try_push(
        &mut self,
        dimension: DimensionId,
        entry: NodeKey,
        buffer: &mut SlotBuffer,
        max: u32,
    ) -> Option<TravellerId> {
        let stack = buffer.extract_first(max)?;
        match self.insert_payload(dimension, entry, stack.clone(), buffer) {
            Ok(InsertOutcome::Sent(id)) => Some(id),
            Ok(_) => None,
            Err(err) => {
                error!(
                    error = %err,
                    state = %self.describe(dimension, entry.position, entry.face),
                    "payload push failed"
                );
                let leftover = buffer.insert(stack);
                if !leftover.is_empty() {
                    self.event_bus.emit(Event::PayloadDropped {
                        dimension,
                        position: entry.position,
                        stack: leftover,
                    });
                }
                None
            }
        }
    }
}
