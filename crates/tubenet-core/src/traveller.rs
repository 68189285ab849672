//! Travellers: payloads in transit across a network.
//!
//! A traveller sits on one node at a time and carries the remaining path to
//! its target. Progress is a fixed-point accumulator; the owning network
//! takes one hop for every whole unit accumulated.

use crate::device::DeviceArena;
use crate::fixed::Fixed64;
use crate::id::{NetworkId, TravellerId};
use crate::item::ItemStack;
use crate::node::{Node, NodeKey};
use crate::pathing::{NetworkView, PathStep, find_route};
use crate::position::{Face, Position, face_to_index, index_to_face};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TravellerError {
    #[error("traveller {0:?} carries nothing")]
    EmptyPayload(TravellerId),
    #[error("invalid face index {0}")]
    InvalidFace(i8),
    #[error("traveller {traveller:?} has no route from {from}")]
    NoRoute { traveller: TravellerId, from: NodeKey },
    #[error("traveller {traveller:?} is on {at}, which is not in {network}")]
    Detached {
        traveller: TravellerId,
        network: NetworkId,
        at: NodeKey,
    },
}

/// A payload moving through a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traveller {
    pub id: TravellerId,
    pub network: NetworkId,
    pub stack: ItemStack,
    /// The node the traveller currently occupies.
    pub current: NodeKey,
    pub previous: Option<NodeKey>,
    /// Face of the current node the traveller entered through.
    pub entered: Option<Face>,
    pub path: VecDeque<PathStep>,
    pub progress: Fixed64,
    /// Restrict delivery to endpoints at this position.
    pub destination: Option<Position>,
}

impl Traveller {
    pub fn new(id: TravellerId, network: NetworkId, at: NodeKey, stack: ItemStack) -> Self {
        Self {
            id,
            network,
            stack,
            current: at,
            previous: None,
            entered: None,
            path: VecDeque::new(),
            progress: Fixed64::ZERO,
            destination: None,
        }
    }

    #[must_use]
    pub fn with_destination(mut self, destination: Position) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn position(&self) -> Position {
        self.current.position
    }

    /// Where the current path ends, if there is one.
    pub fn target(&self) -> Option<NodeKey> {
        self.path.back().map(PathStep::key)
    }

    /// Whether `node`, entered through `from`, may end this traveller's trip.
    pub fn can_end_at(&self, node: &Node, from: Face, devices: &DeviceArena) -> bool {
        node.is_endpoint()
            && node.key() != self.current
            && self.destination.is_none_or(|d| d == node.position)
            && devices.accepts(node, self, from)
    }

    /// Replace the path with the cheapest route from the current node.
    pub fn regenerate_path(
        &mut self,
        view: &NetworkView<'_>,
        devices: &DeviceArena,
    ) -> Result<(), TravellerError> {
        let route = find_route(view, self.current, |node, from| {
            self.can_end_at(node, from, devices)
        })
        .ok_or(
            TravellerError::NoRoute {
                traveller: self.id,
                from: self.current,
            },
        )?;
        self.path = route.steps.into();
        Ok(())
    }

    /// Move onto the next step of the path.
    pub fn advance(&mut self) -> Option<PathStep> {
        let step = self.path.pop_front()?;
        self.previous = Some(self.current);
        self.current = step.key();
        self.entered = Some(step.from);
        Some(step)
    }

    pub fn to_record(&self) -> TravellerRecord {
        TravellerRecord {
            id: self.id.0,
            stack: self.stack.clone(),
            position: self.current.position.to_long(),
            face: face_to_index(self.current.face),
            entered: face_to_index(self.entered),
            path: self
                .path
                .iter()
                .map(|s| StepRecord {
                    position: s.position.to_long(),
                    face: face_to_index(s.face),
                    from: face_to_index(Some(s.from)),
                })
                .collect(),
            progress: self.progress.to_bits(),
            destination: self.destination.map(Position::to_long),
        }
    }

    /// Rebuild a traveller owned by `network` from its record.
    pub fn from_record(
        record: &TravellerRecord,
        network: NetworkId,
    ) -> Result<Self, TravellerError> {
        let id = TravellerId(record.id);
        if record.stack.is_empty() {
            return Err(TravellerError::EmptyPayload(id));
        }
        let face = index_to_face(record.face).map_err(TravellerError::InvalidFace)?;
        let entered = index_to_face(record.entered).map_err(TravellerError::InvalidFace)?;
        let path = record
            .path
            .iter()
            .map(|s| {
                let face = index_to_face(s.face).map_err(TravellerError::InvalidFace)?;
                let from = index_to_face(s.from)
                    .map_err(TravellerError::InvalidFace)?
                    .ok_or(TravellerError::InvalidFace(s.from))?;
                Ok(PathStep {
                    position: Position::from_long(s.position),
                    face,
                    from,
                })
            })
            .collect::<Result<VecDeque<_>, TravellerError>>()?;

        Ok(Self {
            id,
            network,
            stack: record.stack.clone(),
            current: NodeKey::new(Position::from_long(record.position), face),
            previous: None,
            entered,
            path,
            progress: Fixed64::from_bits(record.progress),
            destination: record.destination.map(Position::from_long),
        })
    }
}

/// Persisted form of a traveller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravellerRecord {
    pub id: u64,
    pub stack: ItemStack,
    pub position: i64,
    pub face: i8,
    pub entered: i8,
    pub path: Vec<StepRecord>,
    /// Raw bits of the fixed-point progress.
    pub progress: i64,
    pub destination: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub position: i64,
    pub face: i8,
    pub from: i8,
}
