//! Engine events and the traveller notification fan-out.
//!
//! Everything observable that happens during topology edits and ticks is
//! recorded as an [`Event`] on the [`EventBus`]. The game drains the bus
//! after each step.
//!
//! Traveller register/unregister messages are additionally delivered to
//! observers watching the traveller's position (clients near the tube
//! that need to render the item). Observers subscribe with a cubic area;
//! each message is copied into the mailbox of every observer whose area
//! contains the traveller.

use crate::fixed::Ticks;
use crate::id::{DimensionId, NetworkId, TravellerId};
use crate::item::ItemStack;
use crate::node::NodeKey;
use crate::position::Position;
use crate::traveller::Traveller;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Traveller messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TravellerAction {
    Register,
    Unregister,
}

/// What an observer needs to know about a traveller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravellerSnapshot {
    pub id: TravellerId,
    pub network: NetworkId,
    pub current: NodeKey,
    pub stack: ItemStack,
    /// Remaining path positions, next hop first.
    pub path: Vec<Position>,
}

impl TravellerSnapshot {
    pub fn of(traveller: &Traveller) -> Self {
        Self {
            id: traveller.id,
            network: traveller.network,
            current: traveller.current,
            stack: traveller.stack.clone(),
            path: traveller.path.iter().map(|s| s.position).collect(),
        }
    }
}

/// A traveller register/unregister broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravellerMessage {
    pub action: TravellerAction,
    pub dimension: DimensionId,
    pub snapshot: TravellerSnapshot,
}

impl TravellerMessage {
    pub fn position(&self) -> Position {
        self.snapshot.current.position
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Traveller(TravellerMessage),
    /// A traveller's payload reached a device that took all of it.
    TravellerDelivered {
        dimension: DimensionId,
        network: NetworkId,
        traveller: TravellerId,
        at: NodeKey,
    },
    /// A payload was ejected into the world at `position`.
    PayloadDropped {
        dimension: DimensionId,
        position: Position,
        stack: ItemStack,
    },
    NetworkCreated {
        dimension: DimensionId,
        network: NetworkId,
    },
    NetworkMerged {
        dimension: DimensionId,
        sources: Vec<NetworkId>,
        into: NetworkId,
    },
    NetworkSplit {
        dimension: DimensionId,
        source: NetworkId,
        created: Vec<NetworkId>,
    },
    /// Travellers that could not be restored from a snapshot.
    TravellersLost {
        dimension: DimensionId,
        network: NetworkId,
        count: usize,
    },
}

/// Discriminant tag for event types, used for suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Traveller,
    TravellerDelivered,
    PayloadDropped,
    NetworkCreated,
    NetworkMerged,
    NetworkSplit,
    TravellersLost,
}

const EVENT_KIND_COUNT: usize = 7;

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Traveller(_) => EventKind::Traveller,
            Event::TravellerDelivered { .. } => EventKind::TravellerDelivered,
            Event::PayloadDropped { .. } => EventKind::PayloadDropped,
            Event::NetworkCreated { .. } => EventKind::NetworkCreated,
            Event::NetworkMerged { .. } => EventKind::NetworkMerged,
            Event::NetworkSplit { .. } => EventKind::NetworkSplit,
            Event::TravellersLost { .. } => EventKind::TravellersLost,
        }
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Identifies an observer (typically a connected client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u32);

/// The cubic area an observer watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchArea {
    pub dimension: DimensionId,
    pub center: Position,
    pub radius: u32,
}

impl WatchArea {
    pub fn contains(&self, dimension: DimensionId, position: Position) -> bool {
        dimension == self.dimension
            && (position.x - self.center.x).unsigned_abs() <= self.radius
            && (position.y - self.center.y).unsigned_abs() <= self.radius
            && (position.z - self.center.z).unsigned_abs() <= self.radius
    }
}

#[derive(Debug, Default)]
struct Observer {
    area: Option<WatchArea>,
    mailbox: Vec<TravellerMessage>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Buffered events plus per-observer traveller mailboxes.
#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<(Ticks, Event)>,
    suppressed: [bool; EVENT_KIND_COUNT],
    observers: BTreeMap<ObserverId, Observer>,
    tick: Ticks,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_tick(&mut self, tick: Ticks) {
        self.tick = tick;
    }

    /// Record an event. Traveller messages are also fanned out to watching
    /// observers, even when the traveller kind is suppressed.
    pub fn emit(&mut self, event: Event) {
        if let Event::Traveller(message) = &event {
            for observer in self.observers.values_mut() {
                if observer
                    .area
                    .is_some_and(|a| a.contains(message.dimension, message.position()))
                {
                    observer.mailbox.push(message.clone());
                }
            }
        }
        if !self.suppressed[event.kind() as usize] {
            self.events.push((self.tick, event));
        }
    }

    /// Stop recording events of `kind`.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind as usize] = true;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind as usize] = false;
    }

    /// Take every recorded event, oldest first.
    pub fn drain(&mut self) -> Vec<(Ticks, Event)> {
        std::mem::take(&mut self.events)
    }

    pub fn pending(&self) -> &[(Ticks, Event)] {
        &self.events
    }

    /// Start (or move) watching an area.
    pub fn watch(&mut self, observer: ObserverId, area: WatchArea) {
        self.observers.entry(observer).or_default().area = Some(area);
    }

    /// Stop watching and discard any undelivered messages.
    pub fn unwatch(&mut self, observer: ObserverId) {
        self.observers.remove(&observer);
    }

    /// Take the traveller messages queued for `observer`.
    pub fn take_messages(&mut self, observer: ObserverId) -> Vec<TravellerMessage> {
        self.observers
            .get_mut(&observer)
            .map(|o| std::mem::take(&mut o.mailbox))
            .unwrap_or_default()
    }
}
