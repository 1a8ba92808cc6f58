//! Notifications queued by rooms for the host to drain.

use codec::{CodecError, EntityId, Event};
use repgraph::PeerId;

#[derive(Debug, Clone)]
pub enum ServerNotification {
    PeerAdded(PeerId),
    PeerRemoved(PeerId),
    /// A new event arrived from `peer`.
    Event { peer: PeerId, event: Event },
    /// A packet from `peer` failed to decode and was dropped whole.
    CorruptPacket { peer: PeerId, error: CodecError },
    /// A removed entity finished lingering and was released.
    EntityReleased(EntityId),
    ControlChanged {
        entity: EntityId,
        from: Option<PeerId>,
        to: Option<PeerId>,
    },
}

#[derive(Debug, Clone)]
pub enum ClientNotification {
    /// The first state for `entity` was applied.
    EntityAdded {
        entity: EntityId,
        kind: &'static str,
    },
    EntityRemoved(EntityId),
    Frozen(EntityId),
    Unfrozen(EntityId),
    ControlGained(EntityId),
    ControlLost(EntityId),
    Event(Event),
    CorruptPacket(CodecError),
}
