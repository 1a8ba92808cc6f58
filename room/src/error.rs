use codec::{CodecError, EntityId};
use repgraph::PeerId;
use thiserror::Error;

use crate::config::ConfigError;

/// Rejected room operation. Network input never produces one of these;
/// corrupt packets are dropped and reported as notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RoomError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("`{0}` is not registered as an entity state")]
    UnregisteredState(&'static str),

    #[error("`{0}` is not registered as an event")]
    UnregisteredEvent(&'static str),

    /// The event could never fit in a packet.
    #[error("event encodes to {bits} bits, cap is {limit_bits}")]
    EventTooLarge { bits: usize, limit_bits: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type RoomResult<T> = Result<T, RoomError>;
