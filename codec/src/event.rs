//! Reliable event payloads.
//!
//! Wire layout: `[type_index][sequence][target_entity?][data]`.

use bitstream::{BitReader, BitWriter};
use wire::{EntityId, SequenceId};

use crate::error::{CodecResult, TypeKind};
use crate::registry::{Registry, TypeIndex};
use crate::state::{DynMessage, SyncMessage};

/// A reliable message, optionally about one entity.
#[derive(Debug, Clone)]
pub struct Event {
    type_index: TypeIndex,
    sequence: SequenceId,
    target: Option<EntityId>,
    data: Box<dyn DynMessage>,
}

impl Event {
    /// Creates an event without a sequence id; the sending channel assigns
    /// one on enqueue.
    #[must_use]
    pub fn new(type_index: TypeIndex, data: Box<dyn DynMessage>, target: Option<EntityId>) -> Self {
        Self {
            type_index,
            sequence: SequenceId::INVALID,
            target,
            data,
        }
    }

    #[must_use]
    pub const fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    #[must_use]
    pub const fn sequence(&self) -> SequenceId {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: SequenceId) {
        self.sequence = sequence;
    }

    #[must_use]
    pub const fn target(&self) -> Option<EntityId> {
        self.target
    }

    #[must_use]
    pub fn data(&self) -> &dyn DynMessage {
        &*self.data
    }

    /// The payload as `M`, if it is one.
    pub fn message<M: SyncMessage>(&self) -> Option<&M> {
        self.data.downcast_ref::<M>()
    }

    pub fn encode(&self, writer: &mut BitWriter) -> CodecResult<()> {
        self.type_index.encode(writer)?;
        self.sequence.encode(writer)?;
        EntityId::encode_opt(self.target, writer)?;
        self.data.encode(writer)?;
        Ok(())
    }

    pub fn decode(reader: &mut BitReader<'_>, registry: &Registry) -> CodecResult<Self> {
        let type_index = TypeIndex::decode(reader, registry, TypeKind::Event)?;
        let sequence = SequenceId::decode(reader)?;
        let target = EntityId::decode_opt(reader)?;
        let mut data = registry.create_event(type_index)?;
        data.decode(reader)?;
        Ok(Self {
            type_index,
            sequence,
            target,
            data,
        })
    }

    /// Size of the encoded event in bits.
    pub fn encoded_bits(&self) -> CodecResult<usize> {
        let mut writer = BitWriter::new();
        self.encode(&mut writer)?;
        Ok(writer.bits_written())
    }
}
