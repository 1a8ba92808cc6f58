//! Client commands.
//!
//! A command update carries the recent commands for one controlled entity:
//! `[entity_id][count][client_tick data]...`. Commands are resent in every
//! update until the server acknowledges them, so each update is redundant
//! with the previous ones.

use bitstream::{BitReader, BitWriter};
use wire::{pack_list, unpack_list, EntityId, Limits, ListBudget, Tick};

use crate::buffer::Timed;
use crate::error::CodecResult;
use crate::registry::Registry;
use crate::state::{DynMessage, SyncMessage};

/// Input for one entity at one client tick.
#[derive(Debug, Clone)]
pub struct Command {
    client_tick: Tick,
    data: Box<dyn DynMessage>,
}

impl Command {
    #[must_use]
    pub fn new(client_tick: Tick, data: Box<dyn DynMessage>) -> Self {
        Self { client_tick, data }
    }

    #[must_use]
    pub fn data(&self) -> &dyn DynMessage {
        &*self.data
    }

    pub fn message<M: SyncMessage>(&self) -> Option<&M> {
        self.data.downcast_ref::<M>()
    }

    pub fn encode(&self, writer: &mut BitWriter) -> CodecResult<()> {
        self.client_tick.encode(writer)?;
        self.data.encode(writer)?;
        Ok(())
    }

    pub fn decode(reader: &mut BitReader<'_>, registry: &Registry) -> CodecResult<Self> {
        let client_tick = Tick::decode_valid(reader, "client_tick")?;
        let mut data = registry.create_command()?;
        data.decode(reader)?;
        Ok(Self { client_tick, data })
    }
}

impl Timed for Command {
    fn tick(&self) -> Tick {
        self.client_tick
    }
}

/// Recent commands for one controlled entity, newest first.
#[derive(Debug, Clone)]
pub struct CommandUpdate {
    entity: EntityId,
    commands: Vec<Command>,
}

impl CommandUpdate {
    #[must_use]
    pub fn new(entity: EntityId, commands: Vec<Command>) -> Self {
        Self { entity, commands }
    }

    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    fn budget(limits: &Limits) -> ListBudget {
        ListBudget::new(
            limits.max_command_update_bytes,
            limits.command_section_bytes,
            limits.list_items(),
        )
    }

    /// Writes the entity and as many commands as fit the command budget.
    pub fn encode(&self, writer: &mut BitWriter, limits: &Limits) -> CodecResult<()> {
        self.entity.encode(writer)?;
        pack_list(writer, Self::budget(limits), &self.commands, |w, command: &Command| {
            command.encode(w)
        })?;
        Ok(())
    }

    pub fn decode(
        reader: &mut BitReader<'_>,
        registry: &Registry,
        limits: &Limits,
    ) -> CodecResult<Self> {
        let entity = EntityId::decode(reader)?;
        let commands = unpack_list(reader, Self::budget(limits), |r| Command::decode(r, registry))?;
        Ok(Self { entity, commands })
    }
}
