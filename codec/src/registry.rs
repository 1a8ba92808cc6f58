//! Type registration.
//!
//! Both sides register the same state, event and command types in the same
//! order; a type's position in its table is its wire index.

use std::any::TypeId;
use std::collections::HashMap;

use bitstream::{BitReader, BitWriter};
use schema::SchemaHasher;

use crate::error::{CodecError, CodecResult, TypeKind};
use crate::state::{DynMessage, DynState, SyncMessage, SyncState};

/// Index of a registered type within its registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(u16);

impl TypeIndex {
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    pub fn encode(self, writer: &mut BitWriter) -> CodecResult<()> {
        writer.write_varu32(u32::from(self.0))?;
        Ok(())
    }

    /// Reads an index and checks it against the `kind` table of `registry`.
    pub fn decode(
        reader: &mut BitReader<'_>,
        registry: &Registry,
        kind: TypeKind,
    ) -> CodecResult<Self> {
        let raw = reader.read_varu32()?;
        let len = match kind {
            TypeKind::State => registry.states.len(),
            TypeKind::Event => registry.events.len(),
        };
        match u16::try_from(raw) {
            Ok(index) if usize::from(index) < len => Ok(Self(index)),
            _ => Err(CodecError::UnknownType { kind, index: raw }),
        }
    }
}

#[derive(Clone)]
struct StateEntry {
    name: &'static str,
    create: fn() -> Box<dyn DynState>,
    hash: fn(&mut SchemaHasher),
}

#[derive(Clone)]
struct MessageEntry {
    name: &'static str,
    type_id: TypeId,
    create: fn() -> Box<dyn DynMessage>,
    hash: fn(&mut SchemaHasher),
}

fn create_state<S: SyncState>() -> Box<dyn DynState> {
    Box::new(S::default())
}

fn hash_state<S: SyncState>(hasher: &mut SchemaHasher) {
    S::schema().hash_into(hasher);
}

fn create_message<M: SyncMessage>() -> Box<dyn DynMessage> {
    Box::new(M::default())
}

fn hash_message<M: SyncMessage>(hasher: &mut SchemaHasher) {
    M::schema().hash_into(hasher);
}

impl MessageEntry {
    fn of<M: SyncMessage>() -> Self {
        Self {
            name: M::schema().name(),
            type_id: TypeId::of::<M>(),
            create: create_message::<M>,
            hash: hash_message::<M>,
        }
    }
}

/// Registered state, event and command types.
///
/// There is at most one command type; every controllable entity produces
/// commands of that type.
#[derive(Clone, Default)]
pub struct Registry {
    states: Vec<StateEntry>,
    state_lookup: HashMap<TypeId, TypeIndex>,
    events: Vec<MessageEntry>,
    event_lookup: HashMap<TypeId, TypeIndex>,
    command: Option<MessageEntry>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a state type, returning its wire index. Registering the same
    /// type twice returns the existing index.
    pub fn register_state<S: SyncState>(&mut self) -> TypeIndex {
        if let Some(index) = self.state_lookup.get(&TypeId::of::<S>()) {
            return *index;
        }
        let index = next_index(self.states.len());
        self.states.push(StateEntry {
            name: S::schema().name(),
            create: create_state::<S>,
            hash: hash_state::<S>,
        });
        self.state_lookup.insert(TypeId::of::<S>(), index);
        index
    }

    /// Registers an event type, returning its wire index.
    pub fn register_event<M: SyncMessage>(&mut self) -> TypeIndex {
        if let Some(index) = self.event_lookup.get(&TypeId::of::<M>()) {
            return *index;
        }
        let index = next_index(self.events.len());
        self.events.push(MessageEntry::of::<M>());
        self.event_lookup.insert(TypeId::of::<M>(), index);
        index
    }

    /// Sets the command type, replacing any previous one.
    pub fn set_command<M: SyncMessage>(&mut self) {
        self.command = Some(MessageEntry::of::<M>());
    }

    #[must_use]
    pub fn with_state<S: SyncState>(mut self) -> Self {
        self.register_state::<S>();
        self
    }

    #[must_use]
    pub fn with_event<M: SyncMessage>(mut self) -> Self {
        self.register_event::<M>();
        self
    }

    #[must_use]
    pub fn with_command<M: SyncMessage>(mut self) -> Self {
        self.set_command::<M>();
        self
    }

    pub fn state_index<S: SyncState>(&self) -> Option<TypeIndex> {
        self.state_lookup.get(&TypeId::of::<S>()).copied()
    }

    /// Index of the concrete type behind `state`.
    pub fn state_index_of(&self, state: &dyn DynState) -> Option<TypeIndex> {
        self.state_lookup.get(&state.as_any().type_id()).copied()
    }

    pub fn event_index_of(&self, event: &dyn DynMessage) -> Option<TypeIndex> {
        self.event_lookup.get(&event.as_any().type_id()).copied()
    }

    /// Whether `command` is of the registered command type.
    pub fn is_command(&self, command: &dyn DynMessage) -> bool {
        self.command
            .as_ref()
            .is_some_and(|entry| entry.type_id == command.as_any().type_id())
    }

    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn state_name(&self, index: TypeIndex) -> Option<&'static str> {
        self.states.get(usize::from(index.0)).map(|entry| entry.name)
    }

    pub fn event_name(&self, index: TypeIndex) -> Option<&'static str> {
        self.events.get(usize::from(index.0)).map(|entry| entry.name)
    }

    /// Creates a default-valued state of the type at `index`.
    pub fn create_state(&self, index: TypeIndex) -> CodecResult<Box<dyn DynState>> {
        self.states
            .get(usize::from(index.0))
            .map(|entry| (entry.create)())
            .ok_or(CodecError::UnknownType {
                kind: TypeKind::State,
                index: u32::from(index.0),
            })
    }

    pub fn create_event(&self, index: TypeIndex) -> CodecResult<Box<dyn DynMessage>> {
        self.events
            .get(usize::from(index.0))
            .map(|entry| (entry.create)())
            .ok_or(CodecError::UnknownType {
                kind: TypeKind::Event,
                index: u32::from(index.0),
            })
    }

    pub fn create_command(&self) -> CodecResult<Box<dyn DynMessage>> {
        self.command
            .as_ref()
            .map(|entry| (entry.create)())
            .ok_or(CodecError::NoCommandType)
    }

    /// Deterministic hash of every registered type and its field layout, in
    /// registration order. Peers with different fingerprints cannot decode
    /// each other's packets.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = SchemaHasher::new();
        hasher.write_len(self.states.len());
        for entry in &self.states {
            (entry.hash)(&mut hasher);
        }
        hasher.write_len(self.events.len());
        for entry in &self.events {
            (entry.hash)(&mut hasher);
        }
        match &self.command {
            Some(entry) => {
                hasher.write_u8(1);
                (entry.hash)(&mut hasher);
            }
            None => hasher.write_u8(0),
        }
        hasher.finish()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "states",
                &self.states.iter().map(|e| e.name).collect::<Vec<_>>(),
            )
            .field(
                "events",
                &self.events.iter().map(|e| e.name).collect::<Vec<_>>(),
            )
            .field("command", &self.command.as_ref().map(|e| e.name))
            .finish()
    }
}

fn next_index(len: usize) -> TypeIndex {
    match u16::try_from(len) {
        Ok(index) => TypeIndex(index),
        Err(_) => panic!("too many registered types"),
    }
}
