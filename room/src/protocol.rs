//! Registration of entity kinds, events and the command type.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use codec::{Registry, SyncMessage, SyncState, TypeIndex};
use schema::MessageSchema;

use crate::entity::{AnyEntity, Entity, Erased};

/// Command type for entities that are never controlled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoCommand;

impl SyncMessage for NoCommand {
    fn schema() -> &'static MessageSchema<Self> {
        static SCHEMA: OnceLock<MessageSchema<NoCommand>> = OnceLock::new();
        SCHEMA.get_or_init(|| match MessageSchema::builder("no_command").build() {
            Ok(schema) => schema,
            Err(err) => panic!("empty command schema: {err}"),
        })
    }
}

type Factory = fn() -> Box<dyn AnyEntity>;

fn create<E: Entity + Default>() -> Box<dyn AnyEntity> {
    Box::new(Erased(E::default()))
}

/// Everything both sides must agree on before exchanging packets.
///
/// Server and client build their protocol with the same calls in the same
/// order; [`Protocol::fingerprint`] lets hosts check that they did.
#[derive(Clone, Default)]
pub struct Protocol {
    registry: Registry,
    factories: HashMap<TypeIndex, Factory>,
    command: Option<TypeId>,
}

impl Protocol {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity kind. Clients create it with `E::default()` when
    /// the server first sends one.
    ///
    /// # Panics
    ///
    /// Panics if another kind already uses `E::State`, or if `E::Command`
    /// differs from a command type registered earlier.
    #[must_use]
    pub fn entity<E: Entity + Default>(mut self) -> Self {
        assert!(
            self.registry.state_index::<E::State>().is_none(),
            "state `{}` is already bound to an entity kind",
            E::State::schema().name()
        );
        let index = self.registry.register_state::<E::State>();
        self.factories.insert(index, create::<E>);

        let command = TypeId::of::<E::Command>();
        if command != TypeId::of::<NoCommand>() {
            match self.command {
                None => {
                    self.registry.set_command::<E::Command>();
                    self.command = Some(command);
                }
                Some(existing) => assert!(
                    existing == command,
                    "only one command type per protocol, `{}` conflicts",
                    E::Command::schema().name()
                ),
            }
        }
        self
    }

    #[must_use]
    pub fn event<M: SyncMessage>(mut self) -> Self {
        self.registry.register_event::<M>();
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Hash of every registered type, field and codec.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.registry.fingerprint()
    }

    pub(crate) fn state_index<S: SyncState>(&self) -> Option<TypeIndex> {
        self.registry.state_index::<S>()
    }

    pub(crate) fn create_entity(&self, index: TypeIndex) -> Option<Box<dyn AnyEntity>> {
        self.factories.get(&index).map(|create| create())
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("registry", &self.registry)
            .field("entity_kinds", &self.factories.len())
            .finish_non_exhaustive()
    }
}
