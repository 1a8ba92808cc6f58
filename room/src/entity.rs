//! Host-defined entity behavior.

use std::any::Any;

use codec::{DynMessage, DynState, EntityId, SyncMessage, SyncState, Tick};

/// Where and when a callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    pub entity: EntityId,
    /// Server tick on the server; the client's own tick on the client, or
    /// the command's tick while replaying predictions.
    pub tick: Tick,
    pub is_server: bool,
}

/// Simulation logic for one kind of entity.
///
/// The same implementation runs on both sides: the server calls
/// [`Entity::apply_command`] with commands received from the controlling
/// client, and that client calls it again while predicting ahead of the
/// server.
#[allow(unused_variables)]
pub trait Entity: Send + 'static {
    type State: SyncState;
    type Command: SyncMessage;

    /// Server only. Runs every tick after any command for the tick.
    fn update_authoritative(&mut self, state: &mut Self::State, ctx: &TickContext) {}

    /// Advances `state` by one command.
    fn apply_command(&mut self, state: &mut Self::State, command: &Self::Command, ctx: &TickContext) {
    }

    /// Server only. The controller sent nothing new for this tick.
    fn command_missing(&mut self, state: &mut Self::State, ctx: &TickContext) {}

    /// Client only. Fills in this tick's command for a controlled entity.
    fn write_command(&mut self, state: &Self::State, command: &mut Self::Command, ctx: &TickContext) {
    }

    /// Client only. Runs every tick for entities this client does not
    /// control. `next` is the next pending authoritative state, if one has
    /// arrived, for interpolation.
    fn update_proxy(&mut self, state: &Self::State, next: Option<&Self::State>, ctx: &TickContext) {}

    fn on_start(&mut self, state: &Self::State) {}

    fn on_shutdown(&mut self) {}

    fn on_frozen(&mut self) {}

    fn on_unfrozen(&mut self) {}

    fn on_control_changed(&mut self, controlled: bool) {}
}

/// Object-safe form of [`Entity`], driven with erased states.
pub(crate) trait AnyEntity: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn update_authoritative(&mut self, state: &mut dyn DynState, ctx: &TickContext);
    fn apply_command(&mut self, state: &mut dyn DynState, command: &dyn DynMessage, ctx: &TickContext);
    fn command_missing(&mut self, state: &mut dyn DynState, ctx: &TickContext);
    fn write_command(&mut self, state: &dyn DynState, ctx: &TickContext) -> Box<dyn DynMessage>;
    fn update_proxy(&mut self, state: &dyn DynState, next: Option<&dyn DynState>, ctx: &TickContext);
    fn on_start(&mut self, state: &dyn DynState);
    fn on_shutdown(&mut self);
    fn on_frozen(&mut self);
    fn on_unfrozen(&mut self);
    fn on_control_changed(&mut self, controlled: bool);
}

pub(crate) struct Erased<E>(pub(crate) E);

fn state_ref<S: SyncState>(state: &dyn DynState) -> &S {
    match state.downcast_ref::<S>() {
        Some(state) => state,
        None => panic!(
            "entity expected `{}` state, got `{}`",
            std::any::type_name::<S>(),
            state.type_name()
        ),
    }
}

fn state_mut<S: SyncState>(state: &mut dyn DynState) -> &mut S {
    let name = state.type_name();
    match state.downcast_mut::<S>() {
        Some(state) => state,
        None => panic!(
            "entity expected `{}` state, got `{name}`",
            std::any::type_name::<S>()
        ),
    }
}

impl<E: Entity> AnyEntity for Erased<E> {
    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        &mut self.0
    }

    fn update_authoritative(&mut self, state: &mut dyn DynState, ctx: &TickContext) {
        self.0.update_authoritative(state_mut(state), ctx);
    }

    fn apply_command(&mut self, state: &mut dyn DynState, command: &dyn DynMessage, ctx: &TickContext) {
        // Commands are decoded with the protocol's single command type; an
        // entity with another command type ignores them.
        if let Some(command) = command.downcast_ref::<E::Command>() {
            self.0.apply_command(state_mut(state), command, ctx);
        }
    }

    fn command_missing(&mut self, state: &mut dyn DynState, ctx: &TickContext) {
        self.0.command_missing(state_mut(state), ctx);
    }

    fn write_command(&mut self, state: &dyn DynState, ctx: &TickContext) -> Box<dyn DynMessage> {
        let mut command = E::Command::default();
        self.0.write_command(state_ref(state), &mut command, ctx);
        Box::new(command)
    }

    fn update_proxy(&mut self, state: &dyn DynState, next: Option<&dyn DynState>, ctx: &TickContext) {
        let next = next.map(state_ref::<E::State>);
        self.0.update_proxy(state_ref(state), next, ctx);
    }

    fn on_start(&mut self, state: &dyn DynState) {
        self.0.on_start(state_ref(state));
    }

    fn on_shutdown(&mut self) {
        self.0.on_shutdown();
    }

    fn on_frozen(&mut self) {
        self.0.on_frozen();
    }

    fn on_unfrozen(&mut self) {
        self.0.on_unfrozen();
    }

    fn on_control_changed(&mut self, controlled: bool) {
        self.0.on_control_changed(controlled);
    }
}
