//! Predicting side of a room.

use std::collections::{BTreeMap, HashMap, VecDeque};

use codec::{
    decode_server_packet, encode_client_packet, Command, CommandUpdate, DejitterBuffer, Delta,
    DynMessage, DynState, EntityId, Event, Handle, Limits, PacketHeader, Pooled, Pools,
    RollingBuffer, SequenceId, SyncMessage, SyncState, Tick, Timed, TypeIndex, View, ViewEntry,
};
use tracing::{debug, warn};

use crate::channel::{check_event_size, EventChannel};
use crate::clock::Clock;
use crate::config::RoomConfig;
use crate::entity::{AnyEntity, Entity, TickContext};
use crate::error::{RoomError, RoomResult};
use crate::notify::ClientNotification;
use crate::protocol::Protocol;
use crate::transport::{Transport, SERVER_PEER};

struct ClientEntity {
    type_index: TypeIndex,
    behavior: Box<dyn AnyEntity>,
    /// Latest state applied from the server.
    auth: Box<dyn DynState>,
    /// `auth` plus local prediction; what the host reads.
    state: Box<dyn DynState>,
    /// Next pending server state, for interpolation.
    next: Option<Box<dyn DynState>>,
    deltas: DejitterBuffer<Pooled<Delta>>,
    last_applied: Tick,
    started: bool,
    frozen: bool,
    controlled: bool,
    removed_at: Option<Tick>,
    commands: RollingBuffer<Pooled<Command>>,
    command_ack: Tick,
}

impl ClientEntity {
    /// Returns every pooled delta and command the entity holds.
    fn release(&mut self, pools: &mut Pools) {
        pools
            .deltas
            .release(self.deltas.drain().map(|pooled| pooled.handle()));
        pools
            .commands
            .release(self.commands.drain().map(|pooled| pooled.handle()));
    }
}

/// Client room: mirrors the server's entities, predicts the ones it
/// controls and reports what it has received.
///
/// Server deltas wait in per-entity dejitter buffers and are applied once
/// the estimated server tick reaches them, so proxies play back a steady
/// delay behind the server.
pub struct ClientRoom {
    protocol: Protocol,
    config: RoomConfig,
    limits: Limits,
    tick: Tick,
    clock: Clock,
    entities: BTreeMap<EntityId, ClientEntity>,
    /// Removed entities and their removal tick; later deltas for them are
    /// late copies and are ignored.
    tombstones: HashMap<EntityId, Tick>,
    view: View,
    /// Removed entities whose view entry goes out once more, so the server
    /// sees the removal arrived.
    departed: Vec<EntityId>,
    pools: Pools,
    events: EventChannel,
    notifications: VecDeque<ClientNotification>,
}

impl ClientRoom {
    pub fn new(protocol: Protocol, config: RoomConfig) -> RoomResult<Self> {
        config.validate()?;
        let clock = Clock::new(config.server_send_rate, config.delay_min, config.delay_max);
        let events = EventChannel::new(config.event_window());
        Ok(Self {
            protocol,
            config,
            limits: Limits::default(),
            tick: Tick::INVALID,
            clock,
            entities: BTreeMap::new(),
            tombstones: HashMap::new(),
            view: View::new(),
            departed: Vec::new(),
            pools: Pools::new(),
            events,
            notifications: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// This client's own tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Estimated server tick that deltas are being applied up to.
    #[must_use]
    pub const fn server_tick(&self) -> Tick {
        self.clock.estimated_remote()
    }

    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub const fn config(&self) -> &RoomConfig {
        &self.config
    }

    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    #[must_use]
    pub const fn view(&self) -> &View {
        &self.view
    }

    /// Pooled deltas, commands and in-flight packet objects.
    #[must_use]
    pub const fn pools(&self) -> &Pools {
        &self.pools
    }

    // Entities

    /// Started entities, ascending.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.started)
            .map(|(id, _)| *id)
    }

    /// Entities this client currently controls.
    pub fn controlled(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.started && entity.controlled)
            .map(|(id, _)| *id)
    }

    #[must_use]
    pub fn is_controlled(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|entity| entity.controlled)
    }

    #[must_use]
    pub fn is_frozen(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|entity| entity.frozen)
    }

    /// Presented state: predicted for controlled entities, otherwise the
    /// latest server state.
    pub fn state<S: SyncState>(&self, id: EntityId) -> Option<&S> {
        self.started(id)?.state.downcast_ref::<S>()
    }

    /// Latest state applied from the server.
    pub fn authoritative<S: SyncState>(&self, id: EntityId) -> Option<&S> {
        self.started(id)?.auth.downcast_ref::<S>()
    }

    /// Next pending server state, if one has arrived.
    pub fn next_state<S: SyncState>(&self, id: EntityId) -> Option<&S> {
        self.started(id)?.next.as_ref()?.downcast_ref::<S>()
    }

    pub fn behavior<E: Entity>(&self, id: EntityId) -> Option<&E> {
        self.started(id)?.behavior.as_any().downcast_ref::<E>()
    }

    pub fn behavior_mut<E: Entity>(&mut self, id: EntityId) -> Option<&mut E> {
        self.entities
            .get_mut(&id)
            .filter(|entity| entity.started)?
            .behavior
            .as_any_mut()
            .downcast_mut::<E>()
    }

    /// Commands not yet acknowledged by the server.
    #[must_use]
    pub fn pending_commands(&self, id: EntityId) -> usize {
        self.entities
            .get(&id)
            .map_or(0, |entity| entity.commands.len())
    }

    fn started(&self, id: EntityId) -> Option<&ClientEntity> {
        self.entities.get(&id).filter(|entity| entity.started)
    }

    // Events

    /// Queues `message` for the server with the configured attempt count.
    pub fn send_event<M: SyncMessage>(
        &mut self,
        message: M,
        target: Option<EntityId>,
    ) -> RoomResult<SequenceId> {
        let data: Box<dyn DynMessage> = Box::new(message);
        let index = self
            .protocol
            .registry()
            .event_index_of(&*data)
            .ok_or(RoomError::UnregisteredEvent(M::schema().name()))?;
        let event = Event::new(index, data, target);
        check_event_size(&event, &self.limits)?;
        Ok(self.events.enqueue(event, self.config.event_attempts))
    }

    pub fn drain_notifications(&mut self) -> impl Iterator<Item = ClientNotification> + '_ {
        self.notifications.drain(..)
    }

    // Network

    /// Handles one packet from the server. Corrupt packets are dropped
    /// whole.
    pub fn receive(&mut self, bytes: &[u8]) {
        let packet = match decode_server_packet(
            bytes,
            self.protocol.registry(),
            &self.limits,
            &mut self.pools,
        ) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(len = bytes.len(), %error, "dropping corrupt packet");
                self.notifications
                    .push_back(ClientNotification::CorruptPacket(error));
                return;
            }
        };
        let header = packet.header;
        self.clock.observe(header.sender_tick);
        self.events.acknowledge(header.ack_event);
        for handle in packet.events {
            let fresh = self
                .pools
                .events
                .get(handle)
                .is_some_and(|event| self.events.receive(event));
            // Fresh events pass to the host; duplicates are freed.
            if let (true, Some(event)) = (fresh, self.pools.events.remove(handle)) {
                self.notifications.push_back(ClientNotification::Event(event));
            }
        }
        for handle in packet.deltas {
            if !self.file_delta(handle) {
                self.pools.deltas.remove(handle);
            }
        }
    }

    /// Files a pooled delta in its entity's dejitter buffer. Returns `false`
    /// when the delta is not kept and should go back to the pool.
    fn file_delta(&mut self, handle: Handle<Delta>) -> bool {
        let Some(delta) = self.pools.deltas.get(handle) else {
            return false;
        };
        let id = delta.entity();
        if self.tombstones.contains_key(&id) {
            return false;
        }
        if !self.entities.contains_key(&id) {
            let Some(entity) = self.create_entity(delta) else {
                return false;
            };
            self.entities.insert(id, entity);
        }
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if let Some(payload) = delta.payload() {
            if payload.type_index() != entity.type_index {
                warn!(entity = %id, "delta type does not match entity, ignoring");
                return false;
            }
        }
        let tick = delta.tick();
        let frozen = delta.is_frozen();
        match entity.deltas.store(Pooled::new(tick, handle)) {
            Ok(displaced) => {
                if let Some(old) = displaced {
                    self.pools.deltas.remove(old.handle());
                }
                self.view.record(ViewEntry {
                    entity: id,
                    tick,
                    frozen,
                });
                true
            }
            Err(_) => {
                debug!(entity = %id, %tick, "ignored stale delta");
                false
            }
        }
    }

    /// Builds a mirror for a first delta. Frozen and removal deltas never
    /// create entities.
    fn create_entity(&self, delta: &Delta) -> Option<ClientEntity> {
        let payload = delta.payload()?;
        if payload.removed_tick().is_some() {
            return None;
        }
        let type_index = payload.type_index();
        let behavior = self.protocol.create_entity(type_index)?;
        let auth = self.protocol.registry().create_state(type_index).ok()?;
        let state = auth.clone();
        Some(ClientEntity {
            type_index,
            behavior,
            auth,
            state,
            next: None,
            deltas: DejitterBuffer::new(self.config.dejitter_length, self.config.server_send_rate),
            last_applied: Tick::INVALID,
            started: false,
            frozen: false,
            controlled: false,
            removed_at: None,
            commands: RollingBuffer::new(self.config.command_buffer),
            command_ack: Tick::INVALID,
        })
    }

    /// Runs one client tick and sends a packet if it is a send tick.
    pub fn update(&mut self, transport: &mut impl Transport) {
        self.tick = self.tick.next();
        self.clock.tick();
        let server_tick = self.clock.estimated_remote();
        let tick = self.tick;

        let mut removed = Vec::new();
        for (&id, entity) in &mut self.entities {
            if !advance(
                id,
                entity,
                server_tick,
                tick,
                &mut self.pools,
                &mut self.notifications,
            ) {
                removed.push(id);
            }
        }
        for id in removed {
            if let Some(mut entity) = self.entities.remove(&id) {
                let removed_at = entity.removed_at.unwrap_or(server_tick);
                self.tombstones.insert(id, removed_at);
                entity.release(&mut self.pools);
            }
            self.departed.push(id);
        }

        let linger = i64::try_from(self.config.dejitter_length)
            .unwrap_or(i64::MAX)
            .saturating_mul(i64::from(self.config.server_send_rate));
        self.tombstones
            .retain(|_, removed_at| server_tick.diff(*removed_at) <= linger);

        if tick.raw() % self.config.client_send_rate == 0 {
            self.send(transport);
        }
    }

    fn send(&mut self, transport: &mut impl Transport) {
        let per_update = self.config.commands_per_update;
        let pools = &mut self.pools;
        let updates: Vec<CommandUpdate> = self
            .entities
            .iter()
            .filter(|(_, entity)| {
                entity.controlled && !entity.frozen && entity.removed_at.is_none()
            })
            .map(|(&id, entity)| {
                let newest_first = entity
                    .commands
                    .iter()
                    .rev()
                    .take(per_update)
                    .filter_map(|pooled| pools.commands.get(pooled.handle()).cloned());
                CommandUpdate::new(id, newest_first.collect())
            })
            .filter(|update| !update.commands().is_empty())
            .collect();
        let handles: Vec<Handle<CommandUpdate>> = updates
            .into_iter()
            .map(|update| pools.updates.insert(update))
            .collect();
        let updates: Vec<&CommandUpdate> = handles
            .iter()
            .filter_map(|handle| pools.updates.get(*handle))
            .collect();
        let view = self.view.by_recency();

        let picked = self.events.select(|_| true);
        let events: Vec<&Event> = picked
            .iter()
            .filter_map(|&index| self.events.get(index))
            .collect();
        let header = PacketHeader::new(
            self.tick,
            self.clock.latest_remote(),
            self.events.latest_received(),
        );
        match encode_client_packet(&header, &events, &updates, &view, &self.limits) {
            Ok(packed) => {
                self.events.mark_sent(&picked[..packed.events]);
                transport.send(SERVER_PEER, &packed.bytes);
            }
            Err(error) => warn!(%error, "failed to encode packet"),
        }
        self.pools.updates.release(handles);
        for id in self.departed.drain(..) {
            self.view.remove(id);
        }
    }
}

/// Steps one mirrored entity. Returns `false` once its removal takes effect.
fn advance(
    id: EntityId,
    entity: &mut ClientEntity,
    server_tick: Tick,
    tick: Tick,
    pools: &mut Pools,
    notifications: &mut VecDeque<ClientNotification>,
) -> bool {
    let (arrived, next) = entity.deltas.range_and_next(entity.last_applied, server_tick);
    for pooled in arrived {
        let Some(delta) = pools.deltas.get(pooled.handle()) else {
            continue;
        };
        entity.last_applied = pooled.tick();
        let Some(payload) = delta.payload() else {
            if !entity.frozen {
                entity.frozen = true;
                entity.behavior.on_frozen();
                notifications.push_back(ClientNotification::Frozen(id));
            }
            continue;
        };
        if entity.frozen {
            entity.frozen = false;
            entity.behavior.on_unfrozen();
            notifications.push_back(ClientNotification::Unfrozen(id));
        }
        delta.apply_to(&mut *entity.auth);
        let controlled = payload.has_controller();
        if controlled != entity.controlled {
            entity.controlled = controlled;
            pools
                .commands
                .release(entity.commands.drain().map(|pooled| pooled.handle()));
            entity.command_ack = Tick::INVALID;
            if entity.started {
                entity.behavior.on_control_changed(controlled);
            }
            notifications.push_back(if controlled {
                ClientNotification::ControlGained(id)
            } else {
                ClientNotification::ControlLost(id)
            });
        }
        if let Some(ack) = payload.command_ack() {
            entity.command_ack = entity.command_ack.max(ack);
        }
        if let Some(removed) = payload.removed_tick() {
            entity.removed_at = Some(removed);
        }
    }
    entity.next = next
        .and_then(|pooled| pools.deltas.get(pooled.handle()))
        .filter(|delta| !delta.is_frozen())
        .map(|delta| {
            let mut target = entity.auth.clone();
            delta.apply_to(&mut *target);
            target
        });

    if entity.removed_at.is_some_and(|removed| removed <= server_tick) {
        if entity.started {
            entity.behavior.on_shutdown();
            notifications.push_back(ClientNotification::EntityRemoved(id));
        }
        return false;
    }

    if !entity.started {
        if !entity.last_applied.is_valid() {
            return true;
        }
        entity.started = true;
        entity.behavior.on_start(&*entity.auth);
        if entity.controlled {
            entity.behavior.on_control_changed(true);
        }
        notifications.push_back(ClientNotification::EntityAdded {
            entity: id,
            kind: entity.auth.type_name(),
        });
    }

    entity.state.copy_from(&*entity.auth);
    if entity.frozen {
        return true;
    }
    let ctx = TickContext {
        entity: id,
        tick,
        is_server: false,
    };
    if entity.controlled {
        let ack = entity.command_ack;
        while let Some(oldest) = entity.commands.oldest().copied() {
            if oldest.tick() > ack {
                break;
            }
            entity.commands.pop_oldest();
            pools.commands.remove(oldest.handle());
        }
        for pooled in entity.commands.iter() {
            let Some(command) = pools.commands.get(pooled.handle()) else {
                continue;
            };
            let replay = TickContext {
                tick: pooled.tick(),
                ..ctx
            };
            entity
                .behavior
                .apply_command(&mut *entity.state, command.data(), &replay);
        }
        let data = entity.behavior.write_command(&*entity.state, &ctx);
        entity
            .behavior
            .apply_command(&mut *entity.state, &*data, &ctx);
        let pooled = pools.insert_command(Command::new(tick, data));
        if let Some(evicted) = entity.commands.store(pooled) {
            pools.commands.remove(evicted.handle());
        }
    } else {
        entity
            .behavior
            .update_proxy(&*entity.state, entity.next.as_deref(), &ctx);
    }
    true
}

impl std::fmt::Debug for ClientRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRoom")
            .field("tick", &self.tick)
            .field("server_tick", &self.clock.estimated_remote())
            .field("entities", &self.entities.len())
            .finish_non_exhaustive()
    }
}
