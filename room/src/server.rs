//! Authoritative side of a room.

use std::collections::{BTreeMap, VecDeque};

use codec::{
    decode_client_packet, encode_server_packet, Command, DejitterBuffer, Delta, DynMessage,
    DynState, EntityId, Event, Handle, Limits, PacketHeader, Pooled, Pools, RecordHistory,
    SequenceId, SyncMessage, SyncState, Tick, Timed, TypeIndex, View,
};
use repgraph::{Candidate, PeerId, Scope, ScopeEvaluator, SelectContext};
use tracing::{debug, info, warn};

use crate::channel::{check_event_size, EventChannel};
use crate::clock::Clock;
use crate::config::RoomConfig;
use crate::entity::{AnyEntity, Entity, Erased, TickContext};
use crate::error::{RoomError, RoomResult};
use crate::notify::ServerNotification;
use crate::protocol::Protocol;
use crate::transport::Transport;

struct ServerEntity {
    type_index: TypeIndex,
    behavior: Box<dyn AnyEntity>,
    state: Box<dyn DynState>,
    history: RecordHistory,
    controller: Option<PeerId>,
    commands: DejitterBuffer<Pooled<Command>>,
    /// Client tick of the last command applied.
    command_ack: Tick,
    started: bool,
    shut_down: bool,
    removed_at: Option<Tick>,
}

struct ServerPeer {
    /// Estimates the peer's own tick.
    clock: Clock,
    view: View,
    scope: Scope,
    events: EventChannel,
    /// Newest server tick the peer has reported receiving.
    ack_tick: Tick,
}

impl ServerPeer {
    /// Whether the peer can no longer be holding `id`, removed at
    /// `removed_at`.
    fn has_seen_removal(&self, id: EntityId, removed_at: Tick) -> bool {
        if self.scope.removal_acked(id, self.ack_tick) {
            return true;
        }
        match self.view.get(id) {
            Some(entry) => entry.tick > removed_at,
            None => !self.scope.last_sent(id).is_valid(),
        }
    }
}

/// Server room: owns authoritative entities and one connection state per
/// peer.
///
/// The host calls [`ServerRoom::receive`] for each inbound packet and
/// [`ServerRoom::update`] once per tick. Within a tick, pending removals
/// shut down first, then new entities start, then every live entity updates,
/// then states are recorded and packets go out on send ticks.
pub struct ServerRoom {
    protocol: Protocol,
    config: RoomConfig,
    limits: Limits,
    tick: Tick,
    last_entity: u32,
    entities: BTreeMap<EntityId, ServerEntity>,
    pools: Pools,
    peers: BTreeMap<PeerId, ServerPeer>,
    notifications: VecDeque<ServerNotification>,
}

impl ServerRoom {
    pub fn new(protocol: Protocol, config: RoomConfig) -> RoomResult<Self> {
        config.validate()?;
        Ok(Self {
            protocol,
            config,
            limits: Limits::default(),
            tick: Tick::INVALID,
            last_entity: 0,
            entities: BTreeMap::new(),
            pools: Pools::new(),
            peers: BTreeMap::new(),
            notifications: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Last completed tick, [`Tick::INVALID`] before the first update.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
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
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Pooled records, commands and in-flight packet objects.
    #[must_use]
    pub const fn pools(&self) -> &Pools {
        &self.pools
    }

    // Peers

    /// Returns `false` if the peer is already connected.
    pub fn add_peer(&mut self, peer: PeerId) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        let clock = Clock::new(
            self.config.client_send_rate,
            self.config.delay_min,
            self.config.delay_max,
        );
        self.peers.insert(
            peer,
            ServerPeer {
                clock,
                view: View::new(),
                scope: Scope::default(),
                events: EventChannel::new(self.config.event_window()),
                ack_tick: Tick::INVALID,
            },
        );
        info!(%peer, "peer added");
        self.notifications
            .push_back(ServerNotification::PeerAdded(peer));
        true
    }

    /// Disconnects `peer`, releasing control of everything it controlled.
    pub fn remove_peer(&mut self, peer: PeerId) -> bool {
        if self.peers.remove(&peer).is_none() {
            return false;
        }
        let controlled: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.controller == Some(peer))
            .map(|(id, _)| *id)
            .collect();
        for id in controlled {
            self.hand_off(id, None);
        }
        info!(%peer, "peer removed");
        self.notifications
            .push_back(ServerNotification::PeerRemoved(peer));
        true
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// Replaces the scope rule used for `peer`.
    pub fn set_scope(
        &mut self,
        peer: PeerId,
        evaluator: Box<dyn ScopeEvaluator>,
    ) -> RoomResult<()> {
        let state = self
            .peers
            .get_mut(&peer)
            .ok_or(RoomError::UnknownPeer(peer))?;
        state.scope.set_evaluator(evaluator);
        Ok(())
    }

    /// Current estimate of `peer`'s tick.
    #[must_use]
    pub fn peer_tick(&self, peer: PeerId) -> Option<Tick> {
        self.peers
            .get(&peer)
            .map(|state| state.clock.estimated_remote())
    }

    /// Newest server tick `peer` has reported receiving.
    #[must_use]
    pub fn peer_ack(&self, peer: PeerId) -> Option<Tick> {
        self.peers.get(&peer).map(|state| state.ack_tick)
    }

    // Entities

    /// Adds an entity. It starts at the next update and is first sent after
    /// that update.
    pub fn add_entity<E: Entity>(&mut self, behavior: E, state: E::State) -> RoomResult<EntityId> {
        let type_index = self
            .protocol
            .state_index::<E::State>()
            .ok_or(RoomError::UnregisteredState(E::State::schema().name()))?;
        self.last_entity += 1;
        let id = EntityId::new(self.last_entity);
        self.entities.insert(
            id,
            ServerEntity {
                type_index,
                behavior: Box::new(Erased(behavior)),
                state: Box::new(state),
                history: RecordHistory::new(self.config.record_history),
                controller: None,
                commands: DejitterBuffer::new(self.config.dejitter_length, 1),
                command_ack: Tick::INVALID,
                started: false,
                shut_down: false,
                removed_at: None,
            },
        );
        Ok(id)
    }

    /// Requests removal. The entity stops updating and shuts down on the
    /// next tick; peers keep receiving the removal until they report it.
    pub fn remove_entity(&mut self, id: EntityId) -> RoomResult<()> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(RoomError::UnknownEntity(id))?;
        if entity.removed_at.is_none() {
            entity.removed_at = Some(self.tick);
        }
        Ok(())
    }

    /// Hands control of `id` to `peer`, or takes it away with `None`.
    pub fn set_controller(&mut self, id: EntityId, peer: Option<PeerId>) -> RoomResult<()> {
        if let Some(peer) = peer {
            if !self.peers.contains_key(&peer) {
                return Err(RoomError::UnknownPeer(peer));
            }
        }
        match self.entities.get(&id) {
            Some(entity) if entity.removed_at.is_none() => {}
            _ => return Err(RoomError::UnknownEntity(id)),
        }
        self.hand_off(id, peer);
        Ok(())
    }

    fn hand_off(&mut self, id: EntityId, to: Option<PeerId>) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let from = entity.controller;
        if from == to {
            return;
        }
        entity.controller = to;
        self.pools
            .commands
            .release(entity.commands.drain().map(|pooled| pooled.handle()));
        entity.command_ack = Tick::INVALID;
        // Without a basis every peer gets a full resend, which carries the
        // controller flag change.
        entity.history.clear(&mut self.pools.records);
        debug!(entity = %id, ?from, ?to, "control changed");
        self.notifications.push_back(ServerNotification::ControlChanged {
            entity: id,
            from,
            to,
        });
    }

    #[must_use]
    pub fn controller(&self, id: EntityId) -> Option<PeerId> {
        self.entities.get(&id).and_then(|entity| entity.controller)
    }

    /// Live entity ids, ascending. Entities awaiting removal are skipped.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.removed_at.is_none())
            .map(|(id, _)| *id)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn state<S: SyncState>(&self, id: EntityId) -> Option<&S> {
        self.entities.get(&id)?.state.downcast_ref::<S>()
    }

    pub fn state_mut<S: SyncState>(&mut self, id: EntityId) -> Option<&mut S> {
        self.entities.get_mut(&id)?.state.downcast_mut::<S>()
    }

    pub fn behavior<E: Entity>(&self, id: EntityId) -> Option<&E> {
        self.entities.get(&id)?.behavior.as_any().downcast_ref::<E>()
    }

    pub fn behavior_mut<E: Entity>(&mut self, id: EntityId) -> Option<&mut E> {
        self.entities
            .get_mut(&id)?
            .behavior
            .as_any_mut()
            .downcast_mut::<E>()
    }

    /// Client tick of the last command applied to `id`.
    #[must_use]
    pub fn command_ack(&self, id: EntityId) -> Option<Tick> {
        self.entities.get(&id).map(|entity| entity.command_ack)
    }

    // Events

    /// Queues `message` for `peer` with the configured attempt count.
    pub fn send_event<M: SyncMessage>(
        &mut self,
        peer: PeerId,
        message: M,
        target: Option<EntityId>,
    ) -> RoomResult<SequenceId> {
        let attempts = self.config.event_attempts;
        self.send_event_with_attempts(peer, message, target, attempts)
    }

    pub fn send_event_with_attempts<M: SyncMessage>(
        &mut self,
        peer: PeerId,
        message: M,
        target: Option<EntityId>,
        attempts: u8,
    ) -> RoomResult<SequenceId> {
        let event = self.prepare_event(message, target)?;
        let state = self
            .peers
            .get_mut(&peer)
            .ok_or(RoomError::UnknownPeer(peer))?;
        Ok(state.events.enqueue(event, attempts))
    }

    /// Queues `message` for every connected peer.
    pub fn broadcast_event<M: SyncMessage>(
        &mut self,
        message: M,
        target: Option<EntityId>,
    ) -> RoomResult<()> {
        let event = self.prepare_event(message, target)?;
        let attempts = self.config.event_attempts;
        for state in self.peers.values_mut() {
            state.events.enqueue(event.clone(), attempts);
        }
        Ok(())
    }

    fn prepare_event<M: SyncMessage>(
        &self,
        message: M,
        target: Option<EntityId>,
    ) -> RoomResult<Event> {
        let data: Box<dyn DynMessage> = Box::new(message);
        let index = self
            .protocol
            .registry()
            .event_index_of(&*data)
            .ok_or(RoomError::UnregisteredEvent(M::schema().name()))?;
        let event = Event::new(index, data, target);
        check_event_size(&event, &self.limits)?;
        Ok(event)
    }

    /// Removes and returns queued notifications, oldest first.
    pub fn drain_notifications(&mut self) -> impl Iterator<Item = ServerNotification> + '_ {
        self.notifications.drain(..)
    }

    // Network

    /// Handles one packet from `peer`. Corrupt packets are dropped whole.
    pub fn receive(&mut self, peer: PeerId, bytes: &[u8]) {
        let Some(state) = self.peers.get_mut(&peer) else {
            debug!(%peer, len = bytes.len(), "packet from unknown peer");
            return;
        };
        let packet = match decode_client_packet(
            bytes,
            self.protocol.registry(),
            &self.limits,
            &mut self.pools,
        ) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%peer, len = bytes.len(), %error, "dropping corrupt packet");
                self.notifications
                    .push_back(ServerNotification::CorruptPacket { peer, error });
                return;
            }
        };

        let header = packet.header;
        state.clock.observe(header.sender_tick);
        if header.ack_tick > state.ack_tick {
            state.ack_tick = header.ack_tick;
        }
        state.events.acknowledge(header.ack_event);
        for handle in packet.events {
            let fresh = self
                .pools
                .events
                .get(handle)
                .is_some_and(|event| state.events.receive(event));
            // Fresh events pass to the host; duplicates are freed.
            if let (true, Some(event)) = (fresh, self.pools.events.remove(handle)) {
                self.notifications
                    .push_back(ServerNotification::Event { peer, event });
            }
        }

        for handle in packet.commands {
            let Some(update) = self.pools.updates.remove(handle) else {
                continue;
            };
            let id = update.entity();
            let Some(entity) = self
                .entities
                .get_mut(&id)
                .filter(|entity| entity.controller == Some(peer) && entity.removed_at.is_none())
            else {
                debug!(%peer, entity = %id, "commands for an entity the peer does not control");
                continue;
            };
            let mut stale = 0;
            for command in update.into_commands() {
                let pooled = self.pools.insert_command(command);
                match entity.commands.store(pooled) {
                    Ok(displaced) => {
                        if let Some(old) = displaced {
                            self.pools.commands.remove(old.handle());
                        }
                    }
                    Err(rejected) => {
                        self.pools.commands.remove(rejected.handle());
                        stale += 1;
                    }
                }
            }
            if stale > 0 {
                debug!(%peer, entity = %id, stale, "ignored stale commands");
            }
        }

        for entry in packet.view {
            state.view.record(entry);
        }
    }

    /// Runs one server tick and sends packets if it is a send tick.
    pub fn update(&mut self, transport: &mut impl Transport) {
        self.tick = self.tick.next();
        let tick = self.tick;
        for state in self.peers.values_mut() {
            state.clock.tick();
        }
        self.release_removed();

        for entity in self.entities.values_mut() {
            if entity.removed_at.is_some() && !entity.shut_down {
                entity.shut_down = true;
                if entity.started {
                    entity.behavior.on_shutdown();
                }
            }
        }

        for entity in self.entities.values_mut() {
            if !entity.started && entity.removed_at.is_none() {
                entity.started = true;
                entity.behavior.on_start(&*entity.state);
            }
        }

        for (&id, entity) in &mut self.entities {
            if entity.removed_at.is_some() {
                continue;
            }
            let ctx = TickContext {
                entity: id,
                tick,
                is_server: true,
            };
            if let Some(peer) = entity.controller {
                let client_tick = self
                    .peers
                    .get(&peer)
                    .map_or(Tick::INVALID, |state| state.clock.estimated_remote());
                let due = entity
                    .commands
                    .latest_at(client_tick)
                    .filter(|pooled| pooled.tick() > entity.command_ack)
                    .and_then(|pooled| {
                        let command = self.pools.commands.get(pooled.handle())?;
                        Some((pooled.tick(), command))
                    });
                match due {
                    Some((command_tick, command)) => {
                        entity
                            .behavior
                            .apply_command(&mut *entity.state, command.data(), &ctx);
                        entity.command_ack = command_tick;
                    }
                    None => entity.behavior.command_missing(&mut *entity.state, &ctx),
                }
            }
            entity
                .behavior
                .update_authoritative(&mut *entity.state, &ctx);
        }

        for entity in self.entities.values_mut() {
            if entity.removed_at.is_none() {
                entity.history.store(&mut self.pools.records, tick, &*entity.state);
            }
        }

        if tick.raw() % self.config.server_send_rate == 0 {
            self.send(transport);
        }
    }

    fn send(&mut self, transport: &mut impl Transport) {
        let tick = self.tick;
        let Self {
            entities,
            pools,
            peers,
            limits,
            ..
        } = self;

        for (&peer, state) in peers.iter_mut() {
            let candidates = entities.iter().map(|(&id, entity)| Candidate {
                entity: id,
                type_index: entity.type_index,
                state: &*entity.state,
                history: &entity.history,
                controller: entity.controller,
                command_ack: entity.command_ack,
                removed_at: entity.removed_at,
            });
            let ctx = SelectContext {
                peer,
                tick,
                peer_ack: state.ack_tick,
                view: &state.view,
            };
            let selection = state.scope.select_deltas(ctx, candidates, &pools.records);
            let handles: Vec<Handle<Delta>> = selection
                .into_ordered()
                .into_iter()
                .map(|delta| pools.deltas.insert(delta))
                .collect();
            let deltas: Vec<&Delta> = handles
                .iter()
                .filter_map(|handle| pools.deltas.get(*handle))
                .collect();

            let scope = &state.scope;
            let picked = state.events.select(|event| scope.event_in_scope(event));
            let events: Vec<&Event> = picked
                .iter()
                .filter_map(|&index| state.events.get(index))
                .collect();

            let header = PacketHeader::new(
                tick,
                state.clock.latest_remote(),
                state.events.latest_received(),
            );
            match encode_server_packet(&header, &events, &deltas, limits) {
                Ok(packed) => {
                    state
                        .scope
                        .mark_sent(deltas[..packed.deltas].iter().copied(), tick);
                    state.events.mark_sent(&picked[..packed.events]);
                    transport.send(peer, &packed.bytes);
                }
                Err(error) => warn!(%peer, %error, "failed to encode packet"),
            }
            pools.deltas.release(handles);
        }
    }

    /// Drops shut-down entities once no connected peer can still be holding
    /// them.
    fn release_removed(&mut self) {
        let peers = &self.peers;
        let expired: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(id, entity)| {
                entity.shut_down
                    && entity.removed_at.is_some_and(|removed| {
                        peers.values().all(|peer| peer.has_seen_removal(**id, removed))
                    })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(mut entity) = self.entities.remove(&id) {
                entity.history.clear(&mut self.pools.records);
                self.pools
                    .commands
                    .release(entity.commands.drain().map(|pooled| pooled.handle()));
            }
            for state in self.peers.values_mut() {
                state.view.remove(id);
                state.scope.forget(id);
            }
            debug!(entity = %id, "entity released");
            self.notifications
                .push_back(ServerNotification::EntityReleased(id));
        }
    }
}

impl std::fmt::Debug for ServerRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRoom")
            .field("tick", &self.tick)
            .field("entities", &self.entities.len())
            .field("peers", &self.peers.len())
            .field("pooled", &self.pools.live())
            .finish_non_exhaustive()
    }
}
