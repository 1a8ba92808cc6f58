//! Scope and priority: decide which deltas a peer gets, not how they are
//! encoded.
//!
//! Each send tick a room hands every live or recently removed entity to the
//! peer's [`Scope`] as a [`Candidate`]. The scope asks its
//! [`ScopeEvaluator`] whether the entity is relevant and how urgent it is,
//! then builds deltas against what the peer has acknowledged. The result is
//! three lists packed in order: removed, frozen, active.

use std::collections::{HashMap, HashSet};
use std::fmt;

use codec::{
    Delta, DeltaOptions, DynState, EntityId, Event, Pool, Record, RecordHistory, Tick, TypeIndex,
    View,
};
use tracing::trace;

/// Peer identifier, assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}

/// Basic 3D vector for spatial queries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn distance_sq(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// One entity offered for sending.
#[derive(Clone, Copy)]
pub struct Candidate<'a> {
    pub entity: EntityId,
    pub type_index: TypeIndex,
    pub state: &'a dyn DynState,
    pub history: &'a RecordHistory,
    pub controller: Option<PeerId>,
    /// Latest client command tick applied to the entity.
    pub command_ack: Tick,
    /// Tick the removal was requested at; it takes effect one tick later.
    pub removed_at: Option<Tick>,
}

impl fmt::Debug for Candidate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("entity", &self.entity)
            .field("type", &self.state.type_name())
            .field("controller", &self.controller)
            .field("removed_at", &self.removed_at)
            .finish_non_exhaustive()
    }
}

/// Priority used when nothing better is known: entities that have waited
/// longest go first.
#[must_use]
pub fn default_priority(ticks_since_send: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let waited = ticks_since_send as f32;
    -waited
}

/// Decides relevance and ordering for one peer.
pub trait ScopeEvaluator: Send {
    /// `None` puts the entity out of scope (it gets frozen on the peer).
    /// Otherwise lower scores are sent first.
    ///
    /// `viewer` is the state of an entity the peer controls, if any.
    fn evaluate(
        &self,
        viewer: Option<&dyn DynState>,
        candidate: &Candidate<'_>,
        ticks_since_send: u32,
    ) -> Option<f32>;

    /// Whether an event should be sent now. Events for entities outside the
    /// peer's scope are held back by default.
    fn include_event(&self, event: &Event, target_in_scope: bool) -> bool {
        let _ = event;
        target_in_scope
    }
}

/// Everything is in scope, ordered by [`default_priority`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysInScope;

impl ScopeEvaluator for AlwaysInScope {
    fn evaluate(
        &self,
        _viewer: Option<&dyn DynState>,
        _candidate: &Candidate<'_>,
        ticks_since_send: u32,
    ) -> Option<f32> {
        Some(default_priority(ticks_since_send))
    }
}

type PositionFn = Box<dyn Fn(&dyn DynState) -> Option<Vec3> + Send + Sync>;

/// Radius relevance around the peer's controlled entity, or a fixed center
/// when the peer controls nothing.
///
/// Entities without a position are always in scope.
pub struct SpatialScope {
    radius: f32,
    center: Option<Vec3>,
    position: PositionFn,
}

impl SpatialScope {
    pub fn new(
        radius: f32,
        position: impl Fn(&dyn DynState) -> Option<Vec3> + Send + Sync + 'static,
    ) -> Self {
        Self {
            radius,
            center: None,
            position: Box::new(position),
        }
    }

    #[must_use]
    pub fn with_center(mut self, center: Vec3) -> Self {
        self.center = Some(center);
        self
    }

    pub fn set_center(&mut self, center: Option<Vec3>) {
        self.center = center;
    }

    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }
}

impl fmt::Debug for SpatialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialScope")
            .field("radius", &self.radius)
            .field("center", &self.center)
            .finish_non_exhaustive()
    }
}

impl ScopeEvaluator for SpatialScope {
    fn evaluate(
        &self,
        viewer: Option<&dyn DynState>,
        candidate: &Candidate<'_>,
        ticks_since_send: u32,
    ) -> Option<f32> {
        let center = viewer.and_then(|state| (self.position)(state)).or(self.center);
        let (Some(center), Some(position)) = (center, (self.position)(candidate.state)) else {
            return Some(default_priority(ticks_since_send));
        };
        let radius_sq = self.radius * self.radius;
        let distance_sq = position.distance_sq(center);
        if distance_sq > radius_sq {
            return None;
        }
        let nearness = if radius_sq > 0.0 {
            distance_sq / radius_sq
        } else {
            0.0
        };
        Some(nearness + default_priority(ticks_since_send))
    }
}

/// Per-send inputs describing the peer.
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'v> {
    pub peer: PeerId,
    /// Server tick the packet is sent at.
    pub tick: Tick,
    /// Latest server tick the peer has acknowledged.
    pub peer_ack: Tick,
    pub view: &'v View,
}

/// Deltas chosen for one packet, in packing order.
#[derive(Debug, Default)]
pub struct Selection {
    pub removed: Vec<Delta>,
    pub frozen: Vec<Delta>,
    pub active: Vec<Delta>,
}

impl Selection {
    #[must_use]
    pub fn len(&self) -> usize {
        self.removed.len() + self.frozen.len() + self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removed, then frozen, then active.
    pub fn ordered(&self) -> Vec<&Delta> {
        self.removed
            .iter()
            .chain(&self.frozen)
            .chain(&self.active)
            .collect()
    }

    /// Takes the deltas in packing order.
    #[must_use]
    pub fn into_ordered(self) -> Vec<Delta> {
        let mut deltas = self.removed;
        deltas.extend(self.frozen);
        deltas.extend(self.active);
        deltas
    }
}

/// Per-peer scope bookkeeping.
pub struct Scope {
    evaluator: Box<dyn ScopeEvaluator>,
    last_sent: HashMap<EntityId, Tick>,
    frozen_sent: HashMap<EntityId, Tick>,
    /// First tick a removal delta went out for each removed entity.
    removal_sent: HashMap<EntityId, Tick>,
    in_scope: HashSet<EntityId>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(Box::new(AlwaysInScope))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("in_scope", &self.in_scope.len())
            .field("frozen_sent", &self.frozen_sent.len())
            .finish_non_exhaustive()
    }
}

impl Scope {
    #[must_use]
    pub fn new(evaluator: Box<dyn ScopeEvaluator>) -> Self {
        Self {
            evaluator,
            last_sent: HashMap::new(),
            frozen_sent: HashMap::new(),
            removal_sent: HashMap::new(),
            in_scope: HashSet::new(),
        }
    }

    pub fn set_evaluator(&mut self, evaluator: Box<dyn ScopeEvaluator>) {
        self.evaluator = evaluator;
    }

    /// Whether `entity` was in scope at the last selection.
    #[must_use]
    pub fn is_in_scope(&self, entity: EntityId) -> bool {
        self.in_scope.contains(&entity)
    }

    /// Tick `entity` was last sent at, or [`Tick::INVALID`].
    #[must_use]
    pub fn last_sent(&self, entity: EntityId) -> Tick {
        self.last_sent.get(&entity).copied().unwrap_or(Tick::INVALID)
    }

    /// Whether the peer has acknowledged a packet sent at or after the first
    /// removal delta for `entity`. Every packet from then on carries the
    /// removal until the peer has seen it.
    #[must_use]
    pub fn removal_acked(&self, entity: EntityId, peer_ack: Tick) -> bool {
        self.removal_sent
            .get(&entity)
            .is_some_and(|sent| peer_ack >= *sent)
    }

    /// Whether `event` may be sent. Untargeted events always pass the
    /// default rule.
    #[must_use]
    pub fn event_in_scope(&self, event: &Event) -> bool {
        let target_in_scope = event
            .target()
            .map_or(true, |entity| self.in_scope.contains(&entity));
        self.evaluator.include_event(event, target_in_scope)
    }

    /// Drops all bookkeeping for `entity`.
    pub fn forget(&mut self, entity: EntityId) {
        self.last_sent.remove(&entity);
        self.frozen_sent.remove(&entity);
        self.removal_sent.remove(&entity);
        self.in_scope.remove(&entity);
    }

    /// Builds this send's deltas for the peer.
    ///
    /// Controlled entities are always in scope and come first. Out-of-scope
    /// entities the peer still simulates get a frozen delta, resent only once
    /// the peer has acknowledged a tick at or after the previous attempt.
    /// Removed entities get a removal delta until the peer reports a view
    /// past the removal request or acknowledges a packet that carried it.
    /// Entities the peer never reported get one too if anything was sent,
    /// since that state may still be in flight.
    pub fn select_deltas<'a>(
        &mut self,
        ctx: SelectContext<'_>,
        candidates: impl IntoIterator<Item = Candidate<'a>>,
        pool: &Pool<Record>,
    ) -> Selection {
        let candidates: Vec<Candidate<'a>> = candidates.into_iter().collect();
        let viewer = candidates
            .iter()
            .find(|c| c.controller == Some(ctx.peer) && c.removed_at.is_none())
            .map(|c| c.state);

        let mut selection = Selection::default();
        let mut controlled = Vec::new();
        let mut scored: Vec<(f32, Delta)> = Vec::new();
        self.in_scope.clear();

        for candidate in &candidates {
            let entity = candidate.entity;
            let known = ctx.view.get(entity);

            let is_controller = candidate.controller == Some(ctx.peer);
            if let Some(removed_at) = candidate.removed_at {
                let pending = known.map_or(self.last_sent.contains_key(&entity), |entry| {
                    entry.tick <= removed_at
                }) && !self.removal_acked(entity, ctx.peer_ack);
                if pending {
                    let delta = build_delta(
                        ctx,
                        candidate,
                        pool,
                        is_controller,
                        Some(removed_at.next()),
                    );
                    selection.removed.extend(delta);
                }
                continue;
            }

            let priority = if is_controller {
                Some(f32::NEG_INFINITY)
            } else {
                let since = ticks_since(self.last_sent.get(&entity).copied(), ctx.tick);
                self.evaluator.evaluate(viewer, candidate, since)
            };

            match priority {
                Some(priority) => {
                    self.in_scope.insert(entity);
                    self.frozen_sent.remove(&entity);
                    if let Some(delta) = build_delta(ctx, candidate, pool, is_controller, None) {
                        if is_controller {
                            controlled.push(delta);
                        } else {
                            scored.push((priority, delta));
                        }
                    }
                }
                None => {
                    let active_on_peer = known.is_some_and(|entry| !entry.frozen);
                    let due = match self.frozen_sent.get(&entity) {
                        None => true,
                        Some(sent) => ctx.peer_ack >= *sent,
                    };
                    if active_on_peer && due {
                        selection.frozen.push(Delta::frozen(entity, ctx.tick));
                    }
                }
            }
        }

        scored.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.entity().cmp(&b.1.entity()))
        });
        selection.active = controlled
            .into_iter()
            .chain(scored.into_iter().map(|(_, delta)| delta))
            .collect();

        trace!(
            peer = %ctx.peer,
            tick = %ctx.tick,
            removed = selection.removed.len(),
            frozen = selection.frozen.len(),
            active = selection.active.len(),
            "selected deltas"
        );
        selection
    }

    /// Records that `deltas` went out at `tick`.
    pub fn mark_sent<'d>(&mut self, deltas: impl IntoIterator<Item = &'d Delta>, tick: Tick) {
        for delta in deltas {
            if delta.is_frozen() {
                self.frozen_sent.insert(delta.entity(), tick);
                continue;
            }
            if delta.removed_tick().is_some() {
                self.removal_sent.entry(delta.entity()).or_insert(tick);
            }
            self.last_sent.insert(delta.entity(), tick);
        }
    }
}

fn ticks_since(last: Option<Tick>, now: Tick) -> u32 {
    match last {
        Some(last) if last.is_valid() => {
            u32::try_from(now.diff(last).max(0)).unwrap_or(u32::MAX)
        }
        _ => u32::MAX,
    }
}

/// Builds a delta against the peer's acknowledged basis. A frozen view forces
/// every mutable field; an unknown entity also gets its immutable data.
fn build_delta(
    ctx: SelectContext<'_>,
    candidate: &Candidate<'_>,
    pool: &Pool<Record>,
    is_controller: bool,
    removed_tick: Option<Tick>,
) -> Option<Delta> {
    let entry = ctx.view.get(candidate.entity);
    let acked = entry.map_or(Tick::INVALID, |entry| entry.tick);
    let frozen = entry.is_some_and(|entry| entry.frozen);
    let basis = if frozen {
        None
    } else {
        candidate.history.basis(pool, acked)
    };
    let options = DeltaOptions {
        removed_tick,
        include_immutable: !acked.is_valid(),
        command_ack: is_controller.then_some(candidate.command_ack),
        force_full: frozen,
    };
    Delta::build(
        candidate.entity,
        ctx.tick,
        candidate.type_index,
        candidate.state,
        basis.as_deref(),
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_sq(b), 25.0);
    }

    #[test]
    fn ticks_since_send() {
        assert_eq!(ticks_since(None, Tick::new(5)), u32::MAX);
        assert_eq!(ticks_since(Some(Tick::INVALID), Tick::new(5)), u32::MAX);
        assert_eq!(ticks_since(Some(Tick::new(3)), Tick::new(5)), 2);
        assert_eq!(ticks_since(Some(Tick::new(9)), Tick::new(5)), 0);
    }

    #[test]
    fn older_sends_have_lower_scores() {
        assert!(default_priority(10) < default_priority(2));
    }

    #[test]
    fn peer_display() {
        assert_eq!(PeerId(4).to_string(), "peer4");
    }
}
