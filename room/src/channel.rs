//! Reliable event delivery by bounded retransmission.

use std::collections::VecDeque;

use codec::{Event, Handle, Limits, Pool};
use tracing::debug;
use wire::SequenceId;

use crate::error::{RoomError, RoomResult};

/// Record of which sequence ids arrived recently.
///
/// Index 0 is the newest id seen; ids older than the window are treated as
/// already received.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    latest: SequenceId,
    seen: VecDeque<bool>,
    width: usize,
}

impl SequenceWindow {
    #[must_use]
    pub fn new(width: usize) -> Self {
        assert!(width > 0, "sequence window width must be positive");
        Self {
            latest: SequenceId::INVALID,
            seen: VecDeque::with_capacity(width),
            width,
        }
    }

    /// Newest id recorded, or [`SequenceId::INVALID`].
    #[must_use]
    pub const fn latest(&self) -> SequenceId {
        self.latest
    }

    /// Returns `true` if `id` has not been recorded and is not older than
    /// the window.
    #[must_use]
    pub fn is_new(&self, id: SequenceId) -> bool {
        if !id.is_valid() {
            return false;
        }
        if !self.latest.is_valid() {
            return true;
        }
        match usize::try_from(self.latest.diff(id)) {
            Err(_) => true,
            Ok(age) if age >= self.width => false,
            Ok(age) => !self.seen.get(age).copied().unwrap_or(false),
        }
    }

    pub fn record(&mut self, id: SequenceId) {
        if !id.is_valid() {
            return;
        }
        if !self.latest.is_valid() {
            self.latest = id;
            self.seen.push_front(true);
            return;
        }
        let diff = self.latest.diff(id);
        if diff < 0 {
            let advance = usize::try_from(-diff).unwrap_or(usize::MAX).min(self.width);
            for _ in 0..advance {
                self.seen.push_front(false);
            }
            self.seen.truncate(self.width);
            self.seen[0] = true;
            self.latest = id;
        } else if let Ok(age) = usize::try_from(diff) {
            if age < self.width {
                while self.seen.len() <= age {
                    self.seen.push_back(false);
                }
                self.seen[age] = true;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    event: Handle<Event>,
    sequence: SequenceId,
    attempts: u8,
}

/// Reliable events exchanged with a single peer.
///
/// Outgoing events are resent until their attempts run out or the peer
/// acknowledges them. The peer acknowledges the newest id it has received.
/// Queued events live in the channel's own pool and return to it once spent.
#[derive(Debug)]
pub struct EventChannel {
    outgoing: VecDeque<Pending>,
    pool: Pool<Event>,
    next_sequence: SequenceId,
    window: SequenceWindow,
    width: usize,
}

impl EventChannel {
    /// `width` is the receive window size in sequence ids.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            outgoing: VecDeque::new(),
            pool: Pool::new(),
            next_sequence: SequenceId::START,
            window: SequenceWindow::new(width),
            width,
        }
    }

    /// Number of queued outgoing events, acknowledged or not. Each one holds
    /// a slot in the channel's pool.
    #[must_use]
    pub fn queued(&self) -> usize {
        debug_assert_eq!(self.outgoing.len(), self.pool.len());
        self.outgoing.len()
    }

    /// Newest id received from the peer, echoed back as the event ack.
    #[must_use]
    pub const fn latest_received(&self) -> SequenceId {
        self.window.latest()
    }

    /// Assigns the next sequence id and queues `event` for `attempts` sends.
    pub fn enqueue(&mut self, mut event: Event, attempts: u8) -> SequenceId {
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        event.set_sequence(sequence);
        let event = self.pool.insert(event);
        self.outgoing.push_back(Pending {
            event,
            sequence,
            attempts,
        });
        sequence
    }

    /// Picks the queue positions of events to offer in the next packet.
    ///
    /// Events rejected by `in_scope` lose an attempt without being sent.
    /// Selection stops at the first event whose id is a full window past the
    /// first one selected. Positions stay valid until the next
    /// [`EventChannel::mark_sent`] or [`EventChannel::acknowledge`].
    pub fn select(&mut self, mut in_scope: impl FnMut(&Event) -> bool) -> Vec<usize> {
        self.drain_spent();
        let mut selected = Vec::new();
        let mut first: Option<SequenceId> = None;
        for (index, pending) in self.outgoing.iter_mut().enumerate() {
            if pending.attempts == 0 {
                continue;
            }
            let Some(event) = self.pool.get(pending.event) else {
                continue;
            };
            if !in_scope(event) {
                pending.attempts -= 1;
                continue;
            }
            let sequence = pending.sequence;
            match first {
                None => first = Some(sequence),
                Some(first) => {
                    let span = usize::try_from(sequence.diff(first)).unwrap_or(0);
                    if span >= self.width {
                        break;
                    }
                }
            }
            selected.push(index);
        }
        selected
    }

    /// Queued event at a position returned by [`EventChannel::select`].
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Event> {
        self.outgoing
            .get(index)
            .and_then(|pending| self.pool.get(pending.event))
    }

    /// Charges one attempt to each event actually written to a packet.
    pub fn mark_sent(&mut self, indices: &[usize]) {
        for &index in indices {
            if let Some(pending) = self.outgoing.get_mut(index) {
                pending.attempts = pending.attempts.saturating_sub(1);
            }
        }
        self.drain_spent();
    }

    /// Stops retrying every event at or before `ack`.
    pub fn acknowledge(&mut self, ack: SequenceId) {
        if !ack.is_valid() {
            return;
        }
        for pending in &mut self.outgoing {
            if !pending.sequence.is_newer_than(ack) {
                pending.attempts = 0;
            }
        }
        self.drain_spent();
    }

    /// Accepts an incoming event if it has not been seen. Returns whether
    /// the caller should dispatch it.
    pub fn receive(&mut self, event: &Event) -> bool {
        let sequence = event.sequence();
        if !self.window.is_new(sequence) {
            debug!(%sequence, "dropping duplicate event");
            return false;
        }
        self.window.record(sequence);
        true
    }

    fn drain_spent(&mut self) {
        while let Some(pending) = self.outgoing.front().copied() {
            if pending.attempts > 0 {
                break;
            }
            self.outgoing.pop_front();
            self.pool.remove(pending.event);
        }
    }
}

/// Rejects an event that could never be packed under `limits`. Queued, it
/// would block everything behind it.
pub(crate) fn check_event_size(event: &Event, limits: &Limits) -> RoomResult<()> {
    let bits = event.encoded_bits()?;
    let limit_bits = limits.max_event_bytes.saturating_mul(8);
    if bits > limit_bits {
        debug!(
            kind = event.data().type_name(),
            bits, limit_bits, "rejecting oversize event"
        );
        return Err(RoomError::EventTooLarge { bits, limit_bits });
    }
    Ok(())
}
