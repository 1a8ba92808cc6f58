//! Generational arenas for hot-path objects.
//!
//! Every delta, event, command, command update and record a room holds lives
//! in one of its [`Pools`]. Holders keep [`Handle`]s; whoever drops an object
//! without passing it on returns it to its pool.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use wire::Tick;

use crate::buffer::Timed;
use crate::command::{Command, CommandUpdate};
use crate::delta::Delta;
use crate::event::Event;
use crate::history::Record;

/// Generation-checked reference into a [`Pool`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena that owns values and hands out [`Handle`]s.
///
/// Removing a value bumps its slot's generation and returns the slot to the
/// free list, so handles to the removed value stop resolving.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Pool<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
                _marker: PhantomData,
            };
        }
        let index = match u32::try_from(self.slots.len()) {
            Ok(index) => index,
            Err(_) => panic!("pool exceeded u32::MAX slots"),
        };
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index,
            generation: 0,
            _marker: PhantomData,
        }
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Removes and returns the value. A stale handle is a bug in the caller;
    /// it trips a debug assertion and returns `None` in release builds.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some());
        debug_assert!(slot.is_some(), "stale pool handle {handle:?}");
        let slot = slot?;
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        value
    }

    /// Removes every value in `handles`, dropping them.
    pub fn release(&mut self, handles: impl IntoIterator<Item = Handle<T>>) {
        for handle in handles {
            self.remove(handle);
        }
    }

    /// Iterates live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            // Slot count never exceeds u32::MAX (checked in insert).
            #[allow(clippy::cast_possible_truncation)]
            let index = index as u32;
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index,
                        generation: slot.generation,
                        _marker: PhantomData,
                    },
                    value,
                )
            })
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// A handle stamped with the tick of the value behind it, so tick-indexed
/// buffers can hold pooled values.
#[derive(Debug)]
pub struct Pooled<T> {
    tick: Tick,
    handle: Handle<T>,
}

impl<T> Pooled<T> {
    #[must_use]
    pub const fn new(tick: Tick, handle: Handle<T>) -> Self {
        Self { tick, handle }
    }

    #[must_use]
    pub const fn handle(&self) -> Handle<T> {
        self.handle
    }
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Pooled<T> {}

impl<T> Timed for Pooled<T> {
    fn tick(&self) -> Tick {
        self.tick
    }
}

/// One pool per hot-path type, owned by a single room.
#[derive(Debug, Default)]
pub struct Pools {
    pub records: Pool<Record>,
    pub deltas: Pool<Delta>,
    pub events: Pool<Event>,
    pub commands: Pool<Command>,
    pub updates: Pool<CommandUpdate>,
}

impl Pools {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live objects across every pool.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.records.len()
            + self.deltas.len()
            + self.events.len()
            + self.commands.len()
            + self.updates.len()
    }

    /// Moves `command` into the pool and stamps the handle with its tick.
    pub fn insert_command(&mut self, command: Command) -> Pooled<Command> {
        let tick = command.tick();
        Pooled::new(tick, self.commands.insert(command))
    }

    /// Moves `delta` into the pool and stamps the handle with its tick.
    pub fn insert_delta(&mut self, delta: Delta) -> Pooled<Delta> {
        let tick = delta.tick();
        Pooled::new(tick, self.deltas.insert(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut pool = Pool::new();
        let a = pool.insert("a");
        let b = pool.insert("b");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.remove(a), Some("a"));
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut pool = Pool::new();
        let a = pool.insert(1);
        pool.remove(a);
        let b = pool.insert(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.get(b), Some(&2));
        assert!(!pool.contains(a));
    }

    #[test]
    fn get_mut_and_iter() {
        let mut pool = Pool::new();
        let a = pool.insert(10);
        let b = pool.insert(20);
        *pool.get_mut(b).unwrap() += 1;
        pool.remove(a);
        let live: Vec<_> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![21]);
    }

    #[test]
    fn release_frees_every_handle() {
        let mut pool = Pool::new();
        let handles: Vec<_> = (0..4).map(|n| pool.insert(n)).collect();
        pool.release(handles[1..].iter().copied());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(handles[0]), Some(&0));
    }

    #[test]
    fn pooled_handles_carry_their_tick() {
        let mut pool = Pool::new();
        let pooled = Pooled::new(Tick::new(7), pool.insert("seven"));
        let copy = pooled;
        assert_eq!(copy.tick(), Tick::new(7));
        assert_eq!(pool.get(pooled.handle()), Some(&"seven"));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "stale pool handle")]
    fn double_remove_panics_in_debug() {
        let mut pool = Pool::new();
        let a = pool.insert(1);
        pool.remove(a);
        pool.remove(a);
    }
}
