// Copyright 2026 the Scanout Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational slot storage for hardware objects and pipelines.
//!
//! Removed entries are recycled via a free list, and generation counters
//! prevent stale handle access. Each slot also carries a user count: a
//! pipeline that binds a hardware object [acquires](Arena::acquire) it, and
//! an object with users cannot be removed.

use alloc::vec::Vec;

use crate::id::{ArenaItem, Handle};

/// Slot storage addressed by [`Handle`]s.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    generation: Vec<u32>,
    users: Vec<u32>,
    free_list: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            generation: Vec::new(),
            users: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Returns `true` if the arena holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the given handle refers to a live entry.
    #[must_use]
    pub fn is_alive(&self, h: Handle<T>) -> bool {
        let idx = h.idx as usize;
        idx < self.slots.len() && self.generation[idx] == h.generation && self.slots[idx].is_some()
    }

    /// Returns the entry, or `None` for a stale handle.
    #[must_use]
    pub fn try_get(&self, h: Handle<T>) -> Option<&T> {
        if self.is_alive(h) {
            self.slots[h.idx as usize].as_ref()
        } else {
            None
        }
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|value| {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "slot count is bounded by u32 handles"
                )]
                let idx = i as u32;
                (Handle::new(idx, self.generation[i]), value)
            })
        })
    }

    /// Iterates live entries mutably in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> + '_ {
        let generation = &self.generation;
        self.slots.iter_mut().enumerate().filter_map(move |(i, slot)| {
            slot.as_mut().map(|value| {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "slot count is bounded by u32 handles"
                )]
                let idx = i as u32;
                (Handle::new(idx, generation[i]), value)
            })
        })
    }

    /// Returns the handles of all live entries in slot order.
    #[must_use]
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(h, _)| h).collect()
    }
}

impl<T: ArenaItem> Arena<T> {
    /// Inserts a value and returns its handle.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(idx) = self.free_list.pop() {
            let i = idx as usize;
            self.generation[i] += 1;
            self.users[i] = 0;
            self.slots[i] = Some(value);
            Handle::new(idx, self.generation[i])
        } else {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "more than u32::MAX kernel objects is not a real configuration"
            )]
            let idx = self.slots.len() as u32;
            self.slots.push(Some(value));
            self.generation.push(0);
            self.users.push(0);
            Handle::new(idx, 0)
        }
    }

    /// Removes an entry and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or if the entry is still acquired by a
    /// pipeline (destroy the pipeline first).
    pub fn remove(&mut self, h: Handle<T>) -> T {
        self.validate(h);
        let i = h.idx as usize;
        assert!(
            self.users[i] == 0,
            "cannot destroy {} still referenced by {} pipeline(s)",
            T::KIND,
            self.users[i]
        );
        self.free_list.push(h.idx);
        match self.slots[i].take() {
            Some(value) => value,
            None => unreachable!("validated slot is occupied"),
        }
    }

    /// Returns the entry.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn get(&self, h: Handle<T>) -> &T {
        self.validate(h);
        match &self.slots[h.idx as usize] {
            Some(value) => value,
            None => unreachable!("validated slot is occupied"),
        }
    }

    /// Returns the entry mutably.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    pub fn get_mut(&mut self, h: Handle<T>) -> &mut T {
        self.validate(h);
        match &mut self.slots[h.idx as usize] {
            Some(value) => value,
            None => unreachable!("validated slot is occupied"),
        }
    }

    /// Records one more pipeline referencing this entry.
    pub fn acquire(&mut self, h: Handle<T>) {
        self.validate(h);
        self.users[h.idx as usize] += 1;
    }

    /// Drops one pipeline reference.
    pub fn release(&mut self, h: Handle<T>) {
        self.validate(h);
        let users = &mut self.users[h.idx as usize];
        *users = users.saturating_sub(1);
    }

    /// Returns how many pipelines reference this entry.
    #[must_use]
    pub fn users(&self, h: Handle<T>) -> u32 {
        self.validate(h);
        self.users[h.idx as usize]
    }

    pub(crate) fn validate(&self, h: Handle<T>) {
        assert!(
            self.is_alive(h),
            "stale {} handle: {}@gen{} (current gen: {})",
            T::KIND,
            h.idx,
            h.generation,
            self.generation
                .get(h.idx as usize)
                .copied()
                .unwrap_or(u32::MAX)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Probe(u32);

    impl ArenaItem for Probe {
        const KIND: &'static str = "probe";
    }

    #[test]
    fn insert_and_remove() {
        let mut arena = Arena::new();
        let h = arena.insert(Probe(1));
        assert!(arena.is_alive(h));
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.remove(h), Probe(1));
        assert!(!arena.is_alive(h));
        assert!(arena.is_empty());
    }

    #[test]
    fn generation_prevents_stale_access() {
        let mut arena = Arena::new();
        let h1 = arena.insert(Probe(1));
        arena.remove(h1);
        let h2 = arena.insert(Probe(2));
        assert_eq!(h1.index(), h2.index(), "slot is reused");
        assert_ne!(h1.generation(), h2.generation());
        assert!(arena.try_get(h1).is_none());
        assert_eq!(arena.get(h2), &Probe(2));
    }

    #[test]
    #[should_panic(expected = "stale probe handle")]
    fn get_stale_panics() {
        let mut arena = Arena::new();
        let h = arena.insert(Probe(1));
        arena.remove(h);
        let _ = arena.get(h);
    }

    #[test]
    #[should_panic(expected = "cannot destroy probe still referenced")]
    fn remove_acquired_panics() {
        let mut arena = Arena::new();
        let h = arena.insert(Probe(1));
        arena.acquire(h);
        arena.remove(h);
    }

    #[test]
    fn release_allows_removal() {
        let mut arena = Arena::new();
        let h = arena.insert(Probe(1));
        arena.acquire(h);
        arena.acquire(h);
        assert_eq!(arena.users(h), 2);
        arena.release(h);
        arena.release(h);
        assert_eq!(arena.users(h), 0);
        arena.remove(h);
    }

    #[test]
    fn iter_skips_removed_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(Probe(1));
        let b = arena.insert(Probe(2));
        let c = arena.insert(Probe(3));
        arena.remove(b);
        let seen: Vec<_> = arena.iter().map(|(h, p)| (h, p.0)).collect();
        assert_eq!(seen, alloc::vec![(a, 1), (c, 3)]);
    }
}
