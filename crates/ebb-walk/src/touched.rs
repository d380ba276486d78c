//! Insertion-ordered set of touched items.
//!
//! A dense array keeps insertion order for deterministic dispatch; an
//! open-addressed, power-of-two index table gives O(1) membership. Clearing
//! is incremental: items come back out newest-first, one per poll, so a
//! suspended walk can drain the remainder later. While a clear is in
//! progress the set accepts no new items.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const INITIAL_SLOTS: usize = 16;

/// Outcome of [`TouchedSet::add`], carrying the item's dense position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added(usize),
    Present(usize),
}

pub struct TouchedSet<T> {
    items: Vec<T>,
    slots: Vec<Option<usize>>,
    draining: bool,
}

impl<T: Copy + Eq + Hash> TouchedSet<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            slots: Vec::new(),
            draining: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position)
    }

    /// Insert `item` unless already present; either way, report its dense
    /// position.
    pub fn add(&mut self, item: T) -> AddOutcome {
        debug_assert!(!self.draining, "touched set grew during a clear");
        if self.slots.is_empty() {
            self.slots = vec![None; INITIAL_SLOTS];
        } else if (self.items.len() + 1) * 2 > self.slots.len() {
            self.grow();
        }

        let mut slot = Self::hash_of(&item) as usize & (self.slots.len() - 1);
        loop {
            match self.slots[slot] {
                None => {
                    self.items.push(item);
                    let position = self.items.len() - 1;
                    self.slots[slot] = Some(position);
                    return AddOutcome::Added(position);
                }
                Some(position) if self.items[position] == item => {
                    return AddOutcome::Present(position);
                }
                Some(_) => slot = (slot + 1) & (self.slots.len() - 1),
            }
        }
    }

    /// Remove and return the most recently added item, as one step of a
    /// full clear. Returns `None` once the set is empty; the set is then
    /// ready for new items.
    pub fn poll_part_of_clear(&mut self) -> Option<T> {
        let item = self.items.pop()?;
        if self.items.is_empty() {
            self.slots.iter_mut().for_each(|s| *s = None);
            self.draining = false;
        } else {
            self.draining = true;
        }
        Some(item)
    }

    fn grow(&mut self) {
        let new_len = (self.slots.len() * 2).max(INITIAL_SLOTS);
        let mut slots = vec![None; new_len];
        for (position, item) in self.items.iter().enumerate() {
            let mut slot = Self::hash_of(item) as usize & (new_len - 1);
            while slots[slot].is_some() {
                slot = (slot + 1) & (new_len - 1);
            }
            slots[slot] = Some(position);
        }
        self.slots = slots;
    }

    fn hash_of(item: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        hasher.finish()
    }
}

impl<T: Copy + Eq + Hash> Default for TouchedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
