// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! In-flight task tracking.
//!
//! One slot exists per (kind, friend); a slot is occupied from the moment
//! a task is scheduled until its body reports completion. Occupancy is
//! what deduplicates fast back-to-back triggers.

use std::collections::{hash_map::Entry, HashMap};

use warren_async::Task;

use crate::data::FriendId;

use super::run_state::TaskKind;

#[derive(Default)]
pub struct Registry {
    slots: HashMap<(TaskKind, FriendId), Slot>,
}

/// Holds the handle of the in-flight execution. The handle aborts its
/// task when dropped, so clearing the registry cancels everything still
/// running.
struct Slot {
    task: Option<Task<()>>,
}

impl Registry {
    /// Claim the slot. Returns false if it is already occupied.
    pub fn occupy(&mut self, kind: TaskKind, friend: &FriendId) -> bool {
        match self.slots.entry((kind, friend.clone())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { task: None });
                true
            },
        }
    }

    /// Attach the execution handle to a slot claimed by [`Self::occupy`].
    pub fn attach(&mut self, kind: TaskKind, friend: &FriendId, task: Task<()>) {
        match self.slots.get_mut(&(kind, friend.clone())) {
            Some(slot) => slot.task = Some(task),
            // The slot was cleared before the executor got here; dropping
            // the handle aborts the body.
            None => drop(task),
        }
    }

    /// Release the slot. Called for every completed body, on every exit
    /// path.
    pub fn clear(&mut self, kind: TaskKind, friend: &FriendId) {
        self.slots.remove(&(kind, friend.clone()));
    }

    /// Release all slots, aborting bodies still in flight.
    pub fn clear_all(&mut self) {
        self.slots.clear();
    }

    pub fn is_occupied(&self, kind: TaskKind, friend: &FriendId) -> bool {
        self.slots.contains_key(&(kind, friend.clone()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
