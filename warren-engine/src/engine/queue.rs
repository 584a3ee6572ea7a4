// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Per-friend FIFOs of outbound payloads awaiting delivery.
//!
//! Ordering is strict per friend; there is no ordering across friends.

use std::collections::{HashMap, VecDeque};

use crate::{data::FriendId, wire::Payload};

#[derive(Default)]
pub struct PushQueues {
    queues: HashMap<FriendId, VecDeque<Payload>>,
}

impl PushQueues {
    pub fn enqueue(&mut self, friend: &FriendId, payload: Payload) {
        self.queues
            .entry(friend.clone())
            .or_default()
            .push_back(payload)
    }

    pub fn dequeue(&mut self, friend: &FriendId) -> Option<Payload> {
        self.queues.get_mut(friend)?.pop_front()
    }

    /// Put a payload back at the head, preserving delivery order after a
    /// failed send.
    pub fn requeue_front(&mut self, friend: &FriendId, payload: Payload) {
        self.queues
            .entry(friend.clone())
            .or_default()
            .push_front(payload)
    }

    pub fn is_empty(&self, friend: &FriendId) -> bool {
        self.queues.get(friend).map_or(true, VecDeque::is_empty)
    }

    /// Friends with at least one undelivered payload.
    pub fn backlogged(&self) -> Vec<FriendId> {
        self.queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(friend, _)| friend.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.queues.clear()
    }
}
