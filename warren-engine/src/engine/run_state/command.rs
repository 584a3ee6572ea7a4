// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

use std::time::Duration;

use crate::{
    data::{FriendId, GroupId, Location, PostId},
    engine::Event,
};

use super::{
    input::{Timer, WatchdogKind},
    TaskKind,
};

/// A scheduled task execution: the slot is already occupied, the executor
/// spawns the body and attaches the handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub kind: TaskKind,
    pub friend: FriendId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartReason {
    UpdatedSelf,
    FriendSetChanged,
    Preferences,
    Watchdog(WatchdogKind),
}

/// Instructions produced by [`super::RunState::transition`], executed by
/// the engine driver outside the state lock.
#[derive(Debug)]
pub enum Command {
    Start(Task),
    /// Build the client connection pool off the now-established circuit.
    EstablishClients,
    /// Trigger `kind` for every known friend.
    TriggerAll(TaskKind),
    /// Enqueue a group to all its members that are friends.
    FanOutGroup(GroupId),
    /// Enqueue a post to all members of its group that are friends.
    FanOutPost(PostId),
    /// Enqueue the current self location to the drained recipients.
    FanOutLocation(Vec<FriendId>),
    PersistLocation(Location),
    /// Ask the location provider for a fresh fix.
    StartLocationFix,
    /// Arm a single-shot deadline on the scheduler.
    Arm(Timer, Duration),
    Emit(Event),
    Restart(RestartReason),
    Stop,
}
