// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

use crate::{
    data::{FriendId, GroupId, Location, PostId},
    wire::Payload,
};

use super::TaskKind;

/// A change to local state observed outside the engine.
#[derive(Clone, Debug)]
pub enum LocalChange {
    /// The local identity changed; transport credentials are stale.
    UpdatedSelf,
    AddedFriend(FriendId),
    RemovedFriend(FriendId),
    /// Data about a friend changed, ie. communication was observed.
    UpdatedFriend(FriendId),
    UpdatedSelfGroup(GroupId),
    UpdatedSelfLocation,
    UpdatedSelfPost(PostId),
    AddedDownload(FriendId),
    /// The location provider produced a fix.
    NewSelfLocationFix(Location),
    PreferenceChanged,
}

/// How a task body ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The body did useful work against the peer.
    Done,
    /// A transient network or protocol failure ended the body early.
    Failed,
    /// The body had nothing to do, or aborted in its preamble.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogKind {
    /// No circuit has been established yet.
    NotConnected,
    /// No confirmed peer interaction for too long.
    NoCommunication,
}

/// A deadline armed on the scheduler. Generation counters invalidate
/// stale expirations: only a timer matching the current generation has an
/// effect.
#[derive(Clone, Debug)]
pub enum Timer {
    Watchdog {
        kind: WatchdogKind,
        generation: u64,
    },
    RestartDebounce {
        generation: u64,
    },
    DownloadRetry,
    AskRetry {
        kind: TaskKind,
        friend: FriendId,
    },
}

/// Everything the engine reacts to.
#[derive(Clone, Debug)]
pub enum Input {
    Local(LocalChange),
    CircuitEstablished,
    /// Schedule a task unless one is already in flight for the slot.
    Trigger {
        kind: TaskKind,
        friend: FriendId,
    },
    /// Enqueue a payload for a friend and schedule its delivery.
    Push {
        friend: FriendId,
        payload: Payload,
    },
    /// A task body finished; always sent, on every exit path.
    Completed {
        kind: TaskKind,
        friend: FriendId,
        outcome: TaskOutcome,
    },
    /// A friend asked for our location (already vetted by the handler).
    LocationRequested(FriendId),
    /// An authenticated peer request was served.
    PeerInteraction,
    Timer(Timer),
    Stop,
}
