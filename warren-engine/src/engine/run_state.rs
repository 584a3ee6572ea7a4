// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! State machine routing every event the engine reacts to.
//!
//! All engine state -- task slots, push queues, location recipients,
//! watchdog and debounce generations -- lives in [`RunState`] behind one
//! lock. [`RunState::transition`] applies an [`Input`] and returns the
//! [`Command`]s to execute outside the lock; nothing in here performs
//! I/O.

use std::{collections::HashSet, fmt, sync::Arc};

use warren_async::Task as TaskHandle;

use crate::{
    config::{self, Preferences, RunConfig},
    data::FriendId,
    engine::Event,
    wire::Payload,
};

use super::{queue::PushQueues, registry::Registry};

pub mod command;
pub use command::{Command, RestartReason, Task};

pub mod input;
pub use input::{Input, LocalChange, TaskOutcome, Timer, WatchdogKind};

/// The five per-friend synchronization tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    AskPull,
    AskLocation,
    PushTo,
    PullFrom,
    DownloadFrom,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::AskPull => "ask-pull",
            Self::AskLocation => "ask-location",
            Self::PushTo => "push",
            Self::PullFrom => "pull",
            Self::DownloadFrom => "download",
        })
    }
}

/// Connectivity of the running session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Transport is up, no circuit yet.
    Started,
    /// The circuit is established; peer requests can succeed.
    Online,
}

/// State kept for a running engine session.
pub struct RunState {
    config: RunConfig,
    prefs: Arc<dyn Preferences>,
    pub status: Status,
    registry: Registry,
    queues: PushQueues,
    location_recipients: HashSet<FriendId>,
    watchdog: WatchdogKind,
    watchdog_generation: u64,
    debounce_generation: u64,
}

impl RunState {
    pub fn new(config: RunConfig, prefs: Arc<dyn Preferences>) -> Self {
        Self {
            config,
            prefs,
            status: Status::Started,
            registry: Registry::default(),
            queues: PushQueues::default(),
            location_recipients: HashSet::new(),
            watchdog: WatchdogKind::NotConnected,
            watchdog_generation: 1,
            debounce_generation: 0,
        }
    }

    /// Commands to execute right after the session came up: arm the
    /// not-connected watchdog and announce the start.
    pub fn start_commands(&self) -> Vec<Command> {
        vec![
            Command::Arm(
                Timer::Watchdog {
                    kind: WatchdogKind::NotConnected,
                    generation: self.watchdog_generation,
                },
                self.config.not_connected_timeout,
            ),
            Command::Emit(Event::Started),
        ]
    }

    /// Applies `input` and returns the commands to run for it.
    pub fn transition(&mut self, input: Input) -> Vec<Command> {
        tracing::trace!(?input, status = ?self.status, "transition");
        match input {
            Input::Local(change) => self.handle_local(change),
            Input::CircuitEstablished => self.handle_circuit_established(),
            Input::Trigger { kind, friend } => self.handle_trigger(kind, friend),
            Input::Push { friend, payload } => self.handle_push(friend, payload),
            Input::Completed {
                kind,
                friend,
                outcome,
            } => self.handle_completed(kind, friend, outcome),
            Input::LocationRequested(friend) => self.handle_location_requested(friend),
            Input::PeerInteraction => self.observed_communication(),
            Input::Timer(timer) => self.handle_timer(timer),
            Input::Stop => vec![Command::Stop],
        }
    }

    fn handle_local(&mut self, change: LocalChange) -> Vec<Command> {
        match change {
            LocalChange::UpdatedSelf => vec![Command::Restart(RestartReason::UpdatedSelf)],
            LocalChange::AddedFriend(_) | LocalChange::RemovedFriend(_) => {
                vec![Command::Restart(RestartReason::FriendSetChanged)]
            },
            LocalChange::UpdatedFriend(_) => self.observed_communication(),
            LocalChange::UpdatedSelfGroup(id) => vec![Command::FanOutGroup(id)],
            LocalChange::UpdatedSelfPost(id) => vec![Command::FanOutPost(id)],
            LocalChange::UpdatedSelfLocation => {
                let recipients: Vec<_> = self.location_recipients.drain().collect();
                if recipients.is_empty()
                    || !config::currently_sharing_location(self.prefs.as_ref())
                {
                    vec![]
                } else {
                    vec![Command::FanOutLocation(recipients)]
                }
            },
            LocalChange::AddedDownload(friend) => {
                self.handle_trigger(TaskKind::DownloadFrom, friend)
            },
            LocalChange::NewSelfLocationFix(location) => {
                vec![Command::PersistLocation(location)]
            },
            LocalChange::PreferenceChanged => {
                self.debounce_generation += 1;
                vec![Command::Arm(
                    Timer::RestartDebounce {
                        generation: self.debounce_generation,
                    },
                    self.config.pref_restart_delay,
                )]
            },
        }
    }

    fn handle_circuit_established(&mut self) -> Vec<Command> {
        self.status = Status::Online;

        let mut cmds = vec![
            Command::EstablishClients,
            Command::Emit(Event::CircuitEstablished),
        ];
        cmds.extend(self.observed_communication());
        cmds.push(Command::Arm(
            Timer::DownloadRetry,
            self.config.download_retry_period,
        ));
        cmds.push(Command::TriggerAll(TaskKind::AskPull));
        cmds.push(Command::TriggerAll(TaskKind::PullFrom));
        // Payloads queued while offline are delivered now.
        for friend in self.queues.backlogged() {
            cmds.extend(self.handle_trigger(TaskKind::PushTo, friend));
        }

        cmds
    }

    /// A confirmed peer interaction pushes the no-communication deadline
    /// out.
    fn observed_communication(&mut self) -> Vec<Command> {
        if self.status != Status::Online {
            return vec![];
        }
        self.watchdog = WatchdogKind::NoCommunication;
        self.watchdog_generation += 1;
        vec![Command::Arm(
            Timer::Watchdog {
                kind: WatchdogKind::NoCommunication,
                generation: self.watchdog_generation,
            },
            self.config.no_comm_timeout,
        )]
    }

    fn handle_trigger(&mut self, kind: TaskKind, friend: FriendId) -> Vec<Command> {
        if self.status != Status::Online {
            return vec![];
        }
        if !self.registry.occupy(kind, &friend) {
            return vec![];
        }
        vec![Command::Start(Task { kind, friend })]
    }

    fn handle_push(&mut self, friend: FriendId, payload: Payload) -> Vec<Command> {
        self.queues.enqueue(&friend, payload);
        self.handle_trigger(TaskKind::PushTo, friend)
    }

    fn handle_completed(
        &mut self,
        kind: TaskKind,
        friend: FriendId,
        outcome: TaskOutcome,
    ) -> Vec<Command> {
        self.registry.clear(kind, &friend);

        let mut cmds = vec![];
        match outcome {
            TaskOutcome::Done => {
                cmds.extend(self.observed_communication());
                // A payload enqueued after the drain loop saw an empty
                // queue would otherwise sit until the next trigger
                // occasion.
                if kind == TaskKind::PushTo && !self.queues.is_empty(&friend) {
                    cmds.extend(self.handle_trigger(TaskKind::PushTo, friend));
                }
            },
            TaskOutcome::Failed => {
                if matches!(kind, TaskKind::AskPull | TaskKind::AskLocation) {
                    cmds.push(Command::Arm(
                        Timer::AskRetry { kind, friend },
                        self.config.friend_request_delay,
                    ));
                }
            },
            TaskOutcome::Skipped => {},
        }
        cmds
    }

    fn handle_location_requested(&mut self, friend: FriendId) -> Vec<Command> {
        if !config::currently_sharing_location(self.prefs.as_ref()) {
            return vec![];
        }
        self.location_recipients.insert(friend);
        vec![Command::StartLocationFix]
    }

    fn handle_timer(&mut self, timer: Timer) -> Vec<Command> {
        match timer {
            Timer::Watchdog { kind, generation } => {
                if kind == self.watchdog && generation == self.watchdog_generation {
                    vec![Command::Restart(RestartReason::Watchdog(kind))]
                } else {
                    vec![]
                }
            },
            Timer::RestartDebounce { generation } => {
                if generation == self.debounce_generation {
                    vec![Command::Restart(RestartReason::Preferences)]
                } else {
                    vec![]
                }
            },
            Timer::DownloadRetry => vec![
                Command::TriggerAll(TaskKind::DownloadFrom),
                Command::Arm(Timer::DownloadRetry, self.config.download_retry_period),
            ],
            Timer::AskRetry { kind, friend } => self.handle_trigger(kind, friend),
        }
    }

    pub(crate) fn dequeue_push(&mut self, friend: &FriendId) -> Option<Payload> {
        self.queues.dequeue(friend)
    }

    pub(crate) fn requeue_push(&mut self, friend: &FriendId, payload: Payload) {
        self.queues.requeue_front(friend, payload)
    }

    pub(crate) fn attach(&mut self, kind: TaskKind, friend: &FriendId, task: TaskHandle<()>) {
        self.registry.attach(kind, friend, task)
    }

    /// Clears registries, queues, and recipients; in-flight bodies are
    /// aborted by dropping their handles.
    pub fn reset(&mut self) {
        self.registry.clear_all();
        self.queues.clear();
        self.location_recipients.clear();
    }
}
