// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! The engine core: lifecycle, worker pools, and the session driver.
//!
//! [`Engine::run`] loops over sessions. A session brings up the transport
//! (server, hidden service, client pool), the scheduler, and the two
//! worker pools; the driver then applies inputs to [`run_state::RunState`]
//! under the engine lock and executes the resulting commands outside it.
//! A restart -- watchdog expiry, identity or friend-set change, settled
//! preference change -- tears the session down completely and starts a
//! fresh one; `stop()` followed by `start()` is the sole restart
//! mechanism.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt as _;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use warren_async::{Pool, Spawner, Task};

pub use tokio::sync::broadcast::error::RecvError;

use crate::{
    config::{Preferences, RunConfig},
    data::{FriendId, Location, ResourceId},
    server::Handlers,
    store::Store,
    transport::{
        ClientAuth, ClientFactory, NetworkState, OnionEvent, OnionRouter, ServiceConfig,
        Supervisor, TlsConfig, WebServer,
    },
    wire::Payload,
};

pub mod queue;
pub mod registry;
pub mod run_state;
pub(crate) mod scheduler;
pub(crate) mod tasks;

use run_state::{Command, Input, LocalChange, RestartReason, RunState, TaskKind};
use scheduler::Scheduler;
use tasks::QueueHandle;

/// Events external subscribers can observe for internal engine
/// operations.
#[derive(Clone, Debug)]
pub enum Event {
    Started,
    Stopped,
    Restarting(RestartReason),
    CircuitEstablished,
    PushDelivered { friend: FriendId },
    PullCompleted { friend: FriendId },
    DownloadCompleted { friend: FriendId, resource: ResourceId },
}

/// Produces location fixes on demand.
#[async_trait]
pub trait LocationProvider: Send + Sync + 'static {
    async fn fix(&self) -> std::io::Result<Location>;
}

/// The transport collaborators the engine supervises.
#[derive(Clone)]
pub struct Transports {
    pub onion: Arc<dyn OnionRouter>,
    pub server: Arc<dyn WebServer>,
    pub clients: Arc<dyn ClientFactory>,
    pub network: Arc<dyn NetworkState>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("the engine must be run from within a tokio runtime")]
    Runtime,
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
}

/// The long-running background coordinator.
///
/// Construct it with its collaborators, take a [`Handle`], and drive it
/// with [`Engine::run`] until [`Handle::stop`].
pub struct Engine<S> {
    config: RunConfig,
    store: Arc<S>,
    transports: Transports,
    locator: Arc<dyn LocationProvider>,
    prefs: Arc<dyn Preferences>,
    subscribers: broadcast::Sender<Event>,
    inputs: mpsc::UnboundedSender<Input>,
    inbox: mpsc::UnboundedReceiver<Input>,
}

impl<S> Engine<S>
where
    S: Store,
{
    pub fn new(
        config: RunConfig,
        store: Arc<S>,
        transports: Transports,
        locator: Arc<dyn LocationProvider>,
        prefs: Arc<dyn Preferences>,
    ) -> Self {
        let (inputs, inbox) = mpsc::unbounded_channel();
        let (subscribers, _) = broadcast::channel(64);
        Self {
            config,
            store,
            transports,
            locator,
            prefs,
            subscribers,
            inputs,
            inbox,
        }
    }

    /// A cheap handle for feeding events in and subscribing to events
    /// out. Valid across restarts.
    pub fn handle(&self) -> Handle {
        Handle {
            inputs: self.inputs.clone(),
            subscribers: self.subscribers.clone(),
        }
    }

    /// Run sessions until [`Handle::stop`] is called.
    ///
    /// A failure to bring a session up is catastrophic: it is propagated
    /// and the engine is left stopped.
    pub async fn run(self) -> Result<(), Error> {
        let Self {
            config,
            store,
            transports,
            locator,
            prefs,
            subscribers,
            inputs,
            mut inbox,
        } = self;
        let spawner = Spawner::from_current().ok_or(Error::Runtime)?;
        let driver = Driver {
            config,
            store,
            transports,
            locator,
            prefs,
            subscribers,
            inputs,
        };

        loop {
            let session = driver.start_session(&spawner).await?;

            let end = 'drive: loop {
                let Some(input) = inbox.recv().await else {
                    break 'drive End::Stop;
                };
                let commands = session.state.lock().transition(input);
                for command in commands {
                    if let Some(end) = driver.execute(&session, command).await {
                        break 'drive end;
                    }
                }
            };

            driver.stop_session(session).await;
            driver.subscribers.send(Event::Stopped).ok();

            match end {
                End::Restart(reason) => {
                    tracing::info!(?reason, "restarting");
                    continue;
                },
                End::Stop => return Ok(()),
            }
        }
    }
}

/// A cheap, cloneable handle to a running [`Engine`].
#[derive(Clone)]
pub struct Handle {
    inputs: mpsc::UnboundedSender<Input>,
    subscribers: broadcast::Sender<Event>,
}

impl Handle {
    /// Inform the engine of a local state change.
    pub fn notify(&self, change: LocalChange) {
        self.inputs.send(Input::Local(change)).ok();
    }

    /// Schedule a task for a friend unless one is already in flight.
    pub fn trigger(&self, kind: TaskKind, friend: FriendId) {
        self.inputs.send(Input::Trigger { kind, friend }).ok();
    }

    /// Shut the engine down. Idempotent.
    pub fn stop(&self) {
        self.inputs.send(Input::Stop).ok();
    }

    pub fn subscribe(&self) -> impl futures::Stream<Item = Result<Event, RecvError>> {
        let mut rx = self.subscribers.subscribe();
        async_stream::stream! { loop { yield rx.recv().await } }
    }

    pub(crate) fn send(&self, input: Input) {
        self.inputs.send(input).ok();
    }
}

enum End {
    Restart(RestartReason),
    Stop,
}

/// The immutable collaborators shared by every session.
struct Driver<S> {
    config: RunConfig,
    store: Arc<S>,
    transports: Transports,
    locator: Arc<dyn LocationProvider>,
    prefs: Arc<dyn Preferences>,
    subscribers: broadcast::Sender<Event>,
    inputs: mpsc::UnboundedSender<Input>,
}

/// Everything that is replaced wholesale on restart.
struct Session<S> {
    state: Arc<Mutex<RunState>>,
    supervisor: Arc<Supervisor>,
    scheduler: Scheduler,
    local_pool: Pool,
    request_pool: Pool,
    tasks_ctx: Arc<tasks::Context<S>>,
    fixer: Mutex<Option<Task<()>>>,
    _circuit: Task<()>,
}

impl<S> Driver<S>
where
    S: Store,
{
    async fn start_session(&self, spawner: &Spawner) -> Result<Session<S>, Error> {
        let state = Arc::new(Mutex::new(RunState::new(
            self.config.clone(),
            Arc::clone(&self.prefs),
        )));
        let scheduler = Scheduler::spawn(spawner, self.inputs.clone());
        let local_pool = Pool::new(spawner.clone(), self.config.thread_pool_size);
        let request_pool = Pool::new(spawner.clone(), self.config.thread_pool_size);
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&self.transports.onion),
            Arc::clone(&self.transports.server),
            Arc::clone(&self.transports.clients),
            self.config.thread_pool_size,
        ));

        let me = self.store.self_identity().await?;
        let friends = self.store.friends().await?;
        let tls = TlsConfig {
            certificate: me.certificate.clone(),
            private_key: me.private_key.clone(),
            accepted: friends.iter().map(|f| f.certificate.clone()).collect(),
        };
        let service = ServiceConfig {
            key: me.hidden_service_key.clone(),
            client_auth: friends
                .iter()
                .map(|f| ClientAuth {
                    hostname: f.hostname.clone(),
                    auth_cookie: f.auth_cookie.clone(),
                })
                .collect(),
        };

        let handlers = Arc::new(Handlers::new(
            Arc::clone(&self.store),
            Handle {
                inputs: self.inputs.clone(),
                subscribers: self.subscribers.clone(),
            },
            Arc::clone(&self.prefs),
            Arc::clone(&self.transports.network),
            request_pool.clone(),
        ));
        supervisor.start(tls, service, handlers).await?;

        let mut onion_events = supervisor.events();
        let inputs = self.inputs.clone();
        let circuit = spawner.spawn(async move {
            while let Some(event) = onion_events.next().await {
                match event {
                    OnionEvent::CircuitEstablished => {
                        if inputs.send(Input::CircuitEstablished).is_err() {
                            break;
                        }
                    },
                }
            }
        });

        let tasks_ctx = Arc::new(tasks::Context {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&supervisor),
            prefs: Arc::clone(&self.prefs),
            network: Arc::clone(&self.transports.network),
            queue: QueueHandle::new(Arc::clone(&state)),
            inputs: self.inputs.clone(),
            subscribers: self.subscribers.clone(),
        });

        let session = Session {
            state,
            supervisor,
            scheduler,
            local_pool,
            request_pool,
            tasks_ctx,
            fixer: Mutex::new(None),
            _circuit: circuit,
        };

        let commands = session.state.lock().start_commands();
        for command in commands {
            self.execute(&session, command).await;
        }

        Ok(session)
    }

    /// Tear down in order: scheduler, in-flight work, pools, transport.
    async fn stop_session(&self, session: Session<S>) {
        let Session {
            state,
            supervisor,
            scheduler,
            local_pool,
            request_pool,
            fixer,
            _circuit,
            ..
        } = session;

        drop(scheduler);
        fixer.lock().take();
        state.lock().reset();
        local_pool.close();
        request_pool.close();
        drop(_circuit);
        supervisor.stop().await;
    }

    async fn execute(&self, session: &Session<S>, command: Command) -> Option<End> {
        match command {
            Command::Start(task) => {
                self.start_task(session, task);
                None
            },
            Command::EstablishClients => {
                if let Err(e) = session.supervisor.establish_clients() {
                    tracing::warn!(err = %e, "cannot set up the client pool");
                }
                None
            },
            Command::TriggerAll(kind) => {
                match self.store.friends().await {
                    Ok(friends) => {
                        for friend in friends {
                            self.inputs
                                .send(Input::Trigger {
                                    kind,
                                    friend: friend.id,
                                })
                                .ok();
                        }
                    },
                    Err(e) => tracing::warn!(err = %e, "cannot list friends for fan-out"),
                }
                None
            },
            Command::FanOutGroup(id) => {
                match self.store.group(&id).await {
                    Ok(group) => {
                        let members = group.members.clone();
                        self.push_to_friends(members, Payload::Group(group)).await;
                    },
                    Err(e) => tracing::warn!(group = %id, err = %e, "cannot load group"),
                }
                None
            },
            Command::FanOutPost(id) => {
                match self.store.post(&id).await {
                    Ok(post) => match self.store.group(&post.group).await {
                        Ok(group) => {
                            self.push_to_friends(group.members, Payload::Post(post)).await;
                        },
                        Err(e) => {
                            tracing::warn!(group = %post.group, err = %e, "cannot load group")
                        },
                    },
                    Err(e) => tracing::warn!(post = %id, err = %e, "cannot load post"),
                }
                None
            },
            Command::FanOutLocation(recipients) => {
                match self.store.self_location().await {
                    Ok(Some(location)) => {
                        for friend in recipients {
                            self.inputs
                                .send(Input::Push {
                                    friend,
                                    payload: Payload::Location(location.clone()),
                                })
                                .ok();
                        }
                    },
                    Ok(None) => tracing::debug!("no self location to share"),
                    Err(e) => tracing::warn!(err = %e, "cannot load self location"),
                }
                None
            },
            Command::PersistLocation(location) => {
                match self.store.put_self_location(location).await {
                    Ok(()) => {
                        self.inputs
                            .send(Input::Local(LocalChange::UpdatedSelfLocation))
                            .ok();
                    },
                    Err(e) => tracing::warn!(err = %e, "cannot persist location fix"),
                }
                None
            },
            Command::StartLocationFix => {
                let locator = Arc::clone(&self.locator);
                let inputs = self.inputs.clone();
                let fix = session.local_pool.spawn(async move {
                    match locator.fix().await {
                        Ok(location) => {
                            inputs
                                .send(Input::Local(LocalChange::NewSelfLocationFix(location)))
                                .ok();
                        },
                        Err(e) => tracing::warn!(err = %e, "location fix failed"),
                    }
                });
                // A newer request supersedes (and aborts) an older fix.
                *session.fixer.lock() = Some(fix);
                None
            },
            Command::Arm(timer, after) => {
                session.scheduler.arm(timer, after);
                None
            },
            Command::Emit(event) => {
                self.subscribers.send(event).ok();
                None
            },
            Command::Restart(reason) => {
                self.subscribers.send(Event::Restarting(reason)).ok();
                Some(End::Restart(reason))
            },
            Command::Stop => Some(End::Stop),
        }
    }

    fn start_task(&self, session: &Session<S>, task: run_state::Task) {
        let run_state::Task { kind, friend } = task;
        let body = session
            .local_pool
            .spawn(tasks::run(Arc::clone(&session.tasks_ctx), kind, friend.clone()));
        session.state.lock().attach(kind, &friend, body);
    }

    /// Enqueue `payload` for every member that is a friend.
    async fn push_to_friends(&self, members: Vec<FriendId>, payload: Payload) {
        for member in members {
            match self.store.friend(&member).await {
                Ok(Some(_)) => {
                    self.inputs
                        .send(Input::Push {
                            friend: member,
                            payload: payload.clone(),
                        })
                        .ok();
                },
                Ok(None) => {},
                Err(e) => tracing::warn!(friend = %member, err = %e, "friend lookup failed"),
            }
        }
    }
}
