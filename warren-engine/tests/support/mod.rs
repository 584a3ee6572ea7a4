// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! In-memory collaborators for driving the engine in tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use warren_engine::{
    config::Preferences,
    data::{
        Download, DownloadState, Friend, FriendId, Group, GroupId, LocalResource, Location, Post,
        PostId, ResourceId, SelfIdentity,
    },
    engine::{Engine, Handle, LocationProvider, Transports},
    server::RequestHandler,
    store::{Error as StoreError, PullResponseIter, Store},
    transport::{
        self, Client, ClientFactory, Method, NetworkState, OnionEvent, OnionEvents, OnionRouter,
        Request, Response, ServiceConfig, TlsConfig, WebServer,
    },
    wire::{Payload, PullRequest},
    RunConfig,
};

pub fn friend(name: &str) -> Friend {
    Friend {
        id: FriendId::from(name),
        nickname: name.to_string(),
        certificate: format!("CERT-{}", name),
        hostname: format!("{}.onion", name),
        auth_cookie: format!("cookie-{}", name),
    }
}

pub fn identity() -> SelfIdentity {
    SelfIdentity {
        nickname: "me".to_string(),
        certificate: "CERT-me".to_string(),
        private_key: "KEY-me".to_string(),
        hidden_service_key: "HSKEY-me".to_string(),
        hostname: "me.onion".to_string(),
    }
}

pub fn group(id: &str, members: &[&str], sequence: u64) -> Group {
    Group {
        id: GroupId::from(id),
        name: format!("group {}", id),
        members: members.iter().map(|m| FriendId::from(*m)).collect(),
        sequence,
        modified: Utc::now(),
    }
}

pub fn post(id: &str, group: &str, sequence: u64) -> Post {
    Post {
        id: PostId::from(id),
        group: GroupId::from(group),
        content: format!("content of {}", id),
        attachments: vec![],
        sequence,
        created: Utc::now(),
    }
}

// -- store -------------------------------------------------------------

#[derive(Default)]
pub struct Calls {
    /// Payload ids passed to `confirm_sent_to`, in call order.
    pub confirmed: Vec<(FriendId, String)>,
    /// `put_pull_response` commits: cursor presence and chunk sizes.
    pub pull_commits: Vec<(FriendId, Option<PullRequest>, usize, usize)>,
    /// Cursors acknowledged through `confirm_pulled_up_to`.
    pub acked: Vec<(FriendId, PullRequest)>,
    /// `update_download_state` calls.
    pub download_states: Vec<(FriendId, ResourceId, DownloadState)>,
    /// Payloads stored via `put_pushed_*`.
    pub pushed: Vec<(FriendId, Payload)>,
}

pub struct MockStore {
    pub me: SelfIdentity,
    pub friends: Mutex<Vec<Friend>>,
    pub groups: Mutex<HashMap<GroupId, Group>>,
    pub posts: Mutex<HashMap<PostId, Post>>,
    pub self_location: Mutex<Option<Location>>,
    pub downloads: Mutex<HashMap<FriendId, VecDeque<Download>>>,
    pub resources: Mutex<HashMap<(FriendId, ResourceId), LocalResource>>,
    /// Items served to pulling peers.
    pub pull_serve: Mutex<Vec<Payload>>,
    pub calls: Mutex<Calls>,
    pub max_pull: usize,
}

impl MockStore {
    pub fn with_friends(friends: Vec<Friend>) -> Arc<Self> {
        Arc::new(Self {
            me: identity(),
            friends: Mutex::new(friends),
            groups: Mutex::new(HashMap::new()),
            posts: Mutex::new(HashMap::new()),
            self_location: Mutex::new(None),
            downloads: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
            pull_serve: Mutex::new(Vec::new()),
            calls: Mutex::new(Calls::default()),
            max_pull: 100,
        })
    }

    pub fn add_group(&self, group: Group) {
        self.groups.lock().insert(group.id.clone(), group);
    }

    pub fn add_post(&self, post: Post) {
        self.posts.lock().insert(post.id.clone(), post);
    }

    pub fn add_download(&self, friend: &FriendId, download: Download) {
        self.downloads
            .lock()
            .entry(friend.clone())
            .or_default()
            .push_back(download);
    }
}

fn payload_id(payload: &Payload) -> String {
    match payload {
        Payload::Group(group) => group.id.to_string(),
        Payload::Post(post) => post.id.to_string(),
        Payload::Location(_) => "location".to_string(),
    }
}

#[async_trait]
impl Store for MockStore {
    async fn self_identity(&self) -> Result<SelfIdentity, StoreError> {
        Ok(self.me.clone())
    }

    async fn friends(&self) -> Result<Vec<Friend>, StoreError> {
        Ok(self.friends.lock().clone())
    }

    async fn friend(&self, id: &FriendId) -> Result<Option<Friend>, StoreError> {
        Ok(self.friends.lock().iter().find(|f| &f.id == id).cloned())
    }

    async fn friend_by_certificate(&self, certificate: &str) -> Result<Option<Friend>, StoreError> {
        Ok(self
            .friends
            .lock()
            .iter()
            .find(|f| f.certificate == certificate)
            .cloned())
    }

    async fn group(&self, id: &GroupId) -> Result<Group, StoreError> {
        self.groups
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownGroup(id.clone()))
    }

    async fn post(&self, id: &PostId) -> Result<Post, StoreError> {
        self.posts
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownPost(id.clone()))
    }

    async fn self_location(&self) -> Result<Option<Location>, StoreError> {
        Ok(self.self_location.lock().clone())
    }

    async fn put_self_location(&self, location: Location) -> Result<(), StoreError> {
        *self.self_location.lock() = Some(location);
        Ok(())
    }

    async fn put_pushed_group(&self, from: &FriendId, group: Group) -> Result<(), StoreError> {
        self.calls
            .lock()
            .pushed
            .push((from.clone(), Payload::Group(group)));
        Ok(())
    }

    async fn put_pushed_location(
        &self,
        from: &FriendId,
        location: Location,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .pushed
            .push((from.clone(), Payload::Location(location)));
        Ok(())
    }

    async fn put_pushed_post(&self, from: &FriendId, post: Post) -> Result<bool, StoreError> {
        self.calls
            .lock()
            .pushed
            .push((from.clone(), Payload::Post(post)));
        Ok(true)
    }

    async fn pull_request(&self, _friend: &FriendId) -> Result<PullRequest, StoreError> {
        Ok(PullRequest {
            last_group_sequence: 0,
            last_post_sequence: 0,
            reciprocal: false,
        })
    }

    async fn put_pull_response(
        &self,
        friend: &FriendId,
        request: Option<PullRequest>,
        groups: Vec<Group>,
        posts: Vec<Post>,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .pull_commits
            .push((friend.clone(), request, groups.len(), posts.len()));
        Ok(())
    }

    async fn pull_response(
        &self,
        _friend: &FriendId,
        _request: &PullRequest,
    ) -> Result<PullResponseIter, StoreError> {
        let items = self.pull_serve.lock().clone();
        Ok(Box::new(items.into_iter().map(Ok)))
    }

    async fn confirm_sent_to(&self, friend: &FriendId, payload: &Payload) -> Result<(), StoreError> {
        self.calls
            .lock()
            .confirmed
            .push((friend.clone(), payload_id(payload)));
        Ok(())
    }

    async fn confirm_pulled_up_to(
        &self,
        friend: &FriendId,
        request: &PullRequest,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .acked
            .push((friend.clone(), request.clone()));
        Ok(())
    }

    async fn next_in_progress_download(
        &self,
        friend: &FriendId,
    ) -> Result<Option<Download>, StoreError> {
        Ok(self
            .downloads
            .lock()
            .get(friend)
            .and_then(|queue| queue.front().cloned()))
    }

    async fn update_download_state(
        &self,
        friend: &FriendId,
        resource: &ResourceId,
        state: DownloadState,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .download_states
            .push((friend.clone(), resource.clone(), state));
        if state == DownloadState::Complete {
            if let Some(queue) = self.downloads.lock().get_mut(friend) {
                queue.retain(|d| &d.resource_id != resource);
            }
        }
        Ok(())
    }

    async fn local_resource(
        &self,
        friend: &FriendId,
        resource: &ResourceId,
    ) -> Result<Option<LocalResource>, StoreError> {
        Ok(self
            .resources
            .lock()
            .get(&(friend.clone(), resource.clone()))
            .cloned())
    }

    async fn update_friend_sent(
        &self,
        _friend: &FriendId,
        _at: DateTime<Utc>,
        _bytes: u64,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn update_friend_received(
        &self,
        _friend: &FriendId,
        _at: DateTime<Utc>,
        _bytes: u64,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn max_pull_transaction_objects(&self) -> usize {
        self.max_pull
    }
}

// -- transport ---------------------------------------------------------

/// A request as seen by the mock network, with the body collected.
pub struct Recorded {
    pub method: Method,
    pub host: String,
    pub path: &'static str,
    pub query: Vec<(&'static str, String)>,
    pub range: Option<u64>,
    pub body: Option<Bytes>,
}

type Responder = Box<dyn Fn(&Recorded) -> Response + Send + Sync>;

pub struct MockNet {
    pub requests: Mutex<Vec<Recorded>>,
    responder: Mutex<Responder>,
}

impl MockNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Mutex::new(Box::new(|_| Response::empty())),
        })
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Recorded) -> Response + Send + Sync + 'static,
    {
        *self.responder.lock() = Box::new(responder);
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }

    pub fn bodies(&self, path: &str) -> Vec<Bytes> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .filter_map(|r| r.body.clone())
            .collect()
    }
}

pub struct MockClient {
    net: Arc<MockNet>,
}

#[async_trait]
impl Client for MockClient {
    async fn request(&self, request: Request) -> Result<Response, transport::Error> {
        let recorded = Recorded {
            method: request.method,
            host: request.host,
            path: request.path,
            query: request.query,
            range: request.range,
            body: request.body,
        };
        let response = {
            let respond = self.net.responder.lock();
            (*respond)(&recorded)
        };
        self.net.requests.lock().push(recorded);
        Ok(response)
    }
}

pub struct MockFactory {
    pub net: Arc<MockNet>,
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn connect(&self, _socks_port: u16) -> Result<Box<dyn Client>, transport::Error> {
        Ok(Box::new(MockClient {
            net: Arc::clone(&self.net),
        }))
    }
}

pub struct MockOnion {
    circuit: AtomicBool,
    sender: mpsc::UnboundedSender<OnionEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<OnionEvent>>>,
}

impl MockOnion {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            circuit: AtomicBool::new(false),
            sender,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Flip the circuit up and notify the engine.
    pub fn establish(&self) {
        self.circuit.store(true, SeqCst);
        self.sender.send(OnionEvent::CircuitEstablished).ok();
    }
}

#[async_trait]
impl OnionRouter for MockOnion {
    async fn start(&self, _config: ServiceConfig, _local_port: u16) -> Result<(), transport::Error> {
        Ok(())
    }

    async fn stop(&self) {
        self.circuit.store(false, SeqCst);
    }

    fn is_circuit_established(&self) -> bool {
        self.circuit.load(SeqCst)
    }

    fn socks_port(&self) -> Option<u16> {
        if self.is_circuit_established() {
            Some(9050)
        } else {
            None
        }
    }

    fn events(&self) -> OnionEvents {
        match self.receiver.lock().take() {
            Some(mut receiver) => Box::pin(async_stream::stream! {
                while let Some(event) = receiver.recv().await {
                    yield event;
                }
            }),
            None => Box::pin(futures::stream::pending()),
        }
    }
}

pub struct MockServer {
    handler: Mutex<Option<Arc<dyn RequestHandler>>>,
    pub starts: Mutex<usize>,
    up_tx: watch::Sender<bool>,
    up_rx: watch::Receiver<bool>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        let (up_tx, up_rx) = watch::channel(false);
        Arc::new(Self {
            handler: Mutex::new(None),
            starts: Mutex::new(0),
            up_tx,
            up_rx,
        })
    }

    pub fn handler(&self) -> Arc<dyn RequestHandler> {
        self.handler.lock().clone().expect("server not started")
    }

    pub async fn wait_up(&self) {
        let mut rx = self.up_rx.clone();
        while !*rx.borrow() {
            rx.changed().await.expect("server dropped");
        }
    }
}

#[async_trait]
impl WebServer for MockServer {
    async fn start(
        &self,
        _tls: TlsConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<u16, transport::Error> {
        *self.handler.lock() = Some(handler);
        *self.starts.lock() += 1;
        self.up_tx.send(true).ok();
        Ok(8443)
    }

    async fn stop(&self) {
        self.up_tx.send(false).ok();
    }
}

pub struct Wifi {
    pub on: AtomicBool,
}

impl NetworkState for Wifi {
    fn is_wifi(&self) -> bool {
        self.on.load(SeqCst)
    }
}

// -- preferences and location -----------------------------------------

#[derive(Default)]
pub struct TestPrefs {
    pub flags: Mutex<HashMap<String, bool>>,
}

impl TestPrefs {
    pub fn set_flag(&self, key: &str, value: bool) {
        self.flags.lock().insert(key.to_string(), value);
    }
}

impl Preferences for TestPrefs {
    fn flag(&self, key: &str) -> bool {
        self.flags.lock().get(key).copied().unwrap_or(false)
    }

    fn value(&self, _key: &str) -> Option<String> {
        None
    }

    fn values(&self, _key: &str) -> std::collections::HashSet<String> {
        std::collections::HashSet::new()
    }
}

pub struct FixedLocator;

#[async_trait]
impl LocationProvider for FixedLocator {
    async fn fix(&self) -> std::io::Result<Location> {
        Ok(Location {
            latitude: 52.52,
            longitude: 13.405,
            timestamp: Utc::now(),
            street_address: None,
        })
    }
}

// -- harness -----------------------------------------------------------

pub struct Harness {
    pub store: Arc<MockStore>,
    pub net: Arc<MockNet>,
    pub onion: Arc<MockOnion>,
    pub server: Arc<MockServer>,
    pub prefs: Arc<TestPrefs>,
    pub handle: Handle,
    run: tokio::task::JoinHandle<Result<(), warren_engine::engine::Error>>,
}

impl Harness {
    /// Start an engine over the in-memory collaborators and wait for the
    /// transport to come up. The circuit is not yet established.
    pub async fn start(store: Arc<MockStore>) -> Self {
        let net = MockNet::new();
        let onion = MockOnion::new();
        let server = MockServer::new();
        let prefs = Arc::new(TestPrefs::default());

        let config = RunConfig {
            thread_pool_size: 8,
            friend_request_delay: Duration::from_millis(50),
            download_retry_period: Duration::from_secs(3600),
            pref_restart_delay: Duration::from_millis(100),
            not_connected_timeout: Duration::from_secs(600),
            no_comm_timeout: Duration::from_secs(600),
        };
        let engine = Engine::new(
            config,
            Arc::clone(&store),
            Transports {
                onion: onion.clone(),
                server: server.clone(),
                clients: Arc::new(MockFactory {
                    net: Arc::clone(&net),
                }),
                network: Arc::new(Wifi {
                    on: AtomicBool::new(true),
                }),
            },
            Arc::new(FixedLocator),
            prefs.clone(),
        );
        let handle = engine.handle();
        let run = tokio::spawn(engine.run());
        server.wait_up().await;

        Self {
            store,
            net,
            onion,
            server,
            prefs,
            handle,
            run,
        }
    }

    pub async fn shutdown(self) {
        self.handle.stop();
        self.run
            .await
            .expect("engine panicked")
            .expect("engine failed");
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}
