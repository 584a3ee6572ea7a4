// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! The transport seam: contracts for the onion-router wrapper and the
//! HTTPS server/client pair, and the [`Supervisor`] that brings them up
//! and tears them down as one unit.

use std::{pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use thiserror::Error;

use crate::server::RequestHandler;

pub mod clients;
pub use clients::{Clients, Pooled};

#[derive(Debug, Error)]
pub enum Error {
    #[error("circuit to the hidden service is not established")]
    NoCircuit,
    #[error("client connection pool unavailable")]
    Pool,
    #[error("onion router: {0}")]
    Onion(String),
    #[error("server: {0}")]
    Server(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

/// An outgoing request to a friend's hidden service.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Hidden-service hostname of the peer.
    pub host: String,
    pub path: &'static str,
    pub query: Vec<(&'static str, String)>,
    /// Byte offset to resume from; the range is unbounded at the top.
    pub range: Option<u64>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn get(host: &str, path: &'static str) -> Self {
        Self {
            method: Method::Get,
            host: host.to_string(),
            path,
            query: vec![],
            range: None,
            body: None,
        }
    }

    pub fn put(host: &str, path: &'static str, body: Bytes) -> Self {
        Self {
            method: Method::Put,
            host: host.to_string(),
            path,
            query: vec![],
            range: None,
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &'static str, value: String) -> Self {
        self.query.push((key, value));
        self
    }

    pub fn range(mut self, offset: u64) -> Self {
        self.range = Some(offset);
        self
    }
}

/// A chunked response or request body.
pub type Body = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

pub fn empty_body() -> Body {
    Box::pin(futures::stream::empty())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The peer declined without a body ("not available").
    NotAvailable,
    Failed(u16),
}

pub struct Response {
    pub status: Status,
    pub body: Body,
}

impl Response {
    pub fn ok(body: Body) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    pub fn empty() -> Self {
        Self::ok(empty_body())
    }
}

/// Connectivity transitions reported by the onion-router wrapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnionEvent {
    CircuitEstablished,
}

pub type OnionEvents = Pin<Box<dyn Stream<Item = OnionEvent> + Send>>;

/// Authorization material for one peer of our hidden service.
#[derive(Clone, Debug)]
pub struct ClientAuth {
    pub hostname: String,
    pub auth_cookie: String,
}

/// Parameters for running the hidden service.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Hidden-service key material.
    pub key: String,
    /// Peers allowed to connect to the service.
    pub client_auth: Vec<ClientAuth>,
}

/// The onion-router process wrapper, run in services mode.
#[async_trait]
pub trait OnionRouter: Send + Sync + 'static {
    /// Publish the hidden service, forwarding to `local_port`.
    async fn start(&self, config: ServiceConfig, local_port: u16) -> Result<(), Error>;
    async fn stop(&self);
    fn is_circuit_established(&self) -> bool;
    fn socks_port(&self) -> Option<u16>;
    /// Subscribe to connectivity transitions.
    fn events(&self) -> OnionEvents;
}

/// X.509 material for the server side of the transport.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub certificate: String,
    pub private_key: String,
    /// Client certificates of all current friends.
    pub accepted: Vec<String>,
}

/// The mutually-authenticating HTTPS server.
#[async_trait]
pub trait WebServer: Send + Sync + 'static {
    /// Bind to an internal port, delegating requests to `handler`.
    /// Returns the listening port.
    async fn start(&self, tls: TlsConfig, handler: Arc<dyn RequestHandler>) -> Result<u16, Error>;
    async fn stop(&self);
}

/// One HTTPS client connection, tunneled through the SOCKS proxy.
#[async_trait]
pub trait Client: Send + Sync {
    async fn request(&self, request: Request) -> Result<Response, Error>;
}

#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    async fn connect(&self, socks_port: u16) -> Result<Box<dyn Client>, Error>;
}

/// Probe for the kind of network the device is currently on, for the
/// files-on-Wi-Fi-only gate.
pub trait NetworkState: Send + Sync + 'static {
    fn is_wifi(&self) -> bool;
}

/// Brings up and tears down the server, the hidden service, and the
/// client pool as one unit. One supervisor exists per engine session and
/// is replaced wholesale on restart.
pub struct Supervisor {
    onion: Arc<dyn OnionRouter>,
    server: Arc<dyn WebServer>,
    factory: Arc<dyn ClientFactory>,
    pool_size: usize,
    clients: Mutex<Option<Clients>>,
}

impl Supervisor {
    pub fn new(
        onion: Arc<dyn OnionRouter>,
        server: Arc<dyn WebServer>,
        factory: Arc<dyn ClientFactory>,
        pool_size: usize,
    ) -> Self {
        Self {
            onion,
            server,
            factory,
            pool_size,
            clients: Mutex::new(None),
        }
    }

    /// Start the server, then publish the hidden service pointing at it.
    pub async fn start(
        &self,
        tls: TlsConfig,
        service: ServiceConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), Error> {
        let port = self.server.start(tls, handler).await?;
        tracing::info!(port, "transport server up");
        if let Err(e) = self.onion.start(service, port).await {
            self.server.stop().await;
            return Err(e);
        }
        Ok(())
    }

    /// Construct the client connection pool. Requires the circuit, since
    /// the pool dials through the onion router's SOCKS proxy.
    pub fn establish_clients(&self) -> Result<(), Error> {
        let socks_port = self.onion.socks_port().ok_or(Error::NoCircuit)?;
        let manager = clients::ClientManager::new(Arc::clone(&self.factory), socks_port);
        *self.clients.lock() = Some(Clients::new(manager, self.pool_size));
        Ok(())
    }

    pub fn clients(&self) -> Option<Clients> {
        self.clients.lock().clone()
    }

    pub fn is_circuit_established(&self) -> bool {
        self.onion.is_circuit_established()
    }

    pub fn events(&self) -> OnionEvents {
        self.onion.events()
    }

    /// Tear down in order: client pool, onion router, server.
    pub async fn stop(&self) {
        self.clients.lock().take();
        self.onion.stop().await;
        self.server.stop().await;
    }
}
