// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Handlers for requests incoming from peers.
//!
//! The HTTPS server authenticates the peer by client certificate and
//! delegates to the [`RequestHandler`] contract. Handlers resolve the
//! certificate through the store, never touch the engine lock, and gate
//! their execution on the peer-request pool, so a flood of peer requests
//! cannot starve locally-initiated work.

use std::{collections::HashSet, io::SeekFrom, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use warren_async::Pool;

use crate::{
    config::{self, keys, Preferences},
    data::{Friend, FriendId, ResourceId},
    engine::{
        run_state::{Input, TaskKind},
        Handle,
    },
    store::Store,
    transport::{Body, NetworkState},
    wire::{codec, Payload, PullRequest},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The presented client certificate belongs to no known friend.
    #[error("unknown peer certificate")]
    UnknownCertificate,
    /// The request is understood but refused, eg. location sharing is
    /// off or downloads are gated to Wi-Fi. Served without a body.
    #[error("not available")]
    NotAvailable,
    #[error(transparent)]
    Invalid(#[from] crate::data::Invalid),
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error(transparent)]
    Store(crate::store::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("handler pool closed")]
    Closed,
}

/// A ranged resource read served back to a downloading peer.
pub struct DownloadStream {
    pub mime: String,
    pub length: u64,
    pub body: Body,
}

/// The contract the HTTPS server drives for incoming requests. The
/// `certificate` argument is the peer's X.509 client certificate in PEM
/// form, as presented during the TLS handshake.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// For logging and display by the server layer.
    async fn friend_nickname(&self, certificate: &str) -> Result<String, Error>;

    /// Bookkeeping after a completed outbound transfer.
    async fn update_friend_sent(
        &self,
        certificate: &str,
        at: DateTime<Utc>,
        bytes: u64,
    ) -> Result<(), Error>;

    /// Bookkeeping after a completed inbound transfer.
    async fn update_friend_received(
        &self,
        certificate: &str,
        at: DateTime<Utc>,
        bytes: u64,
    ) -> Result<(), Error>;

    async fn ask_pull(&self, certificate: &str) -> Result<(), Error>;

    async fn ask_location(&self, certificate: &str) -> Result<(), Error>;

    /// Consume a pushed payload stream.
    async fn push(&self, certificate: &str, body: Body) -> Result<(), Error>;

    /// Answer a pull request with a payload stream.
    async fn pull(&self, certificate: &str, request: Bytes) -> Result<Body, Error>;

    /// Serve resource bytes starting at `offset`.
    async fn download(
        &self,
        certificate: &str,
        resource: &ResourceId,
        offset: u64,
    ) -> Result<DownloadStream, Error>;
}

pub struct Handlers<S> {
    store: Arc<S>,
    engine: Handle,
    prefs: Arc<dyn Preferences>,
    network: Arc<dyn NetworkState>,
    pool: Pool,
}

impl<S> Handlers<S>
where
    S: Store,
{
    pub fn new(
        store: Arc<S>,
        engine: Handle,
        prefs: Arc<dyn Preferences>,
        network: Arc<dyn NetworkState>,
        pool: Pool,
    ) -> Self {
        Self {
            store,
            engine,
            prefs,
            network,
            pool,
        }
    }

    async fn authenticate(&self, certificate: &str) -> Result<Friend, Error> {
        self.store
            .friend_by_certificate(certificate)
            .await
            .map_err(Error::Store)?
            .ok_or(Error::UnknownCertificate)
    }
}

#[async_trait]
impl<S> RequestHandler for Handlers<S>
where
    S: Store,
{
    async fn friend_nickname(&self, certificate: &str) -> Result<String, Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        Ok(self.authenticate(certificate).await?.nickname)
    }

    async fn update_friend_sent(
        &self,
        certificate: &str,
        at: DateTime<Utc>,
        bytes: u64,
    ) -> Result<(), Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;
        self.store
            .update_friend_sent(&friend.id, at, bytes)
            .await
            .map_err(Error::Store)
    }

    async fn update_friend_received(
        &self,
        certificate: &str,
        at: DateTime<Utc>,
        bytes: u64,
    ) -> Result<(), Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;
        self.store
            .update_friend_received(&friend.id, at, bytes)
            .await
            .map_err(Error::Store)
    }

    async fn ask_pull(&self, certificate: &str) -> Result<(), Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;
        tracing::debug!(nickname = %friend.nickname, "peer asked us to pull");
        self.engine.trigger(TaskKind::PullFrom, friend.id);
        self.engine.send(Input::PeerInteraction);
        Ok(())
    }

    async fn ask_location(&self, certificate: &str) -> Result<(), Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;
        if !config::currently_sharing_location(self.prefs.as_ref()) {
            tracing::debug!(nickname = %friend.nickname, "location request refused");
            return Err(Error::NotAvailable);
        }
        self.engine.send(Input::LocationRequested(friend.id));
        self.engine.send(Input::PeerInteraction);
        Ok(())
    }

    async fn push(&self, certificate: &str, body: Body) -> Result<(), Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;

        // Friends that got new data through this push and should be
        // pulled from (or nudged) after the stream is consumed.
        let mut need_pull: HashSet<FriendId> = HashSet::new();
        let mut source = codec::Source::<_, Payload>::new(body);
        loop {
            // A malformed or invalid item rejects the request; items
            // already stored from the same stream are retained.
            let payload = match source.next().await? {
                Some(payload) => payload,
                None => break,
            };
            payload.validate()?;

            match payload {
                Payload::Group(group) => {
                    let members = group.members.clone();
                    self.store
                        .put_pushed_group(&friend.id, group)
                        .await
                        .map_err(Error::Store)?;
                    for member in members {
                        if let Ok(Some(_)) = self.store.friend(&member).await {
                            need_pull.insert(member);
                        }
                    }
                },
                Payload::Location(location) => {
                    self.store
                        .put_pushed_location(&friend.id, location)
                        .await
                        .map_err(Error::Store)?;
                },
                Payload::Post(post) => {
                    let new = self
                        .store
                        .put_pushed_post(&friend.id, post)
                        .await
                        .map_err(Error::Store)?;
                    if new {
                        need_pull.insert(friend.id.clone());
                    }
                },
            }
        }

        for member in need_pull {
            self.engine.trigger(TaskKind::PullFrom, member);
        }
        self.engine.send(Input::PeerInteraction);
        Ok(())
    }

    async fn pull(&self, certificate: &str, request: Bytes) -> Result<Body, Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;

        let request: PullRequest =
            serde_json::from_slice(&request).map_err(|e| Error::Codec(codec::Error::Json(e)))?;
        self.store
            .confirm_pulled_up_to(&friend.id, &request)
            .await
            .map_err(Error::Store)?;
        if request.reciprocal {
            self.engine.trigger(TaskKind::PullFrom, friend.id.clone());
        }

        let items = self
            .store
            .pull_response(&friend.id, &request)
            .await
            .map_err(Error::Store)?;
        self.engine.send(Input::PeerInteraction);

        let nickname = friend.nickname;
        let body = async_stream::stream! {
            for item in items {
                match item {
                    Ok(payload) => match codec::encode(&payload) {
                        Ok(bytes) => yield Ok(bytes),
                        Err(e) => {
                            tracing::warn!(nickname = %nickname, err = %e, "unencodable pull item");
                            yield Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
                            break;
                        },
                    },
                    Err(e) => {
                        tracing::warn!(nickname = %nickname, err = %e, "pull iteration failed");
                        yield Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                        break;
                    },
                }
            }
        };
        Ok(Box::pin(body))
    }

    async fn download(
        &self,
        certificate: &str,
        resource: &ResourceId,
        offset: u64,
    ) -> Result<DownloadStream, Error> {
        let _permit = self.pool.permit().await.map_err(|_| Error::Closed)?;
        let friend = self.authenticate(certificate).await?;

        // The store enforces access control: only resources attached to
        // posts shared with this friend resolve.
        let resource = self
            .store
            .local_resource(&friend.id, resource)
            .await
            .map_err(Error::Store)?
            .ok_or(Error::NotAvailable)?;
        if self.prefs.flag(keys::EXCHANGE_FILES_WIFI_ONLY) && !self.network.is_wifi() {
            return Err(Error::NotAvailable);
        }

        let mut file = tokio::fs::File::open(&resource.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        self.engine.send(Input::PeerInteraction);

        let body = async_stream::stream! {
            let mut buf = [0u8; 8192];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        yield Err(e);
                        break;
                    },
                }
            }
        };
        Ok(DownloadStream {
            mime: resource.mime,
            length: resource.size.saturating_sub(offset),
            body: Box::pin(body),
        })
    }
}
