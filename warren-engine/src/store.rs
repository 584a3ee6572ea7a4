// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Contract of the durable data store.
//!
//! The store is an external collaborator: it owns the schema and the
//! per-recipient sequence bookkeeping, and is internally thread-safe. The
//! engine only ever talks to it through this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    data::{
        Download, DownloadState, Friend, FriendId, Group, GroupId, LocalResource, Location, Post,
        PostId, ResourceId, SelfIdentity,
    },
    wire::{Payload, PullRequest},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("self identity is not initialised")]
    NoSelf,
    #[error("unknown friend {0}")]
    UnknownFriend(FriendId),
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),
    #[error("unknown post {0}")]
    UnknownPost(PostId),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

/// Items streamed back to a pulling peer, in sequence order.
pub type PullResponseIter = Box<dyn Iterator<Item = Result<Payload, Error>> + Send>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn self_identity(&self) -> Result<SelfIdentity, Error>;
    async fn friends(&self) -> Result<Vec<Friend>, Error>;
    async fn friend(&self, id: &FriendId) -> Result<Option<Friend>, Error>;
    async fn friend_by_certificate(&self, certificate: &str) -> Result<Option<Friend>, Error>;

    async fn group(&self, id: &GroupId) -> Result<Group, Error>;
    async fn post(&self, id: &PostId) -> Result<Post, Error>;
    async fn self_location(&self) -> Result<Option<Location>, Error>;
    async fn put_self_location(&self, location: Location) -> Result<(), Error>;

    async fn put_pushed_group(&self, from: &FriendId, group: Group) -> Result<(), Error>;
    async fn put_pushed_location(&self, from: &FriendId, location: Location) -> Result<(), Error>;
    /// Returns true iff the post was newly accepted.
    async fn put_pushed_post(&self, from: &FriendId, post: Post) -> Result<bool, Error>;

    /// The cursor to send to `friend` when pulling.
    async fn pull_request(&self, friend: &FriendId) -> Result<PullRequest, Error>;
    /// Commit one transaction of pulled items. `request` is present on the
    /// first commit of a response only, so acknowledgments are applied
    /// once.
    async fn put_pull_response(
        &self,
        friend: &FriendId,
        request: Option<PullRequest>,
        groups: Vec<Group>,
        posts: Vec<Post>,
    ) -> Result<(), Error>;
    /// Items to stream back to a pulling peer, given their cursor.
    async fn pull_response(
        &self,
        friend: &FriendId,
        request: &PullRequest,
    ) -> Result<PullResponseIter, Error>;

    /// Advance the per-recipient sequence counter after `payload` was
    /// delivered to `friend`.
    async fn confirm_sent_to(&self, friend: &FriendId, payload: &Payload) -> Result<(), Error>;
    /// Apply the acknowledgment carried by a peer's pull cursor.
    async fn confirm_pulled_up_to(
        &self,
        friend: &FriendId,
        request: &PullRequest,
    ) -> Result<(), Error>;

    async fn next_in_progress_download(
        &self,
        friend: &FriendId,
    ) -> Result<Option<Download>, Error>;
    async fn update_download_state(
        &self,
        friend: &FriendId,
        resource: &ResourceId,
        state: DownloadState,
    ) -> Result<(), Error>;
    /// Resolve a resource `friend` is entitled to download, or `None`.
    async fn local_resource(
        &self,
        friend: &FriendId,
        resource: &ResourceId,
    ) -> Result<Option<LocalResource>, Error>;

    async fn update_friend_sent(
        &self,
        friend: &FriendId,
        at: DateTime<Utc>,
        bytes: u64,
    ) -> Result<(), Error>;
    async fn update_friend_received(
        &self,
        friend: &FriendId,
        at: DateTime<Utc>,
        bytes: u64,
    ) -> Result<(), Error>;

    /// Upper bound on objects committed per pull transaction.
    fn max_pull_transaction_objects(&self) -> usize;
}
