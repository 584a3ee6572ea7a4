// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! The wire protocol spoken between friends: well-known paths, the
//! payload sum type, and the pull cursor.

use serde::{Deserialize, Serialize};

use crate::data::{Group, Invalid, Location, Post};

pub mod codec;

/// Out-of-band nudge asking the peer to initiate a pull against us.
pub const ASK_PULL_PATH: &str = "/ask-pull";
/// Ask the peer for a location fix; the peer may decline.
pub const ASK_LOCATION_PATH: &str = "/ask-location";
/// Receives a stream of payloads pushed by the peer.
pub const PUSH_PATH: &str = "/push";
/// Receives a [`PullRequest`], answers with a payload stream.
pub const PULL_PATH: &str = "/pull";
/// Serves resource bytes, addressed by [`RESOURCE_ID_PARAM`] and ranged.
pub const DOWNLOAD_PATH: &str = "/download";

pub const RESOURCE_ID_PARAM: &str = "resourceId";

/// One tagged unit of syncable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Payload {
    Group(Group),
    Post(Post),
    Location(Location),
}

impl Payload {
    pub fn validate(&self) -> Result<(), Invalid> {
        match self {
            Self::Group(group) => group.validate(),
            Self::Post(post) => post.validate(),
            Self::Location(location) => location.validate(),
        }
    }
}

/// A per-friend cursor describing what the local node has already
/// received. Sent by the puller so the peer responds with only newer
/// items and treats the cursor as an acknowledgment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub last_group_sequence: u64,
    pub last_post_sequence: u64,
    /// Set when the puller wants the peer to pull from us in return.
    #[serde(default)]
    pub reciprocal: bool,
}
