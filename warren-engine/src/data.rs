// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! The entities the engine ships between friends.

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a group or nickname string accepted from a peer.
const MAX_NAME_LEN: usize = 256;
/// Upper bound on the content of a single post accepted from a peer.
const MAX_CONTENT_LEN: usize = 64 * 1024;
/// Upper bound on the member list of a group accepted from a peer.
const MAX_GROUP_MEMBERS: usize = 256;

macro_rules! id {
    ($name:ident) => {
        #[derive(
            Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id!(FriendId);
id!(GroupId);
id!(PostId);
id!(ResourceId);

/// A peer whose public identity is stored locally and who may connect to
/// us and be connected to by us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Friend {
    pub id: FriendId,
    pub nickname: String,
    /// PEM-encoded X.509 certificate presented by this peer.
    pub certificate: String,
    /// Hidden-service hostname this peer is reachable at.
    pub hostname: String,
    /// Authorization cookie for this peer's hidden service.
    pub auth_cookie: String,
}

/// The local identity: key material for the server side of the transport
/// and for the hidden service.
#[derive(Clone, Debug)]
pub struct SelfIdentity {
    pub nickname: String,
    pub certificate: String,
    pub private_key: String,
    pub hidden_service_key: String,
    pub hostname: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<FriendId>,
    pub sequence: u64,
    pub modified: DateTime<Utc>,
}

impl Group {
    pub fn validate(&self) -> Result<(), Invalid> {
        if self.id.as_str().is_empty() {
            return Err(Invalid::EmptyId("group"));
        }
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(Invalid::Oversized("group name"));
        }
        if self.members.len() > MAX_GROUP_MEMBERS {
            return Err(Invalid::Oversized("group members"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub group: GroupId,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Resource>,
    pub sequence: u64,
    pub created: DateTime<Utc>,
}

impl Post {
    pub fn validate(&self) -> Result<(), Invalid> {
        if self.id.as_str().is_empty() || self.group.as_str().is_empty() {
            return Err(Invalid::EmptyId("post"));
        }
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(Invalid::Oversized("post content"));
        }
        for attachment in &self.attachments {
            if attachment.id.as_str().is_empty() {
                return Err(Invalid::EmptyId("attachment"));
            }
        }
        Ok(())
    }
}

/// A file attached to a post, downloadable from its author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub size: u64,
    pub mime: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
}

impl Location {
    pub fn validate(&self) -> Result<(), Invalid> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Invalid::Coordinate);
        }
        Ok(())
    }
}

/// A resource transfer we have started but not finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Download {
    pub resource_id: ResourceId,
    /// Where the partially-downloaded bytes live on disk.
    pub path: PathBuf,
    pub expected_size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadState {
    InProgress,
    Complete,
}

/// A locally-stored resource a friend is entitled to download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalResource {
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
}

/// A payload received from a peer failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Invalid {
    #[error("empty {0} identifier")]
    EmptyId(&'static str),
    #[error("{0} exceeds the accepted size")]
    Oversized(&'static str),
    #[error("coordinate out of range")]
    Coordinate,
}

#[cfg(test)]
mod test {
    use super::*;

    fn group() -> Group {
        Group {
            id: GroupId::from("g1"),
            name: "hiking".to_string(),
            members: vec![FriendId::from("f1")],
            sequence: 1,
            modified: Utc::now(),
        }
    }

    #[test]
    fn group_validation() {
        assert_eq!(group().validate(), Ok(()));

        let mut nameless = group();
        nameless.name.clear();
        assert_eq!(nameless.validate(), Err(Invalid::Oversized("group name")));

        let mut anonymous = group();
        anonymous.id = GroupId::from("");
        assert_eq!(anonymous.validate(), Err(Invalid::EmptyId("group")));
    }

    #[test]
    fn location_validation() {
        let mut location = Location {
            latitude: 52.52,
            longitude: 13.405,
            timestamp: Utc::now(),
            street_address: None,
        };
        assert_eq!(location.validate(), Ok(()));
        location.latitude = 91.0;
        assert_eq!(location.validate(), Err(Invalid::Coordinate));
    }
}
