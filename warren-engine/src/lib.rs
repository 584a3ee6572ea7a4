// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! The warren engine: the long-running background coordinator of a
//! peer-to-peer social messaging application.
//!
//! The engine owns the sharing lifecycle, schedules per-friend
//! synchronization tasks, mediates the push/pull/download protocols over a
//! mutually authenticated HTTPS transport tunneled through an onion-routed
//! hidden service, and keeps the local store consistent with peer state
//! under network faults and churn.
//!
//! External collaborators -- the durable store, the onion-router wrapper,
//! the HTTPS server and client transports, the location provider, the
//! preferences view -- are expressed as traits and threaded through
//! [`Engine::new`]; there is no module-level state.

#![warn(clippy::all, unused_import_braces, unused_qualifications)]

pub mod config;
pub mod data;
pub mod engine;
pub mod server;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::{Preferences, RunConfig};
pub use engine::{Engine, Event, Handle, LocationProvider, Transports};
