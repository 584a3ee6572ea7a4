// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Runtime utilities shared by the warren workspace: a [`Spawner`] wrapping
//! the ambient async runtime, abort-on-drop [`Task`] handles, and a
//! fixed-size worker [`Pool`].

mod pool;
pub use pool::{Closed, Permit, Pool};

mod spawn;
pub use spawn::{JoinError, Spawner, Task};
