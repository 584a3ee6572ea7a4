// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Reusable pool of client connections, parametrized by the onion
//! router's SOCKS port.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool::managed::{Manager, Object, Pool, PoolError, RecycleResult};

use super::{Client, ClientFactory, Error};

pub type Clients = Pool<Box<dyn Client>, Error>;
pub type Pooled = Object<Box<dyn Client>, Error>;

pub struct ClientManager {
    factory: Arc<dyn ClientFactory>,
    socks_port: u16,
}

impl ClientManager {
    pub fn new(factory: Arc<dyn ClientFactory>, socks_port: u16) -> Self {
        Self {
            factory,
            socks_port,
        }
    }
}

#[async_trait]
impl Manager<Box<dyn Client>, Error> for ClientManager {
    async fn create(&self) -> Result<Box<dyn Client>, Error> {
        self.factory.connect(self.socks_port).await
    }

    async fn recycle(&self, _: &mut Box<dyn Client>) -> RecycleResult<Error> {
        Ok(())
    }
}

/// Check a connection out of the pool.
pub async fn checkout(pool: &Clients) -> Result<Pooled, Error> {
    pool.get().await.map_err(|e| match e {
        PoolError::Backend(e) => e,
        PoolError::Timeout(_) => Error::Pool,
    })
}
