// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

use std::{future::Future, sync::Arc};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{Spawner, Task};

/// A fixed-size worker pool.
///
/// At most `size` bodies spawned through [`Pool::spawn`] run at any one
/// time; excess bodies wait for a permit before they start. Work driven by
/// callers outside the pool can participate in the same limit through
/// [`Pool::permit`].
#[derive(Clone)]
pub struct Pool {
    spawner: Spawner,
    permits: Arc<Semaphore>,
    size: usize,
}

#[derive(Debug, Error)]
#[error("worker pool closed")]
pub struct Closed;

/// Proof of admission handed out by [`Pool::permit`]. Dropping it frees
/// the seat.
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

impl Pool {
    pub fn new(spawner: Spawner, size: usize) -> Self {
        Self {
            spawner,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn `body` onto the pool.
    ///
    /// The body starts once a permit is free and holds it until it
    /// returns. If the pool is closed while the body is still waiting, it
    /// never runs.
    pub fn spawn<T>(&self, body: T) -> Task<()>
    where
        T: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.spawner.spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                body.await
            }
        })
    }

    /// Wait for a seat in the pool, for work executed on a foreign task
    /// (eg. a request handler invoked by the server).
    pub async fn permit(&self) -> Result<Permit, Closed> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map(|inner| Permit { _inner: inner })
            .map_err(|_| Closed)
    }

    /// Close the pool: queued bodies are discarded and new admissions are
    /// refused. Bodies already running are not interrupted.
    pub fn close(&self) {
        self.permits.close()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    use super::*;

    #[tokio::test]
    async fn bounds_concurrency() {
        let spawner = Spawner::from_current().expect("runtime");
        let pool = Pool::new(spawner, 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.push(pool.spawn(async move {
                let now = running.fetch_add(1, SeqCst) + 1;
                peak.fetch_max(now, SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                running.fetch_sub(1, SeqCst);
            }));
        }
        for task in tasks {
            task.await.expect("task failed");
        }

        assert!(peak.load(SeqCst) <= 2, "peak was {}", peak.load(SeqCst));
    }

    #[tokio::test]
    async fn closed_pool_refuses_permits() {
        let spawner = Spawner::from_current().expect("runtime");
        let pool = Pool::new(spawner, 1);
        pool.close();
        assert!(pool.permit().await.is_err());
    }
}
