// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! The five per-friend task bodies.
//!
//! Every body shares the same shape: abort silently when the circuit is
//! down or the friend is gone, log transient failures with the friend
//! nickname and end, and never panic or propagate. The [`run`] wrapper
//! reports completion back into the router on every exit path.

use std::sync::Arc;

use futures::StreamExt as _;
use parking_lot::Mutex;
use tokio::{
    fs,
    io::AsyncWriteExt as _,
    sync::{broadcast, mpsc},
};

use crate::{
    config::{keys, Preferences},
    data::{Download, DownloadState, Friend, FriendId},
    engine::Event,
    store::Store,
    transport::{clients, NetworkState, Request, Status, Supervisor},
    wire::{self, codec, Payload, PullRequest},
};

use super::run_state::{Input, RunState, TaskKind, TaskOutcome};

/// Everything a task body needs. One context exists per session; bodies
/// share it through an [`Arc`].
pub(crate) struct Context<S> {
    pub store: Arc<S>,
    pub transport: Arc<Supervisor>,
    pub prefs: Arc<dyn Preferences>,
    pub network: Arc<dyn NetworkState>,
    pub queue: QueueHandle,
    pub inputs: mpsc::UnboundedSender<Input>,
    pub subscribers: broadcast::Sender<Event>,
}

/// Narrow view onto the engine state for the push drain loop. The lock is
/// held only for the queue operation itself, never across I/O.
pub(crate) struct QueueHandle {
    state: Arc<Mutex<RunState>>,
}

impl QueueHandle {
    pub fn new(state: Arc<Mutex<RunState>>) -> Self {
        Self { state }
    }

    fn dequeue(&self, friend: &FriendId) -> Option<Payload> {
        self.state.lock().dequeue_push(friend)
    }

    fn requeue_front(&self, friend: &FriendId, payload: Payload) {
        self.state.lock().requeue_push(friend, payload)
    }
}

/// Run one task body and report its completion, whatever happens.
pub(crate) async fn run<S: Store>(ctx: Arc<Context<S>>, kind: TaskKind, friend: FriendId) {
    let outcome = match kind {
        TaskKind::AskPull => ask(&ctx, &friend, wire::ASK_PULL_PATH).await,
        TaskKind::AskLocation => ask(&ctx, &friend, wire::ASK_LOCATION_PATH).await,
        TaskKind::PushTo => push_to(&ctx, &friend).await,
        TaskKind::PullFrom => pull_from(&ctx, &friend).await,
        TaskKind::DownloadFrom => download_from(&ctx, &friend).await,
    };
    tracing::debug!(%kind, %friend, ?outcome, "task finished");
    ctx.inputs
        .send(Input::Completed {
            kind,
            friend,
            outcome,
        })
        .ok();
}

/// Common preamble: bail out without noise when the circuit is not
/// established or the friend was removed while the task was queued.
async fn preamble<S: Store>(
    ctx: &Context<S>,
    friend: &FriendId,
) -> Option<(Friend, clients::Clients)> {
    if !ctx.transport.is_circuit_established() {
        return None;
    }
    let clients = ctx.transport.clients()?;
    match ctx.store.friend(friend).await {
        Ok(Some(friend)) => Some((friend, clients)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(%friend, err = %e, "friend lookup failed");
            None
        },
    }
}

async fn ask<S: Store>(ctx: &Context<S>, id: &FriendId, path: &'static str) -> TaskOutcome {
    let Some((friend, pool)) = preamble(ctx, id).await else {
        return TaskOutcome::Skipped;
    };
    let client = match clients::checkout(&pool).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(nickname = %friend.nickname, err = %e, "no client connection");
            return TaskOutcome::Failed;
        },
    };

    match client.request(Request::get(&friend.hostname, path)).await {
        Ok(response) => match response.status {
            Status::Ok => TaskOutcome::Done,
            Status::NotAvailable => {
                tracing::debug!(nickname = %friend.nickname, path, "peer declined");
                TaskOutcome::Skipped
            },
            Status::Failed(code) => {
                tracing::warn!(nickname = %friend.nickname, path, code, "peer rejected the ask");
                TaskOutcome::Failed
            },
        },
        Err(e) => {
            tracing::warn!(nickname = %friend.nickname, path, err = %e, "ask failed");
            TaskOutcome::Failed
        },
    }
}

/// Drain the friend's push queue, one PUT per payload, confirming
/// delivery of groups and posts so the store advances its per-recipient
/// sequence counters.
async fn push_to<S: Store>(ctx: &Context<S>, id: &FriendId) -> TaskOutcome {
    let Some((friend, pool)) = preamble(ctx, id).await else {
        return TaskOutcome::Skipped;
    };
    let client = match clients::checkout(&pool).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(nickname = %friend.nickname, err = %e, "no client connection");
            return TaskOutcome::Failed;
        },
    };

    let mut delivered = false;
    while let Some(payload) = ctx.queue.dequeue(id) {
        let body = match codec::encode(&payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "dropping unencodable payload");
                continue;
            },
        };
        match client
            .request(Request::put(&friend.hostname, wire::PUSH_PATH, body))
            .await
        {
            Ok(response) if response.status == Status::Ok => {
                if matches!(payload, Payload::Group(_) | Payload::Post(_)) {
                    if let Err(e) = ctx.store.confirm_sent_to(id, &payload).await {
                        tracing::warn!(nickname = %friend.nickname, err = %e, "confirm-sent failed");
                    }
                }
                delivered = true;
                ctx.subscribers
                    .send(Event::PushDelivered { friend: id.clone() })
                    .ok();
            },
            Ok(response) => {
                tracing::warn!(nickname = %friend.nickname, status = ?response.status, "push rejected");
                ctx.queue.requeue_front(id, payload);
                return TaskOutcome::Failed;
            },
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "push failed");
                ctx.queue.requeue_front(id, payload);
                return TaskOutcome::Failed;
            },
        }
    }

    if delivered {
        TaskOutcome::Done
    } else {
        TaskOutcome::Skipped
    }
}

/// Two consecutive pulls: the first collects new items, the second
/// acknowledges receipt through updated sequence numbers and picks up
/// late items.
async fn pull_from<S: Store>(ctx: &Context<S>, id: &FriendId) -> TaskOutcome {
    let Some((friend, pool)) = preamble(ctx, id).await else {
        return TaskOutcome::Skipped;
    };
    let client = match clients::checkout(&pool).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(nickname = %friend.nickname, err = %e, "no client connection");
            return TaskOutcome::Failed;
        },
    };

    for _pass in 0..2 {
        let request = match ctx.store.pull_request(id).await {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "no pull request");
                return TaskOutcome::Failed;
            },
        };
        let body = match codec::encode(&request) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "unencodable pull request");
                return TaskOutcome::Failed;
            },
        };
        let response = match client
            .request(Request::put(&friend.hostname, wire::PULL_PATH, body))
            .await
        {
            Ok(response) if response.status == Status::Ok => response,
            Ok(response) => {
                tracing::warn!(nickname = %friend.nickname, status = ?response.status, "pull rejected");
                return TaskOutcome::Failed;
            },
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "pull failed");
                return TaskOutcome::Failed;
            },
        };
        if let Err(outcome) = consume_pull_response(ctx, id, &friend, request, response).await {
            return outcome;
        }
    }

    ctx.subscribers
        .send(Event::PullCompleted { friend: id.clone() })
        .ok();
    TaskOutcome::Done
}

/// Accumulate the response stream into per-transaction chunks. The first
/// commit carries the pull request so the store applies the
/// acknowledgment exactly once; every later commit passes `None`.
async fn consume_pull_response<S: Store>(
    ctx: &Context<S>,
    id: &FriendId,
    friend: &Friend,
    request: PullRequest,
    response: crate::transport::Response,
) -> Result<(), TaskOutcome> {
    let mut source = codec::Source::<_, Payload>::new(response.body);
    let mut pending = Some(request);
    let mut groups = Vec::new();
    let mut posts = Vec::new();
    let max = ctx.store.max_pull_transaction_objects();

    loop {
        let payload = match source.next().await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "malformed pull response");
                return Err(TaskOutcome::Failed);
            },
        };
        if let Err(e) = payload.validate() {
            tracing::warn!(nickname = %friend.nickname, err = %e, "invalid item in pull response");
            return Err(TaskOutcome::Failed);
        }
        match payload {
            Payload::Group(group) => groups.push(group),
            Payload::Post(post) => posts.push(post),
            Payload::Location(_) => {
                tracing::warn!(nickname = %friend.nickname, "location in pull response");
                return Err(TaskOutcome::Failed);
            },
        }

        if groups.len() + posts.len() >= max {
            if let Err(e) = ctx
                .store
                .put_pull_response(
                    id,
                    pending.take(),
                    std::mem::take(&mut groups),
                    std::mem::take(&mut posts),
                )
                .await
            {
                tracing::warn!(nickname = %friend.nickname, err = %e, "pull commit failed");
                return Err(TaskOutcome::Failed);
            }
        }
    }

    if pending.is_some() || !groups.is_empty() || !posts.is_empty() {
        if let Err(e) = ctx
            .store
            .put_pull_response(id, pending.take(), groups, posts)
            .await
        {
            tracing::warn!(nickname = %friend.nickname, err = %e, "final pull commit failed");
            return Err(TaskOutcome::Failed);
        }
    }
    Ok(())
}

/// Resume and finish every in-progress download from this friend inside a
/// single slot occupation.
async fn download_from<S: Store>(ctx: &Context<S>, id: &FriendId) -> TaskOutcome {
    let Some((friend, pool)) = preamble(ctx, id).await else {
        return TaskOutcome::Skipped;
    };
    if ctx.prefs.flag(keys::EXCHANGE_FILES_WIFI_ONLY) && !ctx.network.is_wifi() {
        // The periodic tick retries once the network changes.
        return TaskOutcome::Skipped;
    }
    let client = match clients::checkout(&pool).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(nickname = %friend.nickname, err = %e, "no client connection");
            return TaskOutcome::Failed;
        },
    };

    let mut fetched = false;
    loop {
        let download = match ctx.store.next_in_progress_download(id).await {
            Ok(Some(download)) => download,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "download lookup failed");
                return TaskOutcome::Failed;
            },
        };

        let have = fs::metadata(&download.path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if have >= download.expected_size {
            // The fetch finished earlier but the completion bit was lost.
            if mark_complete(ctx, id, &download).await.is_err() {
                return TaskOutcome::Failed;
            }
            fetched = true;
            continue;
        }

        let request = Request::get(&friend.hostname, wire::DOWNLOAD_PATH)
            .query(wire::RESOURCE_ID_PARAM, download.resource_id.to_string())
            .range(have);
        let response = match client.request(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "download request failed");
                return TaskOutcome::Failed;
            },
        };
        let mut body = match response.status {
            Status::Ok => response.body,
            Status::NotAvailable => {
                tracing::debug!(nickname = %friend.nickname, "peer is not serving files now");
                return if fetched {
                    TaskOutcome::Done
                } else {
                    TaskOutcome::Skipped
                };
            },
            Status::Failed(code) => {
                tracing::warn!(nickname = %friend.nickname, code, "download rejected");
                return TaskOutcome::Failed;
            },
        };

        let mut file = match fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&download.path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(nickname = %friend.nickname, err = %e, "cannot open download file");
                return TaskOutcome::Failed;
            },
        };

        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        tracing::warn!(nickname = %friend.nickname, err = %e, "download write failed");
                        return TaskOutcome::Failed;
                    }
                    written += bytes.len() as u64;
                },
                Err(e) => {
                    tracing::warn!(nickname = %friend.nickname, err = %e, "download stream failed");
                    return TaskOutcome::Failed;
                },
            }
        }
        if let Err(e) = file.flush().await {
            tracing::warn!(nickname = %friend.nickname, err = %e, "download flush failed");
            return TaskOutcome::Failed;
        }

        if have + written >= download.expected_size {
            if mark_complete(ctx, id, &download).await.is_err() {
                return TaskOutcome::Failed;
            }
            fetched = true;
        } else {
            // Short read; the partial bytes stay on disk and the next
            // occasion resumes from the new offset.
            tracing::debug!(
                nickname = %friend.nickname,
                resource = %download.resource_id,
                have = have + written,
                expected = download.expected_size,
                "short download"
            );
            return if fetched {
                TaskOutcome::Done
            } else {
                TaskOutcome::Failed
            };
        }
    }

    if fetched {
        TaskOutcome::Done
    } else {
        TaskOutcome::Skipped
    }
}

async fn mark_complete<S: Store>(
    ctx: &Context<S>,
    id: &FriendId,
    download: &Download,
) -> Result<(), ()> {
    match ctx
        .store
        .update_download_state(id, &download.resource_id, DownloadState::Complete)
        .await
    {
        Ok(()) => {
            ctx.subscribers
                .send(Event::DownloadCompleted {
                    friend: id.clone(),
                    resource: download.resource_id.clone(),
                })
                .ok();
            Ok(())
        },
        Err(e) => {
            tracing::warn!(err = %e, resource = %download.resource_id, "state update failed");
            Err(())
        },
    }
}
