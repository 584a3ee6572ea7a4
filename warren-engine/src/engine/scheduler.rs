// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Single-shot deadline service.
//!
//! One task owns a priority queue of deadlines; expirations are fed back
//! into the engine as [`Input::Timer`]s. Equal deadlines fire in the
//! order they were armed. The service and every armed deadline die with
//! the session that owns them.

use std::{cmp::Ordering, collections::BinaryHeap, time::Duration};

use tokio::{sync::mpsc, time::Instant};
use warren_async::{Spawner, Task};

use super::run_state::{Input, Timer};

pub struct Scheduler {
    requests: mpsc::UnboundedSender<(Timer, Duration)>,
    _service: Task<()>,
}

impl Scheduler {
    pub fn spawn(spawner: &Spawner, inputs: mpsc::UnboundedSender<Input>) -> Self {
        let (requests, inbox) = mpsc::unbounded_channel();
        let service = spawner.spawn(run(inbox, inputs));
        Self {
            requests,
            _service: service,
        }
    }

    /// Arm a single-shot deadline `after` from now.
    pub fn arm(&self, timer: Timer, after: Duration) {
        self.requests.send((timer, after)).ok();
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    timer: Timer,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed, so the `BinaryHeap` yields the earliest deadline first,
    // ties broken by arming order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

async fn run(
    mut requests: mpsc::UnboundedReceiver<(Timer, Duration)>,
    inputs: mpsc::UnboundedSender<Input>,
) {
    let mut pending: BinaryHeap<Entry> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let due = pending.peek().map(|entry| entry.due);
        tokio::select! {
            request = requests.recv() => match request {
                Some((timer, after)) => {
                    seq += 1;
                    pending.push(Entry {
                        due: Instant::now() + after,
                        seq,
                        timer,
                    });
                },
                None => break,
            },
            () = expire(due) => {
                if let Some(Entry { timer, .. }) = pending.pop() {
                    if inputs.send(Input::Timer(timer)).is_err() {
                        break;
                    }
                }
            },
        }
    }
}

async fn expire(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::run_state::WatchdogKind;

    fn watchdog(generation: u64) -> Timer {
        Timer::Watchdog {
            kind: WatchdogKind::NotConnected,
            generation,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let spawner = Spawner::from_current().expect("runtime");
        let (inputs, mut fired) = mpsc::unbounded_channel();
        let scheduler = Scheduler::spawn(&spawner, inputs);

        scheduler.arm(watchdog(2), Duration::from_secs(20));
        scheduler.arm(watchdog(1), Duration::from_secs(10));

        assert!(matches!(
            fired.recv().await,
            Some(Input::Timer(Timer::Watchdog { generation: 1, .. }))
        ));
        assert!(matches!(
            fired.recv().await,
            Some(Input::Timer(Timer::Watchdog { generation: 2, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn equal_deadlines_fire_in_arming_order() {
        let spawner = Spawner::from_current().expect("runtime");
        let (inputs, mut fired) = mpsc::unbounded_channel();
        let scheduler = Scheduler::spawn(&spawner, inputs);

        for generation in 1..=3 {
            scheduler.arm(watchdog(generation), Duration::from_secs(5));
        }

        for expected in 1..=3 {
            assert!(matches!(
                fired.recv().await,
                Some(Input::Timer(Timer::Watchdog { generation, .. })) if generation == expected
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_scheduler_cancels_deadlines() {
        let spawner = Spawner::from_current().expect("runtime");
        let (inputs, mut fired) = mpsc::unbounded_channel();
        let scheduler = Scheduler::spawn(&spawner, inputs);

        scheduler.arm(watchdog(1), Duration::from_secs(5));
        drop(scheduler);

        assert!(fired.recv().await.is_none());
    }
}
