// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Periodic task scheduler.
//!
//! Every timer a component owns lives in one [`Scheduler`], so tearing the
//! component down is a single [`Scheduler::cancel_all`]. Each tick spawns
//! its own task: a slow run never delays or blocks the next one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a running timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
pub struct Scheduler {
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `every`, first after one full period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, name: &str, every: Duration, task: F) -> TimerId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let every = every.max(Duration::from_millis(1));
        let name = name.to_string();
        tracing::debug!("timer started: {} every {}ms", name, every.as_millis());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tokio::spawn(task());
            }
        });
        self.lock().insert(id, handle);
        id
    }

    /// Stop one timer. Runs already in flight finish on their own.
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.lock().remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let timers: Vec<_> = self.lock().drain().collect();
        if !timers.is_empty() {
            tracing::debug!("cancelled {} timer(s)", timers.len());
        }
        for (_, handle) in timers {
            handle.abort();
        }
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerId, JoinHandle<()>>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
