// Copyright 2026 Geolens Contributors
// SPDX-License-Identifier: Apache-2.0

//! Online/offline signal.
//!
//! The host platform (or the optional HTTP probe) pushes transitions with
//! [`Connectivity::set_online`]; interested parties watch the channel.

use std::sync::Arc;

use tokio::sync::watch;

use crate::http::HttpClient;

#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state. Returns `true` when it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(
                "connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Probe `url` and record the outcome.
    pub async fn probe(&self, client: &HttpClient, url: &str) -> bool {
        let online = client.probe(url).await;
        self.set_online(online);
        online
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_notify_watchers() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        assert!(!connectivity.set_online(false));
        assert!(connectivity.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_probe_unreachable_goes_offline() {
        let connectivity = Connectivity::new(true);
        let client = HttpClient::new(500, 0).unwrap();
        // nothing listens on port 1
        let online = connectivity.probe(&client, "http://127.0.0.1:1/").await;
        assert!(!online);
        assert!(!connectivity.is_online());
    }
}
