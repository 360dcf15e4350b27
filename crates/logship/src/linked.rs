// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Linked log sessions.
//!
//! A session can be linked to any number of peer sessions (a client linked to
//! its server, a server to every connected client). The full set is re-sent to
//! the collector as a [`MetadataDocument`] after every change.
//!
//! Documents go through a single sync worker fed by a `watch` channel: sends
//! never overlap, a document superseded while the previous send is in flight
//! is skipped, and the last document sent is always the current state.

use crate::error::Result;
use crate::session::SessionClient;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error};

/// One entry of the `additional_metadata` list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

/// Body of a metadata sync request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetadataDocument {
    /// Linked session ids, sorted.
    pub log_links: Vec<String>,
    pub additional_metadata: Vec<MetadataEntry>,
}

/// Destination for metadata syncs.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn sync_metadata(&self, document: &MetadataDocument) -> Result<Option<Value>>;
}

#[derive(Default)]
struct RegistryState {
    links: BTreeMap<String, String>,
    additional: BTreeMap<String, String>,
    /// connection id -> session id announced over that connection
    peers: HashMap<String, String>,
}

impl RegistryState {
    fn document(&self) -> MetadataDocument {
        MetadataDocument {
            log_links: self.links.keys().cloned().collect(),
            additional_metadata: self
                .additional
                .iter()
                .map(|(key, value)| MetadataEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

pub struct LinkedSessionRegistry {
    session: Arc<SessionClient>,
    sink: Arc<dyn MetadataSink>,
    sync_empty_links: bool,
    state: Mutex<RegistryState>,
    /// Latest document waiting for the sync worker.
    outbox: watch::Sender<Option<MetadataDocument>>,
    worker_started: AtomicBool,
}

impl LinkedSessionRegistry {
    #[must_use]
    pub fn new(
        session: Arc<SessionClient>,
        sink: Arc<dyn MetadataSink>,
        sync_empty_links: bool,
    ) -> Self {
        let (outbox, _) = watch::channel(None);
        Self {
            session,
            sink,
            sync_empty_links,
            state: Mutex::new(RegistryState::default()),
            outbox,
            worker_started: AtomicBool::new(false),
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("lock poisoned")
    }

    fn is_self(&self, session_id: &str) -> bool {
        session_id == self.session.session_id()
    }

    /// Links `session_id` with a human-readable description.
    ///
    /// Returns false for an empty id, this session's own id, or an id that is
    /// already linked; the stored description is never overwritten.
    pub fn register(&self, session_id: &str, description: &str) -> bool {
        if session_id.is_empty() || self.is_self(session_id) {
            debug!("LOGSHIP | Refusing to link session '{session_id}'");
            return false;
        }

        let document = {
            let mut state = self.lock();
            if state.links.contains_key(session_id) {
                return false;
            }
            state
                .links
                .insert(session_id.to_string(), description.to_string());
            state.document()
        };

        debug!("LOGSHIP | Linked session {session_id} ({description})");
        self.sync(document);
        true
    }

    /// Removes a link. Returns false for this session's own id or an unknown id.
    pub fn unregister(&self, session_id: &str) -> bool {
        if self.is_self(session_id) {
            return false;
        }

        let document = {
            let mut state = self.lock();
            if state.links.remove(session_id).is_none() {
                return false;
            }
            state.document()
        };

        debug!("LOGSHIP | Unlinked session {session_id}");
        self.sync_after_removal(document);
        true
    }

    pub fn set_additional_metadata(&self, key: &str, value: &str) {
        let document = {
            let mut state = self.lock();
            state.additional.insert(key.to_string(), value.to_string());
            state.document()
        };
        self.sync(document);
    }

    /// Snapshot of linked session ids and their descriptions.
    #[must_use]
    pub fn links(&self) -> BTreeMap<String, String> {
        self.lock().links.clone()
    }

    #[must_use]
    pub fn document(&self) -> MetadataDocument {
        self.lock().document()
    }

    /// Links the session a peer announced over `connection_id`.
    ///
    /// A connection that re-announces a different session replaces its
    /// previous link.
    pub fn peer_announced(&self, connection_id: &str, session_id: &str, description: &str) -> bool {
        if session_id.is_empty() || self.is_self(session_id) {
            return false;
        }

        let document = {
            let mut state = self.lock();
            if state.links.contains_key(session_id) {
                return false;
            }
            if let Some(previous) = state
                .peers
                .insert(connection_id.to_string(), session_id.to_string())
            {
                state.links.remove(&previous);
            }
            state
                .links
                .insert(session_id.to_string(), description.to_string());
            state.document()
        };

        debug!("LOGSHIP | Peer {connection_id} announced session {session_id}");
        self.sync(document);
        true
    }

    /// Unlinks whatever session `connection_id` announced.
    pub fn peer_disconnected(&self, connection_id: &str) -> bool {
        let document = {
            let mut state = self.lock();
            let Some(session_id) = state.peers.remove(connection_id) else {
                return false;
            };
            if state.links.remove(&session_id).is_none() {
                return false;
            }
            state.document()
        };

        debug!("LOGSHIP | Peer {connection_id} disconnected");
        self.sync_after_removal(document);
        true
    }

    /// Re-sends the current document, used once a session becomes available.
    pub fn resync(&self) {
        let document = self.document();
        if document.log_links.is_empty() && document.additional_metadata.is_empty() {
            return;
        }
        self.sync(document);
    }

    fn sync_after_removal(&self, document: MetadataDocument) {
        if document.log_links.is_empty() && !self.sync_empty_links {
            debug!("LOGSHIP | Last link removed, not syncing empty link set");
            return;
        }
        self.sync(document);
    }

    fn sync(&self, document: MetadataDocument) {
        if !self.session.is_authenticated() {
            debug!("LOGSHIP | Not authenticated, deferring metadata sync");
            return;
        }

        if !self.ensure_worker() {
            return;
        }
        self.outbox.send_replace(Some(document));
    }

    fn ensure_worker(&self) -> bool {
        if self.worker_started.load(Ordering::Acquire) {
            return true;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!("LOGSHIP | No async runtime available, dropping metadata sync");
            return false;
        };
        if self.worker_started.swap(true, Ordering::AcqRel) {
            return true;
        }

        let mut outbox = self.outbox.subscribe();
        // A document published before this subscription still counts.
        outbox.mark_changed();
        handle.spawn(run_sync_worker(Arc::clone(&self.sink), outbox));
        true
    }
}

/// Sends the latest document, one at a time, until the registry is dropped.
async fn run_sync_worker(
    sink: Arc<dyn MetadataSink>,
    mut outbox: watch::Receiver<Option<MetadataDocument>>,
) {
    while outbox.changed().await.is_ok() {
        let latest = outbox.borrow_and_update().clone();
        let Some(document) = latest else {
            continue;
        };
        if let Err(e) = sink.sync_metadata(&document).await {
            error!("LOGSHIP | Metadata sync failed: {e}");
        }
    }
}
