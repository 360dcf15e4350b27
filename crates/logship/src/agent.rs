// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::LogBuffer;
use crate::capture::{CaptureLayer, LogCapture};
use crate::config::Config;
use crate::delivery::DeliveryEngine;
use crate::error::{Error, Result};
use crate::flusher::{FlushOutcome, FlushTrigger, Shipper};
use crate::http::get_client;
use crate::linked::{LinkedSessionRegistry, MetadataDocument};
use crate::log_line::Severity;
use crate::session::{Session, SessionClient};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The log shipping agent.
///
/// Owns every pipeline component and exposes the operations a host process
/// needs. Must be created inside a tokio runtime; its methods can then be
/// called from any thread.
pub struct Agent {
    config: Arc<Config>,
    runtime: Handle,
    capture: LogCapture,
    buffer: Arc<LogBuffer>,
    session: Arc<SessionClient>,
    registry: Arc<LinkedSessionRegistry>,
    trigger: Arc<FlushTrigger>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            Error::Config(format!("agent must be created inside a tokio runtime: {e}"))
        })?;

        let config = Arc::new(config);
        let client = get_client(&config);
        let buffer = Arc::new(LogBuffer::new());
        let capture = LogCapture::new(Arc::clone(&buffer), config.severity_filter);

        let session = Arc::new(SessionClient::new(client.clone(), Arc::clone(&config)));
        let delivery = Arc::new(DeliveryEngine::new(
            client,
            Arc::clone(&config),
            Arc::clone(&session),
        ));
        let registry = Arc::new(LinkedSessionRegistry::new(
            Arc::clone(&session),
            Arc::clone(&delivery) as _,
            config.sync_empty_links,
        ));
        let shipper = Arc::new(Shipper::new(
            Arc::clone(&config),
            Arc::clone(&session),
            delivery,
            runtime.clone(),
        ));
        let trigger = Arc::new(FlushTrigger::new(Arc::clone(&buffer), shipper, &config));

        Ok(Self {
            config,
            runtime,
            capture,
            buffer,
            session,
            registry,
            trigger,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts authentication, the flush loop and the metadata resync watcher.
    ///
    /// Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let _runtime = self.runtime.enter();
        info!(
            "LOGSHIP | Starting log shipping to {} as {}",
            self.config.base_url, self.config.host_type
        );

        let watcher = self.runtime.spawn(watch_sessions(
            self.session.subscribe(),
            Arc::clone(&self.registry),
            self.cancel.clone(),
        ));
        let flusher = self
            .runtime
            .spawn(Arc::clone(&self.trigger).run(self.cancel.clone()));
        self.session.spawn_authenticate();

        #[allow(clippy::expect_used)]
        let mut tasks = self.tasks.lock().expect("lock poisoned");
        tasks.push(flusher);
        tasks.push(watcher);
    }

    /// Stops the flush loop and waits for the final flush.
    pub async fn shutdown(&self) {
        debug!("LOGSHIP | Shutting down");
        self.cancel.cancel();

        let tasks = {
            #[allow(clippy::expect_used)]
            let mut tasks = self.tasks.lock().expect("lock poisoned");
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            if let Err(e) = task.await {
                error!("LOGSHIP | Agent task failed during shutdown: {e}");
            }
        }
    }

    /// Cancelled when the agent shuts down.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Buffers one line, subject to the severity filter.
    pub fn log(
        &self,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.capture.capture(severity, category, message)
    }

    #[must_use]
    pub fn capture(&self) -> &LogCapture {
        &self.capture
    }

    /// A `tracing` layer feeding this agent.
    #[must_use]
    pub fn layer(&self) -> CaptureLayer {
        self.capture.layer()
    }

    #[must_use]
    pub fn pending_lines(&self) -> usize {
        self.buffer.len()
    }

    pub fn flush_now(&self) -> FlushOutcome {
        let _runtime = self.runtime.enter();
        self.trigger.flush_now()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Authenticates now instead of waiting for the background attempt.
    pub async fn authenticate(&self) -> Result<Arc<Session>> {
        self.session.authenticate().await
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    #[must_use]
    pub fn session_url(&self) -> String {
        self.session.session_url()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Session>> {
        self.session.subscribe()
    }

    pub fn register_link(&self, session_id: &str, description: &str) -> bool {
        let _runtime = self.runtime.enter();
        self.registry.register(session_id, description)
    }

    pub fn unregister_link(&self, session_id: &str) -> bool {
        let _runtime = self.runtime.enter();
        self.registry.unregister(session_id)
    }

    pub fn set_additional_metadata(&self, key: &str, value: &str) {
        let _runtime = self.runtime.enter();
        self.registry.set_additional_metadata(key, value);
    }

    #[must_use]
    pub fn links(&self) -> BTreeMap<String, String> {
        self.registry.links()
    }

    #[must_use]
    pub fn metadata(&self) -> MetadataDocument {
        self.registry.document()
    }

    /// A peer announced its session id over `connection_id`.
    pub fn peer_announced(&self, connection_id: &str, session_id: &str, description: &str) -> bool {
        let _runtime = self.runtime.enter();
        self.registry
            .peer_announced(connection_id, session_id, description)
    }

    pub fn peer_disconnected(&self, connection_id: &str) -> bool {
        let _runtime = self.runtime.enter();
        self.registry.peer_disconnected(connection_id)
    }
}

/// Re-sends link metadata whenever a new session is stored.
async fn watch_sessions(
    mut sessions: broadcast::Receiver<Arc<Session>>,
    registry: Arc<LinkedSessionRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = sessions.recv() => match received {
                Ok(session) => {
                    info!(
                        "LOGSHIP | Session {} started, viewable at {}",
                        session.session_id, session.web_url
                    );
                    registry.resync();
                }
                Err(RecvError::Lagged(_)) => registry.resync(),
                Err(RecvError::Closed) => break,
            }
        }
    }
}
