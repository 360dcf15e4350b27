// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Authentication handshake and session state.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host;
use crate::http::classify_response;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// An authenticated collector session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub session_id: String,
    /// Viewer URL for this session, may be empty.
    pub web_url: String,
    pub expiry: Option<DateTime<Utc>>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, alias = "logId")]
    log_id: Option<String>,
    #[serde(default, alias = "linkWeb")]
    link_web: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

impl AuthResponse {
    fn into_session(self) -> Result<Session> {
        let token = self.token.unwrap_or_default();
        if token.is_empty() {
            return Err(Error::Auth("response has no token".to_string()));
        }
        let session_id = self.log_id.unwrap_or_default();
        if session_id.is_empty() {
            return Err(Error::Auth("response has no log id".to_string()));
        }

        let expiry = self.expiry.and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(e) => {
                    warn!("LOGSHIP | Ignoring unparseable session expiry '{raw}': {e}");
                    None
                }
            }
        });

        Ok(Session {
            token,
            session_id,
            web_url: self.link_web.unwrap_or_default(),
            expiry,
        })
    }
}

/// Owns the session state and performs the auth handshake.
///
/// The session is swapped in as a whole, so readers never observe a token
/// from one response paired with the id of another.
pub struct SessionClient {
    client: reqwest::Client,
    config: Arc<Config>,
    state: RwLock<Option<Arc<Session>>>,
    tx: broadcast::Sender<Arc<Session>>,
    in_flight: AtomicBool,
}

impl SessionClient {
    #[must_use]
    pub fn new(client: reqwest::Client, config: Arc<Config>) -> Self {
        let (tx, _) = broadcast::channel(8);
        Self {
            client,
            config,
            state: RwLock::new(None),
            tx,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Performs the handshake and stores the resulting session.
    ///
    /// On failure the previous session, if any, is left untouched.
    pub async fn authenticate(&self) -> Result<Arc<Session>> {
        let url = self.config.auth_url()?;
        let body = json!({
            "key": self.config.auth_key,
            "platform": host::platform(),
            "type": self.config.host_type.as_str(),
        });

        debug!("LOGSHIP | Authenticating against {url}");
        let result = self.client.post(&url).json(&body).send().await;

        let Some(value) = classify_response("auth", result).await else {
            return Err(Error::Auth("no usable response from collector".to_string()));
        };
        let response: AuthResponse =
            serde_json::from_value(value).map_err(|e| Error::Parse(e.to_string()))?;
        let session = response.into_session()?;

        debug!(
            "LOGSHIP | Authenticated, session {} ({})",
            session.session_id, session.web_url
        );
        Ok(self.store(session))
    }

    /// Runs [`SessionClient::authenticate`] in the background.
    ///
    /// Triggers arriving while an attempt is in flight are ignored.
    pub fn spawn_authenticate(self: &Arc<Self>) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("LOGSHIP | Authentication already in flight");
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("LOGSHIP | No async runtime available, skipping authentication");
            self.in_flight.store(false, Ordering::Release);
            return;
        };

        let guard = InFlight(Arc::clone(self));
        handle.spawn(async move {
            if let Err(e) = guard.0.authenticate().await {
                error!("LOGSHIP | Authentication failed: {e}");
            }
        });
    }

    pub(crate) fn store(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        {
            #[allow(clippy::expect_used)]
            let mut state = self.state.write().expect("lock poisoned");
            *state = Some(Arc::clone(&session));
        }
        // No subscribers is fine.
        let _ = self.tx.send(Arc::clone(&session));
        session
    }

    #[must_use]
    pub fn session(&self) -> Option<Arc<Session>> {
        #[allow(clippy::expect_used)]
        let state = self.state.read().expect("lock poisoned");
        state.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session()
            .is_some_and(|s| !s.token.is_empty() && !s.session_id.is_empty())
    }

    /// Current session id, empty when unauthenticated.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session()
            .map(|s| s.session_id.clone())
            .unwrap_or_default()
    }

    /// Current viewer URL, empty when unauthenticated.
    #[must_use]
    pub fn session_url(&self) -> String {
        self.session().map(|s| s.web_url.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.session().map(|s| s.token.clone())
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.session().is_some_and(|s| s.is_expired(now))
    }

    /// Receives every session stored after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Session>> {
        self.tx.subscribe()
    }
}

/// Clears the single-flight flag when the attempt ends, even by panic.
struct InFlight(Arc<SessionClient>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}
