// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::Config;
use crate::error::{Error, Result};
use crate::formatter::Batch;
use crate::http::classify_response;
use crate::linked::{MetadataDocument, MetadataSink};
use crate::session::SessionClient;
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Posts log chunks and metadata documents to the collector.
///
/// Every request carries the current session token. Nothing is retried: a
/// failed chunk is reported to the caller and dropped. Ordering between
/// chunks is the shipper's concern.
pub struct DeliveryEngine {
    client: reqwest::Client,
    config: Arc<Config>,
    session: Arc<SessionClient>,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(client: reqwest::Client, config: Arc<Config>, session: Arc<SessionClient>) -> Self {
        Self {
            client,
            config,
            session,
        }
    }

    pub async fn send_log_batch(&self, batch: Batch) -> Result<Option<Value>> {
        let url = self.config.log_chunk_url()?;
        let token = self.session.token().ok_or(Error::NotAuthenticated)?;

        debug!(
            "LOGSHIP | Sending {} byte log chunk (compressed: {})",
            batch.len(),
            batch.is_compressed()
        );

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, batch.content_type());
        if let Some(encoding) = batch.content_encoding() {
            request = request.header(CONTENT_ENCODING, encoding);
        }

        self.dispatch("log chunk", request.body(batch.into_body()))
            .await
    }

    pub async fn send_metadata(&self, document: &MetadataDocument) -> Result<Option<Value>> {
        let url = self.config.log_metadata_url()?;
        let token = self.session.token().ok_or(Error::NotAuthenticated)?;

        debug!(
            "LOGSHIP | Sending metadata with {} linked sessions",
            document.log_links.len()
        );

        let request = self.client.post(&url).bearer_auth(token).json(document);
        self.dispatch("metadata", request).await
    }

    async fn dispatch(&self, context: &str, request: RequestBuilder) -> Result<Option<Value>> {
        let result = request.send().await;
        let status = result.as_ref().ok().map(reqwest::Response::status);
        let transport_error = result.as_ref().err().map(ToString::to_string);

        let body = classify_response(context, result).await;

        match status {
            None => Err(Error::Delivery {
                status: None,
                message: transport_error.unwrap_or_default(),
            }),
            Some(status) if status.is_success() => Ok(body),
            Some(status) => {
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    debug!("LOGSHIP | {context} | Session rejected, re-authenticating");
                    self.session.spawn_authenticate();
                }
                Err(Error::Delivery {
                    status: Some(status.as_u16()),
                    message: body.map(|value| value.to_string()).unwrap_or_default(),
                })
            }
        }
    }
}

#[async_trait]
impl MetadataSink for DeliveryEngine {
    async fn sync_metadata(&self, document: &MetadataDocument) -> Result<Option<Value>> {
        self.send_metadata(document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::Codec;
    use crate::http::get_client;
    use crate::linked::MetadataEntry;
    use crate::session::Session;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    fn engine(server: &Server, authenticated: bool) -> DeliveryEngine {
        let config = Arc::new(Config {
            base_url: server.url(),
            auth_key: "env-key".to_string(),
            ..Default::default()
        });
        let client = get_client(&config);
        let session = Arc::new(SessionClient::new(client.clone(), Arc::clone(&config)));
        if authenticated {
            session.store(Session {
                token: "abc".to_string(),
                session_id: "L1".to_string(),
                web_url: "https://x/L1".to_string(),
                expiry: None,
            });
        }
        DeliveryEngine::new(client, config, session)
    }

    #[tokio::test]
    async fn test_send_text_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/log/chunk")
            .match_header("authorization", "Bearer abc")
            .match_header("content-type", "text/plain")
            .match_header("content-encoding", Matcher::Missing)
            .match_body("[2024.03.01-12.30.45.123][Log][Temp]: hello\n")
            .with_status(202)
            .create_async()
            .await;

        let engine = engine(&server, true);
        let result = engine
            .send_log_batch(Batch::Text(
                "[2024.03.01-12.30.45.123][Log][Temp]: hello\n".to_string(),
            ))
            .await;

        mock.assert_async().await;
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_compressed_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/log/chunk")
            .match_header("authorization", "Bearer abc")
            .match_header("content-type", "application/octet-stream")
            .match_header("content-encoding", "deflate")
            .with_status(200)
            .with_body(r#"{"stored":true}"#)
            .create_async()
            .await;

        let engine = engine(&server, true);
        let batch = Batch::from_text("hello\n".to_string(), Some((Codec::Zlib, 6)));
        let result = engine.send_log_batch(batch).await;

        mock.assert_async().await;
        assert_eq!(result.unwrap(), Some(json!({"stored": true})));
    }

    #[tokio::test]
    async fn test_send_metadata() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/log/metadata")
            .match_header("authorization", "Bearer abc")
            .match_body(Matcher::Json(json!({
                "log_links": ["A", "B"],
                "additional_metadata": [{"key": "map", "value": "Arena"}],
            })))
            .with_status(200)
            .create_async()
            .await;

        let engine = engine(&server, true);
        let document = MetadataDocument {
            log_links: vec!["A".to_string(), "B".to_string()],
            additional_metadata: vec![MetadataEntry {
                key: "map".to_string(),
                value: "Arena".to_string(),
            }],
        };
        let result = engine.sync_metadata(&document).await;

        mock.assert_async().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unauthenticated_send_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/log/chunk")
            .expect(0)
            .create_async()
            .await;

        let engine = engine(&server, false);
        let result = engine.send_log_batch(Batch::Text("x\n".to_string())).await;

        mock.assert_async().await;
        assert!(matches!(result, Err(Error::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/log/chunk")
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .create_async()
            .await;

        let engine = engine(&server, true);
        let err = engine
            .send_log_batch(Batch::Text("x\n".to_string()))
            .await
            .unwrap_err();

        match err {
            Error::Delivery { status, message } => {
                assert_eq!(status, Some(500));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_token_triggers_reauthentication() {
        let mut server = Server::new_async().await;
        let _chunk = server
            .mock("POST", "/v1/log/chunk")
            .with_status(401)
            .create_async()
            .await;
        let auth = server
            .mock("POST", "/v1/auth/client")
            .with_status(200)
            .with_body(r#"{"token":"fresh","log_id":"L2"}"#)
            .create_async()
            .await;

        let engine = engine(&server, true);
        let mut sessions = engine.session.subscribe();

        let err = engine
            .send_log_batch(Batch::Text("x\n".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery {
                status: Some(401),
                ..
            }
        ));

        let session = tokio::time::timeout(Duration::from_secs(5), sessions.recv())
            .await
            .unwrap()
            .unwrap();
        auth.assert_async().await;
        assert_eq!(session.token, "fresh");
        assert_eq!(engine.session.session_id(), "L2");
    }
}
