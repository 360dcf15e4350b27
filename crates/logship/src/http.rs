// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction and the shared response classifier.
//!
//! Every request the agent makes (auth handshake, log chunk, metadata) ends in
//! [`classify_response`], which turns a transport result into an optional JSON
//! document and does all of the failure logging:
//!
//! | Outcome | Log | Returns |
//! |---|---|---|
//! | transport error | error | `None` |
//! | non-2xx status | warning | continues below |
//! | empty body | none | `None` |
//! | JSON body | none | `Some(value)` |
//! | non-JSON body | error | `None` |

use crate::config::Config;
use core::time::Duration;
use serde_json::Value;
use std::error::Error;
use tracing::{error, warn};

/// Builds the HTTP client used for every collector request.
///
/// An invalid proxy setting is logged and the client falls back to a direct
/// connection.
#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "LOGSHIP | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "LOGSHIP | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &Config, allow_proxy: bool) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.proxy_https {
            let proxy = reqwest::Proxy::https(https_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

/// Classifies the result of a collector request.
///
/// `context` names the caller in log output (`"auth"`, `"log chunk"`, ...).
pub async fn classify_response(
    context: &str,
    result: Result<reqwest::Response, reqwest::Error>,
) -> Option<Value> {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            error!("LOGSHIP | {context} | HTTP request failed: {e}");
            return None;
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            error!("LOGSHIP | {context} | Failed to read response body ({status}): {e}");
            return None;
        }
    };

    if !status.is_success() {
        warn!("LOGSHIP | {context} | Collector responded with {status}: {body}");
    }

    parse_body(context, &body)
}

/// Parses a response body. Empty bodies are "no data" and never reach the parser.
pub(crate) fn parse_body(context: &str, body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("LOGSHIP | {context} | Failed to parse JSON response: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;
    use tracing_test::traced_test;

    fn test_config() -> Config {
        Config {
            base_url: "http://localhost".to_string(),
            auth_key: "k".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_get_client_with_invalid_proxy_falls_back() {
        let config = Config {
            proxy_https: Some("::not a url::".to_string()),
            ..test_config()
        };
        // Must not panic, falls back to a direct client.
        let _client = get_client(&config);
    }

    #[tokio::test]
    async fn test_classify_success_with_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/ok")
            .with_status(200)
            .with_body(r#"{"accepted":true}"#)
            .create_async()
            .await;

        let client = get_client(&test_config());
        let result = client.post(format!("{}/ok", server.url())).send().await;
        let body = classify_response("test", result).await;

        mock.assert_async().await;
        assert_eq!(body, Some(json!({"accepted": true})));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_classify_non_2xx_still_returns_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/limited")
            .with_status(429)
            .with_body(r#"{"error":"rate_limited"}"#)
            .create_async()
            .await;

        let client = get_client(&test_config());
        let result = client.post(format!("{}/limited", server.url())).send().await;
        let body = classify_response("test", result).await;

        assert_eq!(body, Some(json!({"error": "rate_limited"})));
        assert!(logs_contain("Collector responded with 429"));
        assert!(!logs_contain("Failed to parse JSON"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_classify_empty_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/empty")
            .with_status(202)
            .create_async()
            .await;

        let client = get_client(&test_config());
        let result = client.post(format!("{}/empty", server.url())).send().await;
        let body = classify_response("test", result).await;

        assert_eq!(body, None);
        assert!(!logs_contain("Failed to parse JSON"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_classify_invalid_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/html")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let client = get_client(&test_config());
        let result = client.post(format!("{}/html", server.url())).send().await;
        let body = classify_response("test", result).await;

        assert_eq!(body, None);
        assert!(logs_contain("Failed to parse JSON response"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_classify_transport_failure() {
        let client = get_client(&test_config());
        // Port 9 (discard) on localhost is not listening in test environments.
        let result = client.post("http://127.0.0.1:9/nothing").send().await;
        let body = classify_response("test", result).await;

        assert_eq!(body, None);
        assert!(logs_contain("HTTP request failed"));
    }

    #[test]
    fn test_parse_body_whitespace_is_empty() {
        assert_eq!(parse_body("test", "  \n"), None);
        assert_eq!(parse_body("test", "[1,2]"), Some(json!([1, 2])));
    }
}
