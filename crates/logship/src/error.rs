// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors produced by the log shipping pipeline.
///
/// None of these are fatal to the host: every variant is logged where it is
/// handled and the pipeline keeps running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Delivery failed ({}): {message}", display_status(.status))]
    Delivery {
        status: Option<u16>,
        message: String,
    },

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn display_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "no response".to_string(), |s| s.to_string())
}
