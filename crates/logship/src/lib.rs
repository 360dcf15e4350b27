// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logship
//!
//! Client-side log shipping agent. Captured log lines are buffered in memory,
//! flushed on a time or line-count threshold, formatted into a canonical text
//! chunk, optionally compressed, and uploaded to a remote collector service
//! under an authenticated session.
//!
//! ## Architecture
//!
//! ```text
//!   capture ──> LogBuffer ──> FlushTrigger ──> Shipper ──> DeliveryEngine ──> collector
//!                                  │             (worker:        │
//!                                  │          format/compress/   │ Bearer token
//!                                  │              persist)        │
//!                                  └── re-auth ──> SessionClient ─┘
//!
//!   LinkedSessionRegistry ── on change ──> DeliveryEngine::send_metadata
//! ```
//!
//! - [`buffer`]: thread-safe append-only line buffer with atomic drain
//! - [`formatter`]: canonical text format and zlib/zstd compression
//! - [`flusher`]: periodic flush trigger and the batch shipper
//! - [`session`]: authentication handshake and session state
//! - [`delivery`]: log chunk and metadata uploads
//! - [`linked`]: linked session registry and peer directory
//! - [`agent`]: wires the pipeline together for a host process

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]

/// Agent facade owning every pipeline component
pub mod agent;

/// Thread-safe log line buffer
pub mod buffer;

/// Capture hook: tracing layer and direct capture API
pub mod capture;

/// Configuration from defaults, environment variables and serde sources
pub mod config;

/// Log chunk and metadata delivery
pub mod delivery;

/// Error taxonomy
pub mod error;

/// Periodic flush trigger and batch shipper
pub mod flusher;

/// Batch text formatting and compression
pub mod formatter;

/// Platform and host type identification
pub mod host;

/// HTTP client construction and response classification
pub mod http;

/// Linked session registry
pub mod linked;

/// Log line and severity types
pub mod log_line;

/// Custom tracing formatter for the agent's own diagnostics
pub mod logger;

/// Local disk persistence of flushed batches
pub mod persist;

/// Authentication and session state
pub mod session;

pub use agent::Agent;
pub use config::Config;
pub use error::{Error, Result};
pub use log_line::{LogLine, Severity};
