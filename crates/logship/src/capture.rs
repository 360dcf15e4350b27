// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry points that feed the buffer.
//!
//! [`LogCapture`] is the direct API; [`CaptureLayer`] forwards `tracing`
//! events from the host process. Both drop lines below the configured
//! severity filter before they reach the buffer.

use crate::buffer::LogBuffer;
use crate::log_line::{LogLine, Severity};
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Targets never captured: the agent's own diagnostics, including the
/// forwarder binary's, and its HTTP stack. Matched as a whole crate name, so
/// `hyperion` is captured while `hyper::proto` is not.
const IGNORED_TARGETS: [&str; 6] = [
    "logship",
    "logship_forwarder",
    "reqwest",
    "hyper",
    "h2",
    "rustls",
];

#[derive(Clone, Debug)]
pub struct LogCapture {
    buffer: Arc<LogBuffer>,
    filter: Severity,
}

impl LogCapture {
    #[must_use]
    pub fn new(buffer: Arc<LogBuffer>, filter: Severity) -> Self {
        Self { buffer, filter }
    }

    /// Buffers one line. Returns false when the severity is filtered out.
    pub fn capture(
        &self,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        if !severity.passes(self.filter) {
            return false;
        }
        self.buffer.append(LogLine::new(severity, category, message));
        true
    }

    #[must_use]
    pub fn filter(&self) -> Severity {
        self.filter
    }

    #[must_use]
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer {
            capture: self.clone(),
        }
    }
}

/// `tracing_subscriber` layer turning events into buffered lines.
///
/// The event target becomes the category.
pub struct CaptureLayer {
    capture: LogCapture,
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|prefix| {
        target == *prefix
            || target
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_ignored(metadata.target()) {
            return;
        }

        let severity = Severity::from(metadata.level());
        if !severity.passes(self.capture.filter) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.capture
            .capture(severity, metadata.target(), visitor.finish());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
