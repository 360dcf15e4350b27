// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::log_line::LogLine;
use std::sync::Mutex;

/// Append-only buffer of captured lines awaiting a flush.
///
/// Producers on any thread call [`LogBuffer::append`]; the flush trigger calls
/// [`LogBuffer::drain_all`], which swaps the contents for an empty vector under
/// the same lock so no line is lost or returned twice.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<Vec<LogLine>>,
}

impl LogBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, line: LogLine) {
        #[allow(clippy::expect_used)]
        let mut lines = self.lines.lock().expect("lock poisoned");
        lines.push(line);
    }

    /// Returns every buffered line in append order and leaves the buffer empty.
    pub fn drain_all(&self) -> Vec<LogLine> {
        #[allow(clippy::expect_used)]
        let mut lines = self.lines.lock().expect("lock poisoned");
        std::mem::take(&mut *lines)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let lines = self.lines.lock().expect("lock poisoned");
        lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
