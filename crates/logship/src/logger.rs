// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Formatter for the agent's own diagnostics.
//!
//! The agent runs inside another process and usually shares its stderr, so
//! every line it writes about itself carries a fixed `LOGSHIP` prefix that is
//! easy to grep for and easy to filter out of the host's own output.
//!
//! # Format
//!
//! ```text
//! LOGSHIP | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! # Examples
//!
//! ```text
//! LOGSHIP | INFO | Shutdown requested, flushing remaining logs
//! LOGSHIP | WARN | flush{lines=3}: chunk rejected bytes=120
//! LOGSHIP | DEBUG | session{id=L1}: Input closed, flushing remaining logs
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use logship::logger::Formatter;
//!
//! let subscriber = tracing_subscriber::fmt()
//!     .event_format(Formatter)
//!     .with_writer(std::io::stderr)
//!     .finish();
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```
//!
//! The formatter does not filter. Pair it with an `EnvFilter` that silences
//! the HTTP stack (`h2`, `hyper`, `rustls`, `reqwest`) as the forwarder does.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

/// `FormatEvent` implementation writing one prefixed line per event.
///
/// Spans are written root first, each followed by its recorded fields in
/// braces when it has any. Event fields follow the message as `key=value`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "LOGSHIP | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
