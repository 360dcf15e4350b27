// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch formatting and compression.
//!
//! Every buffered line becomes one text row:
//!
//! ```text
//! [2024.03.01-12.30.45.123][Warning][Net]: connection reset
//! ```
//!
//! Rows are joined in buffer order with a `\n` terminator on every platform.
//! The resulting text is the uncompressed chunk; compressed chunks are the
//! UTF-8 bytes of that text run through zlib (default) or zstd.

use crate::error::{Error, Result};
use crate::log_line::LogLine;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Deserializer};
use std::fmt::{self, Write as _};
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H.%M.%S%.3f";

/// Compression codec for log chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    Zlib,
    Zstd,
}

impl Codec {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Zlib => "zlib",
            Codec::Zstd => "zstd",
        }
    }

    /// `Content-Encoding` header value announcing this codec.
    #[must_use]
    pub fn content_encoding(self) -> &'static str {
        match self {
            Codec::Zlib => "deflate",
            Codec::Zstd => "zstd",
        }
    }

    /// File extension for persisted chunks.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Zlib => "zlib",
            Codec::Zstd => "zst",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zlib" | "deflate" => Ok(Codec::Zlib),
            "zstd" => Ok(Codec::Zstd),
            _ => Err(format!("unknown compression codec '{s}'")),
        }
    }
}

impl<'de> Deserialize<'de> for Codec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Appends one formatted row for `line` to `out`.
pub fn format_line(out: &mut String, line: &LogLine) {
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "[{}][{}][{}]: {}",
        line.timestamp.format(TIMESTAMP_FORMAT),
        line.severity,
        line.category,
        line.message
    );
}

/// Formats a batch into its canonical text form.
#[must_use]
pub fn format_text(lines: &[LogLine]) -> String {
    let mut log = String::with_capacity(lines.len() * 96);
    for line in lines {
        format_line(&mut log, line);
    }
    log
}

/// Compresses the UTF-8 bytes of `text`.
///
/// `level` is clamped to what the codec accepts (0-9 for zlib).
pub fn compress(text: &str, codec: Codec, level: i32) -> Result<Vec<u8>> {
    let compressed = match codec {
        Codec::Zlib => {
            let level = u32::try_from(level.clamp(0, 9)).unwrap_or(6);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder
                .write_all(text.as_bytes())
                .and_then(|()| encoder.finish())
        }
        Codec::Zstd => zstd::stream::write::Encoder::new(Vec::new(), level).and_then(
            |mut encoder| {
                encoder.write_all(text.as_bytes())?;
                encoder.finish()
            },
        ),
    }
    .map_err(|e| Error::Compression(format!("{codec}: {e}")))?;

    debug!(
        "LOGSHIP | Compressed {} bytes to {} bytes with {}",
        text.len(),
        compressed.len(),
        codec
    );
    Ok(compressed)
}

/// Inverse of [`compress`].
pub fn decompress(bytes: &[u8], codec: Codec) -> Result<String> {
    let mut decompressed = Vec::new();
    match codec {
        Codec::Zlib => ZlibDecoder::new(bytes)
            .read_to_end(&mut decompressed)
            .map(|_| ()),
        Codec::Zstd => zstd::stream::read::Decoder::new(bytes)
            .and_then(|mut decoder| decoder.read_to_end(&mut decompressed).map(|_| ())),
    }
    .map_err(|e| Error::Compression(format!("{codec}: {e}")))?;

    String::from_utf8(decompressed).map_err(|e| Error::Compression(e.to_string()))
}

/// The unit of delivery: one formatted, optionally compressed chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Batch {
    Text(String),
    Compressed { codec: Codec, bytes: Vec<u8> },
}

impl Batch {
    /// Builds a batch from formatted text.
    ///
    /// With `compression` set, a codec failure falls back to the text batch
    /// and logs a warning.
    #[must_use]
    pub fn from_text(text: String, compression: Option<(Codec, i32)>) -> Self {
        let Some((codec, level)) = compression else {
            return Batch::Text(text);
        };

        match compress(&text, codec, level) {
            Ok(bytes) => Batch::Compressed { codec, bytes },
            Err(e) => {
                warn!("LOGSHIP | {e}, sending chunk uncompressed");
                Batch::Text(text)
            }
        }
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self, Batch::Compressed { .. })
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Batch::Text(_) => "text/plain",
            Batch::Compressed { .. } => "application/octet-stream",
        }
    }

    #[must_use]
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Batch::Text(_) => None,
            Batch::Compressed { codec, .. } => Some(codec.content_encoding()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Batch::Text(text) => text.len(),
            Batch::Compressed { bytes, .. } => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        match self {
            Batch::Text(text) => text.into_bytes(),
            Batch::Compressed { bytes, .. } => bytes,
        }
    }
}
