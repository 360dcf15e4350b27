// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local copies of shipped batches.
//!
//! Layout under the configured log directory:
//!
//! ```text
//! <dir>/<session_id>.log                                   appended text
//! <dir>/compressed/<session_id>/<YYYY-MM-DDTHH.MM.SS.mmm>.<ext>  one file per chunk
//! ```
//!
//! Everything here is blocking file IO and runs on the blocking pool.

use crate::error::Result;
use crate::formatter::{decompress, Codec};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const COMPRESSED_DIR: &str = "compressed";
const CHUNK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H.%M.%S%.3f";

/// Session ids come from the collector; keep them from escaping `dir`.
fn file_stem(session_id: &str) -> String {
    let stem: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "unknown".to_string()
    } else {
        stem
    }
}

#[must_use]
pub fn text_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{}.log", file_stem(session_id)))
}

#[must_use]
pub fn chunk_dir(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(COMPRESSED_DIR).join(file_stem(session_id))
}

/// Appends formatted text to the session's log file.
pub fn append_text(dir: &Path, session_id: &str, text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = text_path(dir, session_id);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(text.as_bytes())?;
    debug!("LOGSHIP | Appended {} bytes to {}", text.len(), path.display());
    Ok(path)
}

/// Writes one compressed chunk to its own timestamped file.
pub fn write_compressed_chunk(
    dir: &Path,
    session_id: &str,
    codec: Codec,
    bytes: &[u8],
) -> Result<PathBuf> {
    let stamp = Utc::now().format(CHUNK_TIMESTAMP_FORMAT).to_string();
    write_chunk_stamped(dir, session_id, codec, bytes, &stamp)
}

/// Chunks sharing a stamp get a `_NNN` suffix, which sorts after the bare name.
fn write_chunk_stamped(
    dir: &Path,
    session_id: &str,
    codec: Codec,
    bytes: &[u8],
    stamp: &str,
) -> Result<PathBuf> {
    let chunk_dir = chunk_dir(dir, session_id);
    fs::create_dir_all(&chunk_dir)?;

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            stamp.to_string()
        } else {
            format!("{stamp}_{attempt:03}")
        };
        // The name is taken whatever codec wrote it.
        let taken_by_other_codec = [Codec::Zlib, Codec::Zstd]
            .into_iter()
            .filter(|other| *other != codec)
            .any(|other| chunk_dir.join(format!("{name}.{}", other.extension())).exists());
        if taken_by_other_codec {
            attempt += 1;
            continue;
        }

        let path = chunk_dir.join(format!("{name}.{}", codec.extension()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)?;
                debug!("LOGSHIP | Wrote compressed chunk {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Reads back the session's text log.
pub fn load_text(dir: &Path, session_id: &str) -> Result<String> {
    Ok(fs::read_to_string(text_path(dir, session_id))?)
}

/// Reads and decompresses every stored chunk of a session, oldest first.
///
/// Files whose extension is not a known codec are skipped.
pub fn load_compressed_chunks(dir: &Path, session_id: &str) -> Result<Vec<String>> {
    let chunk_dir = chunk_dir(dir, session_id);
    let mut paths: Vec<PathBuf> = match fs::read_dir(&chunk_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    paths.sort();

    let mut chunks = Vec::with_capacity(paths.len());
    for path in paths {
        let codec = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext == Codec::Zlib.extension() => Codec::Zlib,
            Some(ext) if ext == Codec::Zstd.extension() => Codec::Zstd,
            _ => continue,
        };
        let bytes = fs::read(&path)?;
        chunks.push(decompress(&bytes, codec)?);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::formatter::compress;
    use tempfile::tempdir;

    #[test]
    fn test_append_text_accumulates() {
        let dir = tempdir().unwrap();
        append_text(dir.path(), "L1", "first\n").unwrap();
        let path = append_text(dir.path(), "L1", "second\n").unwrap();

        assert_eq!(path, dir.path().join("L1.log"));
        assert_eq!(load_text(dir.path(), "L1").unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_load_text_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(load_text(dir.path(), "nope"), Err(Error::Io(_))));
    }

    #[test]
    fn test_compressed_chunks_reload_in_order() {
        let dir = tempdir().unwrap();
        let first = compress("one\n", Codec::Zlib, 6).unwrap();
        let second = compress("two\n", Codec::Zstd, 3).unwrap();

        let a = write_compressed_chunk(dir.path(), "L1", Codec::Zlib, &first).unwrap();
        let b = write_compressed_chunk(dir.path(), "L1", Codec::Zstd, &second).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(dir.path().join("compressed").join("L1")));
        assert_eq!(a.extension().unwrap(), "zlib");
        assert_eq!(b.extension().unwrap(), "zst");

        assert_eq!(
            load_compressed_chunks(dir.path(), "L1").unwrap(),
            vec!["one\n".to_string(), "two\n".to_string()]
        );
    }

    #[test]
    fn test_chunks_reload_oldest_first() {
        let dir = tempdir().unwrap();
        let write = |stamp: &str, text: &str| {
            let bytes = compress(text, Codec::Zlib, 6).unwrap();
            write_chunk_stamped(dir.path(), "L1", Codec::Zlib, &bytes, stamp).unwrap()
        };

        // Written out of order; reload follows the stamps.
        write("2024-03-01T12.30.46.000", "third\n");
        write("2024-03-01T12.30.45.123", "first\n");
        write("2024-03-01T12.30.45.999", "second\n");

        assert_eq!(
            load_compressed_chunks(dir.path(), "L1").unwrap(),
            vec!["first\n", "second\n", "third\n"]
        );
    }

    #[test]
    fn test_same_millisecond_chunks_keep_write_order() {
        let dir = tempdir().unwrap();
        let stamp = "2024-03-01T12.30.45.123";
        let texts: Vec<String> = (0..12).map(|i| format!("chunk {i}\n")).collect();

        let paths: Vec<PathBuf> = texts
            .iter()
            .map(|text| {
                let bytes = compress(text, Codec::Zlib, 6).unwrap();
                write_chunk_stamped(dir.path(), "L1", Codec::Zlib, &bytes, stamp).unwrap()
            })
            .collect();

        assert!(paths[0].ends_with(format!("{stamp}.zlib")));
        assert!(paths[1].ends_with(format!("{stamp}_001.zlib")));
        assert!(paths[11].ends_with(format!("{stamp}_011.zlib")));
        assert_eq!(load_compressed_chunks(dir.path(), "L1").unwrap(), texts);
    }

    #[test]
    fn test_same_millisecond_chunks_across_codecs_keep_write_order() {
        let dir = tempdir().unwrap();
        let stamp = "2024-03-01T12.30.45.123";
        let zstd = compress("zstd first\n", Codec::Zstd, 3).unwrap();
        let zlib = compress("zlib second\n", Codec::Zlib, 6).unwrap();

        write_chunk_stamped(dir.path(), "L1", Codec::Zstd, &zstd, stamp).unwrap();
        let second = write_chunk_stamped(dir.path(), "L1", Codec::Zlib, &zlib, stamp).unwrap();

        assert!(second.ends_with(format!("{stamp}_001.zlib")));
        assert_eq!(
            load_compressed_chunks(dir.path(), "L1").unwrap(),
            vec!["zstd first\n", "zlib second\n"]
        );
    }

    #[test]
    fn test_consecutive_chunks_reload_in_write_order() {
        let dir = tempdir().unwrap();
        let texts: Vec<String> = (0..5).map(|i| format!("batch {i}\n")).collect();
        for text in &texts {
            let bytes = compress(text, Codec::Zstd, 3).unwrap();
            write_compressed_chunk(dir.path(), "L1", Codec::Zstd, &bytes).unwrap();
        }

        assert_eq!(load_compressed_chunks(dir.path(), "L1").unwrap(), texts);
    }

    #[test]
    fn test_load_chunks_for_unknown_session() {
        let dir = tempdir().unwrap();
        assert!(load_compressed_chunks(dir.path(), "none").unwrap().is_empty());
    }

    #[test]
    fn test_session_id_cannot_escape_directory() {
        let dir = tempdir().unwrap();
        let path = append_text(dir.path(), "../../etc/passwd", "x\n").unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(text_path(dir.path(), ""), dir.path().join("unknown.log"));
    }
}
