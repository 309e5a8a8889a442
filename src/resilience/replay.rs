//! Request body replay.
//!
//! # Responsibilities
//! - Turn a single-read request body into one that can be reopened per attempt
//! - Bound memory: buffer up to a cap, spill beyond it when allowed
//! - Remove spill files when the last handle is dropped
//!
//! # Design Decisions
//! - Overflow detection reads `cap + 1` bytes; nothing more is held in memory
//! - An oversized body that cannot be replayed is still sent once, intact
//! - Spill files are `tempfile::TempPath`s, so cleanup runs on every exit path

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::TransportError;
use crate::http::body::{self, read_prefix, Prefix};

const READ_CHUNK: usize = 64 * 1024;

/// How a request body is made replayable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStrategy {
    /// Buffer up to the cap; larger bodies are sent once without retry.
    #[default]
    MemoryOnly,
    /// Buffer up to the cap, then spill the whole body to a temp file.
    MemoryThenDisk,
    /// Never replay; every request is sent once.
    Never,
}

#[derive(Debug)]
enum Source {
    Memory(Bytes),
    Disk { path: TempPath, len: u64 },
}

/// A body that can be reopened any number of times.
///
/// Clones share the same bytes or spill file. Carried in request extensions
/// so inner decorators can reuse it.
#[derive(Debug, Clone)]
pub struct ReplayableBody {
    source: Arc<Source>,
}

impl ReplayableBody {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: Arc::new(Source::Memory(bytes.into())),
        }
    }

    /// Total body length in bytes.
    pub fn len(&self) -> u64 {
        match &*self.source {
            Source::Memory(b) => b.len() as u64,
            Source::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the spill file, if the body lives on disk.
    pub fn spill_path(&self) -> Option<&Path> {
        match &*self.source {
            Source::Memory(_) => None,
            Source::Disk { path, .. } => Some(&**path),
        }
    }

    /// A fresh, independent reader over the same bytes.
    pub async fn reopen(&self) -> Result<Body, TransportError> {
        match &*self.source {
            Source::Memory(bytes) => Ok(Body::from(bytes.clone())),
            Source::Disk { path, .. } => {
                let file = File::open(path).await.map_err(TransportError::BodyReplay)?;
                // The stream holds the source so the file outlives every reader.
                let keep = Arc::clone(&self.source);
                let chunks = stream::try_unfold((file, keep), |(mut file, keep)| async move {
                    let mut buf = BytesMut::with_capacity(READ_CHUNK);
                    match file.read_buf(&mut buf).await {
                        Ok(0) => Ok(None),
                        Ok(_) => Ok(Some((buf.freeze(), (file, keep)))),
                        Err(e) => Err(e),
                    }
                });
                Ok(Body::from_stream(chunks))
            }
        }
    }
}

/// Result of preparing a body for replay.
pub enum Prepared {
    /// The request has no body.
    Empty,
    Replayable(ReplayableBody),
    /// Not replayable; this body must be sent exactly once.
    OneShot(Body),
}

impl fmt::Debug for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Replayable(r) => f.debug_tuple("Replayable").field(r).finish(),
            Self::OneShot(_) => f.write_str("OneShot(..)"),
        }
    }
}

/// Preparation failed.
pub struct ReplayFailure {
    pub error: TransportError,
    /// Body for a single non-retried send, when one can still be built.
    pub fallback: Option<Body>,
}

impl fmt::Debug for ReplayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayFailure")
            .field("error", &self.error)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Make `body` reopenable under `strategy`, buffering at most `cap` bytes in memory.
pub async fn ensure_reopenable(
    body: Body,
    cap: usize,
    strategy: ReplayStrategy,
    spill_dir: Option<&Path>,
) -> Result<Prepared, ReplayFailure> {
    if body::is_empty(&body) {
        return Ok(Prepared::Empty);
    }
    if strategy == ReplayStrategy::Never {
        return Ok(Prepared::OneShot(body));
    }

    let prefix = read_prefix(body, cap.saturating_add(1)).await;

    if let Some(e) = prefix.error() {
        let error = TransportError::BodyReplay(io::Error::other(e.to_string()));
        return Err(ReplayFailure {
            error,
            fallback: Some(prefix.into_body()),
        });
    }

    if prefix.is_complete() && prefix.len() <= cap {
        let (bytes, _, _) = prefix.into_parts();
        return Ok(Prepared::Replayable(ReplayableBody::from_bytes(bytes)));
    }

    match strategy {
        ReplayStrategy::MemoryThenDisk => spill(prefix, spill_dir).await,
        _ => Ok(Prepared::OneShot(prefix.into_body())),
    }
}

async fn spill(prefix: Prefix, dir: Option<&Path>) -> Result<Prepared, ReplayFailure> {
    let dir: PathBuf = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);

    let named = match tempfile::Builder::new()
        .prefix("retry-body-")
        .tempfile_in(&dir)
    {
        Ok(named) => named,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to create spill file");
            return Err(ReplayFailure {
                error: TransportError::BodyReplay(e),
                fallback: Some(prefix.into_body()),
            });
        }
    };

    let (file, path) = named.into_parts();
    let mut file = File::from_std(file);

    match write_prefix(&mut file, prefix).await {
        Ok(len) => {
            tracing::debug!(path = %path.display(), bytes = len, "Spilled request body to disk");
            Ok(Prepared::Replayable(ReplayableBody {
                source: Arc::new(Source::Disk { path, len }),
            }))
        }
        // `path` drops here and removes the partial file.
        Err(e) => Err(ReplayFailure {
            error: TransportError::BodyReplay(e),
            fallback: None,
        }),
    }
}

async fn write_prefix(file: &mut File, prefix: Prefix) -> io::Result<u64> {
    let (head, rest, _) = prefix.into_parts();
    file.write_all(&head).await?;
    let mut len = head.len() as u64;

    if let Some(mut rest) = rest {
        while let Some(chunk) = rest.next().await {
            let chunk = chunk.map_err(io::Error::other)?;
            file.write_all(&chunk).await?;
            len += chunk.len() as u64;
        }
    }

    file.flush().await?;
    Ok(len)
}
