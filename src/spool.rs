//! Per-container on-disk overflow buffer.
//!
//! Records that cannot be delivered to the sink are appended here; a
//! background task rotates the file once the sink recovers and replays the
//! rotated generation back into the sink, deleting it once drained.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use snafu::{ResultExt, Snafu};
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::sink::SinkClient;

const RECONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Failure to append a record to the spool.
///
/// Logged and the record dropped; this is the documented loss path for a
/// spool in degraded mode (see [`FatalSpoolError`]).
#[derive(Debug, Snafu)]
#[snafu(display("failed to append to spool: {source}"))]
pub struct SpoolWriteError {
    source: std::io::Error,
}

/// Failure to open a fresh spool file during rotation.
///
/// Future rotations are disabled for the affected stream once this occurs.
#[derive(Debug, Snafu)]
#[snafu(display("failed to open fresh spool file: {source}"))]
pub struct FatalSpoolError {
    source: std::io::Error,
}

struct State {
    file: File,
}

/// Per-container disk spool.
///
/// At most one rotation is ever in flight, enforced by `rotating`, a plain
/// atomic compare-exchanged flag rather than a bool behind a mutex, so a
/// failed-write caller never has to await a lock just to find out a
/// rotation is already underway.
#[derive(Clone)]
pub struct Spool {
    path: PathBuf,
    state: Arc<Mutex<State>>,
    rotating: Arc<AtomicBool>,
}

impl Spool {
    /// Opens (creating if absent) the spool file at `path` in append mode.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            create_spool_dir(parent).await?;
        }
        let file = open_append(&path).await?;
        Ok(Spool {
            path,
            state: Arc::new(Mutex::new(State { file })),
            rotating: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Appends `bytes` to the currently open file and flushes to disk
    /// before returning, so a crash loses at most the in-flight record.
    ///
    /// The lock is only held long enough to clone a handle to the currently
    /// open file; the write, flush, and fsync all happen unlocked, so a slow
    /// disk never blocks other appenders or the rotation task's writer swap.
    pub async fn append(&self, bytes: &[u8]) -> Result<(), SpoolWriteError> {
        let mut file = {
            let state = self.state.lock().await;
            state.file.try_clone().await.context(SpoolWriteSnafu)?
        };
        file.write_all(bytes).await.context(SpoolWriteSnafu)?;
        file.sync_data().await.context(SpoolWriteSnafu)?;
        Ok(())
    }

    /// Idempotently kicks off a background rotate-then-replay cycle against
    /// `sink`. If a rotation is already in progress, returns immediately.
    pub fn rotate_and_drain_async(&self, sink: SinkClient) {
        if self
            .rotating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let path = self.path.clone();
        let state = Arc::clone(&self.state);
        let rotating = Arc::clone(&self.rotating);

        tokio::spawn(async move {
            while sink.reconnecting() {
                tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
            }

            let rotated_path = rotated_generation_path(&path);
            if let Err(error) = tokio::fs::rename(&path, &rotated_path).await {
                error!(message = "failed to rename spool file for rotation", %error, path = %path.display());
                rotating.store(false, Ordering::Release);
                return;
            }

            let fresh = match open_append(&path).await {
                Ok(file) => file,
                Err(source) => {
                    let error = FatalSpoolError { source };
                    error!(
                        message = "further rotations disabled for this spool",
                        %error,
                        path = %path.display(),
                    );
                    // Leave `state.file` pointed at the (now renamed) inode:
                    // the file descriptor is still valid, so appends keep
                    // landing somewhere rather than being lost. `rotating`
                    // is deliberately left `true` to disable further
                    // rotations, per the documented degraded mode.
                    return;
                }
            };

            {
                let mut state = state.lock().await;
                state.file = fresh;
            }

            let live_spool = Spool {
                path: path.clone(),
                state: Arc::clone(&state),
                rotating: Arc::clone(&rotating),
            };
            tokio::spawn(replay(rotated_path, sink, live_spool));

            rotating.store(false, Ordering::Release);
        });
    }
}

async fn open_append(path: &Path) -> Result<File, std::io::Error> {
    let mut options = OpenOptions::new();
    options.create(true).append(true).read(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o640);
    }
    options.open(path).await
}

async fn create_spool_dir(path: &Path) -> Result<(), std::io::Error> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path).await
}

fn rotated_generation_path(current: &Path) -> PathBuf {
    let nanos_timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
    let mut name = current.as_os_str().to_os_string();
    name.push(".");
    name.push(nanos_timestamp);
    PathBuf::from(name)
}

/// Reads `rotated_path` line by line, submitting each to `sink`; deletes the
/// file once drained. Lines that fail to deliver (the sink having gone
/// unreachable again mid-replay) are pushed back onto the live spool so they
/// re-enter the normal rotate/drain cycle rather than being lost.
async fn replay(rotated_path: PathBuf, sink: SinkClient, live_spool: Spool) {
    let file = match File::open(&rotated_path).await {
        Ok(file) => file,
        Err(error) => {
            error!(message = "failed to open rotated spool generation for replay", %error, path = %rotated_path.display());
            return;
        }
    };

    let mut lines = BufReader::new(file).lines();
    let mut requeue_failed = false;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                warn!(message = "error reading rotated spool generation", %error, path = %rotated_path.display());
                break;
            }
        };

        let mut record = line.into_bytes();
        record.push(b'\n');

        if requeue_failed || sink.write(&record).await.is_err() {
            requeue_failed = true;
            if let Err(error) = live_spool.append(&record).await {
                warn!(message = "failed to requeue replayed record", %error);
            }
        }
    }

    if let Err(error) = tokio::fs::remove_file(&rotated_path).await {
        warn!(message = "failed to delete drained spool generation", %error, path = %rotated_path.display());
    } else {
        info!(message = "drained spool generation", path = %rotated_path.display(), requeued = requeue_failed);
    }
}
