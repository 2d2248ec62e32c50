//! Process-wide registry mapping pipe paths to running log streams.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::ResultExt;
use tokio::fs::OpenOptions;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::parse_sink_endpoint;
use crate::error::{
    AlreadyExistsSnafu, ConfigSnafu, FifoOpenSnafu, SpoolOpenSnafu, StartError, StopError,
};
use crate::model::{ContainerInfo, SinkEndpoint};
use crate::reader::FramedFifoReader;
use crate::sink::SinkRegistry;
use crate::spool::Spool;
use crate::worker;

/// The base directory under which a container's default spool path is
/// constructed, when `info.log_path` is not supplied. Overridable at build
/// time; the upstream driver this is modeled on hardcodes `/var/log/docker`.
const DEFAULT_LOG_BASE: &str = match option_env!("DOCKER_LOGSTASH_DRIVER_LOG_BASE") {
    Some(base) => base,
    None => "/var/log/docker",
};

struct StreamHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
    endpoint: SinkEndpoint,
}

/// Entry point for the container runtime host: `StartLogging`/`StopLogging`.
///
/// Cheaply cloneable; every clone shares the same stream registry and sink
/// pool, so a host can hand out one `Driver` per caller without coordination.
#[derive(Clone)]
pub struct Driver {
    streams: Arc<Mutex<HashMap<PathBuf, StreamHandle>>>,
    sinks: Arc<SinkRegistry>,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver {
    pub fn new() -> Self {
        Driver {
            streams: Arc::new(Mutex::new(HashMap::new())),
            sinks: Arc::new(SinkRegistry::new()),
        }
    }

    /// Begins forwarding log entries written to `pipe_path` for the
    /// container described by `info`.
    pub async fn start_logging(
        &self,
        pipe_path: PathBuf,
        info: ContainerInfo,
    ) -> Result<(), StartError> {
        let endpoint = parse_sink_endpoint(&info.config).context(ConfigSnafu)?;

        let mut streams = self.streams.lock().await;
        if streams.contains_key(&pipe_path) {
            return AlreadyExistsSnafu {
                pipe_path: pipe_path.clone(),
            }
            .fail();
        }

        let file = OpenOptions::new()
            .read(true)
            .open(&pipe_path)
            .await
            .with_context(|_| FifoOpenSnafu {
                pipe_path: pipe_path.clone(),
            })?;

        let spool_path = resolve_spool_path(&info);
        let spool = Spool::open(&spool_path)
            .await
            .with_context(|_| SpoolOpenSnafu {
                spool_path: spool_path.clone(),
            })?;

        let sink = self.sinks.acquire(endpoint.clone()).await?;

        let shutdown = Arc::new(Notify::new());
        let reader = FramedFifoReader::new(file);
        let join = tokio::spawn(worker::run(
            pipe_path.clone(),
            reader,
            info,
            spool,
            sink,
            Arc::clone(&shutdown),
        ));

        streams.insert(
            pipe_path,
            StreamHandle {
                shutdown,
                join,
                endpoint,
            },
        );
        Ok(())
    }

    /// Stops forwarding log entries for `pipe_path`. Idempotent: stopping an
    /// unknown or already-stopped pipe succeeds.
    pub async fn stop_logging(&self, pipe_path: &Path) -> Result<(), StopError> {
        let handle = {
            let mut streams = self.streams.lock().await;
            streams.remove(pipe_path)
        };

        let Some(handle) = handle else {
            return Ok(());
        };

        handle.shutdown.notify_one();
        if let Err(error) = handle.join.await {
            tracing::warn!(message = "stream worker task panicked", %error);
        }
        info!(message = "stopped stream", pipe = %pipe_path.display());

        self.sinks.release(&handle.endpoint).await;
        Ok(())
    }
}

fn resolve_spool_path(info: &ContainerInfo) -> PathBuf {
    match info.log_path.as_deref() {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_LOG_BASE)
            .join(&info.id)
            .join(format!("{}.log", info.id)),
    }
}
