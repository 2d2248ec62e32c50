//! A reconnecting byte-oriented client for the remote log-ingestion endpoint.

mod registry;

pub use registry::SinkRegistry;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use snafu::Snafu;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::model::{Scheme, SinkEndpoint};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// A transport-level failure writing to, or connecting to, the sink.
///
/// Never surfaced past the [`crate::worker`] loop: the caller spills the
/// record to the spool and moves on.
#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("failed to connect to sink: {source}"))]
    Connect { source: std::io::Error },

    #[snafu(display("timed out connecting to sink"))]
    ConnectTimeout,

    #[snafu(display("failed to write to sink: {source}"))]
    Write { source: std::io::Error },

    #[snafu(display("timed out writing to sink"))]
    WriteTimeout,

    #[snafu(display("sink client has been closed"))]
    Closed,
}

enum Conn {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Conn {
    async fn connect(endpoint: &SinkEndpoint) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        match endpoint.scheme {
            Scheme::Tcp => {
                let stream = timeout(endpoint.timeout, TcpStream::connect(&addr))
                    .await
                    .map_err(|_| TransportError::ConnectTimeout)?
                    .context_connect()?;
                Ok(Conn::Tcp(stream))
            }
            Scheme::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0")
                    .await
                    .context_connect()?;
                let remote: SocketAddr = timeout(endpoint.timeout, tokio::net::lookup_host(&addr))
                    .await
                    .map_err(|_| TransportError::ConnectTimeout)?
                    .context_connect()?
                    .next()
                    .ok_or_else(|| TransportError::Connect {
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("no address found for {addr}"),
                        ),
                    })?;
                socket.connect(remote).await.context_connect()?;
                Ok(Conn::Udp(socket))
            }
        }
    }

    async fn write(&mut self, bytes: &[u8], write_timeout: Duration) -> Result<(), TransportError> {
        let fut = async {
            match self {
                Conn::Tcp(stream) => {
                    use tokio::io::AsyncWriteExt;
                    stream.write_all(bytes).await
                }
                Conn::Udp(socket) => socket.send(bytes).await.map(|_| ()),
            }
        };
        timeout(write_timeout, fut)
            .await
            .map_err(|_| TransportError::WriteTimeout)?
            .context_write()
    }
}

trait IoResultExt<T> {
    fn context_connect(self) -> Result<T, TransportError>;
    fn context_write(self) -> Result<T, TransportError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn context_connect(self) -> Result<T, TransportError> {
        self.map_err(|source| TransportError::Connect { source })
    }

    fn context_write(self) -> Result<T, TransportError> {
        self.map_err(|source| TransportError::Write { source })
    }
}

struct Inner {
    endpoint: SinkEndpoint,
    conn: Mutex<Option<Conn>>,
    reconnecting: AtomicBool,
    closed: AtomicBool,
}

/// Client for the remote log-ingestion endpoint.
///
/// Cheaply cloneable; all clones share the same underlying connection and
/// reconnect state. Concurrent [`SinkClient::write`] calls are serialized by
/// an internal mutex.
#[derive(Clone)]
pub struct SinkClient {
    inner: Arc<Inner>,
}

impl SinkClient {
    /// Connects to `endpoint`, returning a client in the connected state.
    ///
    /// The initial connection attempt is not retried: a failure here is
    /// reported to the caller.
    pub async fn connect(endpoint: SinkEndpoint) -> Result<Self, TransportError> {
        let conn = Conn::connect(&endpoint).await?;
        Ok(SinkClient {
            inner: Arc::new(Inner {
                endpoint,
                conn: Mutex::new(Some(conn)),
                reconnecting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Builds a client for `endpoint` that never fails to construct.
    ///
    /// If the initial connection attempt fails, the client comes up already
    /// in the reconnecting state with no live connection, and a background
    /// task immediately starts retrying at [`RECONNECT_INTERVAL`] -- exactly
    /// as if a later write had failed. Callers (namely `StartLogging`) must
    /// not lose a stream just because the sink happens to be down at
    /// registration time; every write attempted before the first successful
    /// (re)connect spills to the spool like any other transport failure.
    pub async fn connect_or_reconnecting(endpoint: SinkEndpoint) -> Self {
        match Conn::connect(&endpoint).await {
            Ok(conn) => SinkClient {
                inner: Arc::new(Inner {
                    endpoint,
                    conn: Mutex::new(Some(conn)),
                    reconnecting: AtomicBool::new(false),
                    closed: AtomicBool::new(false),
                }),
            },
            Err(error) => {
                warn!(message = "initial sink connection failed, reconnecting in background", %error);
                let client = SinkClient {
                    inner: Arc::new(Inner {
                        endpoint,
                        conn: Mutex::new(None),
                        reconnecting: AtomicBool::new(true),
                        closed: AtomicBool::new(false),
                    }),
                };
                client.spawn_reconnect_loop();
                client
            }
        }
    }

    /// Writes `bytes` to the sink, blocking until it is accepted or the
    /// configured timeout elapses.
    ///
    /// On failure, transitions the client into the reconnecting state and
    /// spawns a background task that retries at [`RECONNECT_INTERVAL`]. The
    /// failed write itself is never retried here.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut guard = self.inner.conn.lock().await;
        let result = match guard.as_mut() {
            Some(conn) => conn.write(bytes, self.inner.endpoint.timeout).await,
            None => Err(TransportError::Closed),
        };

        if let Err(ref err) = result {
            if !matches!(err, TransportError::Closed) {
                *guard = None;
                drop(guard);
                self.begin_reconnecting();
            }
        }

        result
    }

    /// True from the first write failure until a subsequent background
    /// reconnect succeeds.
    pub fn reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    /// Closes the client. Further writes fail with [`TransportError::Closed`].
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        *self.inner.conn.lock().await = None;
    }

    fn begin_reconnecting(&self) {
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // A reconnect task is already in flight.
            return;
        }
        self.spawn_reconnect_loop();
    }

    /// Spawns the background retry loop. Callers must have already set
    /// `reconnecting` to `true` (either via the compare-exchange in
    /// [`Self::begin_reconnecting`] or at construction time in
    /// [`Self::connect_or_reconnecting`]) before calling this.
    fn spawn_reconnect_loop(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONNECT_INTERVAL);
            loop {
                ticker.tick().await;
                if client.inner.closed.load(Ordering::Acquire) {
                    client.inner.reconnecting.store(false, Ordering::Release);
                    return;
                }
                match Conn::connect(&client.inner.endpoint).await {
                    Ok(conn) => {
                        *client.inner.conn.lock().await = Some(conn);
                        client.inner.reconnecting.store(false, Ordering::Release);
                        info!(message = "reconnected to sink", host = %client.inner.endpoint.host, port = client.inner.endpoint.port);
                        return;
                    }
                    Err(error) => {
                        warn!(message = "sink reconnect attempt failed", %error);
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for SinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkClient")
            .field("host", &self.inner.endpoint.host)
            .field("port", &self.inner.endpoint.port)
            .field("reconnecting", &self.reconnecting())
            .finish()
    }
}
