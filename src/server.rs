//! TCP server for handling client connections.
//!
//! Each accepted connection runs in its own task: read a batch, parse each
//! command, execute it through the [`Router`], write the replies back. The
//! number of live connections is capped by a semaphore; accepting waits for
//! a free slot.

use crate::config::Config;
use crate::protocol::{parse, split_commands, Response};
use crate::router::{Reply, Router, RouterError};
use crate::store::Store;
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Per-connection I/O deadlines. `None` waits forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeouts {
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    store: Arc<Store>,
    router: Router,
    connection_limit: Arc<Semaphore>,
    timeouts: Timeouts,
}

impl Server {
    /// Bind the listener and start the dispatcher
    pub async fn bind(config: Config) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        let store = Store::new();
        // The dispatcher task detaches and ends with the last router clone
        let (router, _dispatcher) =
            Router::new(Arc::clone(&store), config.dispatch, config.queue_depth);

        info!(
            address = %listener.local_addr()?,
            dispatch = ?config.dispatch,
            "Server listening"
        );

        Ok(Server {
            listener,
            store,
            router,
            connection_limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
            timeouts: Timeouts {
                read: config.read_timeout,
                write: config.write_timeout,
            },
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a reference to the store for testing
    #[cfg(test)]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// A failed accept is fatal and returned to the caller. Connections that
    /// are already running keep their tasks after shutdown.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            store,
            router,
            connection_limit,
            timeouts,
        } = self;
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&connection_limit).acquire_owned() => permit?,
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        return Err(e.into());
                    }
                },
            };

            debug!(peer = %peer, "New connection");
            let router = router.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, router, timeouts).await {
                    warn!(peer = %peer, error = %e, "Connection error");
                }
                debug!(peer = %peer, "Connection closed");
                drop(permit);
            });
        }

        info!(items = store.len(), "Server shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

/// Handle a single client connection
pub async fn handle_connection<S>(
    mut stream: S,
    router: Router,
    timeouts: Timeouts,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut output = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        buffer.reserve(BUFFER_SIZE);

        let n = match with_deadline(timeouts.read, stream.read_buf(&mut buffer)).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!("Read timeout, closing connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            // Connection closed
            trace!("Connection closed by client");
            return Ok(());
        }

        // Each read is one batch of commands
        let batch = buffer.split().freeze();
        process_batch(&batch, &router, &mut output).await?;

        with_deadline(timeouts.write, stream.write_all(&output)).await?;
        output.clear();
    }
}

/// Execute every command in `batch` in order, appending one reply line per
/// command to `output`
async fn process_batch(
    batch: &Bytes,
    router: &Router,
    output: &mut BytesMut,
) -> Result<(), RouterError> {
    for segment in split_commands(batch) {
        match parse(&segment) {
            Ok(command) => {
                trace!(?command, "Processing command");
                match router.execute(command).await? {
                    Reply::Value(value) => output.extend_from_slice(&value),
                    Reply::Absent => output.extend_from_slice(Response::nil()),
                    Reply::Done => output.extend_from_slice(Response::ok()),
                }
            }
            Err(e) => {
                debug!(error = %e, "Parse error");
                output.extend_from_slice(Response::unknown_command());
            }
        }
        output.extend_from_slice(Response::terminator());
    }

    Ok(())
}

/// Run an I/O future, failing with `TimedOut` if `limit` elapses first
async fn with_deadline<F, T>(limit: Option<Duration>, op: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "I/O deadline elapsed"))?,
        None => op.await,
    }
}
