//! Request routing between connections and the store.
//!
//! In [`DispatchMode::Dispatcher`] mode a single task owns the submission
//! path. Connections send a [`Request`] over a bounded channel and wait on
//! the request's own one-shot reply slot, so a reply can never reach the
//! wrong connection no matter how submissions interleave. Requests are
//! applied one at a time in the order the dispatcher receives them.
//!
//! In [`DispatchMode::Direct`] mode connection tasks apply operations
//! themselves and the store's reader/writer lock is the only serialization.

use crate::config::DispatchMode;
use crate::protocol::Command;
use crate::store::Store;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Result of applying a command to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Current value of the requested key
    Value(Bytes),
    /// The requested key is not present
    Absent,
    /// SET or DELETE was applied
    Done,
}

/// A command submitted to the dispatcher together with its reply slot
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub reply: oneshot::Sender<Reply>,
}

/// Routing errors. These end the connection that saw them, never the server.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterError {
    /// The dispatcher task is gone and no longer accepts requests
    DispatcherClosed,
    /// The dispatcher dropped the request without replying
    ReplyDropped,
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::DispatcherClosed => write!(f, "Dispatcher is not accepting requests"),
            RouterError::ReplyDropped => write!(f, "Dispatcher dropped the request"),
        }
    }
}

impl std::error::Error for RouterError {}

/// Apply one command to the store. Every command produces a reply.
pub fn apply(store: &Store, command: Command) -> Reply {
    match command {
        Command::Get { key } => match store.get(&key) {
            Some(value) => Reply::Value(value),
            None => Reply::Absent,
        },
        Command::Set { key, value } => {
            store.set(key, value);
            Reply::Done
        }
        Command::Delete { key } => {
            store.delete(&key);
            Reply::Done
        }
    }
}

/// Cloneable handle that connections use to execute commands
#[derive(Debug, Clone)]
pub enum Router {
    Dispatcher(mpsc::Sender<Request>),
    Direct(Arc<Store>),
}

impl Router {
    /// Build a router for `store`.
    ///
    /// In dispatcher mode this spawns the dispatch task onto the current
    /// tokio runtime and returns its handle. The task ends once every clone
    /// of the returned router is dropped.
    pub fn new(
        store: Arc<Store>,
        mode: DispatchMode,
        queue_depth: usize,
    ) -> (Self, Option<JoinHandle<()>>) {
        match mode {
            DispatchMode::Dispatcher => {
                let (tx, rx) = mpsc::channel(queue_depth.max(1));
                let handle = tokio::spawn(dispatch_loop(store, rx));
                (Router::Dispatcher(tx), Some(handle))
            }
            DispatchMode::Direct => (Router::Direct(store), None),
        }
    }

    /// Execute a command and wait for its reply
    pub async fn execute(&self, command: Command) -> Result<Reply, RouterError> {
        match self {
            Router::Dispatcher(tx) => {
                let (reply, response) = oneshot::channel();
                tx.send(Request { command, reply })
                    .await
                    .map_err(|_| RouterError::DispatcherClosed)?;
                response.await.map_err(|_| RouterError::ReplyDropped)
            }
            Router::Direct(store) => Ok(apply(store, command)),
        }
    }
}

/// Receive requests from all connections and apply them in arrival order
async fn dispatch_loop(store: Arc<Store>, mut requests: mpsc::Receiver<Request>) {
    debug!("Dispatcher started");

    while let Some(Request { command, reply }) = requests.recv().await {
        trace!(?command, "Dispatching command");
        let result = apply(&store, command);

        // The requester may have disconnected while waiting
        if reply.send(result).is_err() {
            trace!("Requester went away before reply");
        }
    }

    debug!(items = store.len(), "Dispatcher stopped");
}
