//! Request correlation.
//!
//! Every call gets a local, monotonically increasing request id (from 1)
//! and waits on a oneshot for its response.  The server does not echo the
//! id today, so an un-echoed response settles the **oldest** pending call.
//! A response that does echo `requestId` settles exactly that call.
//!
//! A call that times out is removed from the queue.  A late reply for it
//! will settle whichever call is oldest at that point; that is the price
//! of FIFO correlation and is not special-cased.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use st_protocol::{Command, CommandFrame, RequestId, Response};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("not connected to the tracker server")]
    NotConnected,
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("{verb} timed out after {after:?}")]
    Timeout { verb: &'static str, after: Duration },
    #[error("{0}")]
    Server(String),
    #[error("call abandoned: connection closed")]
    Closed,
    #[error("encode command: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode {verb} result: {source}")]
    Decode {
        verb: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CallError {
    /// The server's own error text, if this is a server-reported error.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            CallError::Server(message) => Some(message),
            _ => None,
        }
    }
}

/// Outbound half of the connection as seen by the correlator.
pub trait FrameSink: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
}

impl FrameSink for Transport {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        Transport::send_text(self, text)
    }

    fn is_connected(&self) -> bool {
        Transport::is_connected(self)
    }
}

/// Called with every failed call: the verb and the error.
pub type ErrorHook = Arc<dyn Fn(&'static str, &CallError) + Send + Sync>;

struct Pending {
    id: RequestId,
    verb: &'static str,
    tx: oneshot::Sender<Result<Response, CallError>>,
}

pub struct Correlator {
    sink: Arc<dyn FrameSink>,
    timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<VecDeque<Pending>>,
    error_hook: Mutex<Option<ErrorHook>>,
}

impl Correlator {
    pub fn new(sink: Arc<dyn FrameSink>, timeout: Duration) -> Self {
        Self {
            sink,
            timeout,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
            error_hook: Mutex::new(None),
        }
    }

    /// Install the global error hook, replacing any previous one.
    pub fn set_error_hook(&self, hook: ErrorHook) {
        *self.lock_hook() = Some(hook);
    }

    pub fn clear_error_hook(&self) {
        *self.lock_hook() = None;
    }

    /// Number of calls waiting for a response.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Send `command` and wait for its response.
    ///
    /// Resolves with the OK response, or rejects with the server's error
    /// text, a timeout, or a transport failure.  Every rejection is also
    /// reported to the error hook.
    pub async fn call(&self, command: Command) -> Result<Response, CallError> {
        let verb = command.verb();
        let result = self.call_inner(command).await;
        if let Err(e) = &result {
            self.report(verb, e);
        }
        result
    }

    async fn call_inner(&self, command: Command) -> Result<Response, CallError> {
        let verb = command.verb();
        if !self.sink.is_connected() {
            return Err(CallError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = CommandFrame::new(command, id)
            .to_json()
            .map_err(CallError::Encode)?;

        let (tx, mut rx) = oneshot::channel();
        self.lock_pending().push_back(Pending { id, verb, tx });
        debug!(request_id = id, verb, "sending command");

        if let Err(e) = self.sink.send_text(text) {
            self.remove(id);
            return Err(match e {
                TransportError::NotConnected => CallError::NotConnected,
                other => CallError::Transport(other),
            });
        }

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::Closed),
            Err(_elapsed) => {
                if self.remove(id) {
                    warn!(request_id = id, verb, "command timed out");
                    return Err(CallError::Timeout {
                        verb,
                        after: self.timeout,
                    });
                }
                // Settled between the deadline and taking the lock.
                rx.try_recv().unwrap_or(Err(CallError::Closed))
            }
        }
    }

    /// Settle a pending call with `response`.  Returns false when the
    /// response matched nothing and was dropped.
    pub fn resolve(&self, response: Response) -> bool {
        let entry = {
            let mut pending = self.lock_pending();
            match response.request_id {
                Some(id) => match pending.iter().position(|p| p.id == id) {
                    Some(index) => pending.remove(index),
                    None => {
                        warn!(request_id = id, "response for unknown request id dropped");
                        return false;
                    }
                },
                None => pending.pop_front(),
            }
        };

        let Some(entry) = entry else {
            warn!(status = ?response.status, "response with no pending request dropped");
            return false;
        };

        debug!(request_id = entry.id, verb = entry.verb, ok = response.is_ok(), "response");
        let result = if response.is_ok() {
            Ok(response)
        } else {
            let message = response
                .message
                .unwrap_or_else(|| "Unknown error".to_owned());
            Err(CallError::Server(message))
        };
        // The caller may have given up already; nothing to do then.
        let _ = entry.tx.send(result);
        true
    }

    /// Reject every pending call with [`CallError::Closed`].
    pub fn fail_all(&self) {
        let drained: Vec<Pending> = self.lock_pending().drain(..).collect();
        for entry in drained {
            let _ = entry.tx.send(Err(CallError::Closed));
        }
    }

    fn remove(&self, id: RequestId) -> bool {
        let mut pending = self.lock_pending();
        match pending.iter().position(|p| p.id == id) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    fn report(&self, verb: &'static str, error: &CallError) {
        let hook = self.lock_hook().clone();
        if let Some(hook) = hook {
            hook(verb, error);
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Pending>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_hook(&self) -> std::sync::MutexGuard<'_, Option<ErrorHook>> {
        self.error_hook
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
