//! Tracker client: transport, correlator and router wired to one dispatch
//! task.
//!
//! The dispatch task is the only consumer of inbound frames.  It handles
//! them strictly in arrival order and finishes delivering a notification to
//! every handler before it looks at the next frame.
//!
//! When the link drops, the dispatch task first handles every frame read
//! before the close, then rejects the calls still pending.  A reply on the
//! next link can never settle a call sent on the previous one.

use std::sync::Arc;

use st_protocol::{Command, Inbound, Notification, Push, Response};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::correlator::{CallError, Correlator, ErrorHook};
use crate::router::{Router, Subscription};
use crate::transport::{ConnectionState, Transport, TransportError};

/// What the dispatch loop did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Settled a pending call.
    Resolved,
    /// A response that matched no pending call.
    Unmatched,
    Notification,
    Info,
    Malformed,
}

/// Classify one inbound frame and hand it to the correlator or router.
pub fn dispatch_frame(text: &str, correlator: &Correlator, router: &Router) -> Dispatched {
    match Inbound::parse(text) {
        Ok(Inbound::Push(Push::Notification(notification))) => {
            router.dispatch(&notification);
            Dispatched::Notification
        }
        Ok(Inbound::Push(Push::Info(info))) => {
            info!(message = %info.message, "server info");
            Dispatched::Info
        }
        Ok(Inbound::Response(response)) => {
            if correlator.resolve(response) {
                Dispatched::Resolved
            } else {
                Dispatched::Unmatched
            }
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            Dispatched::Malformed
        }
    }
}

async fn dispatch_loop(
    mut inbound: mpsc::UnboundedReceiver<String>,
    mut state: watch::Receiver<ConnectionState>,
    correlator: Arc<Correlator>,
    router: Router,
) {
    loop {
        tokio::select! {
            biased;
            frame = inbound.recv() => {
                let Some(text) = frame else { break };
                let outcome = dispatch_frame(&text, &correlator, &router);
                debug!(?outcome, "dispatched frame");
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() != ConnectionState::Disconnected {
                    continue;
                }
                // The reader queues every frame before publishing the close.
                while let Ok(text) = inbound.try_recv() {
                    dispatch_frame(&text, &correlator, &router);
                }
                let pending = correlator.pending_len();
                if pending > 0 {
                    warn!(pending, "connection lost; failing pending calls");
                    correlator.fail_all();
                }
            }
        }
    }
    debug!("dispatch loop finished");
}

struct Inner {
    transport: Transport,
    correlator: Arc<Correlator>,
    router: Router,
    dispatch: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispatch.abort();
        self.transport.disconnect();
        self.correlator.fail_all();
    }
}

/// Handle to one tracker session.  Cheap to clone; the session ends when
/// the last clone is dropped or [`Client::shutdown`] is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Build a disconnected client and start its dispatch task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: &TrackerConfig) -> Self {
        let (transport, inbound) = Transport::new(config.transport());
        let correlator = Arc::new(Correlator::new(
            Arc::new(transport.clone()),
            config.call_timeout(),
        ));
        let router = Router::new();
        let dispatch = tokio::spawn(dispatch_loop(
            inbound,
            transport.subscribe_state(),
            Arc::clone(&correlator),
            router.clone(),
        ));
        Self {
            inner: Arc::new(Inner {
                transport,
                correlator,
                router,
                dispatch,
            }),
        }
    }

    /// Build a client and open its connection.
    pub async fn connect(config: &TrackerConfig) -> Result<Self, TransportError> {
        let client = Self::new(config);
        client.inner.transport.connect().await?;
        Ok(client)
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Issue one command and wait for its response.
    pub async fn call(&self, command: Command) -> Result<Response, CallError> {
        self.inner.correlator.call(command).await
    }

    /// Register a notification handler.
    #[must_use = "keep the subscription to be able to unsubscribe"]
    pub fn on_notification(
        &self,
        handler: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.router.subscribe(handler)
    }

    /// Install the global error hook that sees every failed call.
    pub fn set_error_hook(&self, hook: impl Fn(&'static str, &CallError) + Send + Sync + 'static) {
        let hook: ErrorHook = Arc::new(hook);
        self.inner.correlator.set_error_hook(hook);
    }

    pub fn clear_error_hook(&self) {
        self.inner.correlator.clear_error_hook();
    }

    /// Disconnect without reconnecting and reject every pending call.
    pub fn shutdown(&self) {
        self.inner.transport.disconnect();
        self.inner.correlator.fail_all();
    }
}
