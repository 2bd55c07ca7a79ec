//! Tracker WebSocket transport.
//!
//! Owns the single persistent connection to the tracker server.  Inbound
//! text frames are forwarded, in arrival order, into one unbounded channel
//! consumed by the dispatch loop.  Outbound frames go through a per-link
//! writer task so that [`Transport::send_text`] never blocks.
//!
//! # Reconnect policy
//! An unexpected close schedules a reconnect after a fixed delay.  Each
//! failed attempt counts once and schedules the next; after
//! `max_attempts` failures the transport stays `Disconnected` until
//! [`Transport::connect`] is called again.  [`Transport::disconnect`]
//! never reconnects and cancels any pending attempt.
//!
//! Every link carries a generation number.  Readers, writers and reconnect
//! loops check it before touching shared state, so a stale task from an
//! earlier link cannot flip the state of the current one.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Connection state published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL, e.g. `ws://localhost:8888`.
    pub url: String,
    /// Reconnect attempts after an unexpected close before giving up.
    pub max_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("not connected")]
    NotConnected,
    #[error("connection superseded by a newer connect or disconnect")]
    Superseded,
}

struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

struct Inner {
    config: TransportConfig,
    generation: AtomicU64,
    attempts: AtomicU32,
    link: Mutex<Option<Link>>,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<String>,
}

/// Handle to the shared transport.  Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create a disconnected transport.  The returned receiver yields every
    /// inbound text frame from every link, in arrival order.
    pub fn new(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(Inner {
            config,
            generation: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
            link: Mutex::new(None),
            state_tx,
            inbound_tx,
        });
        (Self { inner }, inbound_rx)
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Open a new link, replacing any existing one and cancelling a pending
    /// reconnect.  Resets the reconnect-attempt counter on success.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop_link(&self.inner);
        open_link(&self.inner, generation).await
    }

    /// Close the link without reconnecting.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        drop_link(&self.inner);
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        info!(url = %self.inner.config.url, "disconnected");
    }

    /// Queue one text frame on the current link.  Fails fast when not
    /// connected; nothing is buffered across links.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let link = self
            .inner
            .link
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let link = link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::NotConnected)
    }
}

fn is_current(inner: &Inner, generation: u64) -> bool {
    inner.generation.load(Ordering::SeqCst) == generation
}

fn drop_link(inner: &Inner) {
    let old = inner
        .link
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(link) = old {
        debug!(generation = link.generation, "closing link");
        // Dropping the sender lets the writer send Close and finish.
        drop(link.outbound);
        link.reader.abort();
    }
}

async fn open_link(inner: &Arc<Inner>, generation: u64) -> Result<(), TransportError> {
    let url = inner.config.url.clone();
    inner.state_tx.send_replace(ConnectionState::Connecting);
    info!(url = %url, generation, "connecting");

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(source) => {
            if is_current(inner, generation) {
                inner.state_tx.send_replace(ConnectionState::Disconnected);
            }
            warn!(url = %url, error = %source, "connect failed");
            return Err(TransportError::Connect { url, source });
        }
    };

    let mut slot = inner
        .link
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if !is_current(inner, generation) {
        debug!(generation, "discarding stale connect result");
        return Err(TransportError::Superseded);
    }

    let (write, read) = ws.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(write, outbound_rx));
    let reader = spawn_reader(Arc::clone(inner), generation, read, outbound_tx.clone());
    *slot = Some(Link {
        generation,
        outbound: outbound_tx,
        reader,
    });
    // Published under the slot lock so a reader that closes immediately
    // cannot be overwritten by a late Connected.
    inner.attempts.store(0, Ordering::SeqCst);
    inner.state_tx.send_replace(ConnectionState::Connected);
    drop(slot);

    info!(url = %url, generation, "connected");
    Ok(())
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn write_loop(
    mut write: futures_util::stream::SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = write.send(msg).await {
            debug!(error = %e, "write failed");
            return;
        }
    }
    let _ = write.send(Message::Close(None)).await;
    let _ = write.close().await;
}

fn spawn_reader(
    inner: Arc<Inner>,
    generation: u64,
    mut read: futures_util::stream::SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read.next().await {
                None => break,
                Some(Err(e)) => {
                    warn!(error = %e, generation, "read failed");
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    if !is_current(&inner, generation) {
                        break;
                    }
                    let _ = inner.inbound_tx.send(text.as_str().to_owned());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = outbound.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
        link_closed(&inner, generation);
    })
}

fn link_closed(inner: &Arc<Inner>, generation: u64) {
    if !is_current(inner, generation) {
        debug!(generation, "ignoring close of stale link");
        return;
    }
    {
        let mut slot = inner
            .link
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !is_current(inner, generation) {
            return;
        }
        if slot.as_ref().is_some_and(|l| l.generation == generation) {
            *slot = None;
        }
        inner.state_tx.send_replace(ConnectionState::Disconnected);
    }
    warn!(url = %inner.config.url, "connection closed unexpectedly");
    tokio::spawn(reconnect_loop(Arc::clone(inner), generation));
}

async fn reconnect_loop(inner: Arc<Inner>, mut generation: u64) {
    loop {
        let attempt = inner.attempts.load(Ordering::SeqCst);
        if attempt >= inner.config.max_attempts {
            warn!(
                attempts = attempt,
                "max reconnect attempts reached; staying disconnected"
            );
            return;
        }
        tokio::time::sleep(inner.config.reconnect_delay).await;

        // A connect() or disconnect() during the delay owns the link now.
        let next = generation + 1;
        if inner
            .generation
            .compare_exchange(generation, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(generation, "reconnect cancelled");
            return;
        }
        generation = next;

        let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            attempt,
            max = inner.config.max_attempts,
            "reconnecting"
        );
        match open_link(&inner, generation).await {
            Ok(()) => return,
            Err(TransportError::Superseded) => return,
            Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> TransportConfig {
        TransportConfig {
            url: url.to_owned(),
            max_attempts: 2,
            reconnect_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn send_before_connect_fails_fast() {
        let (transport, _rx) = Transport::new(config("ws://127.0.0.1:1"));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(matches!(
            transport.send_text("{}".to_owned()),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_failure_rejects_and_stays_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (transport, _rx) = Transport::new(config(&format!("ws://{addr}")));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_without_link_is_harmless() {
        let (transport, _rx) = Transport::new(config("ws://127.0.0.1:1"));
        transport.disconnect();
        transport.disconnect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }
}
