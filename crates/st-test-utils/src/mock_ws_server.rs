// mock_ws_server: A mock tracker WebSocket server for testing clients.
//
// Accepts connections on ws://127.0.0.1:<port>, greets each client with an
// INFO frame, answers command frames through a shared `FakeTracker`, and
// broadcasts notifications to every connected client.  Tests can also push
// arbitrary frames, drop all connections, or shut the listener down to
// exercise reconnect behaviour.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use st_protocol::{CommandFrame, Inbound, Info, Notification, Push, Response};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::fake_tracker::FakeTracker;

#[derive(Debug, Clone)]
enum Control {
    /// Send this text frame to every client.
    Frame(String),
    /// Close every client connection.
    Drop,
}

struct Shared {
    tracker: Mutex<FakeTracker>,
    received: Mutex<Vec<CommandFrame>>,
    connections: AtomicUsize,
}

/// A mock tracker server for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port.  Each test
/// spins up its own isolated instance.
///
/// # Protocol behavior
///
/// - On connect the server sends `{"type":"INFO","message":"Welcome"}`.
/// - Every text frame must be a command frame; anything else gets an
///   `ERROR` response.
/// - Responses never echo `requestId` unless the tracker is told to.
/// - Notifications produced by a command go to every connected client,
///   after the command's response.
pub struct MockWsServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    control_tx: broadcast::Sender<Control>,
    task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    /// Start the mock server with an empty tracker.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with(FakeTracker::new()).await
    }

    /// Start the mock server around a pre-populated tracker.
    pub async fn start_with(tracker: FakeTracker) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            tracker: Mutex::new(tracker),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });
        let (control_tx, _) = broadcast::channel(64);

        let task = {
            let shared = Arc::clone(&shared);
            let control_tx = control_tx.clone();
            tokio::spawn(async move {
                Self::accept_loop(listener, shared, control_tx).await;
            })
        };

        Ok(Self {
            addr,
            shared,
            control_tx,
            task,
        })
    }

    /// Return the address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of WebSocket connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Every command frame received so far, in arrival order.
    pub fn received(&self) -> Vec<CommandFrame> {
        self.shared
            .received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Inspect or mutate the server-side tracker state.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&mut FakeTracker) -> R) -> R {
        let mut tracker = self
            .shared
            .tracker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut tracker)
    }

    /// Push a notification to every connected client.
    pub fn push(&self, notification: Notification) {
        if let Ok(text) = Inbound::from(notification).to_json() {
            self.push_raw(text);
        }
    }

    /// Send an unsolicited response frame (e.g. a late reply).
    pub fn push_response(&self, response: Response) {
        if let Ok(text) = Inbound::from(response).to_json() {
            self.push_raw(text);
        }
    }

    /// Push any text frame, valid or not, to every connected client.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.control_tx.send(Control::Frame(text.into()));
    }

    /// Close every live connection from the server side.  The listener keeps
    /// accepting, so clients may reconnect.
    pub fn drop_connections(&self) {
        let _ = self.control_tx.send(Control::Drop);
    }

    /// Stop accepting and close every live connection.
    pub fn shutdown(&self) {
        self.task.abort();
        self.drop_connections();
    }

    // -- internal --

    async fn accept_loop(
        listener: TcpListener,
        shared: Arc<Shared>,
        control_tx: broadcast::Sender<Control>,
    ) {
        while let Ok((stream, _peer)) = listener.accept().await {
            let control_rx = control_tx.subscribe();
            let shared = Arc::clone(&shared);
            let control_tx = control_tx.clone();
            tokio::spawn(async move {
                // In tests, connection errors are expected (e.g. client drops).
                let _ = Self::handle_connection(stream, shared, control_tx, control_rx).await;
            });
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        shared: Arc<Shared>,
        control_tx: broadcast::Sender<Control>,
        mut control_rx: broadcast::Receiver<Control>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        shared.connections.fetch_add(1, Ordering::SeqCst);
        let (mut write, mut read) = ws_stream.split();

        let welcome = Inbound::Push(Push::Info(Info {
            message: "Welcome".to_owned(),
        }));
        write.send(Message::Text(welcome.to_json()?.into())).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    let Some(msg) = msg else { break };
                    let text = match msg? {
                        Message::Text(t) => t,
                        Message::Close(_) => break,
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        _ => continue,
                    };

                    let reply = match CommandFrame::parse(&text) {
                        Ok(frame) => {
                            if let Ok(mut received) = shared.received.lock() {
                                received.push(frame.clone());
                            }
                            let mut tracker = shared
                                .tracker
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            tracker.handle(&frame)
                        }
                        Err(e) => crate::fake_tracker::Reply {
                            response: Some(Response::error(format!("Invalid command: {e}"))),
                            pushes: Vec::new(),
                        },
                    };

                    if let Some(response) = reply.response {
                        let json = Inbound::from(response).to_json()?;
                        write.send(Message::Text(json.into())).await?;
                    }
                    for notification in reply.pushes {
                        let json = Inbound::from(notification).to_json()?;
                        let _ = control_tx.send(Control::Frame(json));
                    }
                }
                control = control_rx.recv() => match control {
                    Ok(Control::Frame(text)) => {
                        write.send(Message::Text(text.into())).await?;
                    }
                    Ok(Control::Drop) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        Ok(())
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
