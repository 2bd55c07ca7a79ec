use futures_util::{SinkExt, StreamExt};
use st_test_utils::MockWsServer;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracker::transport::{ConnectionState, Transport, TransportConfig, TransportError};

fn config(url: &str, max_attempts: u32) -> TransportConfig {
    TransportConfig {
        url: url.to_owned(),
        max_attempts,
        reconnect_delay: Duration::from_millis(30),
    }
}

async fn run_raw_ws_server_once<F, Fut>(handler: F) -> (std::net::SocketAddr, JoinHandle<()>)
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    (addr, task)
}

async fn join_server_task(task: JoinHandle<()>) {
    timeout(Duration::from_secs(2), task)
        .await
        .expect("server task timed out")
        .expect("server task panicked");
}

async fn wait_for_state(transport: &Transport, want: ConnectionState) {
    let mut rx = transport.subscribe_state();
    timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("state never became {want:?}"))
        .unwrap();
}

async fn wait_for_connections(server: &MockWsServer, n: usize) {
    timeout(Duration::from_secs(2), async {
        while server.connection_count() < n {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("server never saw {n} connections"));
}

#[tokio::test]
async fn reconnects_after_server_drops_the_connection() {
    let server = MockWsServer::start().await.unwrap();
    let (transport, mut inbound) = Transport::new(config(&server.url(), 3));

    transport.connect().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);
    // Welcome frame of the first link.
    let first = timeout(Duration::from_secs(2), inbound.recv()).await.unwrap();
    assert!(first.unwrap().contains("Welcome"));

    server.drop_connections();
    wait_for_connections(&server, 2).await;
    wait_for_state(&transport, ConnectionState::Connected).await;

    // The new link delivers into the same inbound channel.
    let second = timeout(Duration::from_secs(2), inbound.recv()).await.unwrap();
    assert!(second.unwrap().contains("Welcome"));
}

#[tokio::test]
async fn gives_up_after_max_attempts_until_connect_is_called() {
    let server = MockWsServer::start().await.unwrap();
    let (transport, _inbound) = Transport::new(config(&server.url(), 2));
    transport.connect().await.unwrap();

    server.shutdown();
    wait_for_state(&transport, ConnectionState::Disconnected).await;

    // Two attempts at 30ms each, with plenty of slack.
    sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    let result = transport.connect().await;
    assert!(matches!(result, Err(TransportError::Connect { .. })));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn zero_attempts_stays_down_until_explicit_connect() {
    let server = MockWsServer::start().await.unwrap();
    let (transport, _inbound) = Transport::new(config(&server.url(), 0));
    transport.connect().await.unwrap();

    server.drop_connections();
    wait_for_state(&transport, ConnectionState::Disconnected).await;
    sleep(Duration::from_millis(150)).await;
    assert_eq!(server.connection_count(), 1);

    transport.connect().await.unwrap();
    assert!(transport.is_connected());
    wait_for_connections(&server, 2).await;
}

#[tokio::test]
async fn clean_disconnect_never_reconnects() {
    let server = MockWsServer::start().await.unwrap();
    let (transport, _inbound) = Transport::new(config(&server.url(), 5));
    transport.connect().await.unwrap();

    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(matches!(
        transport.send_text("{}".to_owned()),
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn disconnect_cancels_a_pending_reconnect() {
    let server = MockWsServer::start().await.unwrap();
    let (transport, _inbound) = Transport::new(TransportConfig {
        url: server.url(),
        max_attempts: 5,
        reconnect_delay: Duration::from_millis(200),
    });
    transport.connect().await.unwrap();

    server.drop_connections();
    wait_for_state(&transport, ConnectionState::Disconnected).await;
    // Inside the reconnect delay.
    transport.disconnect();

    sleep(Duration::from_millis(400)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn inbound_text_frames_arrive_in_order() {
    let (addr, task) = run_raw_ws_server_once(|mut ws| async move {
        for text in ["one", "two", "three"] {
            ws.send(Message::Text(text.into())).await.unwrap();
        }
        // Binary frames are not part of the protocol and are skipped.
        ws.send(Message::Binary(vec![0xde, 0xad].into())).await.unwrap();
        ws.send(Message::Text("four".into())).await.unwrap();
        let _ = ws.next().await;
    })
    .await;

    let (transport, mut inbound) = Transport::new(config(&format!("ws://{addr}"), 0));
    transport.connect().await.unwrap();

    let mut got = Vec::new();
    for _ in 0..4 {
        let frame = timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        got.push(frame);
    }
    assert_eq!(got, ["one", "two", "three", "four"]);

    transport.disconnect();
    join_server_task(task).await;
}

#[tokio::test]
async fn answers_ping_with_pong() {
    let (addr, task) = run_raw_ws_server_once(|mut ws| async move {
        ws.send(Message::Ping(b"hb".to_vec().into())).await.unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Pong(data))) => {
                    assert_eq!(data.as_ref(), b"hb");
                    break;
                }
                Some(Ok(_)) => {}
                other => panic!("expected pong, got {other:?}"),
            }
        }
    })
    .await;

    let (transport, _inbound) = Transport::new(config(&format!("ws://{addr}"), 0));
    transport.connect().await.unwrap();

    join_server_task(task).await;
    transport.disconnect();
}

#[tokio::test]
async fn outbound_frames_reach_the_server() {
    let (addr, task) = run_raw_ws_server_once(|mut ws| async move {
        let msg = ws.next().await.unwrap().unwrap();
        assert_eq!(msg, Message::Text(r#"{"command":"LIST_GAMES","requestId":1}"#.into()));
    })
    .await;

    let (transport, _inbound) = Transport::new(config(&format!("ws://{addr}"), 0));
    transport.connect().await.unwrap();
    transport
        .send_text(r#"{"command":"LIST_GAMES","requestId":1}"#.to_owned())
        .unwrap();

    join_server_task(task).await;
    transport.disconnect();
}
