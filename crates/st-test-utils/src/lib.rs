// st-test-utils: Shared test utilities for the sports tracker client.
//
// Provides an in-memory tracker, plus a mock WebSocket server and client
// for integration testing of the tracker service.

pub mod fake_tracker;
pub mod mock_ws_client;
pub mod mock_ws_server;

pub use fake_tracker::{FakeTracker, Reply, notification_for};
pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;
