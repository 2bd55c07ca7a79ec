pub mod api;
pub mod client;
pub mod config;
pub mod correlator;
pub mod feed;
pub mod router;
pub mod timeline;
pub mod transport;
pub mod watch;

pub use client::Client;
pub use config::{ConfigError, TrackerConfig};
pub use correlator::CallError;
pub use feed::{FeedEntry, FeedKind};
pub use router::Subscription;
pub use timeline::{GameScorers, ScorerBoard, ScorerSummary, aggregate};
pub use transport::{ConnectionState, TransportError};
pub use watch::{WatchContext, WatchError, WatchState};
