//! Watch state and the live notification feed.
//!
//! [`WatchContext`] keeps the client's view of what is watched consistent
//! with what the server has confirmed.  State only changes after a
//! successful round trip; a failed command leaves it untouched.
//!
//! Watching a cup watches its games too.  Every game watched that way is
//! recorded in `auto_watched` with the owning cup, so unwatching the cup
//! removes exactly those games and never a game the user watched directly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};

use st_protocol::{CupId, GameId, GameState, Notification, Score, WatchedGame};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::client::Client;
use crate::correlator::CallError;
use crate::feed::{Feed, FeedEntry, FeedKind};
use crate::router::{Router, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("game {game_id} is watched through cup {cup_id}; unwatch the cup instead")]
    AutoWatched { game_id: GameId, cup_id: CupId },
}

// ---------------------------------------------------------------------------
// WatchState
// ---------------------------------------------------------------------------

/// Confirmed watch state.
///
/// Invariant: every key of `auto_watched` is also in `watched_games`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchState {
    pub watched_games: BTreeSet<GameId>,
    pub watched_cups: BTreeSet<CupId>,
    /// Game -> the cup it is watched through.
    pub auto_watched: BTreeMap<GameId, CupId>,
    /// Games each watched cup reported when it was watched here.  Empty
    /// after [`WatchState::from_server`]; the server does not report it.
    pub cup_games: BTreeMap<CupId, BTreeSet<GameId>>,
}

impl WatchState {
    /// Rebuild from the server's report.  Provenance comes only from the
    /// server's `cup_id` fields.
    pub fn from_server(games: &[WatchedGame], cups: &[CupId]) -> Self {
        let mut state = Self::default();
        for game in games {
            state.watched_games.insert(game.game_id);
            if let Some(cup_id) = game.cup_id {
                state.auto_watched.insert(game.game_id, cup_id);
            }
        }
        state.watched_cups.extend(cups.iter().copied());
        state
    }

    pub fn is_watching(&self, game_id: GameId) -> bool {
        self.watched_games.contains(&game_id)
    }

    pub fn is_cup_watched(&self, cup_id: CupId) -> bool {
        self.watched_cups.contains(&cup_id)
    }

    /// The cup a game is watched through, if any.
    pub fn owning_cup(&self, game_id: GameId) -> Option<CupId> {
        self.auto_watched.get(&game_id).copied()
    }

    /// Whether a notification for `game_id` belongs in the feed.
    ///
    /// Any watched cup currently widens this to every game.
    pub fn accepts(&self, game_id: GameId) -> bool {
        self.watched_games.contains(&game_id) || !self.watched_cups.is_empty()
    }

    /// Reject unwatching a game that is held by a still-watched cup.
    pub fn check_unwatch(&self, game_id: GameId) -> Result<(), WatchError> {
        match self.auto_watched.get(&game_id) {
            Some(&cup_id) if self.watched_cups.contains(&cup_id) => {
                Err(WatchError::AutoWatched { game_id, cup_id })
            }
            _ => Ok(()),
        }
    }

    /// A direct watch.  A game previously held by a cup becomes direct.
    pub fn apply_watch_game(&mut self, game_id: GameId) {
        self.watched_games.insert(game_id);
        self.auto_watched.remove(&game_id);
    }

    pub fn apply_unwatch_game(&mut self, game_id: GameId) {
        self.watched_games.remove(&game_id);
        self.auto_watched.remove(&game_id);
    }

    /// Record a confirmed cup watch.  Every reported game is now held by
    /// this cup, unless the user watches it directly.
    pub fn apply_watch_cup(&mut self, cup_id: CupId, auto_watched: &[GameId]) {
        self.watched_cups.insert(cup_id);
        for &game_id in auto_watched {
            let direct = self.watched_games.contains(&game_id)
                && !self.auto_watched.contains_key(&game_id);
            if direct {
                continue;
            }
            self.watched_games.insert(game_id);
            self.auto_watched.insert(game_id, cup_id);
        }
        self.cup_games
            .entry(cup_id)
            .or_default()
            .extend(auto_watched.iter().copied());
    }

    /// Record a confirmed cup unwatch.  Games the cup held pass to another
    /// watched cup that reported them; the rest are dropped and returned.
    pub fn apply_unwatch_cup(&mut self, cup_id: CupId) -> Vec<GameId> {
        self.watched_cups.remove(&cup_id);
        self.cup_games.remove(&cup_id);
        let held: Vec<GameId> = self
            .auto_watched
            .iter()
            .filter(|&(_, &owner)| owner == cup_id)
            .map(|(&game_id, _)| game_id)
            .collect();
        let mut removed = Vec::new();
        for game_id in held {
            let heir = self
                .cup_games
                .iter()
                .find(|(cup, games)| self.watched_cups.contains(cup) && games.contains(&game_id))
                .map(|(&cup, _)| cup);
            match heir {
                Some(heir) => {
                    self.auto_watched.insert(game_id, heir);
                }
                None => {
                    self.auto_watched.remove(&game_id);
                    self.watched_games.remove(&game_id);
                    removed.push(game_id);
                }
            }
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// The watch verbs a [`WatchContext`] needs from the server.
pub trait WatchBackend: Send + Sync {
    fn watch_game(&self, game_id: GameId) -> impl Future<Output = Result<(), CallError>> + Send;
    fn unwatch_game(&self, game_id: GameId) -> impl Future<Output = Result<(), CallError>> + Send;
    fn watch_cup(&self, cup_id: CupId)
    -> impl Future<Output = Result<Vec<GameId>, CallError>> + Send;
    fn unwatch_cup(
        &self,
        cup_id: CupId,
    ) -> impl Future<Output = Result<Vec<GameId>, CallError>> + Send;
    fn watched_games(&self) -> impl Future<Output = Result<Vec<WatchedGame>, CallError>> + Send;
    fn watched_cups(&self) -> impl Future<Output = Result<Vec<CupId>, CallError>> + Send;
}

impl WatchBackend for Client {
    fn watch_game(&self, game_id: GameId) -> impl Future<Output = Result<(), CallError>> + Send {
        Client::watch_game(self, game_id)
    }

    fn unwatch_game(&self, game_id: GameId) -> impl Future<Output = Result<(), CallError>> + Send {
        Client::unwatch_game(self, game_id)
    }

    fn watch_cup(
        &self,
        cup_id: CupId,
    ) -> impl Future<Output = Result<Vec<GameId>, CallError>> + Send {
        Client::watch_cup(self, cup_id)
    }

    fn unwatch_cup(
        &self,
        cup_id: CupId,
    ) -> impl Future<Output = Result<Vec<GameId>, CallError>> + Send {
        Client::unwatch_cup(self, cup_id)
    }

    fn watched_games(&self) -> impl Future<Output = Result<Vec<WatchedGame>, CallError>> + Send {
        Client::watched_games(self)
    }

    fn watched_cups(&self) -> impl Future<Output = Result<Vec<CupId>, CallError>> + Send {
        Client::watched_cups(self)
    }
}

// ---------------------------------------------------------------------------
// WatchContext
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tracked {
    state: WatchState,
    feed: Feed,
    /// Last score/state seen per game, to describe what changed.
    last_seen: HashMap<GameId, (Score, GameState)>,
    closed: bool,
}

struct Shared {
    tracked: Mutex<Tracked>,
    updates: broadcast::Sender<FeedEntry>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.tracked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn on_notification(&self, notification: &Notification) -> Option<FeedEntry> {
        let entry = {
            let mut tracked = self.lock();
            if tracked.closed {
                return None;
            }
            if !tracked.state.accepts(notification.game_id) {
                tracked.last_seen.remove(&notification.game_id);
                debug!(game_id = notification.game_id, "notification not watched");
                return None;
            }
            let previous = tracked.last_seen.insert(
                notification.game_id,
                (notification.score, notification.state),
            );
            let (kind, message) = describe(previous, notification);
            tracked.feed.push(notification.game_id, kind, message)
        };
        // No receivers is fine.
        let _ = self.updates.send(entry.clone());
        Some(entry)
    }
}

/// Human-readable feed text for `n`, given the previous score and state.
fn describe(previous: Option<(Score, GameState)>, n: &Notification) -> (FeedKind, String) {
    let teams = format!("{} vs {}", n.home, n.away);
    match previous {
        Some((_, old_state)) if old_state != n.state => (
            FeedKind::State,
            format!("{teams}: game state changed from {old_state} to {}", n.state),
        ),
        Some((old, _)) if old != n.score => {
            let what = if n.score.home > old.home {
                "Home team scored!"
            } else if n.score.away > old.away {
                "Away team scored!"
            } else {
                "Score corrected."
            };
            (
                FeedKind::Score,
                format!(
                    "{teams}: {what} New score: {} - {}",
                    n.score.home, n.score.away
                ),
            )
        }
        _ => (
            FeedKind::Update,
            format!(
                "{teams}: {} - {} ({})",
                n.score.home, n.score.away, n.state
            ),
        ),
    }
}

/// Owned watch state, feed and notification subscription for one session.
pub struct WatchContext<B> {
    backend: B,
    shared: Arc<Shared>,
    /// Held across each mutation's round trip.
    mutation: tokio::sync::Mutex<()>,
    subscription: Mutex<Option<Subscription>>,
}

impl<B: WatchBackend> WatchContext<B> {
    /// Create an empty context and start receiving notifications from
    /// `router`.
    pub fn new(backend: B, router: &Router) -> Self {
        let (updates, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            tracked: Mutex::new(Tracked::default()),
            updates,
        });
        let subscription = router.subscribe({
            let shared = Arc::clone(&shared);
            move |n| {
                shared.on_notification(n);
            }
        });
        Self {
            backend,
            shared,
            mutation: tokio::sync::Mutex::new(()),
            subscription: Mutex::new(Some(subscription)),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // -- mutations --

    /// Replace local state with the server's.
    pub async fn load(&self) -> Result<(), WatchError> {
        let _guard = self.mutation.lock().await;
        let games = self.backend.watched_games().await?;
        let cups = self.backend.watched_cups().await?;
        let state = WatchState::from_server(&games, &cups);
        info!(
            games = state.watched_games.len(),
            cups = state.watched_cups.len(),
            auto = state.auto_watched.len(),
            "watch state loaded"
        );
        let mut tracked = self.shared.lock();
        tracked.last_seen.retain(|&game_id, _| state.accepts(game_id));
        tracked.state = state;
        Ok(())
    }

    pub async fn watch_game(&self, game_id: GameId) -> Result<(), WatchError> {
        let _guard = self.mutation.lock().await;
        self.watch_game_locked(game_id).await
    }

    /// Stop watching a game.  Refused without contacting the server when
    /// the game is held by a watched cup.
    pub async fn unwatch_game(&self, game_id: GameId) -> Result<(), WatchError> {
        let _guard = self.mutation.lock().await;
        self.unwatch_game_locked(game_id).await
    }

    /// Watch the game if it is not watched, otherwise unwatch it.  Returns
    /// whether the game is watched afterwards.
    pub async fn toggle_game(&self, game_id: GameId) -> Result<bool, WatchError> {
        let _guard = self.mutation.lock().await;
        if self.is_watching(game_id) {
            self.unwatch_game_locked(game_id).await?;
            Ok(false)
        } else {
            self.watch_game_locked(game_id).await?;
            Ok(true)
        }
    }

    // Callers hold `self.mutation`.
    async fn watch_game_locked(&self, game_id: GameId) -> Result<(), WatchError> {
        self.backend.watch_game(game_id).await?;
        self.shared.lock().state.apply_watch_game(game_id);
        debug!(game_id, "watching game");
        Ok(())
    }

    async fn unwatch_game_locked(&self, game_id: GameId) -> Result<(), WatchError> {
        self.shared.lock().state.check_unwatch(game_id)?;
        self.backend.unwatch_game(game_id).await?;
        self.shared.lock().state.apply_unwatch_game(game_id);
        debug!(game_id, "unwatched game");
        Ok(())
    }

    /// Watch a cup.  Returns the games now watched through it.
    pub async fn watch_cup(&self, cup_id: CupId) -> Result<Vec<GameId>, WatchError> {
        let _guard = self.mutation.lock().await;
        let auto_watched = self.backend.watch_cup(cup_id).await?;
        self.shared
            .lock()
            .state
            .apply_watch_cup(cup_id, &auto_watched);
        debug!(cup_id, games = auto_watched.len(), "watching cup");
        Ok(auto_watched)
    }

    /// Unwatch a cup.  Returns the games dropped with it.
    pub async fn unwatch_cup(&self, cup_id: CupId) -> Result<Vec<GameId>, WatchError> {
        let _guard = self.mutation.lock().await;
        let reported = self.backend.unwatch_cup(cup_id).await?;
        let removed = self.shared.lock().state.apply_unwatch_cup(cup_id);
        debug!(cup_id, removed = removed.len(), reported = reported.len(), "unwatched cup");
        Ok(removed)
    }

    // -- queries --

    pub fn state(&self) -> WatchState {
        self.shared.lock().state.clone()
    }

    pub fn is_watching(&self, game_id: GameId) -> bool {
        self.shared.lock().state.is_watching(game_id)
    }

    pub fn is_cup_watched(&self, cup_id: CupId) -> bool {
        self.shared.lock().state.is_cup_watched(cup_id)
    }

    pub fn owning_cup(&self, game_id: GameId) -> Option<CupId> {
        self.shared.lock().state.owning_cup(game_id)
    }

    // -- feed --

    /// Feed entries, newest first.
    pub fn feed(&self) -> Vec<FeedEntry> {
        self.shared.lock().feed.entries()
    }

    pub fn clear_feed(&self) {
        self.shared.lock().feed.clear();
    }

    pub fn remove_feed_entry(&self, id: u64) -> bool {
        self.shared.lock().feed.remove(id)
    }

    /// Receive every entry as it is added to the feed.
    pub fn feed_updates(&self) -> broadcast::Receiver<FeedEntry> {
        self.shared.updates.subscribe()
    }

    /// Feed a notification in directly.  Returns the new entry if it was
    /// accepted.
    pub fn handle_notification(&self, notification: &Notification) -> Option<FeedEntry> {
        self.shared.on_notification(notification)
    }

    /// Stop receiving notifications.  State and feed stay readable.
    pub fn close(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        let mut tracked = self.shared.lock();
        tracked.closed = true;
        tracked.last_seen.clear();
    }
}

impl<B> Drop for WatchContext<B> {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backend.  Records every verb it receives.
    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        cup_games: HashMap<CupId, Vec<GameId>>,
        server_games: Vec<WatchedGame>,
        server_cups: Vec<CupId>,
        fail: Mutex<Option<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeBackend {
        fn with_cup(cup_id: CupId, games: &[GameId]) -> Self {
            let mut backend = Self::default();
            backend.cup_games.insert(cup_id, games.to_vec());
            backend
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn fail_next(&self, message: &str) {
            *self.fail.lock().unwrap() = Some(message.to_owned());
        }

        async fn round_trip(&self, verb: String) -> Result<(), CallError> {
            self.calls.lock().unwrap().push(verb);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.fail.lock().unwrap().take() {
                Some(message) => Err(CallError::Server(message)),
                None => Ok(()),
            }
        }
    }

    impl WatchBackend for FakeBackend {
        async fn watch_game(&self, game_id: GameId) -> Result<(), CallError> {
            self.round_trip(format!("WATCH {game_id}")).await
        }

        async fn unwatch_game(&self, game_id: GameId) -> Result<(), CallError> {
            self.round_trip(format!("UNWATCH {game_id}")).await
        }

        async fn watch_cup(&self, cup_id: CupId) -> Result<Vec<GameId>, CallError> {
            self.round_trip(format!("WATCH_CUP {cup_id}")).await?;
            Ok(self.cup_games.get(&cup_id).cloned().unwrap_or_default())
        }

        async fn unwatch_cup(&self, cup_id: CupId) -> Result<Vec<GameId>, CallError> {
            self.round_trip(format!("UNWATCH_CUP {cup_id}")).await?;
            Ok(Vec::new())
        }

        async fn watched_games(&self) -> Result<Vec<WatchedGame>, CallError> {
            self.round_trip("WATCHED_GAMES".to_owned()).await?;
            Ok(self.server_games.clone())
        }

        async fn watched_cups(&self) -> Result<Vec<CupId>, CallError> {
            self.round_trip("WATCHED_CUPS".to_owned()).await?;
            Ok(self.server_cups.clone())
        }
    }

    fn note(game_id: GameId, home: u32, away: u32, state: GameState) -> Notification {
        Notification {
            game_id,
            home: "Lions".to_owned(),
            away: "Tigers".to_owned(),
            score: Score { home, away },
            state,
        }
    }

    #[tokio::test]
    async fn cup_watch_then_unwatch_restores_state() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(7, &[1, 2, 3]), &router);
        ctx.watch_game(2).await.unwrap();
        let before = ctx.state();

        ctx.watch_cup(7).await.unwrap();
        assert!(ctx.is_cup_watched(7));
        assert_eq!(ctx.owning_cup(1), Some(7));
        assert_eq!(ctx.owning_cup(2), None, "direct watch keeps no provenance");

        let removed = ctx.unwatch_cup(7).await.unwrap();
        assert_eq!(removed, vec![1, 3]);
        assert_eq!(ctx.state(), before);
        assert!(ctx.is_watching(2));
    }

    #[test]
    fn overlapping_cups_hand_a_shared_game_over() {
        let mut state = WatchState::default();
        state.apply_watch_cup(1, &[5, 6]);
        state.apply_watch_cup(2, &[5]);
        assert_eq!(state.owning_cup(5), Some(2));

        assert_eq!(state.apply_unwatch_cup(1), vec![6]);
        assert!(state.is_watching(5));
        assert_eq!(state.owning_cup(5), Some(2));

        assert_eq!(state.apply_unwatch_cup(2), vec![5]);
        assert_eq!(state, WatchState::default());
    }

    #[test]
    fn unwatching_the_newer_cup_returns_a_shared_game_to_the_older() {
        let mut state = WatchState::default();
        state.apply_watch_cup(1, &[5]);
        state.apply_watch_cup(2, &[5]);

        assert!(state.apply_unwatch_cup(2).is_empty());
        assert_eq!(state.owning_cup(5), Some(1));
        assert!(state.check_unwatch(5).is_err());
    }

    #[test]
    fn cup_never_takes_over_a_direct_watch() {
        let mut state = WatchState::default();
        state.apply_watch_game(5);
        state.apply_watch_cup(1, &[5]);
        assert_eq!(state.owning_cup(5), None);
        assert!(state.apply_unwatch_cup(1).is_empty());
        assert!(state.is_watching(5));
    }

    #[tokio::test]
    async fn direct_watch_survives_unrelated_cup() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(9, &[20, 21]), &router);
        ctx.watch_game(5).await.unwrap();
        ctx.watch_cup(9).await.unwrap();
        ctx.unwatch_cup(9).await.unwrap();
        assert!(ctx.is_watching(5));
        assert!(!ctx.is_watching(20));
    }

    #[tokio::test]
    async fn watching_a_cup_twice_is_idempotent() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(1, &[10]), &router);
        ctx.watch_cup(1).await.unwrap();
        let once = ctx.state();
        ctx.watch_cup(1).await.unwrap();
        assert_eq!(ctx.state(), once);
    }

    #[tokio::test]
    async fn guard_rejects_unwatching_auto_watched_game_without_sending() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(4, &[40]), &router);
        ctx.watch_cup(4).await.unwrap();

        let err = ctx.unwatch_game(40).await.unwrap_err();
        assert!(matches!(err, WatchError::AutoWatched { game_id: 40, cup_id: 4 }));
        assert!(err.to_string().contains("cup 4"));
        assert_eq!(ctx.backend().calls(), ["WATCH_CUP 4"]);
        assert!(ctx.is_watching(40));

        let err = ctx.toggle_game(40).await.unwrap_err();
        assert!(matches!(err, WatchError::AutoWatched { .. }));
    }

    #[tokio::test]
    async fn watch_game_promotes_auto_watched_game_to_direct() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(4, &[40]), &router);
        ctx.watch_cup(4).await.unwrap();
        ctx.watch_game(40).await.unwrap();
        assert_eq!(ctx.owning_cup(40), None);

        ctx.unwatch_cup(4).await.unwrap();
        assert!(ctx.is_watching(40));
    }

    #[tokio::test]
    async fn failed_mutation_leaves_state_unchanged() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(3, &[30]), &router);
        ctx.watch_game(1).await.unwrap();
        let before = ctx.state();

        ctx.backend().fail_next("Cup not found");
        let err = ctx.watch_cup(3).await.unwrap_err();
        assert!(matches!(&err, WatchError::Call(CallError::Server(m)) if m == "Cup not found"));
        assert_eq!(ctx.state(), before);

        ctx.backend().fail_next("nope");
        assert!(ctx.unwatch_game(1).await.is_err());
        assert_eq!(ctx.state(), before);
    }

    #[tokio::test]
    async fn load_rebuilds_provenance_from_server() {
        let router = Router::new();
        let backend = FakeBackend {
            server_games: vec![
                WatchedGame { game_id: 1, cup_id: None },
                WatchedGame { game_id: 2, cup_id: Some(8) },
            ],
            server_cups: vec![8],
            ..FakeBackend::default()
        };
        let ctx = WatchContext::new(backend, &router);
        ctx.watch_game(99).await.unwrap();

        ctx.load().await.unwrap();
        let state = ctx.state();
        assert_eq!(state.watched_games, BTreeSet::from([1, 2]));
        assert_eq!(state.auto_watched, BTreeMap::from([(2, 8)]));
        assert_eq!(state.watched_cups, BTreeSet::from([8]));
    }

    #[tokio::test]
    async fn toggle_watches_then_unwatches() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::default(), &router);
        assert!(ctx.toggle_game(6).await.unwrap());
        assert!(!ctx.toggle_game(6).await.unwrap());
        assert_eq!(ctx.backend().calls(), ["WATCH 6", "UNWATCH 6"]);
    }

    #[tokio::test]
    async fn concurrent_toggles_decide_under_the_mutation_lock() {
        let router = Router::new();
        let ctx = Arc::new(WatchContext::new(FakeBackend::default(), &router));
        let toggles: Vec<_> = (0..2)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.toggle_game(6).await })
            })
            .collect();
        let mut results = Vec::new();
        for toggle in toggles {
            results.push(toggle.await.unwrap().unwrap());
        }
        results.sort_unstable();
        assert_eq!(results, [false, true]);
        assert_eq!(ctx.backend().calls(), ["WATCH 6", "UNWATCH 6"]);
        assert!(!ctx.is_watching(6));
    }

    #[tokio::test]
    async fn concurrent_mutations_are_serialized() {
        let router = Router::new();
        let ctx = Arc::new(WatchContext::new(FakeBackend::with_cup(1, &[10, 11]), &router));
        let a = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.watch_cup(1).await }
        });
        let b = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.watch_game(12).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(ctx.backend().max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.state().watched_games, BTreeSet::from([10, 11, 12]));
    }

    #[test]
    fn notifications_for_unwatched_games_are_dropped() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::default(), &router);
        router.dispatch(&note(1, 0, 0, GameState::Running));
        assert!(ctx.feed().is_empty());
    }

    #[tokio::test]
    async fn rejected_notifications_leave_no_baseline() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::default(), &router);
        for game_id in 100..110 {
            router.dispatch(&note(game_id, 0, 0, GameState::Running));
        }
        assert!(ctx.shared.lock().last_seen.is_empty());

        ctx.watch_game(100).await.unwrap();
        router.dispatch(&note(100, 1, 0, GameState::Running));
        assert_eq!(ctx.feed()[0].kind, FeedKind::Update);
        assert_eq!(ctx.shared.lock().last_seen.len(), 1);

        ctx.close();
        assert!(ctx.shared.lock().last_seen.is_empty());
    }

    #[tokio::test]
    async fn any_watched_cup_accepts_unrelated_games() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::with_cup(2, &[20]), &router);
        ctx.watch_cup(2).await.unwrap();
        router.dispatch(&note(777, 1, 0, GameState::Running));
        assert_eq!(ctx.feed()[0].game_id, 777);
    }

    #[tokio::test]
    async fn feed_describes_score_and_state_changes() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::default(), &router);
        ctx.watch_game(1).await.unwrap();
        let mut updates = ctx.feed_updates();

        router.dispatch(&note(1, 0, 0, GameState::Ready));
        router.dispatch(&note(1, 0, 0, GameState::Running));
        router.dispatch(&note(1, 0, 1, GameState::Running));

        let feed = ctx.feed();
        assert_eq!(feed.len(), 3);
        assert_eq!(feed[0].kind, FeedKind::Score);
        assert_eq!(feed[0].message, "Lions vs Tigers: Away team scored! New score: 0 - 1");
        assert_eq!(feed[1].kind, FeedKind::State);
        assert_eq!(
            feed[1].message,
            "Lions vs Tigers: game state changed from READY to RUNNING"
        );
        assert_eq!(feed[2].kind, FeedKind::Update);

        assert_eq!(updates.recv().await.unwrap().kind, FeedKind::Update);
    }

    #[tokio::test]
    async fn feed_is_bounded_and_editable() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::default(), &router);
        ctx.watch_game(1).await.unwrap();
        for goals in 0..60 {
            router.dispatch(&note(1, goals, 0, GameState::Running));
        }
        let feed = ctx.feed();
        assert_eq!(feed.len(), crate::feed::FEED_CAPACITY);
        assert!(feed[0].message.ends_with("New score: 59 - 0"));

        assert!(ctx.remove_feed_entry(feed[0].id));
        assert_eq!(ctx.feed().len(), crate::feed::FEED_CAPACITY - 1);
        ctx.clear_feed();
        assert!(ctx.feed().is_empty());
    }

    #[tokio::test]
    async fn closed_context_ignores_notifications() {
        let router = Router::new();
        let ctx = WatchContext::new(FakeBackend::default(), &router);
        ctx.watch_game(1).await.unwrap();
        ctx.close();
        assert_eq!(router.handler_count(), 0);
        assert!(ctx.handle_notification(&note(1, 1, 0, GameState::Running)).is_none());
        assert!(ctx.feed().is_empty());
    }
}
