// st-protocol: Sports tracker WebSocket protocol types and serialization.
//
// Outbound commands are flat JSON objects carrying a `command` verb and a
// client-assigned `requestId`.  Inbound frames are classified by shape: a
// `type` tag marks server pushes (NOTIFICATION, INFO); a `status` field
// marks a call response.  The server does not echo `requestId` today.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

pub type TeamId = u64;
pub type GameId = u64;
pub type CupId = u64;
pub type RequestId = u64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A frame that could not be classified or decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("frame has neither a type tag nor a status field")]
    Unclassified,
    #[error("command frame is missing requestId")]
    MissingRequestId,
}

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Which team of a game an event belongs to.
///
/// Serialized lowercase; the server's timeline uses `"Home"` / `"Away"`,
/// accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "Home", alias = "HOME")]
    Home,
    #[serde(alias = "Away", alias = "AWAY")]
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => f.write_str("Home"),
            Side::Away => f.write_str("Away"),
        }
    }
}

/// Game lifecycle state as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Ready,
    Running,
    Paused,
    Ended,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameState::Ready => "READY",
            GameState::Running => "RUNNING",
            GameState::Paused => "PAUSED",
            GameState::Ended => "ENDED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub no: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    /// Player name -> shirt details.
    #[serde(default)]
    pub players: BTreeMap<String, PlayerInfo>,
}

/// Compact team reference embedded in game snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: TeamId,
    pub name: String,
}

/// One scoring entry of a game's chronological timeline.
///
/// On the wire this is the positional 4-tuple
/// `[timestamp, side, player, points]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TimelineEntry", into = "TimelineEntry")]
pub struct TimelineEvent {
    /// Match-clock string as formatted by the server, e.g. `"12:04.50"`.
    pub timestamp: String,
    pub side: Side,
    pub player: String,
    pub points: i64,
}

#[derive(Serialize, Deserialize)]
struct TimelineEntry(String, Side, String, i64);

impl From<TimelineEntry> for TimelineEvent {
    fn from(TimelineEntry(timestamp, side, player, points): TimelineEntry) -> Self {
        Self {
            timestamp,
            side,
            player,
            points,
        }
    }
}

impl From<TimelineEvent> for TimelineEntry {
    fn from(e: TimelineEvent) -> Self {
        TimelineEntry(e.timestamp, e.side, e.player, e.points)
    }
}

/// Scorer entry from snapshots that predate timeline tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyScorer {
    pub player: String,
    #[serde(default)]
    pub minute: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyScorers {
    #[serde(default)]
    pub home: Vec<LegacyScorer>,
    #[serde(default)]
    pub away: Vec<LegacyScorer>,
}

/// Game snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub home: TeamRef,
    pub away: TeamRef,
    pub state: GameState,
    #[serde(default)]
    pub score: Score,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    /// Only present on snapshots written before timelines existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorers: Option<LegacyScorers>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CupType {
    League,
    Elimination,
    Group,
}

/// Tournament snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cup {
    pub id: CupId,
    pub name: String,
    #[serde(rename = "type")]
    pub cup_type: CupType,
    #[serde(default)]
    pub teams: Vec<TeamId>,
    #[serde(default, alias = "gameCount")]
    pub game_count: u32,
}

/// One row of a league/group table.  Computed server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandingsRow {
    pub team: String,
    pub played: u32,
    pub won: u32,
    pub draw: u32,
    pub lost: u32,
    #[serde(alias = "goals_for")]
    pub gf: u32,
    #[serde(alias = "goals_against")]
    pub ga: u32,
    pub points: i32,
}

/// One game slot inside an elimination bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketGame {
    pub game_id: GameId,
    pub home: String,
    pub away: String,
    pub state: GameState,
    /// Null until the game has started.
    #[serde(default)]
    pub score: Option<Score>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketRound {
    pub name: String,
    pub games: Vec<BracketGame>,
}

/// Elimination game tree.
///
/// The server sends a JSON object keyed by round name in bracket order
/// (`{"Quarter-Final": [...], "Semi-Final": [...], "Final": [...]}`); the
/// key order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameTree {
    pub rounds: Vec<BracketRound>,
}

impl Serialize for GameTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rounds.len()))?;
        for round in &self.rounds {
            map.serialize_entry(&round.name, &round.games)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GameTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RoundsVisitor;

        impl<'de> Visitor<'de> for RoundsVisitor {
            type Value = GameTree;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of round name to bracket games")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<GameTree, A::Error> {
                let mut rounds = Vec::new();
                while let Some((name, games)) = access.next_entry::<String, Vec<BracketGame>>()? {
                    rounds.push(BracketRound { name, games });
                }
                Ok(GameTree { rounds })
            }
        }

        deserializer.deserialize_map(RoundsVisitor)
    }
}

/// A watched game as reported by `WATCHED_GAMES`.
///
/// `cup_id` is the provenance: present iff the game is watched only because
/// its cup is watched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedGame {
    pub game_id: GameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cup_id: Option<CupId>,
}

// ---------------------------------------------------------------------------
// Client -> Server commands
// ---------------------------------------------------------------------------

/// Every verb the tracker server understands, with its fixed parameters.
///
/// Serialized with the verb in the `command` field:
///
/// ```json
/// { "command": "WATCH_CUP", "cup_id": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Session login.
    User { username: String },

    CreateTeam { name: String },
    DeleteTeam { team_id: TeamId },
    AddPlayer { team_id: TeamId, player: String, no: u32 },
    RemovePlayer { team_id: TeamId, player: String },

    CreateGame { home_id: TeamId, away_id: TeamId },
    DeleteGame { game_id: GameId },

    CreateCup { name: String, cup_type: CupType, team_ids: Vec<TeamId> },
    DeleteCup { cup_id: CupId },

    Start { game_id: GameId },
    Pause { game_id: GameId },
    Resume { game_id: GameId },
    End { game_id: GameId },
    Score {
        game_id: GameId,
        side: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<String>,
        points: i64,
    },

    Watch { game_id: GameId },
    Unwatch { game_id: GameId },
    WatchCup { cup_id: CupId },
    UnwatchCup { cup_id: CupId },

    ListTeams,
    ListGames,
    ListCups,
    GetGame { game_id: GameId },
    Standings { cup_id: CupId },
    Gametree { cup_id: CupId },
    GetPlayers { game_id: GameId },
    WatchedGames,
    WatchedCups,
}

impl Command {
    /// The wire verb, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::User { .. } => "USER",
            Command::CreateTeam { .. } => "CREATE_TEAM",
            Command::DeleteTeam { .. } => "DELETE_TEAM",
            Command::AddPlayer { .. } => "ADD_PLAYER",
            Command::RemovePlayer { .. } => "REMOVE_PLAYER",
            Command::CreateGame { .. } => "CREATE_GAME",
            Command::DeleteGame { .. } => "DELETE_GAME",
            Command::CreateCup { .. } => "CREATE_CUP",
            Command::DeleteCup { .. } => "DELETE_CUP",
            Command::Start { .. } => "START",
            Command::Pause { .. } => "PAUSE",
            Command::Resume { .. } => "RESUME",
            Command::End { .. } => "END",
            Command::Score { .. } => "SCORE",
            Command::Watch { .. } => "WATCH",
            Command::Unwatch { .. } => "UNWATCH",
            Command::WatchCup { .. } => "WATCH_CUP",
            Command::UnwatchCup { .. } => "UNWATCH_CUP",
            Command::ListTeams => "LIST_TEAMS",
            Command::ListGames => "LIST_GAMES",
            Command::ListCups => "LIST_CUPS",
            Command::GetGame { .. } => "GET_GAME",
            Command::Standings { .. } => "STANDINGS",
            Command::Gametree { .. } => "GAMETREE",
            Command::GetPlayers { .. } => "GET_PLAYERS",
            Command::WatchedGames => "WATCHED_GAMES",
            Command::WatchedCups => "WATCHED_CUPS",
        }
    }
}

/// Outbound envelope: the command's fields plus the local `requestId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFrame {
    #[serde(flatten)]
    pub command: Command,
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
}

impl CommandFrame {
    pub fn new(command: Command, request_id: RequestId) -> Self {
        Self {
            command,
            request_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an outbound frame (server side / tests).
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let request_id = value
            .get("requestId")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingRequestId)?;
        let command: Command = serde_json::from_value(value)?;
        Ok(Self {
            command,
            request_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Server -> Client messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// Reply to a command.
///
/// Result fields are verb specific and kept as a raw map; callers decode
/// them with [`Response::decode`] into the verb's result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Echoed request id.  Not sent by current servers.
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
            request_id: None,
            fields: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            request_id: None,
            fields: Map::new(),
        }
    }

    /// Add a result field.  Values that fail to serialize are stored as null.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn echoing(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Decode the result fields into a verb-specific result type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Unsolicited game update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub game_id: GameId,
    /// Home team name.
    pub home: String,
    /// Away team name.
    pub away: String,
    pub score: Score,
    pub state: GameState,
}

/// Advisory server text (welcome banner, help).  Not correlated to a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub message: String,
}

/// Messages the server pushes without being asked, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Push {
    Notification(Notification),
    Info(Info),
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Inbound {
    Push(Push),
    Response(Response),
}

impl Inbound {
    /// Classify and decode one inbound text frame.
    ///
    /// Only a `NOTIFICATION` or `INFO` tag makes a frame a push.  Any other
    /// frame carrying `status` is a call response, whatever its `type`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let tag = object
            .get("type")
            .map(|t| t.as_str().unwrap_or_default().to_owned());
        if matches!(tag.as_deref(), Some("NOTIFICATION" | "INFO")) {
            let push: Push = serde_json::from_value(Value::Object(object))?;
            return Ok(Inbound::Push(push));
        }

        if object.contains_key("status") {
            let response: Response = serde_json::from_value(Value::Object(object))?;
            return Ok(Inbound::Response(response));
        }

        if let Some(tag) = tag {
            return Err(ProtocolError::UnknownType(tag));
        }
        Err(ProtocolError::Unclassified)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Notification> for Inbound {
    fn from(n: Notification) -> Self {
        Inbound::Push(Push::Notification(n))
    }
}

impl From<Response> for Inbound {
    fn from(r: Response) -> Self {
        Inbound::Response(r)
    }
}

// ---------------------------------------------------------------------------
// Per-verb result shapes (decoded from `Response::fields`)
// ---------------------------------------------------------------------------

pub mod results {
    use super::{Cup, CupId, Game, GameId, GameTree, StandingsRow, Team, WatchedGame};
    use serde::{Deserialize, Serialize};

    /// `CREATE_TEAM`, `ADD_PLAYER`, `REMOVE_PLAYER`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TeamResult {
        pub team: Team,
    }

    /// `CREATE_GAME`, `GET_GAME`, lifecycle verbs and `SCORE`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GameResult {
        pub game: Game,
    }

    /// `CREATE_CUP`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CupResult {
        pub cup: Cup,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TeamsResult {
        #[serde(default)]
        pub teams: Vec<Team>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GamesResult {
        #[serde(default)]
        pub games: Vec<Game>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CupsResult {
        #[serde(default)]
        pub cups: Vec<Cup>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StandingsResult {
        #[serde(default)]
        pub standings: Vec<StandingsRow>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GameTreeResult {
        #[serde(default)]
        pub tree: GameTree,
    }

    /// `GET_PLAYERS`: player names of both teams of a game.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GamePlayers {
        #[serde(default)]
        pub home: Vec<String>,
        #[serde(default)]
        pub away: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WatchedGamesResult {
        #[serde(default)]
        pub games: Vec<WatchedGame>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WatchedCupsResult {
        #[serde(default)]
        pub cups: Vec<CupId>,
    }

    /// `WATCH_CUP`: games now watched through the cup.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WatchCupResult {
        #[serde(default)]
        pub auto_watched: Vec<GameId>,
    }

    /// `UNWATCH_CUP`: games the server dropped along with the cup.
    /// Informational; the client applies its own provenance rule.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UnwatchCupResult {
        #[serde(default)]
        pub removed: Vec<GameId>,
    }
}
