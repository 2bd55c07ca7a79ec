// fake_tracker: In-memory stand-in for the tracker server's command handling.
//
// Implements enough of the protocol to exercise clients end to end: login,
// teams and games, lifecycle and scoring (with notifications), and the
// game/cup watch model with cup provenance.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use st_protocol::results::GamePlayers;
use st_protocol::{
    Command, CommandFrame, Cup, CupId, CupType, Game, GameId, GameState, Notification, Response,
    Score, Side, Team, TeamId, TeamRef, TimelineEvent, WatchedGame,
};

/// What the server does in reply to one command.
#[derive(Debug, Default)]
pub struct Reply {
    /// `None` means the server stays silent.
    pub response: Option<Response>,
    /// Notifications to broadcast to every connected client.
    pub pushes: Vec<Notification>,
}

impl Reply {
    fn respond(response: Response) -> Self {
        Self {
            response: Some(response),
            pushes: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeTracker {
    next_id: u64,
    user: Option<String>,
    teams: BTreeMap<TeamId, Team>,
    games: BTreeMap<GameId, Game>,
    cups: BTreeMap<CupId, (Cup, Vec<GameId>)>,
    /// Watched game -> owning cup when watched through a cup.
    watched_games: BTreeMap<GameId, Option<CupId>>,
    watched_cups: BTreeSet<CupId>,
    failing: HashMap<String, String>,
    silent: HashSet<String>,
    echo_request_ids: bool,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self {
            next_id: 100,
            ..Self::default()
        }
    }

    /// Register a team.  Returns the assigned id.
    pub fn add_team(&mut self, name: &str) -> TeamId {
        self.next_id += 1;
        let id = self.next_id;
        self.teams.insert(
            id,
            Team {
                id,
                name: name.to_owned(),
                players: BTreeMap::new(),
            },
        );
        id
    }

    /// Register a READY game between two new teams.  Returns the game id.
    pub fn add_game(&mut self, home: &str, away: &str) -> GameId {
        let home_id = self.add_team(home);
        let away_id = self.add_team(away);
        self.insert_game(home_id, away_id)
    }

    /// Register a cup owning the given games.
    pub fn add_cup(&mut self, name: &str, games: &[GameId]) -> CupId {
        self.next_id += 1;
        let id = self.next_id;
        let cup = Cup {
            id,
            name: name.to_owned(),
            cup_type: CupType::League,
            teams: Vec::new(),
            game_count: u32::try_from(games.len()).unwrap_or(u32::MAX),
        };
        self.cups.insert(id, (cup, games.to_vec()));
        id
    }

    /// Make every `verb` command fail with an ERROR response.
    pub fn fail_verb(&mut self, verb: &str, message: &str) {
        self.failing.insert(verb.to_owned(), message.to_owned());
    }

    /// Stop failing `verb`.
    pub fn heal_verb(&mut self, verb: &str) {
        self.failing.remove(verb);
    }

    /// Never reply to `verb`.
    pub fn silence_verb(&mut self, verb: &str) {
        self.silent.insert(verb.to_owned());
    }

    /// Echo `requestId` back in responses.
    pub fn echo_request_ids(&mut self, echo: bool) {
        self.echo_request_ids = echo;
    }

    /// Server-side watch state: game -> provenance cup.
    pub fn watched_games(&self) -> &BTreeMap<GameId, Option<CupId>> {
        &self.watched_games
    }

    pub fn watched_cups(&self) -> &BTreeSet<CupId> {
        &self.watched_cups
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn game(&self, id: GameId) -> Option<&Game> {
        self.games.get(&id)
    }

    pub fn handle(&mut self, frame: &CommandFrame) -> Reply {
        let verb = frame.command.verb();
        if self.silent.contains(verb) {
            return Reply::default();
        }
        let mut reply = match self.failing.get(verb) {
            Some(message) => Reply::respond(Response::error(message.clone())),
            None => self.dispatch(&frame.command),
        };
        if self.echo_request_ids {
            if let Some(resp) = reply.response.take() {
                reply.response = Some(resp.echoing(frame.request_id));
            }
        }
        reply
    }

    fn dispatch(&mut self, command: &Command) -> Reply {
        match command {
            Command::User { username } => {
                self.user = Some(username.clone());
                Reply::respond(Response::ok().with_message(format!("Welcome {username}")))
            }
            Command::CreateTeam { name } => {
                let id = self.add_team(name);
                Reply::respond(Response::ok().with_field("team", &self.teams[&id]))
            }
            Command::DeleteTeam { team_id } => {
                if self.teams.remove(team_id).is_none() {
                    return Reply::respond(Response::error("Team not found"));
                }
                Reply::respond(Response::ok())
            }
            Command::AddPlayer {
                team_id,
                player,
                no,
            } => match self.teams.get_mut(team_id) {
                Some(team) => {
                    team.players
                        .insert(player.clone(), st_protocol::PlayerInfo { no: *no });
                    Reply::respond(Response::ok().with_field("team", &*team))
                }
                None => Reply::respond(Response::error("Team not found")),
            },
            Command::RemovePlayer { team_id, player } => match self.teams.get_mut(team_id) {
                Some(team) => {
                    team.players.remove(player);
                    Reply::respond(Response::ok().with_field("team", &*team))
                }
                None => Reply::respond(Response::error("Team not found")),
            },
            Command::DeleteGame { game_id } => {
                if self.games.remove(game_id).is_none() {
                    return Reply::respond(Response::error("Game not found"));
                }
                self.watched_games.remove(game_id);
                Reply::respond(Response::ok())
            }
            Command::ListTeams => {
                let teams: Vec<&Team> = self.teams.values().collect();
                Reply::respond(Response::ok().with_field("teams", teams))
            }
            Command::CreateGame { home_id, away_id } => {
                if !self.teams.contains_key(home_id) || !self.teams.contains_key(away_id) {
                    return Reply::respond(Response::error("Invalid Team IDs"));
                }
                let id = self.insert_game(*home_id, *away_id);
                Reply::respond(Response::ok().with_field("game", &self.games[&id]))
            }
            Command::ListGames => {
                let games: Vec<&Game> = self.games.values().collect();
                Reply::respond(Response::ok().with_field("games", games))
            }
            Command::ListCups => {
                let cups: Vec<&Cup> = self.cups.values().map(|(c, _)| c).collect();
                Reply::respond(Response::ok().with_field("cups", cups))
            }
            Command::GetGame { game_id } => match self.games.get(game_id) {
                Some(game) => Reply::respond(Response::ok().with_field("game", game)),
                None => Reply::respond(Response::error("Game not found")),
            },
            Command::GetPlayers { game_id } => match self.games.get(game_id) {
                Some(game) => {
                    let names = |id: TeamId| -> Vec<String> {
                        self.teams
                            .get(&id)
                            .map(|t| t.players.keys().cloned().collect())
                            .unwrap_or_default()
                    };
                    let players = GamePlayers {
                        home: names(game.home.id),
                        away: names(game.away.id),
                    };
                    Reply::respond(
                        Response::ok()
                            .with_field("home", players.home)
                            .with_field("away", players.away),
                    )
                }
                None => Reply::respond(Response::error("Game not found")),
            },
            Command::Start { game_id } => {
                self.transition(*game_id, &[GameState::Ready], GameState::Running)
            }
            Command::Pause { game_id } => {
                self.transition(*game_id, &[GameState::Running], GameState::Paused)
            }
            Command::Resume { game_id } => {
                self.transition(*game_id, &[GameState::Paused], GameState::Running)
            }
            Command::End { game_id } => self.transition(
                *game_id,
                &[GameState::Running, GameState::Paused],
                GameState::Ended,
            ),
            Command::Score {
                game_id,
                side,
                player,
                points,
            } => self.score(*game_id, *side, player.as_deref(), *points),
            Command::Watch { game_id } => {
                if !self.games.contains_key(game_id) {
                    return Reply::respond(Response::error("Object not found"));
                }
                // An explicit watch makes the game directly watched.
                self.watched_games.insert(*game_id, None);
                Reply::respond(Response::ok())
            }
            Command::Unwatch { game_id } => {
                self.watched_games.remove(game_id);
                Reply::respond(Response::ok())
            }
            Command::WatchCup { cup_id } => {
                let Some((_, games)) = self.cups.get(cup_id) else {
                    return Reply::respond(Response::error("Cup not found"));
                };
                // Direct watches stay direct; games held by another cup
                // move to this one.
                let mut auto_watched = Vec::new();
                for game_id in games {
                    if self.watched_games.get(game_id) != Some(&None) {
                        self.watched_games.insert(*game_id, Some(*cup_id));
                        auto_watched.push(*game_id);
                    }
                }
                self.watched_cups.insert(*cup_id);
                Reply::respond(Response::ok().with_field("auto_watched", auto_watched))
            }
            Command::UnwatchCup { cup_id } => {
                self.watched_cups.remove(cup_id);
                let held: Vec<GameId> = self
                    .watched_games
                    .iter()
                    .filter(|(_, owner)| **owner == Some(*cup_id))
                    .map(|(id, _)| *id)
                    .collect();
                let mut removed = Vec::new();
                for id in held {
                    let heir = self
                        .watched_cups
                        .iter()
                        .find(|&&cup| self.cups.get(&cup).is_some_and(|(_, games)| games.contains(&id)))
                        .copied();
                    match heir {
                        Some(heir) => {
                            self.watched_games.insert(id, Some(heir));
                        }
                        None => {
                            self.watched_games.remove(&id);
                            removed.push(id);
                        }
                    }
                }
                Reply::respond(Response::ok().with_field("removed", removed))
            }
            Command::WatchedGames => {
                let games: Vec<WatchedGame> = self
                    .watched_games
                    .iter()
                    .map(|(game_id, cup_id)| WatchedGame {
                        game_id: *game_id,
                        cup_id: *cup_id,
                    })
                    .collect();
                Reply::respond(Response::ok().with_field("games", games))
            }
            Command::WatchedCups => {
                let cups: Vec<CupId> = self.watched_cups.iter().copied().collect();
                Reply::respond(Response::ok().with_field("cups", cups))
            }
            other => Reply::respond(Response::error(format!(
                "Unknown command: {}",
                other.verb()
            ))),
        }
    }

    fn insert_game(&mut self, home_id: TeamId, away_id: TeamId) -> GameId {
        self.next_id += 1;
        let id = self.next_id;
        let team_ref = |t: &Team| TeamRef {
            id: t.id,
            name: t.name.clone(),
        };
        let game = Game {
            id,
            home: team_ref(&self.teams[&home_id]),
            away: team_ref(&self.teams[&away_id]),
            state: GameState::Ready,
            score: Score::default(),
            timeline: Vec::new(),
            scorers: None,
            datetime: None,
            group: None,
        };
        self.games.insert(id, game);
        id
    }

    fn transition(&mut self, game_id: GameId, from: &[GameState], to: GameState) -> Reply {
        let Some(game) = self.games.get_mut(&game_id) else {
            return Reply::respond(Response::error("Game not found"));
        };
        if !from.contains(&game.state) {
            return Reply::respond(Response::error(format!(
                "Cannot move game from {} to {}",
                game.state, to
            )));
        }
        game.state = to;
        let game = game.clone();
        Reply {
            response: Some(Response::ok().with_field("game", &game)),
            pushes: vec![notification_for(&game)],
        }
    }

    fn score(&mut self, game_id: GameId, side: Side, player: Option<&str>, points: i64) -> Reply {
        let Some(game) = self.games.get_mut(&game_id) else {
            return Reply::respond(Response::error("Game not found"));
        };
        if game.state != GameState::Running {
            return Reply::respond(Response::error("Cannot score, game is not running."));
        }
        let delta = u32::try_from(points.max(0)).unwrap_or(0);
        match side {
            Side::Home => game.score.home += delta,
            Side::Away => game.score.away += delta,
        }
        let minute = game.timeline.len() + 1;
        game.timeline.push(TimelineEvent {
            timestamp: format!("{minute:02}:00.00"),
            side,
            player: player.unwrap_or("Unknown").to_owned(),
            points,
        });
        let game = game.clone();
        Reply {
            response: Some(Response::ok().with_field("game", &game)),
            pushes: vec![notification_for(&game)],
        }
    }
}

/// Build the notification the server pushes after `game` changes.
pub fn notification_for(game: &Game) -> Notification {
    Notification {
        game_id: game.id,
        home: game.home.name.clone(),
        away: game.away.name.clone(),
        score: game.score,
        state: game.state,
    }
}
