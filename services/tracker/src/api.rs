//! Typed request functions, one per protocol verb.
//!
//! Each function issues exactly one command and decodes the verb's fixed
//! result shape.  Failures come back as [`CallError`]; server-reported
//! errors carry the server's message.

use serde::de::DeserializeOwned;
use st_protocol::results::{
    CupResult, CupsResult, GamePlayers, GameResult, GameTreeResult, GamesResult, StandingsResult,
    TeamResult, TeamsResult, UnwatchCupResult, WatchCupResult, WatchedCupsResult,
    WatchedGamesResult,
};
use st_protocol::{
    Command, Cup, CupId, CupType, Game, GameId, GameState, GameTree, Side, StandingsRow, Team,
    TeamId, WatchedGame,
};

use crate::client::Client;
use crate::correlator::CallError;

impl Client {
    async fn call_decode<T: DeserializeOwned>(&self, command: Command) -> Result<T, CallError> {
        let verb = command.verb();
        let response = self.call(command).await?;
        response
            .decode()
            .map_err(|source| CallError::Decode { verb, source })
    }

    async fn call_unit(&self, command: Command) -> Result<(), CallError> {
        self.call(command).await.map(|_| ())
    }

    // -- session --

    /// Log in.  Returns the server's greeting, if any.
    pub async fn login(&self, username: &str) -> Result<Option<String>, CallError> {
        let response = self
            .call(Command::User {
                username: username.to_owned(),
            })
            .await?;
        Ok(response.message)
    }

    // -- teams --

    pub async fn list_teams(&self) -> Result<Vec<Team>, CallError> {
        let TeamsResult { teams } = self.call_decode(Command::ListTeams).await?;
        Ok(teams)
    }

    pub async fn create_team(&self, name: &str) -> Result<Team, CallError> {
        let TeamResult { team } = self
            .call_decode(Command::CreateTeam {
                name: name.to_owned(),
            })
            .await?;
        Ok(team)
    }

    pub async fn delete_team(&self, team_id: TeamId) -> Result<(), CallError> {
        self.call_unit(Command::DeleteTeam { team_id }).await
    }

    pub async fn add_player(&self, team_id: TeamId, player: &str, no: u32) -> Result<Team, CallError> {
        let TeamResult { team } = self
            .call_decode(Command::AddPlayer {
                team_id,
                player: player.to_owned(),
                no,
            })
            .await?;
        Ok(team)
    }

    pub async fn remove_player(&self, team_id: TeamId, player: &str) -> Result<Team, CallError> {
        let TeamResult { team } = self
            .call_decode(Command::RemovePlayer {
                team_id,
                player: player.to_owned(),
            })
            .await?;
        Ok(team)
    }

    // -- games --

    pub async fn list_games(&self) -> Result<Vec<Game>, CallError> {
        let GamesResult { games } = self.call_decode(Command::ListGames).await?;
        Ok(games)
    }

    /// Games currently running or paused.
    pub async fn live_games(&self) -> Result<Vec<Game>, CallError> {
        let mut games = self.list_games().await?;
        games.retain(|g| matches!(g.state, GameState::Running | GameState::Paused));
        Ok(games)
    }

    pub async fn get_game(&self, game_id: GameId) -> Result<Game, CallError> {
        let GameResult { game } = self.call_decode(Command::GetGame { game_id }).await?;
        Ok(game)
    }

    pub async fn create_game(&self, home_id: TeamId, away_id: TeamId) -> Result<Game, CallError> {
        let GameResult { game } = self
            .call_decode(Command::CreateGame { home_id, away_id })
            .await?;
        Ok(game)
    }

    pub async fn delete_game(&self, game_id: GameId) -> Result<(), CallError> {
        self.call_unit(Command::DeleteGame { game_id }).await
    }

    /// Player names of both teams of a game.
    pub async fn game_players(&self, game_id: GameId) -> Result<GamePlayers, CallError> {
        self.call_decode(Command::GetPlayers { game_id }).await
    }

    pub async fn start_game(&self, game_id: GameId) -> Result<Game, CallError> {
        self.lifecycle(Command::Start { game_id }).await
    }

    pub async fn pause_game(&self, game_id: GameId) -> Result<Game, CallError> {
        self.lifecycle(Command::Pause { game_id }).await
    }

    pub async fn resume_game(&self, game_id: GameId) -> Result<Game, CallError> {
        self.lifecycle(Command::Resume { game_id }).await
    }

    pub async fn end_game(&self, game_id: GameId) -> Result<Game, CallError> {
        self.lifecycle(Command::End { game_id }).await
    }

    /// Record a scoring event.  `player` may be omitted for an own goal or
    /// an unknown scorer.
    pub async fn score(
        &self,
        game_id: GameId,
        side: Side,
        player: Option<&str>,
        points: i64,
    ) -> Result<Game, CallError> {
        self.lifecycle(Command::Score {
            game_id,
            side,
            player: player.map(str::to_owned),
            points,
        })
        .await
    }

    async fn lifecycle(&self, command: Command) -> Result<Game, CallError> {
        let GameResult { game } = self.call_decode(command).await?;
        Ok(game)
    }

    // -- cups --

    pub async fn list_cups(&self) -> Result<Vec<Cup>, CallError> {
        let CupsResult { cups } = self.call_decode(Command::ListCups).await?;
        Ok(cups)
    }

    pub async fn create_cup(
        &self,
        name: &str,
        cup_type: CupType,
        team_ids: &[TeamId],
    ) -> Result<Cup, CallError> {
        let CupResult { cup } = self
            .call_decode(Command::CreateCup {
                name: name.to_owned(),
                cup_type,
                team_ids: team_ids.to_vec(),
            })
            .await?;
        Ok(cup)
    }

    pub async fn delete_cup(&self, cup_id: CupId) -> Result<(), CallError> {
        self.call_unit(Command::DeleteCup { cup_id }).await
    }

    pub async fn standings(&self, cup_id: CupId) -> Result<Vec<StandingsRow>, CallError> {
        let StandingsResult { standings } = self.call_decode(Command::Standings { cup_id }).await?;
        Ok(standings)
    }

    pub async fn game_tree(&self, cup_id: CupId) -> Result<GameTree, CallError> {
        let GameTreeResult { tree } = self.call_decode(Command::Gametree { cup_id }).await?;
        Ok(tree)
    }

    // -- watch --
    //
    // Raw verbs only.  Keeping local watch state consistent is the job of
    // `WatchContext`.

    pub async fn watch_game(&self, game_id: GameId) -> Result<(), CallError> {
        self.call_unit(Command::Watch { game_id }).await
    }

    pub async fn unwatch_game(&self, game_id: GameId) -> Result<(), CallError> {
        self.call_unit(Command::Unwatch { game_id }).await
    }

    /// Returns the ids the server started watching through the cup.
    pub async fn watch_cup(&self, cup_id: CupId) -> Result<Vec<GameId>, CallError> {
        let WatchCupResult { auto_watched } = self.call_decode(Command::WatchCup { cup_id }).await?;
        Ok(auto_watched)
    }

    /// Returns the ids the server reports as dropped with the cup.
    pub async fn unwatch_cup(&self, cup_id: CupId) -> Result<Vec<GameId>, CallError> {
        let UnwatchCupResult { removed } = self.call_decode(Command::UnwatchCup { cup_id }).await?;
        Ok(removed)
    }

    pub async fn watched_games(&self) -> Result<Vec<WatchedGame>, CallError> {
        let WatchedGamesResult { games } = self.call_decode(Command::WatchedGames).await?;
        Ok(games)
    }

    pub async fn watched_cups(&self) -> Result<Vec<CupId>, CallError> {
        let WatchedCupsResult { cups } = self.call_decode(Command::WatchedCups).await?;
        Ok(cups)
    }
}
