//! Scorer summaries from a game's raw timeline.
//!
//! The timeline is the source of truth; summaries are recomputed on every
//! call and never cached.  Snapshots from before timeline tracking carry a
//! legacy `scorers` list instead, which is used as the fallback.

use std::collections::HashMap;

use serde::Serialize;
use st_protocol::{Game, LegacyScorer, Side, TimelineEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScorerSummary {
    pub player: String,
    /// Sum of the positive points deltas.
    pub total_goals: u32,
    /// Timestamps of the contributing events, in timeline order.
    pub goal_timestamps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScorerBoard {
    pub home: Vec<ScorerSummary>,
    pub away: Vec<ScorerSummary>,
}

impl ScorerBoard {
    pub fn is_empty(&self) -> bool {
        self.home.is_empty() && self.away.is_empty()
    }

    pub fn side(&self, side: Side) -> &[ScorerSummary] {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }
}

/// Group scoring events by (side, player) in order of first appearance.
///
/// Events with a non-positive delta are skipped.  An empty `events` list
/// yields `fallback` when one is given, else an empty board.
pub fn aggregate(events: &[TimelineEvent], fallback: Option<&ScorerBoard>) -> ScorerBoard {
    if events.is_empty() {
        return fallback.cloned().unwrap_or_default();
    }

    let mut board = ScorerBoard::default();
    let mut index: HashMap<(Side, &str), usize> = HashMap::new();
    for event in events.iter().filter(|e| e.points > 0) {
        let side = match event.side {
            Side::Home => &mut board.home,
            Side::Away => &mut board.away,
        };
        let slot = *index
            .entry((event.side, event.player.as_str()))
            .or_insert_with(|| {
                side.push(ScorerSummary {
                    player: event.player.clone(),
                    total_goals: 0,
                    goal_timestamps: Vec::new(),
                });
                side.len() - 1
            });
        let summary = &mut side[slot];
        let points = u32::try_from(event.points).unwrap_or(u32::MAX);
        summary.total_goals = summary.total_goals.saturating_add(points);
        summary.goal_timestamps.push(event.timestamp.clone());
    }
    board
}

/// Convert a legacy per-goal scorer list into a board.  Each entry is one
/// goal; minutes render as `"<m>'"`.
pub fn from_legacy(home: &[LegacyScorer], away: &[LegacyScorer]) -> ScorerBoard {
    fn side(scorers: &[LegacyScorer]) -> Vec<ScorerSummary> {
        let mut out: Vec<ScorerSummary> = Vec::new();
        for scorer in scorers {
            let stamp = scorer.minute.map(|m| format!("{m}'"));
            match out.iter_mut().find(|s| s.player == scorer.player) {
                Some(existing) => {
                    existing.total_goals += 1;
                    existing.goal_timestamps.extend(stamp);
                }
                None => out.push(ScorerSummary {
                    player: scorer.player.clone(),
                    total_goals: 1,
                    goal_timestamps: stamp.into_iter().collect(),
                }),
            }
        }
        out
    }

    ScorerBoard {
        home: side(home),
        away: side(away),
    }
}

/// Scorer summaries for a game snapshot, falling back to legacy scorers.
pub trait GameScorers {
    fn scorer_board(&self) -> ScorerBoard;
}

impl GameScorers for Game {
    fn scorer_board(&self) -> ScorerBoard {
        let fallback = self
            .scorers
            .as_ref()
            .map(|s| from_legacy(&s.home, &s.away));
        aggregate(&self.timeline, fallback.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_protocol::{GameState, LegacyScorers, Score, TeamRef};

    fn ev(timestamp: &str, side: Side, player: &str, points: i64) -> TimelineEvent {
        TimelineEvent {
            timestamp: timestamp.to_owned(),
            side,
            player: player.to_owned(),
            points,
        }
    }

    fn summary(player: &str, total: u32, stamps: &[&str]) -> ScorerSummary {
        ScorerSummary {
            player: player.to_owned(),
            total_goals: total,
            goal_timestamps: stamps.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn groups_by_side_and_player() {
        let events = [
            ev("t1", Side::Home, "A", 1),
            ev("t2", Side::Home, "A", 1),
            ev("t3", Side::Away, "B", 1),
        ];
        let board = aggregate(&events, None);
        assert_eq!(board.home, vec![summary("A", 2, &["t1", "t2"])]);
        assert_eq!(board.away, vec![summary("B", 1, &["t3"])]);
    }

    #[test]
    fn same_name_on_both_sides_is_two_scorers() {
        let events = [ev("1", Side::Home, "Sam", 1), ev("2", Side::Away, "Sam", 1)];
        let board = aggregate(&events, None);
        assert_eq!(board.side(Side::Home).len(), 1);
        assert_eq!(board.side(Side::Away).len(), 1);
    }

    #[test]
    fn first_appearance_order_and_point_sums() {
        let events = [
            ev("1", Side::Home, "Zed", 1),
            ev("2", Side::Home, "Amy", 3),
            ev("3", Side::Home, "Zed", 2),
            ev("4", Side::Home, "Amy", 0),
            ev("5", Side::Home, "Bob", -1),
        ];
        let board = aggregate(&events, None);
        assert_eq!(
            board.home,
            vec![summary("Zed", 3, &["1", "3"]), summary("Amy", 3, &["2"])]
        );
        assert!(board.away.is_empty());
    }

    #[test]
    fn empty_timeline_uses_fallback_or_empty() {
        let fallback = ScorerBoard {
            home: vec![summary("Old", 1, &["35'"])],
            away: Vec::new(),
        };
        assert_eq!(aggregate(&[], Some(&fallback)), fallback);
        assert!(aggregate(&[], None).is_empty());
    }

    #[test]
    fn fallback_ignored_when_timeline_present() {
        let fallback = ScorerBoard {
            home: vec![summary("Old", 1, &[])],
            away: Vec::new(),
        };
        let board = aggregate(&[ev("1", Side::Away, "New", 1)], Some(&fallback));
        assert!(board.home.is_empty());
        assert_eq!(board.away[0].player, "New");
    }

    #[test]
    fn legacy_scorers_render_minutes() {
        let home = [
            LegacyScorer { player: "X".to_owned(), minute: Some(35) },
            LegacyScorer { player: "X".to_owned(), minute: Some(80) },
            LegacyScorer { player: "Y".to_owned(), minute: None },
        ];
        let board = from_legacy(&home, &[]);
        assert_eq!(
            board.home,
            vec![summary("X", 2, &["35'", "80'"]), summary("Y", 1, &[])]
        );
    }

    #[test]
    fn game_scorer_board_prefers_timeline() {
        let mut game = Game {
            id: 1,
            home: TeamRef { id: 1, name: "H".to_owned() },
            away: TeamRef { id: 2, name: "A".to_owned() },
            state: GameState::Ended,
            score: Score { home: 1, away: 0 },
            timeline: Vec::new(),
            scorers: Some(LegacyScorers {
                home: vec![LegacyScorer { player: "Legacy".to_owned(), minute: Some(12) }],
                away: Vec::new(),
            }),
            datetime: None,
            group: None,
        };
        assert_eq!(game.scorer_board().home[0].player, "Legacy");

        game.timeline.push(ev("00:10.00", Side::Home, "Live", 1));
        assert_eq!(game.scorer_board().home[0].player, "Live");
    }
}
