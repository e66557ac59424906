//! Tournament score accumulation.
//!
//! Per finished match: the winner gets 1 point, the loser 0, both sides get 0.5 on a draw.
//! A forfeiting side also receives a [`Penalty`]. Aborted matches score nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    agent::FaultKind, game_interface::Player, match_runner::MatchResult, tournament::Fixture,
};

/// A forfeit, kept for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalty {
    /// Fixture index
    pub match_index: usize,
    /// Fault that caused the forfeit
    pub kind: FaultKind,
    /// Ply of the fault
    pub ply: u32,
}

/// Running totals of one competitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Points, in steps of 0.5
    pub points: f64,
    /// Finished matches
    pub played: u32,
    /// Won matches
    pub wins: u32,
    /// Drawn matches
    pub draws: u32,
    /// Lost matches, forfeits included
    pub losses: u32,
    /// Forfeits
    pub penalties: Vec<Penalty>,
}

/// Position in the final ranking. Equal points share a rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based rank
    pub rank: usize,
    /// Competitor id
    pub id: String,
    /// Final totals
    pub score: Score,
}

/// Score of every competitor of a tournament.
///
/// Only mutated through [`TournamentScore::record`], once per finished match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TournamentScore {
    scores: BTreeMap<String, Score>,
}

impl TournamentScore {
    /// Zero scores for `ids`.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scores: ids
                .into_iter()
                .map(|id| (id.into(), Score::default()))
                .collect(),
        }
    }

    /// Folds `results` in order.
    pub fn from_results<'a, I, S, R>(ids: I, results: R) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        R: IntoIterator<Item = (&'a Fixture, &'a MatchResult)>,
    {
        results
            .into_iter()
            .fold(Self::new(ids), |mut acc, (fixture, result)| {
                acc.record(fixture, result);
                acc
            })
    }

    /// Adds the outcome of one finished match.
    pub fn record(&mut self, fixture: &Fixture, result: &MatchResult) {
        for player in Player::BOTH {
            let score = self
                .scores
                .entry(fixture.seats[player.index()].clone())
                .or_default();
            score.played += 1;
            match result.verdict.winner {
                None => {
                    score.points += 0.5;
                    score.draws += 1;
                }
                Some(winner) if winner == player => {
                    score.points += 1.0;
                    score.wins += 1;
                }
                Some(_) => score.losses += 1,
            }
            // penalties stay sorted by match index
            for fault in result.faults.iter().filter(|fault| fault.player == player) {
                let at = score
                    .penalties
                    .partition_point(|p| p.match_index <= fixture.index);
                score.penalties.insert(
                    at,
                    Penalty {
                        match_index: fixture.index,
                        kind: fault.kind,
                        ply: fault.ply,
                    },
                );
            }
        }
    }

    /// Totals of `id`.
    pub fn get(&self, id: &str) -> Option<&Score> {
        self.scores.get(id)
    }

    /// Every competitor with its totals, by id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Score)> {
        self.scores.iter().map(|(id, score)| (id.as_str(), score))
    }

    /// Ranking by points, ties sharing a rank (`1, 1, 3, ...`). Tied competitors are listed by
    /// id, which does not break the tie.
    pub fn standings(&self) -> Vec<Standing> {
        let mut sorted = self.scores.iter().collect::<Vec<_>>();
        sorted.sort_by(|(id_a, a), (id_b, b)| b.points.total_cmp(&a.points).then(id_a.cmp(id_b)));
        let mut standings: Vec<Standing> = Vec::with_capacity(sorted.len());
        for (i, (id, score)) in sorted.into_iter().enumerate() {
            let rank = match standings.last() {
                Some(prev) if prev.score.points == score.points => prev.rank,
                _ => i + 1,
            };
            standings.push(Standing {
                rank,
                id: id.clone(),
                score: score.clone(),
            });
        }
        standings
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        game_interface::Verdict,
        match_runner::FaultRecord,
        tournament::Context,
    };

    fn fixture(index: usize, a: &str, b: &str) -> Fixture {
        Fixture {
            index,
            round: 1,
            context: Context::Neutral,
            game: "tictactoe".to_string(),
            seats: [a.to_string(), b.to_string()],
            swapped: false,
        }
    }

    fn result(verdict: Verdict, faults: Vec<FaultRecord>) -> MatchResult {
        MatchResult {
            game: "tictactoe".to_string(),
            verdict,
            plies: 3,
            moves_made: [2, 1],
            faults,
            history: vec![],
            duration_ms: 1,
            final_state: json!(null),
        }
    }

    #[test]
    fn win_draw_and_forfeit() {
        let timeout = FaultRecord {
            player: Player::Second,
            kind: FaultKind::Timeout,
            ply: 3,
            detail: String::new(),
        };
        let fixtures = [fixture(0, "a", "b"), fixture(1, "b", "c"), fixture(2, "c", "a")];
        let results = [
            result(Verdict::win(Player::First, "win"), vec![]),
            result(Verdict::draw("draw"), vec![]),
            result(Verdict::win(Player::First, "timeout"), vec![timeout]),
        ];
        let scores =
            TournamentScore::from_results(["a", "b", "c"], fixtures.iter().zip(results.iter()));

        let a = scores.get("a").unwrap();
        assert_eq!((a.points, a.wins, a.losses), (1.0, 1, 1));
        assert_eq!(
            a.penalties,
            vec![Penalty {
                match_index: 2,
                kind: FaultKind::Timeout,
                ply: 3
            }]
        );
        let b = scores.get("b").unwrap();
        assert_eq!((b.points, b.draws, b.losses), (0.5, 1, 1));
        let c = scores.get("c").unwrap();
        assert_eq!((c.points, c.played), (1.5, 2));
        assert!(c.penalties.is_empty());
    }

    #[test]
    fn ties_share_a_rank() {
        let fixtures = [fixture(0, "a", "b"), fixture(1, "c", "d")];
        let results = [
            result(Verdict::win(Player::First, "win"), vec![]),
            result(Verdict::win(Player::First, "win"), vec![]),
        ];
        let scores = TournamentScore::from_results(
            ["d", "c", "b", "a"],
            fixtures.iter().zip(results.iter()),
        );
        let standings = scores
            .standings()
            .into_iter()
            .map(|s| (s.rank, s.id))
            .collect::<Vec<_>>();
        assert_eq!(
            standings,
            vec![
                (1, "a".to_string()),
                (1, "c".to_string()),
                (3, "b".to_string()),
                (3, "d".to_string())
            ]
        );
    }

    #[test]
    fn competitors_without_matches_are_listed() {
        let scores = TournamentScore::new(["solo"]);
        assert_eq!(scores.get("solo"), Some(&Score::default()));
        assert_eq!(scores.standings()[0].rank, 1);
        assert_eq!(scores.iter().count(), 1);
    }
}
