//! Bounded-concurrency fixture scheduling.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{match_runner::MatchResult, scoring::TournamentScore, tournament::Fixture};

/// How a scheduled fixture ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixtureOutcome {
    /// The match was played to a verdict
    Finished {
        /// Match result
        result: MatchResult,
    },
    /// The match could not be played (spawn failure, broken game, panic)
    Aborted {
        /// Error, with its context
        error: String,
    },
}

/// A fixture together with its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Scheduled pairing
    pub fixture: Fixture,
    /// What happened
    pub outcome: FixtureOutcome,
}

/// Hands out fixtures, at most `concurrency` at a time, and collects their outcomes.
///
/// The scheduler is only driven from the thread that owns it: every outcome is recorded exactly
/// once, in completion order.
#[derive(Debug)]
pub struct TournamentScheduler {
    pending: VecDeque<Fixture>,
    outcomes: Vec<Option<ReportEntry>>,
    scores: TournamentScore,
    concurrency: usize,
    running_matches: usize,
}

impl TournamentScheduler {
    /// Scheduler for `fixtures`, scoring the competitors `ids`.
    pub fn new<I, S>(fixtures: Vec<Fixture>, ids: I, concurrency: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TournamentScheduler {
            outcomes: vec![None; fixtures.len()],
            pending: fixtures.into(),
            scores: TournamentScore::new(ids),
            concurrency: concurrency.max(1),
            running_matches: 0,
        }
    }

    /// Fixtures to start now.
    pub fn advance(&mut self) -> Vec<Fixture> {
        let free = self.concurrency.saturating_sub(self.running_matches);
        let matches_to_run = self
            .pending
            .drain(..free.min(self.pending.len()))
            .collect::<Vec<_>>();
        self.running_matches += matches_to_run.len();
        trace!(
            started = matches_to_run.len(),
            running = self.running_matches,
            pending = self.pending.len()
        );
        matches_to_run
    }

    /// Records the outcome of a started fixture, and returns the fixtures to start next.
    pub fn on_result(&mut self, fixture: Fixture, outcome: FixtureOutcome) -> Vec<Fixture> {
        if let FixtureOutcome::Finished { result } = &outcome {
            self.scores.record(&fixture, result);
        }
        let index = fixture.index;
        match self.outcomes.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(ReportEntry { fixture, outcome }),
            _ => tracing::error!("unexpected result for fixture #{index}, ignoring it"),
        }
        self.running_matches = self.running_matches.saturating_sub(1);
        self.advance()
    }

    /// All fixtures ran and finished
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.running_matches == 0
    }

    /// Number of fixtures with a recorded outcome
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_some()).count()
    }

    /// Entries in fixture order, and the final scores.
    pub fn into_results(self) -> (Vec<ReportEntry>, TournamentScore) {
        (self.outcomes.into_iter().flatten().collect(), self.scores)
    }
}
