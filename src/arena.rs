//! Core orchestration: single matches and whole tournaments.
//!
//! This module defines the [`Arena`] type. Its responsibilities include:
//!
//! - Resolving game identifiers and agent specifications through registries
//! - Applying the limits of [`Constraints`] to every match
//! - Running tournament fixtures on worker threads, at most `concurrency` at a time
//! - Collecting results into a [`TournamentReport`]
//!
//! # Failure handling
//!
//! Agent faults are match results (forfeits), not errors. A fixture whose agents cannot be
//! started, whose game breaks its contract, or whose worker panics is recorded as an aborted
//! entry and the tournament goes on. Only configuration errors make
//! [`Arena::run_tournament`] fail.
//!
//! # Example
//!
//! ```no_run
//! use ai_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let constraints = ConstraintsBuilder::new().with_max_plies(100).build()?;
//!     let arena = Arena::new(Configuration::new(), constraints);
//!
//!     let roster = Roster::new(
//!         vec![
//!             Competitor::new("alpha", "tictactoe", "random:1".parse()?),
//!             Competitor::new("beta", "tictactoe", "subprocess:./bot".parse()?),
//!         ],
//!         "tictactoe",
//!     );
//!     let report = arena.run_tournament(&roster, None)?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

use std::{
    fmt::Write as _,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Sender},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, trace, warn};

use crate::{
    agent::{Agent, AgentRegistry, AgentSpec, SubprocessOptions},
    configuration::Configuration,
    constraints::Constraints,
    game_interface::Game,
    games::GameRegistry,
    logger::init_logger,
    match_runner::{run_match, MatchResult, MatchSettings},
    protocol::epoch_millis,
    replay::MatchLog,
    scoring::{Standing, TournamentScore},
    tournament::{Fixture, Roster},
    tournament_scheduler::{FixtureOutcome, ReportEntry, TournamentScheduler},
};

/// Everything a tournament produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentReport {
    /// Start time, in milliseconds since the Unix epoch
    pub started_ms: i64,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// One entry per fixture, in schedule order
    pub entries: Vec<ReportEntry>,
    /// Final totals
    pub scores: TournamentScore,
    /// Final ranking
    pub standings: Vec<Standing>,
}

impl TournamentReport {
    /// Number of fixtures that could not be played.
    pub fn aborted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, FixtureOutcome::Aborted { .. }))
            .count()
    }

    /// Human readable table of the matches followed by the scoreboard.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = write!(out, "{}: ", entry.fixture);
            match &entry.outcome {
                FixtureOutcome::Finished { result } => {
                    let _ = write!(out, "{} in {} plies", result.verdict, result.plies);
                    if let Some(fault) = result.forfeit() {
                        let _ = write!(
                            out,
                            " [{} forfeits: {} at ply {}]",
                            entry.fixture.seats[fault.player.index()],
                            fault.kind,
                            fault.ply
                        );
                    }
                }
                FixtureOutcome::Aborted { error } => {
                    let _ = write!(out, "ABORTED ({error})");
                }
            }
            out.push('\n');
        }
        out.push('\n');
        for standing in &self.standings {
            let score = &standing.score;
            let _ = writeln!(
                out,
                "{:>3}. {:<20} {:>5.1} pts  {}W {}D {}L  {} penalties",
                standing.rank,
                standing.id,
                score.points,
                score.wins,
                score.draws,
                score.losses,
                score.penalties.len()
            );
        }
        out
    }

    /// Writes the report as pretty JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("could not write {}", path.display()))
    }
}

/// Plays matches and tournaments.
#[derive(Debug)]
pub struct Arena {
    games: GameRegistry,
    agents: AgentRegistry,
    config: Configuration,
    constraints: Constraints,
}

impl Arena {
    /// Arena with the built-in games and agents.
    ///
    /// When [`Configuration`] enables logging, a log file is created in the current directory.
    #[instrument(skip_all)]
    pub fn new(config: Configuration, constraints: Constraints) -> Arena {
        if config.log {
            if let Err(e) = init_logger(Path::new(".")) {
                eprintln!("warning: {e:#}");
            }
        }
        trace!(?config, ?constraints);

        Arena {
            games: GameRegistry::with_builtins(),
            agents: AgentRegistry::new(),
            config,
            constraints,
        }
    }

    /// Replaces the game registry.
    pub fn with_games(mut self, games: GameRegistry) -> Self {
        self.games = games;
        self
    }

    /// Replaces the agent registry.
    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    /// Registered games
    pub fn games(&self) -> &GameRegistry {
        &self.games
    }

    /// Limits in use
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Plays one match of `game`, `agents[0]` moving first.
    ///
    /// # Errors
    /// Unknown game or agent, agent that cannot be started, or a game breaking its contract.
    pub fn play(&self, game: &str, agents: [&AgentSpec; 2]) -> anyhow::Result<MatchResult> {
        let job = MatchJob {
            game: self.games.get(game)?,
            specs: [agents[0].clone(), agents[1].clone()],
            labels: [format!("p0:{}", agents[0]), format!("p1:{}", agents[1])],
            registry: self.agents.clone(),
            options: self.subprocess_options(),
            settings: self.match_settings(),
        };
        job.run()
    }

    /// Runs every fixture of `roster`. With `log_dir`, one JSON [`MatchLog`] is written per
    /// finished fixture.
    ///
    /// # Errors
    /// Invalid roster: fewer than two competitors, duplicate ids, unknown game or agent.
    #[instrument(skip_all, fields(competitors = roster.competitors.len()))]
    pub fn run_tournament(
        &self,
        roster: &Roster,
        log_dir: Option<&Path>,
    ) -> anyhow::Result<TournamentReport> {
        roster.validate(&self.games, &self.agents)?;
        let fixtures = roster.fixtures()?;
        info!(
            fixtures = fixtures.len(),
            concurrency = self.constraints.concurrency,
            "starting tournament"
        );

        let started_ms = epoch_millis();
        let started = Instant::now();
        let _wrap_guard = self.config.verbose.then(LineWrapGuard::disable);

        let ids = roster.competitors.iter().map(|c| c.id.clone());
        let mut scheduler = TournamentScheduler::new(fixtures, ids, self.constraints.concurrency);
        let (tx_result, rx_result) = mpsc::channel();
        let running = Arc::new(Mutex::new(vec![]));

        for fixture in scheduler.advance() {
            self.launch_match(roster, fixture, log_dir, tx_result.clone(), &running)?;
        }

        while !scheduler.is_finished() {
            // not finished <=> match running <=> result to receive
            let (fixture, outcome) = rx_result
                .recv()
                .context("match workers stopped before sending their result")?;
            for next in scheduler.on_result(fixture, outcome) {
                self.launch_match(roster, next, log_dir, tx_result.clone(), &running)?;
            }
        }

        let (entries, scores) = scheduler.into_results();
        let report = TournamentReport {
            started_ms,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            standings: scores.standings(),
            entries,
            scores,
        };
        info!(
            duration_ms = report.duration_ms,
            aborted = report.aborted(),
            "tournament finished"
        );
        Ok(report)
    }

    fn launch_match(
        &self,
        roster: &Roster,
        fixture: Fixture,
        log_dir: Option<&Path>,
        tx_result: Sender<(Fixture, FixtureOutcome)>,
        running: &Arc<Mutex<Vec<Fixture>>>,
    ) -> anyhow::Result<()> {
        let seat = |i: usize| {
            roster
                .competitor(&fixture.seats[i])
                .with_context(|| format!("unknown competitor '{}'", fixture.seats[i]))
        };
        let (home, away) = (seat(0)?, seat(1)?);
        let job = MatchJob {
            game: self.games.get(&fixture.game)?,
            specs: [home.agent.clone(), away.agent.clone()],
            labels: [home.id.clone(), away.id.clone()],
            registry: self.agents.clone(),
            options: self.subprocess_options(),
            settings: self.match_settings(),
        };
        let log_path = log_dir.map(|dir| dir.join(fixture.log_path()));

        let mut guard = running.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(fixture.clone());
        if self.config.verbose {
            print_running_matches(&guard);
        }
        drop(guard);

        let verbose = self.config.verbose;
        let mutex = running.clone();
        let name = format!("match-{}", fixture.index);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let outcome = job.run_guarded(&fixture, log_path.as_deref());
                if verbose {
                    print_fixture_outcome(&fixture, &outcome);
                }
                remove_running_match(&mutex, &fixture);
                if tx_result.send((fixture, outcome)).is_err() {
                    error!("tournament loop is gone, dropping a match result");
                }
            })
            .context("could not spawn match thread")?;
        Ok(())
    }

    fn match_settings(&self) -> MatchSettings {
        self.constraints
            .match_settings(self.config.verify_determinism)
    }

    fn subprocess_options(&self) -> SubprocessOptions {
        self.constraints
            .subprocess_options(self.config.debug_agent_stderr)
    }
}

/// Everything a worker thread needs to play one match.
struct MatchJob {
    game: Arc<dyn Game>,
    specs: [AgentSpec; 2],
    labels: [String; 2],
    registry: AgentRegistry,
    options: SubprocessOptions,
    settings: MatchSettings,
}

impl MatchJob {
    fn run(&self) -> anyhow::Result<MatchResult> {
        let first = self.instantiate(0)?;
        let second = self.instantiate(1)?;
        let agents: [Box<dyn Agent>; 2] = [first, second];
        run_match(self.game.as_ref(), agents, self.settings)
            .with_context(|| format!("game '{}' broke its contract", self.game.name()))
    }

    fn instantiate(&self, seat: usize) -> anyhow::Result<Box<dyn Agent>> {
        self.registry
            .instantiate(&self.specs[seat], &self.labels[seat], &self.options)
    }

    /// Plays the match, turning errors and panics into an aborted outcome.
    fn run_guarded(&self, fixture: &Fixture, log_path: Option<&Path>) -> FixtureOutcome {
        let played = panic::catch_unwind(AssertUnwindSafe(|| self.run()));
        match played {
            Ok(Ok(result)) => {
                if let Some(path) = log_path {
                    write_match_log(self.game.as_ref(), &result, path);
                }
                FixtureOutcome::Finished { result }
            }
            Ok(Err(e)) => {
                error!("{fixture} aborted: {e:#}");
                FixtureOutcome::Aborted {
                    error: format!("{e:#}"),
                }
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("{fixture} panicked: {message}");
                FixtureOutcome::Aborted {
                    error: format!("panic: {message}"),
                }
            }
        }
    }
}

fn write_match_log(game: &dyn Game, result: &MatchResult, path: &Path) {
    let log = MatchLog::new(game, result.clone());
    if let Err(e) = log.save(path) {
        warn!("could not write match log: {e:#}");
    }
}

/// Default location of the log of a single match.
pub fn default_log_path(game: &str) -> PathBuf {
    PathBuf::from(format!("{game}_{}.json", epoch_millis()))
}

fn remove_running_match(mutex: &Mutex<Vec<Fixture>>, fixture: &Fixture) {
    let mut guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(pos) = guard.iter().position(|f| f.index == fixture.index) {
        guard.remove(pos);
    }
}

fn print_fixture_outcome(fixture: &Fixture, outcome: &FixtureOutcome) {
    let (result, errors) = match outcome {
        FixtureOutcome::Finished { result } => (
            result.verdict.to_string(),
            result
                .forfeit()
                .map(|f| format!("{} at ply {}", f.kind, f.ply))
                .unwrap_or_default(),
        ),
        FixtureOutcome::Aborted { error } => ("aborted".to_string(), error.clone()),
    };
    // clear line, green match, results, red errors, start of line
    println!("\x1b[2K\x1b[32m{fixture}: \x1b[39m{result} \x1b[31m{errors}\x1b[39m\x1b[0G");
}

fn print_running_matches(running: &[Fixture]) {
    // clear, green, default, start of line
    print!(
        "\x1b[2K\x1b[32mRunning...:\x1b[39m {}\x1b[0G",
        running
            .iter()
            .map(|f| format!("#{}", f.index))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

/// Disables terminal line wrapping until dropped.
struct LineWrapGuard;

impl LineWrapGuard {
    fn disable() -> Self {
        print!("\x1b[?7l");
        LineWrapGuard
    }
}

impl Drop for LineWrapGuard {
    fn drop(&mut self) {
        print!("\x1b[?7h");
        let _ = std::io::Write::flush(&mut std::io::stdout());
    }
}
