//! Tournament roster and fixture enumeration.
//!
//! Every competitor brings an agent and a home game. For `n >= 2` competitors in roster order,
//! with `next(c)` the competitor after `c` (cyclically), one round holds:
//!
//! - **home** (`n` fixtures): `c` vs `next(c)` on `c`'s home game,
//! - **away** (`n * (n - 1)` fixtures): for each ordered pair of distinct competitors, the
//!   visitor `c` vs the host `r` on `r`'s home game,
//! - **neutral** (`n` fixtures): `c` vs `next(c)` on the neutral game.
//!
//! The first named competitor takes seat 0 and moves first. With `swap_starts`, every fixture
//! is followed by its mirror with the seats exchanged, so each side moves first once. The round
//! is repeated `rounds` times.
//!
//! A roster is usually loaded from a TOML file:
//!
//! ```toml
//! neutral_game = "tictactoe"
//! rounds = 2
//! swap_starts = true
//! log_dir = "logs"
//! move_timeout_secs = 30
//!
//! [[competitors]]
//! id = "alpha"
//! home_game = "tictactoe"
//! agent = "subprocess:python3 -u bot.py"
//! cwd = "bots/alpha"
//! env = { MODEL = "small" }
//!
//! [[competitors]]
//! id = "beta"
//! agent = "random:7"
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    agent::{AgentRegistry, AgentSpec, SubprocessSpec},
    games::GameRegistry,
};

const DEFAULT_GAME: &str = "tictactoe";

/// A tournament participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Competitor {
    /// Unique identifier
    pub id: String,
    /// Game this competitor hosts
    pub home_game: String,
    /// Agent playing for this competitor
    pub agent: AgentSpec,
}

impl Competitor {
    /// New competitor.
    pub fn new(id: impl Into<String>, home_game: impl Into<String>, agent: AgentSpec) -> Self {
        Self {
            id: id.into(),
            home_game: home_game.into(),
            agent,
        }
    }
}

/// Which competitor authored the game being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    /// The seat 0 competitor's own game
    Home,
    /// The seat 1 competitor's game
    Away,
    /// The shared neutral game
    Neutral,
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Context::Home => "home",
            Context::Away => "away",
            Context::Neutral => "neutral",
        })
    }
}

/// One scheduled match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fixture {
    /// Position in the schedule, also the match index used by penalties
    pub index: usize,
    /// 1-based round
    pub round: u32,
    /// Pairing context
    pub context: Context,
    /// Game identifier
    pub game: String,
    /// Competitor ids, seat 0 first
    pub seats: [String; 2],
    /// Mirror of the previous fixture, seats exchanged
    #[serde(default)]
    pub swapped: bool,
}

impl Fixture {
    /// Relative path of the JSON log of this fixture.
    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(format!("{}_vs_{}", self.seats[0], self.seats[1]))
            .join(format!(
                "{}_{}_r{}{}.json",
                self.context,
                self.game,
                self.round,
                if self.swapped { "_swapped" } else { "" }
            ))
    }
}

impl fmt::Display for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} vs {} ({} {}, r{}{})",
            self.index,
            self.seats[0],
            self.seats[1],
            self.context,
            self.game,
            self.round,
            if self.swapped { ", swapped" } else { "" }
        )
    }
}

/// Competitors, neutral game and number of rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    /// Participants, in roster order
    pub competitors: Vec<Competitor>,
    /// Game played in neutral fixtures
    pub neutral_game: String,
    /// Repetitions of the fixture list
    pub rounds: u32,
    /// Play every fixture a second time with the seats exchanged
    pub swap_starts: bool,
}

impl Roster {
    /// One-round roster.
    pub fn new(competitors: Vec<Competitor>, neutral_game: impl Into<String>) -> Self {
        Self {
            competitors,
            neutral_game: neutral_game.into(),
            rounds: 1,
            swap_starts: false,
        }
    }

    /// Sets the number of rounds.
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Enables or disables the mirrored fixtures.
    pub fn with_swap_starts(mut self, swap_starts: bool) -> Self {
        self.swap_starts = swap_starts;
        self
    }

    /// Looks a competitor up by id.
    pub fn competitor(&self, id: &str) -> Option<&Competitor> {
        self.competitors.iter().find(|c| c.id == id)
    }

    /// Checks the roster shape, and that every game and agent can be resolved.
    pub fn validate(&self, games: &GameRegistry, agents: &AgentRegistry) -> anyhow::Result<()> {
        self.check_shape()?;
        games
            .get(&self.neutral_game)
            .context("invalid neutral game")?;
        for competitor in &self.competitors {
            games
                .get(&competitor.home_game)
                .with_context(|| format!("invalid home game for '{}'", competitor.id))?;
            agents
                .validate(&competitor.agent)
                .with_context(|| format!("invalid agent for '{}'", competitor.id))?;
        }
        Ok(())
    }

    fn check_shape(&self) -> anyhow::Result<()> {
        if self.competitors.len() < 2 {
            bail!(
                "a tournament needs at least two competitors, got {}",
                self.competitors.len()
            );
        }
        if self.rounds == 0 {
            bail!("rounds must be at least 1");
        }
        let mut seen = HashSet::new();
        for competitor in &self.competitors {
            if competitor.id.is_empty() {
                bail!("competitor ids must not be empty");
            }
            if !seen.insert(competitor.id.as_str()) {
                bail!("duplicate competitor id '{}'", competitor.id);
            }
        }
        Ok(())
    }

    /// Every fixture of the tournament, in schedule order:
    /// `rounds * (n + n * (n - 1) + n)` of them, twice as many with `swap_starts`.
    pub fn fixtures(&self) -> anyhow::Result<Vec<Fixture>> {
        self.check_shape()?;
        let n = self.competitors.len();
        let mut pairings = Vec::with_capacity(n * (n + 1));

        for (i, c) in self.competitors.iter().enumerate() {
            let next = &self.competitors[(i + 1) % n];
            pairings.push((Context::Home, c.home_game.clone(), [&c.id, &next.id]));
        }
        for visitor in &self.competitors {
            for host in self.competitors.iter().filter(|h| h.id != visitor.id) {
                pairings.push((Context::Away, host.home_game.clone(), [&visitor.id, &host.id]));
            }
        }
        for (i, c) in self.competitors.iter().enumerate() {
            let next = &self.competitors[(i + 1) % n];
            pairings.push((Context::Neutral, self.neutral_game.clone(), [&c.id, &next.id]));
        }

        let sides: &[bool] = if self.swap_starts {
            &[false, true]
        } else {
            &[false]
        };
        let mut fixtures = Vec::with_capacity(pairings.len() * sides.len() * self.rounds as usize);
        for round in 1..=self.rounds {
            for (context, game, [a, b]) in &pairings {
                for &swapped in sides {
                    let seats = if swapped { [b, a] } else { [a, b] };
                    fixtures.push(Fixture {
                        index: fixtures.len(),
                        round,
                        context: *context,
                        game: game.clone(),
                        seats: seats.map(|id| id.to_string()),
                        swapped,
                    });
                }
            }
        }
        Ok(fixtures)
    }
}

/// Tournament description as written in a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TournamentFile {
    /// Game played in neutral fixtures
    #[serde(default = "default_game")]
    pub neutral_game: String,
    /// Repetitions of the fixture list
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Mirror every fixture with the seats exchanged
    #[serde(default)]
    pub swap_starts: bool,
    /// Directory receiving one JSON log per fixture
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Overrides the move timeout
    #[serde(default)]
    pub move_timeout_secs: Option<u64>,
    /// Overrides the ply cap
    #[serde(default)]
    pub max_plies: Option<u32>,
    /// Overrides the number of matches run at once
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Participants
    pub competitors: Vec<CompetitorEntry>,
}

/// A `[[competitors]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompetitorEntry {
    /// Unique identifier
    pub id: String,
    /// Hosted game
    #[serde(default = "default_game")]
    pub home_game: String,
    /// Agent specification string
    #[serde(default)]
    pub agent: Option<String>,
    /// Program and arguments, instead of a `subprocess:` agent string
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Working directory of a subprocess agent
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overrides of a subprocess agent
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_game() -> String {
    DEFAULT_GAME.to_string()
}

fn default_rounds() -> u32 {
    1
}

impl TournamentFile {
    /// Parses TOML text.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid tournament file")
    }

    /// Reads and parses a file. Relative `cwd` and `log_dir` paths are resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
        let mut file =
            Self::parse(&text).with_context(|| format!("while loading {}", path.display()))?;
        if let Some(base) = path.parent() {
            file.log_dir = file.log_dir.map(|dir| base.join(dir));
            for entry in &mut file.competitors {
                entry.cwd = entry.cwd.take().map(|dir| base.join(dir));
            }
        }
        Ok(file)
    }

    /// Builds the roster.
    pub fn roster(&self) -> anyhow::Result<Roster> {
        let competitors = self
            .competitors
            .iter()
            .map(|entry| {
                entry
                    .competitor()
                    .with_context(|| format!("invalid competitor '{}'", entry.id))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Roster::new(competitors, self.neutral_game.clone())
            .with_rounds(self.rounds)
            .with_swap_starts(self.swap_starts))
    }
}

impl CompetitorEntry {
    fn competitor(&self) -> anyhow::Result<Competitor> {
        let agent = match (&self.agent, &self.command) {
            (Some(_), Some(_)) => bail!("'agent' and 'command' are mutually exclusive"),
            (None, None) => bail!("one of 'agent' or 'command' is required"),
            (Some(spec), None) => spec.parse::<AgentSpec>()?,
            (None, Some(command)) => {
                let Some((program, args)) = command.split_first() else {
                    bail!("'command' must not be empty");
                };
                AgentSpec::Subprocess(SubprocessSpec::new(program.clone()).with_args(args))
            }
        };
        let agent = match agent {
            AgentSpec::Subprocess(mut spec) => {
                if let Some(cwd) = &self.cwd {
                    spec = spec.with_working_dir(cwd);
                }
                spec.env.extend(self.env.clone());
                AgentSpec::Subprocess(spec)
            }
            other => {
                if self.cwd.is_some() || !self.env.is_empty() {
                    warn!(
                        "'{}': cwd and env only apply to subprocess agents, ignoring them",
                        self.id
                    );
                }
                other
            }
        };
        Ok(Competitor::new(&self.id, &self.home_game, agent))
    }
}
