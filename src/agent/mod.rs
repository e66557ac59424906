//! Agents: anything that picks a move for one seat of a match.
//!
//! An agent is either an in-process implementation of [`Agent`] (see [`builtin`]) or an
//! external program driven through the line-delimited JSON protocol (see [`subprocess`]).
//! Both are described by an [`AgentSpec`] and instantiated, once per match, by an
//! [`AgentRegistry`].

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    game_interface::{Game, GameState, Move, Player},
    protocol::ProtocolError,
};

pub mod builtin;
pub mod process;
pub mod subprocess;

pub use builtin::{FirstMoveAgent, HumanAgent, RandomAgent};
pub use subprocess::{SubprocessAgent, SubprocessOptions, SubprocessSpec};

/// What an agent should implement
pub trait Agent: Send {
    /// Display name, used in logs.
    fn name(&self) -> &str;

    /// Chooses one of `legal_moves`.
    ///
    /// Returning a value that is not an element of `legal_moves` is an illegal-move fault.
    /// In-process agents run on the match thread and are not interrupted by the move timeout.
    fn select_move(
        &mut self,
        game: &dyn Game,
        state: &GameState,
        player: Player,
        legal_moves: &[Move],
    ) -> Result<Move, AgentFault>;

    /// Releases whatever the agent holds. Called once the match is over, may be called again.
    fn shutdown(&mut self) {}
}

/// Why an agent failed to deliver a valid move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// No terminating message before the move timeout.
    Timeout,
    /// The chosen move is not one of the offered moves.
    IllegalMove,
    /// The process exited, or one of its streams closed.
    AgentCrash,
    /// The agent reported an error instead of a move.
    AgentError,
    /// A terminating message lacked its payload.
    MissingField,
    /// A line that is not a JSON object with a string `type`.
    MalformedLine,
}

impl FaultKind {
    /// Snake-case label, as used in verdict reasons and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::Timeout => "timeout",
            FaultKind::IllegalMove => "illegal_move",
            FaultKind::AgentCrash => "agent_crash",
            FaultKind::AgentError => "agent_error",
            FaultKind::MissingField => "missing_field",
            FaultKind::MalformedLine => "malformed_line",
        }
    }

    /// Faults caused by a broken conversation rather than by the agent's choices.
    pub fn is_protocol_error(self) -> bool {
        matches!(self, FaultKind::MissingField | FaultKind::MalformedLine)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed move request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct AgentFault {
    /// Category
    pub kind: FaultKind,
    /// Free-form context
    pub detail: String,
}

impl AgentFault {
    /// Builds a fault.
    pub fn new(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<ProtocolError> for AgentFault {
    fn from(err: ProtocolError) -> Self {
        let kind = match err {
            ProtocolError::MissingField { .. } => FaultKind::MissingField,
            _ => FaultKind::MalformedLine,
        };
        AgentFault::new(kind, err.to_string())
    }
}

/// Configuration-level description of an agent.
///
/// Parsed from strings such as `human`, `random`, `random:42`, `first`,
/// `subprocess:python3 -u bot.py` or the name of an agent registered in an [`AgentRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSpec {
    /// Reads moves from the terminal.
    Human,
    /// Uniformly random legal move, optionally seeded.
    Random {
        /// Seed for a reproducible sequence
        seed: Option<u64>,
    },
    /// Always the first legal move.
    First,
    /// In-process agent registered under this name.
    Registered(String),
    /// External program speaking the JSONL protocol.
    Subprocess(SubprocessSpec),
}

impl FromStr for AgentSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(command) = s.strip_prefix("subprocess:") {
            let spec = SubprocessSpec::from_command_line(command)
                .with_context(|| format!("invalid agent '{s}'"))?;
            return Ok(AgentSpec::Subprocess(spec));
        }
        if let Some(seed) = s.strip_prefix("random:") {
            let seed = seed
                .parse()
                .with_context(|| format!("invalid seed in agent '{s}'"))?;
            return Ok(AgentSpec::Random { seed: Some(seed) });
        }
        match s {
            "" => bail!("empty agent specification"),
            "human" => Ok(AgentSpec::Human),
            "random" => Ok(AgentSpec::Random { seed: None }),
            "first" => Ok(AgentSpec::First),
            name => Ok(AgentSpec::Registered(name.to_string())),
        }
    }
}

impl fmt::Display for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSpec::Human => f.write_str("human"),
            AgentSpec::Random { seed: None } => f.write_str("random"),
            AgentSpec::Random { seed: Some(seed) } => write!(f, "random:{seed}"),
            AgentSpec::First => f.write_str("first"),
            AgentSpec::Registered(name) => f.write_str(name),
            AgentSpec::Subprocess(spec) => write!(f, "subprocess:{spec}"),
        }
    }
}

type AgentConstructor = Arc<dyn Fn() -> Box<dyn Agent> + Send + Sync>;

/// Maps names to in-process agent constructors, and turns [`AgentSpec`]s into live agents.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    constructors: BTreeMap<String, AgentConstructor>,
}

impl AgentRegistry {
    /// Registry without custom agents. Built-in specs (`human`, `random`, `first`,
    /// `subprocess:`) are always available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-process agent under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Agent> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Checks that `spec` can be instantiated, without starting anything.
    pub fn validate(&self, spec: &AgentSpec) -> anyhow::Result<()> {
        if let AgentSpec::Registered(name) = spec {
            if !self.constructors.contains_key(name) {
                bail!(
                    "unknown agent '{name}' (expected human, random[:seed], first, subprocess:<command> or one of: {})",
                    self.constructors.keys().cloned().collect::<Vec<_>>().join(", ")
                );
            }
        }
        Ok(())
    }

    /// Creates a fresh agent for one match. Subprocess agents are spawned here.
    pub fn instantiate(
        &self,
        spec: &AgentSpec,
        label: &str,
        options: &SubprocessOptions,
    ) -> anyhow::Result<Box<dyn Agent>> {
        self.validate(spec)?;
        let agent: Box<dyn Agent> = match spec {
            AgentSpec::Human => Box::new(HumanAgent::stdio(label)),
            AgentSpec::Random { seed } => Box::new(RandomAgent::new(label, *seed)),
            AgentSpec::First => Box::new(FirstMoveAgent::new(label)),
            AgentSpec::Registered(name) => (self.constructors[name])(),
            AgentSpec::Subprocess(spec) => Box::new(
                SubprocessAgent::spawn(label, spec, options)
                    .with_context(|| format!("could not start agent '{label}'"))?,
            ),
        };
        Ok(agent)
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}
