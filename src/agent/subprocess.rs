//! Agents running as separate programs, speaking the line protocol of [`crate::protocol`].

use std::{
    collections::BTreeMap,
    fmt,
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::bail;
use tracing::{debug, instrument, trace, warn};

use super::{
    process::{AgentProcess, ReadResult, WriteResult},
    Agent, AgentFault, FaultKind,
};
use crate::{
    game_interface::{Game, GameState, Move, Player},
    protocol::{decode_line, AgentMessage, TurnMessage},
};

/// How to start an external agent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubprocessSpec {
    /// Executable, looked up in `PATH` when not a path
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Working directory, the arena's own when `None`
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl SubprocessSpec {
    /// Program without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Splits a command line on whitespace. Quotes are rejected: use [`SubprocessSpec::new`]
    /// and [`SubprocessSpec::with_args`] (or the `command` array of a roster) when an argument
    /// contains spaces.
    pub fn from_command_line(command: &str) -> anyhow::Result<Self> {
        if command.contains('"') || command.contains('\'') {
            bail!("command line should not contain any quote");
        }
        let mut words = command.split_whitespace().map(String::from);
        let Some(program) = words.next() else {
            bail!("empty command line");
        };
        Ok(Self::new(program).with_args(words))
    }

    /// Appends arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for SubprocessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runtime limits applied to subprocess agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubprocessOptions {
    /// Time allowed between sending a turn and receiving the answer
    pub move_timeout: Duration,
    /// Time left to the process to exit on its own before it is killed
    pub termination_grace: Duration,
    /// Forward the agent's stderr to the arena's
    pub allow_stderr: bool,
}

impl Default for SubprocessOptions {
    fn default() -> Self {
        Self {
            move_timeout: Duration::from_secs(3600),
            termination_grace: Duration::from_secs(1),
            allow_stderr: false,
        }
    }
}

/// An agent running as a separate program, one JSON message per line.
///
/// Any fault terminates the process: a faulted agent is never asked for another move.
#[derive(Debug)]
pub struct SubprocessAgent {
    name: String,
    process: AgentProcess,
    move_timeout: Duration,
}

impl SubprocessAgent {
    /// Starts the program. Fails if it cannot be spawned.
    pub fn spawn(
        name: &str,
        spec: &SubprocessSpec,
        options: &SubprocessOptions,
    ) -> anyhow::Result<Self> {
        let process = AgentProcess::launch(
            name,
            spec,
            options.allow_stderr,
            options.termination_grace,
        )?;
        Ok(Self {
            name: name.to_string(),
            process,
            move_timeout: options.move_timeout,
        })
    }

    /// OS process id of the agent (the leader of its process group on unix).
    pub fn pid(&self) -> u32 {
        self.process.id()
    }

    fn fault(&mut self, kind: FaultKind, detail: impl Into<String>) -> AgentFault {
        let fault = AgentFault::new(kind, detail);
        warn!(agent = %self.name, "{fault}");
        self.process.terminate();
        fault
    }

    fn await_move(&mut self, legal_moves: &[Move], deadline: Instant) -> Result<Move, AgentFault> {
        loop {
            let line = match self.process.read_line_until(deadline) {
                ReadResult::Line(line) => line,
                ReadResult::Timeout => {
                    let detail = format!("no move within {:?}", self.move_timeout);
                    return Err(self.fault(FaultKind::Timeout, detail));
                }
                ReadResult::Disconnected => {
                    return Err(self.fault(FaultKind::AgentCrash, "stdout closed"));
                }
                ReadResult::Invalid(e) => return Err(self.fault(FaultKind::MalformedLine, e)),
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line) {
                Ok(AgentMessage::Ignored(kind)) => {
                    trace!(agent = %self.name, "ignoring '{kind}' message");
                }
                Ok(AgentMessage::Move(mv)) if legal_moves.contains(&mv) => return Ok(mv),
                Ok(AgentMessage::Move(mv)) => {
                    return Err(self.fault(FaultKind::IllegalMove, format!("{mv} is not legal")));
                }
                Ok(AgentMessage::Error(text)) => {
                    return Err(self.fault(FaultKind::AgentError, text));
                }
                Err(e) => {
                    let fault = AgentFault::from(e);
                    return Err(self.fault(fault.kind, fault.detail));
                }
            }
        }
    }
}

impl Agent for SubprocessAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(agent = %self.name, %player))]
    fn select_move(
        &mut self,
        game: &dyn Game,
        state: &GameState,
        player: Player,
        legal_moves: &[Move],
    ) -> Result<Move, AgentFault> {
        let deadline = Instant::now() + self.move_timeout;
        let message = TurnMessage::new(game.name(), player, state, legal_moves)
            .encode()
            .map_err(AgentFault::from)?;
        match self.process.write_line_until(message, deadline) {
            WriteResult::Written => {}
            WriteResult::Timeout => {
                let detail = format!("turn not read within {:?}", self.move_timeout);
                return Err(self.fault(FaultKind::Timeout, detail));
            }
            WriteResult::Failed(e) => {
                let detail = format!("could not send turn: {e}");
                return Err(self.fault(FaultKind::AgentCrash, detail));
            }
        }
        let mv = self.await_move(legal_moves, deadline)?;
        debug!("answered {mv}");
        Ok(mv)
    }

    fn shutdown(&mut self) {
        self.process.terminate();
    }
}
