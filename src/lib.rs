//! # Ai Arena
//!
//! A harness refereeing two-player, turn-based, perfect-information games between agents, and
//! running home/away/neutral tournaments between competitors.
//!
//! It provides:
//! - A game capability set ([`Game`](crate::game_interface::Game)) and a registry of games
//! - In-process agents and subprocess agents speaking line-delimited JSON over stdin/stdout
//! - A match runner enforcing turn order, move legality, per-move timeouts and a ply cap
//! - A tournament scheduler with bounded concurrency and tie-aware score aggregation
//!
//! Each subprocess agent runs as a separate OS process for the duration of one match, and is
//! terminated (then killed if needed) when the match ends or as soon as it faults.
//!
//! # Documentation Overview
//!
//! - For running matches and tournaments, see the [`arena`] module.
//! - For configuring behavior and limits, see [`Configuration`](crate::configuration::Configuration)
//!   and [`constraints`].
//! - For implementing custom games, see the [`Game`](crate::game_interface::Game) trait.
//! - For custom agents, see the [`Agent`](crate::agent::Agent) trait and the [`protocol`] module.
//! - For fixture enumeration and scoring, see [`tournament`] and [`scoring`].
//!
//! # Usage Example
//!
//! ```no_run
//! use ai_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let constraints = ConstraintsBuilder::new()
//!         .with_move_timeout(std::time::Duration::from_secs(10))
//!         .build()?;
//!     let arena = Arena::new(Configuration::new().with_verbose(false), constraints);
//!
//!     let p0: AgentSpec = "random:42".parse()?;
//!     let p1: AgentSpec = "subprocess:python3 -u my_bot.py".parse()?;
//!     let result = arena.play("tictactoe", [&p0, &p1])?;
//!     println!("{} after {} plies", result.verdict, result.plies);
//!     Ok(())
//! }
//! ```
//!
//! # Example Agent
//!
//! A subprocess agent reads one turn per line and answers with one line:
//!
//! ```text
//! arena -> agent  {"type":"turn","game":"tictactoe","player":0,"state":{..},"legal_moves":[0,1,..],"ts_ms":1700000000000}
//! agent -> arena  {"type":"move","move":4}
//! ```
//!
//! A minimal agent in shell, always playing the first legal move:
//!
//! ```sh
//! while read -r line; do
//!   mv=$(printf '%s' "$line" | sed -e 's/.*"legal_moves":\[\([^],]*\).*/\1/')
//!   printf '{"type":"move","move":%s}\n' "$mv"
//! done
//! ```
//!
//! ## Agent Requirements
//!
//! - One JSON object per line, flushed after each line
//! - The chosen move must be equal to one of `legal_moves`
//! - `{"type":"error","error":"..."}` gives up the match
//! - Lines with another `type` are ignored and may be used for logs
//! - Agent logic must answer within the configured timeout
#![warn(missing_docs)]

pub mod agent;
pub mod arena;
pub mod configuration;
pub mod constraints;
pub mod game_interface;
pub mod games;
pub mod logger;
pub mod match_runner;
pub mod protocol;
pub mod replay;
pub mod scoring;
pub mod tournament;
pub mod tournament_scheduler;
pub use anyhow;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use ai_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Arena`](crate::arena::Arena)
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`ConstraintsBuilder`](crate::constraints::ConstraintsBuilder)
/// - the game and agent traits, and tournament types
pub mod prelude {
    pub use crate::agent::{Agent, AgentFault, AgentRegistry, AgentSpec, FaultKind};
    pub use crate::arena::{Arena, TournamentReport};
    pub use crate::configuration::Configuration;
    pub use crate::constraints::ConstraintsBuilder;
    pub use crate::game_interface::{Game, GameError, GameState, Move, Player, Terminal, Verdict};
    pub use crate::games::GameRegistry;
    pub use crate::match_runner::MatchResult;
    pub use crate::tournament::{Competitor, Roster};
}
