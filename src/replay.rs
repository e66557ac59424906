//! Match logs, and rebuilding the positions of a finished match from its move history.

use std::{fs, path::Path};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{
    game_interface::{Game, GameState, Terminal, Verdict},
    match_runner::{MatchResult, MoveRecord},
};

/// JSON document written for every logged match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchLog {
    /// Game identifier
    pub game: String,
    /// Full match result
    pub result: MatchResult,
    /// Rendering of the final position
    pub final_render: String,
}

impl MatchLog {
    /// Log of `result`, rendered with `game`.
    pub fn new(game: &dyn Game, result: MatchResult) -> Self {
        Self {
            game: game.name().to_string(),
            final_render: game.render(&result.final_state),
            result,
        }
    }

    /// Writes the log as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("could not write {}", path.display()))
    }

    /// Reads a log written by [`MatchLog::save`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("{} is not a match log", path.display()))
    }
}

/// Positions of a replayed match.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    /// `states[0]` is the initial state, `states[i + 1]` the state after move `i`
    pub states: Vec<GameState>,
    /// Status of the last state
    pub terminal: Terminal,
}

impl Replay {
    /// Last reached state.
    pub fn final_state(&self) -> &GameState {
        // states always holds at least the initial state
        &self.states[self.states.len() - 1]
    }
}

/// Replays `history` from the initial state. A ply carrying a fault note ends the replay
/// without changing the state.
pub fn replay(game: &dyn Game, history: &[MoveRecord]) -> anyhow::Result<Replay> {
    let mut states = vec![game.initial_state()];
    for record in history {
        if record.note.is_some() {
            break;
        }
        let current = &states[states.len() - 1];
        let next = game
            .apply_move(current, record.player, &record.mv)
            .with_context(|| format!("ply {} does not replay", record.ply))?;
        states.push(next);
    }
    let terminal = game.terminal(&states[states.len() - 1]);
    Ok(Replay { states, terminal })
}

/// Replays a log. The verdict is the game's when the final position is decided, the recorded
/// one otherwise (forfeits, ply cap).
pub fn replay_log(game: &dyn Game, log: &MatchLog) -> anyhow::Result<(Replay, Verdict)> {
    if log.game != game.name() {
        bail!(
            "log was recorded for '{}', not '{}'",
            log.game,
            game.name()
        );
    }
    let replay = replay(game, &log.result.history)?;
    if replay.final_state() != &log.result.final_state {
        bail!("replayed final state differs from the recorded one");
    }
    let verdict = match &replay.terminal {
        Terminal::Decided(verdict) => verdict.clone(),
        Terminal::Ongoing => log.result.verdict.clone(),
    };
    Ok((replay, verdict))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        agent::{Agent, FirstMoveAgent},
        game_interface::Player,
        games::TicTacToe,
        match_runner::{run_match, MatchSettings},
    };

    fn first_vs_first() -> MatchResult {
        let agents: [Box<dyn Agent>; 2] = [
            Box::new(FirstMoveAgent::new("a")),
            Box::new(FirstMoveAgent::new("b")),
        ];
        run_match(&TicTacToe, agents, MatchSettings::default()).unwrap()
    }

    #[test]
    fn replay_rebuilds_every_state() {
        let result = first_vs_first();
        let replay = replay(&TicTacToe, &result.history).unwrap();
        assert_eq!(replay.states.len(), result.history.len() + 1);
        assert_eq!(replay.states[0], TicTacToe.initial_state());
        assert_eq!(replay.final_state(), &result.final_state);
        assert_eq!(replay.terminal, Terminal::Decided(result.verdict));
    }

    #[test]
    fn fault_note_stops_the_replay() {
        let history = vec![
            MoveRecord {
                ply: 0,
                player: Player::First,
                mv: json!(4),
                elapsed_ms: 1,
                note: None,
            },
            MoveRecord {
                ply: 1,
                player: Player::Second,
                mv: json!(null),
                elapsed_ms: 1,
                note: Some("timeout: no move".to_string()),
            },
        ];
        let replay = replay(&TicTacToe, &history).unwrap();
        assert_eq!(replay.states.len(), 2);
        assert_eq!(replay.terminal, Terminal::Ongoing);
    }

    #[test]
    fn log_round_trip_on_disk() {
        let result = first_vs_first();
        let log = MatchLog::new(&TicTacToe, result);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/match.json");
        log.save(&path).unwrap();
        let loaded = MatchLog::load(&path).unwrap();
        assert_eq!(loaded, log);
        let (_, verdict) = replay_log(&TicTacToe, &loaded).unwrap();
        assert_eq!(verdict, log.result.verdict);
    }

    #[test]
    fn replay_rejects_foreign_logs() {
        let mut log = MatchLog::new(&TicTacToe, first_vs_first());
        log.game = "chess".to_string();
        assert!(replay_log(&TicTacToe, &log).is_err());
    }
}
