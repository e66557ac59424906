//! Module defining the capability set a game must implement to be refereed by the arena
//!
//! A game is a pure state transition function: the arena owns every [`GameState`] between
//! moves and never expects the game to keep anything of its own. States and moves are plain
//! JSON values so that they can be handed to subprocess agents unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque, structurally comparable game state.
pub type GameState = serde_json::Value;

/// Opaque, structurally comparable move.
pub type Move = serde_json::Value;

/// One of the two seats of a match. [`Player::First`] always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Player {
    /// Player 0
    First,
    /// Player 1
    Second,
}

impl Player {
    /// Both seats, in turn order.
    pub const BOTH: [Player; 2] = [Player::First, Player::Second];

    /// 0 or 1
    pub fn index(self) -> usize {
        match self {
            Player::First => 0,
            Player::Second => 1,
        }
    }

    /// The other seat.
    pub fn opponent(self) -> Player {
        match self {
            Player::First => Player::Second,
            Player::Second => Player::First,
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> u8 {
        player.index() as u8
    }
}

impl TryFrom<u8> for Player {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Player::First),
            1 => Ok(Player::Second),
            other => Err(format!("player id must be 0 or 1, got {other}")),
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// How a finished game was decided. `winner == None` is a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Winning seat, `None` for a draw
    pub winner: Option<Player>,
    /// Short machine-friendly reason (`"win"`, `"draw"`, `"timeout"`, ...)
    pub reason: String,
}

impl Verdict {
    /// A decided game with a winner.
    pub fn win(winner: Player, reason: impl Into<String>) -> Self {
        Self {
            winner: Some(winner),
            reason: reason.into(),
        }
    }

    /// A decided game without winner.
    pub fn draw(reason: impl Into<String>) -> Self {
        Self {
            winner: None,
            reason: reason.into(),
        }
    }

    /// True if nobody won
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.winner {
            Some(winner) => write!(f, "player {winner} wins ({})", self.reason),
            None => write!(f, "draw ({})", self.reason),
        }
    }
}

/// Terminal status of a state, as reported by [`Game::terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The side to move can still act.
    Ongoing,
    /// The game is over.
    Decided(Verdict),
}

impl Terminal {
    /// Shorthand for a decided game with a winner.
    pub fn win(winner: Player, reason: impl Into<String>) -> Self {
        Terminal::Decided(Verdict::win(winner, reason))
    }

    /// Shorthand for a drawn game.
    pub fn draw(reason: impl Into<String>) -> Self {
        Terminal::Decided(Verdict::draw(reason))
    }

    /// True unless [`Terminal::Ongoing`]
    pub fn is_decided(&self) -> bool {
        matches!(self, Terminal::Decided(_))
    }
}

/// Errors a game may return from [`Game::apply_move`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GameError {
    /// `mv` is not one of `legal_moves(state, player)`
    #[error("illegal move {mv} for player {player}")]
    IllegalMove {
        /// seat that tried to move
        player: Player,
        /// the rejected move
        mv: Move,
    },
    /// It is not `player`'s turn in `state`
    #[error("player {player} moved out of turn")]
    OutOfTurn {
        /// seat that tried to move
        player: Player,
    },
    /// The state does not have the shape the game expects
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// What the game should implement
///
/// Every method is a pure function of its arguments: two calls with structurally equal
/// inputs must return structurally equal outputs, and no argument is ever mutated.
pub trait Game: Send + Sync {
    /// Identifier sent to agents in every turn notification.
    fn name(&self) -> &str;

    /// Starting position. Must be deterministic.
    fn initial_state(&self) -> GameState;

    /// Every move `player` may play in `state`.
    ///
    /// Empty if and only if `player` has no available action. The order is kept when the
    /// moves are reported to agents, but does not imply any priority.
    fn legal_moves(&self, state: &GameState, player: Player) -> Vec<Move>;

    /// Returns the state reached when `player` plays `mv` in `state`.
    ///
    /// # Errors
    /// [`GameError::IllegalMove`] if `mv` is not in `legal_moves(state, player)`,
    /// [`GameError::OutOfTurn`] if it is not `player`'s turn.
    fn apply_move(&self, state: &GameState, player: Player, mv: &Move)
        -> Result<GameState, GameError>;

    /// Win/draw/turn-limit status of `state`.
    ///
    /// Must only return [`Terminal::Ongoing`] when the side to move has at least one legal move.
    fn terminal(&self, state: &GameState) -> Terminal;

    /// Human-readable rendering, for diagnostics only.
    fn render(&self, state: &GameState) -> String;
}

#[cfg(test)]
mod interface_tests {
    use serde_json::json;

    use super::*;

    /// Counts up to three, then the player who reached three wins.
    struct CountGame;

    impl Game for CountGame {
        fn name(&self) -> &str {
            "count"
        }

        fn initial_state(&self) -> GameState {
            json!(0)
        }

        fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
            vec![json!(1)]
        }

        fn apply_move(
            &self,
            state: &GameState,
            player: Player,
            mv: &Move,
        ) -> Result<GameState, GameError> {
            if mv != &json!(1) {
                return Err(GameError::IllegalMove {
                    player,
                    mv: mv.clone(),
                });
            }
            let n = state.as_u64().ok_or_else(|| GameError::InvalidState(state.to_string()))?;
            Ok(json!(n + 1))
        }

        fn terminal(&self, state: &GameState) -> Terminal {
            match state.as_u64() {
                Some(3) => Terminal::win(Player::First, "three"),
                _ => Terminal::Ongoing,
            }
        }

        fn render(&self, state: &GameState) -> String {
            state.to_string()
        }
    }

    fn borrow_game(game: &dyn Game) -> GameState {
        game.initial_state()
    }

    #[test]
    fn test_dyn_game() {
        let game = CountGame;
        assert_eq!(borrow_game(&game), json!(0));
        let next = game.apply_move(&json!(0), Player::First, &json!(1)).unwrap();
        assert_eq!(next, json!(1));
        assert!(matches!(
            game.apply_move(&json!(0), Player::First, &json!(2)),
            Err(GameError::IllegalMove { .. })
        ));
    }

    #[test]
    fn test_player_round_trips_as_number() {
        assert_eq!(serde_json::to_string(&Player::Second).unwrap(), "1");
        let p: Player = serde_json::from_str("0").unwrap();
        assert_eq!(p, Player::First);
        assert!(serde_json::from_str::<Player>("2").is_err());
        assert_eq!(Player::First.opponent(), Player::Second);
        assert_eq!(Player::Second.opponent().index(), 0);
    }

    #[test]
    fn test_terminal_helpers() {
        assert!(!Terminal::Ongoing.is_decided());
        let Terminal::Decided(verdict) = Terminal::draw("draw") else {
            panic!("expected decided");
        };
        assert!(verdict.is_draw());
        assert_eq!(verdict.to_string(), "draw (draw)");
        assert_eq!(
            Verdict::win(Player::Second, "win").to_string(),
            "player 1 wins (win)"
        );
    }
}
