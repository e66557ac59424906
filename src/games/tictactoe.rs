//! Tic-tac-toe, the built-in game.

use serde_json::{json, Value};

use crate::game_interface::{Game, GameError, GameState, Move, Player, Terminal};

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Three in a row on a 3x3 board.
///
/// State: `{"board": [c0, ..., c8]}` with `0` empty, `1` player 0 and `2` player 1.
/// Moves are cell indices.
#[derive(Debug, Default, Clone, Copy)]
pub struct TicTacToe;

impl TicTacToe {
    fn board(state: &GameState) -> Result<[u8; 9], GameError> {
        let cells = state
            .get("board")
            .and_then(Value::as_array)
            .ok_or_else(|| GameError::InvalidState("missing 'board' array".to_string()))?;
        if cells.len() != 9 {
            return Err(GameError::InvalidState(format!(
                "board has {} cells instead of 9",
                cells.len()
            )));
        }
        let mut board = [0u8; 9];
        for (slot, cell) in board.iter_mut().zip(cells) {
            *slot = match cell.as_u64() {
                Some(v @ 0..=2) => v as u8,
                _ => return Err(GameError::InvalidState(format!("bad cell {cell}"))),
            };
        }
        Ok(board)
    }

    fn to_move(board: &[u8; 9]) -> Player {
        let first = board.iter().filter(|&&c| c == 1).count();
        let second = board.iter().filter(|&&c| c == 2).count();
        if first > second {
            Player::Second
        } else {
            Player::First
        }
    }

    fn winner(board: &[u8; 9]) -> Option<Player> {
        LINES.iter().find_map(|&[a, b, c]| {
            let v = board[a];
            if v != 0 && v == board[b] && v == board[c] {
                Some(if v == 1 { Player::First } else { Player::Second })
            } else {
                None
            }
        })
    }
}

impl Game for TicTacToe {
    fn name(&self) -> &str {
        "tictactoe"
    }

    fn initial_state(&self) -> GameState {
        let board = [0u8; 9];
        json!({ "board": board })
    }

    fn legal_moves(&self, state: &GameState, player: Player) -> Vec<Move> {
        let Ok(board) = Self::board(state) else {
            return vec![];
        };
        if Self::winner(&board).is_some() || Self::to_move(&board) != player {
            return vec![];
        }
        board
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == 0)
            .map(|(i, _)| json!(i))
            .collect()
    }

    fn apply_move(
        &self,
        state: &GameState,
        player: Player,
        mv: &Move,
    ) -> Result<GameState, GameError> {
        let mut board = Self::board(state)?;
        if Self::to_move(&board) != player {
            return Err(GameError::OutOfTurn { player });
        }
        let illegal = || GameError::IllegalMove {
            player,
            mv: mv.clone(),
        };
        let cell = mv.as_u64().filter(|&i| i < 9).ok_or_else(illegal)? as usize;
        if board[cell] != 0 || Self::winner(&board).is_some() {
            return Err(illegal());
        }
        board[cell] = player.index() as u8 + 1;
        Ok(json!({ "board": board }))
    }

    fn terminal(&self, state: &GameState) -> Terminal {
        let Ok(board) = Self::board(state) else {
            return Terminal::draw("invalid_state");
        };
        if let Some(winner) = Self::winner(&board) {
            return Terminal::win(winner, "win");
        }
        if board.iter().all(|&c| c != 0) {
            return Terminal::draw("draw");
        }
        Terminal::Ongoing
    }

    fn render(&self, state: &GameState) -> String {
        let Ok(board) = Self::board(state) else {
            return format!("<invalid board: {state}>");
        };
        board
            .chunks(3)
            .map(|row| {
                row.iter()
                    .map(|c| match c {
                        1 => "X",
                        2 => "O",
                        _ => ".",
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(moves: &[u64]) -> GameState {
        let game = TicTacToe;
        let mut state = game.initial_state();
        let mut player = Player::First;
        for &m in moves {
            state = game.apply_move(&state, player, &json!(m)).unwrap();
            player = player.opponent();
        }
        state
    }

    #[test]
    fn test_initial_moves() {
        let game = TicTacToe;
        let state = game.initial_state();
        assert_eq!(game.legal_moves(&state, Player::First).len(), 9);
        assert!(game.legal_moves(&state, Player::Second).is_empty());
        assert_eq!(game.terminal(&state), Terminal::Ongoing);
    }

    #[test]
    fn test_row_wins() {
        let state = play(&[0, 3, 1, 4, 2]);
        assert_eq!(
            TicTacToe.terminal(&state),
            Terminal::win(Player::First, "win")
        );
        assert!(TicTacToe.legal_moves(&state, Player::Second).is_empty());
    }

    #[test]
    fn test_full_board_draw() {
        let state = play(&[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        assert_eq!(TicTacToe.terminal(&state), Terminal::draw("draw"));
    }

    #[test]
    fn test_rejects_bad_moves() {
        let game = TicTacToe;
        let state = play(&[4]);
        assert_eq!(
            game.apply_move(&state, Player::Second, &json!(4)),
            Err(GameError::IllegalMove {
                player: Player::Second,
                mv: json!(4)
            })
        );
        assert_eq!(
            game.apply_move(&state, Player::First, &json!(0)),
            Err(GameError::OutOfTurn {
                player: Player::First
            })
        );
        assert!(game
            .apply_move(&state, Player::Second, &json!("corner"))
            .is_err());
    }

    #[test]
    fn test_apply_is_deterministic_and_pure() {
        let game = TicTacToe;
        let state = play(&[0, 8]);
        let before = state.clone();
        let a = game.apply_move(&state, Player::First, &json!(4)).unwrap();
        let b = game.apply_move(&state, Player::First, &json!(4)).unwrap();
        assert_eq!(a, b);
        assert_eq!(state, before);
    }

    #[test]
    fn test_render() {
        let state = play(&[0, 4]);
        assert_eq!(TicTacToe.render(&state), "X . .\n. O .\n. . .");
    }
}
