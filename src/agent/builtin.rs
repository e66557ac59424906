//! In-process agents shipped with the arena.

use std::io::{self, BufRead, Write};

use rand::{seq::IndexedRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Agent, AgentFault, FaultKind};
use crate::game_interface::{Game, GameState, Move, Player};

fn no_moves() -> AgentFault {
    AgentFault::new(FaultKind::AgentError, "no legal move to choose from")
}

/// Plays a uniformly random legal move.
///
/// Two agents built with the same seed play the same sequence of choices.
#[derive(Debug, Clone)]
pub struct RandomAgent {
    name: String,
    rng: ChaCha8Rng,
}

impl RandomAgent {
    /// Seeded from the OS when `seed` is `None`.
    pub fn new(name: impl Into<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self {
            name: name.into(),
            rng,
        }
    }
}

impl Agent for RandomAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_move(
        &mut self,
        _game: &dyn Game,
        _state: &GameState,
        _player: Player,
        legal_moves: &[Move],
    ) -> Result<Move, AgentFault> {
        legal_moves.choose(&mut self.rng).cloned().ok_or_else(no_moves)
    }
}

/// Always plays the first legal move.
#[derive(Debug, Clone)]
pub struct FirstMoveAgent {
    name: String,
}

impl FirstMoveAgent {
    /// Named agent.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Agent for FirstMoveAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_move(
        &mut self,
        _game: &dyn Game,
        _state: &GameState,
        _player: Player,
        legal_moves: &[Move],
    ) -> Result<Move, AgentFault> {
        legal_moves.first().cloned().ok_or_else(no_moves)
    }
}

/// Asks a person for moves.
///
/// The rendered state and the numbered legal moves are written to `output`; the answer is read
/// from `input`, either as the number of a move or as the move itself in JSON.
pub struct HumanAgent {
    name: String,
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

impl HumanAgent {
    /// Reads from stdin and prompts on stdout.
    pub fn stdio(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }

    /// Custom streams.
    pub fn new(
        name: impl Into<String>,
        input: Box<dyn BufRead + Send>,
        output: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
        }
    }

    fn prompt(
        &mut self,
        game: &dyn Game,
        state: &GameState,
        player: Player,
        legal_moves: &[Move],
    ) -> io::Result<()> {
        writeln!(self.output, "{}", game.render(state))?;
        writeln!(self.output, "{} (player {player}), choose a move:", self.name)?;
        for (i, mv) in legal_moves.iter().enumerate() {
            writeln!(self.output, "  [{i}] {mv}")?;
        }
        write!(self.output, "> ")?;
        self.output.flush()
    }

    fn parse_answer(answer: &str, legal_moves: &[Move]) -> Option<Move> {
        if let Ok(i) = answer.parse::<usize>() {
            if let Some(mv) = legal_moves.get(i) {
                return Some(mv.clone());
            }
        }
        let mv = serde_json::from_str::<Move>(answer).ok()?;
        legal_moves.contains(&mv).then_some(mv)
    }
}

impl std::fmt::Debug for HumanAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanAgent")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Agent for HumanAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_move(
        &mut self,
        game: &dyn Game,
        state: &GameState,
        player: Player,
        legal_moves: &[Move],
    ) -> Result<Move, AgentFault> {
        if legal_moves.is_empty() {
            return Err(no_moves());
        }
        let io_fault = |e: io::Error| AgentFault::new(FaultKind::AgentCrash, e.to_string());
        self.prompt(game, state, player, legal_moves)
            .map_err(io_fault)?;
        loop {
            let mut answer = String::new();
            if self.input.read_line(&mut answer).map_err(io_fault)? == 0 {
                return Err(AgentFault::new(FaultKind::AgentError, "input closed"));
            }
            if let Some(mv) = Self::parse_answer(answer.trim(), legal_moves) {
                return Ok(mv);
            }
            write!(self.output, "not a legal move, try again\n> ")
                .and_then(|()| self.output.flush())
                .map_err(io_fault)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;
    use crate::games::TicTacToe;

    fn moves() -> Vec<Move> {
        vec![json!(2), json!(5), json!(7)]
    }

    #[test]
    fn random_agent_is_reproducible() {
        let game = TicTacToe;
        let state = game.initial_state();
        let legal = moves();
        let mut a = RandomAgent::new("a", Some(7));
        let mut b = RandomAgent::new("b", Some(7));
        for _ in 0..20 {
            let ma = a.select_move(&game, &state, Player::First, &legal).unwrap();
            let mb = b.select_move(&game, &state, Player::First, &legal).unwrap();
            assert_eq!(ma, mb);
            assert!(legal.contains(&ma));
        }
    }

    #[test]
    fn first_move_agent() {
        let game = TicTacToe;
        let state = game.initial_state();
        let mut agent = FirstMoveAgent::new("first");
        assert_eq!(
            agent.select_move(&game, &state, Player::First, &moves()),
            Ok(json!(2))
        );
        assert_eq!(
            agent
                .select_move(&game, &state, Player::First, &[])
                .unwrap_err()
                .kind,
            FaultKind::AgentError
        );
    }

    #[test]
    fn human_agent_accepts_index_or_json() {
        let game = TicTacToe;
        let state = game.initial_state();
        let input = Cursor::new("9\nhello\n1\n7\n");
        let mut agent = HumanAgent::new("me", Box::new(input), Box::new(io::sink()));
        assert_eq!(
            agent.select_move(&game, &state, Player::First, &moves()),
            Ok(json!(5))
        );
        assert_eq!(
            agent.select_move(&game, &state, Player::First, &moves()),
            Ok(json!(7))
        );
        let fault = agent
            .select_move(&game, &state, Player::First, &moves())
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::AgentError);
    }
}
