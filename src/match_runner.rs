//! One match: two agents, one game, alternating plies until the game is decided.
//!
//! The runner goes `NotStarted -> InProgress -> Finished`. Each ply of `InProgress` requests a
//! move from the side to move, validates and applies it, then checks the terminal status.
//! Agent faults end the match as a forfeit; a broken game definition ends it with a
//! [`ContractViolation`] instead of a result.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    agent::{Agent, AgentFault, FaultKind},
    game_interface::{Game, GameError, GameState, Move, Player, Terminal, Verdict},
};

/// Reason of the draw declared when the ply cap is reached.
pub const PLY_CAP_REASON: &str = "ply_cap";

/// Per-match limits and checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    /// Plies after which the match is declared drawn, whatever the game says
    pub max_plies: u32,
    /// Evaluate `legal_moves` and `apply_move` twice and compare the results
    pub verify_determinism: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            max_plies: 10_000,
            verify_determinism: false,
        }
    }
}

/// A forfeit-causing agent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Seat at fault
    pub player: Player,
    /// What went wrong
    pub kind: FaultKind,
    /// Ply at which it happened (0 is the first move of the match)
    pub ply: u32,
    /// Context
    pub detail: String,
}

/// One entry of the move history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 0-based ply index
    pub ply: u32,
    /// Seat that moved
    pub player: Player,
    /// The move, `null` when the ply ended in a fault
    #[serde(rename = "move")]
    pub mv: Move,
    /// Time the agent took to answer
    pub elapsed_ms: u64,
    /// Set when the ply ended in a fault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Outcome of a finished match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Game identifier
    pub game: String,
    /// Final verdict. Forfeits use the fault kind as reason.
    pub verdict: Verdict,
    /// Plies successfully applied
    pub plies: u32,
    /// Successful moves per seat
    pub moves_made: [u32; 2],
    /// Agent faults, at most one since a fault ends the match
    pub faults: Vec<FaultRecord>,
    /// Every ply, including the faulted one
    pub history: Vec<MoveRecord>,
    /// Wall-clock duration of the match
    pub duration_ms: u64,
    /// State reached at the end of the match
    pub final_state: GameState,
}

impl MatchResult {
    /// The fault that ended the match, if it was a forfeit.
    pub fn forfeit(&self) -> Option<&FaultRecord> {
        self.faults.first()
    }

    /// Winning seat, `None` for a draw.
    pub fn winner(&self) -> Option<Player> {
        self.verdict.winner
    }
}

/// The game definition broke its own contract.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractViolation {
    /// `terminal` says ongoing but the side to move has nothing to play
    #[error("ply {ply}: game reports ongoing but player {player} has no legal move")]
    NoLegalMoves {
        /// ply index
        ply: u32,
        /// side to move
        player: Player,
    },
    /// `apply_move` refused a move taken from `legal_moves`
    #[error("ply {ply}: legal move {mv} of player {player} was rejected: {source}")]
    LegalMoveRejected {
        /// ply index
        ply: u32,
        /// side to move
        player: Player,
        /// the rejected move
        mv: Move,
        /// error returned by the game
        #[source]
        source: GameError,
    },
    /// Two evaluations with equal inputs disagreed
    #[error("ply {ply}: '{operation}' is not deterministic")]
    NonDeterministic {
        /// ply index
        ply: u32,
        /// offending operation
        operation: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    InProgress,
    Finished,
}

/// Drives one match. Both agents are shut down when the runner finishes or is dropped.
pub struct MatchRunner<'g> {
    game: &'g dyn Game,
    agents: [Box<dyn Agent>; 2],
    settings: MatchSettings,
    phase: Phase,
    state: GameState,
    active: Player,
    plies: u32,
    moves_made: [u32; 2],
    history: Vec<MoveRecord>,
    faults: Vec<FaultRecord>,
    started: Instant,
}

impl<'g> MatchRunner<'g> {
    /// `agents[0]` plays first.
    pub fn new(game: &'g dyn Game, agents: [Box<dyn Agent>; 2], settings: MatchSettings) -> Self {
        Self {
            game,
            agents,
            settings,
            phase: Phase::NotStarted,
            state: GameState::Null,
            active: Player::First,
            plies: 0,
            moves_made: [0; 2],
            history: vec![],
            faults: vec![],
            started: Instant::now(),
        }
    }

    /// Plays the match to the end.
    #[instrument(skip_all, fields(game = self.game.name()))]
    pub fn run(mut self) -> Result<MatchResult, ContractViolation> {
        let outcome = loop {
            match self.step() {
                Ok(Some(verdict)) => break Ok(verdict),
                Ok(None) => {}
                Err(violation) => break Err(violation),
            }
        };
        self.phase = Phase::Finished;
        self.shutdown_agents();

        let verdict = outcome.map_err(|violation| {
            warn!("match aborted: {violation}");
            violation
        })?;
        let result = MatchResult {
            game: self.game.name().to_string(),
            verdict,
            plies: self.plies,
            moves_made: self.moves_made,
            faults: std::mem::take(&mut self.faults),
            history: std::mem::take(&mut self.history),
            duration_ms: duration_ms(self.started.elapsed()),
            final_state: std::mem::take(&mut self.state),
        };
        info!(
            "{} vs {}: {} after {} plies",
            self.agents[0].name(),
            self.agents[1].name(),
            result.verdict,
            result.plies
        );
        Ok(result)
    }

    /// Advances by one ply. Returns the verdict once the match is over.
    fn step(&mut self) -> Result<Option<Verdict>, ContractViolation> {
        match self.phase {
            Phase::NotStarted => {
                self.state = self.game.initial_state();
                self.active = Player::First;
                self.started = Instant::now();
                self.phase = Phase::InProgress;
                info!(
                    "starting {} vs {}",
                    self.agents[0].name(),
                    self.agents[1].name()
                );
            }
            Phase::InProgress | Phase::Finished => {}
        }

        if let Terminal::Decided(verdict) = self.game.terminal(&self.state) {
            return Ok(Some(verdict));
        }
        if self.plies >= self.settings.max_plies {
            info!("ply cap of {} reached", self.settings.max_plies);
            return Ok(Some(Verdict::draw(PLY_CAP_REASON)));
        }

        let (ply, player) = (self.plies, self.active);
        let legal_moves = self.game.legal_moves(&self.state, player);
        if legal_moves.is_empty() {
            return Err(ContractViolation::NoLegalMoves { ply, player });
        }
        if self.settings.verify_determinism
            && self.game.legal_moves(&self.state, player) != legal_moves
        {
            return Err(ContractViolation::NonDeterministic {
                ply,
                operation: "legal_moves",
            });
        }

        let asked = Instant::now();
        let answer =
            self.agents[player.index()].select_move(self.game, &self.state, player, &legal_moves);
        let elapsed_ms = duration_ms(asked.elapsed());

        let mv = match answer {
            Ok(mv) if legal_moves.contains(&mv) => mv,
            Ok(mv) => {
                let fault = AgentFault::new(FaultKind::IllegalMove, format!("{mv} is not legal"));
                return Ok(Some(self.forfeit(player, fault, elapsed_ms)));
            }
            Err(fault) => return Ok(Some(self.forfeit(player, fault, elapsed_ms))),
        };

        let next = self
            .game
            .apply_move(&self.state, player, &mv)
            .map_err(|source| ContractViolation::LegalMoveRejected {
                ply,
                player,
                mv: mv.clone(),
                source,
            })?;
        if self.settings.verify_determinism
            && self.game.apply_move(&self.state, player, &mv).as_ref() != Ok(&next)
        {
            return Err(ContractViolation::NonDeterministic {
                ply,
                operation: "apply_move",
            });
        }
        debug!(ply, %player, "played {mv} in {elapsed_ms}ms");

        self.history.push(MoveRecord {
            ply,
            player,
            mv,
            elapsed_ms,
            note: None,
        });
        self.moves_made[player.index()] += 1;
        self.state = next;
        self.plies += 1;
        self.active = player.opponent();
        Ok(None)
    }

    fn forfeit(&mut self, player: Player, fault: AgentFault, elapsed_ms: u64) -> Verdict {
        let ply = self.plies;
        warn!(ply, %player, "forfeit: {fault}");
        self.history.push(MoveRecord {
            ply,
            player,
            mv: Move::Null,
            elapsed_ms,
            note: Some(fault.to_string()),
        });
        self.faults.push(FaultRecord {
            player,
            kind: fault.kind,
            ply,
            detail: fault.detail,
        });
        Verdict::win(player.opponent(), fault.kind.as_str())
    }

    fn shutdown_agents(&mut self) {
        for agent in &mut self.agents {
            agent.shutdown();
        }
    }
}

impl Drop for MatchRunner<'_> {
    fn drop(&mut self) {
        self.shutdown_agents();
    }
}

/// Plays one match between `agents` (seat 0 first).
pub fn run_match(
    game: &dyn Game,
    agents: [Box<dyn Agent>; 2],
    settings: MatchSettings,
) -> Result<MatchResult, ContractViolation> {
    MatchRunner::new(game, agents, settings).run()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::*;
    use crate::{
        agent::{FirstMoveAgent, RandomAgent},
        games::TicTacToe,
    };

    /// Plays a scripted list of moves, then errors.
    struct Scripted {
        moves: Vec<Move>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn boxed(moves: Vec<Move>, shutdowns: &Arc<AtomicUsize>) -> Box<dyn Agent> {
            Box::new(Scripted {
                moves: moves.into_iter().rev().collect(),
                shutdowns: shutdowns.clone(),
            })
        }
    }

    impl Agent for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn select_move(
            &mut self,
            _game: &dyn Game,
            _state: &GameState,
            _player: Player,
            _legal_moves: &[Move],
        ) -> Result<Move, AgentFault> {
            self.moves
                .pop()
                .ok_or_else(|| AgentFault::new(FaultKind::AgentError, "script exhausted"))
        }

        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Always ongoing, one legal move, never terminal.
    struct Endless;

    impl Game for Endless {
        fn name(&self) -> &str {
            "endless"
        }
        fn initial_state(&self) -> GameState {
            json!(0)
        }
        fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
            vec![json!("pass")]
        }
        fn apply_move(
            &self,
            state: &GameState,
            _player: Player,
            _mv: &Move,
        ) -> Result<GameState, GameError> {
            Ok(json!(state.as_u64().unwrap_or(0) + 1))
        }
        fn terminal(&self, _state: &GameState) -> Terminal {
            Terminal::Ongoing
        }
        fn render(&self, state: &GameState) -> String {
            state.to_string()
        }
    }

    /// Ongoing forever but without any move.
    struct Stuck;

    impl Game for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }
        fn initial_state(&self) -> GameState {
            json!(null)
        }
        fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
            vec![]
        }
        fn apply_move(
            &self,
            state: &GameState,
            _player: Player,
            _mv: &Move,
        ) -> Result<GameState, GameError> {
            Ok(state.clone())
        }
        fn terminal(&self, _state: &GameState) -> Terminal {
            Terminal::Ongoing
        }
        fn render(&self, _state: &GameState) -> String {
            String::new()
        }
    }

    #[test]
    fn scripted_win() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let p0 = Scripted::boxed(vec![json!(0), json!(1), json!(2)], &shutdowns);
        let p1 = Scripted::boxed(vec![json!(3), json!(4)], &shutdowns);
        let result = run_match(&TicTacToe, [p0, p1], MatchSettings::default()).unwrap();
        assert_eq!(result.verdict, Verdict::win(Player::First, "win"));
        assert_eq!(result.plies, 5);
        assert_eq!(result.moves_made, [3, 2]);
        assert!(result.faults.is_empty());
        assert_eq!(result.history.len(), 5);
        assert_eq!(result.history[4].ply, 4);
        assert_eq!(result.game, "tictactoe");
        assert!(shutdowns.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn illegal_move_is_a_forfeit() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let p0 = Scripted::boxed(vec![json!(4), json!(4)], &shutdowns);
        let p1 = Scripted::boxed(vec![json!(0)], &shutdowns);
        let result = run_match(&TicTacToe, [p0, p1], MatchSettings::default()).unwrap();
        assert_eq!(result.verdict, Verdict::win(Player::Second, "illegal_move"));
        let fault = result.forfeit().unwrap();
        assert_eq!(fault.player, Player::First);
        assert_eq!(fault.kind, FaultKind::IllegalMove);
        assert_eq!(fault.ply, 2);
        assert_eq!(result.moves_made, [1, 1]);
        assert_eq!(result.history.last().unwrap().mv, Move::Null);
        assert!(result.history.last().unwrap().note.is_some());
    }

    #[test]
    fn agent_error_on_first_ply() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let p0 = Scripted::boxed(vec![], &shutdowns);
        let p1 = Box::new(FirstMoveAgent::new("first"));
        let result = run_match(&TicTacToe, [p0, p1], MatchSettings::default()).unwrap();
        assert_eq!(result.winner(), Some(Player::Second));
        assert_eq!(result.faults[0].kind, FaultKind::AgentError);
        assert_eq!(result.faults[0].ply, 0);
        assert_eq!(result.plies, 0);
    }

    #[test]
    fn ply_cap_is_a_distinct_draw() {
        let settings = MatchSettings {
            max_plies: 7,
            verify_determinism: true,
        };
        let agents: [Box<dyn Agent>; 2] = [
            Box::new(FirstMoveAgent::new("a")),
            Box::new(FirstMoveAgent::new("b")),
        ];
        let result = run_match(&Endless, agents, settings).unwrap();
        assert_eq!(result.verdict, Verdict::draw(PLY_CAP_REASON));
        assert_eq!(result.plies, 7);
        assert_eq!(result.moves_made, [4, 3]);
        assert_eq!(result.final_state, json!(7));
    }

    #[test]
    fn ongoing_without_moves_is_a_contract_violation() {
        let agents: [Box<dyn Agent>; 2] = [
            Box::new(FirstMoveAgent::new("a")),
            Box::new(FirstMoveAgent::new("b")),
        ];
        let err = run_match(&Stuck, agents, MatchSettings::default()).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::NoLegalMoves {
                ply: 0,
                player: Player::First
            }
        );
    }

    /// Offers a different move on every call.
    #[derive(Default)]
    struct DriftingMoves {
        calls: AtomicUsize,
    }

    impl Game for DriftingMoves {
        fn name(&self) -> &str {
            "drifting-moves"
        }
        fn initial_state(&self) -> GameState {
            json!(0)
        }
        fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
            vec![json!(self.calls.fetch_add(1, Ordering::SeqCst))]
        }
        fn apply_move(
            &self,
            state: &GameState,
            _player: Player,
            _mv: &Move,
        ) -> Result<GameState, GameError> {
            Ok(state.clone())
        }
        fn terminal(&self, _state: &GameState) -> Terminal {
            Terminal::Ongoing
        }
        fn render(&self, _state: &GameState) -> String {
            String::new()
        }
    }

    /// Reaches a different state on every call.
    #[derive(Default)]
    struct DriftingStates {
        calls: AtomicUsize,
    }

    impl Game for DriftingStates {
        fn name(&self) -> &str {
            "drifting-states"
        }
        fn initial_state(&self) -> GameState {
            json!(0)
        }
        fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
            vec![json!("pass")]
        }
        fn apply_move(
            &self,
            _state: &GameState,
            _player: Player,
            _mv: &Move,
        ) -> Result<GameState, GameError> {
            Ok(json!(self.calls.fetch_add(1, Ordering::SeqCst)))
        }
        fn terminal(&self, _state: &GameState) -> Terminal {
            Terminal::Ongoing
        }
        fn render(&self, _state: &GameState) -> String {
            String::new()
        }
    }

    /// Refuses the only move it offers.
    struct SelfContradicting;

    impl Game for SelfContradicting {
        fn name(&self) -> &str {
            "self-contradicting"
        }
        fn initial_state(&self) -> GameState {
            json!(null)
        }
        fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
            vec![json!(1)]
        }
        fn apply_move(
            &self,
            _state: &GameState,
            _player: Player,
            _mv: &Move,
        ) -> Result<GameState, GameError> {
            Err(GameError::InvalidState("board is corrupted".to_string()))
        }
        fn terminal(&self, _state: &GameState) -> Terminal {
            Terminal::Ongoing
        }
        fn render(&self, _state: &GameState) -> String {
            String::new()
        }
    }

    fn first_movers() -> [Box<dyn Agent>; 2] {
        [
            Box::new(FirstMoveAgent::new("a")),
            Box::new(FirstMoveAgent::new("b")),
        ]
    }

    fn verifying() -> MatchSettings {
        MatchSettings {
            max_plies: 10,
            verify_determinism: true,
        }
    }

    #[test]
    fn unstable_legal_moves_are_detected() {
        let err = run_match(&DriftingMoves::default(), first_movers(), verifying()).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::NonDeterministic {
                ply: 0,
                operation: "legal_moves"
            }
        );
    }

    #[test]
    fn unstable_transitions_are_detected() {
        let err = run_match(&DriftingStates::default(), first_movers(), verifying()).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::NonDeterministic {
                ply: 0,
                operation: "apply_move"
            }
        );

        // without verification the game is trusted
        let settings = MatchSettings {
            max_plies: 3,
            verify_determinism: false,
        };
        let result = run_match(&DriftingStates::default(), first_movers(), settings).unwrap();
        assert_eq!(result.verdict, Verdict::draw(PLY_CAP_REASON));
    }

    #[test]
    fn rejected_legal_move_is_a_contract_violation() {
        let err = run_match(&SelfContradicting, first_movers(), MatchSettings::default())
            .unwrap_err();
        let ContractViolation::LegalMoveRejected {
            ply,
            player,
            mv,
            source,
        } = err
        else {
            panic!("expected a rejected move, got {err}");
        };
        assert_eq!((ply, player, mv), (0, Player::First, json!(1)));
        assert_eq!(source, GameError::InvalidState("board is corrupted".to_string()));
    }

    #[test]
    fn seeded_random_self_play_always_ends() {
        for seed in 0..20 {
            let agents: [Box<dyn Agent>; 2] = [
                Box::new(RandomAgent::new("r0", Some(seed))),
                Box::new(RandomAgent::new("r1", Some(seed))),
            ];
            let result = run_match(&TicTacToe, agents, MatchSettings::default()).unwrap();
            assert!(result.plies <= 9);
            assert!(result.faults.is_empty());
            assert!(TicTacToe.terminal(&result.final_state).is_decided());
        }
    }
}
