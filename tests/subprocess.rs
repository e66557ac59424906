#![cfg(unix)]

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use ai_arena::{
    agent::{
        Agent, FaultKind, FirstMoveAgent, RandomAgent, SubprocessAgent, SubprocessOptions,
        SubprocessSpec,
    },
    game_interface::{Game, GameError, GameState, Move, Player, Terminal},
    games::TicTacToe,
    match_runner::{run_match, MatchResult, MatchSettings},
};
use serde_json::json;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing_subscriber::{fmt, layer::SubscriberExt, Registry};

#[allow(dead_code)]
fn init_debug_logger() {
    let format = fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);
    let reg = Registry::default().with(fmt::layer().event_format(format));
    let _ = tracing::subscriber::set_global_default(reg);
}

fn bot(script: &str) -> SubprocessSpec {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("bots")
        .join(script);
    SubprocessSpec::new("sh").with_args([path.to_string_lossy().into_owned()])
}

fn options(move_timeout: Duration) -> SubprocessOptions {
    SubprocessOptions {
        move_timeout,
        termination_grace: Duration::from_millis(200),
        allow_stderr: false,
    }
}

fn spawn(script: &str) -> SubprocessAgent {
    SubprocessAgent::spawn(script, &bot(script), &options(Duration::from_secs(5))).unwrap()
}

fn is_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// The subprocess faults as the first player on its first turn.
fn first_turn_fault(script: &str) -> (MatchResult, u32) {
    let agent = spawn(script);
    let pid = agent.pid();
    let result = run_match(
        &TicTacToe,
        [Box::new(agent), Box::new(FirstMoveAgent::new("first"))],
        MatchSettings::default(),
    )
    .unwrap();
    (result, pid)
}

#[test]
fn error_message_forfeits_at_first_ply() {
    let (result, pid) = first_turn_fault("gives_up.sh");
    assert_eq!(result.winner(), Some(Player::Second));
    assert_eq!(result.verdict.reason, "agent_error");
    assert_eq!(result.plies, 0);
    let fault = result.forfeit().unwrap();
    assert_eq!((fault.player, fault.kind, fault.ply), (Player::First, FaultKind::AgentError, 0));
    assert!(fault.detail.contains("cannot play this game"));
    assert!(!is_running(pid));
}

#[test]
fn illegal_move_forfeits() {
    let (result, _) = first_turn_fault("illegal.sh");
    assert_eq!(result.winner(), Some(Player::Second));
    assert_eq!(result.forfeit().unwrap().kind, FaultKind::IllegalMove);
}

#[test]
fn crash_forfeits() {
    let (result, _) = first_turn_fault("crash.sh");
    assert_eq!(result.forfeit().unwrap().kind, FaultKind::AgentCrash);
}

#[test]
fn garbage_line_forfeits() {
    let (result, _) = first_turn_fault("garbage.sh");
    assert_eq!(result.forfeit().unwrap().kind, FaultKind::MalformedLine);
}

#[test]
fn move_without_field_forfeits() {
    let (result, _) = first_turn_fault("missing_field.sh");
    assert_eq!(result.forfeit().unwrap().kind, FaultKind::MissingField);
    assert!(result.forfeit().unwrap().kind.is_protocol_error());
}

#[test]
fn slow_agent_times_out_promptly() {
    let timeout = Duration::from_millis(300);
    let agent = SubprocessAgent::spawn("sleepy", &bot("sleepy.sh"), &options(timeout)).unwrap();
    let pid = agent.pid();

    let start = Instant::now();
    let result = run_match(
        &TicTacToe,
        [Box::new(FirstMoveAgent::new("first")), Box::new(agent)],
        MatchSettings::default(),
    )
    .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result.winner(), Some(Player::First));
    assert_eq!(result.verdict.reason, "timeout");
    let fault = result.forfeit().unwrap();
    assert_eq!((fault.player, fault.ply), (Player::Second, 1));
    assert_eq!(result.moves_made, [1, 0]);
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    assert!(!is_running(pid));
}

#[test]
fn sigterm_resistant_agent_is_killed() {
    let timeout = Duration::from_millis(200);
    let mut agent =
        SubprocessAgent::spawn("stubborn", &bot("stubborn.sh"), &options(timeout)).unwrap();
    let pid = agent.pid();
    let game = TicTacToe;
    let state = game.initial_state();
    let legal = game.legal_moves(&state, Player::First);

    let start = Instant::now();
    let fault = agent
        .select_move(&game, &state, Player::First, &legal)
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!is_running(pid));
}

/// A game whose state is far larger than a pipe buffer.
struct Bulky;

impl Game for Bulky {
    fn name(&self) -> &str {
        "bulky"
    }

    fn initial_state(&self) -> GameState {
        json!({ "padding": "x".repeat(256 * 1024) })
    }

    fn legal_moves(&self, _state: &GameState, _player: Player) -> Vec<Move> {
        vec![json!(0)]
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
fn unread_turn_times_out() {
    let timeout = Duration::from_millis(300);
    let mut agent =
        SubprocessAgent::spawn("sleepy", &bot("sleepy.sh"), &options(timeout)).unwrap();
    let pid = agent.pid();
    let state = Bulky.initial_state();
    let legal = Bulky.legal_moves(&state, Player::First);

    let start = Instant::now();
    let fault = agent
        .select_move(&Bulky, &state, Player::First, &legal)
        .unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(fault.kind, FaultKind::Timeout);
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    assert!(!is_running(pid));
}

#[test]
fn full_match_against_subprocess() {
    let agent = spawn("first_legal.sh");
    let pid = agent.pid();
    let result = run_match(
        &TicTacToe,
        [Box::new(agent), Box::new(RandomAgent::new("random", Some(11)))],
        MatchSettings::default(),
    )
    .unwrap();
    assert!(result.faults.is_empty());
    assert!(result.plies >= 5);
    assert_eq!(result.history.len() as u32, result.plies);
    assert!(TicTacToe.terminal(&result.final_state).is_decided());
    assert!(!is_running(pid));
}

#[test]
fn teardown_is_idempotent() {
    let mut agent = spawn("sleepy.sh");
    let pid = agent.pid();
    assert!(is_running(pid));
    agent.shutdown();
    agent.shutdown();
    assert!(!is_running(pid));
    drop(agent);
}
