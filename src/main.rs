//! ai-arena command-line interface
//!
//! Commands:
//! - list-games: print the registered games
//! - play: play one match
//! - tournament: run a roster file
//! - replay: print every position of a match log

use std::{path::PathBuf, process::ExitCode, time::Duration};

use ai_arena::{
    agent::AgentSpec,
    arena::{default_log_path, Arena},
    configuration::Configuration,
    constraints::ConstraintsBuilder,
    games::GameRegistry,
    logger::init_stderr_logger,
    replay::{replay_log, MatchLog},
    tournament::TournamentFile,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "ai-arena")]
#[command(about = "Referee two-player games between agents and run tournaments")]
struct Cli {
    /// More logging on stderr (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available games
    ListGames,
    /// Play a single match
    Play {
        /// Game identifier
        game: String,
        /// Agent of player 0: human, random[:seed], first, subprocess:<command> or a name
        #[arg(long, default_value = "human")]
        p0: String,
        /// Agent of player 1
        #[arg(long, default_value = "random")]
        p1: String,
        /// Per-move timeout of subprocess agents, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Plies after which the match is drawn
        #[arg(long)]
        max_plies: Option<u32>,
        /// Working directory of subprocess agents
        #[arg(long, value_name = "DIR")]
        agent_cwd: Option<PathBuf>,
        /// Extra environment variable of subprocess agents
        #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
        agent_env: Vec<(String, String)>,
        /// Write a JSON match log (to a timestamped file when no path is given)
        #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
        log: Option<PathBuf>,
        /// Print the final position
        #[arg(long)]
        render: bool,
    },
    /// Run a tournament described by a TOML roster
    Tournament {
        #[arg(long, value_name = "FILE", default_value = "arena.toml")]
        config: PathBuf,
        /// Write the JSON report
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Matches run at the same time
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Replay a JSON match log
    Replay {
        /// Log written by `play --log` or a tournament
        log: PathBuf,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Configuration::from_env();

    // the file logger takes the global subscriber slot
    if !config.logs_to_file() {
        let level = match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        if let Err(e) = init_stderr_logger(level) {
            eprintln!("warning: {e:#}");
        }
    }

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: Configuration) -> anyhow::Result<()> {
    match command {
        Commands::ListGames => {
            for name in GameRegistry::with_builtins().names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Play {
            game,
            p0,
            p1,
            timeout,
            max_plies,
            agent_cwd,
            agent_env,
            log,
            render,
        } => {
            let mut constraints = ConstraintsBuilder::from_env();
            if let Some(secs) = timeout {
                constraints = constraints.with_move_timeout(Duration::from_secs(secs));
            }
            if let Some(max) = max_plies {
                constraints = constraints.with_max_plies(max);
            }
            let arena = Arena::new(config.with_verbose(false), constraints.build()?);

            let p0 = parse_agent(&p0, agent_cwd.as_ref(), &agent_env)?;
            let p1 = parse_agent(&p1, agent_cwd.as_ref(), &agent_env)?;

            let result = arena.play(&game, [&p0, &p1])?;
            println!("game:    {}", result.game);
            match result.verdict.winner {
                Some(winner) => println!("winner:  player {winner}"),
                None => println!("winner:  none (draw)"),
            }
            println!("reason:  {}", result.verdict.reason);
            println!("plies:   {}", result.plies);
            for fault in &result.faults {
                println!(
                    "fault:   player {} {} at ply {} ({})",
                    fault.player, fault.kind, fault.ply, fault.detail
                );
            }
            let game = arena.games().get(&game)?;
            if render {
                println!("{}", game.render(&result.final_state));
            }
            if let Some(path) = log {
                let path = if path.as_os_str().is_empty() {
                    default_log_path(game.name())
                } else {
                    path
                };
                MatchLog::new(game.as_ref(), result).save(&path)?;
                println!("log:     {}", path.display());
            }
            Ok(())
        }
        Commands::Tournament {
            config: roster_path,
            out,
            concurrency,
        } => {
            let file = TournamentFile::load(&roster_path)?;
            let mut constraints = ConstraintsBuilder::from_env();
            if let Some(secs) = file.move_timeout_secs {
                constraints = constraints.with_move_timeout(Duration::from_secs(secs));
            }
            if let Some(max) = file.max_plies {
                constraints = constraints.with_max_plies(max);
            }
            if let Some(n) = concurrency.or(file.concurrency) {
                constraints = constraints.with_concurrency(n);
            }
            let arena = Arena::new(config, constraints.build()?);

            let roster = file.roster()?;
            let report = arena.run_tournament(&roster, file.log_dir.as_deref())?;
            print!("{}", report.summary());
            if let Some(path) = out {
                report.save(&path)?;
                println!("report written to {}", path.display());
            }
            Ok(())
        }
        Commands::Replay { log } => {
            let match_log = MatchLog::load(&log)?;
            let game = GameRegistry::with_builtins().get(&match_log.game)?;
            let (replay, verdict) = replay_log(game.as_ref(), &match_log)
                .with_context(|| format!("could not replay {}", log.display()))?;
            println!("ply 0 (initial)\n{}\n", game.render(&replay.states[0]));
            for (record, state) in match_log.result.history.iter().zip(&replay.states[1..]) {
                println!(
                    "ply {} player {} played {}\n{}\n",
                    record.ply + 1,
                    record.player,
                    record.mv,
                    game.render(state)
                );
            }
            if let Some(fault) = match_log.result.forfeit() {
                println!(
                    "player {} forfeits at ply {}: {}",
                    fault.player, fault.ply, fault.kind
                );
            }
            println!("{verdict}");
            Ok(())
        }
    }
}

fn parse_agent(
    spec: &str,
    cwd: Option<&PathBuf>,
    env: &[(String, String)],
) -> anyhow::Result<AgentSpec> {
    let spec = spec
        .parse::<AgentSpec>()
        .with_context(|| format!("invalid agent '{spec}'"))?;
    Ok(match spec {
        AgentSpec::Subprocess(mut sub) => {
            if let Some(dir) = cwd {
                sub = sub.with_working_dir(dir);
            }
            for (key, value) in env {
                sub = sub.with_env(key, value);
            }
            AgentSpec::Subprocess(sub)
        }
        other => other,
    })
}
