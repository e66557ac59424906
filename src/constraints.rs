//! Limits applied to matches and agents.
//!
//! The main entry point is the [`ConstraintsBuilder`], which uses a builder pattern:
//!
//! - **Per-move timeout**: time a subprocess agent has to answer a turn
//! - **Ply cap**: plies after which a match is declared drawn, independently of the game rules
//! - **Concurrency**: number of matches of a tournament run at the same time
//! - **Termination grace**: time a subprocess agent has to exit before it is killed
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ai_arena::constraints::ConstraintsBuilder;
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_move_timeout(Duration::from_secs(30))
//!     .with_max_plies(500)
//!     .with_concurrency(4)
//!     .build()
//!     .unwrap();
//! assert_eq!(constraints.max_plies(), 500);
//! ```
//!
//! You may also read constraints from environment variables using
//! [`ConstraintsBuilder::from_env()`].

use std::{env, time::Duration};

use anyhow::bail;

use crate::{agent::SubprocessOptions, match_runner::MatchSettings};

const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_PLIES: u32 = 10_000;
const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(1000);

/// Builder for [`Constraints`].
///
/// Unset values fall back to a one hour move timeout, a 10 000 ply cap, one match per physical
/// CPU and a one second termination grace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConstraintsBuilder {
    move_timeout: Option<Duration>,
    max_plies: Option<u32>,
    concurrency: Option<usize>,
    termination_grace: Option<Duration>,
}

impl ConstraintsBuilder {
    /// Builder with every value unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder configured from environment variables. Unset or unparsable variables are
    /// ignored.
    ///
    /// Read environment variables are:
    /// - `ARENA_MOVE_TIMEOUT_SECS` (u64): per-move timeout in seconds
    /// - `ARENA_MAX_PLIES` (u32): ply cap
    /// - `ARENA_CONCURRENCY` (usize): matches run at once
    /// - `ARENA_TERMINATION_GRACE_MS` (u64): termination grace in milliseconds
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.trim().parse().ok()
        }

        ConstraintsBuilder {
            move_timeout: parse("ARENA_MOVE_TIMEOUT_SECS").map(Duration::from_secs),
            max_plies: parse("ARENA_MAX_PLIES"),
            concurrency: parse("ARENA_CONCURRENCY"),
            termination_grace: parse("ARENA_TERMINATION_GRACE_MS").map(Duration::from_millis),
        }
    }

    /// Sets the time a subprocess agent has to answer a turn.
    #[must_use]
    pub fn with_move_timeout(self, duration: Duration) -> Self {
        Self {
            move_timeout: Some(duration),
            ..self
        }
    }

    /// Sets the ply cap.
    #[must_use]
    pub fn with_max_plies(self, max: u32) -> Self {
        Self {
            max_plies: Some(max),
            ..self
        }
    }

    /// Sets the number of matches run at the same time.
    #[must_use]
    pub fn with_concurrency(self, matches: usize) -> Self {
        Self {
            concurrency: Some(matches),
            ..self
        }
    }

    /// Sets the time a subprocess agent has to exit on its own before it is killed.
    #[must_use]
    pub fn with_termination_grace(self, duration: Duration) -> Self {
        Self {
            termination_grace: Some(duration),
            ..self
        }
    }

    /// Consumes the builder.
    ///
    /// # Errors
    ///
    /// Returns an error when the timeout, the ply cap or the concurrency is zero.
    pub fn build(self) -> anyhow::Result<Constraints> {
        let move_timeout = self.move_timeout.unwrap_or(DEFAULT_MOVE_TIMEOUT);
        if move_timeout.is_zero() {
            bail!("move timeout must be greater than zero");
        }
        let max_plies = self.max_plies.unwrap_or(DEFAULT_MAX_PLIES);
        if max_plies == 0 {
            bail!("ply cap must be greater than zero");
        }
        let concurrency = self.concurrency.unwrap_or_else(num_cpus::get_physical);
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        Ok(Constraints {
            move_timeout,
            max_plies,
            concurrency,
            termination_grace: self.termination_grace.unwrap_or(DEFAULT_TERMINATION_GRACE),
        })
    }
}

/// Obtained using `ConstraintsBuilder`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Constraints {
    pub(crate) move_timeout: Duration,
    pub(crate) max_plies: u32,
    pub(crate) concurrency: usize,
    pub(crate) termination_grace: Duration,
}

impl Constraints {
    /// create a ConstraintsBuilder
    pub fn builder() -> ConstraintsBuilder {
        ConstraintsBuilder::new()
    }

    /// Per-move timeout
    pub fn move_timeout(&self) -> Duration {
        self.move_timeout
    }

    /// Ply cap
    pub fn max_plies(&self) -> u32 {
        self.max_plies
    }

    /// Matches run at the same time
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Termination grace
    pub fn termination_grace(&self) -> Duration {
        self.termination_grace
    }

    pub(crate) fn match_settings(&self, verify_determinism: bool) -> MatchSettings {
        MatchSettings {
            max_plies: self.max_plies,
            verify_determinism,
        }
    }

    pub(crate) fn subprocess_options(&self, allow_stderr: bool) -> SubprocessOptions {
        SubprocessOptions {
            move_timeout: self.move_timeout,
            termination_grace: self.termination_grace,
            allow_stderr,
        }
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            move_timeout: DEFAULT_MOVE_TIMEOUT,
            max_plies: DEFAULT_MAX_PLIES,
            concurrency: num_cpus::get_physical().max(1),
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }
}
