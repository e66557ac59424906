//! Config for the arena behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional and case-insensitive. Set the value to `"true"` to enable a flag.
//!
//! - `ARENA_VERBOSE`: print match progress (default: `true`)
//! - `ARENA_LOG`: log to a file (default: `false`)
//! - `ARENA_DEBUG_AGENT_STDERR`: forward subprocess agents' stderr (default: `false`)
//! - `ARENA_VERIFY_DETERMINISM`: double-check game outputs during matches (default: `false`)

/// Configuration for arena behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) debug_agent_stderr: bool,
    pub(crate) verify_determinism: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Match progress is printed to stdout.
    /// - Logging to file is disabled.
    /// - Agent stderr output is discarded.
    /// - Game outputs are trusted.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            debug_agent_stderr: false,
            verify_determinism: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Any value other than `"true"` disables a flag; unset variables keep the default.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        Self {
            verbose: get_env_flag("ARENA_VERBOSE", true),
            log: get_env_flag("ARENA_LOG", false),
            debug_agent_stderr: get_env_flag("ARENA_DEBUG_AGENT_STDERR", false),
            verify_determinism: get_env_flag("ARENA_VERIFY_DETERMINISM", false),
        }
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable agent stderr output (debug purposes only).
    pub fn with_debug_agent_stderr(mut self, value: bool) -> Self {
        self.debug_agent_stderr = value;
        self
    }

    /// Enable or disable the determinism checks of the match runner.
    ///
    /// When enabled, `legal_moves` and `apply_move` are evaluated twice per ply and a mismatch
    /// aborts the match.
    pub fn with_verify_determinism(mut self, value: bool) -> Self {
        self.verify_determinism = value;
        self
    }

    /// Whether [`Arena::new`](crate::arena::Arena::new) installs the file logger
    pub fn logs_to_file(&self) -> bool {
        self.log
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
