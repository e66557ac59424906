//! Built-in games and the registry used to resolve game identifiers.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::bail;

use crate::game_interface::Game;

mod tictactoe;

pub use tictactoe::TicTacToe;

/// Maps game identifiers to game definitions.
///
/// Games are resolved once, when a match or a roster is configured, never while a match runs.
#[derive(Clone, Default)]
pub struct GameRegistry {
    games: BTreeMap<String, Arc<dyn Game>>,
}

impl GameRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in game.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TicTacToe));
        registry
    }

    /// Adds `game` under [`Game::name`], replacing any game previously registered under that name.
    pub fn register(&mut self, game: Arc<dyn Game>) -> &mut Self {
        self.games.insert(game.name().to_string(), game);
        self
    }

    /// Looks a game up by identifier.
    pub fn get(&self, name: &str) -> anyhow::Result<Arc<dyn Game>> {
        match self.games.get(name) {
            Some(game) => Ok(game.clone()),
            None => bail!(
                "unknown game '{name}' (available: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ),
        }
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for GameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.games.keys()).finish()
    }
}
