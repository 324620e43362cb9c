//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::lobby::{Directory, DirectoryHandle};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: DirectoryHandle,
}

impl AppState {
    /// Spawns the Directory; must be called inside the runtime
    pub fn new(config: Config) -> Self {
        let directory = Directory::spawn(config.game.clone());
        Self {
            config: Arc::new(config),
            directory,
        }
    }
}
