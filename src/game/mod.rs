//! Game simulation modules

pub mod combat;
pub mod physics;
pub mod simulation;
pub mod snapshot;

pub use simulation::{MatchEvent, PlayerState, Simulation};

/// A room member entering a match, captured when the match is created
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub nickname: String,
    pub color: String,
    pub character: String,
}

impl Participant {
    /// Model file the client loads for this player
    pub fn asset(&self) -> String {
        format!("{}.glb", self.character)
    }
}
