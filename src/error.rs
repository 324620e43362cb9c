//! Request-scoped errors reported back to the originating connection

/// Everything a single request can fail with. None of these close the
/// connection or touch shared state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    // Protocol errors
    #[error("Invalid message format.")]
    InvalidFormat,

    #[error("Unhandled message type: {0}")]
    UnhandledType(String),

    // Policy violations
    #[error("Room does not exist.")]
    RoomNotFound,

    #[error("Already in a room.")]
    AlreadyInRoom,

    #[error("Already in another room. Leave it first.")]
    AlreadyInOtherRoom,

    #[error("Room is full.")]
    RoomFull,

    #[error("Not in a room.")]
    NotInRoom,

    #[error("Only the room owner can start the game.")]
    NotOwner,

    #[error("The room is not waiting for a new game.")]
    NotWaiting,

    #[error("Not every player has returned to the room yet.")]
    PlayersStillReturning,

    #[error("Not enough players to start.")]
    NotEnoughPlayers,

    #[error("Not all players are ready.")]
    PlayersNotReady,
}

impl GameError {
    /// Stable machine-readable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalid_format",
            Self::UnhandledType(_) => "unhandled_type",
            Self::RoomNotFound => "room_not_found",
            Self::AlreadyInRoom => "already_in_room",
            Self::AlreadyInOtherRoom => "already_in_other_room",
            Self::RoomFull => "room_full",
            Self::NotInRoom => "not_in_room",
            Self::NotOwner => "not_owner",
            Self::NotWaiting => "not_waiting",
            Self::PlayersStillReturning => "players_still_returning",
            Self::NotEnoughPlayers => "not_enough_players",
            Self::PlayersNotReady => "players_not_ready",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_messages() {
        assert_eq!(GameError::RoomFull.code(), "room_full");
        assert_eq!(GameError::RoomFull.to_string(), "Room is full.");
        let err = GameError::UnhandledType("dance".into());
        assert_eq!(err.code(), "unhandled_type");
        assert_eq!(err.to_string(), "Unhandled message type: dance");
    }
}
