//! Handle to a connected client, shared by the Directory and Sessions

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::GameError;
use crate::ws::protocol::{Frame, ServerMsg, SetProfilePayload};

use super::session::SessionHandle;

/// Room members that receive broadcasts
pub type Roster = Arc<Vec<ConnectionHandle>>;

pub const DEFAULT_NICKNAME: &str = "ANONYMOUS";
pub const DEFAULT_COLOR: &str = "#FFFFFF";
pub const DEFAULT_CHARACTER: &str = "onion";

/// Display profile chosen in the lobby
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub nickname: String,
    pub color: String,
    pub character: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            nickname: DEFAULT_NICKNAME.to_string(),
            color: DEFAULT_COLOR.to_string(),
            character: DEFAULT_CHARACTER.to_string(),
        }
    }
}

impl Profile {
    /// Blank fields fall back to defaults; a missing character keeps the current one
    pub fn apply(&mut self, payload: SetProfilePayload) {
        let nickname = payload.nickname.trim();
        self.nickname = if nickname.is_empty() {
            DEFAULT_NICKNAME.to_string()
        } else {
            nickname.to_string()
        };

        let color = payload.color.trim();
        self.color = if color.is_empty() {
            DEFAULT_COLOR.to_string()
        } else {
            color.to_string()
        };

        if let Some(character) = payload.character.filter(|c| !c.trim().is_empty()) {
            self.character = character.trim().to_string();
        }
    }
}

/// Cloneable handle to one Connection Actor.
///
/// Outbound frames go through a bounded queue; a full queue drops the frame.
/// The session binding is written only by the Session that owns the
/// membership, so a connection is in at most one room at a time.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Arc<str>,
    outbound: mpsc::Sender<Frame>,
    binding: Arc<watch::Sender<Option<SessionHandle>>>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("room_id", &self.room_id())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new(id: String, outbound: mpsc::Sender<Frame>) -> Self {
        let (binding, _) = watch::channel(None);
        Self {
            id: id.into(),
            outbound,
            binding: Arc::new(binding),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a serialized frame. Never blocks.
    pub fn send_frame(&self, frame: Frame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.id, "Outbound queue closed");
                false
            }
        }
    }

    pub fn send(&self, msg: &ServerMsg) -> bool {
        match msg.to_frame() {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "Failed to serialize message");
                false
            }
        }
    }

    pub fn send_error(&self, err: &GameError) -> bool {
        debug!(conn_id = %self.id, code = err.code(), "Request rejected");
        self.send(&ServerMsg::error(err))
    }

    /// The writer side is gone
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.binding.borrow().clone()
    }

    pub fn room_id(&self) -> Option<String> {
        self.binding
            .borrow()
            .as_ref()
            .map(|s| s.room_id().to_string())
    }

    /// Bind to a session. Rebinding to the same room is a no-op.
    pub fn try_bind(&self, session: &SessionHandle) -> Result<(), GameError> {
        let mut result = Ok(());
        self.binding.send_if_modified(|current| match current {
            Some(existing) if existing.room_id() == session.room_id() => false,
            Some(_) => {
                result = Err(GameError::AlreadyInOtherRoom);
                false
            }
            None => {
                *current = Some(session.clone());
                true
            }
        });
        result
    }

    /// Clear the binding if it still points at `room_id`
    pub fn unbind(&self, room_id: &str) {
        self.binding.send_if_modified(|current| {
            if current.as_ref().is_some_and(|s| s.room_id() == room_id) {
                *current = None;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_defaults_and_updates() {
        let mut profile = Profile::default();
        assert_eq!(profile.nickname, "ANONYMOUS");
        assert_eq!(profile.character, "onion");

        profile.apply(SetProfilePayload {
            nickname: "kim".into(),
            color: "#FF6B9D".into(),
            character: Some("carrot".into()),
        });
        assert_eq!(profile.nickname, "kim");
        assert_eq!(profile.character, "carrot");

        profile.apply(SetProfilePayload {
            nickname: "  ".into(),
            color: String::new(),
            character: None,
        });
        assert_eq!(profile.nickname, "ANONYMOUS");
        assert_eq!(profile.color, "#FFFFFF");
        assert_eq!(profile.character, "carrot");
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = ConnectionHandle::new("c1".into(), tx);
        assert!(conn.send(&ServerMsg::GameStarted));
        assert!(!conn.send(&ServerMsg::GameStarted));
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send(&ServerMsg::GameStarted));
    }
}
