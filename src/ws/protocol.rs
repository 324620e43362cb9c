//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GameError;

/// One serialized outbound message. Cheap to clone for room-wide fan-out.
pub type Frame = Arc<str>;

/// Lifecycle state of a room as seen by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Waiting,
    Playing,
    Finished,
}

/// Animation tag reported for every player in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Animation {
    Idle,
    WalkForward,
    HammerAttack,
    Hit,
    Death,
    Respawn,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimeUp,
    AllPlayersLeft,
    RoomClosed,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TimeUp => "time_up",
            Self::AllPlayersLeft => "all_players_left",
            Self::RoomClosed => "room_closed",
        };
        f.write_str(s)
    }
}

/// Raw inbound envelope, decoded before the payload
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// Set nickname, color and character
    SetProfile(SetProfilePayload),
    CreateRoom,
    JoinRoom { room_id: String },
    ListRooms,
    LeaveRoom,
    ReadyToggle,
    /// Owner only
    StartGame,
    /// In-match input
    PlayerAction(PlayerAction),
    /// Client finished loading the arena scene
    LoadingComplete,
}

impl ClientMsg {
    /// Decode a text frame. An undecodable envelope or payload is
    /// `InvalidFormat`; a well-formed envelope with an unknown type is
    /// `UnhandledType`.
    pub fn decode(text: &str) -> Result<Self, GameError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|_| GameError::InvalidFormat)?;

        match envelope.kind.as_str() {
            "set_nickname_color" => Ok(Self::SetProfile(payload(envelope.payload)?)),
            "create_room" => Ok(Self::CreateRoom),
            "join_room" => {
                let JoinRoomPayload { room_id } = payload(envelope.payload)?;
                Ok(Self::JoinRoom { room_id })
            }
            "list_rooms" => Ok(Self::ListRooms),
            "leave_room" => Ok(Self::LeaveRoom),
            "ready_toggle" => Ok(Self::ReadyToggle),
            "start_game" => Ok(Self::StartGame),
            "player_action" => Ok(Self::PlayerAction(payload(envelope.payload)?)),
            "game_loading_complete" => Ok(Self::LoadingComplete),
            other => Err(GameError::UnhandledType(other.to_string())),
        }
    }

    /// Wire name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetProfile(_) => "set_nickname_color",
            Self::CreateRoom => "create_room",
            Self::JoinRoom { .. } => "join_room",
            Self::ListRooms => "list_rooms",
            Self::LeaveRoom => "leave_room",
            Self::ReadyToggle => "ready_toggle",
            Self::StartGame => "start_game",
            Self::PlayerAction(_) => "player_action",
            Self::LoadingComplete => "game_loading_complete",
        }
    }
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T, GameError> {
    serde_json::from_value(value).map_err(|_| GameError::InvalidFormat)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetProfilePayload {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub character: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinRoomPayload {
    room_id: String,
}

/// `player_action` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", content = "data", rename_all = "snake_case")]
pub enum PlayerAction {
    Look(LookData),
    Move(MoveData),
    Click(ClickData),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LookData {
    #[serde(default)]
    pub yaw: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
}

/// Keyboard state, each key 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveData {
    #[serde(default)]
    pub forward: f64,
    #[serde(default)]
    pub backward: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClickData {
    #[serde(default)]
    pub direction: Option<Direction>,
}

/// Horizontal-plane direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub x: f64,
    pub z: f64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Sent once right after the connection is registered
    UserIdAssigned {
        user_id: String,
    },

    RoomCreated(RoomInfo),

    RoomJoined(RoomInfo),

    /// Lobby room list
    RoomListUpdated {
        rooms: Vec<RoomListItem>,
    },

    PlayerJoined {
        player_info: PlayerInfo,
    },

    PlayerLeft {
        player_id: String,
        /// Set when ownership moved because the owner left
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_owner_id: Option<String>,
    },

    PlayerReadyChanged {
        player_id: String,
        is_ready: bool,
    },

    /// Initial roster, sent when a match is created
    GameInitData {
        players: Vec<PlayerStateInfo>,
    },

    GameCountdown {
        seconds_left: u32,
    },

    GameStarted,

    /// Per-tick snapshot
    GameStateUpdate {
        players: Vec<PlayerStateInfo>,
        time_left: u64,
    },

    GameEnded {
        final_scores: Vec<PlayerScore>,
        reason: EndReason,
    },

    RoomStateUpdated {
        room_id: String,
        new_state: RoomState,
        players: Vec<PlayerInfo>,
    },
}

impl ServerMsg {
    pub fn error(err: &GameError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Serialize once for sending
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Full room snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub owner_id: String,
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
    pub state: RoomState,
    pub current_players: usize,
}

/// Room member as shown in the waiting room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: String,
    pub nickname: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub character: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    pub is_ready: bool,
    pub is_owner: bool,
}

/// One row of the lobby room list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListItem {
    pub id: String,
    pub current_players: usize,
    pub max_players: usize,
    pub state: RoomState,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStateInfo {
    pub id: String,
    pub nickname: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub score: u32,
    pub asset: String,
    pub current_animation: Animation,
    pub health: u32,
    pub max_health: u32,
    pub is_alive: bool,
    pub is_invincible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: String,
    pub nickname: String,
    pub score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_unit_messages_with_empty_payload() {
        assert_eq!(
            ClientMsg::decode(r#"{"type":"create_room","payload":{}}"#),
            Ok(ClientMsg::CreateRoom)
        );
        assert_eq!(
            ClientMsg::decode(r#"{"type":"ready_toggle"}"#),
            Ok(ClientMsg::ReadyToggle)
        );
    }

    #[test]
    fn decodes_join_and_profile() {
        assert_eq!(
            ClientMsg::decode(r#"{"type":"join_room","payload":{"room_id":"ABC123"}}"#),
            Ok(ClientMsg::JoinRoom {
                room_id: "ABC123".into()
            })
        );

        let msg = ClientMsg::decode(
            r##"{"type":"set_nickname_color","payload":{"nickname":"kim","color":"#FF6B9D"}}"##,
        )
        .unwrap();
        match msg {
            ClientMsg::SetProfile(p) => {
                assert_eq!(p.nickname, "kim");
                assert_eq!(p.color, "#FF6B9D");
                assert_eq!(p.character, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_player_actions() {
        let click = ClientMsg::decode(
            r#"{"type":"player_action","payload":{"action_type":"click","data":{"direction":{"x":1,"z":0},"start_position":{"x":0,"z":0}}}}"#,
        )
        .unwrap();
        assert_eq!(
            click,
            ClientMsg::PlayerAction(PlayerAction::Click(ClickData {
                direction: Some(Direction { x: 1.0, z: 0.0 })
            }))
        );

        let mv = ClientMsg::decode(
            r#"{"type":"player_action","payload":{"action_type":"move","data":{"forward":1,"backward":0,"left":0,"right":1}}}"#,
        )
        .unwrap();
        assert_eq!(
            mv,
            ClientMsg::PlayerAction(PlayerAction::Move(MoveData {
                forward: 1.0,
                backward: 0.0,
                left: 0.0,
                right: 1.0
            }))
        );
    }

    #[test]
    fn error_taxonomy() {
        assert_eq!(ClientMsg::decode("not json"), Err(GameError::InvalidFormat));
        assert_eq!(
            ClientMsg::decode(r#"{"type":"join_room","payload":{}}"#),
            Err(GameError::InvalidFormat)
        );
        assert_eq!(
            ClientMsg::decode(r#"{"type":"player_action","payload":{"action_type":"dance","data":{}}}"#),
            Err(GameError::InvalidFormat)
        );
        assert_eq!(
            ClientMsg::decode(r#"{"type":"dance"}"#),
            Err(GameError::UnhandledType("dance".into()))
        );
    }

    #[test]
    fn server_envelope_shape() {
        let frame = ServerMsg::GameStarted.to_frame().unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "game_started");

        let frame = ServerMsg::PlayerLeft {
            player_id: "a".into(),
            new_owner_id: None,
        }
        .to_frame()
        .unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "player_left");
        assert_eq!(v["payload"]["player_id"], "a");
        assert!(v["payload"].get("new_owner_id").is_none());

        let frame = ServerMsg::error(&GameError::RoomFull).to_frame().unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["payload"]["code"], "room_full");
        assert_eq!(v["payload"]["message"], "Room is full.");
    }
}
