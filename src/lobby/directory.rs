//! Process-wide registry of connections and rooms

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::GameSettings;
use crate::error::GameError;
use crate::util::room_code::generate_unique_room_code;
use crate::ws::protocol::{RoomListItem, ServerMsg, SetProfilePayload};

use super::connection::{ConnectionHandle, Profile};
use super::session::{Session, SessionCmd, SessionHandle};

const DIRECTORY_MAILBOX: usize = 1024;

/// Commands accepted by the Directory
#[derive(Debug)]
pub enum DirectoryCmd {
    Register { conn: ConnectionHandle },
    Unregister { conn_id: String },
    CreateRoom { conn_id: String },
    JoinRoom { conn_id: String, room_id: String },
    ListRooms { conn_id: String },
    UpdateProfile { conn_id: String, payload: SetProfilePayload },
    /// A room's summary changed, refresh the lobby list
    RoomsChanged,
    RemoveRoom { room_id: String },
    Stats { reply: oneshot::Sender<DirectoryStats> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Cloneable handle to the Directory actor
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<DirectoryCmd>,
}

impl DirectoryHandle {
    fn send(&self, cmd: DirectoryCmd) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => {
                warn!(?cmd, "Directory mailbox full, dropping command");
            }
            Err(TrySendError::Closed(_)) => {
                error!("Directory is gone");
            }
        }
    }

    pub async fn register(&self, conn: ConnectionHandle) -> bool {
        self.tx.send(DirectoryCmd::Register { conn }).await.is_ok()
    }

    pub async fn unregister(&self, conn_id: String) {
        let _ = self.tx.send(DirectoryCmd::Unregister { conn_id }).await;
    }

    pub fn create_room(&self, conn_id: String) {
        self.send(DirectoryCmd::CreateRoom { conn_id });
    }

    pub fn join_room(&self, conn_id: String, room_id: String) {
        self.send(DirectoryCmd::JoinRoom { conn_id, room_id });
    }

    pub fn list_rooms(&self, conn_id: String) {
        self.send(DirectoryCmd::ListRooms { conn_id });
    }

    pub fn update_profile(&self, conn_id: String, payload: SetProfilePayload) {
        self.send(DirectoryCmd::UpdateProfile { conn_id, payload });
    }

    pub fn room_updated(&self) {
        self.send(DirectoryCmd::RoomsChanged);
    }

    pub async fn remove_room(&self, room_id: String) {
        let _ = self.tx.send(DirectoryCmd::RemoveRoom { room_id }).await;
    }

    pub async fn stats(&self) -> Option<DirectoryStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DirectoryCmd::Stats { reply }).await.ok()?;
        rx.await.ok()
    }
}

struct Registered {
    conn: ConnectionHandle,
    profile: Profile,
}

/// The Directory actor. Only it creates or forgets rooms.
pub struct Directory {
    settings: GameSettings,
    connections: HashMap<String, Registered>,
    rooms: HashMap<String, SessionHandle>,
    handle: DirectoryHandle,
    rx: mpsc::Receiver<DirectoryCmd>,
}

impl Directory {
    /// Start the Directory actor
    pub fn spawn(settings: GameSettings) -> DirectoryHandle {
        let (tx, rx) = mpsc::channel(DIRECTORY_MAILBOX);
        let handle = DirectoryHandle { tx };
        let directory = Self {
            settings,
            connections: HashMap::new(),
            rooms: HashMap::new(),
            handle: handle.clone(),
            rx,
        };
        tokio::spawn(directory.run());
        handle
    }

    async fn run(mut self) {
        info!("Directory started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle_command(cmd);
        }
    }

    fn handle_command(&mut self, cmd: DirectoryCmd) {
        match cmd {
            DirectoryCmd::Register { conn } => self.register(conn),
            DirectoryCmd::Unregister { conn_id } => {
                if self.connections.remove(&conn_id).is_some() {
                    debug!(conn_id = %conn_id, "Connection unregistered");
                }
            }
            DirectoryCmd::CreateRoom { conn_id } => self.create_room(&conn_id),
            DirectoryCmd::JoinRoom { conn_id, room_id } => self.join_room(&conn_id, &room_id),
            DirectoryCmd::ListRooms { conn_id } => {
                if let Some(entry) = self.connections.get(&conn_id) {
                    entry.conn.send(&self.room_list());
                }
            }
            DirectoryCmd::UpdateProfile { conn_id, payload } => {
                self.update_profile(&conn_id, payload)
            }
            DirectoryCmd::RoomsChanged => self.broadcast_room_list(),
            DirectoryCmd::RemoveRoom { room_id } => {
                if self.rooms.remove(&room_id).is_some() {
                    info!(room_id = %room_id, rooms = self.rooms.len(), "Room removed");
                    self.broadcast_room_list();
                }
            }
            DirectoryCmd::Stats { reply } => {
                let _ = reply.send(DirectoryStats {
                    connections: self.connections.len(),
                    rooms: self.rooms.len(),
                });
            }
        }
    }

    fn register(&mut self, conn: ConnectionHandle) {
        let conn_id = conn.id().to_string();
        conn.send(&ServerMsg::UserIdAssigned {
            user_id: conn_id.clone(),
        });
        conn.send(&self.room_list());
        self.connections.insert(
            conn_id.clone(),
            Registered {
                conn,
                profile: Profile::default(),
            },
        );
        debug!(conn_id = %conn_id, connections = self.connections.len(), "Connection registered");
    }

    fn create_room(&mut self, conn_id: &str) {
        let Some(entry) = self.connections.get(conn_id) else {
            warn!(conn_id, "Create room from unknown connection");
            return;
        };
        if entry.conn.session().is_some() {
            entry.conn.send_error(&GameError::AlreadyInRoom);
            return;
        }

        let room_id = generate_unique_room_code(|code| self.rooms.contains_key(code));
        match Session::spawn(
            room_id.clone(),
            entry.conn.clone(),
            entry.profile.clone(),
            self.settings.clone(),
            self.handle.clone(),
        ) {
            Ok((session, info)) => {
                entry.conn.send(&ServerMsg::RoomCreated(info));
                self.rooms.insert(room_id, session);
                self.broadcast_room_list();
            }
            Err(e) => {
                entry.conn.send_error(&e);
            }
        }
    }

    fn join_room(&mut self, conn_id: &str, room_id: &str) {
        let Some(entry) = self.connections.get(conn_id) else {
            warn!(conn_id, "Join room from unknown connection");
            return;
        };
        let room_id = room_id.trim().to_uppercase();
        let Some(session) = self.rooms.get(&room_id) else {
            entry.conn.send_error(&GameError::RoomNotFound);
            return;
        };

        match entry.conn.room_id() {
            Some(current) if current != room_id => {
                entry.conn.send_error(&GameError::AlreadyInOtherRoom);
            }
            Some(_) => {
                session.send(SessionCmd::ResendInfo {
                    conn_id: conn_id.to_string(),
                });
            }
            None => {
                let forwarded = session.send(SessionCmd::Join {
                    conn: entry.conn.clone(),
                    profile: entry.profile.clone(),
                });
                if !forwarded {
                    entry.conn.send_error(&GameError::RoomNotFound);
                }
            }
        }
    }

    fn update_profile(&mut self, conn_id: &str, payload: SetProfilePayload) {
        let Some(entry) = self.connections.get_mut(conn_id) else {
            return;
        };
        entry.profile.apply(payload);
        debug!(conn_id, nickname = %entry.profile.nickname, "Profile updated");

        if let Some(session) = entry.conn.session() {
            session.send(SessionCmd::ProfileUpdated {
                conn_id: conn_id.to_string(),
                profile: entry.profile.clone(),
            });
        }
    }

    fn room_list(&self) -> ServerMsg {
        let mut rooms: Vec<RoomListItem> = self.rooms.values().map(|s| s.list_item()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        ServerMsg::RoomListUpdated { rooms }
    }

    /// Lobby list goes only to connections that are not in a room
    fn broadcast_room_list(&self) {
        let frame = match self.room_list().to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to serialize room list");
                return;
            }
        };
        for entry in self.connections.values() {
            if entry.conn.session().is_none() {
                entry.conn.send_frame(frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::time::timeout;

    use super::*;
    use crate::ws::protocol::Frame;

    async fn client(directory: &DirectoryHandle, id: &str) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(256);
        let conn = ConnectionHandle::new(id.into(), tx);
        assert!(directory.register(conn.clone()).await);
        (conn, rx)
    }

    async fn next_of(rx: &mut mpsc::Receiver<Frame>, kind: &str) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("closed");
            let value: Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == kind {
                return value["payload"].clone();
            }
        }
    }

    #[tokio::test]
    async fn register_assigns_id_and_sends_room_list() {
        let directory = Directory::spawn(GameSettings::default());
        let (_conn, mut rx) = client(&directory, "c1").await;
        assert_eq!(next_of(&mut rx, "user_id_assigned").await["user_id"], "c1");
        let list = next_of(&mut rx, "room_list_updated").await;
        assert!(list["rooms"].as_array().unwrap().is_empty());

        let stats = directory.stats().await.unwrap();
        assert_eq!(stats, DirectoryStats { connections: 1, rooms: 0 });

        directory.unregister("c1".into()).await;
        assert_eq!(directory.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn create_and_join_rules() {
        let directory = Directory::spawn(GameSettings::default());
        let (a, mut a_rx) = client(&directory, "a").await;
        let (_b, mut b_rx) = client(&directory, "b").await;

        directory.create_room("a".into());
        let room = next_of(&mut a_rx, "room_created").await;
        let room_id = room["id"].as_str().unwrap().to_string();
        assert_eq!(room_id.len(), 6);
        assert_eq!(room["state"], "waiting");
        assert_eq!(a.room_id().as_deref(), Some(room_id.as_str()));

        // lobby members see the new room
        next_of(&mut b_rx, "room_list_updated").await;
        let list = next_of(&mut b_rx, "room_list_updated").await;
        assert_eq!(list["rooms"][0]["id"], room_id.as_str());
        assert_eq!(list["rooms"][0]["current_players"], 1);

        directory.create_room("a".into());
        assert_eq!(next_of(&mut a_rx, "error").await["code"], "already_in_room");

        directory.join_room("b".into(), "ZZZZZZ".into());
        assert_eq!(next_of(&mut b_rx, "error").await["code"], "room_not_found");

        directory.join_room("b".into(), room_id.to_lowercase());
        let joined = next_of(&mut b_rx, "room_joined").await;
        assert_eq!(joined["id"], room_id.as_str());

        // joining the same room again only resends the snapshot
        directory.join_room("b".into(), room_id.clone());
        let again = next_of(&mut b_rx, "room_joined").await;
        assert_eq!(again["current_players"], 2);
    }

    #[tokio::test]
    async fn member_of_one_room_cannot_join_another() {
        let directory = Directory::spawn(GameSettings::default());
        let (_a, mut a_rx) = client(&directory, "a").await;
        let (_b, mut b_rx) = client(&directory, "b").await;

        directory.create_room("a".into());
        next_of(&mut a_rx, "room_created").await;
        directory.create_room("b".into());
        let other = next_of(&mut b_rx, "room_created").await["id"]
            .as_str()
            .unwrap()
            .to_string();

        directory.join_room("a".into(), other);
        assert_eq!(next_of(&mut a_rx, "error").await["code"], "already_in_other_room");
        assert_eq!(directory.stats().await.unwrap().rooms, 2);
    }

    #[tokio::test]
    async fn profile_update_reaches_the_room() {
        let directory = Directory::spawn(GameSettings::default());
        let (_a, mut a_rx) = client(&directory, "a").await;
        directory.create_room("a".into());
        next_of(&mut a_rx, "room_created").await;

        directory.update_profile(
            "a".into(),
            SetProfilePayload {
                nickname: "kim".into(),
                color: "#FF6B9D".into(),
                character: None,
            },
        );
        let state = next_of(&mut a_rx, "room_state_updated").await;
        assert_eq!(state["players"][0]["nickname"], "kim");
        assert_eq!(state["players"][0]["character"], "onion");
    }
}
