//! Room actor: membership, readiness, match lifecycle

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GameSettings;
use crate::error::GameError;
use crate::game::{MatchEvent, Participant, Simulation};
use crate::ws::protocol::{
    EndReason, PlayerAction, PlayerInfo, RoomInfo, RoomListItem, RoomState, ServerMsg,
};

use super::connection::{ConnectionHandle, Profile, Roster};
use super::directory::DirectoryHandle;

const SESSION_MAILBOX: usize = 256;
const MATCH_EVENT_BUFFER: usize = 8;

/// Commands accepted by a Session
#[derive(Debug)]
pub enum SessionCmd {
    Join { conn: ConnectionHandle, profile: Profile },
    /// Join request from a connection that is already a member
    ResendInfo { conn_id: String },
    Leave { conn_id: String },
    /// Transport dropped
    Disconnected { conn_id: String },
    ReadyToggle { conn_id: String },
    StartGame { conn_id: String },
    LoadingComplete { conn_id: String },
    PlayerAction { conn_id: String, action: PlayerAction },
    ProfileUpdated { conn_id: String, profile: Profile },
}

/// Published on every membership or state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSummary {
    pub state: RoomState,
    pub current_players: usize,
    pub max_players: usize,
}

/// Handle to a running Session
#[derive(Clone)]
pub struct SessionHandle {
    room_id: Arc<str>,
    tx: mpsc::Sender<SessionCmd>,
    summary: watch::Receiver<RoomSummary>,
}

impl SessionHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn summary(&self) -> RoomSummary {
        *self.summary.borrow()
    }

    pub fn state(&self) -> RoomState {
        self.summary.borrow().state
    }

    pub fn list_item(&self) -> RoomListItem {
        let summary = self.summary();
        RoomListItem {
            id: self.room_id.to_string(),
            current_players: summary.current_players,
            max_players: summary.max_players,
            state: summary.state,
        }
    }

    /// Non-blocking send; a full mailbox drops the command
    pub fn send(&self, cmd: SessionCmd) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(cmd)) => {
                warn!(room_id = %self.room_id, ?cmd, "Session mailbox full, dropping command");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(room_id = %self.room_id, "Session already closed");
                false
            }
        }
    }

    /// Waits for mailbox space. Used for commands that must not be lost.
    pub async fn send_reliable(&self, cmd: SessionCmd) -> bool {
        self.tx.send(cmd).await.is_ok()
    }
}

struct Member {
    conn: ConnectionHandle,
    profile: Profile,
    ready: bool,
    /// False once the transport dropped mid-match
    connected: bool,
}

/// The room state machine. Owns its membership; nothing else mutates it.
pub struct Session {
    id: String,
    settings: GameSettings,
    owner_id: String,
    /// In join order
    members: Vec<Member>,
    state: RoomState,
    simulation: Option<Arc<Simulation>>,
    /// Loading-complete acks for the current match
    loading: HashMap<String, bool>,
    countdown_requested: bool,

    handle: SessionHandle,
    directory: DirectoryHandle,
    commands: mpsc::Receiver<SessionCmd>,
    match_tx: mpsc::Sender<MatchEvent>,
    match_events: mpsc::Receiver<MatchEvent>,
    summary: watch::Sender<RoomSummary>,
    roster: watch::Sender<Roster>,
}

impl Session {
    /// Create a room owned by `owner` and start its actor
    pub fn spawn(
        room_id: String,
        owner: ConnectionHandle,
        profile: Profile,
        settings: GameSettings,
        directory: DirectoryHandle,
    ) -> Result<(SessionHandle, RoomInfo), GameError> {
        let (tx, commands) = mpsc::channel(SESSION_MAILBOX);
        let (match_tx, match_events) = mpsc::channel(MATCH_EVENT_BUFFER);
        let (summary, summary_rx) = watch::channel(RoomSummary {
            state: RoomState::Waiting,
            current_players: 1,
            max_players: settings.max_players,
        });
        let (roster, _) = watch::channel(Roster::default());

        let handle = SessionHandle {
            room_id: room_id.as_str().into(),
            tx,
            summary: summary_rx,
        };
        owner
            .try_bind(&handle)
            .map_err(|_| GameError::AlreadyInRoom)?;

        let mut session = Self {
            id: room_id,
            settings,
            owner_id: owner.id().to_string(),
            members: vec![Member {
                conn: owner,
                profile,
                ready: false,
                connected: true,
            }],
            state: RoomState::Waiting,
            simulation: None,
            loading: HashMap::new(),
            countdown_requested: false,
            handle: handle.clone(),
            directory,
            commands,
            match_tx,
            match_events,
            summary,
            roster,
        };
        session.publish();
        let info = session.room_info();

        info!(room_id = %session.id, owner_id = %session.owner_id, "Room created");
        tokio::spawn(session.run());
        Ok((handle, info))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.commands.recv() => self.handle_command(cmd),
                Some(event) = self.match_events.recv() => self.handle_match_event(event),
                else => break,
            }

            if self.members.is_empty() && self.state != RoomState::Playing {
                break;
            }
        }
        self.close().await;
    }

    async fn close(mut self) {
        if let Some(sim) = self.simulation.take() {
            sim.stop(EndReason::RoomClosed);
        }
        for member in self.members.drain(..) {
            member.conn.unbind(&self.id);
        }

        // Joins forwarded before the Directory forgets this room
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            if let SessionCmd::Join { conn, .. } = cmd {
                conn.send_error(&GameError::RoomNotFound);
            }
        }
        self.directory.remove_room(self.id.clone()).await;
        info!(room_id = %self.id, "Room closed");
    }

    fn handle_command(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::Join { conn, profile } => self.join(conn, profile),
            SessionCmd::ResendInfo { conn_id } => self.resend_info(&conn_id),
            SessionCmd::Leave { conn_id } => {
                if self.remove_member(&conn_id) {
                    info!(room_id = %self.id, conn_id = %conn_id, "Player left room");
                }
            }
            SessionCmd::Disconnected { conn_id } => self.disconnected(&conn_id),
            SessionCmd::ReadyToggle { conn_id } => self.ready_toggle(&conn_id),
            SessionCmd::StartGame { conn_id } => {
                if let Err(e) = self.start_game(&conn_id) {
                    self.reply_error(&conn_id, &e);
                }
            }
            SessionCmd::LoadingComplete { conn_id } => self.loading_complete(&conn_id),
            SessionCmd::PlayerAction { conn_id, action } => {
                match (&self.simulation, self.state) {
                    (Some(sim), RoomState::Playing) => {
                        sim.handle_action(&conn_id, &action, Instant::now())
                    }
                    _ => debug!(room_id = %self.id, conn_id = %conn_id, "Action outside a match"),
                }
            }
            SessionCmd::ProfileUpdated { conn_id, profile } => {
                if let Some(member) = self.member_mut(&conn_id) {
                    member.profile = profile;
                    self.broadcast_room_state();
                }
            }
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    fn join(&mut self, conn: ConnectionHandle, profile: Profile) {
        if self.member(conn.id()).is_some() {
            self.resend_info(conn.id());
            return;
        }
        if conn.is_closed() {
            debug!(room_id = %self.id, conn_id = %conn.id(), "Join from closed connection");
            return;
        }
        if self.members.len() >= self.settings.max_players {
            conn.send_error(&GameError::RoomFull);
            return;
        }
        if let Err(e) = conn.try_bind(&self.handle) {
            conn.send_error(&e);
            return;
        }

        let conn_id = conn.id().to_string();
        self.members.push(Member {
            conn,
            profile,
            ready: false,
            connected: true,
        });
        // A participant coming back mid-match takes over its frozen player
        if let Some(sim) = &self.simulation {
            sim.set_connected(&conn_id, true);
        }
        info!(
            room_id = %self.id,
            conn_id = %conn_id,
            player_count = self.members.len(),
            "Player joined room"
        );

        let info = self.room_info();
        if let Some(member) = self.members.last() {
            member.conn.send(&ServerMsg::RoomJoined(info));
            let player_info = self.player_info(member);
            self.broadcast_except(&ServerMsg::PlayerJoined { player_info }, &conn_id);
        }
        self.publish();
        self.directory.room_updated();
    }

    fn resend_info(&self, conn_id: &str) {
        if let Some(member) = self.member(conn_id) {
            member.conn.send(&ServerMsg::RoomJoined(self.room_info()));
        }
    }

    /// Drop a member, moving ownership to the earliest remaining member.
    /// Returns false if `conn_id` was not a member.
    fn remove_member(&mut self, conn_id: &str) -> bool {
        let Some(pos) = self.members.iter().position(|m| m.conn.id() == conn_id) else {
            return false;
        };
        let member = self.members.remove(pos);
        member.conn.unbind(&self.id);
        if let Some(sim) = &self.simulation {
            sim.set_connected(conn_id, false);
        }

        let new_owner_id = if self.owner_id == conn_id {
            self.members.first().map(|m| m.conn.id().to_string())
        } else {
            None
        };
        if let Some(owner_id) = &new_owner_id {
            info!(room_id = %self.id, owner_id = %owner_id, "Ownership transferred");
            self.owner_id = owner_id.clone();
        }

        if !self.members.is_empty() {
            self.broadcast(&ServerMsg::PlayerLeft {
                player_id: conn_id.to_string(),
                new_owner_id,
            });
        }
        self.publish();
        self.directory.room_updated();
        self.after_departure(conn_id);
        true
    }

    /// Mid-match drops freeze the player; otherwise the member is removed
    fn disconnected(&mut self, conn_id: &str) {
        let in_match = self.state == RoomState::Playing
            && self
                .simulation
                .as_ref()
                .is_some_and(|sim| sim.has_player(conn_id));

        if !in_match {
            if self.remove_member(conn_id) {
                info!(room_id = %self.id, conn_id = %conn_id, "Player disconnected");
            }
            return;
        }

        let Some(member) = self.member_mut(conn_id) else {
            return;
        };
        member.connected = false;
        if let Some(sim) = &self.simulation {
            sim.set_connected(conn_id, false);
        }
        info!(room_id = %self.id, conn_id = %conn_id, "Player disconnected mid-match");
        self.publish();
        self.after_departure(conn_id);
    }

    fn after_departure(&mut self, conn_id: &str) {
        self.loading.remove(conn_id);
        self.check_abandoned();
        self.maybe_begin_countdown();
    }

    /// Stop the match once nobody in it is reachable
    fn check_abandoned(&self) {
        if self.state != RoomState::Playing {
            return;
        }
        if let Some(sim) = &self.simulation {
            if self.members.is_empty() || sim.connected_count() == 0 {
                sim.stop(EndReason::AllPlayersLeft);
            }
        }
    }

    // ========================================================================
    // Lobby actions
    // ========================================================================

    fn ready_toggle(&mut self, conn_id: &str) {
        if !matches!(self.state, RoomState::Waiting | RoomState::Finished) {
            self.reply_error(conn_id, &GameError::NotWaiting);
            return;
        }
        let Some(member) = self.member_mut(conn_id) else {
            return;
        };
        member.ready = !member.ready;
        let is_ready = member.ready;

        self.broadcast(&ServerMsg::PlayerReadyChanged {
            player_id: conn_id.to_string(),
            is_ready,
        });
    }

    fn start_game(&mut self, conn_id: &str) -> Result<(), GameError> {
        if conn_id != self.owner_id {
            return Err(GameError::NotOwner);
        }
        match self.state {
            RoomState::Waiting => {}
            RoomState::Finished => return Err(GameError::PlayersStillReturning),
            RoomState::Playing => return Err(GameError::NotWaiting),
        }
        if self.members.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }
        if self
            .members
            .iter()
            .any(|m| m.conn.id() != self.owner_id && !m.ready)
        {
            return Err(GameError::PlayersNotReady);
        }

        let participants: Vec<Participant> = self
            .members
            .iter()
            .map(|m| Participant {
                id: m.conn.id().to_string(),
                nickname: m.profile.nickname.clone(),
                color: m.profile.color.clone(),
                character: m.profile.character.clone(),
            })
            .collect();

        let sim = Simulation::new(
            self.id.clone(),
            &participants,
            self.settings.clone(),
            self.roster.subscribe(),
            self.match_tx.clone(),
        );

        self.state = RoomState::Playing;
        self.loading = participants.iter().map(|p| (p.id.clone(), false)).collect();
        self.countdown_requested = false;
        self.simulation = Some(Arc::clone(&sim));
        self.publish();

        info!(room_id = %self.id, player_count = participants.len(), "Game starting");
        self.broadcast(&ServerMsg::GameInitData {
            players: sim.roster_snapshot(),
        });
        self.broadcast_room_state();
        self.directory.room_updated();
        sim.start();
        Ok(())
    }

    fn loading_complete(&mut self, conn_id: &str) {
        if self.state != RoomState::Playing {
            return;
        }
        if let Some(done) = self.loading.get_mut(conn_id) {
            *done = true;
        }
        self.maybe_begin_countdown();
    }

    /// Countdown starts once, when the last outstanding ack arrives
    fn maybe_begin_countdown(&mut self) {
        if self.countdown_requested
            || self.state != RoomState::Playing
            || self.loading.values().any(|done| !done)
        {
            return;
        }
        let Some(sim) = &self.simulation else {
            return;
        };
        self.countdown_requested = true;
        if sim.begin_countdown() {
            info!(room_id = %self.id, "All players loaded, countdown started");
        }
    }

    // ========================================================================
    // Match lifecycle
    // ========================================================================

    fn handle_match_event(&mut self, event: MatchEvent) {
        match event {
            MatchEvent::Started => self.directory.room_updated(),
            MatchEvent::Finished { reason } => {
                if self.state != RoomState::Playing {
                    return;
                }
                self.state = RoomState::Finished;
                self.simulation = None;
                self.loading.clear();
                for member in &mut self.members {
                    member.ready = false;
                }
                info!(room_id = %self.id, reason = %reason, "Room finished");

                self.broadcast_room_state();
                self.publish();
                self.directory.room_updated();
            }
            MatchEvent::NewRound => {
                if self.state != RoomState::Finished {
                    return;
                }
                self.state = RoomState::Waiting;

                let unreachable: Vec<String> = self
                    .members
                    .iter()
                    .filter(|m| !m.connected || m.conn.is_closed())
                    .map(|m| m.conn.id().to_string())
                    .collect();
                for conn_id in unreachable {
                    self.remove_member(&conn_id);
                }
                info!(room_id = %self.id, player_count = self.members.len(), "Room waiting");

                self.broadcast_room_state();
                self.publish();
                self.directory.room_updated();
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn member(&self, conn_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.conn.id() == conn_id)
    }

    fn member_mut(&mut self, conn_id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.conn.id() == conn_id)
    }

    fn reply_error(&self, conn_id: &str, err: &GameError) {
        if let Some(member) = self.member(conn_id) {
            member.conn.send_error(err);
        }
    }

    fn player_info(&self, member: &Member) -> PlayerInfo {
        let id = member.conn.id();
        PlayerInfo {
            id: id.to_string(),
            nickname: member.profile.nickname.clone(),
            color: member.profile.color.clone(),
            character: member.profile.character.clone(),
            asset: self.simulation.as_ref().and_then(|sim| sim.asset_of(id)),
            is_ready: member.ready,
            is_owner: id == self.owner_id,
        }
    }

    fn players(&self) -> Vec<PlayerInfo> {
        self.members.iter().map(|m| self.player_info(m)).collect()
    }

    fn room_info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            players: self.players(),
            max_players: self.settings.max_players,
            state: self.state,
            current_players: self.members.len(),
        }
    }

    /// Push the summary and the broadcast roster to watchers
    fn publish(&self) {
        self.summary.send_replace(RoomSummary {
            state: self.state,
            current_players: self.members.len(),
            max_players: self.settings.max_players,
        });
        let roster: Vec<ConnectionHandle> = self
            .members
            .iter()
            .filter(|m| m.connected)
            .map(|m| m.conn.clone())
            .collect();
        self.roster.send_replace(Arc::new(roster));
    }

    fn broadcast_room_state(&self) {
        self.broadcast(&ServerMsg::RoomStateUpdated {
            room_id: self.id.clone(),
            new_state: self.state,
            players: self.players(),
        });
    }

    fn broadcast(&self, msg: &ServerMsg) {
        self.broadcast_filtered(msg, None);
    }

    fn broadcast_except(&self, msg: &ServerMsg, skip: &str) {
        self.broadcast_filtered(msg, Some(skip));
    }

    fn broadcast_filtered(&self, msg: &ServerMsg, skip: Option<&str>) {
        let frame = match msg.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room_id = %self.id, error = %e, "Failed to serialize broadcast");
                return;
            }
        };
        for member in &self.members {
            if !member.connected || skip == Some(member.conn.id()) {
                continue;
            }
            member.conn.send_frame(frame.clone());
        }
    }
}
