//! WebSocket upgrade handler and Connection Actor

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::GameError;
use crate::lobby::{ConnectionHandle, DirectoryHandle, SessionCmd};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, Frame, RoomState};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue_size);
    let conn = ConnectionHandle::new(conn_id.clone(), outbound_tx);

    let mut writer = tokio::spawn(write_loop(
        conn_id.clone(),
        ws_sink,
        outbound_rx,
        state.config.ping_interval(),
        state.config.write_timeout,
    ));

    if !state.directory.register(conn.clone()).await {
        error!(conn_id = %conn_id, "Directory unavailable");
        writer.abort();
        return;
    }

    let actor = ConnectionActor::new(
        conn,
        state.directory.clone(),
        state.config.inbound_rate_limit,
    );

    tokio::select! {
        _ = actor.read_loop(ws_stream, state.config.keepalive_timeout) => {}
        _ = &mut writer => {
            debug!(conn_id = %conn_id, "Writer finished first");
        }
    }

    actor.disconnect().await;
    writer.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Drain the outbound queue into the socket and keep the peer alive
async fn write_loop<S>(
    conn_id: String,
    mut ws_sink: S,
    mut outbound: mpsc::Receiver<Frame>,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string()),
                None => {
                    let _ = timeout(write_timeout, ws_sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(write_timeout, ws_sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                warn!(conn_id = %conn_id, "WebSocket write timed out");
                break;
            }
        }
    }
}

/// Where an inbound message is handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Session,
    Directory,
    Reject(GameError),
}

/// Routing rules, first match wins:
/// in-match traffic goes to the playing room, lobby traffic to the
/// Directory, room commands to the bound room.
pub fn route(msg: &ClientMsg, room: Option<RoomState>) -> Route {
    match msg {
        ClientMsg::PlayerAction(_) | ClientMsg::LoadingComplete
            if room == Some(RoomState::Playing) =>
        {
            Route::Session
        }
        ClientMsg::CreateRoom
        | ClientMsg::JoinRoom { .. }
        | ClientMsg::ListRooms
        | ClientMsg::SetProfile(_) => Route::Directory,
        ClientMsg::LeaveRoom | ClientMsg::ReadyToggle | ClientMsg::StartGame => {
            if room.is_some() {
                Route::Session
            } else {
                Route::Reject(GameError::NotInRoom)
            }
        }
        ClientMsg::PlayerAction(_) | ClientMsg::LoadingComplete => {
            Route::Reject(GameError::UnhandledType(msg.kind().to_string()))
        }
    }
}

/// Per-connection reader. Decodes frames and forwards them; never touches
/// room or registry state itself.
pub struct ConnectionActor {
    conn: ConnectionHandle,
    directory: DirectoryHandle,
    rate_limiter: ConnectionRateLimiter,
}

impl ConnectionActor {
    pub fn new(conn: ConnectionHandle, directory: DirectoryHandle, messages_per_second: u32) -> Self {
        Self {
            conn,
            directory,
            rate_limiter: ConnectionRateLimiter::new(messages_per_second),
        }
    }

    /// Read until close, error or keepalive timeout
    pub async fn read_loop<S>(&self, mut ws_stream: S, read_timeout: Duration)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let conn_id = self.conn.id();

        loop {
            let result = match timeout(read_timeout, ws_stream.next()).await {
                Ok(Some(result)) => result,
                Ok(None) => break,
                Err(_) => {
                    warn!(conn_id = %conn_id, "Keepalive timeout");
                    break;
                }
            };

            match result {
                Ok(Message::Text(text)) => {
                    if !self.rate_limiter.check_inbound() {
                        warn!(conn_id = %conn_id, "Rate limited inbound message");
                        continue;
                    }
                    self.dispatch(&text);
                }
                Ok(Message::Binary(_)) => {
                    warn!(conn_id = %conn_id, "Received binary message");
                    self.conn.send_error(&GameError::InvalidFormat);
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    debug!(conn_id = %conn_id, "Keepalive");
                }
                Ok(Message::Close(_)) => {
                    info!(conn_id = %conn_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    /// Decode one text frame and forward it
    pub fn dispatch(&self, text: &str) {
        let msg = match ClientMsg::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn_id = %self.conn.id(), error = %e, "Failed to decode client message");
                self.conn.send_error(&e);
                return;
            }
        };

        let session = self.conn.session();
        let conn_id = self.conn.id().to_string();

        match route(&msg, session.as_ref().map(|s| s.state())) {
            Route::Reject(e) => {
                self.conn.send_error(&e);
            }
            Route::Directory => match msg {
                ClientMsg::CreateRoom => self.directory.create_room(conn_id),
                ClientMsg::JoinRoom { room_id } => self.directory.join_room(conn_id, room_id),
                ClientMsg::ListRooms => self.directory.list_rooms(conn_id),
                ClientMsg::SetProfile(payload) => self.directory.update_profile(conn_id, payload),
                other => warn!(conn_id = %conn_id, kind = other.kind(), "Misrouted message"),
            },
            Route::Session => {
                let Some(session) = session else {
                    return;
                };
                let cmd = match msg {
                    ClientMsg::PlayerAction(action) => SessionCmd::PlayerAction { conn_id, action },
                    ClientMsg::LoadingComplete => SessionCmd::LoadingComplete { conn_id },
                    ClientMsg::LeaveRoom => SessionCmd::Leave { conn_id },
                    ClientMsg::ReadyToggle => SessionCmd::ReadyToggle { conn_id },
                    ClientMsg::StartGame => SessionCmd::StartGame { conn_id },
                    other => {
                        warn!(conn_id = %conn_id, kind = other.kind(), "Misrouted message");
                        return;
                    }
                };
                session.send(cmd);
            }
        }
    }

    /// Tell the room, then the Directory, that this connection is gone
    pub async fn disconnect(&self) {
        let conn_id = self.conn.id().to_string();
        if let Some(session) = self.conn.session() {
            session
                .send_reliable(SessionCmd::Disconnected {
                    conn_id: conn_id.clone(),
                })
                .await;
        }
        self.directory.unregister(conn_id).await;
    }
}
