//! WebSocket transport: wire protocol and the Connection Actor

pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
