//! Lobby actors: connection handles, the Directory and per-room Sessions

pub mod connection;
pub mod directory;
pub mod session;

pub use connection::{ConnectionHandle, Profile};
pub use directory::{Directory, DirectoryHandle, DirectoryStats};
pub use session::{SessionCmd, SessionHandle};
