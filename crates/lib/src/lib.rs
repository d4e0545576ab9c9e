//! Porto core library: tab sessions, chat turns, persistence, email drafting, and the
//! backend REST client, shared by the CLI and desktop applications.

pub mod api;
pub mod config;
pub mod draft;
pub mod email;
pub mod init;
pub mod session;
pub mod store;
pub mod tab;
pub mod turn;
