//! Room-scoped broadcast over WebSockets.
//!
//! A connection to `/ws/{room}` first proves knowledge of the room password
//! through a SPAKE2 exchange ([`handshake`]), then joins the room's [`hub`],
//! which replays recent history and fans out every event to all members.

pub mod client;
pub mod config;
pub mod crypto;
pub mod handshake;
pub mod hub;
pub mod messages;
pub mod registry;
pub mod server;
pub mod tls;

pub use config::{Config, KdfParams};
pub use registry::HubManager;
pub use server::Server;
