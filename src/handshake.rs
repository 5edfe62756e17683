//! Password-authenticated admission for a room.
//!
//! Two binary frames, server first:
//!
//! 1. server -> peer: the server's SPAKE2 message.
//! 2. peer -> server: the peer's SPAKE2 message followed by a confirmation
//!    token, `CONFIRM_LABEL` sealed under the exchanged key with the room id
//!    as associated data.
//!
//! A peer holding the wrong password derives a different key, so its token
//! fails to open and the exchange is rejected. After that the server derives
//! the room key from the password with Argon2id.

use futures_util::{SinkExt, StreamExt};
use log::debug;
use spake2::{Ed25519Group, Identity, Password, Spake2};
use thiserror::Error;
use warp::ws::{Message, WebSocket};

use crate::config::KdfParams;
use crate::crypto::{derive_room_key, CryptoError, SessionCipher, SessionKey};

/// Length of a symmetric-mode SPAKE2 message over Ed25519.
pub const EXCHANGE_MESSAGE_LEN: usize = 33;

const CONFIRM_LABEL: &[u8] = b"room-handshake-confirm";

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("no room password supplied")]
    MissingPassword,
    #[error("transport error: {0}")]
    Transport(#[from] warp::Error),
    #[error("connection closed during handshake")]
    Closed,
    #[error("expected a binary handshake frame")]
    UnexpectedFrame,
    #[error("malformed handshake message")]
    Malformed,
    #[error("key exchange rejected: {0}")]
    Protocol(String),
    #[error("password confirmation failed")]
    Confirmation,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("key derivation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Keys produced by a successful admission.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// Shared value agreed by the key exchange.
    pub session: SessionKey,
    /// Argon2id derivation of the room password.
    pub room: SessionKey,
}

fn start(room_id: &str, password: &str) -> (Spake2<Ed25519Group>, Vec<u8>) {
    Spake2::<Ed25519Group>::start_symmetric(
        &Password::new(password.as_bytes()),
        &Identity::new(room_id.as_bytes()),
    )
}

fn finish(state: Spake2<Ed25519Group>, peer_message: &[u8]) -> Result<SessionKey, HandshakeError> {
    let shared = state
        .finish(peer_message)
        .map_err(|e| HandshakeError::Protocol(format!("{e:?}")))?;
    Ok(SessionKey::from_slice(&shared)?)
}

/// Server half of the exchange.
pub struct ServerHandshake {
    room_id: String,
    state: Spake2<Ed25519Group>,
}

impl ServerHandshake {
    /// Returns the state machine and the first frame to send.
    pub fn start(room_id: &str, password: &str) -> (Self, Vec<u8>) {
        let (state, outbound) = start(room_id, password);
        let handshake = ServerHandshake {
            room_id: room_id.to_string(),
            state,
        };
        (handshake, outbound)
    }

    /// Consumes the peer's frame and verifies its confirmation token.
    pub fn finish(self, peer_frame: &[u8]) -> Result<SessionKey, HandshakeError> {
        if peer_frame.len() <= EXCHANGE_MESSAGE_LEN {
            return Err(HandshakeError::Malformed);
        }
        let (exchange, token) = peer_frame.split_at(EXCHANGE_MESSAGE_LEN);
        let key = finish(self.state, exchange)?;

        let confirmed = SessionCipher::new(&key)
            .open(token, self.room_id.as_bytes())
            .map_err(|_| HandshakeError::Confirmation)?;
        if confirmed != CONFIRM_LABEL {
            return Err(HandshakeError::Confirmation);
        }
        Ok(key)
    }
}

/// Peer half of the exchange, used by clients connecting to a room.
pub struct PeerHandshake {
    room_id: String,
    state: Spake2<Ed25519Group>,
    outbound: Vec<u8>,
}

impl PeerHandshake {
    pub fn start(room_id: &str, password: &str) -> Self {
        let (state, outbound) = start(room_id, password);
        PeerHandshake {
            room_id: room_id.to_string(),
            state,
            outbound,
        }
    }

    /// Consumes the server's frame, returning the session key and the reply frame.
    pub fn respond(self, server_frame: &[u8]) -> Result<(SessionKey, Vec<u8>), HandshakeError> {
        if server_frame.len() != EXCHANGE_MESSAGE_LEN {
            return Err(HandshakeError::Malformed);
        }
        let key = finish(self.state, server_frame)?;
        let token = SessionCipher::new(&key).seal(CONFIRM_LABEL, self.room_id.as_bytes())?;

        let mut reply = self.outbound;
        reply.extend(token);
        Ok((key, reply))
    }
}

/// Runs the server side of the handshake over a freshly upgraded socket.
///
/// The caller closes the socket on error.
pub async fn accept(
    ws: &mut WebSocket,
    room_id: &str,
    password: Option<&str>,
    kdf: KdfParams,
) -> Result<SessionKeys, HandshakeError> {
    let password = password.ok_or(HandshakeError::MissingPassword)?;

    let (handshake, outbound) = ServerHandshake::start(room_id, password);
    ws.send(Message::binary(outbound)).await?;

    let reply = match ws.next().await {
        Some(Ok(msg)) if msg.is_binary() => msg.into_bytes(),
        Some(Ok(msg)) if msg.is_close() => return Err(HandshakeError::Closed),
        Some(Ok(_)) => return Err(HandshakeError::UnexpectedFrame),
        Some(Err(e)) => return Err(e.into()),
        None => return Err(HandshakeError::Closed),
    };
    let session = handshake.finish(&reply)?;
    debug!("Key exchange for room {} agreed on {}", room_id, session.fingerprint());

    let password = password.as_bytes().to_vec();
    let room = tokio::task::spawn_blocking(move || derive_room_key(&password, &kdf)).await??;

    Ok(SessionKeys { session, room })
}
