use log::{info, warn};
use warp::ws::WebSocket;
use warp::{Filter, Rejection, Reply};

use crate::client::Client;
use crate::config::KdfParams;
use crate::handshake;
use crate::registry::HubManager;

/// Header carrying the shared room password on the upgrade request.
pub const PASSWORD_HEADER: &str = "x-room-password";

#[derive(Clone)]
pub struct Server {
    hubs: HubManager,
    kdf: KdfParams,
}

impl Server {
    pub fn new(kdf: KdfParams) -> Self {
        Server {
            hubs: HubManager::new(),
            kdf,
        }
    }

    pub fn hubs(&self) -> &HubManager {
        &self.hubs
    }

    /// `GET /ws/{room_id}` upgraded to a WebSocket, then handed to
    /// [`Server::handle_connection`].
    pub fn routes(self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        warp::path!("ws" / String)
            .and(warp::ws())
            .and(warp::header::optional::<String>(PASSWORD_HEADER))
            .map(move |room_id: String, ws: warp::ws::Ws, password: Option<String>| {
                let server = self.clone();
                ws.on_upgrade(move |socket| async move {
                    server.handle_connection(socket, room_id, password).await;
                })
            })
            .with(warp::cors().allow_any_origin())
    }

    /// Admission pipeline for one upgraded socket: resolve the room, run the
    /// handshake, then register the connection with the room's hub.
    pub async fn handle_connection(
        &self,
        mut ws: WebSocket,
        room_id: String,
        password: Option<String>,
    ) {
        let hub = self.hubs.resolve(&room_id).await;

        match handshake::accept(&mut ws, &room_id, password.as_deref(), self.kdf).await {
            Ok(keys) => {
                info!("Admitted connection to room {}", room_id);
                Client::join(hub, keys, ws);
            }
            Err(e) => {
                warn!("Handshake for room {} failed: {}", room_id, e);
                let _ = ws.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::PeerHandshake;
    use warp::ws::Message;

    const CHEAP: KdfParams = KdfParams {
        memory_kib: 64,
        time_cost: 1,
        lanes: 1,
    };

    #[tokio::test]
    async fn upgrade_without_password_is_closed_immediately() {
        let server = Server::new(CHEAP);
        let mut client = warp::test::ws()
            .path("/ws/lobby")
            .handshake(server.clone().routes())
            .await
            .expect("upgrade");

        client.recv_closed().await.expect("closed without a handshake frame");
        // The room is still resolved before admission is attempted.
        assert_eq!(server.hubs().room_count().await, 1);
    }

    #[tokio::test]
    async fn text_frame_during_handshake_aborts() {
        let server = Server::new(CHEAP);
        let mut client = warp::test::ws()
            .path("/ws/lobby")
            .header(PASSWORD_HEADER, "pw")
            .handshake(server.routes())
            .await
            .expect("upgrade");

        let first = client.recv().await.expect("server frame");
        assert!(first.is_binary());
        client.send(Message::text("hello?")).await;
        client.recv_closed().await.expect("closed");
    }

    #[tokio::test]
    async fn admitted_client_receives_its_own_messages() {
        let server = Server::new(CHEAP);
        let mut client = warp::test::ws()
            .path("/ws/lobby")
            .header(PASSWORD_HEADER, "pw")
            .handshake(server.routes())
            .await
            .expect("upgrade");

        let first = client.recv().await.expect("server frame");
        let (_, reply) = PeerHandshake::start("lobby", "pw")
            .respond(first.as_bytes())
            .unwrap();
        client.send(Message::binary(reply)).await;

        let raw = r#"{"type":"message","content":"hi","user_id":"u1","timestamp":1}"#;
        client.send_text(raw).await;
        let echoed = client.recv().await.expect("echo");
        assert_eq!(echoed.to_str(), Ok(raw));
    }
}
