use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::handshake::SessionKeys;
use crate::hub::{ClientId, Frame, HubHandle, Membership, CLIENT_QUEUE_CAPACITY};

/// One admitted connection: its outbound queue, its hub and the keys from
/// its handshake.
pub struct Client {
    id: ClientId,
    hub: HubHandle,
    keys: SessionKeys,
    outbound: mpsc::Receiver<Frame>,
}

impl Client {
    /// Builds the actor and the membership to hand to its hub.
    pub fn new(hub: HubHandle, keys: SessionKeys) -> (Self, Membership) {
        let id = Uuid::new_v4();
        let (sender, outbound) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let client = Client {
            id,
            hub,
            keys,
            outbound,
        };
        (client, Membership { id, sender })
    }

    /// Registers with the hub and starts both relay duties on `ws`.
    pub fn join(
        hub: HubHandle,
        keys: SessionKeys,
        ws: WebSocket,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let (client, membership) = Client::new(hub, keys);
        client.hub.admit(membership);
        client.spawn(ws)
    }

    pub fn spawn(self, ws: WebSocket) -> (JoinHandle<()>, JoinHandle<()>) {
        let Client {
            id,
            hub,
            keys,
            outbound,
        } = self;
        info!(
            "{} relaying in room {} (room key {})",
            id,
            hub.room_id(),
            keys.room.fingerprint()
        );

        let (ws_tx, ws_rx) = ws.split();
        let (writer_done, writer_gone) = oneshot::channel();
        let writer = tokio::spawn(write_pump(id, ws_tx, outbound, writer_done));
        let reader = tokio::spawn(read_pump(id, ws_rx, hub, writer_gone));
        (writer, reader)
    }
}

/// Writes queued frames to the socket. This is the only place the socket is
/// closed: once the hub drops our queue we send a close frame and stop.
/// `_done` is dropped on return, which tells the reader to stop as well.
async fn write_pump(
    id: ClientId,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    _done: oneshot::Sender<()>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = ws_tx.send(Message::text(&*frame)).await {
            debug!("{} write failed: {}", id, e);
            return;
        }
    }

    debug!("{} queue closed, closing socket", id);
    let _ = ws_tx.send(Message::close()).await;
    let _ = ws_tx.close().await;
}

/// Forwards every data frame to the hub untouched until the peer goes away
/// or the writer stops. Either way the connection is then removed from the
/// hub, which releases the writer if it is still running.
async fn read_pump<S>(id: ClientId, mut ws_rx: S, hub: HubHandle, mut writer_gone: oneshot::Receiver<()>)
where
    S: Stream<Item = Result<Message, warp::Error>> + Unpin,
{
    loop {
        let result = tokio::select! {
            next = ws_rx.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = &mut writer_gone => {
                debug!("{} writer stopped, no longer reading", id);
                break;
            }
        };
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("{} read failed: {}", id, e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if msg.is_text() || msg.is_binary() {
            hub.broadcast(msg.into_bytes(), Some(id));
        }
    }

    hub.remove(id);
}
