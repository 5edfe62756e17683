//! Per-room broadcast engine.
//!
//! A [`Hub`] owns the room's membership, its bounded history and the presence
//! table. All of that state is touched only from [`Hub::run`], which applies
//! [`HubCommand`]s one at a time in arrival order. Everyone else talks to the
//! hub through a cloneable [`HubHandle`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::messages::{Event, EventKind, ServerEvent};

pub type ClientId = Uuid;

/// A serialized event exactly as it arrived on the wire.
pub type Frame = Arc<str>;

pub const HISTORY_CAPACITY: usize = 100;
pub const CLIENT_QUEUE_CAPACITY: usize = 256;
pub const UNKNOWN_STATUS: &str = "Unknown";

/// What the hub keeps to reach a connection: its id and the sending half of
/// its outbound queue. Dropping the sender closes the queue.
#[derive(Debug)]
pub struct Membership {
    pub id: ClientId,
    pub sender: mpsc::Sender<Frame>,
}

#[derive(Debug)]
pub enum HubCommand {
    Admit(Membership),
    Remove(ClientId),
    Broadcast {
        raw: Vec<u8>,
        origin: Option<ClientId>,
    },
}

#[derive(Clone, Debug)]
pub struct HubHandle {
    room_id: Arc<str>,
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn admit(&self, membership: Membership) {
        self.send(HubCommand::Admit(membership));
    }

    pub fn remove(&self, id: ClientId) {
        self.send(HubCommand::Remove(id));
    }

    pub fn broadcast(&self, raw: Vec<u8>, origin: Option<ClientId>) {
        self.send(HubCommand::Broadcast { raw, origin });
    }

    /// True when both handles drive the same hub.
    pub fn same_hub(&self, other: &HubHandle) -> bool {
        self.commands.same_channel(&other.commands)
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            warn!("Hub for room {} is no longer running", self.room_id);
        }
    }
}

#[derive(Debug)]
struct Member {
    sender: mpsc::Sender<Frame>,
    user_id: Option<String>,
    status: String,
}

pub struct Hub {
    room_id: Arc<str>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    loopback: mpsc::WeakUnboundedSender<HubCommand>,
    members: HashMap<ClientId, Member>,
    history: VecDeque<Frame>,
    presence: HashMap<String, String>,
}

impl Hub {
    pub fn new(room_id: &str) -> (Self, HubHandle) {
        let room_id: Arc<str> = Arc::from(room_id);
        let (tx, rx) = mpsc::unbounded_channel();

        let hub = Hub {
            room_id: room_id.clone(),
            commands: rx,
            loopback: tx.downgrade(),
            members: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            presence: HashMap::new(),
        };
        let handle = HubHandle {
            room_id,
            commands: tx,
        };
        (hub, handle)
    }

    /// Creates a hub and runs it on its own task.
    pub fn spawn(room_id: &str) -> HubHandle {
        let (hub, handle) = Hub::new(room_id);
        tokio::spawn(hub.run());
        handle
    }

    pub async fn run(mut self) {
        info!("Hub for room {} started", self.room_id);
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        info!("Hub for room {} stopped", self.room_id);
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Admit(membership) => self.admit(membership),
            HubCommand::Remove(id) => self.remove(id),
            HubCommand::Broadcast { raw, origin } => self.broadcast(raw, origin),
        }
    }

    fn admit(&mut self, membership: Membership) {
        let Membership { id, sender } = membership;

        // Replay goes into the queue before the member can see anything newer.
        for frame in &self.history {
            if let Err(e) = sender.try_send(frame.clone()) {
                warn!("Dropping {} in room {}: history replay failed ({})", id, self.room_id, e);
                return;
            }
        }

        self.members.insert(
            id,
            Member {
                sender,
                user_id: None,
                status: UNKNOWN_STATUS.to_string(),
            },
        );
        info!(
            "{} joined room {} ({} members, {} frames replayed)",
            id,
            self.room_id,
            self.members.len(),
            self.history.len()
        );
    }

    fn remove(&mut self, id: ClientId) {
        let Some(member) = self.members.remove(&id) else {
            debug!("{} already left room {}", id, self.room_id);
            return;
        };
        let user = member.user_id.unwrap_or_default();
        info!("{} ({}) left room {}", id, user, self.room_id);

        // Announced through our own queue so it is ordered like any other broadcast.
        let event = ServerEvent::disconnected(&user).to_json();
        let announced = self.loopback.upgrade().is_some_and(|loopback| {
            loopback
                .send(HubCommand::Broadcast {
                    raw: event.into_bytes(),
                    origin: None,
                })
                .is_ok()
        });
        if !announced {
            debug!("Room {} is shutting down, {} left unannounced", self.room_id, id);
        }
    }

    fn broadcast(&mut self, raw: Vec<u8>, origin: Option<ClientId>) {
        // Evicted or never-admitted connections may still be reading; they no longer speak here.
        if let Some(id) = origin {
            if !self.members.contains_key(&id) {
                debug!("Dropping frame from non-member {} in room {}", id, self.room_id);
                return;
            }
        }

        let text = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => {
                debug!("Dropping non UTF-8 frame in room {}", self.room_id);
                return;
            }
        };
        let decoded = EventKind::peek(&text)
            .and_then(|kind| Event::decode(kind.clone(), &text).map(|event| (kind, event)));
        let (kind, event) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Dropping frame in room {}: {}", self.room_id, e);
                return;
            }
        };
        debug!("{} event in room {}", kind.tag(), self.room_id);
        let frame: Frame = Arc::from(text);

        if let (Some(origin), Some(user_id)) = (origin, event.user_id()) {
            self.adopt_identity(origin, user_id);
        }

        match &event {
            Event::Message(_) => self.remember(frame.clone()),
            Event::Presence(update) => self.record_presence(&update.user_id, &update.status),
            Event::Ack(_) => {
                debug!("Ignoring client-sent ack in room {}", self.room_id);
                return;
            }
            Event::Command(_) | Event::Other(_) => {}
        }

        self.fan_out(&frame);

        if let Some(origin) = origin {
            let ack: Frame = Arc::from(ServerEvent::acknowledge(&frame).to_json());
            self.deliver(origin, ack);
        }
    }

    fn remember(&mut self, frame: Frame) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(frame);
    }

    fn adopt_identity(&mut self, origin: ClientId, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        if let Some(member) = self.members.get_mut(&origin) {
            if member.user_id.is_none() {
                debug!("{} in room {} identified as {}", origin, self.room_id, user_id);
                member.user_id = Some(user_id.to_string());
            }
        }
    }

    fn record_presence(&mut self, user_id: &str, status: &str) {
        for member in self.members.values_mut() {
            if member.user_id.as_deref() == Some(user_id) {
                member.status = status.to_string();
            }
        }
        if !user_id.is_empty() {
            self.presence.insert(user_id.to_string(), status.to_string());
        }
    }

    fn fan_out(&mut self, frame: &Frame) {
        let mut slow = Vec::new();
        for (id, member) in &self.members {
            match member.sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => slow.push(*id),
                // The writer already stopped; its reader will report the disconnect.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        for id in slow {
            warn!("Evicting slow consumer {} from room {}", id, self.room_id);
            self.members.remove(&id);
        }
    }

    fn deliver(&mut self, id: ClientId, frame: Frame) {
        let full = match self.members.get(&id) {
            Some(member) => matches!(member.sender.try_send(frame), Err(TrySendError::Full(_))),
            None => false,
        };
        if full {
            warn!("Evicting slow consumer {} from room {}", id, self.room_id);
            self.members.remove(&id);
        }
    }
}
