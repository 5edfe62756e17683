use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use crate::hub::{Hub, HubHandle};

/// Maps room ids to their running hubs.
///
/// Hubs are started on first use and live for the rest of the process;
/// nothing is ever removed from the map.
#[derive(Clone, Default)]
pub struct HubManager {
    hubs: Arc<Mutex<HashMap<String, HubHandle>>>,
}

impl HubManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hub for `room_id`, starting it if this is the first request.
    pub async fn resolve(&self, room_id: &str) -> HubHandle {
        let mut hubs = self.hubs.lock().await;
        if let Some(handle) = hubs.get(room_id) {
            return handle.clone();
        }

        let handle = Hub::spawn(room_id);
        hubs.insert(room_id.to_string(), handle.clone());
        info!("Created room {} ({} rooms)", room_id, hubs.len());
        handle
    }

    pub async fn room_count(&self) -> usize {
        self.hubs.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Frame, Membership};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn concurrent_resolves_start_one_hub_per_room() {
        let manager = HubManager::new();
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.resolve("lobby").await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.iter().all(|h| h.same_hub(&handles[0])));
        assert_eq!(manager.room_count().await, 1);

        let other = manager.resolve("kitchen").await;
        assert!(!other.same_hub(&handles[0]));
        assert_eq!(other.room_id(), "kitchen");
        assert_eq!(manager.room_count().await, 2);
    }

    #[tokio::test]
    async fn rooms_do_not_share_broadcasts() {
        let manager = HubManager::new();
        let lobby = manager.resolve("lobby").await;
        let kitchen = manager.resolve("kitchen").await;

        let (lobby_tx, mut lobby_rx) = mpsc::channel::<Frame>(8);
        let (kitchen_tx, mut kitchen_rx) = mpsc::channel::<Frame>(8);
        lobby.admit(Membership {
            id: Uuid::new_v4(),
            sender: lobby_tx,
        });
        kitchen.admit(Membership {
            id: Uuid::new_v4(),
            sender: kitchen_tx,
        });

        let raw = r#"{"type":"message","content":"hi","user_id":"u1","timestamp":1}"#;
        kitchen.broadcast(raw.as_bytes().to_vec(), None);
        lobby.broadcast(br#"{"type":"typing"}"#.to_vec(), None);

        assert_eq!(&*kitchen_rx.recv().await.unwrap(), raw);
        assert_eq!(&*lobby_rx.recv().await.unwrap(), r#"{"type":"typing"}"#);
        assert!(kitchen_rx.try_recv().is_err());
        assert!(lobby_rx.try_recv().is_err());

        // A late joiner to the lobby sees none of the kitchen's history.
        let (late_tx, mut late_rx) = mpsc::channel::<Frame>(8);
        lobby.admit(Membership {
            id: Uuid::new_v4(),
            sender: late_tx,
        });
        lobby.broadcast(br#"{"type":"typing"}"#.to_vec(), None);
        assert_eq!(&*late_rx.recv().await.unwrap(), r#"{"type":"typing"}"#);
    }
}
