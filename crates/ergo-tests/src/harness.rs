//! Harness driving a [`SyncProtocol`] directly, without a runtime loop.

use bytes::Bytes;
use ergo_network::{
    Message, ModifierId, NetworkObjectTypeId, NetworkSettings, PeerId, RawFrame,
};
use ergo_state::SnapshotsDb;
use ergo_storage::MemoryStorage;
use ergo_sync::{ModifierSource, SyncCommand, SyncConfig, SyncEvent, SyncProtocol, CHANNEL_CAPACITY};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-memory history.
#[derive(Default)]
pub struct MemoryHistory {
    modifiers: RwLock<HashMap<(NetworkObjectTypeId, ModifierId), Bytes>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, type_id: NetworkObjectTypeId, id: ModifierId, data: impl Into<Bytes>) {
        self.modifiers.write().insert((type_id, id), data.into());
    }
}

impl ModifierSource for MemoryHistory {
    fn contains(&self, type_id: NetworkObjectTypeId, id: &ModifierId) -> bool {
        self.modifiers.read().contains_key(&(type_id, *id))
    }

    fn get(&self, type_id: NetworkObjectTypeId, id: &ModifierId) -> Option<Bytes> {
        self.modifiers.read().get(&(type_id, *id)).cloned()
    }
}

/// Synchronizer plus the collaborators it talks to.
pub struct SyncHarness {
    pub protocol: SyncProtocol,
    pub commands: mpsc::Receiver<SyncCommand>,
    pub history: Arc<MemoryHistory>,
    pub snapshots: Arc<SnapshotsDb>,
}

impl SyncHarness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let (tx, commands) = mpsc::channel(CHANNEL_CAPACITY);
        let history = Arc::new(MemoryHistory::new());
        let snapshots = Arc::new(SnapshotsDb::new(Arc::new(MemoryStorage::new())));
        let protocol = SyncProtocol::new(
            config,
            &NetworkSettings::default(),
            history.clone(),
            snapshots.clone(),
            tx,
        )
        .expect("Failed to create synchronizer");
        Self {
            protocol,
            commands,
            history,
            snapshots,
        }
    }

    pub async fn event(&mut self, event: SyncEvent) {
        self.protocol
            .handle_event(event)
            .await
            .expect("Event handling failed");
    }

    pub async fn connect(&mut self, peer: &PeerId) {
        self.event(SyncEvent::PeerConnected { peer: peer.clone() })
            .await;
    }

    pub async fn disconnect(&mut self, peer: &PeerId) {
        self.event(SyncEvent::PeerDisconnected { peer: peer.clone() })
            .await;
    }

    pub async fn receive(&mut self, peer: &PeerId, message: Message) {
        self.event(SyncEvent::MessageReceived {
            peer: peer.clone(),
            message,
        })
        .await;
    }

    pub async fn receive_frame(&mut self, peer: &PeerId, code: u8, payload: impl Into<Bytes>) {
        self.event(SyncEvent::FrameReceived {
            peer: peer.clone(),
            frame: RawFrame::new(code, payload),
        })
        .await;
    }

    pub async fn tick(&mut self) {
        self.event(SyncEvent::Tick).await;
    }

    /// Commands emitted since the last call.
    pub fn drain(&mut self) -> Vec<SyncCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            commands.push(command);
        }
        commands
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages sent to `peer` among `commands`.
pub fn sent_to(commands: &[SyncCommand], peer: &PeerId) -> Vec<Message> {
    commands
        .iter()
        .filter_map(|command| match command {
            SyncCommand::SendToPeer { peer: to, message } if to == peer => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Every `(peer, message)` pair sent, in order.
pub fn sent(commands: &[SyncCommand]) -> Vec<(PeerId, Message)> {
    commands
        .iter()
        .filter_map(|command| match command {
            SyncCommand::SendToPeer { peer, message } => Some((peer.clone(), message.clone())),
            _ => None,
        })
        .collect()
}
