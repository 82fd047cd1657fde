//! Synchronizer actor.
//!
//! One task owns the delivery tracker and all per-peer state. Transport
//! events and the periodic sweep arrive through the same `select!` loop, so
//! sweeps never interleave with message handling:
//! 1. Frames are decoded through the message registry; codec failures
//!    become penalties for the sending peer
//! 2. Announced modifiers are requested, deliveries are matched to requests
//! 3. Remote requests are answered from history and the snapshot store
//! 4. With UTXO bootstrap enabled, a snapshot is discovered and downloaded

use crate::delivery::{ArtifactId, ArtifactKind, DeliveryTracker, Expiry, Receipt};
use crate::{AvailableManifests, SyncConfig, SyncError, SyncResult};
use bytes::{Bytes, BytesMut};
use ergo_network::snapshots::SNAPSHOTS_INFO_ENTRY_SIZE;
use ergo_network::{
    DeclineTable, InvData, ManifestId, Message, ModifierId, ModifierItem, ModifiersData,
    ModifiersSpec, MessageRegistry, NetworkObjectTypeId, NetworkSettings, NipopowProofData,
    PeerBook, PeerId, PenaltyReason, RawFrame, SnapshotsInfo, SubtreeId,
};
use ergo_state::{SnapshotsDb, UtxoSetSnapshotDownloadPlan};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Modifier lookups against local history.
pub trait ModifierSource: Send + Sync {
    /// Whether the modifier is already held locally.
    fn contains(&self, type_id: NetworkObjectTypeId, id: &ModifierId) -> bool;

    /// Serialized modifier, if held.
    fn get(&self, type_id: NetworkObjectTypeId, id: &ModifierId) -> Option<Bytes>;
}

/// Commands the synchronizer emits.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    /// Send a message to a specific peer.
    SendToPeer { peer: PeerId, message: Message },
    /// Send a message to all connected peers.
    Broadcast { message: Message },
    /// Hand solicited modifiers to the validator.
    ApplyModifiers { peer: PeerId, modifiers: ModifiersData },
    /// Report misbehaviour. `ban` is set once the peer crossed the threshold.
    Penalize {
        peer: PeerId,
        reason: PenaltyReason,
        ban: bool,
    },
    /// A request could not be satisfied by any peer.
    DeliveryFailed {
        id: ArtifactId,
        peer: PeerId,
        attempts: u32,
    },
    /// Peer discovery traffic, handled elsewhere.
    Route { peer: PeerId, message: Message },
    /// A peer asked for a NiPoPoW proof.
    NipopowProofRequested { peer: PeerId, data: NipopowProofData },
    /// A requested NiPoPoW proof arrived.
    NipopowProofReceived { peer: PeerId, proof: Bytes },
    /// A requested manifest was stored; its subtree ids are needed to go on.
    ManifestReceived {
        height: i32,
        manifest_id: ManifestId,
        manifest: Bytes,
    },
    /// Every chunk of the snapshot is stored.
    SnapshotDownloaded { height: i32, manifest_id: ManifestId },
}

/// Events the synchronizer receives.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId },
    /// Raw frame from the transport.
    FrameReceived { peer: PeerId, frame: RawFrame },
    /// Message already decoded by the transport.
    MessageReceived { peer: PeerId, message: Message },
    /// Ask `peer` for modifiers.
    RequestModifiers { peer: PeerId, inv: InvData },
    /// Announce local modifiers to every peer.
    Announce { inv: InvData },
    /// The validator rejected a modifier.
    ModifierInvalid {
        id: ModifierId,
        peer: Option<PeerId>,
        reason: String,
    },
    /// Subtree ids parsed from a received manifest.
    SnapshotPlanReady {
        height: i32,
        manifest_id: ManifestId,
        subtree_ids: Vec<SubtreeId>,
    },
    RequestNipopowProof { peer: PeerId, data: NipopowProofData },
    /// Run the delivery sweep now.
    Tick,
}

/// Progress of the UTXO snapshot download.
#[derive(Debug, Clone)]
pub enum SnapshotSync {
    Idle,
    ManifestRequested { height: i32, manifest_id: ManifestId },
    AwaitingPlan { height: i32, manifest_id: ManifestId },
    Downloading(UtxoSetSnapshotDownloadPlan),
    Done { height: i32, manifest_id: ManifestId },
}

/// Synchronizer state, owned by a single task.
pub struct SyncProtocol {
    config: SyncConfig,
    registry: MessageRegistry,
    modifiers_spec: ModifiersSpec,
    max_inv_objects: usize,
    tracker: DeliveryTracker,
    peers: PeerBook,
    declined: DeclineTable,
    manifests: AvailableManifests,
    snapshot: SnapshotSync,
    history: Arc<dyn ModifierSource>,
    snapshots: Arc<SnapshotsDb>,
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncProtocol {
    pub fn new(
        config: SyncConfig,
        settings: &NetworkSettings,
        history: Arc<dyn ModifierSource>,
        snapshots: Arc<SnapshotsDb>,
        command_tx: mpsc::Sender<SyncCommand>,
    ) -> SyncResult<Self> {
        Ok(Self {
            registry: MessageRegistry::standard(settings)?,
            modifiers_spec: ModifiersSpec::with_max_size(config.max_modifiers_size),
            max_inv_objects: settings.max_inv_objects,
            tracker: DeliveryTracker::new(&config),
            peers: PeerBook::new(),
            declined: DeclineTable::with_defaults(),
            manifests: AvailableManifests::new(),
            snapshot: SnapshotSync::Idle,
            history,
            snapshots,
            command_tx,
            config,
        })
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn peers(&self) -> &PeerBook {
        &self.peers
    }

    pub fn declined(&self) -> &DeclineTable {
        &self.declined
    }

    pub fn manifests(&self) -> &AvailableManifests {
        &self.manifests
    }

    pub fn snapshot_state(&self) -> &SnapshotSync {
        &self.snapshot
    }

    /// Process events until the sender side closes.
    ///
    /// Only a closed command channel stops the loop early; other handler
    /// errors are logged.
    pub async fn run(mut self, mut events: mpsc::Receiver<SyncEvent>) -> SyncResult<()> {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(peers = self.peers.len(), "Synchronizer started");

        loop {
            let result = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = ticker.tick() => self.on_tick().await,
            };
            if let Err(e) = result {
                if e.is_fatal() {
                    warn!(error = %e, "Synchronizer stopping");
                    return Err(e);
                }
                warn!(error = %e, "Sync event failed");
            }
        }

        info!("Event channel closed, synchronizer stopped");
        Ok(())
    }

    /// Handle a single event.
    pub async fn handle_event(&mut self, event: SyncEvent) -> SyncResult<()> {
        match event {
            SyncEvent::PeerConnected { peer } => {
                debug!(peer = %peer, "Peer connected");
                self.peers.connect(peer, now());
            }
            SyncEvent::PeerDisconnected { peer } => {
                self.on_peer_disconnected(&peer);
            }
            SyncEvent::FrameReceived { peer, frame } => {
                self.on_frame(peer, frame).await?;
            }
            SyncEvent::MessageReceived { peer, message } => {
                self.on_message(peer, message).await?;
            }
            SyncEvent::RequestModifiers { peer, inv } => {
                self.request_modifiers(&peer, inv.type_id, inv.ids).await?;
            }
            SyncEvent::Announce { inv } => {
                for chunk in inv.chunks(self.max_inv_objects) {
                    self.send(SyncCommand::Broadcast {
                        message: Message::Inv(chunk),
                    })
                    .await?;
                }
            }
            SyncEvent::ModifierInvalid { id, peer, reason } => {
                self.on_modifier_invalid(id, peer, reason).await?;
            }
            SyncEvent::SnapshotPlanReady {
                height,
                manifest_id,
                subtree_ids,
            } => {
                self.on_snapshot_plan(height, manifest_id, subtree_ids).await?;
            }
            SyncEvent::RequestNipopowProof { peer, data } => {
                let id = ArtifactId::NipopowProof(peer.clone());
                if self.tracker.set_requested(id, peer.clone(), now()) {
                    self.send_to_peer(&peer, Message::GetNipopowProof(data)).await?;
                }
            }
            SyncEvent::Tick => {
                self.on_tick().await?;
            }
        }
        Ok(())
    }

    async fn on_frame(&mut self, peer: PeerId, frame: RawFrame) -> SyncResult<()> {
        match self.registry.decode(frame.code, frame.payload) {
            Ok(message) => self.on_message(peer, message).await,
            Err(e) => match PenaltyReason::for_error(&e) {
                Some(reason) => {
                    debug!(peer = %peer, code = frame.code, error = %e, "Rejected frame");
                    self.penalize(&peer, reason).await
                }
                None => {
                    trace!(peer = %peer, code = frame.code, "Dropped frame with unknown code");
                    Ok(())
                }
            },
        }
    }

    async fn on_message(&mut self, peer: PeerId, message: Message) -> SyncResult<()> {
        match message {
            Message::GetPeers | Message::Peers(_) => {
                self.send(SyncCommand::Route { peer, message }).await
            }
            Message::Inv(inv) => self.on_inv(peer, inv).await,
            Message::RequestModifier(inv) => self.on_modifier_request(peer, inv).await,
            Message::Modifiers(data) => self.on_modifiers(peer, data).await,
            Message::GetSnapshotsInfo => {
                let info = self.snapshots.read_snapshots_info()?;
                self.send_to_peer(&peer, Message::SnapshotsInfo(info)).await
            }
            Message::SnapshotsInfo(info) => {
                self.on_snapshots_info(peer, info).await
            }
            Message::GetManifest(id) => match self.snapshots.read_manifest(&id)? {
                Some(manifest) => self.send_to_peer(&peer, Message::Manifest(manifest)).await,
                None => {
                    trace!(peer = %peer, manifest_id = %id, "Manifest not held");
                    Ok(())
                }
            },
            Message::Manifest(manifest) => self.on_manifest(peer, manifest).await,
            Message::GetUtxoSnapshotChunk(id) => match self.snapshots.read_subtree(&id)? {
                Some(chunk) => {
                    self.send_to_peer(&peer, Message::UtxoSnapshotChunk(chunk))
                        .await
                }
                None => {
                    trace!(peer = %peer, subtree_id = %id, "Subtree not held");
                    Ok(())
                }
            },
            Message::UtxoSnapshotChunk(chunk) => self.on_chunk(peer, chunk).await,
            Message::GetNipopowProof(data) => {
                self.send(SyncCommand::NipopowProofRequested { peer, data })
                    .await
            }
            Message::NipopowProof(proof) => {
                let id = ArtifactId::NipopowProof(peer.clone());
                match self.tracker.on_received(&id, &peer, proof.len(), now()) {
                    Receipt::Accepted { elapsed, .. } => {
                        self.peers.record_delivery(&peer, elapsed, now());
                        self.send(SyncCommand::NipopowProofReceived { peer, proof })
                            .await
                    }
                    Receipt::Duplicate => Ok(()),
                    Receipt::Unsolicited { penalty } => self.penalize_opt(&peer, penalty).await,
                }
            }
        }
    }

    /// Request announced ids that are neither known, declined nor in flight.
    async fn on_inv(&mut self, peer: PeerId, inv: InvData) -> SyncResult<()> {
        let now = now();
        let mut wanted = Vec::new();
        for id in inv.ids {
            if self.declined.contains(&id, now) || self.history.contains(inv.type_id, &id) {
                continue;
            }
            let artifact = ArtifactId::Modifier(inv.type_id, id);
            if self.tracker.is_requested(&artifact) {
                self.tracker.add_source(&artifact, peer.clone());
            } else if !self.tracker.was_delivered(&artifact) {
                wanted.push(id);
            }
        }
        trace!(peer = %peer, wanted = wanted.len(), "Inv received");
        self.request_modifiers(&peer, inv.type_id, wanted).await
    }

    async fn request_modifiers(
        &mut self,
        peer: &PeerId,
        type_id: NetworkObjectTypeId,
        ids: Vec<ModifierId>,
    ) -> SyncResult<()> {
        let now = now();
        let ids: Vec<ModifierId> = ids
            .into_iter()
            .filter(|id| !self.declined.contains(id, now))
            .filter(|id| {
                self.tracker
                    .set_requested(ArtifactId::Modifier(type_id, *id), peer.clone(), now)
            })
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        debug!(peer = %peer, type_id = type_id.0, count = ids.len(), "Requesting modifiers");
        for chunk in InvData::new(type_id, ids).chunks(self.config.desired_inv_objects) {
            self.send_to_peer(peer, Message::RequestModifier(chunk)).await?;
        }
        Ok(())
    }

    /// Answer with the requested modifiers we hold, in batches within the
    /// nominal size.
    async fn on_modifier_request(&mut self, peer: PeerId, inv: InvData) -> SyncResult<()> {
        let reserve = self.modifiers_spec.reserve_size();
        let items: Vec<ModifierItem> = inv
            .ids
            .iter()
            .filter_map(|id| {
                self.history
                    .get(inv.type_id, id)
                    .map(|data| ModifierItem::new(*id, data))
            })
            .filter(|item| {
                let fits = item.encoded_len() < reserve;
                if !fits {
                    warn!(id = %item.id, size = item.encoded_len(), "Modifier too large to send");
                }
                fits
            })
            .collect();
        if items.is_empty() {
            return Ok(());
        }

        for batch in self.modifiers_spec.batches(inv.type_id, items) {
            let report = self
                .modifiers_spec
                .serialize_bounded(&batch, &mut BytesMut::new());
            if report.is_partial() {
                warn!(
                    peer = %peer,
                    written = report.written,
                    truncated = report.truncated,
                    oversized = report.oversized,
                    "Modifiers batch truncated"
                );
            } else {
                trace!(peer = %peer, count = report.written, bytes = report.bytes, "Sending modifiers");
            }
            self.send_to_peer(&peer, Message::Modifiers(batch)).await?;
        }
        Ok(())
    }

    /// Forward solicited modifiers, drop the rest.
    async fn on_modifiers(&mut self, peer: PeerId, data: ModifiersData) -> SyncResult<()> {
        let now = now();
        let type_id = data.type_id;
        let mut accepted = ModifiersData::new(type_id);

        for item in data.into_items() {
            if self.declined.contains(&item.id, now) {
                debug!(peer = %peer, id = %item.id, "Declined modifier delivered");
                self.penalize(&peer, PenaltyReason::DeclinedModifier).await?;
                continue;
            }
            let artifact = ArtifactId::Modifier(type_id, item.id);
            match self.tracker.on_received(&artifact, &peer, item.data.len(), now) {
                Receipt::Accepted { elapsed, .. } => {
                    self.peers.record_delivery(&peer, elapsed, now);
                    accepted.insert(item.id, item.data);
                }
                Receipt::Duplicate => {}
                Receipt::Unsolicited { penalty } => self.penalize_opt(&peer, penalty).await?,
            }
        }

        if accepted.is_empty() {
            return Ok(());
        }
        debug!(peer = %peer, type_id = type_id.0, count = accepted.len(), "Modifiers received");
        self.send(SyncCommand::ApplyModifiers {
            peer,
            modifiers: accepted,
        })
        .await
    }

    async fn on_modifier_invalid(
        &mut self,
        id: ModifierId,
        peer: Option<PeerId>,
        reason: String,
    ) -> SyncResult<()> {
        info!(id = %id, reason = %reason, "Declining modifier");
        self.declined.decline(id, reason, now());
        match peer {
            Some(peer) => self.penalize(&peer, PenaltyReason::InvalidModifier).await,
            None => Ok(()),
        }
    }

    async fn on_snapshots_info(&mut self, peer: PeerId, info: SnapshotsInfo) -> SyncResult<()> {
        let id = ArtifactId::SnapshotsInfo(peer.clone());
        let size = info.len() * SNAPSHOTS_INFO_ENTRY_SIZE;
        match self.tracker.on_received(&id, &peer, size, now()) {
            Receipt::Accepted { .. } => {
                debug!(peer = %peer, snapshots = info.len(), "Snapshots info received");
                self.manifests.update(&peer, &info);
                Ok(())
            }
            Receipt::Duplicate => Ok(()),
            Receipt::Unsolicited { penalty } => self.penalize_opt(&peer, penalty).await,
        }
    }

    /// Manifests carry no id on the wire; the oldest manifest request
    /// outstanding at the peer is taken as the one answered.
    async fn on_manifest(&mut self, peer: PeerId, manifest: Bytes) -> SyncResult<()> {
        let now = now();
        let Some(ArtifactId::Manifest(manifest_id)) =
            self.tracker.oldest_requested(&peer, ArtifactKind::Manifest)
        else {
            let penalty = self.tracker.note_unsolicited(&peer, manifest.len(), now);
            return self.penalize_opt(&peer, penalty).await;
        };

        let id = ArtifactId::Manifest(manifest_id);
        let Receipt::Accepted { elapsed, .. } =
            self.tracker.on_received(&id, &peer, manifest.len(), now)
        else {
            return Ok(());
        };
        self.peers.record_delivery(&peer, elapsed, now);
        self.snapshots.write_manifest(&manifest_id, &manifest)?;

        let height = match self.snapshot {
            SnapshotSync::ManifestRequested {
                height,
                manifest_id: requested,
            } if requested == manifest_id => height,
            _ => {
                debug!(manifest_id = %manifest_id, "Stored manifest outside of a download");
                return Ok(());
            }
        };
        info!(height, manifest_id = %manifest_id, size = manifest.len(), "Manifest received");
        self.snapshot = SnapshotSync::AwaitingPlan {
            height,
            manifest_id,
        };
        self.send(SyncCommand::ManifestReceived {
            height,
            manifest_id,
            manifest,
        })
        .await
    }

    async fn on_snapshot_plan(
        &mut self,
        height: i32,
        manifest_id: ManifestId,
        subtree_ids: Vec<SubtreeId>,
    ) -> SyncResult<()> {
        match self.snapshot {
            SnapshotSync::AwaitingPlan {
                height: h,
                manifest_id: m,
            } if h == height && m == manifest_id => {}
            _ => {
                warn!(height, manifest_id = %manifest_id, "Snapshot plan for a manifest not awaited");
                return Ok(());
            }
        }

        let plan = UtxoSetSnapshotDownloadPlan::new(height, manifest_id, subtree_ids, now());
        info!(height, chunks = plan.total_chunks(), "Starting snapshot download");
        self.snapshot = SnapshotSync::Downloading(plan);
        self.finish_snapshot_if_complete().await?;
        self.dispatch_chunks().await
    }

    /// Chunks carry no id either; matched like manifests, with the same
    /// in-order assumption (see [`DeliveryTracker::oldest_requested`]).
    async fn on_chunk(&mut self, peer: PeerId, chunk: Bytes) -> SyncResult<()> {
        let now = now();
        let Some(ArtifactId::Subtree(subtree_id)) =
            self.tracker.oldest_requested(&peer, ArtifactKind::Subtree)
        else {
            let penalty = self.tracker.note_unsolicited(&peer, chunk.len(), now);
            return self.penalize_opt(&peer, penalty).await;
        };

        let id = ArtifactId::Subtree(subtree_id);
        let Receipt::Accepted { elapsed, .. } =
            self.tracker.on_received(&id, &peer, chunk.len(), now)
        else {
            return Ok(());
        };
        self.peers.record_delivery(&peer, elapsed, now);
        self.snapshots.write_subtree(&subtree_id, &chunk)?;

        if let SnapshotSync::Downloading(plan) = &mut self.snapshot {
            if plan.mark_chunk_downloaded(&subtree_id, now) {
                trace!(
                    subtree_id = %subtree_id,
                    downloaded = plan.downloaded_count(),
                    total = plan.total_chunks(),
                    "Chunk stored"
                );
            }
        }
        self.finish_snapshot_if_complete().await
    }

    async fn finish_snapshot_if_complete(&mut self) -> SyncResult<()> {
        let SnapshotSync::Downloading(plan) = &self.snapshot else {
            return Ok(());
        };
        if !plan.is_fully_downloaded() {
            return Ok(());
        }

        let height = plan.snapshot_height;
        let manifest_id = plan.manifest_id;
        self.snapshots
            .register_snapshot(height, manifest_id, plan.expected_chunk_ids())?;
        self.snapshots.prune_snapshots(self.config.snapshots_to_keep)?;
        info!(height, manifest_id = %manifest_id, "Snapshot downloaded");

        self.snapshot = SnapshotSync::Done {
            height,
            manifest_id,
        };
        self.send(SyncCommand::SnapshotDownloaded {
            height,
            manifest_id,
        })
        .await
    }

    fn on_peer_disconnected(&mut self, peer: &PeerId) {
        let now = now();
        let dropped = self.tracker.peer_disconnected(peer);
        for id in &dropped {
            self.release(id, now);
        }
        self.peers.disconnect(peer);
        self.manifests.remove_peer(peer);
        debug!(peer = %peer, dropped = dropped.len(), "Peer disconnected");
    }

    /// Periodic sweep: expire requests, then drive the snapshot download.
    async fn on_tick(&mut self) -> SyncResult<()> {
        let now = now();
        let peers = &self.peers;
        let expiries = self.tracker.check_timeouts(now, |peer| {
            peers.priority(peer, now).filter(|_| {
                peers
                    .score(peer)
                    .is_some_and(|score| !score.should_ban(now))
            })
        });

        let mut rerequests: BTreeMap<(PeerId, NetworkObjectTypeId), Vec<ModifierId>> =
            BTreeMap::new();
        for expiry in expiries {
            match expiry {
                Expiry::Rerequest { id, from, to, .. } => {
                    self.peers.record_failure(&from);
                    match id {
                        ArtifactId::Modifier(type_id, modifier) => {
                            rerequests.entry((to, type_id)).or_default().push(modifier);
                        }
                        ArtifactId::Manifest(manifest) => {
                            self.send_to_peer(&to, Message::GetManifest(manifest)).await?;
                        }
                        ArtifactId::Subtree(subtree) => {
                            self.send_to_peer(&to, Message::GetUtxoSnapshotChunk(subtree))
                                .await?;
                        }
                        ArtifactId::SnapshotsInfo(_) | ArtifactId::NipopowProof(_) => {}
                    }
                }
                Expiry::Failed { id, peer, attempts } => {
                    self.peers.record_failure(&peer);
                    self.release(&id, now);
                    self.send(SyncCommand::DeliveryFailed { id, peer, attempts })
                        .await?;
                }
            }
        }
        for ((peer, type_id), ids) in rerequests {
            for chunk in InvData::new(type_id, ids).chunks(self.config.desired_inv_objects) {
                self.send_to_peer(&peer, Message::RequestModifier(chunk)).await?;
            }
        }

        if self.config.utxo_bootstrap {
            self.discover_snapshot().await?;
            self.dispatch_chunks().await?;
        }
        self.declined.cleanup(now);
        Ok(())
    }

    /// Give back snapshot work whose request is gone.
    fn release(&mut self, id: &ArtifactId, now: Instant) {
        let reset = match (id, &mut self.snapshot) {
            (ArtifactId::Subtree(subtree), SnapshotSync::Downloading(plan)) => {
                plan.mark_chunk_failed(subtree, now);
                false
            }
            (ArtifactId::Manifest(manifest), SnapshotSync::ManifestRequested { manifest_id, .. }) => {
                *manifest == *manifest_id
            }
            _ => false,
        };
        if reset {
            self.snapshot = SnapshotSync::Idle;
        }
    }

    /// Ask peers for their snapshot index until some manifest is held by
    /// enough of them, then fetch that manifest.
    async fn discover_snapshot(&mut self) -> SyncResult<()> {
        if !matches!(self.snapshot, SnapshotSync::Idle) {
            return Ok(());
        }
        let now = now();
        let ranked = self.peers.ranked(now);

        if let Some((height, manifest_id, advertisers)) =
            self.manifests.best(self.config.min_snapshot_peers)
        {
            let Some(peer) = ranked.iter().find(|p| advertisers.contains(*p)).cloned() else {
                return Ok(());
            };
            let id = ArtifactId::Manifest(manifest_id);
            if !self.tracker.set_requested(id.clone(), peer.clone(), now) {
                return Ok(());
            }
            for other in advertisers.into_iter().filter(|p| p != &peer) {
                self.tracker.add_source(&id, other);
            }
            info!(height, manifest_id = %manifest_id, peer = %peer, "Requesting manifest");
            self.snapshot = SnapshotSync::ManifestRequested {
                height,
                manifest_id,
            };
            return self.send_to_peer(&peer, Message::GetManifest(manifest_id)).await;
        }

        for peer in ranked {
            if self.manifests.has_reported(&peer) {
                continue;
            }
            let id = ArtifactId::SnapshotsInfo(peer.clone());
            if self.tracker.set_requested(id, peer.clone(), now) {
                self.send_to_peer(&peer, Message::GetSnapshotsInfo).await?;
            }
        }
        Ok(())
    }

    /// Hand out chunk requests to peers advertising the manifest being
    /// downloaded, best peers first.
    async fn dispatch_chunks(&mut self) -> SyncResult<()> {
        let now = now();
        let SnapshotSync::Downloading(plan) = &mut self.snapshot else {
            return Ok(());
        };
        let advertisers = self
            .manifests
            .peers_for(plan.snapshot_height, &plan.manifest_id);
        let mut budget = self
            .config
            .chunks_in_parallel_min
            .saturating_sub(plan.downloading_count());

        let mut requests: Vec<(PeerId, SubtreeId)> = Vec::new();
        for peer in self.peers.ranked(now) {
            if budget == 0 {
                break;
            }
            if !advertisers.contains(&peer) {
                continue;
            }
            let ids = plan.chunk_ids_to_download(self.config.chunks_per_peer.min(budget), now);
            if ids.is_empty() {
                break;
            }
            budget -= ids.len();
            requests.extend(ids.into_iter().map(|id| (peer.clone(), id)));
        }
        if requests.is_empty() {
            return Ok(());
        }
        debug!(
            requests = requests.len(),
            downloaded = plan.downloaded_count(),
            total = plan.total_chunks(),
            "Dispatching chunk requests"
        );

        for (peer, subtree_id) in requests {
            let id = ArtifactId::Subtree(subtree_id);
            if !self.tracker.set_requested(id.clone(), peer.clone(), now) {
                continue;
            }
            for other in advertisers.iter().filter(|p| *p != &peer) {
                self.tracker.add_source(&id, other.clone());
            }
            self.send_to_peer(&peer, Message::GetUtxoSnapshotChunk(subtree_id))
                .await?;
        }
        Ok(())
    }

    async fn penalize(&self, peer: &PeerId, reason: PenaltyReason) -> SyncResult<()> {
        let ban = self.peers.penalize(peer, reason, now());
        self.send(SyncCommand::Penalize {
            peer: peer.clone(),
            reason,
            ban,
        })
        .await
    }

    async fn penalize_opt(&self, peer: &PeerId, reason: Option<PenaltyReason>) -> SyncResult<()> {
        match reason {
            Some(reason) => self.penalize(peer, reason).await,
            None => Ok(()),
        }
    }

    /// Send a message to a peer.
    async fn send_to_peer(&self, peer: &PeerId, message: Message) -> SyncResult<()> {
        self.send(SyncCommand::SendToPeer {
            peer: peer.clone(),
            message,
        })
        .await
    }

    async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// Current time on the tokio clock, so paused-time tests drive timeouts.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ergo_storage::MemoryStorage;
    use std::collections::HashMap;

    #[derive(Default)]
    struct History(HashMap<ModifierId, Bytes>);

    impl ModifierSource for History {
        fn contains(&self, _: NetworkObjectTypeId, id: &ModifierId) -> bool {
            self.0.contains_key(id)
        }

        fn get(&self, _: NetworkObjectTypeId, id: &ModifierId) -> Option<Bytes> {
            self.0.get(id).cloned()
        }
    }

    fn peer(n: u8) -> PeerId {
        PeerId(vec![n])
    }

    fn id(n: u8) -> ModifierId {
        ModifierId([n; 32])
    }

    fn protocol(history: History) -> (SyncProtocol, mpsc::Receiver<SyncCommand>) {
        let (tx, rx) = mpsc::channel(1024);
        let db = Arc::new(SnapshotsDb::new(Arc::new(MemoryStorage::new())));
        let protocol = SyncProtocol::new(
            SyncConfig::default(),
            &NetworkSettings::default(),
            Arc::new(history),
            db,
            tx,
        )
        .unwrap();
        (protocol, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<SyncCommand>) -> Vec<SyncCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    #[tokio::test]
    async fn test_inv_requests_unknown_ids() {
        let mut history = History::default();
        history.0.insert(id(1), Bytes::from_static(b"known"));
        let (mut protocol, mut rx) = protocol(history);
        protocol
            .handle_event(SyncEvent::PeerConnected { peer: peer(1) })
            .await
            .unwrap();

        let inv = InvData::new(NetworkObjectTypeId::HEADER, vec![id(1), id(2)]);
        protocol
            .handle_event(SyncEvent::MessageReceived {
                peer: peer(1),
                message: Message::Inv(inv),
            })
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![SyncCommand::SendToPeer {
                peer: peer(1),
                message: Message::RequestModifier(InvData::new(
                    NetworkObjectTypeId::HEADER,
                    vec![id(2)]
                )),
            }]
        );
        assert_eq!(protocol.tracker().len(), 1);
    }

    #[tokio::test]
    async fn test_modifier_request_answered_from_history() {
        let mut history = History::default();
        history.0.insert(id(1), Bytes::from_static(b"header"));
        let (mut protocol, mut rx) = protocol(history);

        let inv = InvData::new(NetworkObjectTypeId::HEADER, vec![id(1), id(2)]);
        protocol
            .handle_event(SyncEvent::MessageReceived {
                peer: peer(1),
                message: Message::RequestModifier(inv),
            })
            .await
            .unwrap();

        let expected = ModifiersData::from_items(
            NetworkObjectTypeId::HEADER,
            vec![ModifierItem::new(id(1), Bytes::from_static(b"header"))],
        );
        assert_eq!(
            drain(&mut rx),
            vec![SyncCommand::SendToPeer {
                peer: peer(1),
                message: Message::Modifiers(expected),
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_code_dropped_without_penalty() {
        let (mut protocol, mut rx) = protocol(History::default());
        protocol
            .handle_event(SyncEvent::FrameReceived {
                peer: peer(1),
                frame: RawFrame::new(200, Bytes::from_static(b"x")),
            })
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_penalized() {
        let (mut protocol, mut rx) = protocol(History::default());
        protocol
            .handle_event(SyncEvent::PeerConnected { peer: peer(1) })
            .await
            .unwrap();
        // Inv with zero ids.
        protocol
            .handle_event(SyncEvent::FrameReceived {
                peer: peer(1),
                frame: RawFrame::new(55, vec![101u8, 0]),
            })
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![SyncCommand::Penalize {
                peer: peer(1),
                reason: PenaltyReason::InvalidMessageFormat,
                ban: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_closed_channel_is_fatal() {
        let (mut protocol, rx) = protocol(History::default());
        drop(rx);
        let err = protocol
            .handle_event(SyncEvent::Announce {
                inv: InvData::new(NetworkObjectTypeId::TRANSACTION, vec![id(1)]),
            })
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
