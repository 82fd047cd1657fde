//! # ergo-network
//!
//! Wire protocol layer for the Ergo blockchain.
//!
//! This crate provides:
//! - Bounded binary reader/writer primitives
//! - Typed codecs for every P2P message, with hard size ceilings
//! - The message registry mapping codes to codecs
//! - Frame codec for tokio streams
//! - Peer scoring, penalties and the decline table

mod codec;
pub mod decline;
mod error;
mod message;
pub mod message_spec;
pub mod modifiers;
pub mod nipopow;
mod peer;
pub mod peers;
pub mod penalties;
mod registry;
pub mod scoring;
pub mod serialization;
mod settings;
pub mod snapshots;
pub mod types;

pub use codec::{FrameCodec, RawFrame};
pub use decline::DeclineTable;
pub use error::{NetworkError, NetworkResult};
pub use message::{Message, MessageCode};
pub use message_spec::{AnyMessageSpec, MessageSpec};
pub use modifiers::{
    BatchReport, InvData, InvSpec, ModifierItem, ModifiersData, ModifiersSpec,
    RequestModifierSpec, MAX_MODIFIERS_MESSAGE_SIZE, MODIFIERS_SIZE_RESERVE_FACTOR,
};
pub use nipopow::{GetNipopowProofSpec, NipopowProofData, NipopowProofSpec};
pub use peer::{PeerBook, PeerId};
pub use peers::{GetPeersSpec, PeerFeature, PeerSpec, PeersSpec};
pub use penalties::{Penalties, PenaltyReason};
pub use registry::{CodecInfo, MessageRegistry};
pub use scoring::PeerScore;
pub use settings::NetworkSettings;
pub use snapshots::{
    GetManifestSpec, GetSnapshotsInfoSpec, GetUtxoSnapshotChunkSpec, ManifestSpec, SnapshotsInfo,
    SnapshotsInfoSpec, UtxoSnapshotChunkSpec,
};
pub use types::{ManifestId, ModifierId, NetworkObjectTypeId, SubtreeId};

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 9030;

/// Protocol magic bytes for mainnet.
pub const MAINNET_MAGIC: [u8; 4] = [0x01, 0x00, 0x02, 0x04];

/// Protocol magic bytes for testnet.
pub const TESTNET_MAGIC: [u8; 4] = [0x02, 0x00, 0x02, 0x04];

/// Maximum frame payload size.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Protocol version.
pub const PROTOCOL_VERSION: (u8, u8, u8) = (6, 0, 1);
