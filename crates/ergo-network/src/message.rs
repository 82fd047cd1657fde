//! P2P protocol messages.

use crate::modifiers::{InvData, ModifiersData};
use crate::nipopow::NipopowProofData;
use crate::peers::PeerSpec;
use crate::snapshots::SnapshotsInfo;
use crate::types::{ManifestId, SubtreeId};
use crate::NetworkError;
use bytes::Bytes;
use std::fmt;

/// Message code identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageCode {
    GetPeers = 1,
    Peers = 2,
    RequestModifier = 22,
    Modifiers = 33,
    Inv = 55,
    GetSnapshotsInfo = 76,
    SnapshotsInfo = 77,
    GetManifest = 78,
    Manifest = 79,
    GetUtxoSnapshotChunk = 80,
    UtxoSnapshotChunk = 81,
    GetNipopowProof = 90,
    NipopowProof = 91,
}

impl MessageCode {
    /// Every code this node understands.
    pub const ALL: [MessageCode; 13] = [
        MessageCode::GetPeers,
        MessageCode::Peers,
        MessageCode::RequestModifier,
        MessageCode::Modifiers,
        MessageCode::Inv,
        MessageCode::GetSnapshotsInfo,
        MessageCode::SnapshotsInfo,
        MessageCode::GetManifest,
        MessageCode::Manifest,
        MessageCode::GetUtxoSnapshotChunk,
        MessageCode::UtxoSnapshotChunk,
        MessageCode::GetNipopowProof,
        MessageCode::NipopowProof,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageCode {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageCode::ALL
            .into_iter()
            .find(|code| code.as_u8() == value)
            .ok_or(NetworkError::UnknownCode(value))
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u8())
    }
}

/// P2P message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask a peer for addresses it knows.
    GetPeers,
    /// Known peer specifications.
    Peers(Vec<PeerSpec>),
    /// Ask for modifiers by id.
    RequestModifier(InvData),
    /// Modifier bytes, keyed by id.
    Modifiers(ModifiersData),
    /// Announce modifiers available locally.
    Inv(InvData),
    /// Ask which UTXO snapshots a peer stores.
    GetSnapshotsInfo,
    /// Heights and manifest digests of stored snapshots.
    SnapshotsInfo(SnapshotsInfo),
    /// Ask for a manifest by digest.
    GetManifest(ManifestId),
    /// Serialized manifest.
    Manifest(Bytes),
    /// Ask for one subtree chunk by digest.
    GetUtxoSnapshotChunk(SubtreeId),
    /// Serialized subtree chunk.
    UtxoSnapshotChunk(Bytes),
    /// Ask for a NiPoPoW proof.
    GetNipopowProof(NipopowProofData),
    /// Serialized NiPoPoW proof.
    NipopowProof(Bytes),
}

impl Message {
    /// Code of this message.
    pub fn code(&self) -> MessageCode {
        match self {
            Message::GetPeers => MessageCode::GetPeers,
            Message::Peers(_) => MessageCode::Peers,
            Message::RequestModifier(_) => MessageCode::RequestModifier,
            Message::Modifiers(_) => MessageCode::Modifiers,
            Message::Inv(_) => MessageCode::Inv,
            Message::GetSnapshotsInfo => MessageCode::GetSnapshotsInfo,
            Message::SnapshotsInfo(_) => MessageCode::SnapshotsInfo,
            Message::GetManifest(_) => MessageCode::GetManifest,
            Message::Manifest(_) => MessageCode::Manifest,
            Message::GetUtxoSnapshotChunk(_) => MessageCode::GetUtxoSnapshotChunk,
            Message::UtxoSnapshotChunk(_) => MessageCode::UtxoSnapshotChunk,
            Message::GetNipopowProof(_) => MessageCode::GetNipopowProof,
            Message::NipopowProof(_) => MessageCode::NipopowProof,
        }
    }

    /// Variant name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Message::GetPeers => "GetPeers",
            Message::Peers(_) => "Peers",
            Message::RequestModifier(_) => "RequestModifier",
            Message::Modifiers(_) => "Modifiers",
            Message::Inv(_) => "Inv",
            Message::GetSnapshotsInfo => "GetSnapshotsInfo",
            Message::SnapshotsInfo(_) => "SnapshotsInfo",
            Message::GetManifest(_) => "GetManifest",
            Message::Manifest(_) => "Manifest",
            Message::GetUtxoSnapshotChunk(_) => "GetUtxoSnapshotChunk",
            Message::UtxoSnapshotChunk(_) => "UtxoSnapshotChunk",
            Message::GetNipopowProof(_) => "GetNipopowProof",
            Message::NipopowProof(_) => "NipopowProof",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_try_from() {
        for code in MessageCode::ALL {
            assert_eq!(MessageCode::try_from(code.as_u8()).unwrap(), code);
        }
        assert!(matches!(
            MessageCode::try_from(65),
            Err(NetworkError::UnknownCode(65))
        ));
    }

    #[test]
    fn test_codes_unique() {
        let mut codes: Vec<u8> = MessageCode::ALL.iter().map(|c| c.as_u8()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), MessageCode::ALL.len());
    }

    #[test]
    fn test_message_code_mapping() {
        assert_eq!(Message::GetPeers.code(), MessageCode::GetPeers);
        assert_eq!(
            Message::GetManifest(ManifestId([1; 32])).code().as_u8(),
            78
        );
        assert_eq!(Message::NipopowProof(Bytes::new()).name(), "NipopowProof");
    }
}
