//! Message code to codec mapping.

use crate::message_spec::{AnyMessageSpec, MessageSpec};
use crate::modifiers::{InvSpec, ModifiersSpec, RequestModifierSpec};
use crate::nipopow::{GetNipopowProofSpec, NipopowProofSpec};
use crate::peers::{GetPeersSpec, PeersSpec};
use crate::settings::NetworkSettings;
use crate::snapshots::{
    GetManifestSpec, GetSnapshotsInfoSpec, GetUtxoSnapshotChunkSpec, ManifestSpec,
    SnapshotsInfoSpec, UtxoSnapshotChunkSpec,
};
use crate::{Message, MessageCode, NetworkError, NetworkResult};
use bytes::Bytes;
use std::collections::HashMap;

/// Static description of a registered codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    pub code: MessageCode,
    pub name: &'static str,
    pub max_size: usize,
}

struct Entry {
    info: CodecInfo,
    codec: Box<dyn AnyMessageSpec>,
}

/// Registry of message codecs keyed by message code.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<u8, Entry>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every protocol codec bound, using the given limits.
    pub fn standard(settings: &NetworkSettings) -> NetworkResult<Self> {
        let mut registry = Self::new();
        registry.register(GetPeersSpec)?;
        registry.register(PeersSpec::new(settings.max_peer_spec_objects))?;
        registry.register(RequestModifierSpec::new(settings.max_inv_objects))?;
        registry.register(ModifiersSpec::new())?;
        registry.register(InvSpec::new(settings.max_inv_objects))?;
        registry.register(GetSnapshotsInfoSpec)?;
        registry.register(SnapshotsInfoSpec)?;
        registry.register(GetManifestSpec)?;
        registry.register(ManifestSpec)?;
        registry.register(GetUtxoSnapshotChunkSpec)?;
        registry.register(UtxoSnapshotChunkSpec)?;
        registry.register(GetNipopowProofSpec)?;
        registry.register(NipopowProofSpec)?;
        registry.ensure_complete()?;
        Ok(registry)
    }

    /// Bind a codec to its message code.
    pub fn register<S: MessageSpec + 'static>(&mut self, spec: S) -> NetworkResult<()> {
        let info = CodecInfo {
            code: spec.code(),
            name: spec.name(),
            max_size: spec.max_size(),
        };
        let code = info.code.as_u8();
        if self.entries.contains_key(&code) {
            return Err(NetworkError::DuplicateCode(code));
        }
        self.entries.insert(
            code,
            Entry {
                info,
                codec: Box::new(spec),
            },
        );
        Ok(())
    }

    /// Fail if any protocol message code has no codec.
    pub fn ensure_complete(&self) -> NetworkResult<()> {
        let missing: Vec<u8> = MessageCode::ALL
            .iter()
            .map(|code| code.as_u8())
            .filter(|code| !self.entries.contains_key(code))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NetworkError::IncompleteRegistry(missing))
        }
    }

    /// Decode a payload received under `code`.
    pub fn decode(&self, code: u8, payload: Bytes) -> NetworkResult<Message> {
        let entry = self
            .entries
            .get(&code)
            .ok_or(NetworkError::UnknownCode(code))?;
        entry.codec.decode(payload)
    }

    /// Encode a message with the codec bound to its variant.
    pub fn encode(&self, message: &Message) -> NetworkResult<(MessageCode, Bytes)> {
        let code = message.code();
        let entry = self
            .entries
            .get(&code.as_u8())
            .ok_or(NetworkError::UnknownCode(code.as_u8()))?;
        Ok((code, entry.codec.encode(message)?))
    }

    /// Registered codecs, ordered by code.
    pub fn specs(&self) -> Vec<CodecInfo> {
        let mut infos: Vec<CodecInfo> = self.entries.values().map(|e| e.info).collect();
        infos.sort_by_key(|info| info.code.as_u8());
        infos
    }

    pub fn get(&self, code: u8) -> Option<CodecInfo> {
        self.entries.get(&code).map(|e| e.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.specs()).finish()
    }
}
