//! Wire-level limits shared by the codecs and the frame codec.

use crate::{MAINNET_MAGIC, MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Network settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Network magic bytes prefixed to every frame.
    pub magic: [u8; 4],
    /// Maximum ids accepted in one Inv or RequestModifier.
    pub max_inv_objects: usize,
    /// Maximum peer records accepted in one Peers message.
    pub max_peer_spec_objects: usize,
    /// Maximum frame payload accepted by the frame codec.
    pub max_packet_size: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            magic: MAINNET_MAGIC,
            max_inv_objects: 400,
            max_peer_spec_objects: 64,
            max_packet_size: MAX_MESSAGE_SIZE,
        }
    }
}
