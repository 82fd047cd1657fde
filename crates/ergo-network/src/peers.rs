//! Peer list exchange: GetPeers and Peers.
//!
//! A peer spec is laid out as:
//! - Agent name length (1 byte) + agent name (UTF-8)
//! - Version (3 bytes: major, minor, patch)
//! - Node name length (1 byte) + node name (UTF-8)
//! - Declared address (0 = none, 1 = some: size byte, IP bytes, VLQ port)
//! - Features (count as 1 byte, then each feature: id + VLQ length + data)

use crate::message_spec::MessageSpec;
use crate::serialization::{vlq_len, Reader, VlqWrite};
use crate::{Message, MessageCode, NetworkError, NetworkResult};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

/// Upper bound on one encoded peer spec.
pub const MAX_PEER_SPEC_SIZE: usize = 2_048;

const FEATURE_LOCAL_ADDRESS: u8 = 2;
const FEATURE_SESSION: u8 = 3;
const FEATURE_MODE: u8 = 16;

/// Peer feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFeature {
    /// Operating mode (id 16).
    Mode {
        state_type: u8,
        verifying: bool,
        nipopow_suffix: Option<i32>,
        blocks_to_keep: i32,
    },
    /// Network magic and session id (id 3).
    Session { magic: [u8; 4], session_id: i64 },
    /// Address on the local network (id 2). The wire form has room for an
    /// IPv4 address only.
    LocalAddress(SocketAddrV4),
    /// Feature this node does not interpret, kept verbatim.
    Unknown { id: u8, data: Vec<u8> },
}

impl PeerFeature {
    pub fn id(&self) -> u8 {
        match self {
            PeerFeature::Mode { .. } => FEATURE_MODE,
            PeerFeature::Session { .. } => FEATURE_SESSION,
            PeerFeature::LocalAddress(_) => FEATURE_LOCAL_ADDRESS,
            PeerFeature::Unknown { id, .. } => *id,
        }
    }

    fn body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            PeerFeature::Mode {
                state_type,
                verifying,
                nipopow_suffix,
                blocks_to_keep,
            } => {
                buf.put_u8(*state_type);
                buf.put_u8(u8::from(*verifying));
                match nipopow_suffix {
                    Some(suffix) => {
                        buf.put_u8(1);
                        buf.put_zigzag_i64(i64::from(*suffix));
                    }
                    None => buf.put_u8(0),
                }
                buf.put_zigzag_i64(i64::from(*blocks_to_keep));
            }
            PeerFeature::Session { magic, session_id } => {
                buf.put_slice(magic);
                buf.put_zigzag_i64(*session_id);
            }
            PeerFeature::LocalAddress(addr) => {
                buf.put_slice(&addr.ip().octets());
                buf.put_u32(u32::from(addr.port()));
            }
            PeerFeature::Unknown { data, .. } => buf.put_slice(data),
        }
        buf
    }

    /// Decode a known feature body. Bodies that do not parse are kept as unknown.
    fn from_body(id: u8, data: &[u8]) -> Self {
        let mut r = Reader::new("PeerFeature", bytes::Bytes::copy_from_slice(data));
        let parsed = match id {
            FEATURE_MODE => Self::read_mode(&mut r),
            FEATURE_SESSION => r.get_array::<4>().and_then(|magic| {
                Ok(PeerFeature::Session {
                    magic,
                    session_id: r.get_zigzag_i64()?,
                })
            }),
            FEATURE_LOCAL_ADDRESS if data.len() == 8 => r.get_array::<4>().and_then(|ip| {
                let port = r.get_array::<4>().map(u32::from_be_bytes)?;
                let port = u16::try_from(port)
                    .map_err(|_| r.malformed(format!("port {} out of range", port)))?;
                Ok(PeerFeature::LocalAddress(SocketAddrV4::new(
                    Ipv4Addr::from(ip),
                    port,
                )))
            }),
            _ => Err(r.malformed("unknown feature")),
        };
        parsed.unwrap_or_else(|_| PeerFeature::Unknown {
            id,
            data: data.to_vec(),
        })
    }

    fn read_mode(r: &mut Reader) -> NetworkResult<Self> {
        let state_type = r.get_u8()?;
        let verifying = r.get_u8()? != 0;
        let nipopow_suffix = match r.get_u8()? {
            0 => None,
            _ => Some(r.get_zigzag_i32()?),
        };
        let blocks_to_keep = r.get_zigzag_i32()?;
        Ok(PeerFeature::Mode {
            state_type,
            verifying,
            nipopow_suffix,
            blocks_to_keep,
        })
    }
}

fn put_ip(buf: &mut Vec<u8>, ip: IpAddr) {
    match ip {
        IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
        IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
    }
}

/// Peer specification as carried by the Peers message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    /// Agent name (e.g., "ergoref").
    pub agent_name: String,
    /// Protocol version.
    pub version: (u8, u8, u8),
    /// Node name.
    pub node_name: String,
    /// Publicly declared address.
    pub declared_addr: Option<SocketAddr>,
    pub features: Vec<PeerFeature>,
}

impl PeerSpec {
    pub fn new(
        agent_name: impl Into<String>,
        version: (u8, u8, u8),
        node_name: impl Into<String>,
        declared_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            version,
            node_name: node_name.into(),
            declared_addr,
            features: Vec::new(),
        }
    }

    pub fn with_feature(mut self, feature: PeerFeature) -> Self {
        self.features.push(feature);
        self
    }

    /// Write the spec. Names are cut at 255 bytes.
    pub fn write(&self, w: &mut BytesMut) {
        put_short_string(w, &self.agent_name);
        w.put_u8(self.version.0);
        w.put_u8(self.version.1);
        w.put_u8(self.version.2);
        put_short_string(w, &self.node_name);

        match &self.declared_addr {
            Some(addr) => {
                let mut ip = Vec::with_capacity(16);
                put_ip(&mut ip, addr.ip());
                w.put_u8(1);
                w.put_u8((ip.len() + 4) as u8);
                w.put_slice(&ip);
                w.put_vlq(u64::from(addr.port()));
            }
            None => w.put_u8(0),
        }

        let features = &self.features[..self.features.len().min(u8::MAX as usize)];
        w.put_u8(features.len() as u8);
        for feature in features {
            w.put_u8(feature.id());
            w.put_len_prefixed(&feature.body());
        }
    }

    /// Read one spec.
    pub fn read(r: &mut Reader) -> NetworkResult<Self> {
        let agent_name = get_short_string(r)?;
        let version = (r.get_u8()?, r.get_u8()?, r.get_u8()?);
        let node_name = get_short_string(r)?;

        let declared_addr = match r.get_u8()? {
            0 => None,
            1 => {
                let ip = match r.get_u8()? {
                    8 => IpAddr::V4(Ipv4Addr::from(r.get_array::<4>()?)),
                    20 => IpAddr::V6(Ipv6Addr::from(r.get_array::<16>()?)),
                    size => return Err(r.malformed(format!("unknown address size {}", size))),
                };
                let port = r.get_vlq()?;
                let port = u16::try_from(port)
                    .map_err(|_| r.malformed(format!("port {} out of range", port)))?;
                Some(SocketAddr::new(ip, port))
            }
            flag => return Err(r.malformed(format!("invalid address flag {}", flag))),
        };

        let count = r.get_u8()?;
        let mut features = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = r.get_u8()?;
            let len = r.get_len()?;
            let data = r.get_bytes(len)?;
            features.push(PeerFeature::from_body(id, &data));
        }

        Ok(Self {
            agent_name,
            version,
            node_name,
            declared_addr,
            features,
        })
    }
}

fn put_short_string(w: &mut BytesMut, s: &str) {
    let mut end = s.len().min(u8::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    w.put_u8(end as u8);
    w.put_slice(&s.as_bytes()[..end]);
}

fn get_short_string(r: &mut Reader) -> NetworkResult<String> {
    let len = r.get_u8()? as usize;
    let bytes = r.get_bytes(len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl fmt::Display for PeerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.version;
        match &self.declared_addr {
            Some(addr) => write!(f, "{}@{} (v{}.{}.{})", self.node_name, addr, major, minor, patch),
            None => write!(f, "{} (v{}.{}.{})", self.node_name, major, minor, patch),
        }
    }
}

/// GetPeers codec. The payload must be empty.
#[derive(Debug, Clone, Default)]
pub struct GetPeersSpec;

impl MessageSpec for GetPeersSpec {
    type Payload = ();

    fn code(&self) -> MessageCode {
        MessageCode::GetPeers
    }

    fn name(&self) -> &'static str {
        "GetPeers"
    }

    fn max_size(&self) -> usize {
        0
    }

    fn serialize(&self, _payload: &(), _w: &mut BytesMut) {}

    fn parse(&self, _r: &mut Reader) -> NetworkResult<()> {
        Ok(())
    }

    fn wrap(_payload: ()) -> Message {
        Message::GetPeers
    }

    fn payload(message: &Message) -> Option<&()> {
        match message {
            Message::GetPeers => Some(&()),
            _ => None,
        }
    }
}

/// Peers codec.
#[derive(Debug, Clone)]
pub struct PeersSpec {
    max_peer_spec_objects: usize,
}

impl PeersSpec {
    pub fn new(max_peer_spec_objects: usize) -> Self {
        Self {
            max_peer_spec_objects,
        }
    }
}

impl MessageSpec for PeersSpec {
    type Payload = Vec<PeerSpec>;

    fn code(&self) -> MessageCode {
        MessageCode::Peers
    }

    fn name(&self) -> &'static str {
        "Peers"
    }

    fn max_size(&self) -> usize {
        vlq_len(self.max_peer_spec_objects as u64)
            + self.max_peer_spec_objects * MAX_PEER_SPEC_SIZE
    }

    fn serialize(&self, payload: &Vec<PeerSpec>, w: &mut BytesMut) {
        let peers = &payload[..payload.len().min(self.max_peer_spec_objects)];
        w.put_vlq(peers.len() as u64);
        for peer in peers {
            peer.write(w);
        }
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<Vec<PeerSpec>> {
        let count = r.get_vlq()?;
        if count > self.max_peer_spec_objects as u64 {
            return Err(NetworkError::TooManyItems {
                message: r.message(),
                count,
                max: self.max_peer_spec_objects,
            });
        }
        let mut peers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            peers.push(PeerSpec::read(r)?);
        }
        Ok(peers)
    }

    fn wrap(payload: Vec<PeerSpec>) -> Message {
        Message::Peers(payload)
    }

    fn payload(message: &Message) -> Option<&Vec<PeerSpec>> {
        match message {
            Message::Peers(peers) => Some(peers),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_peer() -> PeerSpec {
        PeerSpec::new(
            "ergoref",
            (5, 0, 12),
            "test-node",
            Some("192.168.1.1:9030".parse().unwrap()),
        )
        .with_feature(PeerFeature::Mode {
            state_type: 0,
            verifying: true,
            nipopow_suffix: None,
            blocks_to_keep: -1,
        })
        .with_feature(PeerFeature::Session {
            magic: [1, 0, 2, 4],
            session_id: -4_242_424_242,
        })
    }

    #[test]
    fn test_peer_spec_roundtrip() {
        let peer = sample_peer();
        let mut buf = BytesMut::new();
        peer.write(&mut buf);
        let parsed = PeerSpec::read(&mut Reader::new("Peers", buf.freeze())).unwrap();
        assert_eq!(parsed, peer);
    }

    #[test]
    fn test_ipv6_and_local_address() {
        let peer = PeerSpec::new("ergoref", (6, 0, 1), "v6", Some("[::1]:9031".parse().unwrap()))
            .with_feature(PeerFeature::LocalAddress("10.0.0.2:9030".parse().unwrap()));
        let mut buf = BytesMut::new();
        peer.write(&mut buf);
        let parsed = PeerSpec::read(&mut Reader::new("Peers", buf.freeze())).unwrap();
        assert_eq!(parsed, peer);
    }

    #[test]
    fn test_local_address_feature_round_trip() {
        let feature = PeerFeature::LocalAddress("192.168.1.7:9030".parse().unwrap());
        let body = feature.body();
        assert_eq!(body, vec![192, 168, 1, 7, 0, 0, 0x23, 0x46]);
        assert_eq!(PeerFeature::from_body(FEATURE_LOCAL_ADDRESS, &body), feature);
    }

    #[test]
    fn test_local_address_port_out_of_range_kept_unknown() {
        let body = vec![10, 0, 0, 2, 0, 1, 0x23, 0x46];
        assert_eq!(
            PeerFeature::from_body(FEATURE_LOCAL_ADDRESS, &body),
            PeerFeature::Unknown {
                id: FEATURE_LOCAL_ADDRESS,
                data: body,
            }
        );
    }

    #[test]
    fn test_unknown_feature_preserved() {
        let peer = PeerSpec::new("a", (1, 2, 3), "b", None).with_feature(PeerFeature::Unknown {
            id: 99,
            data: vec![1, 2, 3],
        });
        let spec = PeersSpec::new(10);
        let parsed = spec.parse_bytes(spec.to_bytes(&vec![peer.clone()])).unwrap();
        assert_eq!(parsed, vec![peer]);
    }

    #[test]
    fn test_peers_limit() {
        let peers = vec![sample_peer(); 3];
        let bytes = PeersSpec::new(3).to_bytes(&peers);
        let err = PeersSpec::new(2).parse_bytes(bytes).unwrap_err();
        assert!(matches!(err, NetworkError::TooManyItems { count: 3, max: 2, .. }));
    }

    #[test]
    fn test_get_peers_must_be_empty() {
        assert!(GetPeersSpec.parse_bytes(Bytes::new()).is_ok());
        assert!(GetPeersSpec.parse_bytes(Bytes::from_static(&[0])).is_err());
        assert!(GetPeersSpec.to_bytes(&()).is_empty());
    }

    #[test]
    fn test_truncated_peer_rejected() {
        let mut buf = BytesMut::new();
        sample_peer().write(&mut buf);
        let cut = buf.freeze().slice(..10);
        assert!(PeerSpec::read(&mut Reader::new("Peers", cut)).is_err());
    }

    #[test]
    fn test_display() {
        let display = sample_peer().to_string();
        assert!(display.contains("test-node"));
        assert!(display.contains("192.168.1.1:9030"));
        assert!(display.contains("5.0.12"));
    }
}
