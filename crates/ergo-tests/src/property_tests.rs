//! Property-based tests using proptest.

use crate::generators::peer;
use bytes::{BufMut, Bytes, BytesMut};
use ergo_network::{
    FrameCodec, GetNipopowProofSpec, InvData, InvSpec, ManifestId, MessageRegistry, MessageSpec,
    ModifierId, ModifierItem, ModifiersData, ModifiersSpec, NetworkObjectTypeId, NetworkSettings,
    NipopowProofData, PenaltyReason, RawFrame, SnapshotsInfo, SnapshotsInfoSpec,
};
use ergo_sync::{DeliveryTracker, SyncConfig};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::codec::{Decoder, Encoder};

fn arb_modifier_id() -> impl Strategy<Value = ModifierId> {
    prop::array::uniform32(any::<u8>()).prop_map(ModifierId)
}

fn arb_type_id() -> impl Strategy<Value = NetworkObjectTypeId> {
    prop_oneof![
        Just(NetworkObjectTypeId::TRANSACTION),
        Just(NetworkObjectTypeId::HEADER),
        Just(NetworkObjectTypeId::BLOCK_TRANSACTIONS),
    ]
}

fn arb_snapshots_info() -> impl Strategy<Value = SnapshotsInfo> {
    prop::collection::btree_map(
        0i32..=i32::MAX,
        prop::array::uniform32(any::<u8>()).prop_map(ManifestId),
        0..32,
    )
    .prop_map(|manifests: BTreeMap<i32, ManifestId>| SnapshotsInfo::new(manifests))
}

fn arb_items() -> impl Strategy<Value = Vec<ModifierItem>> {
    prop::collection::vec(
        (arb_modifier_id(), prop::collection::vec(any::<u8>(), 0..300)),
        1..40,
    )
    .prop_map(|items| {
        items
            .into_iter()
            .map(|(id, data)| ModifierItem::new(id, data))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_inv_round_trip(
        type_id in arb_type_id(),
        ids in prop::collection::vec(arb_modifier_id(), 1..100),
    ) {
        let spec = InvSpec::new(400);
        let inv = InvData::new(type_id, ids);
        let bytes = spec.to_bytes(&inv);
        prop_assert_eq!(spec.parse_bytes(bytes).unwrap(), inv);
    }

    #[test]
    fn prop_snapshots_info_round_trip(info in arb_snapshots_info()) {
        let bytes = SnapshotsInfoSpec.to_bytes(&info);
        prop_assert_eq!(SnapshotsInfoSpec.parse_bytes(bytes).unwrap(), info);
    }

    #[test]
    fn prop_nipopow_request_ignores_padding(
        m in any::<i32>(),
        k in any::<i32>(),
        header_id in prop::option::of(arb_modifier_id()),
        pad in prop::collection::vec(any::<u8>(), 0..900),
    ) {
        let data = NipopowProofData::new(m, k, header_id);
        let mut payload = BytesMut::new();
        payload.put_i32(m);
        payload.put_i32(k);
        match &header_id {
            Some(id) => {
                payload.put_u8(1);
                payload.put_slice(id.as_ref());
            }
            None => payload.put_u8(0),
        }
        payload.put_u16(pad.len() as u16);
        payload.put_slice(&pad);

        prop_assert_eq!(GetNipopowProofSpec.parse_bytes(payload.freeze()).unwrap(), data);
    }

    #[test]
    fn prop_bounded_modifiers_is_prefix(
        max_size in 200usize..4_000,
        items in arb_items(),
    ) {
        let spec = ModifiersSpec::with_max_size(max_size);
        let batch = ModifiersData::from_items(NetworkObjectTypeId::TRANSACTION, items);

        let mut buf = BytesMut::new();
        let report = spec.serialize_bounded(&batch, &mut buf);
        prop_assert!(buf.len() <= spec.reserve_size());
        prop_assert_eq!(report.bytes, buf.len());

        let parsed = spec.parse_bytes(buf.freeze()).unwrap();
        let kept: Vec<&ModifierItem> = batch
            .items()
            .iter()
            .filter(|item| 1 + 1 + item.encoded_len() <= spec.reserve_size())
            .take(report.written)
            .collect();
        prop_assert_eq!(parsed.items().iter().collect::<Vec<_>>(), kept);
    }

    #[test]
    fn prop_frame_round_trip(
        code in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..2_048),
    ) {
        let mut codec = FrameCodec::new();
        let frame = RawFrame::new(code, payload);
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        prop_assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn prop_registry_decode_never_panics(
        code in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let registry = MessageRegistry::standard(&NetworkSettings::default()).unwrap();
        let _ = registry.decode(code, Bytes::from(payload));
    }

    #[test]
    fn prop_unsolicited_penalties_per_window(sends in 0usize..200) {
        let config = SyncConfig::default();
        let mut tracker = DeliveryTracker::new(&config);
        let now = Instant::now();

        let penalties = (0..sends)
            .filter_map(|_| tracker.note_unsolicited(&peer(1), 1, now))
            .collect::<Vec<_>>();
        prop_assert!(penalties.iter().all(|p| *p == PenaltyReason::SpamDetected));
        prop_assert_eq!(penalties.len(), sends / (config.max_unsolicited_items as usize + 1));
    }
}
