//! Modifier exchange: Inv, RequestModifier and Modifiers.
//!
//! Inv and RequestModifier share one layout:
//!
//! ```text
//! type id (1) | count (VLQ) | id (32) * count
//! ```
//!
//! Modifiers carries the bytes of each requested section:
//!
//! ```text
//! type id (1) | count (VLQ) | (id (32) | length (VLQ) | bytes) * count
//! ```

use crate::message_spec::MessageSpec;
use crate::serialization::{vlq_len, Reader, VlqWrite};
use crate::types::{ModifierId, NetworkObjectTypeId, DIGEST_LENGTH};
use crate::{Message, MessageCode, NetworkError, NetworkResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Nominal Modifiers payload limit.
pub const MAX_MODIFIERS_MESSAGE_SIZE: usize = 2_048_576;

/// Multiplier giving the hard limit that tolerates outsized single items.
pub const MODIFIERS_SIZE_RESERVE_FACTOR: usize = 4;

/// Upper bound on the encoded item count header (type byte plus a u32 VLQ).
const MODIFIERS_HEADER_BOUND: usize = 1 + 5;

/// Ids of one object type, announced (Inv) or requested (RequestModifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvData {
    pub type_id: NetworkObjectTypeId,
    pub ids: Vec<ModifierId>,
}

impl InvData {
    pub fn new(type_id: NetworkObjectTypeId, ids: Vec<ModifierId>) -> Self {
        Self { type_id, ids }
    }

    /// Split into messages of at most `max` ids each.
    pub fn chunks(&self, max: usize) -> Vec<InvData> {
        self.ids
            .chunks(max.max(1))
            .map(|ids| InvData::new(self.type_id, ids.to_vec()))
            .collect()
    }
}

/// Single modifier with its serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierItem {
    pub id: ModifierId,
    pub data: Bytes,
}

impl ModifierItem {
    pub fn new(id: ModifierId, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Bytes this item occupies inside a Modifiers payload.
    pub fn encoded_len(&self) -> usize {
        DIGEST_LENGTH + vlq_len(self.data.len() as u64) + self.data.len()
    }
}

/// Modifiers of one type keyed by id, in insertion order.
///
/// `index` maps each id to its position in `items`, so inserts and lookups
/// stay constant-time on batches with hundreds of thousands of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiersData {
    pub type_id: NetworkObjectTypeId,
    items: Vec<ModifierItem>,
    index: HashMap<ModifierId, usize>,
}

impl ModifiersData {
    pub fn new(type_id: NetworkObjectTypeId) -> Self {
        Self {
            type_id,
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build from items; a repeated id replaces the earlier bytes.
    pub fn from_items(
        type_id: NetworkObjectTypeId,
        items: impl IntoIterator<Item = ModifierItem>,
    ) -> Self {
        let mut data = Self::new(type_id);
        for item in items {
            data.insert(item.id, item.data);
        }
        data
    }

    /// Insert bytes for `id`. Returns `false` if the id was already present.
    pub fn insert(&mut self, id: ModifierId, data: Bytes) -> bool {
        match self.index.get(&id) {
            Some(&position) => {
                self.items[position].data = data;
                false
            }
            None => {
                self.index.insert(id, self.items.len());
                self.items.push(ModifierItem { id, data });
                true
            }
        }
    }

    pub fn get(&self, id: &ModifierId) -> Option<&Bytes> {
        self.index.get(id).map(|&position| &self.items[position].data)
    }

    pub fn items(&self) -> &[ModifierItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ModifierItem> {
        self.items
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModifierId> {
        self.items.iter().map(|item| &item.id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn write_inv(inv: &InvData, w: &mut BytesMut) {
    w.put_u8(inv.type_id.0);
    w.put_vlq(inv.ids.len() as u64);
    for id in &inv.ids {
        w.put_slice(id.as_ref());
    }
}

fn read_inv(r: &mut Reader, max_objects: usize) -> NetworkResult<InvData> {
    let type_id = NetworkObjectTypeId(r.get_u8()?);
    let count = r.get_vlq()?;
    if count == 0 {
        return Err(r.malformed("empty id list"));
    }
    if count > max_objects as u64 {
        return Err(NetworkError::TooManyItems {
            message: r.message(),
            count,
            max: max_objects,
        });
    }
    let count = count as usize;
    if count * DIGEST_LENGTH > r.remaining() {
        return Err(r.malformed(format!(
            "{} ids declared, only {} bytes left",
            count,
            r.remaining()
        )));
    }
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(ModifierId(r.get_array()?));
    }
    Ok(InvData { type_id, ids })
}

fn inv_max_size(max_objects: usize) -> usize {
    1 + vlq_len(max_objects as u64) + max_objects * DIGEST_LENGTH
}

/// Inv codec.
#[derive(Debug, Clone)]
pub struct InvSpec {
    max_inv_objects: usize,
}

impl InvSpec {
    pub fn new(max_inv_objects: usize) -> Self {
        Self { max_inv_objects }
    }
}

impl MessageSpec for InvSpec {
    type Payload = InvData;

    fn code(&self) -> MessageCode {
        MessageCode::Inv
    }

    fn name(&self) -> &'static str {
        "Inv"
    }

    fn max_size(&self) -> usize {
        inv_max_size(self.max_inv_objects)
    }

    fn serialize(&self, payload: &InvData, w: &mut BytesMut) {
        write_inv(payload, w);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<InvData> {
        read_inv(r, self.max_inv_objects)
    }

    fn wrap(payload: InvData) -> Message {
        Message::Inv(payload)
    }

    fn payload(message: &Message) -> Option<&InvData> {
        match message {
            Message::Inv(inv) => Some(inv),
            _ => None,
        }
    }
}

/// RequestModifier codec.
#[derive(Debug, Clone)]
pub struct RequestModifierSpec {
    max_inv_objects: usize,
}

impl RequestModifierSpec {
    pub fn new(max_inv_objects: usize) -> Self {
        Self { max_inv_objects }
    }
}

impl MessageSpec for RequestModifierSpec {
    type Payload = InvData;

    fn code(&self) -> MessageCode {
        MessageCode::RequestModifier
    }

    fn name(&self) -> &'static str {
        "RequestModifier"
    }

    fn max_size(&self) -> usize {
        inv_max_size(self.max_inv_objects)
    }

    fn serialize(&self, payload: &InvData, w: &mut BytesMut) {
        write_inv(payload, w);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<InvData> {
        read_inv(r, self.max_inv_objects)
    }

    fn wrap(payload: InvData) -> Message {
        Message::RequestModifier(payload)
    }

    fn payload(message: &Message) -> Option<&InvData> {
        match message {
            Message::RequestModifier(inv) => Some(inv),
            _ => None,
        }
    }
}

/// Outcome of a bounded Modifiers serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    /// Items written to the frame.
    pub written: usize,
    /// Items left out because the running total would pass the reserve.
    pub truncated: usize,
    /// Items left out because they exceed the reserve on their own.
    pub oversized: usize,
    /// Payload size.
    pub bytes: usize,
}

impl BatchReport {
    /// Whether any requested item was left out.
    pub fn is_partial(&self) -> bool {
        self.truncated > 0 || self.oversized > 0
    }
}

/// Modifiers codec.
///
/// Parsing accepts payloads up to the reserve limit. Serialization appends
/// items while the total stays within the reserve and stops at the first
/// one that does not fit, so the written batch is a prefix of the input.
/// Items that could never fit are skipped rather than ending the batch.
#[derive(Debug, Clone)]
pub struct ModifiersSpec {
    max_message_size: usize,
}

impl ModifiersSpec {
    pub fn new() -> Self {
        Self::with_max_size(MAX_MODIFIERS_MESSAGE_SIZE)
    }

    /// Create a codec with a custom nominal limit.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Nominal payload size senders aim for.
    pub fn nominal_size(&self) -> usize {
        self.max_message_size
    }

    /// Hard payload limit.
    pub fn reserve_size(&self) -> usize {
        self.max_message_size * MODIFIERS_SIZE_RESERVE_FACTOR
    }

    /// Serialize as many items as fit within the reserve.
    pub fn serialize_bounded(&self, payload: &ModifiersData, w: &mut BytesMut) -> BatchReport {
        let limit = self.reserve_size();
        let header = 1 + vlq_len(payload.len() as u64);
        let mut total = header;
        let mut selected = Vec::with_capacity(payload.len());
        let mut report = BatchReport::default();

        for (index, item) in payload.items().iter().enumerate() {
            let size = item.encoded_len();
            if header + size > limit {
                report.oversized += 1;
                continue;
            }
            if total + size > limit {
                report.truncated = payload.len() - index;
                break;
            }
            total += size;
            selected.push(item);
        }

        let start = w.len();
        w.put_u8(payload.type_id.0);
        w.put_vlq(selected.len() as u64);
        for item in &selected {
            w.put_slice(item.id.as_ref());
            w.put_len_prefixed(&item.data);
        }

        report.written = selected.len();
        report.bytes = w.len() - start;
        report
    }

    /// Split items into batches that each stay within the nominal size.
    ///
    /// An item larger than the nominal size gets a batch of its own.
    pub fn batches(
        &self,
        type_id: NetworkObjectTypeId,
        items: impl IntoIterator<Item = ModifierItem>,
    ) -> Vec<ModifiersData> {
        let mut batches = Vec::new();
        let mut current = ModifiersData::new(type_id);
        let mut total = MODIFIERS_HEADER_BOUND;

        for item in items {
            let size = item.encoded_len();
            if !current.is_empty() && total + size > self.max_message_size {
                batches.push(std::mem::replace(&mut current, ModifiersData::new(type_id)));
                total = MODIFIERS_HEADER_BOUND;
            }
            total += size;
            current.insert(item.id, item.data);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

impl Default for ModifiersSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSpec for ModifiersSpec {
    type Payload = ModifiersData;

    fn code(&self) -> MessageCode {
        MessageCode::Modifiers
    }

    fn name(&self) -> &'static str {
        "Modifiers"
    }

    fn max_size(&self) -> usize {
        self.reserve_size()
    }

    fn serialize(&self, payload: &ModifiersData, w: &mut BytesMut) {
        self.serialize_bounded(payload, w);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<ModifiersData> {
        let type_id = NetworkObjectTypeId(r.get_u8()?);
        let count = r.get_vlq()?;
        if count == 0 {
            return Err(r.malformed("empty modifier list"));
        }
        let min_item = (DIGEST_LENGTH + 1) as u64;
        if count.saturating_mul(min_item) > r.remaining() as u64 {
            return Err(r.malformed(format!(
                "{} modifiers declared, only {} bytes left",
                count,
                r.remaining()
            )));
        }

        let mut data = ModifiersData::new(type_id);
        for _ in 0..count {
            let id = ModifierId(r.get_array()?);
            let len = r.get_len()?;
            let bytes = r.get_bytes(len)?;
            data.insert(id, bytes);
        }
        Ok(data)
    }

    fn wrap(payload: ModifiersData) -> Message {
        Message::Modifiers(payload)
    }

    fn payload(message: &Message) -> Option<&ModifiersData> {
        match message {
            Message::Modifiers(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ModifierId {
        ModifierId([n; 32])
    }

    fn modifiers(sizes: &[usize]) -> ModifiersData {
        ModifiersData::from_items(
            NetworkObjectTypeId::BLOCK_TRANSACTIONS,
            sizes
                .iter()
                .enumerate()
                .map(|(i, size)| ModifierItem::new(id(i as u8), vec![i as u8; *size])),
        )
    }

    #[test]
    fn test_inv_roundtrip() {
        let spec = InvSpec::new(400);
        let inv = InvData::new(NetworkObjectTypeId::HEADER, vec![id(1), id(2), id(3)]);
        let bytes = spec.to_bytes(&inv);
        assert_eq!(bytes.len(), 1 + 1 + 3 * 32);
        assert_eq!(spec.parse_bytes(bytes).unwrap(), inv);
    }

    #[test]
    fn test_inv_too_many_items() {
        let mut buf = BytesMut::new();
        buf.put_u8(101);
        buf.put_vlq(5);
        buf.put_slice(&[1u8; 32]);
        let err = InvSpec::new(4).parse_bytes(buf.freeze()).unwrap_err();
        assert!(matches!(
            err,
            NetworkError::TooManyItems {
                count: 5,
                max: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_inv_empty_rejected() {
        let bytes = Bytes::from_static(&[101, 0]);
        assert!(InvSpec::new(400).parse_bytes(bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_inv_declared_count_beyond_data() {
        let mut buf = BytesMut::new();
        buf.put_u8(101);
        buf.put_vlq(3);
        buf.put_slice(&[0u8; 64]);
        let err = RequestModifierSpec::new(400).parse_bytes(buf.freeze()).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_request_modifier_uses_own_variant() {
        let spec = RequestModifierSpec::new(400);
        let inv = InvData::new(NetworkObjectTypeId::HEADER, vec![id(9)]);
        assert_eq!(
            RequestModifierSpec::wrap(inv.clone()).code(),
            MessageCode::RequestModifier
        );
        assert!(RequestModifierSpec::payload(&Message::Inv(inv)).is_none());
        assert_eq!(spec.max_size(), 1 + 2 + 400 * 32);
    }

    #[test]
    fn test_inv_chunks() {
        let inv = InvData::new(NetworkObjectTypeId::HEADER, (0..10).map(id).collect());
        let chunks = inv.chunks(4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].ids, vec![id(8), id(9)]);
    }

    #[test]
    fn test_modifiers_roundtrip() {
        let spec = ModifiersSpec::new();
        let data = modifiers(&[10, 0, 300]);
        let parsed = spec.parse_bytes(spec.to_bytes(&data)).unwrap();
        assert_eq!(parsed, data);
        assert_eq!(parsed.get(&id(2)).unwrap().len(), 300);
    }

    #[test]
    fn test_modifiers_zero_count_rejected() {
        let bytes = Bytes::from_static(&[102, 0]);
        assert!(ModifiersSpec::new().parse_bytes(bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_modifiers_length_overrun_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(102);
        buf.put_vlq(1);
        buf.put_slice(&[1u8; 32]);
        buf.put_vlq(100);
        buf.put_slice(&[0u8; 10]);
        assert!(ModifiersSpec::new().parse_bytes(buf.freeze()).is_err());
    }

    #[test]
    fn test_modifiers_over_reserve_rejected() {
        let spec = ModifiersSpec::with_max_size(100);
        let payload = Bytes::from(vec![0u8; 401]);
        assert!(matches!(
            spec.parse_bytes(payload),
            Err(NetworkError::MessageTooLarge { size: 401, max: 400 })
        ));
    }

    #[test]
    fn test_modifiers_truncated_to_prefix() {
        let spec = ModifiersSpec::with_max_size(100);
        // reserve 400: header 2, each item 32 + 1 + 60 = 93
        let data = modifiers(&[60, 60, 60, 60, 60]);
        let mut buf = BytesMut::new();
        let report = spec.serialize_bounded(&data, &mut buf);

        assert_eq!(report.written, 4);
        assert_eq!(report.truncated, 1);
        assert!(report.is_partial());
        assert!(buf.len() <= spec.reserve_size());

        let parsed = spec.parse_bytes(buf.freeze()).unwrap();
        assert_eq!(parsed.len(), 4);
        let expected: Vec<_> = data.items()[..4].to_vec();
        assert_eq!(parsed.items(), &expected[..]);
    }

    #[test]
    fn test_modifiers_oversized_item_skipped() {
        let spec = ModifiersSpec::with_max_size(100);
        let data = modifiers(&[500, 20]);
        let mut buf = BytesMut::new();
        let report = spec.serialize_bounded(&data, &mut buf);

        assert_eq!(report.written, 1);
        assert_eq!(report.oversized, 1);
        let parsed = spec.parse_bytes(buf.freeze()).unwrap();
        assert_eq!(parsed.ids().copied().collect::<Vec<_>>(), vec![id(1)]);
    }

    #[test]
    fn test_batches_respect_nominal_size() {
        let spec = ModifiersSpec::with_max_size(200);
        let items = modifiers(&[50, 50, 50, 300, 10]).into_items();
        let batches = spec.batches(NetworkObjectTypeId::HEADER, items);

        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1, 1]);
        for (i, batch) in batches.iter().enumerate() {
            if i != 2 {
                assert!(spec.to_bytes(batch).len() <= spec.nominal_size());
            }
        }
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let mut data = ModifiersData::new(NetworkObjectTypeId::HEADER);
        assert!(data.insert(id(1), Bytes::from_static(b"a")));
        assert!(!data.insert(id(1), Bytes::from_static(b"b")));
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&id(1)).unwrap(), &Bytes::from_static(b"b"));
    }

    #[test]
    fn test_reserve_sized_batch_parses_quickly() {
        let spec = ModifiersSpec::new();
        let item_size = DIGEST_LENGTH + 1;
        let count = (spec.reserve_size() - MODIFIERS_HEADER_BOUND) / item_size;

        let mut payload = BytesMut::with_capacity(spec.reserve_size());
        payload.put_u8(NetworkObjectTypeId::TRANSACTION.0);
        payload.put_vlq(count as u64);
        for n in 0..count as u32 {
            let mut id = [0u8; 32];
            id[..4].copy_from_slice(&n.to_be_bytes());
            payload.put_slice(&id);
            payload.put_vlq(0);
        }
        assert!(payload.len() <= spec.reserve_size());

        let started = std::time::Instant::now();
        let parsed = spec.parse_bytes(payload.freeze()).unwrap();
        assert_eq!(parsed.len(), count);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(3),
            "parsing {} items took {:?}",
            count,
            started.elapsed()
        );
    }
}
