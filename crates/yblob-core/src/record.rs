//! Binary record codec — the on-card layout of one PIV data object
//! (spec.md §3.1).
//!
//! A record has three concentric prefixes, present in order with no
//! gaps: a 9-byte store-wide header (always present), a 2-byte chunk
//! header (present when `age != 0`), and a head-only block of 12 fixed
//! bytes plus the UTF-8 name (present when the chunk is at position 0).
//! Whatever bytes remain are `chunk_payload`, right-padded with NUL.
//!
//! Decode never loses information: the exact trailing/payload bytes of a
//! record are kept verbatim (even a name that is not valid UTF-8), so
//! `encode(decode(bytes)) == bytes` always holds — the sanitizer, not the
//! codec, is responsible for distrusting what it finds.

use thiserror::Error;

/// Magic identifying a yblob store (spec.md §6.3).
pub const MAGIC: u32 = 0xF2ED_5F0B;
/// First PIV object ID used by a store; object `i` lives at `BASE + i`.
pub const BASE_OBJECT_ID: u32 = 0x5F_0000;
/// Smallest object size spec.md allows.
pub const MIN_OBJECT_SIZE: usize = 10;
/// Largest object size spec.md allows.
pub const MAX_OBJECT_SIZE: usize = 3052;
/// Longest a blob name may be.
pub const MAX_NAME_LEN: usize = 255;

const STORE_HEADER_LEN: usize = 9;
const CHUNK_HEADER_LEN: usize = 2;
const HEAD_FIXED_LEN: usize = 12;
/// Bytes of overhead before `chunk_payload` in a body chunk.
pub const BODY_OVERHEAD: usize = STORE_HEADER_LEN + CHUNK_HEADER_LEN;
/// Bytes of overhead before `chunk_payload` in a head chunk, excluding
/// the name itself.
pub const HEAD_OVERHEAD: usize = BODY_OVERHEAD + HEAD_FIXED_LEN;

/// Failures decoding a record. All are fatal at the store level — a
/// sanitizer never sees a record that failed to decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("object {0} magic mismatch, card is not a yblob store")]
    BadMagic(u8),
    #[error(
        "object {index} geometry mismatch: store header says count={found_count} slot={found_slot:#04x}, expected count={expected_count} slot={expected_slot:#04x}"
    )]
    BadGeometry {
        index: u8,
        found_count: u8,
        found_slot: u8,
        expected_count: u8,
        expected_slot: u8,
    },
    #[error("object {index} is {got} bytes, need at least {needed}")]
    ShortRecord { index: u8, needed: usize, got: usize },
}

/// The store-wide geometry every record in a store shares, copied by
/// value into each [`Record`] rather than held by reference (spec.md §9,
/// "Ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreGeometry {
    pub object_size: usize,
    pub object_count: u8,
    pub key_slot: u8,
}

/// The head-only metadata block (spec.md §3.1, offsets 11..23+L).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadMeta {
    pub modification_time: u32,
    pub blob_size: u32,
    pub encryption_key_slot: u8,
    pub unencrypted_size: u32,
    /// Raw name bytes, kept verbatim even if not valid UTF-8 — see the
    /// module doc comment. Use [`HeadMeta::name`] for a checked view.
    pub name_bytes: Vec<u8>,
}

impl HeadMeta {
    /// The name as a `&str`, or `None` if the stored bytes are not valid
    /// UTF-8. The sanitizer's pass 1 drops heads where this is `None`.
    pub fn name(&self) -> Option<&str> {
        std::str::from_utf8(&self.name_bytes).ok()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_key_slot != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    /// `object_age == 0`. `trailing` is every byte after the 9-byte
    /// header, kept verbatim and interpreted by nobody (spec.md §3.4
    /// invariant 2).
    Free { trailing: Vec<u8> },
    Chunk {
        age: u32,
        pos: u8,
        next: u8,
        head: Option<HeadMeta>,
        payload: Vec<u8>,
    },
}

/// One decoded PIV data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index: u8,
    geometry: StoreGeometry,
    body: Body,
    dirty: bool,
}

impl Record {
    /// A freshly formatted, free record: every byte past the 9-byte
    /// header is zero.
    pub fn free(index: u8, geometry: StoreGeometry) -> Self {
        Record {
            index,
            geometry,
            body: Body::Free {
                trailing: vec![0u8; geometry.object_size - STORE_HEADER_LEN],
            },
            dirty: true,
        }
    }

    pub fn geometry(&self) -> StoreGeometry {
        self.geometry
    }

    pub fn is_free(&self) -> bool {
        matches!(self.body, Body::Free { .. })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// `0` for a free record, otherwise the record's age.
    pub fn age(&self) -> u32 {
        match &self.body {
            Body::Free { .. } => 0,
            Body::Chunk { age, .. } => *age,
        }
    }

    /// `chunk_pos_in_blob`, meaningless on a free record (returns `None`).
    pub fn pos(&self) -> Option<u8> {
        match &self.body {
            Body::Free { .. } => None,
            Body::Chunk { pos, .. } => Some(*pos),
        }
    }

    /// `next_chunk_index_in_store`, meaningless on a free record.
    pub fn next(&self) -> Option<u8> {
        match &self.body {
            Body::Free { .. } => None,
            Body::Chunk { next, .. } => Some(*next),
        }
    }

    pub fn head(&self) -> Option<&HeadMeta> {
        match &self.body {
            Body::Free { .. } => None,
            Body::Chunk { head, .. } => head.as_ref(),
        }
    }

    pub fn is_head(&self) -> bool {
        self.age() != 0 && self.pos() == Some(0)
    }

    /// `true` when this chunk's `next` points at its own index.
    pub fn is_tail(&self) -> bool {
        matches!(self.next(), Some(n) if n == self.index)
    }

    pub fn payload(&self) -> &[u8] {
        match &self.body {
            Body::Free { trailing } => trailing,
            Body::Chunk { payload, .. } => payload,
        }
    }

    /// Marks this record as a reserved-but-not-yet-finalized chunk: age
    /// bumped to the non-zero sentinel `1`, self-pointing, no head. This
    /// is `allocate_free_index`'s "bump to 1 so a later call in the same
    /// operation doesn't hand back the same slot" (spec.md §4.2/§9).
    /// [`Record::fill_chunk`] replaces this with the final chunk fields
    /// before `sync`.
    pub fn reserve(&mut self) {
        let body_capacity = self.geometry.object_size - BODY_OVERHEAD;
        self.body = Body::Chunk {
            age: 1,
            pos: 0,
            next: self.index,
            head: None,
            payload: vec![0u8; body_capacity],
        };
        self.dirty = true;
    }

    /// Finalizes a record as a live chunk: sets the real age, chain
    /// position/pointer, optional head metadata, and payload (padded to
    /// this record's capacity by the caller — see
    /// [`crate::blob::capacity`]).
    pub fn fill_chunk(&mut self, age: u32, pos: u8, next: u8, head: Option<HeadMeta>, payload: Vec<u8>) {
        self.body = Body::Chunk { age, pos, next, head, payload };
        self.dirty = true;
    }

    /// Returns this record to the free state, zeroing its payload so no
    /// stale blob bytes linger once unreachable (spec.md §4.6, "any state
    /// -> Free").
    pub fn reset(&mut self) {
        self.body = Body::Free {
            trailing: vec![0u8; self.geometry.object_size - STORE_HEADER_LEN],
        };
        self.dirty = true;
    }

    /// Serializes this record to exactly `geometry.object_size` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.geometry.object_size);
        self.encode_header(&mut out);
        match &self.body {
            Body::Free { trailing } => out.extend_from_slice(trailing),
            Body::Chunk { pos, next, head, payload, .. } => {
                out.push(*pos);
                out.push(*next);
                if let Some(h) = head {
                    out.extend_from_slice(&h.modification_time.to_le_bytes());
                    out.extend_from_slice(&u24_to_le(h.blob_size));
                    out.push(h.encryption_key_slot);
                    out.extend_from_slice(&u24_to_le(h.unencrypted_size));
                    out.push(h.name_bytes.len() as u8);
                    out.extend_from_slice(&h.name_bytes);
                }
                out.extend_from_slice(payload);
            }
        }
        debug_assert_eq!(out.len(), self.geometry.object_size);
        out
    }

    fn encode_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(self.geometry.object_count);
        out.push(self.geometry.key_slot);
        out.extend_from_slice(&u24_to_le(self.age()));
    }

    /// Decodes one record. `geometry` is the expected geometry (from
    /// index 0); every other index's header must agree with it.
    pub fn decode(geometry: StoreGeometry, index: u8, bytes: &[u8]) -> Result<Record, RecordError> {
        if bytes.len() < STORE_HEADER_LEN {
            return Err(RecordError::ShortRecord {
                index,
                needed: STORE_HEADER_LEN,
                got: bytes.len(),
            });
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(RecordError::BadMagic(index));
        }
        let found_count = bytes[4];
        let found_slot = bytes[5];
        if found_count != geometry.object_count || found_slot != geometry.key_slot {
            return Err(RecordError::BadGeometry {
                index,
                found_count,
                found_slot,
                expected_count: geometry.object_count,
                expected_slot: geometry.key_slot,
            });
        }
        let age = u24_from_le(&bytes[6..9]);

        if age == 0 {
            return Ok(Record {
                index,
                geometry,
                body: Body::Free { trailing: bytes[STORE_HEADER_LEN..].to_vec() },
                dirty: false,
            });
        }

        if bytes.len() < BODY_OVERHEAD {
            return Err(RecordError::ShortRecord { index, needed: BODY_OVERHEAD, got: bytes.len() });
        }
        let pos = bytes[9];
        let next = bytes[10];

        if pos != 0 {
            return Ok(Record {
                index,
                geometry,
                body: Body::Chunk { age, pos, next, head: None, payload: bytes[BODY_OVERHEAD..].to_vec() },
                dirty: false,
            });
        }

        if bytes.len() < HEAD_OVERHEAD {
            return Err(RecordError::ShortRecord { index, needed: HEAD_OVERHEAD, got: bytes.len() });
        }
        let modification_time = u32::from_le_bytes(bytes[11..15].try_into().unwrap());
        let blob_size = u24_from_le(&bytes[15..18]);
        let encryption_key_slot = bytes[18];
        let unencrypted_size = u24_from_le(&bytes[19..22]);
        let name_len = bytes[22] as usize;
        let name_end = HEAD_OVERHEAD + name_len;
        if bytes.len() < name_end {
            return Err(RecordError::ShortRecord { index, needed: name_end, got: bytes.len() });
        }
        let name_bytes = bytes[HEAD_OVERHEAD..name_end].to_vec();
        let payload = bytes[name_end..].to_vec();

        Ok(Record {
            index,
            geometry,
            body: Body::Chunk {
                age,
                pos,
                next,
                head: Some(HeadMeta {
                    modification_time,
                    blob_size,
                    encryption_key_slot,
                    unencrypted_size,
                    name_bytes,
                }),
                payload,
            },
            dirty: false,
        })
    }
}

/// Payload capacity for a chunk of the given `object_size`: a head
/// carrying `name` (non-empty) or a body chunk (`name` omitted/empty).
pub fn payload_capacity(object_size: usize, name: Option<&str>) -> usize {
    match name {
        Some(n) if !n.is_empty() => object_size.saturating_sub(HEAD_OVERHEAD + n.len()),
        _ => object_size.saturating_sub(BODY_OVERHEAD),
    }
}

fn u24_to_le(v: u32) -> [u8; 3] {
    [(v & 0xff) as u8, ((v >> 8) & 0xff) as u8, ((v >> 16) & 0xff) as u8]
}

fn u24_from_le(bytes: &[u8]) -> u32 {
    bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> StoreGeometry {
        StoreGeometry { object_size: 64, object_count: 5, key_slot: 0x82 }
    }

    #[test]
    fn free_record_round_trips() {
        let rec = Record::free(0, geometry());
        let bytes = rec.encode();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..9], &[0x0B, 0x5F, 0xED, 0xF2, 0x05, 0x82, 0x00, 0x00, 0x00]);
        let decoded = Record::decode(geometry(), 0, &bytes).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn head_chunk_round_trips_bit_exact() {
        let mut rec = Record::free(0, geometry());
        rec.reserve();
        let capacity = payload_capacity(geometry().object_size, Some("a"));
        let mut payload = vec![0u8; capacity];
        payload[..5].copy_from_slice(b"hello");
        rec.fill_chunk(
            1,
            0,
            0,
            Some(HeadMeta {
                modification_time: 1_700_000_000,
                blob_size: 5,
                encryption_key_slot: 0,
                unencrypted_size: 5,
                name_bytes: b"a".to_vec(),
            }),
            payload,
        );
        let bytes = rec.encode();
        let decoded = Record::decode(geometry(), 0, &bytes).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.head().unwrap().name(), Some("a"));
        assert!(decoded.payload().starts_with(b"hello"));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = Record::free(0, geometry()).encode();
        bytes[0] ^= 0xff;
        assert_eq!(Record::decode(geometry(), 0, &bytes).unwrap_err(), RecordError::BadMagic(0));
    }

    #[test]
    fn decode_rejects_short_record() {
        let bytes = vec![0u8; 3];
        assert!(matches!(
            Record::decode(geometry(), 0, &bytes).unwrap_err(),
            RecordError::ShortRecord { .. }
        ));
    }

    #[test]
    fn decode_preserves_invalid_utf8_name_verbatim() {
        let mut rec = Record::free(0, geometry());
        rec.reserve();
        let bad_name = vec![0xff, 0xfe];
        let capacity = payload_capacity(geometry().object_size, Some("xx"));
        rec.fill_chunk(
            1,
            0,
            0,
            Some(HeadMeta {
                modification_time: 0,
                blob_size: 0,
                encryption_key_slot: 0,
                unencrypted_size: 0,
                name_bytes: bad_name.clone(),
            }),
            vec![0u8; capacity],
        );
        let bytes = rec.encode();
        let decoded = Record::decode(geometry(), 0, &bytes).unwrap();
        assert_eq!(decoded.head().unwrap().name_bytes, bad_name);
        assert_eq!(decoded.head().unwrap().name(), None);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn payload_capacity_formula() {
        let body = payload_capacity(64, None);
        assert_eq!(body, 64 - BODY_OVERHEAD);
        let head = payload_capacity(64, Some("name"));
        assert_eq!(head, 64 - HEAD_OVERHEAD - 4);
    }
}
