//! The blob engine: splits a payload across a chain of records, walks a
//! chain back into a payload, and tears a chain down (spec.md §4.3).
//!
//! A blob is a singly-linked chain of chunks starting at a head (the
//! only chunk carrying a name). `next_chunk_index_in_store` on the last
//! chunk points at itself — that self-reference, not a sentinel value,
//! is what marks the tail.

use yblob_membrane::transport::{Credentials, DeviceId};
use yblob_membrane::{crypto, Transport};

use crate::error::StoreError;
use crate::record::{HeadMeta, Record, MAX_NAME_LEN};
use crate::store::Store;

/// Summary of one blob, as returned by [`list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub modification_time: u32,
    pub blob_size: u32,
    pub unencrypted_size: u32,
    pub encryption_key_slot: u8,
    pub head_index: u8,
}

impl BlobInfo {
    pub fn is_encrypted(&self) -> bool {
        self.encryption_key_slot != 0
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let len = name.as_bytes().len();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(StoreError::InvalidName { got: len });
    }
    Ok(())
}

/// Every live (non-free) head in the store, one entry per distinct name —
/// when two heads share a name (a crash mid-overwrite can leave this),
/// the one with the higher age wins, matching the sanitizer's pass 2
/// (spec.md §4.5).
fn resolve_heads(store: &Store) -> Vec<&Record> {
    let mut by_name: std::collections::HashMap<&str, &Record> = std::collections::HashMap::new();
    for record in store.records() {
        if !record.is_head() {
            continue;
        }
        let Some(name) = record.head().and_then(HeadMeta::name) else {
            continue;
        };
        match by_name.get(name) {
            Some(existing) if existing.age() >= record.age() => {}
            _ => {
                by_name.insert(name, record);
            }
        }
    }
    by_name.into_values().collect()
}

/// Lists every blob currently resolvable in the store.
pub fn list(store: &Store) -> Vec<BlobInfo> {
    resolve_heads(store)
        .into_iter()
        .map(|record| {
            let head = record.head().expect("resolve_heads only returns heads");
            BlobInfo {
                name: head.name().expect("resolve_heads filters to valid UTF-8 names").to_string(),
                modification_time: head.modification_time,
                blob_size: head.blob_size,
                unencrypted_size: head.unencrypted_size,
                encryption_key_slot: head.encryption_key_slot,
                head_index: record.index,
            }
        })
        .collect()
}

fn find_head<'a>(store: &'a Store, name: &str) -> Option<&'a Record> {
    resolve_heads(store).into_iter().find(|r| r.head().and_then(HeadMeta::name) == Some(name))
}

/// Walks the chain starting at `head_index`, concatenating every chunk's
/// full payload capacity, then truncates to `blob_size`. Guards against a
/// corrupt or cyclic chain by bounding the walk at `object_count` steps.
fn walk_chain(store: &Store, head_index: u8, blob_size: usize, name: &str) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::with_capacity(blob_size);
    let mut current = store.record(head_index);
    let mut expected_pos = 0u8;
    for _ in 0..store.object_count() {
        if current.pos() != Some(expected_pos) {
            return Err(StoreError::CorruptChain(
                name.to_string(),
                format!("expected chunk at position {expected_pos}, found {:?}", current.pos()),
            ));
        }
        out.extend_from_slice(current.payload());
        if current.is_tail() {
            out.truncate(blob_size);
            return Ok(out);
        }
        current = store.record(current.next().expect("checked above"));
        expected_pos += 1;
    }
    Err(StoreError::CorruptChain(name.to_string(), "chain longer than the store's object count".to_string()))
}

/// Stores `payload` under `name`, encrypting it first when `key_slot !=
/// 0`. Fails atomically: if there is not enough free space the store is
/// left untouched.
#[allow(clippy::too_many_arguments)]
pub fn store_blob(
    store: &mut Store,
    transport: &dyn Transport,
    device: &DeviceId,
    creds: Option<&Credentials>,
    name: &str,
    payload: &[u8],
    key_slot: u8,
    modification_time: u32,
) -> Result<(), StoreError> {
    validate_name(name)?;

    let unencrypted_size = payload.len() as u32;
    let on_card_bytes = if key_slot != 0 {
        let device_point = transport.public_key_of_slot(device, key_slot)?;
        crypto::hybrid_encrypt(payload, &device_point)?
    } else {
        payload.to_vec()
    };
    let blob_size = on_card_bytes.len() as u32;

    // Snapshotted before any allocation: `allocate_free_index` bumps each
    // reserved record's age to the sentinel `1`, which would otherwise
    // inflate this on a store with no live records yet (spec.md S2 expects
    // the very first stored blob's head to land at age 1).
    let base_age = store.max_age();

    let head_capacity = store.payload_capacity(Some(name));
    let body_capacity = store.payload_capacity(None);

    // Allocate indices one at a time until the accumulated capacity
    // covers the payload; on failure, release everything taken so far
    // purely in memory (no device write happened yet) and propagate
    // `StoreFull` (spec.md §4.3 step 2).
    let mut indices: Vec<u8> = Vec::new();
    let mut covered = 0usize;
    while indices.is_empty() || covered < on_card_bytes.len() {
        let capacity = if indices.is_empty() { head_capacity } else { body_capacity };
        let index = if capacity == 0 { None } else { store.allocate_free_index().ok() };
        match index {
            Some(index) => {
                indices.push(index);
                covered += capacity;
            }
            None => {
                for &index in &indices {
                    store.record_mut(index).reset();
                }
                return Err(StoreError::StoreFull);
            }
        }
    }

    let mut cursor = 0usize;
    for (pos, &index) in indices.iter().enumerate() {
        let is_head = pos == 0;
        let is_tail = pos + 1 == indices.len();
        let capacity = if is_head { head_capacity } else { body_capacity };
        let remaining = on_card_bytes.len() - cursor;
        let take = remaining.min(capacity);
        let mut chunk_payload = vec![0u8; capacity];
        chunk_payload[..take].copy_from_slice(&on_card_bytes[cursor..cursor + take]);
        cursor += take;

        let next = if is_tail { index } else { indices[pos + 1] };
        // Ages increase from head to tail (spec.md §4.3 step 3); the
        // write order is tail-first/head-last, but that's an independent
        // concern from which end carries the higher age.
        let age = base_age + 1 + pos as u32;
        let head_meta = is_head.then(|| HeadMeta {
            modification_time,
            blob_size,
            encryption_key_slot: key_slot,
            unencrypted_size,
            name_bytes: name.as_bytes().to_vec(),
        });

        let mut record = Record::free(index, store.geometry());
        record.fill_chunk(age, pos as u8, next, head_meta, chunk_payload);
        store.commit(record);
    }

    debug_assert_eq!(cursor, on_card_bytes.len());

    let write_order: Vec<u8> = indices.iter().rev().copied().collect();
    store.sync_chunks_in_order(transport, device, creds, &write_order)
}

/// Reads back the blob named `name`, decrypting it if needed. `pin` is
/// required (and verified) when the blob is encrypted.
pub fn fetch_blob(
    store: &Store,
    transport: &dyn Transport,
    device: &DeviceId,
    name: &str,
    pin: Option<&str>,
) -> Result<Vec<u8>, StoreError> {
    let head = find_head(store, name).ok_or_else(|| StoreError::NotFound(name.to_string()))?;
    let meta = head.head().expect("find_head only returns heads");
    let on_card_bytes = walk_chain(store, head.index, meta.blob_size as usize, name)?;

    if meta.is_encrypted() {
        let pin = pin.ok_or_else(|| StoreError::PinRequired(name.to_string()))?;
        transport.verify_pin(device, pin)?;
        let mut plaintext = crypto::hybrid_decrypt(&on_card_bytes, transport, device, meta.encryption_key_slot)?;
        plaintext.truncate(meta.unencrypted_size as usize);
        Ok(plaintext)
    } else {
        let mut plaintext = on_card_bytes;
        plaintext.truncate(meta.unencrypted_size as usize);
        Ok(plaintext)
    }
}

/// Removes the blob named `name`, freeing its chunks head-first so a
/// crash mid-delete leaves the blob unreachable rather than half
/// readable (spec.md §4.3).
pub fn remove_blob(
    store: &mut Store,
    transport: &dyn Transport,
    device: &DeviceId,
    creds: Option<&Credentials>,
    name: &str,
) -> Result<(), StoreError> {
    let head_index = find_head(store, name).ok_or_else(|| StoreError::NotFound(name.to_string()))?.index;

    let mut order = Vec::new();
    let mut current_index = head_index;
    loop {
        order.push(current_index);
        let current = store.record(current_index);
        if current.is_tail() {
            break;
        }
        current_index = current.next().expect("checked above");
    }

    for &index in &order {
        store.record_mut(index).reset();
    }
    store.sync_chunks_in_order(transport, device, creds, &order)
}
