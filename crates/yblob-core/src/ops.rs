//! The upward interface: the six verbs a caller (the `yblob-harness` CLI,
//! or any other embedder) drives a store through. Everything here
//! composes [`crate::store`], [`crate::blob`], and [`crate::sanitize`]
//! with a concrete [`Transport`]; none of it is itself persisted state.

use serde::Serialize;
use yblob_membrane::transport::{Credentials, DeviceId, X509Subject};
use yblob_membrane::Transport;

pub use crate::blob::BlobInfo;
use crate::error::StoreError;
use crate::sanitize::sanitize;
use crate::store::Store;

/// Formats a fresh, empty store on `device`: `object_count` objects of
/// `object_size` bytes bound to `key_slot`, written in full. When
/// `key_slot != 0` and `generate_key` is set, a new P-256 key pair is
/// generated in that slot (and self-signed, if `subject` is given) so
/// later `store` calls can encrypt against it.
#[allow(clippy::too_many_arguments)]
pub fn format(
    transport: &dyn Transport,
    device: &DeviceId,
    creds: Option<&Credentials>,
    object_count: u8,
    object_size: usize,
    key_slot: u8,
    generate_key: bool,
    subject: Option<&X509Subject>,
) -> Result<Store, StoreError> {
    let mut store = Store::format(object_count, object_size, key_slot)?;

    if key_slot != 0 && generate_key {
        transport.generate_key(device, key_slot)?;
        if let Some(subject) = subject {
            transport.self_sign(device, key_slot, subject)?;
        }
    }

    for index in 0..object_count {
        store.record_mut(index).mark_dirty();
    }
    store.sync(transport, device, creds)?;
    Ok(store)
}

/// Loads the store currently on `device`.
pub fn load(transport: &dyn Transport, device: &DeviceId, object_count: u8) -> Result<Store, StoreError> {
    Store::load_from_device(transport, device, object_count)
}

/// Stores `payload` under `name`, encrypting it against `key_slot` when
/// non-zero, and writes the resulting chunks back to `device`.
#[allow(clippy::too_many_arguments)]
pub fn store(
    store: &mut Store,
    transport: &dyn Transport,
    device: &DeviceId,
    creds: Option<&Credentials>,
    name: &str,
    payload: &[u8],
    key_slot: u8,
    modification_time: u32,
) -> Result<(), StoreError> {
    crate::blob::store_blob(store, transport, device, creds, name, payload, key_slot, modification_time)
}

/// Reads the blob named `name` back, decrypting it if needed.
pub fn fetch(
    store: &Store,
    transport: &dyn Transport,
    device: &DeviceId,
    name: &str,
    pin: Option<&str>,
) -> Result<Vec<u8>, StoreError> {
    crate::blob::fetch_blob(store, transport, device, name, pin)
}

/// Removes the blob named `name` and writes the freed chunks back.
pub fn remove(
    store: &mut Store,
    transport: &dyn Transport,
    device: &DeviceId,
    creds: Option<&Credentials>,
    name: &str,
) -> Result<(), StoreError> {
    crate::blob::remove_blob(store, transport, device, creds, name)
}

/// Lists every blob currently resolvable in `store`.
pub fn list(store: &Store) -> Vec<BlobInfo> {
    crate::blob::list(store)
}

/// One record's full decoded state, for [`FsckReport`].
#[derive(Debug, Clone, Serialize)]
pub struct FsckRecord {
    pub index: u8,
    pub age: u32,
    pub is_free: bool,
    pub is_head: bool,
    pub is_tail: bool,
    pub pos: Option<u8>,
    pub next: Option<u8>,
    pub name: Option<String>,
    pub name_is_valid_utf8: bool,
    pub blob_size: Option<u32>,
    pub unencrypted_size: Option<u32>,
    pub encryption_key_slot: Option<u8>,
}

/// A full diagnostic dump of a store: every record's decoded state, plus
/// which indices a [`sanitize`] pass would reclaim. This never mutates
/// the store — it runs the sanitizer against a scratch copy purely to
/// report what it *would* do.
#[derive(Debug, Clone, Serialize)]
pub struct FsckReport {
    pub object_count: u8,
    pub object_size: usize,
    pub key_slot: u8,
    pub records: Vec<FsckRecord>,
    pub would_reclaim: Vec<u8>,
}

pub fn fsck(store: &Store) -> FsckReport {
    let cleaned = sanitize(store);
    let geometry = store.geometry();

    let records = store
        .records()
        .iter()
        .map(|record| FsckRecord {
            index: record.index,
            age: record.age(),
            is_free: record.is_free(),
            is_head: record.is_head(),
            is_tail: !record.is_free() && record.is_tail(),
            pos: record.pos(),
            next: record.next(),
            name: record.head().and_then(|h| h.name().map(String::from)),
            name_is_valid_utf8: record.head().map(|h| h.name().is_some()).unwrap_or(true),
            blob_size: record.head().map(|h| h.blob_size),
            unencrypted_size: record.head().map(|h| h.unencrypted_size),
            encryption_key_slot: record.head().map(|h| h.encryption_key_slot),
        })
        .collect();

    let would_reclaim = store
        .records()
        .iter()
        .zip(cleaned.records())
        .filter(|(before, after)| !before.is_free() && after.is_free())
        .map(|(before, _)| before.index)
        .collect();

    FsckReport {
        object_count: geometry.object_count,
        object_size: geometry.object_size,
        key_slot: geometry.key_slot,
        records,
        would_reclaim,
    }
}
