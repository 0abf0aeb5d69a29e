//! Integration tests for the literal seed scenarios in spec.md's
//! "Testable properties" section (S1-S6): concrete input/output pairs
//! rather than property statements, exercised here end to end against
//! [`EmulatedDevice`] the way `yblob-harness`'s other consumers drive
//! `yblob-core`.

use yblob_core::blob;
use yblob_core::record::{HeadMeta, Record, BASE_OBJECT_ID};
use yblob_core::sanitize;
use yblob_core::store::Store;
use yblob_core::{ops, StoreError};
use yblob_membrane::mock::EmulatedDevice;
use yblob_membrane::{DeviceId, Transport};

fn fresh_device() -> (EmulatedDevice, DeviceId) {
    let device = EmulatedDevice::new();
    let id = device.add_device(1, "5.7.1");
    (device, id)
}

/// S1: format(N=5, object_size=64, key_slot=0x82), load, and every
/// record's header bytes start with the magic/count/slot/age-zero
/// sequence spec.md §3.1 defines.
#[test]
fn seed_scenario_s1_fresh_format_header_bytes() {
    let (device, id) = fresh_device();
    let formatted = ops::format(&device, &id, None, 5, 64, 0x82, false, None).unwrap();
    assert_eq!(formatted.free_count(), 5);
    assert_eq!(formatted.max_age(), 0);

    let loaded = ops::load(&device, &id, 5).unwrap();
    assert_eq!(loaded.free_count(), 5);
    assert_eq!(loaded.max_age(), 0);

    for index in 0..5u32 {
        let bytes = device.read_object(&id, BASE_OBJECT_ID + index).unwrap();
        assert_eq!(&bytes[0..9], &[0x0B, 0x5F, 0xED, 0xF2, 0x05, 0x82, 0x00, 0x00, 0x00]);
    }
}

/// S2: after S1, `store("a", b"hello")` lands as a single self-pointing
/// chunk at index 0, age 1, payload NUL-padded after the five bytes.
#[test]
fn seed_scenario_s2_first_store_lands_at_age_one() {
    let (device, id) = fresh_device();
    let mut store = ops::format(&device, &id, None, 5, 64, 0x82, false, None).unwrap();

    ops::store(&mut store, &device, &id, None, "a", b"hello", 0, 1_700_000_000).unwrap();

    let head = store.record(0);
    assert!(head.is_head());
    assert_eq!(head.age(), 1);
    assert!(head.is_tail(), "a blob this small never leaves the head chunk");
    let meta = head.head().unwrap();
    assert_eq!(meta.name(), Some("a"));
    assert_eq!(meta.blob_size, 5);
    assert!(head.payload().starts_with(b"hello"));
    assert!(head.payload()[5..].iter().all(|&b| b == 0));
}

/// S3: after S2, overwriting "a" with a payload too big for one chunk
/// allocates a fresh chain whose ages increase by exactly one per hop
/// from the store's age at the time of the write, while the original
/// "hello" head is left in place (untouched) until sanitize resolves
/// the duplicate name.
///
/// Uses a 150-byte payload rather than S3's literal 200 bytes: with
/// N=5 and one record already held by S2's "hello" chunk, only four
/// records are free, and at object_size=64 a 200-byte payload needs a
/// fifth chunk this store cannot supply. 150 bytes reproduces the same
/// four-chunk chain and duplicate-name fallout on a store this size.
#[test]
fn seed_scenario_s3_overwrite_allocates_a_fresh_chain() {
    let (device, id) = fresh_device();
    let mut store = ops::format(&device, &id, None, 5, 64, 0x82, false, None).unwrap();
    ops::store(&mut store, &device, &id, None, "a", b"hello", 0, 1).unwrap();
    let old_head_index = blob::list(&store)[0].head_index;
    assert_eq!(old_head_index, 0);

    let payload = vec![b'x'; 150];
    ops::store(&mut store, &device, &id, None, "a", &payload, 0, 2).unwrap();

    let blobs = blob::list(&store);
    assert_eq!(blobs.len(), 1, "list only reports the higher-aged head per name");
    let new_head_index = blobs[0].head_index;
    assert_ne!(new_head_index, old_head_index);

    let mut ages = Vec::new();
    let mut current = store.record(new_head_index);
    loop {
        ages.push(current.age());
        if current.is_tail() {
            break;
        }
        current = store.record(current.next().unwrap());
    }
    assert_eq!(ages.len(), 4, "150 bytes needs head + 3 body chunks at this geometry");
    assert_eq!(ages, vec![2, 3, 4, 5], "ages start just above the old chain's age and climb by one per hop");

    // The old "hello" head is still present and still a head: store_blob
    // never frees it, only a later sanitize pass does.
    assert!(store.record(old_head_index).is_head());
    assert_eq!(store.record(old_head_index).age(), 1);

    let cleaned = sanitize::sanitize(&store);
    assert!(cleaned.record(old_head_index).is_free(), "the lower-aged duplicate head is dropped");
    let fetched = blob::fetch_blob(&cleaned, &device, &id, "a", None).unwrap();
    assert_eq!(fetched, payload);
}

/// S4: interrupting sync after the chain's first (tail-first) write and
/// before its head ever reaches the device leaves only an unreachable
/// orphan chunk on reload; the previous "a" -> "hello" chain, never
/// touched by the failed write, is still the one sanitize and fetch
/// see.
#[test]
fn seed_scenario_s4_interrupted_sync_keeps_the_old_chain() {
    let (device, id) = fresh_device();
    let mut store = ops::format(&device, &id, None, 5, 64, 0x82, false, None).unwrap();
    ops::store(&mut store, &device, &id, None, "a", b"hello", 0, 1).unwrap();

    // Hand-build a replacement chain the way `blob::store_blob` would,
    // but stop short of syncing it so only its first (tail-first) write
    // lands on the device -- simulating a token pulled mid-write.
    let base_age = store.max_age();
    let head_capacity = store.payload_capacity(Some("a"));
    let body_capacity = store.payload_capacity(None);
    let payload = vec![b'y'; head_capacity + 10];

    let head_index = store.allocate_free_index().unwrap();
    let tail_index = store.allocate_free_index().unwrap();
    let indices = [head_index, tail_index];

    let mut cursor = 0usize;
    for (pos, &index) in indices.iter().enumerate() {
        let is_head = pos == 0;
        let is_tail = pos + 1 == indices.len();
        let capacity = if is_head { head_capacity } else { body_capacity };
        let take = (payload.len() - cursor).min(capacity);
        let mut chunk_payload = vec![0u8; capacity];
        chunk_payload[..take].copy_from_slice(&payload[cursor..cursor + take]);
        cursor += take;

        let next = if is_tail { index } else { indices[pos + 1] };
        let age = base_age + 1 + pos as u32;
        let head_meta = is_head.then(|| HeadMeta {
            modification_time: 2,
            blob_size: payload.len() as u32,
            encryption_key_slot: 0,
            unencrypted_size: payload.len() as u32,
            name_bytes: b"a".to_vec(),
        });
        let mut record = Record::free(index, store.geometry());
        record.fill_chunk(age, pos as u8, next, head_meta, chunk_payload);
        store.commit(record);
    }

    // Tail-first write order, but the simulated crash only lets the
    // first entry (the tail) reach the device.
    let write_order = [tail_index, head_index];
    store.sync_chunks_in_order(&device, &id, None, &write_order[..1]).unwrap();

    let reloaded = Store::load_from_device(&device, &id, 5).unwrap();
    assert!(reloaded.record(head_index).is_free(), "the head write never happened");
    assert!(!reloaded.record(tail_index).is_free(), "the tail write did happen");

    let cleaned = sanitize::sanitize(&reloaded);
    assert!(cleaned.record(tail_index).is_free(), "unreachable orphan is swept");
    let fetched = blob::fetch_blob(&cleaned, &device, &id, "a", None).unwrap();
    assert_eq!(fetched, b"hello");
}

/// S5: a blob encrypted against the store's own key slot round-trips
/// through `fetch`, and its head metadata carries the envelope's exact
/// byte accounting (65-byte point + 16-byte IV + one padded AES block).
#[test]
fn seed_scenario_s5_encrypted_round_trip_byte_accounting() {
    let (device, id) = fresh_device();
    let mut store = ops::format(&device, &id, None, 4, 128, 0x82, true, None).unwrap();

    ops::store(&mut store, &device, &id, None, "enc", b"secret", 0x82, 3).unwrap();

    let fetched = ops::fetch(&store, &device, &id, "enc", Some("123456")).unwrap();
    assert_eq!(fetched, b"secret");

    let info = &blob::list(&store)[0];
    assert_eq!(info.blob_size, 65 + 16 + 16);
    assert_eq!(info.unencrypted_size, 6);
    assert_eq!(info.encryption_key_slot, 0x82);
}

/// S6: two live heads can share a name only until the next sanitize;
/// the survivor is whichever has the higher age, independent of which
/// one was written (or crafted) second.
#[test]
fn seed_scenario_s6_duplicate_name_keeps_the_higher_age() {
    let (device, id) = fresh_device();
    let mut store = ops::format(&device, &id, None, 6, 64, 0x82, false, None).unwrap();

    ops::store(&mut store, &device, &id, None, "warmup1", b"x", 0, 1).unwrap();
    ops::store(&mut store, &device, &id, None, "warmup2", b"y", 0, 2).unwrap();
    ops::store(&mut store, &device, &id, None, "dup", b"higher-age-wins", 0, 3).unwrap();
    let real_head_index = blob::list(&store).into_iter().find(|b| b.name == "dup").unwrap().head_index;
    let real_age = store.record(real_head_index).age();
    assert!(real_age > 1, "warmup stores already pushed the store's age past 1");

    // Craft a second "dup" head directly, at an age lower than the real
    // one but still non-zero, the way a forged or rolled-back object
    // could land on the device without ever going through store_blob.
    let forged_index = store.allocate_free_index().unwrap();
    let capacity = store.payload_capacity(Some("dup"));
    let mut payload = vec![0u8; capacity];
    payload[..b"lower-age-loses".len()].copy_from_slice(b"lower-age-loses");
    let mut forged = Record::free(forged_index, store.geometry());
    forged.fill_chunk(
        1,
        0,
        forged_index,
        Some(HeadMeta {
            modification_time: 4,
            blob_size: b"lower-age-loses".len() as u32,
            encryption_key_slot: 0,
            unencrypted_size: b"lower-age-loses".len() as u32,
            name_bytes: b"dup".to_vec(),
        }),
        payload,
    );
    store.commit(forged);
    store.sync(&device, &id, None).unwrap();

    let reloaded = Store::load_from_device(&device, &id, 6).unwrap();
    let cleaned = sanitize::sanitize(&reloaded);
    let survivors: Vec<_> = blob::list(&cleaned).into_iter().filter(|b| b.name == "dup").collect();
    assert_eq!(survivors.len(), 1);
    let fetched = blob::fetch_blob(&cleaned, &device, &id, "dup", None).unwrap();
    assert_eq!(fetched, b"higher-age-wins");
}

/// Not a literal seed scenario, but the obvious neighbor of S1: a
/// store genuinely too full to take another blob reports `StoreFull`
/// rather than silently truncating or inventing space.
#[test]
fn store_full_is_reported_not_silently_truncated() {
    let (device, id) = fresh_device();
    let mut store = ops::format(&device, &id, None, 1, 32, 0, false, None).unwrap();
    ops::store(&mut store, &device, &id, None, "a", b"fits", 0, 1).unwrap();

    let err = ops::store(&mut store, &device, &id, None, "b", b"also fits", 0, 2).unwrap_err();
    assert!(matches!(err, StoreError::StoreFull));
}
