//! The sanitizer: a pure `Store -> Store` function that repairs whatever
//! a crash mid-write could have left behind (spec.md §4.5).
//!
//! Three passes, each fixing one failure mode, in order:
//!
//! 1. Drop corrupt heads — a head with an unreadable name or a chain
//!    that doesn't walk cleanly to a tail is reset to free.
//! 2. Resolve duplicate names — when two live heads share a name (a
//!    crash between writing a new head and freeing the old one), the
//!    older one is reset to free.
//! 3. Sweep unreachable chunks — any live chunk not reachable from a
//!    surviving head is reset to free.
//!
//! Running this twice in a row is a no-op (spec.md's idempotence
//! invariant): after one pass there are no corrupt heads, no duplicate
//! names, and no unreachable chunks left to find.

use std::collections::{HashMap, HashSet};

use crate::record::HeadMeta;
use crate::store::Store;

/// Returns a sanitized copy of `store`. `store` itself is untouched.
pub fn sanitize(store: &Store) -> Store {
    let mut out = store.clone();
    drop_corrupt_heads(&mut out);
    resolve_duplicate_names(&mut out);
    sweep_unreachable(&mut out);
    out
}

fn chain_walkable(store: &Store, head_index: u8) -> bool {
    let head_age = store.record(head_index).age();
    let mut current = store.record(head_index);
    let mut expected_pos = 0u8;
    for _ in 0..store.object_count() {
        if current.age() == 0
            || current.pos() != Some(expected_pos)
            || current.age() != head_age + expected_pos as u32
        {
            return false;
        }
        if current.is_tail() {
            return true;
        }
        let Some(next) = current.next() else { return false };
        if next as usize >= store.records().len() {
            return false;
        }
        current = store.record(next);
        expected_pos += 1;
    }
    false
}

fn drop_corrupt_heads(store: &mut Store) {
    for index in 0..store.object_count() {
        if !store.record(index).is_head() {
            continue;
        }
        let has_name = store.record(index).head().and_then(HeadMeta::name).is_some();
        if !has_name || !chain_walkable(store, index) {
            store.record_mut(index).reset();
        }
    }
}

fn resolve_duplicate_names(store: &mut Store) {
    let mut by_name: HashMap<String, u8> = HashMap::new();
    let mut losers = Vec::new();

    for index in 0..store.object_count() {
        let record = store.record(index);
        if !record.is_head() {
            continue;
        }
        let Some(name) = record.head().and_then(HeadMeta::name) else { continue };
        match by_name.get(name) {
            None => {
                by_name.insert(name.to_string(), index);
            }
            Some(&existing) => {
                if store.record(existing).age() >= record.age() {
                    losers.push(index);
                } else {
                    losers.push(existing);
                    by_name.insert(name.to_string(), index);
                }
            }
        }
    }

    for index in losers {
        store.record_mut(index).reset();
    }
}

fn sweep_unreachable(store: &mut Store) {
    let mut reachable: HashSet<u8> = HashSet::new();
    for index in 0..store.object_count() {
        if !store.record(index).is_head() {
            continue;
        }
        let mut current_index = index;
        for _ in 0..store.object_count() {
            if !reachable.insert(current_index) {
                break;
            }
            let current = store.record(current_index);
            if current.is_tail() {
                break;
            }
            current_index = current.next().expect("live chunk always has a next pointer");
        }
    }

    for index in 0..store.object_count() {
        let record = store.record(index);
        if record.age() != 0 && !reachable.contains(&index) {
            store.record_mut(index).reset();
        }
    }
}
