//! The store container: a fixed set of PIV data objects read in full at
//! load time, mutated in memory, and written back lazily (spec.md §4.2).

use tracing::debug;
use yblob_membrane::transport::{Credentials, DeviceId};
use yblob_membrane::Transport;

use crate::error::StoreError;
use crate::record::{Record, StoreGeometry, BASE_OBJECT_ID};

/// In-memory image of every data object in one store, indexed 0..N-1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Store {
    geometry: StoreGeometry,
    records: Vec<Record>,
}

impl Store {
    /// Builds an empty, freshly formatted store of `object_count` objects
    /// of `object_size` bytes each, bound to `key_slot`.
    pub fn format(object_count: u8, object_size: usize, key_slot: u8) -> Result<Store, StoreError> {
        if !(crate::record::MIN_OBJECT_SIZE..=crate::record::MAX_OBJECT_SIZE).contains(&object_size) {
            return Err(StoreError::InvalidObjectSize(object_size));
        }
        let geometry = StoreGeometry { object_size, object_count, key_slot };
        let records = (0..object_count).map(|i| Record::free(i, geometry)).collect();
        Ok(Store { geometry, records })
    }

    /// Reads every object `BASE_OBJECT_ID..BASE_OBJECT_ID+object_count`
    /// off `device` and decodes it. The first object's header determines
    /// `object_size`, `object_count`, and `key_slot`; every later object
    /// must agree (a mismatch is [`RecordError::BadGeometry`]).
    pub fn load_from_device(
        transport: &dyn Transport,
        device: &DeviceId,
        object_count: u8,
    ) -> Result<Store, StoreError> {
        let first = transport.read_object(device, BASE_OBJECT_ID)?;
        let object_size = first.len();
        if !(crate::record::MIN_OBJECT_SIZE..=crate::record::MAX_OBJECT_SIZE).contains(&object_size) {
            return Err(StoreError::InvalidObjectSize(object_size));
        }
        let key_slot = *first.get(5).unwrap_or(&0);
        let geometry = StoreGeometry { object_size, object_count, key_slot };
        let rec0 = Record::decode(geometry, 0, &first)?;

        let mut records = Vec::with_capacity(object_count as usize);
        records.push(rec0);
        for index in 1..object_count {
            let bytes = transport.read_object(device, BASE_OBJECT_ID + index as u32)?;
            records.push(Record::decode(geometry, index, &bytes)?);
        }
        Ok(Store { geometry, records })
    }

    pub fn geometry(&self) -> StoreGeometry {
        self.geometry
    }

    pub fn object_count(&self) -> u8 {
        self.geometry.object_count
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, index: u8) -> &Record {
        &self.records[index as usize]
    }

    pub fn record_mut(&mut self, index: u8) -> &mut Record {
        &mut self.records[index as usize]
    }

    /// The largest age currently held by any record, used to mint the
    /// next chunk's age (spec.md §3.2, "ages are strictly increasing").
    pub fn max_age(&self) -> u32 {
        self.records.iter().map(|r| r.age()).max().unwrap_or(0)
    }

    /// Finds the first free record, reserves it (age bumped to the `1`
    /// sentinel so a later call in the same operation skips it), and
    /// returns its index.
    pub fn allocate_free_index(&mut self) -> Result<u8, StoreError> {
        let index = self
            .records
            .iter()
            .position(Record::is_free)
            .ok_or(StoreError::StoreFull)? as u8;
        self.records[index as usize].reserve();
        Ok(index)
    }

    /// Number of records currently free.
    pub fn free_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_free()).count()
    }

    /// Replaces the record at `record.index` wholesale and marks it
    /// dirty for the next [`Store::sync`].
    pub fn commit(&mut self, record: Record) {
        let index = record.index as usize;
        self.records[index] = record;
        self.records[index].mark_dirty();
    }

    /// Writes every dirty record back to `device` in increasing index
    /// order — bodies and tails before the head that references them, so
    /// a crash mid-sync never leaves a head pointing at garbage
    /// (spec.md §4.3, "tail-first, head-last").
    pub fn sync(&mut self, transport: &dyn Transport, device: &DeviceId, creds: Option<&Credentials>) -> Result<(), StoreError> {
        for record in self.records.iter_mut() {
            if !record.is_dirty() {
                continue;
            }
            let bytes = record.encode();
            debug!(index = record.index, len = bytes.len(), "sync: writing record");
            transport.write_object(device, BASE_OBJECT_ID + record.index as u32, &bytes, creds)?;
            record.clear_dirty();
        }
        Ok(())
    }

    pub fn payload_capacity(&self, name: Option<&str>) -> usize {
        crate::record::payload_capacity(self.geometry.object_size, name)
    }

    /// Writes exactly the records named by `order`, in that order,
    /// regardless of their numeric index. The blob engine uses this to
    /// get tail-first/head-last (create) or head-first/tail-last
    /// (delete) write ordering, which crash safety depends on
    /// (spec.md §4.3).
    pub fn sync_chunks_in_order(
        &mut self,
        transport: &dyn Transport,
        device: &DeviceId,
        creds: Option<&Credentials>,
        order: &[u8],
    ) -> Result<(), StoreError> {
        for &index in order {
            let record = &mut self.records[index as usize];
            if !record.is_dirty() {
                continue;
            }
            let bytes = record.encode();
            debug!(index, len = bytes.len(), "sync_chunks_in_order: writing record");
            transport.write_object(device, BASE_OBJECT_ID + index as u32, &bytes, creds)?;
            record.clear_dirty();
        }
        Ok(())
    }
}
