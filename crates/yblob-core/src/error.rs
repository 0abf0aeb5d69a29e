//! Error taxonomy shared by every component in this crate.

use thiserror::Error;

use crate::record::RecordError;

/// Everything that can go wrong operating on a store, from a malformed
/// on-card record up through name and capacity validation. CLI-facing
/// code (`yblob-harness`) maps each variant to an exit code per
/// spec.md §6.4.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no blob named {0:?}")]
    NotFound(String),
    #[error("store has no free records left")]
    StoreFull,
    #[error("name must be 1..={max} UTF-8 bytes, got {got}", max = crate::record::MAX_NAME_LEN)]
    InvalidName { got: usize },
    #[error("object_size {0} is outside the allowed range {min}..={max}", min = crate::record::MIN_OBJECT_SIZE, max = crate::record::MAX_OBJECT_SIZE)]
    InvalidObjectSize(usize),
    #[error("a PIN is required to decrypt {0:?} but none was supplied")]
    PinRequired(String),
    #[error("chunk chain for {0:?} is corrupt: {1}")]
    CorruptChain(String, String),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Transport(#[from] yblob_membrane::TransportError),
    #[error(transparent)]
    Crypto(#[from] yblob_membrane::CryptoError),
}
