//! Pure, synchronous storage engine for the yblob PIV blob store: the
//! record codec, the store container, the blob chunking/linking engine,
//! and the crash-recovery sanitizer. Nothing in this crate touches a
//! device directly — every operation takes a
//! [`yblob_membrane::Transport`] and drives it explicitly, so the whole
//! engine is testable against [`yblob_membrane::mock::EmulatedDevice`]
//! without any hardware.

#![deny(unsafe_code)]

pub mod blob;
pub mod error;
pub mod ops;
pub mod record;
pub mod sanitize;
pub mod store;

pub use blob::BlobInfo;
pub use error::StoreError;
pub use record::{Record, StoreGeometry};
pub use store::Store;
