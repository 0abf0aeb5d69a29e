//! Transport boundary and hybrid-encryption envelope for the yblob PIV
//! blob store.
//!
//! This crate is the "safety membrane" between the pure, synchronous
//! in-memory logic of `yblob-core` and everything that actually has to
//! touch a device or the network: the [`Transport`](transport::Transport)
//! trait names exactly the operations the core needs (read/write a PIV
//! object, read a public key, run an ECDH step on-card, verify a PIN or
//! management key), and [`crypto`] implements the hybrid-encryption
//! envelope on top of it. No PC/SC, APDU framing, or PKCS#11 proxying
//! lives here or anywhere in this workspace — those are external
//! collaborators, represented only by this trait and by the in-memory
//! [`mock::EmulatedDevice`] used in tests and the `self-test` CLI command.

#![deny(unsafe_code)]

pub mod crypto;
pub mod mock;
pub mod transport;

pub use crypto::CryptoError;
pub use transport::{
    Certificate, Credentials, DeviceId, DeviceInfo, PublicKey, Transport, TransportError,
    X509Subject,
};
