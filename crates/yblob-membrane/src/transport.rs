//! The boundary the storage engine needs from a physical (or emulated)
//! PIV token.
//!
//! Everything the core cares about is five verbs — read an object, write
//! an object, read a slot's public key, ask the card to do the ECDH
//! scalar multiplication for a slot's private key, and the two
//! authentication steps (PIN, management key) those writes may require —
//! plus device discovery and the two provisioning verbs (`generate_key`,
//! `self_sign`) `format` needs. Concrete transports (PC/SC, APDU framing,
//! a PKCS#11 proxy) implement this trait outside this workspace; the only
//! implementation here is [`crate::mock::EmulatedDevice`].

use thiserror::Error;

/// Opaque handle identifying one connected device to a [`Transport`].
///
/// Transports are free to key this however they like (a PC/SC reader
/// name, a USB serial number); the core only ever threads it through
/// opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What `list_devices` reports about one connected token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub serial: u32,
    pub firmware_version: String,
}

/// Credentials a write may require: an optional 24-byte management key
/// (AES-192 or 3DES, per spec.md §6.1) and an optional PIN.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub management_key: Option<[u8; 24]>,
    pub pin: Option<String>,
}

/// An uncompressed SEC1 P-256 point: `0x04 || X || Y`, 65 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 65]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

/// Subject name written into a self-signed certificate at `format` time.
#[derive(Debug, Clone)]
pub struct X509Subject {
    pub common_name: String,
    pub organization: Option<String>,
}

/// A minimal stand-in for the self-signed certificate `yubico-piv-tool`
/// would write into a slot's certificate object. No ASN.1/X.509 encoding
/// is implemented — this workspace never parses a real certificate, it
/// only needs somewhere to keep the public key and the subject that
/// `public_key_of_slot` reads back.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub public_key: PublicKey,
    pub subject: X509Subject,
}

/// Failures reported by a [`Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),
    #[error("object {object_id:#x} not found on device {device}")]
    ObjectNotFound { device: DeviceId, object_id: u32 },
    #[error("slot {slot:#04x} has no key on device {device}")]
    SlotEmpty { device: DeviceId, slot: u8 },
    #[error("PIN verification failed on device {0}")]
    WrongPin(DeviceId),
    #[error("management key authentication failed on device {0}")]
    WrongManagementKey(DeviceId),
    #[error("management key or PIN required but not supplied for device {0}")]
    CredentialsRequired(DeviceId),
    #[error("malformed peer point presented to device {0}")]
    BadPeerPoint(DeviceId),
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// The complete set of operations the storage engine needs from a PIV
/// token. See the module doc comment for scope.
pub trait Transport {
    /// Enumerate currently connected/known devices.
    fn list_devices(&self) -> Vec<DeviceInfo>;

    /// Read the raw bytes of one PIV data object.
    fn read_object(&self, device: &DeviceId, object_id: u32) -> Result<Vec<u8>, TransportError>;

    /// Write the raw bytes of one PIV data object, optionally
    /// authenticated by a management key and/or PIN.
    fn write_object(
        &self,
        device: &DeviceId,
        object_id: u32,
        payload: &[u8],
        creds: Option<&Credentials>,
    ) -> Result<(), TransportError>;

    /// Read the public half of the ECC key pair held in `slot`.
    fn public_key_of_slot(&self, device: &DeviceId, slot: u8) -> Result<PublicKey, TransportError>;

    /// Ask the device to perform ECDH between `slot`'s private key and
    /// `peer_point` (an uncompressed SEC1 point), returning the 32-byte
    /// shared secret. The private key never leaves the device.
    fn ecdh_on_device(
        &self,
        device: &DeviceId,
        slot: u8,
        peer_point: &[u8],
    ) -> Result<[u8; 32], TransportError>;

    /// Verify a PIN against the device.
    fn verify_pin(&self, device: &DeviceId, pin: &str) -> Result<(), TransportError>;

    /// Authenticate with the device's management key.
    fn authenticate_management(&self, device: &DeviceId, key: &[u8]) -> Result<(), TransportError>;

    /// Generate a fresh P-256 key pair in `slot`, returning its public
    /// half. Used by `format` when `generate_key` is requested.
    fn generate_key(&self, device: &DeviceId, slot: u8) -> Result<PublicKey, TransportError>;

    /// Self-sign a certificate for `slot`'s current key with the given
    /// subject. Used by `format` to make the public key readable later
    /// via [`Transport::public_key_of_slot`] on real hardware, where the
    /// certificate object is the only place the public key is exposed.
    fn self_sign(
        &self,
        device: &DeviceId,
        slot: u8,
        subject: &X509Subject,
    ) -> Result<Certificate, TransportError>;
}
