//! Hybrid ECDH/HKDF/AES-256-CBC encryption envelope.
//!
//! Fixed by design (spec.md §9 "Crypto envelope is fixed"): the curve
//! (P-256), KDF (HKDF-SHA256, info string `"hybrid-encryption"`), and
//! cipher (AES-256-CBC, PKCS7 padding) are not parameters. Changing any
//! of them would silently break blobs already stored on a card.
//!
//! ```text
//! encrypt(P, Q_device):
//!   (d_eph, Q_eph) <- fresh P-256 keypair
//!   Z             <- ECDH(d_eph, Q_device)
//!   K             <- HKDF-SHA256(salt=[], ikm=Z, info="hybrid-encryption", L=32)
//!   IV            <- 16 random bytes
//!   C             <- AES-256-CBC-Encrypt(K, IV, PKCS7-pad(P))
//!   envelope      = Q_eph(65) || IV(16) || C
//! ```

use aes::Aes256;
use cbc::cipher::block_padding::{Pkcs7, UnpadError};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{EncodedPoint, PublicKey as P256PublicKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use crate::transport::{DeviceId, PublicKey, Transport, TransportError};

const HKDF_INFO: &[u8] = b"hybrid-encryption";
const POINT_LEN: usize = 65;
const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Failures from the hybrid-encryption envelope. A malformed point, a
/// wrong HKDF/AES size, or invalid PKCS7 padding all fail closed — no
/// partial plaintext is ever returned.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed ephemeral or peer point")]
    BadPoint,
    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    BadCiphertextLength(usize),
    #[error("PKCS7 unpadding failed, ciphertext or key is wrong")]
    BadPadding,
    #[error("envelope shorter than the fixed Q_eph||IV header ({POINT_LEN} + {IV_LEN} bytes)")]
    ShortEnvelope,
    #[error("derived key or IV had the wrong length for AES-256-CBC")]
    BadKeyOrIvLength,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<UnpadError> for CryptoError {
    fn from(_: UnpadError) -> Self {
        CryptoError::BadPadding
    }
}

/// Encrypts `plaintext` for the device public key `device_point`
/// (an uncompressed SEC1 point), returning `Q_eph || IV || C`.
pub fn hybrid_encrypt(plaintext: &[u8], device_point: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let device_key =
        P256PublicKey::from_sec1_bytes(device_point.as_bytes()).map_err(|_| CryptoError::BadPoint)?;

    let eph_secret = EphemeralSecret::random(&mut OsRng);
    let eph_public: EncodedPoint = eph_secret.public_key().to_encoded_point(false);
    let eph_bytes = eph_public.as_bytes();
    debug_assert_eq!(eph_bytes.len(), POINT_LEN);

    let shared = eph_secret.diffie_hellman(&device_key);
    let key = derive_key(shared.raw_secret_bytes().as_slice());

    let mut iv = [0u8; IV_LEN];
    rand::RngCore::fill_bytes(&mut OsRng, &mut iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|_| CryptoError::BadKeyOrIvLength)?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut envelope = Vec::with_capacity(POINT_LEN + IV_LEN + ciphertext.len());
    envelope.extend_from_slice(eph_bytes);
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypts an envelope produced by [`hybrid_encrypt`], performing the
/// ECDH scalar multiplication on the device identified by `device`/`slot`
/// rather than with a locally-held private key.
pub fn hybrid_decrypt(
    envelope: &[u8],
    transport: &dyn Transport,
    device: &DeviceId,
    slot: u8,
) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < POINT_LEN + IV_LEN {
        return Err(CryptoError::ShortEnvelope);
    }
    let (eph_point, rest) = envelope.split_at(POINT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);

    if ciphertext.len() % 16 != 0 || ciphertext.is_empty() {
        return Err(CryptoError::BadCiphertextLength(ciphertext.len()));
    }

    let mut shared = transport.ecdh_on_device(device, slot, eph_point)?;
    let key = derive_key(&shared);
    shared.zeroize();

    let plaintext = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|_| CryptoError::BadKeyOrIvLength)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)?;
    Ok(plaintext)
}

fn derive_key(shared_secret: &[u8]) -> [u8; KEY_LEN] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; KEY_LEN];
    hk.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 output length is always valid for 32 bytes");
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::EmulatedDevice;

    #[test]
    fn round_trips_through_emulated_device() {
        let device = EmulatedDevice::new();
        let id = device.add_device(12_345_678, "5.7.1");
        let pubkey = device.generate_key(&id, 0x9a).unwrap();

        let plaintext = b"a secret configuration blob";
        let envelope = hybrid_encrypt(plaintext, &pubkey).unwrap();
        let expected_ciphertext_len = ((plaintext.len() / 16) + 1) * 16;
        assert_eq!(envelope.len(), POINT_LEN + IV_LEN + expected_ciphertext_len);

        let decrypted = hybrid_decrypt(&envelope, &device, &id, 0x9a).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn rejects_truncated_envelope() {
        let err = hybrid_decrypt(&[0u8; 10], &EmulatedDevice::new(), &DeviceId::new("x"), 0);
        assert!(matches!(err, Err(CryptoError::ShortEnvelope)));
    }

    #[test]
    fn rejects_bad_point() {
        let bad = PublicKey([0u8; POINT_LEN]);
        let err = hybrid_encrypt(b"x", &bad);
        assert!(matches!(err, Err(CryptoError::BadPoint)));
    }
}
