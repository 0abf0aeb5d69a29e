//! An in-memory [`Transport`] used by tests, the `self-test` CLI command,
//! and nowhere else. Modeled after `EmulatedPiv` in
//! `examples/original_source/tests/test_store.py`: devices are added
//! explicitly with `add_device`, each keeps its own object table and
//! per-slot key material, and a default PIN/management key are assigned
//! so tests don't have to thread credentials through every call unless
//! they want to exercise the auth-failure paths.

use std::collections::HashMap;

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{EncodedPoint, PublicKey as P256PublicKey, SecretKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::{
    Certificate, Credentials, DeviceId, DeviceInfo, PublicKey, Transport, TransportError,
    X509Subject,
};

const DEFAULT_PIN: &str = "123456";
const DEFAULT_MANAGEMENT_KEY: [u8; 24] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
];

struct DeviceState {
    serial: u32,
    firmware_version: String,
    objects: HashMap<u32, Vec<u8>>,
    slots: HashMap<u8, SecretKey>,
    pin: String,
    management_key: [u8; 24],
}

/// An in-memory token registry. Each [`DeviceId`] maps to its own object
/// table and key slots; nothing here ever leaves the process.
#[derive(Default)]
pub struct EmulatedDevice {
    devices: Mutex<HashMap<DeviceId, DeviceState>>,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new emulated device and returns the [`DeviceId`] to
    /// address it by. `serial` and `firmware_version` are cosmetic,
    /// surfaced through [`Transport::list_devices`].
    pub fn add_device(&self, serial: u32, firmware_version: impl Into<String>) -> DeviceId {
        let id = DeviceId::new(format!("Emulated Reader {serial:08}"));
        self.devices.lock().insert(
            id.clone(),
            DeviceState {
                serial,
                firmware_version: firmware_version.into(),
                objects: HashMap::new(),
                slots: HashMap::new(),
                pin: DEFAULT_PIN.to_string(),
                management_key: DEFAULT_MANAGEMENT_KEY,
            },
        );
        id
    }

    /// Overrides the default PIN for an already-registered device, to
    /// exercise PIN-failure paths.
    pub fn set_pin(&self, device: &DeviceId, pin: impl Into<String>) {
        if let Some(state) = self.devices.lock().get_mut(device) {
            state.pin = pin.into();
        }
    }

    /// Snapshots one device's full state for out-of-process persistence
    /// (the `yblob` CLI's `--state` file stands in for a real token
    /// keeping its object table across invocations).
    pub fn export_device(&self, device: &DeviceId) -> Option<DeviceSnapshot> {
        let devices = self.devices.lock();
        let state = devices.get(device)?;
        Some(DeviceSnapshot {
            serial: state.serial,
            firmware_version: state.firmware_version.clone(),
            objects: state.objects.clone(),
            slots: state
                .slots
                .iter()
                .map(|(slot, secret)| (*slot, secret.to_bytes().to_vec()))
                .collect(),
            pin: state.pin.clone(),
            management_key: state.management_key,
        })
    }

    /// Restores a device previously captured with [`export_device`].
    pub fn import_device(&self, device: DeviceId, snapshot: DeviceSnapshot) {
        let slots = snapshot
            .slots
            .into_iter()
            .filter_map(|(slot, bytes)| SecretKey::from_slice(&bytes).ok().map(|key| (slot, key)))
            .collect();
        self.devices.lock().insert(
            device,
            DeviceState {
                serial: snapshot.serial,
                firmware_version: snapshot.firmware_version,
                objects: snapshot.objects,
                slots,
                pin: snapshot.pin,
                management_key: snapshot.management_key,
            },
        );
    }
}

/// The serializable half of [`DeviceState`] — everything but the live
/// `SecretKey` handles, which are round-tripped through their raw scalar
/// bytes instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub serial: u32,
    pub firmware_version: String,
    pub objects: HashMap<u32, Vec<u8>>,
    pub slots: HashMap<u8, Vec<u8>>,
    pub pin: String,
    pub management_key: [u8; 24],
}

impl Transport for EmulatedDevice {
    fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices
            .lock()
            .iter()
            .map(|(id, state)| DeviceInfo {
                id: id.clone(),
                serial: state.serial,
                firmware_version: state.firmware_version.clone(),
            })
            .collect()
    }

    fn read_object(&self, device: &DeviceId, object_id: u32) -> Result<Vec<u8>, TransportError> {
        let devices = self.devices.lock();
        let state = devices
            .get(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;
        state
            .objects
            .get(&object_id)
            .cloned()
            .ok_or(TransportError::ObjectNotFound {
                device: device.clone(),
                object_id,
            })
    }

    fn write_object(
        &self,
        device: &DeviceId,
        object_id: u32,
        payload: &[u8],
        creds: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        let mut devices = self.devices.lock();
        let state = devices
            .get_mut(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;

        match creds.and_then(|c| c.management_key.as_ref()) {
            Some(key) if *key == state.management_key => {}
            Some(_) => return Err(TransportError::WrongManagementKey(device.clone())),
            None => {}
        }

        debug!(object = object_id, len = payload.len(), "write_object");
        state.objects.insert(object_id, payload.to_vec());
        Ok(())
    }

    fn public_key_of_slot(&self, device: &DeviceId, slot: u8) -> Result<PublicKey, TransportError> {
        let devices = self.devices.lock();
        let state = devices
            .get(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;
        let secret = state
            .slots
            .get(&slot)
            .ok_or(TransportError::SlotEmpty { device: device.clone(), slot })?;
        Ok(encode_public(&secret.public_key()))
    }

    fn ecdh_on_device(
        &self,
        device: &DeviceId,
        slot: u8,
        peer_point: &[u8],
    ) -> Result<[u8; 32], TransportError> {
        let devices = self.devices.lock();
        let state = devices
            .get(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;
        let secret = state
            .slots
            .get(&slot)
            .ok_or(TransportError::SlotEmpty { device: device.clone(), slot })?;
        let peer = P256PublicKey::from_sec1_bytes(peer_point)
            .map_err(|_| TransportError::BadPeerPoint(device.clone()))?;
        let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    fn verify_pin(&self, device: &DeviceId, pin: &str) -> Result<(), TransportError> {
        let devices = self.devices.lock();
        let state = devices
            .get(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;
        if pin == state.pin {
            Ok(())
        } else {
            Err(TransportError::WrongPin(device.clone()))
        }
    }

    fn authenticate_management(&self, device: &DeviceId, key: &[u8]) -> Result<(), TransportError> {
        let devices = self.devices.lock();
        let state = devices
            .get(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;
        if key == state.management_key {
            Ok(())
        } else {
            Err(TransportError::WrongManagementKey(device.clone()))
        }
    }

    fn generate_key(&self, device: &DeviceId, slot: u8) -> Result<PublicKey, TransportError> {
        let mut devices = self.devices.lock();
        let state = devices
            .get_mut(device)
            .ok_or_else(|| TransportError::DeviceNotFound(device.clone()))?;
        let secret = SecretKey::random(&mut OsRng);
        let public = encode_public(&secret.public_key());
        state.slots.insert(slot, secret);
        Ok(public)
    }

    fn self_sign(
        &self,
        device: &DeviceId,
        slot: u8,
        subject: &X509Subject,
    ) -> Result<Certificate, TransportError> {
        let public_key = self.public_key_of_slot(device, slot)?;
        Ok(Certificate {
            public_key,
            subject: subject.clone(),
        })
    }
}

fn encode_public(public: &P256PublicKey) -> PublicKey {
    let encoded: EncodedPoint = public.to_encoded_point(false);
    let mut bytes = [0u8; 65];
    bytes.copy_from_slice(encoded.as_bytes());
    PublicKey(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dev = EmulatedDevice::new();
        let id = dev.add_device(1, "5.7.1");
        dev.write_object(&id, 0x5f_0000, b"hello", None).unwrap();
        assert_eq!(dev.read_object(&id, 0x5f_0000).unwrap(), b"hello");
    }

    #[test]
    fn read_before_write_fails() {
        let dev = EmulatedDevice::new();
        let id = dev.add_device(1, "5.7.1");
        assert!(dev.read_object(&id, 0x5f_0000).is_err());
    }

    #[test]
    fn pin_verification() {
        let dev = EmulatedDevice::new();
        let id = dev.add_device(1, "5.7.1");
        assert!(dev.verify_pin(&id, "000000").is_err());
        assert!(dev.verify_pin(&id, DEFAULT_PIN).is_ok());
    }

    #[test]
    fn export_then_import_preserves_ecdh_behavior() {
        let dev = EmulatedDevice::new();
        let id = dev.add_device(1, "5.7.1");
        let public = dev.generate_key(&id, 0x9a).unwrap();
        dev.write_object(&id, 0x5f_0000, b"payload", None).unwrap();

        let snapshot = dev.export_device(&id).unwrap();

        let restored = EmulatedDevice::new();
        restored.import_device(id.clone(), snapshot);
        assert_eq!(restored.read_object(&id, 0x5f_0000).unwrap(), b"payload");
        assert_eq!(restored.public_key_of_slot(&id, 0x9a).unwrap(), public);
    }

    #[test]
    fn ecdh_matches_host_side_computation() {
        let dev = EmulatedDevice::new();
        let id = dev.add_device(1, "5.7.1");
        let device_pub = dev.generate_key(&id, 0x9a).unwrap();

        let eph = p256::ecdh::EphemeralSecret::random(&mut OsRng);
        let eph_point: EncodedPoint = eph.public_key().to_encoded_point(false);
        let device_pub_parsed = P256PublicKey::from_sec1_bytes(device_pub.as_bytes()).unwrap();
        let expected = eph.diffie_hellman(&device_pub_parsed);

        let got = dev
            .ecdh_on_device(&id, 0x9a, eph_point.as_bytes())
            .unwrap();
        assert_eq!(&got[..], expected.raw_secret_bytes().as_slice());
    }
}
