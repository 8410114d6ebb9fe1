//! Pairing credentials, button metadata, and the credential store trait.
//!
//! Grounded on `examples/original_source/.../models.py`
//! (`PairingCredentials`, `ButtonInfo`) and teacher's
//! `smp/keys.rs::KeyStore`/`MemoryKeyStore` for the store trait shape and
//! its in-memory reference implementation. Persistent (SQLite-backed)
//! storage, as `storage/database.py` provides, is out of scope here — this
//! crate only defines the trait its caller implements.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Non-secret metadata about a paired button, returned alongside
/// [`PairingCredentials`] on a completed Full Verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonInfo {
    pub address: String,
    pub uuid: String,
    pub name: String,
    pub serial_number: String,
    pub firmware_version: u32,
    pub battery_level: Option<u8>,
}

impl fmt::Display for ButtonInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flic2Button({}, {})", self.name, self.address)
    }
}

/// Stored credentials for a paired button, sufficient to run Quick Verify
/// on future reconnections.
///
/// `pairing_id`/`pairing_key` are zeroed on drop; `Display`/`Debug` must
/// never leak them, so both are hand-rolled to redact those fields.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PairingCredentials {
    #[zeroize(skip)]
    pub address: String,
    pub pairing_id: [u8; 4],
    pub pairing_key: [u8; 16],
    #[zeroize(skip)]
    pub button_uuid: String,
    #[zeroize(skip)]
    pub name: String,
    #[zeroize(skip)]
    pub serial_number: String,
    #[zeroize(skip)]
    pub firmware_version: u32,
    #[zeroize(skip)]
    pub last_boot_id: Option<u32>,
    #[zeroize(skip)]
    pub last_event_count: Option<u32>,
}

impl fmt::Debug for PairingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCredentials")
            .field("address", &self.address)
            .field("pairing_id", &"<redacted>")
            .field("pairing_key", &"<redacted>")
            .field("button_uuid", &self.button_uuid)
            .field("name", &self.name)
            .field("serial_number", &self.serial_number)
            .field("firmware_version", &self.firmware_version)
            .field("last_boot_id", &self.last_boot_id)
            .field("last_event_count", &self.last_event_count)
            .finish()
    }
}

impl fmt::Display for PairingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingCredentials({}, <redacted>)", self.address)
    }
}

/// Storage backend for [`PairingCredentials`]. Implementations are expected
/// to persist these (e.g. to disk or a keystore); this crate only consumes
/// the trait — persistence itself is out of scope.
pub trait CredentialStore: Send + Sync {
    fn save(&self, credentials: &PairingCredentials);
    fn load(&self, address: &str) -> Option<PairingCredentials>;
    fn delete(&self, address: &str) -> bool;
    fn list_all(&self) -> Vec<PairingCredentials>;
    fn update_event_tracking(&self, address: &str, boot_id: Option<u32>, event_count: Option<u32>);
}

/// In-memory reference `CredentialStore`, mirroring the role teacher's
/// `MemoryKeyStore` plays for SMP bond keys: useful for tests and as a
/// drop-in default when a caller doesn't need durable storage.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, PairingCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, credentials: &PairingCredentials) {
        let mut entries = self.entries.lock().expect("credential store mutex poisoned");
        entries.insert(credentials.address.to_uppercase(), credentials.clone());
    }

    fn load(&self, address: &str) -> Option<PairingCredentials> {
        let entries = self.entries.lock().expect("credential store mutex poisoned");
        entries.get(&address.to_uppercase()).cloned()
    }

    fn delete(&self, address: &str) -> bool {
        let mut entries = self.entries.lock().expect("credential store mutex poisoned");
        entries.remove(&address.to_uppercase()).is_some()
    }

    fn list_all(&self) -> Vec<PairingCredentials> {
        let entries = self.entries.lock().expect("credential store mutex poisoned");
        entries.values().cloned().collect()
    }

    fn update_event_tracking(&self, address: &str, boot_id: Option<u32>, event_count: Option<u32>) {
        let mut entries = self.entries.lock().expect("credential store mutex poisoned");
        if let Some(creds) = entries.get_mut(&address.to_uppercase()) {
            if let Some(boot_id) = boot_id {
                creds.last_boot_id = Some(boot_id);
            }
            if let Some(event_count) = event_count {
                creds.last_event_count = Some(event_count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(address: &str) -> PairingCredentials {
        PairingCredentials {
            address: address.to_string(),
            pairing_id: [1, 2, 3, 4],
            pairing_key: [0xAB; 16],
            button_uuid: "uuid".into(),
            name: "Flic 2".into(),
            serial_number: "SN1".into(),
            firmware_version: 1,
            last_boot_id: None,
            last_event_count: None,
        }
    }

    #[test]
    fn debug_and_display_redact_key_material() {
        let creds = sample("aa:bb:cc:dd:ee:ff");
        let debug = format!("{:?}", creds);
        let display = format!("{}", creds);
        assert!(!debug.contains("171")); // no raw pairing_id/key bytes formatted in
        assert!(debug.contains("<redacted>"));
        assert!(display.contains("<redacted>"));
    }

    #[test]
    fn memory_store_round_trips_and_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        store.save(&sample("AA:BB:CC:DD:EE:FF"));

        let loaded = store.load("aa:bb:cc:dd:ee:ff").expect("should find by lowercase address");
        assert_eq!(loaded.address, "AA:BB:CC:DD:EE:FF");

        store.update_event_tracking("aa:bb:cc:dd:ee:ff", Some(7), Some(42));
        let updated = store.load("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(updated.last_boot_id, Some(7));
        assert_eq!(updated.last_event_count, Some(42));

        assert!(store.delete("AA:BB:CC:DD:EE:FF"));
        assert!(store.load("AA:BB:CC:DD:EE:FF").is_none());
    }

    #[test]
    fn list_all_returns_every_entry() {
        let store = MemoryCredentialStore::new();
        store.save(&sample("11:11:11:11:11:11"));
        store.save(&sample("22:22:22:22:22:22"));
        assert_eq!(store.list_all().len(), 2);
    }
}
