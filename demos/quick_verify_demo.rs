//! End-to-end Quick Verify + event-listening walkthrough against an
//! in-process fake button, grounded in the reconnect path of
//! `examples/original_source/.../examples/flic2_demo.py`. There is no real
//! BLE transport in this crate (BLE transport primitives are out of
//! scope), so this demo plays both sides of the protocol over a callback
//! instead of a Bluetooth radio.

use std::sync::{Arc, Mutex};

use flic2::chaskey::ChaskeyKey;
use flic2::credentials::{MemoryCredentialStore, PairingCredentials};
use flic2::error::Error;
use flic2::packet::opcode;
use flic2::transport::{Transport, TransportEvent};
use flic2::Flic2Client;

const PAIRING_KEY: [u8; 16] = [0x42; 16];
const PAIRING_ID: [u8; 4] = [1, 2, 3, 4];
const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Plays the button's side of Quick Verify plus one queued click event,
/// replying synchronously from inside `write`.
struct FakeButton {
    on_event: Mutex<Option<Box<dyn Fn(TransportEvent) + Send + Sync>>>,
    button_random: [u8; 8],
    tx_counter: Mutex<u64>,
    session_chaskey: Mutex<Option<ChaskeyKey>>,
}

impl FakeButton {
    fn new() -> Self {
        Self {
            on_event: Mutex::new(None),
            button_random: [9, 8, 7, 6, 5, 4, 3, 2],
            tx_counter: Mutex::new(0),
            session_chaskey: Mutex::new(None),
        }
    }

    fn emit(&self, data: Vec<u8>) {
        if let Some(cb) = self.on_event.lock().unwrap().as_ref() {
            cb(TransportEvent::Data(data));
        }
    }

    /// Sign a packet the way the button signs its own outbound packets:
    /// direction 0 (RX, from the client's point of view).
    fn sign(&self, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let guard = self.session_chaskey.lock().unwrap();
        let chaskey = guard.as_ref().expect("session key derived during quick verify");

        let mut counter = self.tx_counter.lock().unwrap();
        let mut packet = vec![0u8, opcode];
        packet.extend_from_slice(payload);
        let sig = chaskey.mac_with_dir_and_counter(&packet, 0, *counter);
        *counter += 1;
        packet.extend_from_slice(&sig);
        packet
    }
}

impl Transport for FakeButton {
    fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), Error> {
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() < 2 {
            return Ok(());
        }
        let incoming_opcode = data[1];

        if incoming_opcode == opcode::QUICK_VERIFY_REQUEST {
            let client_random: [u8; 8] = data[2..9].try_into().unwrap();
            let session_key = flic2::crypto::derive_quick_verify_session_key(
                &PAIRING_KEY,
                &client_random,
                &self.button_random,
            );
            *self.session_chaskey.lock().unwrap() = Some(ChaskeyKey::new(&session_key));

            let mut response = vec![0u8, opcode::QUICK_VERIFY_RESPONSE];
            response.extend_from_slice(&self.button_random);
            self.emit(response);
            return Ok(());
        }

        if incoming_opcode == opcode::INIT_BUTTON_EVENTS {
            let mut init_payload = [0u8; 13];
            init_payload[0..4].copy_from_slice(&7u32.to_le_bytes()); // boot_id
            init_payload[4..8].copy_from_slice(&0u32.to_le_bytes()); // event_count
            init_payload[8..12].copy_from_slice(&0u32.to_le_bytes()); // timestamp_hi
            init_payload[12] = 87; // battery_level
            let response = self.sign(opcode::INIT_BUTTON_EVENTS_RESPONSE, &init_payload);
            self.emit(response);

            // One queued single-click event.
            let mut event_payload = vec![0u8; 4]; // press_counter = 0
            event_payload.extend_from_slice(&0u64.to_le_bytes()[..6]); // timestamp ticks
            event_payload.push(0b0001_1010); // was_queued=1, SINGLE_CLICK encoding
            let notification = self.sign(opcode::BUTTON_EVENT_NOTIFICATION, &event_payload);
            self.emit(notification);
        }

        Ok(())
    }

    fn subscribe(&self, on_event: Box<dyn Fn(TransportEvent) + Send + Sync>) {
        *self.on_event.lock().unwrap() = Some(on_event);
    }
}

fn main() {
    env_logger::init();

    let credential_store = Arc::new(MemoryCredentialStore::new());
    credential_store.save(&PairingCredentials {
        address: ADDRESS.to_string(),
        pairing_id: PAIRING_ID,
        pairing_key: PAIRING_KEY,
        button_uuid: "demo-uuid".into(),
        name: "Flic 2".into(),
        serial_number: "DEMO-0001".into(),
        firmware_version: 1,
        last_boot_id: None,
        last_event_count: None,
    });

    let transport = Arc::new(FakeButton::new());
    let mut client = Flic2Client::new(ADDRESS.to_string(), transport, credential_store);

    client.on_button_event(|event| {
        println!(
            "button event: {:?} (queued={}, age={:.2}s)",
            event.event_type, event.was_queued, event.age_seconds
        );
    });
    client.on_battery_level(|level| println!("battery level: {level}%"));

    client.connect().expect("connect");
    client.quick_verify().expect("quick verify");
    client.init_button_events().expect("init button events");

    std::thread::sleep(std::time::Duration::from_millis(200));
    client.disconnect().expect("disconnect");
}
