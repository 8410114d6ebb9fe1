//! Button event types and the event-notification decoder.
//!
//! Grounded on `examples/original_source/.../models.py` (`ButtonEventType`,
//! `ButtonEventClass`, `ButtonEvent`) and
//! `protocol/packets.py::PacketDecoder.decode_button_event` for the exact
//! bit mapping.

/// Kind of button action a single event record reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEventType {
    Up,
    Down,
    Click,
    SingleClick,
    DoubleClick,
    Hold,
}

/// Which subset of events a listener wants reported; mirrors the official
/// SDK's `Flic2EventButtonEventClass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEventClass {
    UpOrDown,
    ClickOrHold,
    SingleOrDoubleClick,
    SingleOrDoubleClickOrHold,
}

/// A single decoded button event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ButtonEvent {
    pub event_type: ButtonEventType,
    pub was_queued: bool,
    pub age_seconds: f64,
    pub press_counter: u32,
}

/// Flic's button clock runs at 32768 Hz.
const TICKS_PER_SECOND: f64 = 32768.0;

/// Decode a `BUTTON_EVENT_NOTIFICATION` payload: `press_counter(4, LE)`
/// followed by zero or more 7-byte records (`timestamp(6, LE ticks)` +
/// `event_info(1)`).
///
/// `now_ticks` is an optional 48-bit tick estimate for "now", used to
/// compute `age_seconds` for queued events; without it (e.g. decoding a
/// notification in isolation, with no tracked session clock) every event's
/// `age_seconds` is reported as `0.0`.
pub fn decode_button_events(payload: &[u8], now_ticks: Option<u64>) -> Vec<ButtonEvent> {
    let mut events = Vec::new();
    if payload.len() < 4 {
        return events;
    }

    let press_counter = u32::from_le_bytes(payload[0..4].try_into().unwrap());

    let mut offset = 4;
    while offset + 7 <= payload.len() {
        let mut ticks_bytes = [0u8; 8];
        ticks_bytes[..6].copy_from_slice(&payload[offset..offset + 6]);
        let event_ticks = u64::from_le_bytes(ticks_bytes);
        let event_info = payload[offset + 6];
        offset += 7;

        let event_encoded = event_info & 0x0F;
        let was_queued = (event_info >> 4) & 0x01 != 0;

        let event_type = decode_event_type(event_encoded);

        let age_seconds = match now_ticks {
            Some(now) if now >= event_ticks => (now - event_ticks) as f64 / TICKS_PER_SECOND,
            _ => 0.0,
        };

        events.push(ButtonEvent {
            event_type,
            was_queued,
            age_seconds,
            press_counter,
        });
    }

    events
}

fn decode_event_type(event_encoded: u8) -> ButtonEventType {
    if (event_encoded >> 3) != 0 {
        if event_encoded & 0x04 != 0 {
            ButtonEventType::Hold
        } else if event_encoded & 0x02 != 0 {
            if event_encoded & 0x01 != 0 {
                ButtonEventType::DoubleClick
            } else {
                ButtonEventType::SingleClick
            }
        } else {
            ButtonEventType::Up
        }
    } else {
        match event_encoded {
            0 => ButtonEventType::Up,
            1 => ButtonEventType::Down,
            2 => ButtonEventType::Click,
            3 => ButtonEventType::SingleClick,
            4 => ButtonEventType::DoubleClick,
            5 => ButtonEventType::Hold,
            _ => ButtonEventType::Up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ticks: u64, event_encoded: u8, queued: bool) -> [u8; 7] {
        let mut rec = [0u8; 7];
        rec[..6].copy_from_slice(&ticks.to_le_bytes()[..6]);
        rec[6] = event_encoded | if queued { 0x10 } else { 0x00 };
        rec
    }

    #[test]
    fn decodes_simple_down_and_up() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&record(100, 1, false));
        payload.extend_from_slice(&record(200, 0, false));

        let events = decode_button_events(&payload, None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, ButtonEventType::Down);
        assert_eq!(events[1].event_type, ButtonEventType::Up);
    }

    #[test]
    fn decodes_hold_and_double_click_via_high_bit() {
        let mut payload = vec![0u8; 4];
        // bit3 set (>>3 != 0), bit2 set -> HOLD
        payload.extend_from_slice(&record(0, 0b1100, false));
        // bit3 set, bit1 set, bit0 set -> DOUBLE_CLICK
        payload.extend_from_slice(&record(0, 0b1011, false));
        // bit3 set, bit1 set, bit0 clear -> SINGLE_CLICK
        payload.extend_from_slice(&record(0, 0b1010, false));

        let events = decode_button_events(&payload, None);
        assert_eq!(events[0].event_type, ButtonEventType::Hold);
        assert_eq!(events[1].event_type, ButtonEventType::DoubleClick);
        assert_eq!(events[2].event_type, ButtonEventType::SingleClick);
    }

    #[test]
    fn was_queued_flag_is_read_from_bit_four() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&record(0, 2, true));
        let events = decode_button_events(&payload, None);
        assert!(events[0].was_queued);
        assert_eq!(events[0].event_type, ButtonEventType::Click);
    }

    #[test]
    fn age_seconds_uses_reference_clock_when_available() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&record(32768, 5, true));

        let events = decode_button_events(&payload, Some(32768 * 3));
        assert_eq!(events[0].age_seconds, 2.0);

        let events_no_ref = decode_button_events(&payload, None);
        assert_eq!(events_no_ref[0].age_seconds, 0.0);
    }
}
