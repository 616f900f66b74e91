//! Glasses wire protocol
//!
//! Every message is a flat UTF-8 JSON object with a `type` discriminator:
//!
//! ```text
//! {"type":"time",   "time":"HH:MM"}
//! {"type":"notify", "app":"<app name>", "title":"<notification title>"}
//! {"type":"nav",    "direction":"←|→|↑", "distance":"<text>"}
//! ```
//!
//! Key order is not significant to the firmware; field values are copied
//! verbatim from the message.

use crate::domain::errors::CodecError;
use crate::domain::models::OutboundMessage;
use serde_json::json;
use uuid::Uuid;

/// GATT service exposed by the glasses firmware.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Characteristic that accepts message writes.
pub const MESSAGE_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Advertised name of the glasses.
pub const DEVICE_NAME: &str = "AR_Glasses";

/// Encode a message into its wire payload. Never fails.
pub fn encode(message: &OutboundMessage) -> Vec<u8> {
    let value = match message {
        OutboundMessage::Time { hhmm } => json!({
            "type": "time",
            "time": hhmm,
        }),
        OutboundMessage::Notify { app, title } => json!({
            "type": "notify",
            "app": app,
            "title": title,
        }),
        OutboundMessage::Nav {
            direction,
            distance,
        } => json!({
            "type": "nav",
            "direction": direction.glyph(),
            "distance": distance,
        }),
    };
    value.to_string().into_bytes()
}

/// Decode a wire payload back into a message.
pub fn decode(payload: &[u8]) -> Result<OutboundMessage, CodecError> {
    let text =
        std::str::from_utf8(payload).map_err(|e| CodecError::MalformedMessage(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| CodecError::MalformedMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Direction;
    use serde_json::Value;

    fn as_json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_encode_nav_uses_glyphs() {
        let payload = encode(&OutboundMessage::Nav {
            direction: Direction::Left,
            distance: "0.3 mi".to_string(),
        });
        assert_eq!(
            as_json(&payload),
            json!({"type": "nav", "direction": "←", "distance": "0.3 mi"})
        );

        let right = encode(&OutboundMessage::Nav {
            direction: Direction::Right,
            distance: "1 km".to_string(),
        });
        assert_eq!(as_json(&right)["direction"], "→");

        let straight = encode(&OutboundMessage::Nav {
            direction: Direction::Straight,
            distance: "200 ft".to_string(),
        });
        assert_eq!(as_json(&straight)["direction"], "↑");
    }

    #[test]
    fn test_encode_time_and_notify() {
        let time = encode(&OutboundMessage::Time {
            hhmm: "09:41".to_string(),
        });
        assert_eq!(as_json(&time), json!({"type": "time", "time": "09:41"}));

        let notify = encode(&OutboundMessage::Notify {
            app: "Messages".to_string(),
            title: "Dinner at \"8\"?".to_string(),
        });
        assert_eq!(
            as_json(&notify),
            json!({"type": "notify", "app": "Messages", "title": "Dinner at \"8\"?"})
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let message = OutboundMessage::Notify {
            app: "Mail".to_string(),
            title: "Weekly report".to_string(),
        };
        assert_eq!(encode(&message), encode(&message));
    }

    #[test]
    fn test_decode_accepts_firmware_payloads() {
        let message = decode(r#"{"direction":"→","distance":"0.8 mi","type":"nav"}"#.as_bytes());
        assert_eq!(
            message,
            Ok(OutboundMessage::Nav {
                direction: Direction::Right,
                distance: "0.8 mi".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"type":"weather","temp":"20C"}"#,
            br#"{"type":"notify","app":"Mail"}"#,
            r#"{"type":"nav","direction":"left","distance":"1 mi"}"#.as_bytes(),
            &[0xff, 0xfe, 0x00],
        ];
        for payload in cases {
            assert!(
                matches!(decode(payload), Err(CodecError::MalformedMessage(_))),
                "accepted {:?}",
                payload
            );
        }
    }
}
