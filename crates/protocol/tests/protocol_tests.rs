//! Integration tests for bridge message framing
//!
//! Exercises the wire shapes a caller sees: method calls with arguments,
//! replies, errors and hot-plug events, several frames back to back.

use protocol::{
    CURRENT_VERSION, DeviceDescriptor, DeviceId, ErrorCode, EventKind, EventRecord,
    InterfaceDescriptor, Message, MessagePayload, MethodError, ProtocolError, ProtocolVersion,
};
use protocol::{decode_framed, encode_framed, read_framed, validate_version, write_framed};
use serde_json::json;
use std::io::Cursor;

fn envelope(payload: MessagePayload) -> Message {
    Message {
        version: CURRENT_VERSION,
        payload,
    }
}

fn cp2102() -> DeviceDescriptor {
    DeviceDescriptor {
        device_id: DeviceId(2005),
        device_name: "/dev/bus/usb/002/005".to_string(),
        vendor_id: 0x10c4,
        product_id: 0xea60,
        manufacturer: Some("Silicon Labs".to_string()),
        product: Some("CP2102 USB to UART Bridge Controller".to_string()),
        serial_number: None,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            class: 0xff,
            subclass: 0,
            protocol: 0,
        }],
    }
}

mod wire_shapes {
    use super::*;

    #[test]
    fn test_create_call_from_raw_json() {
        let body = json!({
            "version": {"major": 1, "minor": 0, "patch": 0},
            "payload": {
                "type": "call",
                "id": 42,
                "method": "create",
                "arguments": {"type": "", "vid": 1027, "pid": 24577, "deviceId": 0, "interface": -1}
            }
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let mut frame = (bytes.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&bytes);

        let msg = decode_framed(&frame).unwrap();
        let MessagePayload::Call {
            id,
            method,
            arguments,
        } = msg.payload
        else {
            panic!("expected a call");
        };
        assert_eq!(id, 42);
        assert_eq!(method, "create");
        assert_eq!(arguments["vid"], 1027);
        assert_eq!(arguments["interface"], -1);
    }

    #[test]
    fn test_event_frame_carries_flat_record() {
        let msg = envelope(MessagePayload::Event(EventRecord::new(
            EventKind::Attached,
            &cp2102(),
        )));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["payload"]["type"], "event");
        assert_eq!(value["payload"]["event"], "attached");
        assert_eq!(value["payload"]["deviceName"], "/dev/bus/usb/002/005");
        assert_eq!(value["payload"]["vid"], 0x10c4);
        assert_eq!(value["payload"]["productName"], "CP2102 USB to UART Bridge Controller");

        let decoded = decode_framed(&encode_framed(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_reply_with_device_list() {
        let records = vec![cp2102().to_record()];
        let msg = envelope(MessagePayload::Reply {
            id: 9,
            result: serde_json::to_value(&records).unwrap(),
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["result"][0]["deviceId"], 2005);
        assert_eq!(value["payload"]["result"][0]["interfaceCount"], 1);
    }

    #[test]
    fn test_error_without_details_omits_field() {
        let msg = envelope(MessagePayload::Error {
            id: 1,
            error: MethodError::new(ErrorCode::NotImplemented, "Method not implemented: reset"),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["code"], "NotImplemented");
        assert!(value["payload"].get("details").is_none());
    }
}

mod streams {
    use super::*;

    #[test]
    fn test_back_to_back_frames() {
        let messages = vec![
            envelope(MessagePayload::Listen),
            envelope(MessagePayload::Reply {
                id: 1,
                result: json!("usb_serial/port/100"),
            }),
            envelope(MessagePayload::Cancel),
        ];

        let mut buffer = Vec::new();
        for msg in &messages {
            write_framed(&mut buffer, msg).unwrap();
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &messages {
            let decoded = read_framed(&mut cursor).unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(matches!(
            read_framed(&mut cursor),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn test_incompatible_major_version_is_rejected() {
        let msg = Message {
            version: ProtocolVersion {
                major: CURRENT_VERSION.major + 1,
                minor: 0,
                patch: 0,
            },
            payload: MessagePayload::Listen,
        };
        let decoded = decode_framed(&encode_framed(&msg).unwrap()).unwrap();
        assert!(matches!(
            validate_version(&decoded.version),
            Err(ProtocolError::IncompatibleVersion { .. })
        ));
    }
}
