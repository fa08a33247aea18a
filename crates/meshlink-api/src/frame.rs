//! Typed frame model for the module API protocol.
//!
//! [`Frame`] is a tagged variant over every frame kind the engine routes.
//! Conversion to and from wire data (frame-type byte + payload, excluding
//! delimiter/length/checksum) lives here; the outer framing is in
//! [`crate::wire`].
//!
//! Decoding is total: an unknown frame type, or a known type whose payload
//! is too short for its fixed fields, becomes [`Frame::Raw`] and is counted
//! by the dispatcher instead of failing the stream.

use bytes::{BufMut, BytesMut};

use meshlink_core::{
    Addr16, Addr64, AtStatus, DeliveryStatus, DeviceType, ModemStatusCode, RemoteNode,
};

/// Frame type byte: outbound local command request.
pub const TYPE_AT_COMMAND: u8 = 0x08;
/// Frame type byte: command response.
pub const TYPE_AT_RESPONSE: u8 = 0x88;
/// Frame type byte: addressed transmit request.
pub const TYPE_TRANSMIT_REQUEST: u8 = 0x10;
/// Frame type byte: delivery report for a solicited transmit.
pub const TYPE_TRANSMIT_STATUS: u8 = 0x8B;
/// Frame type byte: received application payload.
pub const TYPE_RECEIVE: u8 = 0x90;
/// Frame type byte: received payload with explicit addressing metadata.
pub const TYPE_EXPLICIT_RECEIVE: u8 = 0x91;
/// Frame type byte: unsolicited I/O sample notification.
pub const TYPE_IO_SAMPLE: u8 = 0x92;
/// Frame type byte: unsolicited modem status.
pub const TYPE_MODEM_STATUS: u8 = 0x8A;
/// Frame type byte: network discovery announcement.
pub const TYPE_DISCOVERY_NOTICE: u8 = 0x95;

/// One complete protocol message.
///
/// The `frame_id` on request/response kinds is the correlation token: a
/// response carries the id of the request that solicited it. Id `0` means
/// "no response expected" and is never correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Local configuration command (two-letter name + raw parameter).
    AtCommand {
        frame_id: u8,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
    /// Response to an [`AtCommand`](Frame::AtCommand).
    AtResponse {
        frame_id: u8,
        command: [u8; 2],
        status: AtStatus,
        value: Vec<u8>,
    },
    /// Application payload addressed to a remote node.
    TransmitRequest {
        frame_id: u8,
        dest64: Addr64,
        dest16: Addr16,
        radius: u8,
        options: u8,
        payload: Vec<u8>,
    },
    /// Delivery report for a solicited [`TransmitRequest`](Frame::TransmitRequest).
    TransmitStatus {
        frame_id: u8,
        dest16: Addr16,
        retries: u8,
        delivery: DeliveryStatus,
        discovery: u8,
    },
    /// Application payload received from a remote node.
    Receive {
        src64: Addr64,
        src16: Addr16,
        options: u8,
        payload: Vec<u8>,
    },
    /// Received payload with endpoint/cluster/profile addressing.
    ExplicitReceive {
        src64: Addr64,
        src16: Addr16,
        src_endpoint: u8,
        dst_endpoint: u8,
        cluster: u16,
        profile: u16,
        options: u8,
        payload: Vec<u8>,
    },
    /// Unsolicited I/O sample from a remote node. The sample bytes are
    /// passed through undecoded.
    IoSample {
        src64: Addr64,
        src16: Addr16,
        options: u8,
        data: Vec<u8>,
    },
    /// Unsolicited local radio state change. Carries no frame id.
    ModemStatus { status: ModemStatusCode },
    /// Network discovery announcement from a remote node.
    DiscoveryNotice { node: RemoteNode },
    /// A well-framed message of a type this engine does not interpret.
    Raw { frame_type: u8, payload: Vec<u8> },
}

impl Frame {
    /// The frame type byte this variant serializes to.
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::AtCommand { .. } => TYPE_AT_COMMAND,
            Frame::AtResponse { .. } => TYPE_AT_RESPONSE,
            Frame::TransmitRequest { .. } => TYPE_TRANSMIT_REQUEST,
            Frame::TransmitStatus { .. } => TYPE_TRANSMIT_STATUS,
            Frame::Receive { .. } => TYPE_RECEIVE,
            Frame::ExplicitReceive { .. } => TYPE_EXPLICIT_RECEIVE,
            Frame::IoSample { .. } => TYPE_IO_SAMPLE,
            Frame::ModemStatus { .. } => TYPE_MODEM_STATUS,
            Frame::DiscoveryNotice { .. } => TYPE_DISCOVERY_NOTICE,
            Frame::Raw { frame_type, .. } => *frame_type,
        }
    }

    /// The correlation token, for kinds that carry one.
    pub fn frame_id(&self) -> Option<u8> {
        match self {
            Frame::AtCommand { frame_id, .. }
            | Frame::AtResponse { frame_id, .. }
            | Frame::TransmitRequest { frame_id, .. }
            | Frame::TransmitStatus { frame_id, .. } => Some(*frame_id),
            _ => None,
        }
    }

    /// Serialize to wire data: frame-type byte followed by the payload.
    pub fn to_wire_data(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(32);
        out.put_u8(self.frame_type());
        match self {
            Frame::AtCommand {
                frame_id,
                command,
                parameter,
            } => {
                out.put_u8(*frame_id);
                out.put_slice(command);
                out.put_slice(parameter);
            }
            Frame::AtResponse {
                frame_id,
                command,
                status,
                value,
            } => {
                out.put_u8(*frame_id);
                out.put_slice(command);
                out.put_u8(status.as_u8());
                out.put_slice(value);
            }
            Frame::TransmitRequest {
                frame_id,
                dest64,
                dest16,
                radius,
                options,
                payload,
            } => {
                out.put_u8(*frame_id);
                out.put_slice(&dest64.to_be_bytes());
                out.put_slice(&dest16.to_be_bytes());
                out.put_u8(*radius);
                out.put_u8(*options);
                out.put_slice(payload);
            }
            Frame::TransmitStatus {
                frame_id,
                dest16,
                retries,
                delivery,
                discovery,
            } => {
                out.put_u8(*frame_id);
                out.put_slice(&dest16.to_be_bytes());
                out.put_u8(*retries);
                out.put_u8(delivery.as_u8());
                out.put_u8(*discovery);
            }
            Frame::Receive {
                src64,
                src16,
                options,
                payload,
            } => {
                out.put_slice(&src64.to_be_bytes());
                out.put_slice(&src16.to_be_bytes());
                out.put_u8(*options);
                out.put_slice(payload);
            }
            Frame::ExplicitReceive {
                src64,
                src16,
                src_endpoint,
                dst_endpoint,
                cluster,
                profile,
                options,
                payload,
            } => {
                out.put_slice(&src64.to_be_bytes());
                out.put_slice(&src16.to_be_bytes());
                out.put_u8(*src_endpoint);
                out.put_u8(*dst_endpoint);
                out.put_u16(*cluster);
                out.put_u16(*profile);
                out.put_u8(*options);
                out.put_slice(payload);
            }
            Frame::IoSample {
                src64,
                src16,
                options,
                data,
            } => {
                out.put_slice(&src64.to_be_bytes());
                out.put_slice(&src16.to_be_bytes());
                out.put_u8(*options);
                out.put_slice(data);
            }
            Frame::ModemStatus { status } => {
                out.put_u8(status.as_u8());
            }
            Frame::DiscoveryNotice { node } => {
                out.put_slice(&node.addr64.to_be_bytes());
                out.put_slice(&node.addr16.to_be_bytes());
                out.put_u8(node.device_type.as_u8());
                out.put_slice(node.node_id.as_bytes());
            }
            Frame::Raw { payload, .. } => {
                out.put_slice(payload);
            }
        }
        out.to_vec()
    }

    /// Deserialize from wire data (frame-type byte + payload).
    ///
    /// Total: anything unrecognized or under-length becomes [`Frame::Raw`].
    pub fn from_wire_data(data: &[u8]) -> Frame {
        let raw = |data: &[u8]| Frame::Raw {
            frame_type: data[0],
            payload: data[1..].to_vec(),
        };
        if data.is_empty() {
            return Frame::Raw {
                frame_type: 0,
                payload: Vec::new(),
            };
        }

        let p = &data[1..];
        match data[0] {
            TYPE_AT_COMMAND if p.len() >= 3 => Frame::AtCommand {
                frame_id: p[0],
                command: [p[1], p[2]],
                parameter: p[3..].to_vec(),
            },
            TYPE_AT_RESPONSE if p.len() >= 4 => Frame::AtResponse {
                frame_id: p[0],
                command: [p[1], p[2]],
                status: AtStatus::from_u8(p[3]),
                value: p[4..].to_vec(),
            },
            TYPE_TRANSMIT_REQUEST if p.len() >= 13 => Frame::TransmitRequest {
                frame_id: p[0],
                dest64: addr64(&p[1..9]),
                dest16: addr16(&p[9..11]),
                radius: p[11],
                options: p[12],
                payload: p[13..].to_vec(),
            },
            TYPE_TRANSMIT_STATUS if p.len() >= 6 => Frame::TransmitStatus {
                frame_id: p[0],
                dest16: addr16(&p[1..3]),
                retries: p[3],
                delivery: DeliveryStatus::from_u8(p[4]),
                discovery: p[5],
            },
            TYPE_RECEIVE if p.len() >= 11 => Frame::Receive {
                src64: addr64(&p[0..8]),
                src16: addr16(&p[8..10]),
                options: p[10],
                payload: p[11..].to_vec(),
            },
            TYPE_EXPLICIT_RECEIVE if p.len() >= 17 => Frame::ExplicitReceive {
                src64: addr64(&p[0..8]),
                src16: addr16(&p[8..10]),
                src_endpoint: p[10],
                dst_endpoint: p[11],
                cluster: u16::from_be_bytes([p[12], p[13]]),
                profile: u16::from_be_bytes([p[14], p[15]]),
                options: p[16],
                payload: p[17..].to_vec(),
            },
            TYPE_IO_SAMPLE if p.len() >= 11 => Frame::IoSample {
                src64: addr64(&p[0..8]),
                src16: addr16(&p[8..10]),
                options: p[10],
                data: p[11..].to_vec(),
            },
            TYPE_MODEM_STATUS if p.len() >= 1 => Frame::ModemStatus {
                status: ModemStatusCode::from_u8(p[0]),
            },
            TYPE_DISCOVERY_NOTICE if p.len() >= 11 => Frame::DiscoveryNotice {
                node: RemoteNode {
                    addr64: addr64(&p[0..8]),
                    addr16: addr16(&p[8..10]),
                    device_type: DeviceType::from_u8(p[10]),
                    node_id: String::from_utf8_lossy(&p[11..]).into_owned(),
                },
            },
            _ => raw(data),
        }
    }
}

fn addr64(bytes: &[u8]) -> Addr64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(bytes);
    Addr64::from_be_bytes(b)
}

fn addr16(bytes: &[u8]) -> Addr16 {
    Addr16::from_be_bytes([bytes[0], bytes[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_command_wire_layout() {
        let frame = Frame::AtCommand {
            frame_id: 0x52,
            command: *b"NI",
            parameter: vec![],
        };
        assert_eq!(frame.to_wire_data(), vec![0x08, 0x52, b'N', b'I']);
        assert_eq!(frame.frame_id(), Some(0x52));
    }

    #[test]
    fn at_response_wire_layout() {
        let data = vec![0x88, 0x52, b'N', b'I', 0x00, b'P', b'U', b'M', b'P'];
        let frame = Frame::from_wire_data(&data);
        assert_eq!(
            frame,
            Frame::AtResponse {
                frame_id: 0x52,
                command: *b"NI",
                status: AtStatus::Ok,
                value: b"PUMP".to_vec(),
            }
        );
        assert_eq!(frame.to_wire_data(), data);
    }

    #[test]
    fn transmit_request_wire_layout() {
        let frame = Frame::TransmitRequest {
            frame_id: 0x01,
            dest64: Addr64(0x0013_A200_4052_C507),
            dest16: Addr16::UNKNOWN,
            radius: 0,
            options: 0,
            payload: b"TX".to_vec(),
        };
        let data = frame.to_wire_data();
        assert_eq!(data[0], TYPE_TRANSMIT_REQUEST);
        assert_eq!(data.len(), 1 + 1 + 8 + 2 + 1 + 1 + 2);
        assert_eq!(&data[2..10], &Addr64(0x0013_A200_4052_C507).to_be_bytes());
        assert_eq!(&data[10..12], &[0xFF, 0xFE]);
        assert_eq!(Frame::from_wire_data(&data), frame);
    }

    #[test]
    fn modem_status_has_no_frame_id() {
        let frame = Frame::ModemStatus {
            status: ModemStatusCode::Associated,
        };
        assert_eq!(frame.frame_id(), None);
    }

    #[test]
    fn discovery_notice_node_id_is_remainder_of_frame() {
        let node = RemoteNode {
            addr64: Addr64(0x0013_A200_0000_0001),
            addr16: Addr16(0x2222),
            node_id: "WELL HOUSE".into(),
            device_type: DeviceType::Router,
        };
        let frame = Frame::DiscoveryNotice { node: node.clone() };
        let data = frame.to_wire_data();
        assert_eq!(&data[12..], b"WELL HOUSE");
        assert_eq!(Frame::from_wire_data(&data), frame);
    }

    #[test]
    fn unknown_type_decodes_as_raw() {
        let frame = Frame::from_wire_data(&[0xF0, 0x01, 0x02]);
        assert_eq!(
            frame,
            Frame::Raw {
                frame_type: 0xF0,
                payload: vec![0x01, 0x02],
            }
        );
        assert_eq!(frame.frame_id(), None);
    }

    #[test]
    fn under_length_known_type_decodes_as_raw() {
        // A receive frame needs at least 11 payload bytes.
        let frame = Frame::from_wire_data(&[TYPE_RECEIVE, 0x01, 0x02]);
        assert!(matches!(frame, Frame::Raw { frame_type, .. } if frame_type == TYPE_RECEIVE));
    }

    #[test]
    fn empty_payload_receive_decodes() {
        let frame = Frame::Receive {
            src64: Addr64(7),
            src16: Addr16(8),
            options: 0,
            payload: vec![],
        };
        assert_eq!(Frame::from_wire_data(&frame.to_wire_data()), frame);
    }
}
