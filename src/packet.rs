//! Space packet codec for the primary transport.
//!
//! Layout: a 6-byte primary header, a fixed 12-byte secondary header carrying
//! the message type and subtype, then the JSON payload.

use crate::error::{PduError, PduResult};

pub const PRIMARY_HEADER_LEN: usize = 6;
pub const SECONDARY_HEADER_LEN: usize = 12;
pub const HEADER_LEN: usize = PRIMARY_HEADER_LEN + SECONDARY_HEADER_LEN;

/// Data length field = octets in the data field minus this constant.
pub const LENGTH_FIELD_OFFSET: usize = 1;

pub const MAX_APID: u16 = 0x07FF;
pub const MAX_SEQUENCE_COUNT: u16 = 0x3FFF;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize + LENGTH_FIELD_OFFSET - SECONDARY_HEADER_LEN;

pub const PACKET_VERSION: u8 = 0;
pub const SEQUENCE_UNSEGMENTED: u8 = 0b11;

const SECONDARY_HEADER_VERSION: u8 = 0x10;
const SECONDARY_HEADER_SPARE: u8 = 0x2F;

/// Acknowledgement message type and subtypes.
pub const ACK_MESSAGE_TYPE: u8 = 1;
pub const ACK_ACCEPTED_SUBTYPE: u8 = 7;
pub const ACK_REJECTED_SUBTYPE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Telemetry = 0,
    Telecommand = 1,
}

impl From<u8> for PacketType {
    fn from(bit: u8) -> Self {
        if bit & 1 == 1 {
            PacketType::Telecommand
        } else {
            PacketType::Telemetry
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePacket {
    pub version: u8,
    pub packet_type: PacketType,
    pub apid: u16,
    pub sequence_flags: u8,
    pub sequence_count: u16,
    pub message_type: u8,
    pub message_subtype: u8,
    pub payload: Vec<u8>,
}

impl SpacePacket {
    /// Telemetry packet as emitted by the PDU.
    #[must_use]
    pub fn telemetry(
        apid: u16,
        sequence_count: u16,
        message_type: u8,
        message_subtype: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PACKET_VERSION,
            packet_type: PacketType::Telemetry,
            apid,
            sequence_flags: SEQUENCE_UNSEGMENTED,
            sequence_count,
            message_type,
            message_subtype,
            payload,
        }
    }

    /// Telecommand packet as sent by the OBC.
    #[must_use]
    pub fn telecommand(
        apid: u16,
        sequence_count: u16,
        message_type: u8,
        message_subtype: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            packet_type: PacketType::Telecommand,
            ..Self::telemetry(apid, sequence_count, message_type, message_subtype, payload)
        }
    }

    pub fn encode(&self) -> PduResult<Vec<u8>> {
        if self.apid > MAX_APID {
            return Err(PduError::Format(format!("apid {:#x} exceeds 11 bits", self.apid)));
        }
        if self.sequence_count > MAX_SEQUENCE_COUNT {
            return Err(PduError::Format(format!(
                "sequence count {} exceeds 14 bits",
                self.sequence_count
            )));
        }
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(PduError::Format(format!(
                "payload of {} bytes overflows the length field",
                self.payload.len()
            )));
        }

        let data_length = (SECONDARY_HEADER_LEN + self.payload.len() - LENGTH_FIELD_OFFSET) as u16;

        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(
            ((self.version & 0x07) << 5)
                | ((self.packet_type as u8) << 4)
                | (1 << 3)
                | ((self.apid >> 8) as u8 & 0x07),
        );
        out.push((self.apid & 0xFF) as u8);
        out.push(((self.sequence_flags & 0x03) << 6) | ((self.sequence_count >> 8) as u8 & 0x3F));
        out.push((self.sequence_count & 0xFF) as u8);
        out.extend_from_slice(&data_length.to_be_bytes());

        out.push(SECONDARY_HEADER_VERSION);
        out.push(self.message_type);
        out.push(self.message_subtype);
        out.push(0x00);
        out.push(SECONDARY_HEADER_SPARE);
        out.extend_from_slice(&[0u8; 7]);

        out.extend_from_slice(&self.payload);
        debug_assert_eq!(out.len(), HEADER_LEN + self.payload.len());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> PduResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PduError::Format(format!(
                "packet of {} bytes is shorter than the {HEADER_LEN}-byte header",
                bytes.len()
            )));
        }

        let version = bytes[0] >> 5;
        let packet_type = PacketType::from(bytes[0] >> 4);
        if bytes[0] & 0x08 == 0 {
            return Err(PduError::Format("secondary header flag not set".to_string()));
        }
        let apid = (u16::from(bytes[0] & 0x07) << 8) | u16::from(bytes[1]);
        let sequence_flags = bytes[2] >> 6;
        let sequence_count = (u16::from(bytes[2] & 0x3F) << 8) | u16::from(bytes[3]);
        let data_length = usize::from(u16::from_be_bytes([bytes[4], bytes[5]]));

        let data_field_len = data_length + LENGTH_FIELD_OFFSET;
        if data_field_len < SECONDARY_HEADER_LEN {
            return Err(PduError::Format(format!(
                "declared data field of {data_field_len} bytes cannot hold the secondary header"
            )));
        }
        let total = PRIMARY_HEADER_LEN + data_field_len;
        if bytes.len() < total {
            return Err(PduError::Format(format!(
                "truncated packet: declared {total} bytes, received {}",
                bytes.len()
            )));
        }

        Ok(Self {
            version,
            packet_type,
            apid,
            sequence_flags,
            sequence_count,
            message_type: bytes[7],
            message_subtype: bytes[8],
            payload: bytes[HEADER_LEN..total].to_vec(),
        })
    }
}
