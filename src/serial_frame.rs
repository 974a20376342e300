//! Delimited serial framing for the RS-422 link.
//!
//! ```text
//! [0x55][msg_id << 4 | lid][len][payload ...][crc lo][crc hi][0x55]
//! ```
//!
//! Every byte between the delimiters that equals the delimiter or the escape
//! byte is sent as `ESCAPE_BYTE, byte ^ ESCAPE_XOR`. The checksum is
//! CRC-16/CCITT-FALSE over the header, length and payload bytes.
//!
//! Both directions are byte-at-a-time state machines so they can be driven
//! straight from a UART without buffering whole frames.

use heapless::Vec;

use crate::error::{PduError, PduResult};

pub const FRAME_DELIMITER: u8 = 0x55;
pub const ESCAPE_BYTE: u8 = 0x7D;
pub const ESCAPE_XOR: u8 = 0x20;
pub const MAX_PAYLOAD_SIZE: usize = 255;

const CRC_INIT: u16 = 0xFFFF;
const CRC_POLY: u16 = 0x1021;

pub type FramePayload = Vec<u8, MAX_PAYLOAD_SIZE>;

#[must_use]
pub fn crc16_update(mut crc: u16, byte: u8) -> u16 {
    crc ^= u16::from(byte) << 8;
    for _ in 0..8 {
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ CRC_POLY;
        } else {
            crc <<= 1;
        }
    }
    crc
}

#[must_use]
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    bytes.iter().fold(CRC_INIT, |crc, &b| crc16_update(crc, b))
}

fn needs_escape(byte: u8) -> bool {
    byte == FRAME_DELIMITER || byte == ESCAPE_BYTE
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFrame {
    message_id: u8,
    logical_unit_id: u8,
    payload: FramePayload,
}

impl SerialFrame {
    pub fn new(message_id: u8, logical_unit_id: u8, payload: &[u8]) -> PduResult<Self> {
        if message_id > 0x0F || logical_unit_id > 0x0F {
            return Err(PduError::Format(format!(
                "header nibbles out of range: message id {message_id}, logical unit {logical_unit_id}"
            )));
        }
        let payload = FramePayload::from_slice(payload).map_err(|()| {
            PduError::Format(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
                payload.len()
            ))
        })?;
        Ok(Self { message_id, logical_unit_id, payload })
    }

    pub fn from_header(header: u8, payload: &[u8]) -> PduResult<Self> {
        Self::new(header >> 4, header & 0x0F, payload)
    }

    #[must_use]
    pub fn message_id(&self) -> u8 {
        self.message_id
    }

    #[must_use]
    pub fn logical_unit_id(&self) -> u8 {
        self.logical_unit_id
    }

    #[must_use]
    pub fn header(&self) -> u8 {
        (self.message_id << 4) | self.logical_unit_id
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn checksum(&self) -> u16 {
        let crc = crc16_update(CRC_INIT, self.header());
        let crc = crc16_update(crc, self.payload.len() as u8);
        self.payload.iter().fold(crc, |crc, &b| crc16_update(crc, b))
    }

    /// Stuffed wire bytes for the whole frame.
    #[must_use]
    pub fn encode(&self) -> alloc::vec::Vec<u8> {
        FrameSerializer::new(self).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SerializerState {
    Start,
    Header,
    Length,
    Payload,
    ChecksumLow,
    ChecksumHigh,
    End,
    Done,
}

/// Pull-based encoder: one wire byte per call, resumable between calls.
#[derive(Debug)]
pub struct FrameSerializer<'a> {
    frame: &'a SerialFrame,
    state: SerializerState,
    index: usize,
    checksum: u16,
    pending: Option<u8>,
}

impl<'a> FrameSerializer<'a> {
    #[must_use]
    pub fn new(frame: &'a SerialFrame) -> Self {
        Self {
            frame,
            state: SerializerState::Start,
            index: 0,
            checksum: frame.checksum(),
            pending: None,
        }
    }

    #[must_use]
    pub fn has_next_byte(&self) -> bool {
        self.pending.is_some() || self.state != SerializerState::Done
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pending.take() {
            return Some(byte);
        }

        let raw = match self.state {
            SerializerState::Done => return None,
            SerializerState::Start => {
                self.state = SerializerState::Header;
                return Some(FRAME_DELIMITER);
            }
            SerializerState::End => {
                self.state = SerializerState::Done;
                return Some(FRAME_DELIMITER);
            }
            SerializerState::Header => {
                self.state = SerializerState::Length;
                self.frame.header()
            }
            SerializerState::Length => {
                self.state = if self.frame.payload.is_empty() {
                    SerializerState::ChecksumLow
                } else {
                    SerializerState::Payload
                };
                self.frame.payload.len() as u8
            }
            SerializerState::Payload => {
                let byte = self.frame.payload[self.index];
                self.index += 1;
                if self.index == self.frame.payload.len() {
                    self.state = SerializerState::ChecksumLow;
                }
                byte
            }
            SerializerState::ChecksumLow => {
                self.state = SerializerState::ChecksumHigh;
                self.checksum.to_le_bytes()[0]
            }
            SerializerState::ChecksumHigh => {
                self.state = SerializerState::End;
                self.checksum.to_le_bytes()[1]
            }
        };

        if needs_escape(raw) {
            self.pending = Some(raw ^ ESCAPE_XOR);
            Some(ESCAPE_BYTE)
        } else {
            Some(raw)
        }
    }
}

impl Iterator for FrameSerializer<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.next_byte()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeserializeStatus {
    AwaitingMore,
    Complete(SerialFrame),
    ChecksumError { expected: u16, received: u16 },
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeserializerState {
    Hunting,
    Header,
    Length,
    Payload,
    ChecksumLow,
    ChecksumHigh,
    End,
}

/// Push-based decoder fed one wire byte at a time.
#[derive(Debug)]
pub struct FrameDeserializer {
    state: DeserializerState,
    escaped: bool,
    max_payload: usize,
    header: u8,
    length: usize,
    payload: FramePayload,
    received_checksum: [u8; 2],
}

impl Default for FrameDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDeserializer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Receiver with a smaller payload capacity; larger declared lengths overflow.
    #[must_use]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: DeserializerState::Hunting,
            escaped: false,
            max_payload: max_payload.min(MAX_PAYLOAD_SIZE),
            header: 0,
            length: 0,
            payload: FramePayload::new(),
            received_checksum: [0; 2],
        }
    }

    pub fn reset(&mut self) {
        self.state = DeserializerState::Hunting;
        self.escaped = false;
        self.payload.clear();
    }

    fn restart(&mut self) {
        self.state = DeserializerState::Header;
        self.escaped = false;
        self.payload.clear();
    }

    pub fn apply(&mut self, byte: u8) -> DeserializeStatus {
        if byte == FRAME_DELIMITER {
            return self.on_delimiter();
        }
        if self.state == DeserializerState::Hunting {
            return DeserializeStatus::AwaitingMore;
        }
        if byte == ESCAPE_BYTE && !self.escaped {
            self.escaped = true;
            return DeserializeStatus::AwaitingMore;
        }

        let data = if self.escaped { byte ^ ESCAPE_XOR } else { byte };
        self.escaped = false;
        self.on_data(data)
    }

    fn on_delimiter(&mut self) -> DeserializeStatus {
        match self.state {
            DeserializerState::End if !self.escaped => {
                let status = self.finish();
                self.reset();
                status
            }
            // Start of a frame, or a truncated frame followed by a new one.
            _ => {
                self.restart();
                DeserializeStatus::AwaitingMore
            }
        }
    }

    fn on_data(&mut self, data: u8) -> DeserializeStatus {
        match self.state {
            DeserializerState::Hunting => {}
            DeserializerState::Header => {
                self.header = data;
                self.state = DeserializerState::Length;
            }
            DeserializerState::Length => {
                self.length = usize::from(data);
                if self.length > self.max_payload {
                    self.reset();
                    return DeserializeStatus::Overflow;
                }
                self.state = if self.length == 0 {
                    DeserializerState::ChecksumLow
                } else {
                    DeserializerState::Payload
                };
            }
            DeserializerState::Payload => {
                if self.payload.push(data).is_err() {
                    self.reset();
                    return DeserializeStatus::Overflow;
                }
                if self.payload.len() == self.length {
                    self.state = DeserializerState::ChecksumLow;
                }
            }
            DeserializerState::ChecksumLow => {
                self.received_checksum[0] = data;
                self.state = DeserializerState::ChecksumHigh;
            }
            DeserializerState::ChecksumHigh => {
                self.received_checksum[1] = data;
                self.state = DeserializerState::End;
            }
            DeserializerState::End => {
                // More data than the length field declared.
                self.reset();
                return DeserializeStatus::Overflow;
            }
        }
        DeserializeStatus::AwaitingMore
    }

    fn finish(&self) -> DeserializeStatus {
        let received = u16::from_le_bytes(self.received_checksum);
        let frame = SerialFrame {
            message_id: self.header >> 4,
            logical_unit_id: self.header & 0x0F,
            payload: self.payload.clone(),
        };
        let expected = frame.checksum();
        if expected == received {
            DeserializeStatus::Complete(frame)
        } else {
            DeserializeStatus::ChecksumError { expected, received }
        }
    }
}

/// Splits a body into frames sharing one header. Every frame but the last is
/// full; a body that fills its last frame exactly is closed by an empty frame.
pub fn split_payload(header: u8, body: &[u8]) -> PduResult<alloc::vec::Vec<SerialFrame>> {
    let mut frames = alloc::vec::Vec::with_capacity(body.len() / MAX_PAYLOAD_SIZE + 1);
    for chunk in body.chunks(MAX_PAYLOAD_SIZE) {
        frames.push(SerialFrame::from_header(header, chunk)?);
    }
    if body.len() % MAX_PAYLOAD_SIZE == 0 {
        frames.push(SerialFrame::from_header(header, &[])?);
    }
    Ok(frames)
}

/// Rebuilds bodies produced by [`split_payload`].
#[derive(Debug, Default)]
pub struct PayloadAssembler {
    header: Option<u8>,
    body: alloc::vec::Vec<u8>,
}

impl PayloadAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the header byte and the body once the closing frame arrives.
    pub fn push(&mut self, frame: &SerialFrame) -> Option<(u8, alloc::vec::Vec<u8>)> {
        if self.header.is_some_and(|h| h != frame.header()) {
            // Header changed mid-body; the earlier fragments are abandoned.
            self.body.clear();
        }
        self.header = Some(frame.header());
        self.body.extend_from_slice(frame.payload());

        if frame.payload().len() < MAX_PAYLOAD_SIZE {
            self.header = None;
            Some((frame.header(), core::mem::take(&mut self.body)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_escapes_delimiter_in_header() {
        // message id 5, lid 5 -> header 0x55
        let frame = SerialFrame::new(5, 5, &[]).unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes[0], FRAME_DELIMITER);
        assert_eq!(&bytes[1..3], &[ESCAPE_BYTE, FRAME_DELIMITER ^ ESCAPE_XOR]);
        assert_eq!(*bytes.last().unwrap(), FRAME_DELIMITER);
        assert_eq!(bytes.iter().filter(|&&b| b == FRAME_DELIMITER).count(), 2);
    }
}
