// Frame assembly, CRC and the inbound frame parser
//
// Request (host -> device), marker 0x02:
//   [0x02][type][word:2][len:2][payload][uid:2][crc:2]
// Unsolicited (device -> host), marker 0x02:
//   [0x02][type][word:2][len:2][payload][crc:2]
// Response (device -> host), marker 0x01:
//   [0x01][status][type][word:2][len:2][payload][uid:2][crc:2]
//
// The CRC is CRC-16/MODBUS over every preceding byte, sent low byte first.
// Running the CRC over a whole valid frame, CRC included, yields zero.

use crc::{CRC_16_MODBUS, Crc};
use tracing::{error, trace, warn};

use super::status::{StatusCode, TransactionResult};
use super::value::{CodecError, TransactionValue};

pub const RESPONSE_MARKER: u8 = 0x01;
pub const REQUEST_MARKER: u8 = 0x02;
pub const UNSOLICITED_MARKER: u8 = 0x02;

/// Fewest bytes worth attempting a parse on (an empty unsolicited frame)
pub const MIN_FRAME_LEN: usize = 8;

/// Reserved control word the device uses to report a failed transaction
pub const FAILURE_CONTROL_WORD: u16 = 0x7FFF;

const RESPONSE_HEADER_LEN: usize = 7;
const RESPONSE_TAIL_LEN: usize = 4;
const UNSOLICITED_HEADER_LEN: usize = 6;
const UNSOLICITED_TAIL_LEN: usize = 2;
const REQUEST_HEADER_LEN: usize = 6;
const REQUEST_TAIL_LEN: usize = 4;

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS.checksum(data)
}

/// Check a complete frame whose last two bytes are its CRC
pub fn crc_valid(frame: &[u8]) -> bool {
    frame.len() >= 2 && crc16(frame) == 0
}

fn push_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

fn payload_len(payload: &[u8]) -> Result<u16, CodecError> {
    u16::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLong { len: payload.len() })
}

/// Build a request frame from an already encoded `(tag, payload)` pair
pub fn build_request(
    control_word: u16,
    tag: u8,
    payload: &[u8],
    uid: u16,
) -> Result<Vec<u8>, CodecError> {
    let len = payload_len(payload)?;
    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + payload.len() + REQUEST_TAIL_LEN);
    frame.push(REQUEST_MARKER);
    frame.push(tag);
    frame.extend_from_slice(&control_word.to_be_bytes());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&uid.to_be_bytes());
    push_crc(&mut frame);
    Ok(frame)
}

/// Encode a request frame for `value`
pub fn encode_request(
    control_word: u16,
    value: &TransactionValue,
    uid: u16,
) -> Result<Vec<u8>, CodecError> {
    let (tag, payload) = value.encode()?;
    build_request(control_word, tag, &payload, uid)
}

/// Encode a response frame the way the device does
pub fn encode_response(
    status: StatusCode,
    control_word: u16,
    value: &TransactionValue,
    uid: u16,
) -> Result<Vec<u8>, CodecError> {
    let (tag, payload) = value.encode()?;
    let len = payload_len(&payload)?;
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + payload.len() + RESPONSE_TAIL_LEN);
    frame.push(RESPONSE_MARKER);
    frame.push(status as u8);
    frame.push(tag);
    frame.extend_from_slice(&control_word.to_be_bytes());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&uid.to_be_bytes());
    push_crc(&mut frame);
    Ok(frame)
}

/// Encode an unsolicited (telemetry) frame the way the device does
pub fn encode_unsolicited(
    control_word: u16,
    value: &TransactionValue,
) -> Result<Vec<u8>, CodecError> {
    let (tag, payload) = value.encode()?;
    let len = payload_len(&payload)?;
    let mut frame =
        Vec::with_capacity(UNSOLICITED_HEADER_LEN + payload.len() + UNSOLICITED_TAIL_LEN);
    frame.push(UNSOLICITED_MARKER);
    frame.push(tag);
    frame.extend_from_slice(&control_word.to_be_bytes());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    push_crc(&mut frame);
    Ok(frame)
}

/// A host request as seen from the device side
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub data_type: u8,
    pub control_word: u16,
    pub payload: Vec<u8>,
    pub uid: u16,
}

impl RequestFrame {
    pub fn value(&self) -> Result<TransactionValue, CodecError> {
        TransactionValue::decode(self.data_type, &self.payload)
    }
}

/// Decode one complete request frame. Returns `None` if it is malformed or fails its CRC.
pub fn decode_request(frame: &[u8]) -> Option<RequestFrame> {
    if frame.len() < REQUEST_HEADER_LEN + REQUEST_TAIL_LEN || frame[0] != REQUEST_MARKER {
        return None;
    }
    let len = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if frame.len() != REQUEST_HEADER_LEN + len + REQUEST_TAIL_LEN || !crc_valid(frame) {
        return None;
    }
    let uid_at = REQUEST_HEADER_LEN + len;
    Some(RequestFrame {
        data_type: frame[1],
        control_word: u16::from_be_bytes([frame[2], frame[3]]),
        payload: frame[REQUEST_HEADER_LEN..uid_at].to_vec(),
        uid: u16::from_be_bytes([frame[uid_at], frame[uid_at + 1]]),
    })
}

/// Response correlated to a request by `uid`
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub status: StatusCode,
    pub data_type: u8,
    pub control_word: u16,
    pub payload: Vec<u8>,
    pub uid: u16,
}

impl ResponseFrame {
    pub fn into_result(self) -> Result<TransactionResult, CodecError> {
        let value = TransactionValue::decode(self.data_type, &self.payload)?;
        Ok(TransactionResult::new(self.control_word, value, self.status))
    }
}

/// Device-initiated frame with no uid
#[derive(Debug, Clone, PartialEq)]
pub struct UnsolicitedFrame {
    pub data_type: u8,
    pub control_word: u16,
    pub payload: Vec<u8>,
}

impl UnsolicitedFrame {
    pub fn value(&self) -> Result<TransactionValue, CodecError> {
        TransactionValue::decode(self.data_type, &self.payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response(ResponseFrame),
    Unsolicited(UnsolicitedFrame),
}

enum Parse {
    /// Need more bytes before deciding
    Incomplete,
    /// Head byte cannot start a valid frame
    Invalid,
    Frame(InboundFrame, usize),
}

/// Reassembles inbound frames from a raw byte stream
///
/// Bytes that cannot start a valid frame (unknown marker, CRC mismatch, unknown
/// status) are dropped one at a time until the head lines up with a frame again.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes currently held waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse every complete frame at the head of the buffer
    pub fn drain_frames(&mut self) -> Vec<InboundFrame> {
        let mut frames = Vec::new();
        let max_iterations = self.buffer.len();
        let mut iterations = 0;

        while self.buffer.len() >= MIN_FRAME_LEN && iterations < max_iterations {
            iterations += 1;
            match self.try_parse() {
                Parse::Incomplete => break,
                Parse::Invalid => {
                    warn!(
                        "Frame parse error, dropping 1 byte. Buffer start: {:02X?}",
                        &self.buffer[..self.buffer.len().min(16)]
                    );
                    self.buffer.remove(0);
                }
                Parse::Frame(frame, consumed) => {
                    self.buffer.drain(..consumed);
                    trace!("Parsed frame ({} bytes), {} buffered", consumed, self.buffer.len());
                    frames.push(frame);
                }
            }
        }

        frames
    }

    fn try_parse(&self) -> Parse {
        let buf = &self.buffer;
        match buf[0] {
            RESPONSE_MARKER => {
                let len = u16::from_be_bytes([buf[5], buf[6]]) as usize;
                let total = RESPONSE_HEADER_LEN + len + RESPONSE_TAIL_LEN;
                if buf.len() < total {
                    return Parse::Incomplete;
                }
                let frame = &buf[..total];
                if !crc_valid(frame) {
                    error!("CRC mismatch in response frame. Start: {:02X?}", &frame[..frame.len().min(16)]);
                    return Parse::Invalid;
                }
                let Some(status) = StatusCode::from_u8(frame[1]) else {
                    error!("Unknown status byte 0x{:02X} in response frame", frame[1]);
                    return Parse::Invalid;
                };
                let control_word = u16::from_be_bytes([frame[3], frame[4]]);
                let uid_at = RESPONSE_HEADER_LEN + len;
                let uid = u16::from_be_bytes([frame[uid_at], frame[uid_at + 1]]);
                if control_word == FAILURE_CONTROL_WORD {
                    error!(
                        "Response has FAILURE control word (0x{:04X}). Status: {}, Data Type: 0x{:02X}, UID: {}",
                        FAILURE_CONTROL_WORD, status, frame[2], uid
                    );
                }
                Parse::Frame(
                    InboundFrame::Response(ResponseFrame {
                        status,
                        data_type: frame[2],
                        control_word,
                        payload: frame[RESPONSE_HEADER_LEN..uid_at].to_vec(),
                        uid,
                    }),
                    total,
                )
            }
            UNSOLICITED_MARKER => {
                let len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
                let total = UNSOLICITED_HEADER_LEN + len + UNSOLICITED_TAIL_LEN;
                if buf.len() < total {
                    return Parse::Incomplete;
                }
                let frame = &buf[..total];
                if !crc_valid(frame) {
                    error!("CRC mismatch in unsolicited frame. Start: {:02X?}", &frame[..frame.len().min(16)]);
                    return Parse::Invalid;
                }
                Parse::Frame(
                    InboundFrame::Unsolicited(UnsolicitedFrame {
                        data_type: frame[1],
                        control_word: u16::from_be_bytes([frame[2], frame[3]]),
                        payload: frame[UNSOLICITED_HEADER_LEN..UNSOLICITED_HEADER_LEN + len].to_vec(),
                    }),
                    total,
                )
            }
            other => {
                error!("Unknown start marker: 0x{:02X}", other);
                Parse::Invalid
            }
        }
    }
}
