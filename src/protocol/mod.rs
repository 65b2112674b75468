// SPDX-License-Identifier: (Apache-2.0)
// Copyright Authors of rain-driver

//! The control-pipe wire protocol.
//!
//! Each connection carries exactly one request frame followed by exactly one
//! reply frame. A frame is a big-endian `u32` body length followed by the
//! body:
//!
//! ```text
//! +---------+--------------+----------------+
//! | version | message type | payload ...    |
//! |   i32   |     i32      |                |
//! +---------+--------------+----------------+
//! ```
//!
//! Strings are a `u32` byte length followed by UTF-8. Lists are a `u32`
//! element count followed by the elements.

use crate::workload::LoadProfile;
use bytes::{Buf, BufMut, BytesMut};
use core::fmt;
use std::io::{Read, Write};

pub const VERSION_1: i32 = 1;

/// Frames larger than this are refused without reading the body.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageType {
    Unknown = 0,
    Status = 1,
    DynamicLoadProfile = 3,
    BenchmarkStart = 5,
    ErrorMessage = 7,
    TrackListRequest = 8,
    TrackListReply = 9,
}

impl MessageType {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Status),
            3 => Some(Self::DynamicLoadProfile),
            5 => Some(Self::BenchmarkStart),
            7 => Some(Self::ErrorMessage),
            8 => Some(Self::TrackListRequest),
            9 => Some(Self::TrackListReply),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: i32,
    pub message_type: i32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            version: VERSION_1,
            message_type: message_type as i32,
        }
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Version: {} Message type: {}]",
            self.version, self.message_type
        )
    }
}

/// Reply status. Tracks may return their own codes, which are relayed to the
/// controller unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const ERROR: StatusCode = StatusCode(1775);
    pub const ERROR_TRACK_NOT_FOUND: StatusCode = StatusCode(1776);
    pub const ERROR_UNEXPECTED_MESSAGE_TYPE: StatusCode = StatusCode(1779);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A load profile pushed by the controller for a named track. The interval is
/// carried in milliseconds, the transition time in seconds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicLoadProfile {
    pub dest_track_name: String,
    pub interval_millis: i64,
    pub transition_time_secs: i64,
    pub number_of_users: i32,
    pub mix_name: String,
    pub name: String,
}

impl DynamicLoadProfile {
    /// Values too large for their wire field saturate at the field maximum.
    pub fn new(dest_track_name: impl Into<String>, profile: &LoadProfile) -> Self {
        Self {
            dest_track_name: dest_track_name.into(),
            interval_millis: i64::try_from(profile.interval().as_millis()).unwrap_or(i64::MAX),
            transition_time_secs: i64::try_from(profile.transition_time().as_secs())
                .unwrap_or(i64::MAX),
            number_of_users: i32::try_from(profile.number_of_users()).unwrap_or(i32::MAX),
            mix_name: profile.mix_name().to_string(),
            name: profile.name().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Status { code: StatusCode },
    DynamicLoadProfile(DynamicLoadProfile),
    BenchmarkStart { controller_timestamp: i64 },
    TrackListRequest,
    TrackListReply { track_names: Vec<String> },
    /// Any other message type. The payload is skipped.
    Unrecognized { header: MessageHeader },
}

impl Message {
    pub fn status(code: StatusCode) -> Self {
        Self::Status { code }
    }

    pub fn header(&self) -> MessageHeader {
        match self {
            Self::Status { .. } => MessageHeader::new(MessageType::Status),
            Self::DynamicLoadProfile(_) => MessageHeader::new(MessageType::DynamicLoadProfile),
            Self::BenchmarkStart { .. } => MessageHeader::new(MessageType::BenchmarkStart),
            Self::TrackListRequest => MessageHeader::new(MessageType::TrackListRequest),
            Self::TrackListReply { .. } => MessageHeader::new(MessageType::TrackListReply),
            Self::Unrecognized { header } => *header,
        }
    }

    /// Appends one complete frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        let header = self.header();
        body.put_i32(header.version);
        body.put_i32(header.message_type);

        match self {
            Self::Status { code } => body.put_i32(code.0),
            Self::DynamicLoadProfile(p) => {
                put_string(&mut body, &p.dest_track_name);
                body.put_i64(p.interval_millis);
                body.put_i64(p.transition_time_secs);
                body.put_i32(p.number_of_users);
                put_string(&mut body, &p.mix_name);
                put_string(&mut body, &p.name);
            }
            Self::BenchmarkStart {
                controller_timestamp,
            } => body.put_i64(*controller_timestamp),
            Self::TrackListRequest => {}
            Self::TrackListReply { track_names } => {
                body.put_u32(track_names.len() as u32);
                for name in track_names {
                    put_string(&mut body, name);
                }
            }
            Self::Unrecognized { .. } => {}
        }

        buf.reserve(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
    }

    /// Parses a frame body (everything after the length prefix).
    pub fn decode(mut body: &[u8]) -> Result<Self, DecodeError> {
        let version = get_i32(&mut body)?;
        let message_type = get_i32(&mut body)?;
        let header = MessageHeader {
            version,
            message_type,
        };

        let message = match MessageType::from_wire(message_type) {
            Some(MessageType::Status) => Self::Status {
                code: StatusCode(get_i32(&mut body)?),
            },
            Some(MessageType::DynamicLoadProfile) => {
                Self::DynamicLoadProfile(DynamicLoadProfile {
                    dest_track_name: get_string(&mut body)?,
                    interval_millis: get_i64(&mut body)?,
                    transition_time_secs: get_i64(&mut body)?,
                    number_of_users: get_i32(&mut body)?,
                    mix_name: get_string(&mut body)?,
                    name: get_string(&mut body)?,
                })
            }
            Some(MessageType::BenchmarkStart) => Self::BenchmarkStart {
                controller_timestamp: get_i64(&mut body)?,
            },
            Some(MessageType::TrackListRequest) => Self::TrackListRequest,
            Some(MessageType::TrackListReply) => {
                let count = get_u32(&mut body)? as usize;
                // each name needs at least its length prefix
                if count > body.remaining() / 4 {
                    return Err(DecodeError::Truncated);
                }
                let mut track_names = Vec::with_capacity(count);
                for _ in 0..count {
                    track_names.push(get_string(&mut body)?);
                }
                Self::TrackListReply { track_names }
            }
            Some(MessageType::Unknown) | Some(MessageType::ErrorMessage) | None => {
                Self::Unrecognized { header }
            }
        };

        Ok(message)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the limit of {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge(usize),
    #[error("frame ended before the message was complete")]
    Truncated,
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

/// Reads exactly one frame and decodes it.
pub fn read_message<R: Read + ?Sized>(reader: &mut R) -> Result<Message, DecodeError> {
    let mut len = [0; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(DecodeError::FrameTooLarge(len));
    }

    let mut body = vec![0; len];
    reader.read_exact(&mut body)?;
    Message::decode(&body)
}

/// Encodes and writes one frame. Does not flush.
pub fn write_message<W: Write + ?Sized>(writer: &mut W, message: &Message) -> std::io::Result<()> {
    let mut buf = BytesMut::new();
    message.encode(&mut buf);
    writer.write_all(&buf)
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_i32(buf: &mut &[u8]) -> Result<i32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_i32())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u32())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    if buf.remaining() < 8 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_i64())
}

fn get_string(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_string();
    buf.advance(len);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn frame(message: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn dynamic_profile_survives_the_wire() {
        let profile = LoadProfile::new(Duration::from_secs(30), 500, "default")
            .with_transition_time(Duration::from_secs(5))
            .with_name("dlp-0");
        let message = Message::DynamicLoadProfile(DynamicLoadProfile::new("track-002", &profile));

        let bytes = frame(&message);
        let decoded = read_message(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, message);

        match decoded {
            Message::DynamicLoadProfile(p) => {
                assert_eq!(p.interval_millis, 30_000);
                assert_eq!(p.transition_time_secs, 5);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn oversized_profile_values_saturate() {
        let profile = LoadProfile::new(Duration::MAX, u32::MAX, "default")
            .with_transition_time(Duration::from_secs(u64::MAX));
        let wire = DynamicLoadProfile::new("track-001", &profile);
        assert_eq!(wire.number_of_users, i32::MAX);
        assert_eq!(wire.interval_millis, i64::MAX);
        assert_eq!(wire.transition_time_secs, i64::MAX);

        // in-range values pass through unchanged
        let profile = LoadProfile::new(Duration::from_millis(1500), i32::MAX as u32, "default");
        let wire = DynamicLoadProfile::new("track-001", &profile);
        assert_eq!(wire.number_of_users, i32::MAX);
        assert_eq!(wire.interval_millis, 1500);
        assert_eq!(wire.transition_time_secs, 0);
    }

    #[test]
    fn track_list_reply_keeps_order() {
        let message = Message::TrackListReply {
            track_names: vec!["b".into(), "a".into(), "".into()],
        };
        let decoded = read_message(&mut Cursor::new(frame(&message))).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn unknown_types_are_valid_on_the_wire() {
        let mut body = BytesMut::new();
        body.put_i32(VERSION_1);
        body.put_i32(42);
        body.put_slice(b"ignored payload");

        let decoded = Message::decode(&body).unwrap();
        assert_eq!(
            decoded,
            Message::Unrecognized {
                header: MessageHeader {
                    version: VERSION_1,
                    message_type: 42
                }
            }
        );

        let error_message = Message::Unrecognized {
            header: MessageHeader::new(MessageType::ErrorMessage),
        };
        let decoded = read_message(&mut Cursor::new(frame(&error_message))).unwrap();
        assert_eq!(decoded, error_message);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let bytes = frame(&Message::BenchmarkStart {
            controller_timestamp: 1234,
        });

        // cut inside the body
        let mut short = bytes[..bytes.len() - 3].to_vec();
        assert!(matches!(
            read_message(&mut Cursor::new(short.clone())),
            Err(DecodeError::Io(_))
        ));

        // consistent length prefix but missing payload
        short.truncate(4 + 8);
        short[..4].copy_from_slice(&8u32.to_be_bytes());
        assert!(matches!(
            read_message(&mut Cursor::new(short)),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            read_message(&mut Cursor::new(bytes)),
            Err(DecodeError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn header_display() {
        let header = MessageHeader::new(MessageType::TrackListRequest);
        assert_eq!(header.to_string(), "[Version: 1 Message type: 8]");
    }
}
