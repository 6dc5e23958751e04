//! Protocol packets and length-prefixed framing.
//!
//! A packet on the wire is:
//! ```text
//! [type:1][name_len:1][name]   name only for named types
//! [message]                    element stream, only for payload types
//! ```
//! and every packet travels inside a frame with a 4-byte big-endian length.

use std::fmt;

use crate::codec::Reader;
use crate::error::ProtocolError;
use crate::message::{MAX_KEY_LEN, Message};

/// Packet type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// A named command request.
    CmdRequest = 0,
    /// An unnamed response to a command request.
    CmdResponse = 1,
    /// The daemon does not know the requested command.
    CmdUnknown = 2,
    /// Register for a named event.
    EventRegister = 3,
    /// Unregister from a named event.
    EventUnregister = 4,
    /// Register/unregister succeeded.
    EventConfirm = 5,
    /// The daemon does not know the event.
    EventUnknown = 6,
    /// A named event message.
    Event = 7,
}

impl PacketType {
    /// Whether packets of this type carry a name.
    #[must_use]
    pub const fn is_named(self) -> bool {
        matches!(
            self,
            PacketType::CmdRequest
                | PacketType::EventRegister
                | PacketType::EventUnregister
                | PacketType::Event
        )
    }

    /// Whether packets of this type carry a message.
    #[must_use]
    pub const fn has_message(self) -> bool {
        matches!(
            self,
            PacketType::CmdRequest | PacketType::CmdResponse | PacketType::Event
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::CmdRequest),
            1 => Ok(PacketType::CmdResponse),
            2 => Ok(PacketType::CmdUnknown),
            3 => Ok(PacketType::EventRegister),
            4 => Ok(PacketType::EventUnregister),
            5 => Ok(PacketType::EventConfirm),
            6 => Ok(PacketType::EventUnknown),
            7 => Ok(PacketType::Event),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::CmdRequest => "CMD_REQUEST",
            PacketType::CmdResponse => "CMD_RESPONSE",
            PacketType::CmdUnknown => "CMD_UNKNOWN",
            PacketType::EventRegister => "EVENT_REGISTER",
            PacketType::EventUnregister => "EVENT_UNREGISTER",
            PacketType::EventConfirm => "EVENT_CONFIRM",
            PacketType::EventUnknown => "EVENT_UNKNOWN",
            PacketType::Event => "EVENT",
        };
        f.write_str(name)
    }
}

/// One protocol unit.
///
/// Unnamed types never hold a name and payload types always hold a message
/// (possibly empty), so a decoded packet compares equal to the one that was
/// encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    ptype: PacketType,
    name: String,
    message: Option<Message>,
}

impl Packet {
    /// Build a packet, dropping a name or message the type does not carry.
    #[must_use]
    pub fn new(ptype: PacketType, name: impl Into<String>, message: Option<Message>) -> Self {
        let name = if ptype.is_named() {
            name.into()
        } else {
            String::new()
        };
        let message = if ptype.has_message() {
            Some(message.unwrap_or_default())
        } else {
            None
        };
        Self {
            ptype,
            name,
            message,
        }
    }

    #[must_use]
    pub fn command_request(command: impl Into<String>, message: Message) -> Self {
        Self::new(PacketType::CmdRequest, command, Some(message))
    }

    #[must_use]
    pub fn command_response(message: Message) -> Self {
        Self::new(PacketType::CmdResponse, "", Some(message))
    }

    #[must_use]
    pub fn event_register(event: impl Into<String>) -> Self {
        Self::new(PacketType::EventRegister, event, None)
    }

    #[must_use]
    pub fn event_unregister(event: impl Into<String>) -> Self {
        Self::new(PacketType::EventUnregister, event, None)
    }

    #[must_use]
    pub fn event(event: impl Into<String>, message: Message) -> Self {
        Self::new(PacketType::Event, event, Some(message))
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.ptype
    }

    /// The command or event name; empty for unnamed types.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// Take the message, or an empty one for types without a payload.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message.unwrap_or_default()
    }

    /// Encode the packet body (without the frame length prefix).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![self.ptype as u8];
        if self.ptype.is_named() {
            let len = u8::try_from(self.name.len()).map_err(|_| ProtocolError::TooLong {
                what: "packet name",
                len: self.name.len(),
                max: MAX_KEY_LEN,
            })?;
            buf.push(len);
            buf.extend_from_slice(self.name.as_bytes());
        }
        if let Some(message) = &self.message {
            buf.extend_from_slice(&message.encode()?);
        }
        Ok(buf)
    }

    /// Decode a packet body (without the frame length prefix).
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(bytes);
        let ptype = PacketType::try_from(reader.u8()?)?;
        let name = if ptype.is_named() {
            reader.key()?
        } else {
            String::new()
        };

        let rest = reader.rest();
        let message = if ptype.has_message() {
            Some(Message::decode(rest)?)
        } else if !rest.is_empty() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after {ptype} packet",
                rest.len()
            )));
        } else {
            None
        };

        Ok(Self {
            ptype,
            name,
            message,
        })
    }

    /// Encode the packet and wrap it in a frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        FramedMessage::frame(&self.encode()?)
    }
}

/// A length-prefixed frame wrapper.
///
/// Frames are sent as:
/// - 4 bytes: payload length (u32, big-endian)
/// - N bytes: packet payload
#[derive(Debug, Clone)]
pub struct FramedMessage;

impl FramedMessage {
    /// Size of the length prefix.
    pub const HEADER_SIZE: usize = 4;

    /// Largest frame the daemon accepts (512 KiB).
    pub const MAX_SIZE: usize = 512 * 1024;

    /// Frame a payload with a length prefix.
    ///
    /// Fails if the payload does not fit the 32-bit length field. Receivers
    /// apply their own, smaller limit.
    pub fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let header = Self::length_prefix(payload.len())?;
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    fn length_prefix(len: usize) -> Result<[u8; FramedMessage::HEADER_SIZE], ProtocolError> {
        u32::try_from(len)
            .map(u32::to_be_bytes)
            .map_err(|_| ProtocolError::FrameTooLarge {
                len,
                max: u32::MAX as usize,
            })
    }

    /// Read the length prefix from a buffer.
    ///
    /// Returns `None` if the buffer is too small.
    #[must_use]
    pub fn read_length(buf: &[u8]) -> Option<u32> {
        if buf.len() < Self::HEADER_SIZE {
            return None;
        }
        Some(u32::from_be_bytes(buf[0..Self::HEADER_SIZE].try_into().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> Message {
        Message::new().with("test", "hello world!").unwrap()
    }

    #[test]
    fn test_packet_roundtrip() {
        let packets = vec![
            Packet::command_request("version", Message::new()),
            Packet::command_request("list-sas", hello()),
            Packet::command_response(hello()),
            Packet::new(PacketType::CmdUnknown, "", None),
            Packet::event_register("test-event"),
            Packet::event_unregister("test-event"),
            Packet::new(PacketType::EventConfirm, "", None),
            Packet::new(PacketType::EventUnknown, "", None),
            Packet::event("test-event", hello()),
        ];

        for packet in packets {
            let bytes = packet.encode().unwrap();
            let decoded = Packet::decode(&bytes).unwrap();
            assert_eq!(packet, decoded);
        }
    }

    #[test]
    fn test_unnamed_types_drop_name_and_message() {
        let packet = Packet::new(PacketType::EventConfirm, "ignored", Some(hello()));
        assert_eq!(packet.name(), "");
        assert!(packet.message().is_none());
        assert_eq!(packet.encode().unwrap(), vec![5]);
    }

    #[test]
    fn test_payload_types_always_hold_a_message() {
        let packet = Packet::new(PacketType::CmdResponse, "", None);
        assert_eq!(packet.message(), Some(&Message::new()));
        assert_eq!(Packet::decode(&[1]).unwrap(), packet);
    }

    #[test]
    fn test_event_register_layout() {
        let bytes = Packet::event_register("log").encode().unwrap();
        assert_eq!(bytes, vec![3, 3, b'l', b'o', b'g']);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Packet::decode(&[]),
            Err(ProtocolError::Truncated { .. })
        ));
        assert_eq!(
            Packet::decode(&[8]),
            Err(ProtocolError::UnknownPacketType(8))
        );
        // Name length runs past the end
        assert!(Packet::decode(&[3, 10, b'a']).is_err());
        // Confirmations carry nothing
        assert!(matches!(
            Packet::decode(&[5, 0]),
            Err(ProtocolError::Malformed(_))
        ));
        // Broken payload
        assert!(Packet::decode(&[7, 1, b'e', 9]).is_err());
    }

    #[test]
    fn test_name_too_long() {
        let packet = Packet::event_register("e".repeat(256));
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::TooLong { .. })
        ));
    }

    #[test]
    fn test_framed_message() {
        let payload = b"hello world";
        let framed = FramedMessage::frame(payload).unwrap();

        assert_eq!(framed.len(), 4 + payload.len());
        assert_eq!(&framed[..4], &[0, 0, 0, 11]);
        assert_eq!(FramedMessage::read_length(&framed), Some(payload.len() as u32));
        assert_eq!(FramedMessage::read_length(&framed[..3]), None);
        assert_eq!(&framed[4..], payload);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_length_prefix_overflow() {
        let len = u32::MAX as usize + 1;
        assert!(matches!(
            FramedMessage::length_prefix(len),
            Err(ProtocolError::FrameTooLarge { max, .. }) if max == u32::MAX as usize
        ));
        assert_eq!(FramedMessage::length_prefix(11).unwrap(), [0, 0, 0, 11]);
    }

    #[test]
    fn test_to_frame() {
        let frame = Packet::new(PacketType::EventConfirm, "", None).to_frame().unwrap();
        assert_eq!(frame, vec![0, 0, 0, 1, 5]);
    }
}
