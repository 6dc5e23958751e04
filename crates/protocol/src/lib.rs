//! VICI Protocol - wire types for the daemon's control interface.
//!
//! This crate provides:
//! - [`Message`], the ordered key/section/list document, and its codec
//! - [`Packet`] and [`PacketType`] for the packet layer
//! - [`FramedMessage`] for the 4-byte length-prefixed framing
//! - Socket path helpers via [`get_socket_path`]
//!
//! It performs no I/O.
//!
//! # Example
//!
//! ```rust
//! use vici_protocol::{Message, Packet, PacketType};
//!
//! let mut msg = Message::new();
//! msg.set("ike", "gw-gw").unwrap();
//!
//! let request = Packet::command_request("initiate", msg);
//! let bytes = request.encode().unwrap();
//!
//! let decoded = Packet::decode(&bytes).unwrap();
//! assert_eq!(decoded.packet_type(), PacketType::CmdRequest);
//! assert_eq!(decoded.name(), "initiate");
//! assert_eq!(decoded.message().unwrap().scalar("ike").unwrap(), Some("gw-gw"));
//! ```

mod codec;
mod error;
mod message;
mod packet;
mod socket;

// Re-export main types at crate root
pub use codec::{decode_message, encode_message};
pub use error::{CommandFailed, ProtocolError, TypeMismatch};
pub use message::{MAX_KEY_LEN, MAX_VALUE_LEN, Message, Value, ValueKind};
pub use packet::{FramedMessage, Packet, PacketType};
pub use socket::{DEFAULT_SOCKET_PATH, SOCKET_ENV_VAR, get_socket_path};
