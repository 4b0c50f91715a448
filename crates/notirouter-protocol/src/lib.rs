//! Wire codec and message types for notirouter.
//!
//! Clients talk to the router over a plain byte stream. Every message starts
//! with a one-byte discriminant; the remaining fields are either fixed width
//! or length-prefixed, so consecutive messages on one stream never need an
//! outer frame.
//!
//! # Wire format
//!
//! Multi-byte integers are big-endian, strings are UTF-8.
//!
//! ```text
//! Notification   'N' | emitter_len:u8 | emitter | receptor:u8 | payload_len:u16 | payload
//! Listing        'L' | requested_count:u8
//! ListingReply   'l' | entry_count:u16 | { address:u8 | name_len:u8 | name }*
//! Register       'R' | requested_address:u8 | name_len:u8 | name
//! RegisterReply  'r' | outcome:u8 | assigned_address:u8
//! Disconnect     'D'
//! ```
//!
//! Any other leading byte decodes to [`Message::Unknown`]. The router answers
//! malformed or unknown input with the single byte [`ERROR_BYTE`].
//!
//! # Example
//!
//! ```rust
//! use notirouter_protocol::{Address, Message, decode, encode};
//!
//! let message = Message::register(Address::new(5), "alice");
//! let bytes = encode(&message).unwrap();
//! assert_eq!(bytes[0], b'R');
//! assert_eq!(decode(&bytes).unwrap(), message);
//! ```

mod error;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{Frame, FrameReader, FrameWriter, decode, decode_frame, encode};
pub use types::{Address, ListingEntry, Message, RegisterOutcome};

/// Discriminant of a notification.
pub const NOTIFICATION_CODE: u8 = b'N';

/// Discriminant of a listing request.
pub const LISTING_CODE: u8 = b'L';

/// Discriminant of a listing reply.
pub const LISTING_REPLY_CODE: u8 = b'l';

/// Discriminant of a registration request.
pub const REGISTER_CODE: u8 = b'R';

/// Discriminant of a registration reply.
pub const REGISTER_REPLY_CODE: u8 = b'r';

/// Discriminant of a disconnect request.
pub const DISCONNECT_CODE: u8 = b'D';

/// Single byte sent back for malformed or unknown messages.
pub const ERROR_BYTE: u8 = 0x00;

/// Longest name (emitter or user) a one-byte length prefix can carry.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Longest notification payload.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Most entries a listing reply can carry.
pub const MAX_LISTING_ENTRIES: usize = u16::MAX as usize;
