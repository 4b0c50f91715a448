//! Message types for the notirouter protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    DISCONNECT_CODE, LISTING_CODE, LISTING_REPLY_CODE, NOTIFICATION_CODE, REGISTER_CODE,
    REGISTER_REPLY_CODE,
};

/// One-byte address naming a registry slot.
///
/// Address 0 is reserved for the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u8);

impl Address {
    /// The reserved server address.
    pub const SERVER: Address = Address(0);

    /// Creates an address from its raw byte.
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Returns the raw byte.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns true for the reserved server address.
    pub const fn is_server(self) -> bool {
        self.0 == 0
    }

    /// Returns the slot index of this address.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the next client address, wrapping past 255 back to 1.
    pub const fn next_client(self) -> Address {
        match self.0 {
            u8::MAX => Address(1),
            n => Address(n + 1),
        }
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// The requested address was granted.
    Accepted,
    /// The requested address was taken; another one was assigned.
    ReassignedAddress,
    /// Every slot is occupied.
    ServerFull,
}

impl RegisterOutcome {
    /// Returns the wire code of this outcome.
    pub const fn code(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::ReassignedAddress => 1,
            Self::ServerFull => 2,
        }
    }

    /// Parses a wire code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Accepted),
            1 => Some(Self::ReassignedAddress),
            2 => Some(Self::ServerFull),
            _ => None,
        }
    }

    /// Returns true if the client now owns a slot.
    pub const fn is_registered(self) -> bool {
        !matches!(self, Self::ServerFull)
    }
}

impl fmt::Display for RegisterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::ReassignedAddress => write!(f, "reassigned address"),
            Self::ServerFull => write!(f, "server full"),
        }
    }
}

/// One directory entry in a listing reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    /// Slot address.
    pub address: Address,
    /// Registered display name.
    pub name: String,
}

impl ListingEntry {
    /// Creates a listing entry.
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }
}

/// Every message that can travel on a router connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Opaque payload addressed to another client.
    Notification {
        /// Display name of the sender.
        emitter: String,
        /// Address of the recipient.
        receptor: Address,
        /// Payload, forwarded untouched.
        payload: Vec<u8>,
    },

    /// Request for the directory.
    Listing {
        /// Maximum number of client entries wanted (0 = all).
        requested_count: u8,
    },

    /// Directory snapshot in ascending address order.
    ListingReply {
        /// Occupied slots.
        entries: Vec<ListingEntry>,
    },

    /// Request to occupy a slot.
    Register {
        /// Address the client would like.
        requested_address: Address,
        /// Display name.
        name: String,
    },

    /// Answer to a registration.
    RegisterReply {
        /// What happened.
        outcome: RegisterOutcome,
        /// Address now owned by the client (0 when the server is full).
        assigned_address: Address,
    },

    /// Release the slot owned by this connection.
    Disconnect,

    /// Unrecognised leading byte.
    Unknown {
        /// The offending discriminant.
        raw_first_byte: u8,
    },
}

impl Message {
    /// Creates a Notification message.
    pub fn notification(
        emitter: impl Into<String>,
        receptor: Address,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self::Notification {
            emitter: emitter.into(),
            receptor,
            payload: payload.into(),
        }
    }

    /// Creates a Listing request.
    pub fn listing(requested_count: u8) -> Self {
        Self::Listing { requested_count }
    }

    /// Creates a ListingReply message.
    pub fn listing_reply(entries: Vec<ListingEntry>) -> Self {
        Self::ListingReply { entries }
    }

    /// Creates a Register request.
    pub fn register(requested_address: Address, name: impl Into<String>) -> Self {
        Self::Register {
            requested_address,
            name: name.into(),
        }
    }

    /// Creates a RegisterReply message.
    pub fn register_reply(outcome: RegisterOutcome, assigned_address: Address) -> Self {
        Self::RegisterReply {
            outcome,
            assigned_address,
        }
    }

    /// Returns the leading byte this message is encoded with.
    pub fn discriminant(&self) -> u8 {
        match self {
            Self::Notification { .. } => NOTIFICATION_CODE,
            Self::Listing { .. } => LISTING_CODE,
            Self::ListingReply { .. } => LISTING_REPLY_CODE,
            Self::Register { .. } => REGISTER_CODE,
            Self::RegisterReply { .. } => REGISTER_REPLY_CODE,
            Self::Disconnect => DISCONNECT_CODE,
            Self::Unknown { raw_first_byte } => *raw_first_byte,
        }
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::Listing { .. } => "listing",
            Self::ListingReply { .. } => "listing_reply",
            Self::Register { .. } => "register",
            Self::RegisterReply { .. } => "register_reply",
            Self::Disconnect => "disconnect",
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_client_wraps_past_server() {
        assert_eq!(Address::new(5).next_client(), Address::new(6));
        assert_eq!(Address::new(255).next_client(), Address::new(1));
        assert_eq!(Address::SERVER.next_client(), Address::new(1));
    }

    #[test]
    fn outcome_codes() {
        for outcome in [
            RegisterOutcome::Accepted,
            RegisterOutcome::ReassignedAddress,
            RegisterOutcome::ServerFull,
        ] {
            assert_eq!(RegisterOutcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(RegisterOutcome::from_code(3), None);
        assert!(!RegisterOutcome::ServerFull.is_registered());
    }

    #[test]
    fn unknown_keeps_its_byte() {
        let message = Message::Unknown {
            raw_first_byte: 0x7f,
        };
        assert_eq!(message.discriminant(), 0x7f);
        assert_eq!(message.kind(), "unknown");
    }

    #[test]
    fn listing_entries_json() {
        let entries = vec![
            ListingEntry::new(Address::SERVER, "Server"),
            ListingEntry::new(Address::new(7), "alice"),
        ];
        insta::assert_json_snapshot!(entries, @r###"
        [
          {
            "address": 0,
            "name": "Server"
          },
          {
            "address": 7,
            "name": "alice"
          }
        ]
        "###);
    }
}
