use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_ID_SIZE, PEER_PK_SIZE};

// Peer identity = public key (32 bytes)
//
// Construction never fails: key material of the wrong length produces the
// explicit empty identity, observable through `is_empty`.  Network and UI
// layers hand these around by value; comparisons are byte-wise.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerPk(Option<[u8; PEER_PK_SIZE]>);

impl PeerPk {
    /// Wrap raw key material.  Any slice that is not exactly
    /// [`PEER_PK_SIZE`] bytes long yields the empty identity.
    pub fn from_bytes(raw: &[u8]) -> Self {
        match <[u8; PEER_PK_SIZE]>::try_from(raw) {
            Ok(arr) => Self(Some(arr)),
            Err(_) => Self(None),
        }
    }

    /// Parse the hex rendering produced by [`to_hex`](Self::to_hex).
    /// Invalid hex or a wrong length yields the empty identity.
    pub fn from_hex(s: &str) -> Self {
        match hex::decode(s) {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(_) => Self(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The raw key bytes, or `None` for the empty identity.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_ref().map(|arr| arr.as_slice())
    }

    /// Uppercase hex rendering; the empty identity renders as an empty string.
    pub fn to_hex(&self) -> String {
        match &self.0 {
            Some(arr) => hex::encode_upper(arr),
            None => String::new(),
        }
    }

    /// First eight hex digits, for logs.
    pub fn short(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl std::fmt::Display for PeerPk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Group identity (16 bytes)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(Option<[u8; GROUP_ID_SIZE]>);

impl GroupId {
    /// Wrap a raw group identifier.  Any slice that is not exactly
    /// [`GROUP_ID_SIZE`] bytes long yields the empty identity.
    pub fn from_bytes(raw: &[u8]) -> Self {
        match <[u8; GROUP_ID_SIZE]>::try_from(raw) {
            Ok(arr) => Self(Some(arr)),
            Err(_) => Self(None),
        }
    }

    /// Parse the hex rendering produced by [`to_hex`](Self::to_hex).
    /// Invalid hex or a wrong length yields the empty identity.
    pub fn from_hex(s: &str) -> Self {
        match hex::decode(s) {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(_) => Self(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The raw identifier bytes, or `None` for the empty identity.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_ref().map(|arr| arr.as_slice())
    }

    /// Uppercase hex rendering; the empty identity renders as an empty string.
    pub fn to_hex(&self) -> String {
        match &self.0 {
            Some(arr) => hex::encode_upper(arr),
            None => String::new(),
        }
    }

    /// First eight hex digits, for logs.
    pub fn short(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Either side of a conversation: a direct peer or a group.
///
/// The two identity kinds are distinct types and never interchangeable;
/// this enum is the one handle APIs accept when either kind is fine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChatId {
    Peer(PeerPk),
    Group(GroupId),
}

impl ChatId {
    /// Rebuild an identity from stored bytes, dispatching on length:
    /// 32 bytes is a peer key, 16 a group id, anything else empty.
    pub fn from_raw(raw: &[u8]) -> Self {
        match raw.len() {
            PEER_PK_SIZE => Self::Peer(PeerPk::from_bytes(raw)),
            GROUP_ID_SIZE => Self::Group(GroupId::from_bytes(raw)),
            _ => Self::Peer(PeerPk::default()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Peer(pk) => pk.is_empty(),
            Self::Group(id) => id.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Peer(pk) => pk.as_bytes(),
            Self::Group(id) => id.as_bytes(),
        }
    }

    pub fn to_hex(&self) -> String {
        match self {
            Self::Peer(pk) => pk.to_hex(),
            Self::Group(id) => id.to_hex(),
        }
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::Peer(PeerPk::default())
    }
}

impl From<PeerPk> for ChatId {
    fn from(pk: PeerPk) -> Self {
        Self::Peer(pk)
    }
}

impl From<GroupId> for ChatId {
    fn from(id: GroupId) -> Self {
        Self::Group(id)
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
