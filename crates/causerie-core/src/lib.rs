//! # causerie-core
//!
//! Identity primitives shared by every causerie crate.
//!
//! A conversation partner is identified by raw key material: a 32-byte
//! public key for a peer, a 16-byte identifier for a group.  Both are
//! wrapped in fixed-length newtypes that compare and hash byte-wise, and
//! [`ChatId`] closes the two kinds into a single handle the storage and
//! messaging layers can accept.

pub mod constants;
pub mod types;

pub use types::{ChatId, GroupId, PeerPk};
