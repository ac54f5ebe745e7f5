/// Peer public key size in bytes
pub const PEER_PK_SIZE: usize = 32;

/// Group identifier size in bytes
pub const GROUP_ID_SIZE: usize = 16;
