//! Small newtypes for the identifiers and timestamps that flow through the
//! coordination tree.
//!
//! These mirror the wire-protocol vocabulary of a real ZooKeeper client
//! (`Zxid`, `SessionId`, `Version`, ...) so that recipes written against that
//! vocabulary compile unchanged against this emulator, even though no bytes
//! of any of these ever cross a socket here.

use serde_derive::{Deserialize, Serialize};

/// A transaction id. This emulator does not maintain a globally ordered
/// transaction log, so `Zxid` values here are derived from a node's
/// [`Version`](crate::ids::Version) rather than from any real commit order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Zxid(pub i64);

/// Wall-clock milliseconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

/// A znode's data version. Starts at 0 on creation and increments by one on
/// every successful `set`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub i32);

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel accepted by `set`/`delete`/`check` meaning "don't check the
/// version".
pub const ANY_VERSION: Version = Version(-1);

/// A client session identifier, assigned fresh on every `Client::start` and
/// non-zero for the lifetime of the session. Zero means "no session".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub i64);

impl SessionId {
    pub const NONE: SessionId = SessionId(0);

    pub fn is_some(&self) -> bool {
        self.0 != 0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::NONE
    }
}
