//! The `Znode` record and the `Stat` view projected from it.
//!
//! Grounded on `proto::mod::Stat`/`StatPersisted` for field shape and on
//! `zake/fake_storage.py`'s `_make_znode` for which fields are derived versus
//! stored.

use serde_derive::{Deserialize, Serialize};

use crate::ids::{SessionId, Timestamp, Version, Zxid};

/// A node of the coordination tree.
#[derive(Debug, Clone)]
pub struct Znode {
    pub data: Vec<u8>,
    pub version: Version,
    /// Reserved, fixed at -1: ACLs are not supported.
    pub aversion: Version,
    /// Reserved, fixed at -1: child versioning is not supported.
    pub cversion: Version,
    pub created_on: Timestamp,
    pub updated_on: Timestamp,
    pub ephemeral: bool,
    pub ephemeral_owner: SessionId,
}

impl Znode {
    pub fn new(data: Vec<u8>, now: Timestamp, ephemeral_owner: Option<SessionId>) -> Self {
        Znode {
            data,
            version: Version(0),
            aversion: Version(-1),
            cversion: Version(-1),
            created_on: now,
            updated_on: now,
            ephemeral: ephemeral_owner.is_some(),
            ephemeral_owner: ephemeral_owner.unwrap_or_default(),
        }
    }

    pub fn to_stat(&self, num_children: i32) -> Stat {
        // The real service derives czxid/mzxid/pzxid from the transaction
        // log's commit order; this emulator has no such log, so a node's
        // own version stands in for all three (see SPEC_FULL §3).
        let zxid = Zxid(i64::from(self.version.0));
        Stat {
            czxid: zxid,
            mzxid: zxid,
            pzxid: zxid,
            ctime: self.created_on,
            mtime: self.updated_on,
            version: self.version,
            cversion: self.cversion,
            aversion: self.aversion,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len() as i32,
            num_children,
        }
    }
}

/// Information shared with callers; a read-only projection of a [`Znode`]
/// plus its children count, which storage alone can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub czxid: Zxid,
    pub mzxid: Zxid,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub version: Version,
    pub cversion: Version,
    pub aversion: Version,
    pub ephemeral_owner: SessionId,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: Zxid,
}
