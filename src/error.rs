//! The contract-level error taxonomy.
//!
//! Names and shape are carried over from the teacher library's `ErrorCode`
//! enum (`proto::proto::ErrorCode`), narrowed to the subset this emulator
//! actually raises, and turned into a `failure::Fail` so each variant can
//! carry the context (path, expected/actual version, ...) a caller needs.

use failure::Fail;

use crate::ids::Version;

#[derive(Debug, Clone, Fail, PartialEq, Eq)]
pub enum Error {
    #[fail(display = "node {} does not exist", path)]
    NoNode { path: String },

    #[fail(display = "node {} already exists", path)]
    NodeExists { path: String },

    #[fail(display = "version mismatch on {}: expected {}, found {}", path, expected, actual)]
    BadVersion {
        path: String,
        expected: Version,
        actual: Version,
    },

    #[fail(display = "node {} is not empty", path)]
    NotEmpty { path: String },

    #[fail(display = "parent of {} is ephemeral, it cannot have children", path)]
    NoChildrenForEphemerals { path: String },

    #[fail(display = "ephemeral node {} requires an attached session", path)]
    SystemZookeeper { path: String },

    #[fail(display = "bad arguments: {}", message)]
    BadArguments { message: String },

    #[fail(display = "connection has been closed")]
    ConnectionClosed,

    #[fail(display = "session has expired")]
    SessionExpired,

    #[fail(display = "transport connection was lost")]
    ConnectionLoss,

    #[fail(display = "operation timed out")]
    OperationTimeout,

    #[fail(display = "ACLs are not currently supported")]
    NotImplemented,

    #[fail(display = "runtime error: {}", message)]
    Runtime { message: String },

    /// Only ever appears inside a transaction's result vector, never as a
    /// top-level `Err` — see [`crate::transaction`].
    #[fail(display = "operation was rolled back")]
    RolledBack,

    /// Only ever appears inside a transaction's result vector, as padding
    /// after the operation that actually failed.
    #[fail(display = "transaction left in an inconsistent state")]
    RuntimeInconsistency,
}

impl Error {
    /// The transient subset of errors a [`crate::config::RetryPolicy`] will
    /// retry on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLoss | Error::OperationTimeout | Error::SessionExpired
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
