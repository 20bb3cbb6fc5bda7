//! An in-process emulator of a hierarchical coordination service, for
//! exercising coordination recipes (leader election, locks, queues, ...)
//! without a real quorum.
//!
//! [`Storage`](storage::Storage) holds a single shared znode tree; any number
//! of [`Client`](client::Client) handles can attach to it, each with its own
//! session, watch registry and dispatch thread, so multi-client coordination
//! scenarios can be exercised within a single test process.
//!
//! ```
//! use zk_emulator::client::Client;
//! use zk_emulator::storage::Storage;
//!
//! let storage = Storage::new();
//! let client = Client::new(storage);
//! client.start().unwrap();
//! client.create("/lock", Vec::new(), false, false, false).unwrap();
//! assert!(client.exists("/lock", None).unwrap());
//! client.stop();
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod ids;
pub mod partial_client;
pub mod path;
pub mod storage;
pub mod transaction;
pub mod watch;
pub mod znode;

pub use client::Client;
pub use error::{Error, Result};
pub use event::{Event, EventKind, State};
pub use storage::Storage;
