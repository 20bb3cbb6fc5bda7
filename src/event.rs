//! Watch events and connection-state notifications.
//!
//! Grounded on `kazoo.protocol.states.WatchedEvent`/`KazooState` as used
//! throughout `zake/fake_client.py` and `zake/fake_storage.py`, re-expressed
//! as plain Rust enums instead of duck-typed Python objects.

use serde_derive::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

/// The kind of mutation that produced a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, IntoStaticStr)]
pub enum EventKind {
    Created,
    Deleted,
    Changed,
    Child,
}

/// Connection state, as reported to state listeners.
///
/// `Suspended` is part of the contract-level enum so that recipes compiled
/// against it type-check, but this in-process emulator never raises it
/// itself (there is no real network link to suspend) — see SPEC_FULL §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, IntoStaticStr)]
pub enum State {
    Connected,
    Lost,
    Suspended,
}

/// A single watch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub state: State,
    pub path: String,
}

impl Event {
    pub fn new(kind: EventKind, path: impl Into<String>) -> Self {
        Event {
            kind,
            state: State::Connected,
            path: path.into(),
        }
    }
}

/// A batch of events destined for the same watch list (data or child),
/// scoped to the set of `paths` they should be delivered under.
///
/// Storage and the partial client stage these before any client is
/// informed; see [`crate::storage::Storage::inform`].
#[derive(Debug, Clone)]
pub struct WatchFire {
    pub paths: Vec<String>,
    pub event: Event,
}

impl WatchFire {
    pub fn new(paths: Vec<String>, event: Event) -> Self {
        WatchFire { paths, event }
    }

    pub fn single(path: impl Into<String>, event: Event) -> Self {
        WatchFire {
            paths: vec![path.into()],
            event,
        }
    }
}
