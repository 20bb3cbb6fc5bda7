//! The internal operation surface that mutates the tree but never touches a
//! client: every operation returns `(result, data_events, child_events)`
//! instead of firing them, so the transaction engine can stage several of
//! these and defer fan-out until a whole transaction has committed.
//!
//! Grounded on `zake/fake_client.py`'s `_PartialClient`.

use crate::error::{Error, Result};
use crate::event::{Event, EventKind, WatchFire};
use crate::ids::{SessionId, Version, ANY_VERSION};
use crate::path;
use crate::storage::Storage;
use crate::znode::Stat;

/// Result of a mutating operation, plus the child- and data-watch events it
/// produced (not yet delivered to anyone).
#[derive(Debug)]
pub struct Staged<T> {
    pub value: T,
    pub data_events: Vec<WatchFire>,
    pub child_events: Vec<WatchFire>,
}

impl<T> Staged<T> {
    fn new(value: T) -> Self {
        Staged {
            value,
            data_events: Vec::new(),
            child_events: Vec::new(),
        }
    }
}

/// Stateless except for the session id new ephemeral nodes should be
/// attributed to.
#[derive(Clone)]
pub struct PartialClient {
    storage: Storage,
}

impl PartialClient {
    pub fn new(storage: Storage) -> Self {
        PartialClient { storage }
    }

    pub fn set(&self, path: &str, value: Vec<u8>, version: Version) -> Result<Staged<Stat>> {
        let path = path::normalize(path, false);
        let stat = self.storage.set(&path, value, version)?;
        let mut staged = Staged::new(stat);
        staged
            .data_events
            .push(WatchFire::single(path.clone(), Event::new(EventKind::Changed, path)));
        Ok(staged)
    }

    /// Creates `path`. If `makepath` is set and an ancestor is missing, it is
    /// created first by recursing into this same method (not through the
    /// client facade) so that the whole operation — however many ancestors
    /// it had to synthesize — produces exactly one aggregated set of events
    /// for the caller to inform (SPEC_FULL §4.5, resolving the source's
    /// "makepath recursion target" open question).
    pub fn create(
        &self,
        path: &str,
        value: Vec<u8>,
        ephemeral: bool,
        sequence: bool,
        makepath: bool,
        session_id: Option<SessionId>,
    ) -> Result<Staged<String>> {
        let path = path::normalize(path, sequence);
        let mut data_events = Vec::new();
        let mut child_events = Vec::new();

        if makepath {
            let ancestors = path::partition(&path);
            // partition() includes `path` itself as the last, deepest entry;
            // only synthesize the ones strictly above it.
            for ancestor in &ancestors[..ancestors.len().saturating_sub(1)] {
                if !self.storage.exists(ancestor) {
                    let staged = self.create(ancestor, Vec::new(), false, false, false, session_id)?;
                    data_events.extend(staged.data_events);
                    child_events.extend(staged.child_events);
                }
            }
        }

        let (ancestors, final_path) = self
            .storage
            .create(&path, value, sequence, ephemeral, session_id)?;

        if !ancestors.is_empty() {
            child_events.push(WatchFire::new(
                ancestors,
                Event::new(EventKind::Child, final_path.clone()),
            ));
        }
        data_events.push(WatchFire::single(
            final_path.clone(),
            Event::new(EventKind::Created, final_path.clone()),
        ));

        Ok(Staged {
            value: final_path,
            data_events,
            child_events,
        })
    }

    pub fn delete(&self, path: &str, version: Version, recursive: bool) -> Result<Staged<()>> {
        let path = path::normalize(path, false);
        let (_data, stat) = self.storage.get(&path)?;
        if version != ANY_VERSION && stat.version != version {
            return Err(Error::BadVersion {
                path,
                expected: version,
                actual: stat.version,
            });
        }

        let mut to_remove = vec![path.clone()];
        let descendants = self.storage.get_children(&path, false);
        if !descendants.is_empty() {
            if !recursive {
                return Err(Error::NotEmpty { path });
            }
            to_remove.extend(descendants);
        }
        to_remove.sort();
        to_remove.dedup();
        to_remove.reverse();

        self.storage.transaction(|storage| {
            for p in &to_remove {
                storage.pop(p)?;
            }
            Ok(())
        })?;

        let mut parents: Vec<String> = Vec::new();
        for p in &to_remove {
            for parent in self.storage.get_parents(p) {
                if !parents.contains(&parent) {
                    parents.push(parent);
                }
            }
        }
        parents.sort();
        parents.reverse();

        let mut staged = Staged::new(());
        for parent in parents {
            staged
                .child_events
                .push(WatchFire::single(parent.clone(), Event::new(EventKind::Deleted, parent)));
        }
        for p in &to_remove {
            staged
                .data_events
                .push(WatchFire::single(p.clone(), Event::new(EventKind::Deleted, p.clone())));
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn makepath_single_inform() {
        let storage = Storage::new();
        let partial = PartialClient::new(storage.clone());
        let staged = partial
            .create("/a/b/c", Vec::new(), false, false, true, None)
            .unwrap();
        assert_eq!(staged.value, "/a/b/c");
        // One Created event for the final path plus one per synthesized
        // ancestor (/a, /a/b), and one Child event per level created.
        assert_eq!(staged.data_events.len(), 3);
        assert_eq!(staged.child_events.len(), 3);
        assert!(storage.exists("/a"));
        assert!(storage.exists("/a/b"));
        assert!(storage.exists("/a/b/c"));
    }

    #[test]
    fn delete_recursive_orders_events_reverse_lexicographically() {
        let storage = Storage::new();
        let partial = PartialClient::new(storage.clone());
        partial.create("/a", Vec::new(), false, false, false, None).unwrap();
        partial.create("/a/b", Vec::new(), false, false, false, None).unwrap();
        partial
            .create("/a/b/c", Vec::new(), false, false, false, None)
            .unwrap();

        let staged = partial.delete("/a", ANY_VERSION, true).unwrap();
        let data_paths: Vec<&str> = staged.data_events.iter().map(|f| f.paths[0].as_str()).collect();
        assert_eq!(data_paths, vec!["/a/b/c", "/a/b", "/a"]);
        assert!(!storage.exists("/a"));

        // get_parents is queried *after* the pops (mirroring the original
        // implementation), so ancestors that were themselves part of the
        // removed subtree (here /a, /a/b) no longer exist to be found —
        // only the surviving root shows up as a unique parent.
        let child_paths: Vec<&str> = staged.child_events.iter().map(|f| f.paths[0].as_str()).collect();
        assert_eq!(child_paths, vec!["/"]);
    }

    #[test]
    fn delete_non_recursive_rejects_non_empty() {
        let storage = Storage::new();
        let partial = PartialClient::new(storage);
        partial.create("/a", Vec::new(), false, false, false, None).unwrap();
        partial.create("/a/b", Vec::new(), false, false, false, None).unwrap();
        let err = partial.delete("/a", ANY_VERSION, false).unwrap_err();
        assert!(matches!(err, Error::NotEmpty { .. }));
    }
}
