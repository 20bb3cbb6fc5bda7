//! The znode tree: data, metadata, ephemerals, sequence counters,
//! transactional snapshot/rollback, and the attached-client registry that
//! watch fan-out is built on.
//!
//! Grounded on `zake/fake_storage.py`'s `FakeStorage`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use itertools::Itertools;

use crate::error::{Error, Result};
use crate::event::{Event, EventKind, WatchFire};
use crate::ids::{SessionId, Timestamp, Version, ANY_VERSION};
use crate::path;
use crate::znode::{Stat, Znode};

pub const ROOT_PATH: &str = "/";

// See: https://issues.apache.org/jira/browse/ZOOKEEPER-243
const SEQ_ROLLOVER: i32 = i32::max_value();
const SEQ_ROLLOVER_TO: i32 = i32::min_value() + 1;

pub fn now_millis() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Timestamp(millis)
}

/// Anything storage can inform of watch events. Implemented by
/// [`crate::client::Client`]; kept as a trait so `storage` doesn't need to
/// know about the client facade's other responsibilities.
pub trait WatchSink: Send + Sync {
    fn fire_child_watches(&self, fires: &[WatchFire]);
    fn fire_data_watches(&self, fires: &[WatchFire]);
}

struct Tree {
    paths: HashMap<String, Znode>,
    sequences: HashMap<String, i32>,
}

impl Tree {
    fn fresh() -> Self {
        let mut paths = HashMap::new();
        paths.insert(
            ROOT_PATH.to_string(),
            Znode::new(Vec::new(), Timestamp(0), None),
        );
        Tree {
            paths,
            sequences: HashMap::new(),
        }
    }

    fn children_of(&self, path: &str, only_direct: bool) -> Vec<String> {
        self.paths
            .keys()
            .filter(|other| path::is_child_path(path, other, only_direct))
            .cloned()
            .sorted()
            .collect()
    }

    fn parents_of(&self, path: &str) -> Vec<String> {
        self.paths
            .keys()
            .filter(|other| path::is_child_path(other, path, false))
            .cloned()
            .collect()
    }

    fn make_stat(&self, path: &str, node: &Znode) -> Stat {
        let children = self.children_of(path, true).len() as i32;
        node.to_stat(children)
    }
}

/// Shared, mutable home for the coordination tree plus the set of attached
/// clients. Cheaply cloned (wraps an `Arc`) so multiple [`crate::client::Client`]
/// handles can attach to the same storage.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    tree: Mutex<Tree>,
    clients: Mutex<Vec<Weak<dyn WatchSink>>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            inner: Arc::new(StorageInner {
                tree: Mutex::new(Tree::fresh()),
                clients: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn attach(&self, client: &Arc<dyn WatchSink>) {
        let mut clients = self.inner.clients.lock().unwrap();
        let already = clients
            .iter()
            .filter_map(Weak::upgrade)
            .any(|c| Arc::ptr_eq(&c, client));
        if !already {
            clients.push(Arc::downgrade(client));
        }
    }

    /// Detaches `client`, removes every ephemeral node it owns, and informs
    /// the remaining attached clients of the resulting `Deleted` events.
    /// Returns the number of ephemerals removed. A no-op if `session_id` is
    /// `None` (the session was never established) or the client was never
    /// attached.
    pub fn purge(&self, client: &Arc<dyn WatchSink>, session_id: Option<SessionId>) -> usize {
        let session_id = match session_id {
            Some(id) if id.is_some() => id,
            _ => return 0,
        };

        {
            let mut clients = self.inner.clients.lock().unwrap();
            let before = clients.len();
            clients.retain(|weak| match weak.upgrade() {
                Some(c) => !Arc::ptr_eq(&c, client),
                None => false,
            });
            if clients.len() == before {
                return 0;
            }
        }

        let (data_fires, child_fires, removed) = {
            let mut tree = self.inner.tree.lock().unwrap();
            let removals: Vec<String> = tree
                .paths
                .iter()
                .filter(|(_, node)| node.ephemeral && node.ephemeral_owner == session_id)
                .map(|(path, _)| path.clone())
                .sorted()
                .collect();

            let data_fires: Vec<WatchFire> = removals
                .iter()
                .map(|p| WatchFire::single(p.clone(), Event::new(EventKind::Deleted, p.clone())))
                .collect();

            let mut parent_paths: Vec<String> = Vec::new();
            for removed_path in &removals {
                for parent in tree.parents_of(removed_path) {
                    if !parent_paths.contains(&parent) {
                        parent_paths.push(parent);
                    }
                }
            }
            parent_paths.sort();
            let child_fires: Vec<WatchFire> = parent_paths
                .iter()
                .map(|p| WatchFire::single(p.clone(), Event::new(EventKind::Deleted, p.clone())))
                .collect();

            for removed_path in &removals {
                tree.paths.remove(removed_path);
            }

            (data_fires, child_fires, removals.len())
        };

        self.inform_others(client, &child_fires, &data_fires);
        removed
    }

    pub fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let tree = self.inner.tree.lock().unwrap();
        let node = tree
            .paths
            .get(path)
            .ok_or_else(|| Error::NoNode { path: path.to_string() })?;
        Ok((node.data.clone(), tree.make_stat(path, node)))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.tree.lock().unwrap().paths.contains_key(path)
    }

    pub fn set(&self, path: &str, value: Vec<u8>, version: Version) -> Result<Stat> {
        let mut tree = self.inner.tree.lock().unwrap();
        {
            let node = tree
                .paths
                .get(path)
                .ok_or_else(|| Error::NoNode { path: path.to_string() })?;
            if version != ANY_VERSION && node.version != version {
                return Err(Error::BadVersion {
                    path: path.to_string(),
                    expected: version,
                    actual: node.version,
                });
            }
        }
        let node = tree.paths.get_mut(path).unwrap();
        node.data = value;
        node.updated_on = now_millis();
        node.version = Version(node.version.0 + 1);
        Ok(tree.make_stat(path, tree.paths.get(path).unwrap()))
    }

    /// Creates `path`, returning `(ancestor_paths_in_ascending_order, final_path)`.
    /// Ancestors are only non-empty when `sequence` forced a different final
    /// path than requested parent enumeration would otherwise need; callers
    /// (the partial client) use this purely to shape `Child` watch events.
    pub fn create(
        &self,
        path: &str,
        value: Vec<u8>,
        sequence: bool,
        ephemeral: bool,
        session_id: Option<SessionId>,
    ) -> Result<(Vec<String>, String)> {
        let mut tree = self.inner.tree.lock().unwrap();
        let (parent_path, _leaf) = path::split(path);

        let mut final_path = path.to_string();
        if sequence {
            loop {
                let next = {
                    let counter = tree.sequences.entry(parent_path.clone()).or_insert(0);
                    let assigned = *counter;
                    *counter = if assigned == SEQ_ROLLOVER {
                        SEQ_ROLLOVER_TO
                    } else {
                        assigned + 1
                    };
                    assigned
                };
                let candidate = format!("{}{:010}", path, next);
                if !tree.paths.contains_key(&candidate) {
                    final_path = candidate;
                    break;
                }
            }
        }

        if !tree.paths.contains_key(&parent_path) {
            if sequence {
                tree.sequences.remove(&parent_path);
            }
            return Err(Error::NoNode { path: parent_path });
        }

        if ephemeral && !session_id.map(|s| s.is_some()).unwrap_or(false) {
            return Err(Error::SystemZookeeper { path: final_path });
        }

        if tree.paths.contains_key(&final_path) {
            return Err(Error::NodeExists { path: final_path });
        }

        let ancestors = tree.parents_of(&final_path);
        for ancestor in &ancestors {
            if tree.paths.get(ancestor).map(|n| n.ephemeral).unwrap_or(false) {
                return Err(Error::NoChildrenForEphemerals {
                    path: final_path.clone(),
                });
            }
        }

        let node = Znode::new(value, now_millis(), if ephemeral { session_id } else { None });
        tree.paths.insert(final_path.clone(), node);

        let mut sorted_ancestors = ancestors;
        sorted_ancestors.sort();
        Ok((sorted_ancestors, final_path))
    }

    pub fn pop(&self, path: &str) -> Result<()> {
        if path == ROOT_PATH {
            return Err(Error::BadArguments {
                message: format!("can not delete {}", ROOT_PATH),
            });
        }
        self.inner.tree.lock().unwrap().paths.remove(path);
        Ok(())
    }

    pub fn get_children(&self, path: &str, only_direct: bool) -> Vec<String> {
        self.inner.tree.lock().unwrap().children_of(path, only_direct)
    }

    pub fn get_parents(&self, path: &str) -> Vec<String> {
        self.inner.tree.lock().unwrap().parents_of(path)
    }

    /// Runs `body` against the live tree; if it returns `Err`, both the path
    /// map and the sequence-counter map are restored to their pre-call state
    /// before the error propagates. This is the crate's only rollback
    /// mechanism (SPEC_FULL §4.2/§9).
    pub fn transaction<T>(&self, body: impl FnOnce(&Storage) -> Result<T>) -> Result<T> {
        let snapshot = {
            let tree = self.inner.tree.lock().unwrap();
            (tree.paths.clone(), tree.sequences.clone())
        };
        match body(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                let mut tree = self.inner.tree.lock().unwrap();
                tree.paths = snapshot.0;
                tree.sequences = snapshot.1;
                Err(e)
            }
        }
    }

    /// Broadcasts `child_fires` then `data_fires` to every attached client,
    /// including `origin` unless `inform_self` is `false`.
    pub fn inform(
        &self,
        origin: &Arc<dyn WatchSink>,
        child_fires: &[WatchFire],
        data_fires: &[WatchFire],
        inform_self: bool,
    ) {
        let clients: Vec<Arc<dyn WatchSink>> = {
            let guard = self.inner.clients.lock().unwrap();
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for other in clients {
            if !inform_self && Arc::ptr_eq(&other, origin) {
                continue;
            }
            other.fire_child_watches(child_fires);
            other.fire_data_watches(data_fires);
        }
    }

    fn inform_others(&self, origin: &Arc<dyn WatchSink>, child_fires: &[WatchFire], data_fires: &[WatchFire]) {
        self.inform(origin, child_fires, data_fires, false)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Storage::new()
    }
}
