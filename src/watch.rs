//! Per-client watch registry.
//!
//! Grounded on `zake/fake_client.py`'s `_data_watchers`/`_child_watchers`
//! (`collections.defaultdict(list)`) and `_fire_watches`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::event::{Event, WatchFire};
use crate::handler::Handler;

pub type Watcher = Box<dyn FnOnce(Event) + Send>;

#[derive(Default)]
struct Lists {
    data: HashMap<String, Vec<Watcher>>,
    child: HashMap<String, Vec<Watcher>>,
}

/// Holds the one-shot data and child watchers registered against a single
/// client, keyed by path.
pub struct WatchRegistry {
    lists: Mutex<Lists>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        WatchRegistry {
            lists: Mutex::new(Lists::default()),
        }
    }

    pub fn register_data(&self, path: &str, watcher: Watcher) {
        self.lists
            .lock()
            .unwrap()
            .data
            .entry(path.to_string())
            .or_insert_with(Vec::new)
            .push(watcher);
    }

    pub fn register_child(&self, path: &str, watcher: Watcher) {
        self.lists
            .lock()
            .unwrap()
            .child
            .entry(path.to_string())
            .or_insert_with(Vec::new)
            .push(watcher);
    }

    pub fn clear(&self) {
        let mut lists = self.lists.lock().unwrap();
        lists.data.clear();
        lists.child.clear();
    }

    /// Fires `fires` against the data-watch lists: for each path, in
    /// reverse-sorted order, atomically pops every registered watcher and
    /// enqueues it on `handler` with the event. Skipped entirely if
    /// `connected` is `false`.
    pub fn fire_data(&self, fires: &[WatchFire], handler: &Handler, connected: bool) {
        self.fire(fires, handler, connected, |lists| &mut lists.data);
    }

    pub fn fire_child(&self, fires: &[WatchFire], handler: &Handler, connected: bool) {
        self.fire(fires, handler, connected, |lists| &mut lists.child);
    }

    fn fire(
        &self,
        fires: &[WatchFire],
        handler: &Handler,
        connected: bool,
        pick: impl Fn(&mut Lists) -> &mut HashMap<String, Vec<Watcher>>,
    ) {
        if !connected {
            return;
        }
        for fire in fires {
            let mut paths: Vec<&String> = fire.paths.iter().collect();
            paths.sort();
            paths.reverse();
            for path in paths {
                let watchers = {
                    let mut lists = self.lists.lock().unwrap();
                    pick(&mut lists).remove(path).unwrap_or_default()
                };
                for watcher in watchers {
                    let event = fire.event.clone();
                    handler.dispatch(move || watcher(event));
                }
            }
        }
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        WatchRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn watch_fires_exactly_once() {
        let registry = WatchRegistry::new();
        let handler = Handler::new();
        handler.start();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        registry.register_data(
            "/k",
            Box::new(move |event| {
                assert_eq!(event.kind, EventKind::Changed);
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let fire = WatchFire::single("/k", Event::new(EventKind::Changed, "/k"));
        registry.fire_data(&[fire.clone()], &handler, true);
        registry.fire_data(&[fire], &handler, true);
        let done = handler.event();
        {
            let done = done.clone();
            handler.dispatch(move || done.set());
        }
        done.wait();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        handler.stop();
    }

    #[test]
    fn disconnected_client_skips_firing() {
        let registry = WatchRegistry::new();
        let handler = Handler::new();
        handler.start();
        registry.register_data("/k", Box::new(|_| panic!("should not fire")));
        let fire = WatchFire::single("/k", Event::new(EventKind::Changed, "/k"));
        registry.fire_data(&[fire], &handler, false);
        let done = handler.event();
        {
            let done = done.clone();
            handler.dispatch(move || done.set());
        }
        done.wait();
        handler.stop();
    }
}
