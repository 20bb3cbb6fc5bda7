//! The client facade: session lifecycle, watch registration, synchronous and
//! asynchronous operations, connection-state listeners and the four-letter
//! admin protocol.
//!
//! Grounded on `zake/fake_client.py`'s `FakeClient`, with the parts that
//! delegate straight to `_PartialClient` kept thin and the parts that deal
//! with session/listener/watch bookkeeping expanded to match.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{State, WatchFire};
use crate::handler::{AsyncResult, Handler};
use crate::ids::{SessionId, Version};
use crate::partial_client::PartialClient;
use crate::storage::{Storage, WatchSink};
use crate::watch::{Watcher, WatchRegistry};
use crate::znode::Stat;

pub type Listener = Arc<dyn Fn(State) + Send + Sync>;

struct Inner {
    storage: Storage,
    partial: PartialClient,
    watches: WatchRegistry,
    handler: Handler,
    config: Config,
    session_id: Mutex<SessionId>,
    connected: AtomicBool,
    expired: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

impl WatchSink for Inner {
    fn fire_child_watches(&self, fires: &[WatchFire]) {
        self.watches.fire_child(fires, &self.handler, self.connected.load(Ordering::SeqCst));
    }

    fn fire_data_watches(&self, fires: &[WatchFire]) {
        self.watches.fire_data(fires, &self.handler, self.connected.load(Ordering::SeqCst));
    }
}

fn next_session_id() -> SessionId {
    static COUNTER: AtomicI64 = AtomicI64::new(1);
    SessionId(COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// A handle onto a coordination session against shared [`Storage`]. Cheap to
/// clone: every clone shares the same session, watch registry and dispatch
/// thread.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(storage: Storage) -> Self {
        Client::with_config(storage, Config::default())
    }

    pub fn with_config(storage: Storage, config: Config) -> Self {
        let partial = PartialClient::new(storage.clone());
        Client {
            inner: Arc::new(Inner {
                storage,
                partial,
                watches: WatchRegistry::new(),
                handler: Handler::new(),
                config,
                session_id: Mutex::new(SessionId::NONE),
                connected: AtomicBool::new(false),
                expired: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> Config {
        self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> SessionId {
        *self.inner.session_id.lock().unwrap()
    }

    fn as_sink(&self) -> Arc<dyn WatchSink> {
        self.inner.clone()
    }

    fn inform(&self, child_events: Vec<WatchFire>, data_events: Vec<WatchFire>) {
        self.inner
            .storage
            .inform(&self.as_sink(), &child_events, &data_events, true);
    }

    fn fire_state_change(&self, state: State) {
        let listeners = self.inner.listeners.lock().unwrap().clone();
        for listener in listeners {
            self.inner.handler.dispatch(move || listener(state));
        }
    }

    /// Registers `f` to be called, on the dispatch thread, whenever the
    /// connection state changes. Returns a handle that can later be passed
    /// to [`Client::remove_listener`].
    pub fn add_listener<F>(&self, f: F) -> Listener
    where
        F: Fn(State) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(f);
        self.inner.listeners.lock().unwrap().push(listener.clone());
        listener
    }

    pub fn remove_listener(&self, listener: &Listener) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Starts a new session: spawns the dispatch thread if needed, assigns a
    /// fresh session id, attaches to storage, and notifies listeners of
    /// `State::Connected`. Idempotent while already connected.
    pub fn start(&self) -> Result<()> {
        if self.inner.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.inner.handler.is_running() {
            self.inner.handler.start();
        }
        let session_id = next_session_id();
        *self.inner.session_id.lock().unwrap() = session_id;
        self.inner.expired.store(false, Ordering::SeqCst);
        self.inner.storage.attach(&self.as_sink());
        info!(session = session_id.0, "session started");
        self.fire_state_change(State::Connected);
        Ok(())
    }

    /// Ends the session: purges every ephemeral node it owns, clears its own
    /// watches, and notifies listeners of `State::Lost`. The dispatch thread
    /// keeps running; use [`Client::stop`] to also tear that down. No-op if
    /// already disconnected.
    pub fn close(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let session_id = *self.inner.session_id.lock().unwrap();
        let removed = self.inner.storage.purge(&self.as_sink(), Some(session_id));
        debug!(session = session_id.0, removed, "session closed, ephemerals purged");
        self.inner.watches.clear();
        self.fire_state_change(State::Lost);
    }

    /// Equivalent to `close` followed by `start`, yielding a fresh session
    /// id; every ephemeral node owned by the old session is gone by the time
    /// the new one begins.
    pub fn restart(&self) -> Result<()> {
        self.close();
        self.start()
    }

    /// Closes the session and joins the dispatch thread. The client cannot
    /// be restarted afterwards.
    pub fn stop(&self) {
        self.close();
        self.inner.handler.stop();
    }

    /// Flags the session as expired, the way a real ensemble would after the
    /// client failed to renew its lease in time, then closes it exactly as
    /// `close` does (ephemerals purged, watches cleared, listeners told
    /// `State::Lost`). Once expired, every operation raises `SessionExpired`
    /// instead of `ConnectionClosed` until `start`/`restart` is called again.
    pub fn expire_session(&self) {
        self.inner.expired.store(true, Ordering::SeqCst);
        self.close();
    }

    fn verify(&self) -> Result<()> {
        if self.inner.expired.load(Ordering::SeqCst) {
            return Err(Error::SessionExpired);
        }
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    pub fn get(&self, path: &str, watcher: Option<Watcher>) -> Result<(Vec<u8>, Stat)> {
        self.verify()?;
        let result = self.inner.storage.get(path)?;
        if let Some(watcher) = watcher {
            self.inner.watches.register_data(path, watcher);
        }
        Ok(result)
    }

    pub fn exists(&self, path: &str, watcher: Option<Watcher>) -> Result<bool> {
        self.verify()?;
        let exists = self.inner.storage.exists(path);
        if let Some(watcher) = watcher {
            self.inner.watches.register_data(path, watcher);
        }
        Ok(exists)
    }

    pub fn get_children(&self, path: &str, watcher: Option<Watcher>) -> Result<Vec<String>> {
        self.verify()?;
        if !self.inner.storage.exists(path) {
            return Err(Error::NoNode { path: path.to_string() });
        }
        let children = self.inner.storage.get_children(path, true);
        if let Some(watcher) = watcher {
            self.inner.watches.register_child(path, watcher);
        }
        Ok(children)
    }

    pub fn set_data(&self, path: &str, value: Vec<u8>, version: Version) -> Result<Stat> {
        self.verify()?;
        let staged = self.inner.partial.set(path, value, version)?;
        self.inform(staged.child_events, staged.data_events);
        Ok(staged.value)
    }

    pub fn create(
        &self,
        path: &str,
        value: Vec<u8>,
        ephemeral: bool,
        sequence: bool,
        makepath: bool,
    ) -> Result<String> {
        self.verify()?;
        let session_id = *self.inner.session_id.lock().unwrap();
        let staged = self
            .inner
            .partial
            .create(path, value, ephemeral, sequence, makepath, Some(session_id))?;
        self.inform(staged.child_events, staged.data_events);
        Ok(staged.value)
    }

    pub fn delete(&self, path: &str, version: Version, recursive: bool) -> Result<()> {
        self.verify()?;
        let staged = self.inner.partial.delete(path, version, recursive)?;
        self.inform(staged.child_events, staged.data_events);
        Ok(())
    }

    /// Creates `path` (and any missing ancestors) with empty data, unless it
    /// already exists.
    pub fn ensure_path(&self, path: &str) -> Result<()> {
        self.verify()?;
        match self.create(path, Vec::new(), false, false, true) {
            Ok(_) => Ok(()),
            Err(Error::NodeExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn get_async(&self, path: impl Into<String>, watcher: Option<Watcher>) -> AsyncResult<(Vec<u8>, Stat)> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner.handler.dispatch(move || match client.get(&path, watcher) {
            Ok(v) => out.set(v),
            Err(e) => out.set_exception(e),
        });
        result
    }

    pub fn exists_async(&self, path: impl Into<String>, watcher: Option<Watcher>) -> AsyncResult<bool> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner.handler.dispatch(move || match client.exists(&path, watcher) {
            Ok(v) => out.set(v),
            Err(e) => out.set_exception(e),
        });
        result
    }

    pub fn get_children_async(
        &self,
        path: impl Into<String>,
        watcher: Option<Watcher>,
    ) -> AsyncResult<Vec<String>> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner
            .handler
            .dispatch(move || match client.get_children(&path, watcher) {
                Ok(v) => out.set(v),
                Err(e) => out.set_exception(e),
            });
        result
    }

    pub fn set_data_async(&self, path: impl Into<String>, value: Vec<u8>, version: Version) -> AsyncResult<Stat> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner
            .handler
            .dispatch(move || match client.set_data(&path, value, version) {
                Ok(v) => out.set(v),
                Err(e) => out.set_exception(e),
            });
        result
    }

    pub fn create_async(
        &self,
        path: impl Into<String>,
        value: Vec<u8>,
        ephemeral: bool,
        sequence: bool,
        makepath: bool,
    ) -> AsyncResult<String> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner.handler.dispatch(move || {
            match client.create(&path, value, ephemeral, sequence, makepath) {
                Ok(v) => out.set(v),
                Err(e) => out.set_exception(e),
            }
        });
        result
    }

    pub fn delete_async(&self, path: impl Into<String>, version: Version, recursive: bool) -> AsyncResult<()> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner
            .handler
            .dispatch(move || match client.delete(&path, version, recursive) {
                Ok(v) => out.set(v),
                Err(e) => out.set_exception(e),
            });
        result
    }

    pub fn ensure_path_async(&self, path: impl Into<String>) -> AsyncResult<()> {
        let result = self.inner.handler.async_result();
        let client = self.clone();
        let path = path.into();
        let out = result.clone();
        self.inner.handler.dispatch(move || match client.ensure_path(&path) {
            Ok(v) => out.set(v),
            Err(e) => out.set_exception(e),
        });
        result
    }

    /// Retries `op` while it returns a transient error, following this
    /// client's [`crate::config::RetryPolicy`]. Non-transient errors and the
    /// final transient failure are returned unchanged.
    pub fn retry<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let policy = self.inner.config.retry_policy;
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < policy.max_tries => {
                    std::thread::sleep(policy.delay_for(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Blocks until every callback queued so far on the dispatch thread has
    /// run, including any watch firings and async completions scheduled
    /// before this call.
    pub fn flush(&self) {
        let event = self.inner.handler.event();
        let done = event.clone();
        self.inner.handler.dispatch(move || done.set());
        event.wait();
    }

    /// Starts a staging buffer of operations to commit atomically. See
    /// [`crate::transaction::Transaction`].
    pub fn transaction(&self) -> crate::transaction::Transaction {
        crate::transaction::Transaction::new(self.inner.storage.clone(), self.inner.partial.clone())
    }

    /// Stages `body` against a fresh [`crate::transaction::Transaction`] and
    /// commits it. The explicit commit step stands in for Python's implicit
    /// commit-on-clean-exit of a `with` block, which Rust has no safe
    /// equivalent for without running fallible logic in `Drop`.
    pub fn run_transaction(
        &self,
        body: impl FnOnce(&crate::transaction::Transaction) -> Result<()>,
    ) -> Result<Vec<crate::transaction::TxnResult>> {
        let txn = self.transaction();
        body(&txn)?;
        txn.commit()
    }

    /// Answers one of the four-letter admin words (`ruok`, `envi`, `stat`,
    /// `kill`) the way a real ZooKeeper ensemble's client port would.
    pub fn command(&self, word: &str) -> String {
        let (major, minor, patch) = self.inner.config.server_version;
        match word {
            "ruok" => "imok".to_string(),
            "envi" => format!("zookeeper.version={}.{}.{}\n", major, minor, patch),
            "stat" => format!(
                "Zookeeper version: {}.{}.{}\nConnections: 1\nSessions: {}\nNode count: n/a\n",
                major,
                minor,
                patch,
                if self.is_connected() { 1 } else { 0 }
            ),
            "kill" => {
                self.close();
                String::new()
            }
            _ => "This ZooKeeper instance is not currently serving requests".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn session_lifecycle_purges_ephemerals() {
        let storage = Storage::new();
        let client = Client::new(storage.clone());
        client.start().unwrap();
        client.create("/e", Vec::new(), true, false, false).unwrap();
        assert!(storage.exists("/e"));
        client.close();
        assert!(!storage.exists("/e"));
        client.stop();
    }

    #[test]
    fn cross_client_watch_fan_out() {
        let storage = Storage::new();
        let a = Client::new(storage.clone());
        let b = Client::new(storage.clone());
        a.start().unwrap();
        b.start().unwrap();
        a.create("/k", b"v".to_vec(), false, false, false).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        b.get(
            "/k",
            Some(Box::new(move |event| {
                assert_eq!(event.kind, EventKind::Changed);
                fired2.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        a.set_data("/k", b"v2".to_vec(), crate::ids::ANY_VERSION).unwrap();
        b.flush();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        a.stop();
        b.stop();
    }

    #[test]
    fn listener_hears_state_changes() {
        let storage = Storage::new();
        let client = Client::new(storage);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        client.add_listener(move |state| seen2.lock().unwrap().push(state));
        client.start().unwrap();
        client.close();
        client.flush();
        assert_eq!(*seen.lock().unwrap(), vec![State::Connected, State::Lost]);
        client.stop();
    }

    #[test]
    fn operations_require_an_active_session() {
        let storage = Storage::new();
        let client = Client::new(storage);
        let err = client.create("/x", Vec::new(), false, false, false).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[test]
    fn four_letter_words() {
        let storage = Storage::new();
        let client = Client::new(storage);
        assert_eq!(client.command("ruok"), "imok");
        assert_eq!(client.command("envi"), "zookeeper.version=3.4.0\n");
        assert!(client.command("stat").contains("3.4.0"));
        assert_eq!(client.command("kill"), "");
        assert!(!client.is_connected());
    }

    #[test]
    fn expired_session_is_reported_distinctly_from_a_closed_one() {
        let storage = Storage::new();
        let client = Client::new(storage);
        client.start().unwrap();
        client.expire_session();
        let err = client.get("/", None).unwrap_err();
        assert!(matches!(err, Error::SessionExpired));

        client.start().unwrap();
        let err2 = client.get("/missing", None).unwrap_err();
        assert!(matches!(err2, Error::NoNode { .. }));
        client.stop();
    }
}
