//! Scheduling primitive: a single background dispatch thread that callbacks
//! (watch firings, async completions, listener notifications) are posted to
//! and run on, in order.
//!
//! Grounded on the `handler` abstraction `zake/fake_client.py` takes as a
//! constructor argument (`kazoo.handlers.threading.SequentialThreadingHandler`
//! by default) — see SPEC_FULL §4.3 for why the lock-factory part of that
//! abstraction (`rlock_object()`) has no counterpart here: Rust doesn't need
//! one, callers just construct a `Mutex::new(())` where they need a lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::error;

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Job),
    Shutdown,
}

/// A manual-reset event: `set` wakes every waiter, and stays "set" until
/// `clear` is called.
#[derive(Clone)]
pub struct ManualResetEvent {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ManualResetEvent {
    pub fn new() -> Self {
        ManualResetEvent {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        let mut flag = lock.lock().unwrap();
        *flag = true;
        cvar.notify_all();
    }

    pub fn clear(&self) {
        *self.inner.0.lock().unwrap() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut flag = lock.lock().unwrap();
        while !*flag {
            flag = cvar.wait(flag).unwrap();
        }
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        ManualResetEvent::new()
    }
}

/// A future-like holder for the result of an async operation, with no
/// timeout support (SPEC_FULL §5: "the core has none").
pub struct AsyncResult<T> {
    inner: Arc<(Mutex<Option<std::result::Result<T, crate::error::Error>>>, Condvar)>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult {
            inner: self.inner.clone(),
        }
    }
}

impl<T> AsyncResult<T> {
    pub fn new() -> Self {
        AsyncResult {
            inner: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    pub fn set(&self, value: T) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = Some(Ok(value));
        cvar.notify_all();
    }

    pub fn set_exception(&self, err: crate::error::Error) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = Some(Err(err));
        cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.inner.0.lock().unwrap().is_some()
    }

    /// Blocks until the result has been set, then returns it. Consumes the
    /// stored value; a second call blocks forever. Callers that want to peek
    /// without consuming should use [`AsyncResult::is_set`] first.
    pub fn get(&self) -> std::result::Result<T, crate::error::Error> {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            guard = cvar.wait(guard).unwrap();
        }
    }
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        AsyncResult::new()
    }
}

/// Owns the background dispatch thread. Callbacks posted with
/// [`Handler::dispatch`] run serially, in enqueue order, on that thread —
/// never inline on the caller's thread. This ordering is what makes watch
/// delivery deterministic (SPEC_FULL §5).
pub struct Handler {
    sender: Mutex<Option<Sender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Handler {
    pub fn new() -> Self {
        Handler {
            sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn event(&self) -> ManualResetEvent {
        ManualResetEvent::new()
    }

    pub fn async_result<T>(&self) -> AsyncResult<T> {
        AsyncResult::new()
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }

    /// Starts the worker thread. Idempotent: calling `start` on an already
    /// running handler is a no-op.
    pub fn start(&self) {
        let mut sender_guard = self.sender.lock().unwrap();
        if sender_guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel::<Message>();
        let join = thread::Builder::new()
            .name("zk-emulator-dispatch".to_string())
            .spawn(move || {
                for message in rx {
                    match message {
                        Message::Run(job) => {
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("dispatched callback panicked; dispatch loop continues");
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn dispatch thread");
        *sender_guard = Some(tx);
        *self.worker.lock().unwrap() = Some(join);
    }

    /// Signals the worker thread to stop after draining callbacks already
    /// queued, then joins it. Idempotent.
    pub fn stop(&self) {
        let sender = self.sender.lock().unwrap().take();
        if let Some(sender) = sender {
            let _ = sender.send(Message::Shutdown);
        }
        if let Some(join) = self.worker.lock().unwrap().take() {
            let _ = join.join();
        }
    }

    /// Enqueues `job` for serial execution on the dispatch thread. Silently
    /// dropped if the handler isn't running (mirrors a stopped handler
    /// simply not having anything left to drain).
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(Message::Run(Box::new(job)));
        }
    }
}

impl Default for Handler {
    fn default() -> Self {
        Handler::new()
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_runs_callbacks_in_order() {
        let handler = Handler::new();
        handler.start();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            handler.dispatch(move || order.lock().unwrap().push(i));
        }
        let done = handler.event();
        {
            let done = done.clone();
            handler.dispatch(move || done.set());
        }
        done.wait();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        handler.stop();
    }

    #[test]
    fn async_result_round_trips() {
        let result: AsyncResult<i32> = AsyncResult::new();
        result.set(42);
        assert_eq!(result.get().unwrap(), 42);
    }

    #[test]
    fn panicking_callback_does_not_kill_the_loop() {
        let handler = Handler::new();
        handler.start();
        handler.dispatch(|| panic!("boom"));
        let survived = Arc::new(AtomicUsize::new(0));
        let survived2 = survived.clone();
        let done = handler.event();
        let done2 = done.clone();
        handler.dispatch(move || {
            survived2.fetch_add(1, Ordering::SeqCst);
            done2.set();
        });
        done.wait();
        assert_eq!(survived.load(Ordering::SeqCst), 1);
        handler.stop();
    }
}
