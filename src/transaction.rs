//! Multi-operation transaction with all-or-nothing semantics.
//!
//! Grounded on `zake/fake_client.py`'s `FakeTransactionRequest`.

use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::WatchFire;
use crate::ids::Version;
use crate::partial_client::PartialClient;
use crate::storage::Storage;

/// What a single staged operation produced, before any rollback
/// classification is applied.
enum OpOutcome {
    Created(String),
    SetData,
    Deleted,
    Checked,
}

/// A staged check failed; distinguished from any other user-level error so
/// `commit` can pick the right marker for the failing index (SPEC_FULL
/// §4.7).
enum StageError {
    NoNodeCheck,
    BadVersionCheck,
    Other(Error),
}

impl From<Error> for StageError {
    fn from(e: Error) -> Self {
        StageError::Other(e)
    }
}

type StagedOp = Box<dyn FnOnce(&Storage, &PartialClient) -> std::result::Result<(OpOutcome, Vec<WatchFire>, Vec<WatchFire>), StageError> + Send>;

/// The outcome of a single staged operation once a transaction has been
/// committed (successfully or not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnResult {
    Created(String),
    SetData,
    Deleted,
    Checked,
    RolledBack,
    BadVersion,
    NoNode,
    /// The error a non-`check` staged op actually raised, placed at its
    /// index instead of a generic `RolledBack` marker (SPEC_FULL §4.7).
    Failed(Error),
    RuntimeInconsistency,
}

struct Operations {
    staged: Vec<StagedOp>,
}

/// A buffer of staged operations, committed atomically against shared
/// storage.
pub struct Transaction {
    storage: Storage,
    partial_client: PartialClient,
    lock: Mutex<Operations>,
    committed: std::sync::atomic::AtomicBool,
}

impl Transaction {
    pub fn new(storage: Storage, partial_client: PartialClient) -> Self {
        Transaction {
            storage,
            partial_client,
            lock: Mutex::new(Operations { staged: Vec::new() }),
            committed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn add(&self, op: StagedOp) -> Result<()> {
        let mut ops = self
            .lock
            .try_lock()
            .map_err(|_| Error::Runtime {
                message: "transaction can not be concurrently modified".to_string(),
            })?;
        if self.committed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Runtime {
                message: "transaction already committed".to_string(),
            });
        }
        ops.staged.push(op);
        Ok(())
    }

    pub fn create(
        &self,
        path: impl Into<String>,
        value: Vec<u8>,
        ephemeral: bool,
        sequence: bool,
    ) -> Result<()> {
        let path = path.into();
        self.add(Box::new(move |_storage, partial| {
            let staged = partial
                .create(&path, value, ephemeral, sequence, false, None)
                .map_err(StageError::Other)?;
            Ok((OpOutcome::Created(staged.value), staged.data_events, staged.child_events))
        }))
    }

    pub fn set_data(&self, path: impl Into<String>, value: Vec<u8>, version: Version) -> Result<()> {
        let path = path.into();
        self.add(Box::new(move |_storage, partial| {
            let staged = partial.set(&path, value, version).map_err(StageError::Other)?;
            Ok((OpOutcome::SetData, staged.data_events, staged.child_events))
        }))
    }

    pub fn delete(&self, path: impl Into<String>, version: Version) -> Result<()> {
        let path = path.into();
        self.add(Box::new(move |_storage, partial| {
            let staged = partial.delete(&path, version, false).map_err(StageError::Other)?;
            Ok((OpOutcome::Deleted, staged.data_events, staged.child_events))
        }))
    }

    /// Verifies, at commit time, that `path` exists and has exactly
    /// `version`. Unlike every other staged op this never touches the tree.
    pub fn check(&self, path: impl Into<String>, version: Version) -> Result<()> {
        let path = path.into();
        self.add(Box::new(move |storage, _partial| {
            let (_data, stat) = storage.get(&path).map_err(|_| StageError::NoNodeCheck)?;
            if stat.version != version {
                return Err(StageError::BadVersionCheck);
            }
            Ok((OpOutcome::Checked, Vec::new(), Vec::new()))
        }))
    }

    /// Commits every staged operation atomically. On success, returns one
    /// [`TxnResult`] per staged op, in order. On the first staged-op
    /// failure, the storage mutations already applied are rolled back and
    /// the returned vector is padded per SPEC_FULL §4.7 instead of
    /// surfacing an `Err`. Catastrophic errors (the lock already held,
    /// double commit) are returned as `Err` instead.
    pub fn commit(&self) -> Result<Vec<TxnResult>> {
        let mut ops = self.lock.try_lock().map_err(|_| Error::Runtime {
            message: "transaction can not be concurrently modified".to_string(),
        })?;
        if self.committed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Runtime {
                message: "transaction already committed".to_string(),
            });
        }

        let staged = std::mem::take(&mut ops.staged);
        let total = staged.len();

        let mut results: Vec<TxnResult> = Vec::new();
        let mut data_events = Vec::new();
        let mut child_events = Vec::new();
        let mut stage_failure: Option<StageError> = None;

        let storage = self.storage.clone();
        let partial_client = self.partial_client.clone();
        let outcome: Result<()> = storage.transaction(|storage| {
            for op in staged {
                match op(storage, &partial_client) {
                    Ok((outcome, d, c)) => {
                        results.push(match outcome {
                            OpOutcome::Created(p) => TxnResult::Created(p),
                            OpOutcome::SetData => TxnResult::SetData,
                            OpOutcome::Deleted => TxnResult::Deleted,
                            OpOutcome::Checked => TxnResult::Checked,
                        });
                        data_events.extend(d);
                        child_events.extend(c);
                    }
                    Err(e) => {
                        stage_failure = Some(e);
                        return Err(Error::RolledBack);
                    }
                }
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {
                self.storage.inform(
                    &(std::sync::Arc::new(NullSink) as std::sync::Arc<dyn crate::storage::WatchSink>),
                    &child_events,
                    &data_events,
                    false,
                );
                Ok(results)
            }
            Err(_) => {
                for r in results.iter_mut() {
                    *r = TxnResult::RolledBack;
                }
                match stage_failure {
                    Some(StageError::NoNodeCheck) => results.push(TxnResult::NoNode),
                    Some(StageError::BadVersionCheck) => results.push(TxnResult::BadVersion),
                    Some(StageError::Other(e)) => results.push(TxnResult::Failed(e)),
                    None => {}
                }
                while results.len() < total {
                    results.push(TxnResult::RuntimeInconsistency);
                }
                Ok(results)
            }
        }
    }
}

/// A no-op [`crate::storage::WatchSink`] used only so `Storage::inform` has
/// an `origin` to compare against when a transaction (which isn't itself a
/// client) broadcasts its aggregated events to every attached client.
struct NullSink;
impl crate::storage::WatchSink for NullSink {
    fn fire_child_watches(&self, _fires: &[WatchFire]) {}
    fn fire_data_watches(&self, _fires: &[WatchFire]) {}
}
