//! Scoped stores: lazily created, single-instance resource entries.
//!
//! A store maps shared resource keys to entries. Get-or-create is atomic
//! per key: the first resolver performs the creation while every concurrent
//! resolver for the same key awaits the same in-flight attempt, so at most
//! one successful `create` happens per key per store lifetime. Close walks
//! entries in reverse creation order and runs exactly once.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result, record_teardown_failure};
use crate::factory::{ErasedFactory, ErasedResource, ResourceValue};
use crate::key::ResourceKey;
use crate::scope::Scope;

// ---------------------------------------------------------------------------
// Shared creation failure
// ---------------------------------------------------------------------------

/// Cloneable stand-in for a creation failure, delivered to every waiter of
/// a failed entry. Carries the original cause's message.
#[derive(Debug, Clone)]
struct SharedFailure {
    message: String,
}

impl fmt::Display for SharedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SharedFailure {}

// ---------------------------------------------------------------------------
// Entry state machine
// ---------------------------------------------------------------------------

enum EntryState {
    Uncreated,
    Creating,
    Ready {
        factory: Box<dyn ErasedFactory>,
        resource: Box<dyn ErasedResource>,
        seq: u64,
    },
    /// Terminal: creation failed. The factory instance still awaits close
    /// at scope end.
    Failed {
        factory: Box<dyn ErasedFactory>,
        cause: SharedFailure,
    },
    Closing,
    Closed,
}

struct EntryCell {
    key: ResourceKey,
    args: Vec<String>,
    state: Mutex<EntryState>,
    signal: Condvar,
}

impl EntryCell {
    fn new(key: ResourceKey, args: Vec<String>) -> Self {
        Self {
            key,
            args,
            state: Mutex::new(EntryState::Uncreated),
            signal: Condvar::new(),
        }
    }

    /// Resolve this entry to its value, creating it on first use.
    ///
    /// Exactly one caller performs the `Uncreated -> Creating` transition;
    /// everyone else blocks on the condvar until the entry is `Ready` or
    /// `Failed`. The factory's `create` runs outside the state lock.
    fn resolve(&self, seq: &AtomicU64, scope_label: &str) -> Result<ResourceValue> {
        let factory_name = self.key.factory().type_name();
        let mut state = self.state.lock();
        loop {
            match &*state {
                EntryState::Uncreated => {
                    *state = EntryState::Creating;
                    drop(state);
                    let outcome = self.create();
                    state = self.state.lock();
                    match outcome {
                        Ok((factory, resource)) => {
                            let seq = seq.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                key = %self.key,
                                factory = factory_name,
                                seq,
                                "created shared resource"
                            );
                            *state = EntryState::Ready {
                                factory,
                                resource,
                                seq,
                            };
                        }
                        Err((factory, cause)) => {
                            tracing::debug!(
                                key = %self.key,
                                factory = factory_name,
                                error = %cause,
                                "shared resource creation failed"
                            );
                            *state = EntryState::Failed { factory, cause };
                        }
                    }
                    self.signal.notify_all();
                }
                EntryState::Creating | EntryState::Closing => self.signal.wait(&mut state),
                EntryState::Ready { resource, .. } => {
                    return resource.get_value().map_err(|source| Error::Access {
                        factory: factory_name,
                        source,
                    });
                }
                EntryState::Failed { cause, .. } => {
                    return Err(Error::Creation {
                        factory: factory_name,
                        source: Box::new(cause.clone()),
                    });
                }
                EntryState::Closed => {
                    return Err(Error::ScopeClosed {
                        scope: scope_label.to_string(),
                    });
                }
            }
        }
    }

    /// Instantiate the factory and create the resource. On failure the
    /// factory is kept so its own `close` still runs at scope end.
    #[expect(clippy::type_complexity, reason = "internal creation outcome")]
    fn create(
        &self,
    ) -> std::result::Result<
        (Box<dyn ErasedFactory>, Box<dyn ErasedResource>),
        (Box<dyn ErasedFactory>, SharedFailure),
    > {
        let mut factory = self.key.factory().instantiate();
        match factory.create(&self.args) {
            Ok(resource) => Ok((factory, resource)),
            Err(source) => {
                let cause = SharedFailure {
                    message: source.to_string(),
                };
                Err((factory, cause))
            }
        }
    }

    /// Creation order, if the entry ever became ready.
    fn seq(&self) -> Option<u64> {
        match &*self.state.lock() {
            EntryState::Ready { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Close the entry: resource first, then its factory, each exactly once.
    fn close(&self, scope_label: &str) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            match mem::replace(&mut *state, EntryState::Closing) {
                EntryState::Ready {
                    mut factory,
                    mut resource,
                    ..
                } => {
                    drop(state);
                    let resource_result = resource.close();
                    let factory_result = factory.close();
                    *self.state.lock() = EntryState::Closed;
                    self.signal.notify_all();
                    tracing::debug!(key = %self.key, "closed shared resource");
                    return match (resource_result, factory_result) {
                        (Ok(()), Ok(())) => Ok(()),
                        (Err(source), factory_result) => {
                            if let Err(error) = factory_result {
                                tracing::warn!(
                                    key = %self.key,
                                    error = %error,
                                    "factory close also failed"
                                );
                            }
                            Err(self.teardown_error(
                                scope_label,
                                format!("resource `{}`", self.key.name()),
                                source,
                            ))
                        }
                        (Ok(()), Err(source)) => Err(self.teardown_error(
                            scope_label,
                            format!("factory `{}`", self.key.factory().type_name()),
                            source,
                        )),
                    };
                }
                EntryState::Failed { mut factory, .. } => {
                    drop(state);
                    let factory_result = factory.close();
                    *self.state.lock() = EntryState::Closed;
                    self.signal.notify_all();
                    return factory_result.map_err(|source| {
                        self.teardown_error(
                            scope_label,
                            format!("factory `{}`", self.key.factory().type_name()),
                            source,
                        )
                    });
                }
                EntryState::Uncreated | EntryState::Closed => {
                    *state = EntryState::Closed;
                    return Ok(());
                }
                // Creation still in flight, or another closer is at work:
                // wait for the state to settle, then re-examine it.
                EntryState::Creating => {
                    *state = EntryState::Creating;
                    self.signal.wait(&mut state);
                }
                EntryState::Closing => {
                    *state = EntryState::Closing;
                    self.signal.wait(&mut state);
                }
            }
        }
    }

    fn teardown_error(
        &self,
        scope_label: &str,
        resource: String,
        source: crate::error::BoxError,
    ) -> Error {
        Error::Teardown {
            scope: scope_label.to_string(),
            resource,
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// ScopedStore
// ---------------------------------------------------------------------------

struct StoreEntries {
    open: bool,
    cells: HashMap<String, Arc<EntryCell>>,
}

/// A per-scope registry of shared resource entries.
///
/// One store exists for the whole run (global scope) and one per
/// source-file group; new-scoped resources bypass storage entirely.
pub struct ScopedStore {
    scope: Scope,
    label: String,
    entries: Mutex<StoreEntries>,
    /// Creation sequence; starts at 1 so "never created" sorts last on close.
    seq: AtomicU64,
}

impl ScopedStore {
    /// Create an empty store for `scope`, labelled for diagnostics.
    pub fn new(scope: Scope, label: impl Into<String>) -> Self {
        Self {
            scope,
            label: label.into(),
            entries: Mutex::new(StoreEntries {
                open: true,
                cells: HashMap::new(),
            }),
            seq: AtomicU64::new(1),
        }
    }

    /// The scope this store backs
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// The store's diagnostic label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the value for `key`, creating the entry on first resolution.
    ///
    /// Concurrent resolvers of the same key observe a single creation; a
    /// second declaration of the same name must agree on factory type and
    /// arguments.
    pub fn get_or_create(&self, key: &ResourceKey, args: &[String]) -> Result<ResourceValue> {
        debug_assert_eq!(key.scope(), self.scope);
        let cell = {
            let mut entries = self.entries.lock();
            if !entries.open {
                return Err(Error::ScopeClosed {
                    scope: self.label.clone(),
                });
            }
            match entries.cells.get(key.name()) {
                Some(cell) => {
                    if cell.key.factory() != key.factory() {
                        return Err(Error::configuration(format!(
                            "two or more declarations share the name \"{}\" \
                             but with different factory classes",
                            key.name()
                        )));
                    }
                    if cell.args != args {
                        return Err(Error::configuration(format!(
                            "two or more declarations share the name \"{}\" \
                             but with different arguments",
                            key.name()
                        )));
                    }
                    Arc::clone(cell)
                }
                None => {
                    let cell = Arc::new(EntryCell::new(key.clone(), args.to_vec()));
                    entries
                        .cells
                        .insert(key.name().to_string(), Arc::clone(&cell));
                    cell
                }
            }
        };
        cell.resolve(&self.seq, &self.label)
    }

    /// Tear the store down: close every entry in reverse creation order.
    ///
    /// Runs at most once; later calls are no-ops. Teardown continues past
    /// failures — the first failure becomes the boundary's result and the
    /// rest are logged.
    pub fn close(&self) -> Result<()> {
        let cells: Vec<Arc<EntryCell>> = {
            let mut entries = self.entries.lock();
            if !entries.open {
                return Ok(());
            }
            entries.open = false;
            entries.cells.drain().map(|(_, cell)| cell).collect()
        };
        if !cells.is_empty() {
            tracing::debug!(scope = %self.label, entries = cells.len(), "closing store");
        }

        let mut ordered = cells;
        ordered.sort_by_key(|cell| std::cmp::Reverse(cell.seq().unwrap_or(0)));

        let mut first_failure = None;
        for cell in ordered {
            if let Err(error) = cell.close(&self.label) {
                record_teardown_failure(&mut first_failure, error);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ScopedStore")
            .field("scope", &self.scope)
            .field("label", &self.label)
            .field("open", &entries.open)
            .field("entry_count", &entries.cells.len())
            .finish()
    }
}
