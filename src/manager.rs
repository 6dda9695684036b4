//! Lifecycle orchestration: end-to-end injection resolution, permit
//! gating, and scope-close callbacks.
//!
//! The manager owns the stores (one for the run, one per source-file
//! group), the exclusion coordinator, and a process-wide registry of
//! shared-name declarations. The host engine drives it through three
//! callbacks per execution — resolve injection points, run bodies under
//! [`ExecutionScope::exclusive`], close at the right boundary — plus the
//! reference-counted source-file boundary and the end-of-run boundary.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result, record_teardown_failure};
use crate::factory::{ErasedFactory, ErasedResource, FactoryProvider, ResourceValue};
use crate::key::{PermitKey, ResourceKey};
use crate::scope::Scope;
use crate::spec::{InjectionPoint, InjectionSpec};
use crate::store::ScopedStore;

// ---------------------------------------------------------------------------
// LifecycleManager
// ---------------------------------------------------------------------------

/// Consistency record for a shared name: every declaration of the same name
/// anywhere in the run must agree on factory type and scope.
struct SharedDeclaration {
    factory: FactoryProvider,
    scope: Scope,
}

struct FileGroup {
    store: Arc<ScopedStore>,
    /// Pending executions originating from this file; the store is torn
    /// down the instant this reaches zero.
    pending: u64,
}

/// Orchestrates resource resolution and teardown for one run.
///
/// Created at run start and handed by reference to every execution; there
/// is no ambient static state.
pub struct LifecycleManager {
    global: ScopedStore,
    files: Mutex<HashMap<String, FileGroup>>,
    exclusion: crate::exclusion::ExclusionCoordinator,
    declarations: DashMap<String, SharedDeclaration>,
}

impl LifecycleManager {
    /// Create a manager with empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            global: ScopedStore::new(Scope::Global, "global"),
            files: Mutex::new(HashMap::new()),
            exclusion: crate::exclusion::ExclusionCoordinator::new(),
            declarations: DashMap::new(),
        }
    }

    /// True when the point carries a specification this manager owns.
    ///
    /// # Errors
    /// Declaring both a new and a shared resource on one point is a
    /// configuration error.
    pub fn supports(&self, point: &InjectionPoint) -> Result<bool> {
        let fresh = point.specs.iter().filter(|s| !s.is_shared()).count();
        let shared = point.specs.iter().filter(|s| s.is_shared()).count();
        if fresh > 0 && shared > 0 {
            return Err(Error::configuration(format!(
                "{} declares both a new and a shared resource",
                point.description()
            )));
        }
        Ok(fresh + shared > 0)
    }

    /// Begin one test/container execution originating from `source_file`.
    ///
    /// `points` are the execution's injection points as discovered; they
    /// drive both resolution diagnostics and the permit key set.
    pub fn start_execution(
        &self,
        source_file: impl Into<String>,
        points: Vec<InjectionPoint>,
    ) -> ExecutionScope<'_> {
        ExecutionScope {
            manager: self,
            source_file: source_file.into(),
            points,
            fresh: Mutex::new(Vec::new()),
        }
    }

    /// Host: a test originating from `source_file` became pending.
    pub fn retain_source_file(&self, source_file: &str) {
        let mut files = self.files.lock();
        let group = files
            .entry(source_file.to_string())
            .or_insert_with(|| Self::new_file_group(source_file));
        group.pending += 1;
    }

    /// Host: a pending test from `source_file` finished.
    ///
    /// Tears the file store down the instant the pending count reaches
    /// zero. The result belongs to the source-file (container) boundary: a
    /// teardown failure here fails the container even when every test
    /// inside it passed.
    pub fn release_source_file(&self, source_file: &str) -> Result<()> {
        let store = {
            let mut files = self.files.lock();
            let Some(group) = files.get_mut(source_file) else {
                return Ok(());
            };
            group.pending = group.pending.saturating_sub(1);
            if group.pending > 0 {
                return Ok(());
            }
            files.remove(source_file).map(|group| group.store)
        };
        match store {
            Some(store) => {
                tracing::debug!(source_file, "last pending execution finished");
                store.close()
            }
            None => Ok(()),
        }
    }

    /// End of run: close any file stores still alive, then the global
    /// store, exactly once.
    pub fn close_run(&self) -> Result<()> {
        let leftover: Vec<(String, Arc<ScopedStore>)> = {
            let mut files = self.files.lock();
            files
                .drain()
                .map(|(file, group)| (file, group.store))
                .collect()
        };

        let mut first_failure = None;
        for (file, store) in leftover {
            tracing::debug!(source_file = %file, "closing file store left open at run end");
            if let Err(error) = store.close() {
                record_teardown_failure(&mut first_failure, error);
            }
        }
        if let Err(error) = self.global.close() {
            record_teardown_failure(&mut first_failure, error);
        }
        first_failure.map_or(Ok(()), Err)
    }

    fn new_file_group(source_file: &str) -> FileGroup {
        FileGroup {
            store: Arc::new(ScopedStore::new(
                Scope::SourceFile,
                format!("source file `{source_file}`"),
            )),
            pending: 0,
        }
    }

    fn file_store(&self, source_file: &str) -> Arc<ScopedStore> {
        let mut files = self.files.lock();
        let group = files
            .entry(source_file.to_string())
            .or_insert_with(|| Self::new_file_group(source_file));
        Arc::clone(&group.store)
    }

    /// Enforce that every declaration of `name` agrees on scope and factory.
    fn check_declaration(&self, key: &ResourceKey) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.declarations.entry(key.name().to_string()) {
            Entry::Occupied(existing) => {
                let declared = existing.get();
                if declared.scope != key.scope() {
                    return Err(Error::configuration(format!(
                        "two or more declarations share the name \"{}\" \
                         but with different scopes",
                        key.name()
                    )));
                }
                if declared.factory != *key.factory() {
                    return Err(Error::configuration(format!(
                        "two or more declarations share the name \"{}\" \
                         but with different factory classes",
                        key.name()
                    )));
                }
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(SharedDeclaration {
                    factory: key.factory().clone(),
                    scope: key.scope(),
                });
                Ok(())
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("file_group_count", &self.files.lock().len())
            .field("declaration_count", &self.declarations.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ExecutionScope
// ---------------------------------------------------------------------------

/// Teardown arena entry for one fresh (new-scoped) resource.
struct FreshEntry {
    factory: Box<dyn ErasedFactory>,
    resource: Option<Box<dyn ErasedResource>>,
    factory_name: &'static str,
}

/// One test/container execution.
///
/// Resolves the execution's injection points, runs its bodies under
/// permits, and owns the per-execution teardown arena for fresh resources.
pub struct ExecutionScope<'m> {
    manager: &'m LifecycleManager,
    source_file: String,
    points: Vec<InjectionPoint>,
    fresh: Mutex<Vec<FreshEntry>>,
}

impl ExecutionScope<'_> {
    /// The injection points this execution declares
    #[must_use]
    pub fn points(&self) -> &[InjectionPoint] {
        &self.points
    }

    /// Resolve one injection point to its (type-erased) value.
    pub fn resolve(&self, point: &InjectionPoint) -> Result<ResourceValue> {
        match Self::single_spec(point)? {
            InjectionSpec::New { factory, args } => self.resolve_fresh(factory, args),
            InjectionSpec::Shared {
                factory,
                name,
                scope,
                args,
            } => self.resolve_shared(point, factory, name, *scope, args),
        }
    }

    /// Resolve one injection point and downcast the value to `T`.
    ///
    /// # Errors
    /// A value of any other type is a contract violation.
    pub fn resolve_as<T: Send + Sync + 'static>(&self, point: &InjectionPoint) -> Result<Arc<T>> {
        let factory = Self::single_spec(point)?.factory().type_name();
        self.resolve(point)?.downcast::<T>().map_err(|_| Error::Contract {
            factory,
            message: format!(
                "is not of the requested type `{}`",
                std::any::type_name::<T>()
            ),
        })
    }

    /// Run `body` while holding permits for every shared key this
    /// execution touches.
    ///
    /// Permits are acquired in canonical order before the body and released
    /// in reverse order after it, on every exit path. Executions with no
    /// shared keys never block.
    pub fn exclusive<R>(&self, body: impl FnOnce() -> R) -> R {
        let keys = self.permit_keys();
        if keys.is_empty() {
            return body();
        }
        let _permits = self.manager.exclusion.acquire(keys);
        body()
    }

    /// Per-execution boundary: tear down fresh resources in reverse
    /// creation order.
    ///
    /// Teardown continues past failures; the first failure becomes this
    /// boundary's result and the rest are logged.
    pub fn close(self) -> Result<()> {
        let entries = mem::take(&mut *self.fresh.lock());
        Self::teardown_fresh(entries)
    }

    fn permit_keys(&self) -> Vec<PermitKey> {
        self.points
            .iter()
            .flat_map(|point| point.specs.iter())
            .filter_map(|spec| match spec {
                InjectionSpec::Shared {
                    name,
                    scope: Scope::Global,
                    ..
                } => Some(PermitKey::global(name.clone())),
                InjectionSpec::Shared {
                    name,
                    scope: Scope::SourceFile,
                    ..
                } => Some(PermitKey::source_file(self.source_file.clone(), name.clone())),
                _ => None,
            })
            .collect()
    }

    /// Exactly one specification per point; both or neither is a
    /// configuration error naming the offending parameter.
    fn single_spec(point: &InjectionPoint) -> Result<&InjectionSpec> {
        match point.specs.as_slice() {
            [spec] => Ok(spec),
            [] => Err(Error::configuration(format!(
                "{} declares neither a new nor a shared resource",
                point.description()
            ))),
            specs => {
                let fresh = specs.iter().any(|s| !s.is_shared());
                let shared = specs.iter().any(InjectionSpec::is_shared);
                if fresh && shared {
                    Err(Error::configuration(format!(
                        "{} declares both a new and a shared resource",
                        point.description()
                    )))
                } else {
                    Err(Error::configuration(format!(
                        "{} declares more than one resource specification",
                        point.description()
                    )))
                }
            }
        }
    }

    fn resolve_fresh(&self, provider: &FactoryProvider, args: &[String]) -> Result<ResourceValue> {
        check_arity(provider, args)?;
        let mut factory = provider.instantiate();
        match factory.create(args) {
            Ok(resource) => {
                tracing::debug!(factory = provider.type_name(), "created fresh resource");
                let value = resource.get_value();
                // Registered before first use, so the resource is torn down
                // at the execution boundary even when `get` failed.
                self.fresh.lock().push(FreshEntry {
                    factory,
                    resource: Some(resource),
                    factory_name: provider.type_name(),
                });
                value.map_err(|source| Error::Access {
                    factory: provider.type_name(),
                    source,
                })
            }
            Err(source) => {
                // The factory was built; its close still runs at the
                // execution boundary.
                self.fresh.lock().push(FreshEntry {
                    factory,
                    resource: None,
                    factory_name: provider.type_name(),
                });
                Err(Error::Creation {
                    factory: provider.type_name(),
                    source,
                })
            }
        }
    }

    fn resolve_shared(
        &self,
        point: &InjectionPoint,
        provider: &FactoryProvider,
        name: &str,
        scope: Scope,
        args: &[String],
    ) -> Result<ResourceValue> {
        if scope == Scope::New {
            return Err(Error::configuration(format!(
                "{} declares a shared resource with the new scope",
                point.description()
            )));
        }
        check_arity(provider, args)?;
        self.check_duplicate_declarations(provider, name, scope)?;

        let key = ResourceKey::shared(provider.clone(), name, scope);
        self.manager.check_declaration(&key)?;

        match scope {
            Scope::Global => self.manager.global.get_or_create(&key, args),
            Scope::SourceFile => self
                .manager
                .file_store(&self.source_file)
                .get_or_create(&key, args),
            Scope::New => Err(Error::configuration(format!(
                "{} declares a shared resource with the new scope",
                point.description()
            ))),
        }
    }

    /// Two identical shared keys on one execution are redundant.
    fn check_duplicate_declarations(
        &self,
        provider: &FactoryProvider,
        name: &str,
        scope: Scope,
    ) -> Result<()> {
        let count = self
            .points
            .iter()
            .flat_map(|point| point.specs.iter())
            .filter(|spec| match spec {
                InjectionSpec::Shared {
                    factory,
                    name: other,
                    scope: other_scope,
                    ..
                } => factory == provider && other == name && *other_scope == scope,
                InjectionSpec::New { .. } => false,
            })
            .count();
        if count > 1 {
            return Err(Error::configuration(format!(
                "{count} parameters declare a shared resource with the same \
                 factory type and name; this is redundant, so it is not allowed"
            )));
        }
        Ok(())
    }

    fn teardown_fresh(entries: Vec<FreshEntry>) -> Result<()> {
        let mut first_failure = None;
        for mut entry in entries.into_iter().rev() {
            if let Some(mut resource) = entry.resource.take()
                && let Err(source) = resource.close()
            {
                record_teardown_failure(
                    &mut first_failure,
                    Error::Teardown {
                        scope: "execution".to_string(),
                        resource: format!("resource from `{}`", entry.factory_name),
                        source,
                    },
                );
            }
            if let Err(source) = entry.factory.close() {
                record_teardown_failure(
                    &mut first_failure,
                    Error::Teardown {
                        scope: "execution".to_string(),
                        resource: format!("factory `{}`", entry.factory_name),
                        source,
                    },
                );
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        let leftovers = mem::take(&mut *self.fresh.lock());
        if !leftovers.is_empty() {
            tracing::warn!(
                count = leftovers.len(),
                "execution dropped without close; tearing down fresh resources"
            );
            let _ = Self::teardown_fresh(leftovers);
        }
    }
}

impl fmt::Debug for ExecutionScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("source_file", &self.source_file)
            .field("point_count", &self.points.len())
            .field("fresh_count", &self.fresh.lock().len())
            .finish()
    }
}

fn check_arity(provider: &FactoryProvider, args: &[String]) -> Result<()> {
    if provider.arity().accepts(args.len()) {
        return Ok(());
    }
    Err(Error::configuration(format!(
        "`{}` expects {}, but got {}",
        provider.type_name(),
        provider.arity(),
        args.len()
    )))
}
