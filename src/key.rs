//! Resource identity and the canonical permit ordering.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::factory::FactoryProvider;
use crate::scope::Scope;

// ---------------------------------------------------------------------------
// ResourceKey
// ---------------------------------------------------------------------------

/// Identity of a nameable resource: factory type, name, and scope.
///
/// Two keys with equal name and scope must carry an equal factory type;
/// the violation is a configuration error detected at resolution time.
#[derive(Debug, Clone)]
pub struct ResourceKey {
    factory: FactoryProvider,
    name: String,
    scope: Scope,
}

impl ResourceKey {
    /// Key of a shared resource.
    pub fn shared(factory: FactoryProvider, name: impl Into<String>, scope: Scope) -> Self {
        Self {
            factory,
            name: name.into(),
            scope,
        }
    }

    /// The factory type this key names
    #[must_use]
    pub fn factory(&self) -> &FactoryProvider {
        &self.factory
    }

    /// The unique name of the resource
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long the resource lives
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope && self.name == other.name && self.factory == other.factory
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.factory.type_id().hash(state);
        self.name.hash(state);
        self.scope.hash(state);
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.name)
    }
}

// ---------------------------------------------------------------------------
// PermitKey
// ---------------------------------------------------------------------------

/// Identity of an exclusion permit: a resource key qualified by the store
/// domain that owns it.
///
/// A source-file key names a different resource in every file group, so the
/// permit carries the file id; without it, two files using the same shared
/// name would serialize against each other for no reason.
///
/// The derived ordering — scope, then domain, then name — is the canonical
/// total order permits are acquired in. Any two executions that need
/// overlapping keys attempt the shared ones in the same relative order,
/// which rules out circular wait.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermitKey {
    scope: Scope,
    /// Source-file id for source-file keys, empty for global keys
    domain: String,
    name: String,
}

impl PermitKey {
    /// Permit for a globally scoped resource.
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            scope: Scope::Global,
            domain: String::new(),
            name: name.into(),
        }
    }

    /// Permit for a source-file scoped resource owned by `source_file`.
    pub fn source_file(source_file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: Scope::SourceFile,
            domain: source_file.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PermitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope, self.domain, self.name)
    }
}
