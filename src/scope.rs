//! Resource lifetime scopes

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Defines how long a resource lives and who may observe it.
///
/// `New` is the degenerate scope of per-injection resources: they are never
/// stored, never shared, and are torn down at the per-execution boundary.
/// The two shared scopes are backed by stores owned by the
/// [`LifecycleManager`](crate::LifecycleManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Default)]
pub enum Scope {
    /// A fresh resource per injection point, with exactly one consumer
    New,
    /// Lives while at least one test from the declaring source file is pending
    #[default]
    SourceFile,
    /// Lives for the entire run
    Global,
}

impl Scope {
    /// Get the scope hierarchy level (lower numbers = broader scope)
    #[must_use]
    pub fn hierarchy_level(&self) -> u8 {
        match self {
            Self::Global => 0,
            Self::SourceFile => 1,
            Self::New => 2,
        }
    }

    /// Check if this scope is broader than another scope
    #[must_use]
    pub fn is_broader_than(&self, other: &Scope) -> bool {
        self.hierarchy_level() < other.hierarchy_level()
    }

    /// Check if this scope is narrower than another scope
    #[must_use]
    pub fn is_narrower_than(&self, other: &Scope) -> bool {
        self.hierarchy_level() > other.hierarchy_level()
    }

    /// Whether resources at this scope are stored and shared
    #[must_use]
    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::New)
    }

    /// Generate a scope key for storage/lookup and diagnostics
    #[must_use]
    pub fn scope_key(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::SourceFile => "source-file",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_hierarchy_levels() {
        assert_eq!(Scope::Global.hierarchy_level(), 0);
        assert_eq!(Scope::SourceFile.hierarchy_level(), 1);
        assert_eq!(Scope::New.hierarchy_level(), 2);
    }

    #[test]
    fn test_broader_and_narrower() {
        assert!(Scope::Global.is_broader_than(&Scope::SourceFile));
        assert!(Scope::SourceFile.is_broader_than(&Scope::New));
        assert!(Scope::New.is_narrower_than(&Scope::Global));
        assert!(!Scope::Global.is_narrower_than(&Scope::Global));
    }

    #[test]
    fn test_shared_scopes() {
        assert!(Scope::Global.is_shared());
        assert!(Scope::SourceFile.is_shared());
        assert!(!Scope::New.is_shared());
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(Scope::New.scope_key(), "new");
        assert_eq!(Scope::SourceFile.scope_key(), "source-file");
        assert_eq!(Scope::Global.scope_key(), "global");
        assert_eq!(Scope::Global.to_string(), "global");
    }

    #[test]
    fn test_default_is_source_file() {
        assert_eq!(Scope::default(), Scope::SourceFile);
    }

    #[test]
    fn test_scope_is_hashable() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Scope::Global);
        set.insert(Scope::SourceFile);
        set.insert(Scope::SourceFile);
        assert_eq!(set.len(), 2);
    }
}
