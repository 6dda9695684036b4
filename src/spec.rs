//! Injection specifications and injection points.
//!
//! An external discovery mechanism (source-level declarations, attribute
//! macros, hand-written wiring) produces these; the manager only matches on
//! them.

use crate::factory::FactoryProvider;
use crate::scope::Scope;

/// The declarative request attached to an injection point.
#[derive(Debug, Clone)]
pub enum InjectionSpec {
    /// A fresh resource per injection; never stored, never shared
    New {
        /// The factory type to create the resource from
        factory: FactoryProvider,
        /// Arguments handed to `create`
        args: Vec<String>,
    },
    /// A named resource shared by everyone resolving the same name in `scope`
    Shared {
        /// The factory type to create the resource from
        factory: FactoryProvider,
        /// The unique name of the resource
        name: String,
        /// How long the resource lives
        scope: Scope,
        /// Arguments handed to `create`
        args: Vec<String>,
    },
}

impl InjectionSpec {
    /// A fresh-per-injection specification.
    pub fn fresh<S: Into<String>>(
        factory: FactoryProvider,
        args: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::New {
            factory,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A shared specification without arguments.
    pub fn shared(factory: FactoryProvider, name: impl Into<String>, scope: Scope) -> Self {
        Self::Shared {
            factory,
            name: name.into(),
            scope,
            args: Vec::new(),
        }
    }

    /// A shared specification with arguments.
    pub fn shared_with_args<S: Into<String>>(
        factory: FactoryProvider,
        name: impl Into<String>,
        scope: Scope,
        args: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::Shared {
            factory,
            name: name.into(),
            scope,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The factory type this specification names
    #[must_use]
    pub fn factory(&self) -> &FactoryProvider {
        match self {
            Self::New { factory, .. } | Self::Shared { factory, .. } => factory,
        }
    }

    /// The arguments handed to `create`
    #[must_use]
    pub fn args(&self) -> &[String] {
        match self {
            Self::New { args, .. } | Self::Shared { args, .. } => args,
        }
    }

    /// Whether this is a shared specification
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

/// A constructor or method parameter eligible for resource resolution.
#[derive(Debug, Clone)]
pub struct InjectionPoint {
    /// Parameter name, used verbatim in diagnostics
    pub parameter: String,
    /// Declaring method or constructor, used verbatim in diagnostics
    pub declared_in: String,
    /// Raw discovery output; exactly one specification is valid
    pub specs: Vec<InjectionSpec>,
}

impl InjectionPoint {
    /// An injection point carrying a single specification.
    pub fn new(
        parameter: impl Into<String>,
        declared_in: impl Into<String>,
        spec: InjectionSpec,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            declared_in: declared_in.into(),
            specs: vec![spec],
        }
    }

    /// Where this point is declared, for diagnostics
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "parameter [{}] in method [{}]",
            self.parameter, self.declared_in
        )
    }
}
