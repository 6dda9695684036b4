//! Resource and factory contracts, plus the type-erasure layer the stores
//! and the manager work with.
//!
//! Implementors write the typed [`Resource`] and [`ResourceFactory`] traits;
//! resolution hands values across the manager as `Arc<dyn Any>` so that
//! heterogeneous resources can live in one store.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;

/// Type-erased resource value handed to injection points.
///
/// Use [`ExecutionScope::resolve_as`](crate::ExecutionScope::resolve_as) to
/// downcast back to the concrete type.
pub type ResourceValue = Arc<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// ArgArity
// ---------------------------------------------------------------------------

/// Argument count accepted by a factory's `create`.
///
/// Violations are detected before `create` is invoked and reported as
/// configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgArity {
    /// Any number of arguments
    Any,
    /// Exactly this many arguments
    Exactly(usize),
    /// At most this many arguments
    AtMost(usize),
}

impl ArgArity {
    /// Check whether `count` arguments satisfy this arity
    #[must_use]
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(n) => count == *n,
            Self::AtMost(n) => count <= *n,
        }
    }
}

impl fmt::Display for ArgArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn plural(n: usize) -> &'static str {
            if n == 1 { "argument" } else { "arguments" }
        }
        match self {
            Self::Any => write!(f, "any number of arguments"),
            Self::Exactly(n) => write!(f, "exactly {n} {}", plural(*n)),
            Self::AtMost(n) => write!(f, "at most {n} {}", plural(*n)),
        }
    }
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A resource: lazily yields a value and is closeable.
///
/// `get` should hand out clones of one shared value so that every consumer
/// of a shared resource observes the same allocation.
pub trait Resource: Send + 'static {
    /// The value handed to injection points.
    type Value: Send + Sync + 'static;

    /// Returns the contents of the resource.
    fn get(&self) -> std::result::Result<Arc<Self::Value>, BoxError>;

    /// Closes the resource.
    fn close(&mut self) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

/// A factory turns an ordered sequence of string arguments into a closeable
/// [`Resource`]. Stateless between calls except through `create`.
pub trait ResourceFactory: Send + 'static {
    /// The value produced by this factory's resources.
    type Value: Send + Sync + 'static;

    /// Argument count `create` accepts.
    const ARITY: ArgArity = ArgArity::Any;

    /// Returns a new resource, populated or configured by `args`.
    fn create(
        &mut self,
        args: &[String],
    ) -> std::result::Result<Box<dyn Resource<Value = Self::Value>>, BoxError>;

    /// Closes the resource factory.
    fn close(&mut self) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

/// Type-erased resource stored in scoped stores and execution arenas.
pub(crate) trait ErasedResource: Send {
    fn get_value(&self) -> std::result::Result<ResourceValue, BoxError>;
    fn close(&mut self) -> std::result::Result<(), BoxError>;
}

struct TypedResource<V: Send + Sync + 'static> {
    resource: Box<dyn Resource<Value = V>>,
}

impl<V: Send + Sync + 'static> ErasedResource for TypedResource<V> {
    fn get_value(&self) -> std::result::Result<ResourceValue, BoxError> {
        let value = self.resource.get()?;
        Ok(value)
    }

    fn close(&mut self) -> std::result::Result<(), BoxError> {
        self.resource.close()
    }
}

/// Type-erased factory interface so stores can hold factories of different
/// resource types in a single map.
pub(crate) trait ErasedFactory: Send {
    fn create(
        &mut self,
        args: &[String],
    ) -> std::result::Result<Box<dyn ErasedResource>, BoxError>;
    fn close(&mut self) -> std::result::Result<(), BoxError>;
}

struct TypedFactory<F: ResourceFactory> {
    factory: F,
}

impl<F: ResourceFactory> ErasedFactory for TypedFactory<F> {
    fn create(
        &mut self,
        args: &[String],
    ) -> std::result::Result<Box<dyn ErasedResource>, BoxError> {
        let resource = self.factory.create(args)?;
        Ok(Box::new(TypedResource { resource }))
    }

    fn close(&mut self) -> std::result::Result<(), BoxError> {
        self.factory.close()
    }
}

// ---------------------------------------------------------------------------
// FactoryProvider
// ---------------------------------------------------------------------------

/// Constructible identity of a factory type.
///
/// Injection specifications name a factory *type*, not an instance; the
/// provider captures everything resolution needs from that type — identity
/// for dedup checks, the type name for diagnostics, the declared arity, and
/// a constructor to instantiate the factory on first use.
#[derive(Clone)]
pub struct FactoryProvider {
    type_id: TypeId,
    type_name: &'static str,
    arity: ArgArity,
    construct: fn() -> Box<dyn ErasedFactory>,
}

impl FactoryProvider {
    /// Provider for factory type `F`, instantiated on demand via `Default`.
    #[must_use]
    pub fn of<F>() -> Self
    where
        F: ResourceFactory + Default,
    {
        Self {
            type_id: TypeId::of::<F>(),
            type_name: std::any::type_name::<F>(),
            arity: F::ARITY,
            construct: || {
                Box::new(TypedFactory {
                    factory: F::default(),
                })
            },
        }
    }

    /// The factory's type name, used verbatim in diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Argument count the factory accepts
    #[must_use]
    pub fn arity(&self) -> ArgArity {
        self.arity
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn instantiate(&self) -> Box<dyn ErasedFactory> {
        (self.construct)()
    }
}

impl PartialEq for FactoryProvider {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for FactoryProvider {}

impl fmt::Debug for FactoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryProvider")
            .field("type_name", &self.type_name)
            .field("arity", &self.arity)
            .finish()
    }
}
