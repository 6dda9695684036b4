//! Error types for resource resolution and teardown
use thiserror::Error;

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type used by the [`Resource`](crate::Resource) and
/// [`ResourceFactory`](crate::ResourceFactory) contracts.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Comprehensive error type for resource lifecycle operations
#[derive(Error, Debug)]
pub enum Error {
    /// An injection point or shared declaration is malformed
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// Creating a resource failed
    #[error("Unable to create a resource from `{factory}`")]
    Creation {
        /// The factory type that failed
        factory: &'static str,
        /// The underlying failure
        #[source]
        source: BoxError,
    },

    /// Getting the contents of a resource failed
    #[error("Unable to get the contents of the resource created by `{factory}`")]
    Access {
        /// The factory type that created the resource
        factory: &'static str,
        /// The underlying failure
        #[source]
        source: BoxError,
    },

    /// A factory or resource handed back a value that violates its contract
    #[error("The resource created by `{factory}` {message}")]
    Contract {
        /// The factory type that created the resource
        factory: &'static str,
        /// What the value failed to satisfy
        message: String,
    },

    /// Closing a resource or factory failed at a scope boundary.
    ///
    /// This is a failure of the closing event itself, not of any execution
    /// that used the resource; a container can fail this way even when
    /// every test inside it passed.
    #[error("Teardown of {resource} failed while closing the {scope} scope")]
    Teardown {
        /// The scope boundary whose closing event failed
        scope: String,
        /// The resource or factory being closed
        resource: String,
        /// The underlying failure
        #[source]
        source: BoxError,
    },

    /// A resolution arrived after its store was already torn down
    #[error("The {scope} resource store is already closed")]
    ScopeClosed {
        /// The store's scope label
        scope: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Get the factory type associated with this error (if any)
    #[must_use]
    pub fn factory(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { .. } | Self::Teardown { .. } | Self::ScopeClosed { .. } => None,
            Self::Creation { factory, .. }
            | Self::Access { factory, .. }
            | Self::Contract { factory, .. } => Some(factory),
        }
    }

    /// Check if this error fails an individual execution (as opposed to a
    /// scope boundary)
    #[must_use]
    pub fn is_execution_local(&self) -> bool {
        !matches!(self, Self::Teardown { .. })
    }
}

/// Keep the first teardown failure for the boundary result; log the rest.
pub(crate) fn record_teardown_failure(first: &mut Option<Error>, error: Error) {
    if first.is_none() {
        *first = Some(error);
    } else {
        tracing::warn!(error = %error, "additional teardown failure");
    }
}
