//! Error types for the Erda operator
//!
//! Errors carry structured context fields so failures surface with the
//! platform, primitive, and operation that produced them. The controller's
//! error policy consults `is_retryable()` to pick a requeue strategy.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator subsystems
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The platform spec cannot be realized (unknown workload kind,
    /// duplicate job name, malformed annotation snippet, ...)
    #[error("bad spec for {platform}: {message}")]
    BadSpec {
        /// Name of the Platform with the invalid spec
        platform: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An initialization job reached the Failed condition; terminal for the
    /// current generation of the Platform
    #[error("job {job} failed")]
    JobFailed {
        /// Name of the failed job
        job: String,
    },

    /// A readiness wait ran past its deadline; the next tick retries
    #[error("{kind} {name} not ready within deadline")]
    DeadlineExceeded {
        /// Primitive kind that was being waited on
        kind: String,
        /// Primitive name
        name: String,
    },

    /// Composite launch failure aggregating per-bucket component names
    #[error("launch failed: {message}")]
    Launch {
        /// Per-bucket failure summary
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "launcher", "status")
        context: String,
    },
}

impl Error {
    /// Create a bad-spec error without platform context
    pub fn bad_spec(msg: impl Into<String>) -> Self {
        Self::BadSpec {
            platform: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a bad-spec error with platform context
    pub fn bad_spec_for(platform: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BadSpec {
            platform: platform.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a terminal job-failed error
    pub fn job_failed(job: impl Into<String>) -> Self {
        Self::JobFailed { job: job.into() }
    }

    /// Create a deadline-exceeded error for a readiness wait
    pub fn deadline_exceeded(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a composite launch error
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True when the underlying API error is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// True when the underlying API error is an optimistic-concurrency
    /// conflict on a status update (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// True when the primitive must be recreated instead of updated in
    /// place (Forbidden/Invalid responses to an update call)
    pub fn needs_recreate(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) } if ae.code == 403 || ae.code == 422
        )
    }

    /// Check if this error is retryable
    ///
    /// Bad specs and serialization errors are not retryable (require a spec
    /// fix). A failed job is terminal for the current generation. Kubernetes
    /// errors depend on the status code; deadline overruns retry on the next
    /// tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
                )
            }
            Error::BadSpec { .. } => false,
            Error::Serialization { .. } => false,
            Error::JobFailed { .. } => false,
            Error::DeadlineExceeded { .. } => true,
            Error::Launch { .. } => true,
            Error::Internal { .. } => true,
        }
    }
}

/// Map a kube API result into `Ok(None)` on 404
pub fn some_if_found<T>(res: std::result::Result<T, kube::Error>) -> crate::Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}
