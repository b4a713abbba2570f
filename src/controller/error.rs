//! Error types for the Dogu controllers

use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix where they wrap a foreign error.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Dependency error: {0}")]
    DependencyError(String),

    #[error("Exec error: {0}")]
    ExecError(String),

    /// The stored object has a newer resourceVersion than the one we wrote against
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Actual state has not caught up with the desired state yet
    #[error("{reason}; checking again in {requeue_after:?}")]
    NotYetConverged {
        reason: String,
        requeue_after: Duration,
    },

    /// Retrying cannot help; external intervention is required
    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn not_yet_converged(reason: impl Into<String>, requeue_after: Duration) -> Self {
        Error::NotYetConverged {
            reason: reason.into(),
            requeue_after,
        }
    }

    /// Innermost error below any context wrapping
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wait duration for errors that only mean "come back later"
    pub fn requeue_after(&self) -> Option<Duration> {
        match self.root() {
            Error::NotYetConverged { requeue_after, .. } => Some(*requeue_after),
            _ => None,
        }
    }

    /// Stale resourceVersion on write
    pub fn is_conflict(&self) -> bool {
        match self.root() {
            Error::Conflict(_) => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// Errors that abort the reconciliation without requeue
    pub fn is_terminal(&self) -> bool {
        matches!(self.root(), Error::Terminal(_) | Error::ValidationError(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Adds a description of the failed operation to an error
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| Error::WithContext {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::WithContext {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}

/// Exponential backoff configuration for conflict retries
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
    /// Attempts before the conflict is handed to the caller
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 5.0,
            jitter: 0.1,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// No sleeping between attempts; used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }
}
