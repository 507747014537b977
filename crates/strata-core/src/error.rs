//! Error types for the strata migration engine.
//!
//! [`MigrationError`] is the single error type returned by every fallible
//! operation in the workspace. Its variants form the migration failure
//! taxonomy: invalid state transitions, database transition failures,
//! unsupported alterations, irreversible reversals, and dependency graph
//! problems. Failures raised while a migration runs are wrapped in
//! [`MigrationError::OperationFailed`] (or [`MigrationError::PartiallyApplied`])
//! so that callers always learn which migration and which operation broke.

use std::error::Error as StdError;

use thiserror::Error;

/// A boxed driver error carried by [`MigrationError::DatabaseTransition`].
pub type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// The primary error type for the strata migration engine.
///
/// # Examples
///
/// ```
/// use strata_core::error::MigrationError;
///
/// let err = MigrationError::Irreversible("Run SQL".into());
/// assert!(err.is_irreversible());
/// assert_eq!(err.to_string(), "Operation is not reversible: Run SQL");
/// ```
#[derive(Error, Debug)]
pub enum MigrationError {
    // ── Taxonomy ─────────────────────────────────────────────────────

    /// An operation's state effect references a nonexistent model or field,
    /// or would violate a project state invariant.
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// A schema editor or connection call failed.
    #[error("Database transition failed: {message}")]
    DatabaseTransition {
        /// Human-readable context for the failure.
        message: String,
        /// The underlying driver error, if any.
        #[source]
        source: Option<BoxedSource>,
    },

    /// The target engine cannot convert between two column storage classes.
    #[error("Cannot alter field {model}.{field} from {old_kind} to {new_kind}")]
    UnsupportedAlteration {
        /// The model owning the field.
        model: String,
        /// The field being altered.
        field: String,
        /// The field kind before the alteration.
        old_kind: String,
        /// The requested field kind.
        new_kind: String,
    },

    /// A backward transition was requested on an irreversible operation.
    #[error("Operation is not reversible: {0}")]
    Irreversible(String),

    /// The migration dependency graph contains a cycle.
    #[error("Circular dependency detected in migration graph: {0}")]
    DependencyCycle(String),

    // ── Graph and plan ───────────────────────────────────────────────

    /// A migration references a dependency that does not exist.
    #[error("Migration {referenced_by} depends on nonexistent node {node}")]
    NodeNotFound {
        /// The missing migration key, formatted as `app.name`.
        node: String,
        /// The migration holding the dangling reference.
        referenced_by: String,
    },

    /// A migration plan cannot be executed as requested.
    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Execution context ────────────────────────────────────────────

    /// The run was cancelled between two operations.
    #[error("Migration {migration} cancelled after {completed} operation(s), before {operation}")]
    Cancelled {
        /// The migration that was running, formatted as `app.name`.
        migration: String,
        /// The `describe()` text of the operation that did not run.
        operation: String,
        /// How many operations completed before cancellation.
        completed: usize,
    },

    /// An operation inside a migration failed.
    #[error("Migration {migration} failed at operation {index} ({operation}): {source}")]
    OperationFailed {
        /// The migration key, formatted as `app.name`.
        migration: String,
        /// The `describe()` text of the failing operation.
        operation: String,
        /// The zero-based position of the operation in the migration.
        index: usize,
        /// The underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// A non-transactional migration failed after some database transitions
    /// had already run. The database and the recorded state now disagree and
    /// the migration must not be retried automatically.
    #[error(
        "Migration {migration} was partially applied ({completed} operation(s) ran) and failed at \
         {operation}; manual intervention is required: {source}"
    )]
    PartiallyApplied {
        /// The migration key, formatted as `app.name`.
        migration: String,
        /// The `describe()` text of the failing operation.
        operation: String,
        /// How many database transitions completed before the failure.
        completed: usize,
        /// The underlying failure.
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    /// Wraps a driver error as a [`MigrationError::DatabaseTransition`].
    pub fn database<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::DatabaseTransition {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a [`MigrationError::DatabaseTransition`] without a driver error.
    pub fn database_message(message: impl Into<String>) -> Self {
        Self::DatabaseTransition {
            message: message.into(),
            source: None,
        }
    }

    /// Returns the innermost taxonomy error, looking through the
    /// `OperationFailed` and `PartiallyApplied` wrappers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::OperationFailed { source, .. } | Self::PartiallyApplied { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Returns `true` if the root cause is an invalid state transition.
    pub fn is_invalid_state_transition(&self) -> bool {
        matches!(self.root_cause(), Self::InvalidStateTransition(_))
    }

    /// Returns `true` if the root cause is a database transition failure.
    pub fn is_database_transition(&self) -> bool {
        matches!(self.root_cause(), Self::DatabaseTransition { .. })
    }

    /// Returns `true` if the root cause is an unsupported alteration.
    pub fn is_unsupported_alteration(&self) -> bool {
        matches!(self.root_cause(), Self::UnsupportedAlteration { .. })
    }

    /// Returns `true` if the root cause is an irreversible reversal.
    pub fn is_irreversible(&self) -> bool {
        matches!(self.root_cause(), Self::Irreversible(_))
    }

    /// Returns `true` if the root cause is a dependency cycle.
    pub fn is_dependency_cycle(&self) -> bool {
        matches!(self.root_cause(), Self::DependencyCycle(_))
    }

    /// Returns `true` if the root cause is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled { .. })
    }

    /// Returns `true` if the database track was left partially applied.
    pub fn is_partially_applied(&self) -> bool {
        matches!(self, Self::PartiallyApplied { .. })
    }
}

/// A convenience type alias for `Result<T, MigrationError>`.
pub type MigrationResult<T> = Result<T, MigrationError>;
