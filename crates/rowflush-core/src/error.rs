//! Error types for flush planning and execution.

use std::fmt;

/// The primary error type for all flush operations.
#[derive(Debug)]
pub enum Error {
    /// Operations could not be linearized (dependency cycle)
    Ordering(OrderingError),
    /// Two operations for one row could not be combined
    Merge(MergeError),
    /// Entity or relationship metadata is missing or inconsistent
    Metadata(MetadataError),
    /// A batch failed in the downstream statement sink
    Execution(ExecutionError),
    /// Invalid flush configuration
    Config(ConfigError),
    /// Execution was cancelled before all batches ran
    Cancelled,
    /// Custom error with message
    Custom(String),
}

/// A dependency cycle between pending row operations.
#[derive(Debug, Clone)]
pub struct OrderingError {
    pub kind: OrderingErrorKind,
    pub message: String,
    /// Entities of the operations that could not be ordered (sorted, deduplicated).
    pub entities: Vec<String>,
    /// Rendered identities of the operations that could not be ordered.
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingErrorKind {
    /// Foreign-key or same-row edges form a cycle
    Cycle,
}

#[derive(Debug, Clone)]
pub struct MergeError {
    pub kind: MergeErrorKind,
    pub message: String,
    /// Rendered identity of the row the operations were tracked under.
    pub identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeErrorKind {
    /// The pair of operation kinds has no defined combination
    IncompatibleKinds,
    /// Two deletes with different identities claimed the same slot
    ConflictingDeletes,
    /// A deferred key reference could not be resolved at execution time
    UnresolvedKey,
}

#[derive(Debug, Clone)]
pub struct MetadataError {
    pub kind: MetadataErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    /// Entity is not registered
    UnknownEntity,
    /// Relationship refers to an entity or column that does not exist
    InvalidRelationship,
    /// Entity declares no primary key
    MissingPrimaryKey,
    /// Entity registered twice
    DuplicateEntity,
}

#[derive(Debug)]
pub struct ExecutionError {
    /// Zero-based position of the failing batch in the flush plan.
    pub batch_index: usize,
    /// Entity targeted by the failing batch.
    pub entity: String,
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this an internal consistency error (contract violation by the caller)?
    ///
    /// These are never retryable and indicate a bug in the layer that produced
    /// the operations rather than a problem with the data.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Merge(_))
    }

    /// Is this a dependency cycle?
    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            Error::Ordering(OrderingError {
                kind: OrderingErrorKind::Cycle,
                ..
            })
        )
    }

    /// Index of the batch that failed, for execution errors.
    pub fn failed_batch(&self) -> Option<usize> {
        match self {
            Error::Execution(e) => Some(e.batch_index),
            _ => None,
        }
    }
}

impl OrderingError {
    /// Build a cycle error from the operations left unsorted.
    pub fn cycle(mut entities: Vec<String>, identities: Vec<String>) -> Self {
        entities.sort();
        entities.dedup();
        Self {
            kind: OrderingErrorKind::Cycle,
            message: format!(
                "cannot order {} operation(s) over entities [{}]",
                identities.len(),
                entities.join(", ")
            ),
            entities,
            identities,
        }
    }
}

impl MergeError {
    pub fn new(kind: MergeErrorKind, identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            identity: identity.into(),
        }
    }
}

impl MetadataError {
    pub fn new(kind: MetadataErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Ordering(e) => write!(f, "Ordering error: {}", e),
            Error::Merge(e) => write!(f, "Merge error: {}", e),
            Error::Metadata(e) => write!(f, "Metadata error: {}", e.message),
            Error::Execution(e) => write!(f, "Execution error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cancelled => write!(f, "Flush cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Execution(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for OrderingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identities.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.message, self.identities.join(" <-> "))
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (row {})", self.message, self.identity)
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} on '{}' failed: {}",
            self.batch_index, self.entity, self.message
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<OrderingError> for Error {
    fn from(err: OrderingError) -> Self {
        Error::Ordering(err)
    }
}

impl From<MergeError> for Error {
    fn from(err: MergeError) -> Self {
        Error::Merge(err)
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Error::Metadata(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Error::Execution(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: format!("invalid configuration: {err}"),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for flush operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn cycle_error_lists_entities_once() {
        let err = OrderingError::cycle(
            vec!["b".into(), "a".into(), "b".into()],
            vec!["a<temp:1>".into(), "b<temp:2>".into()],
        );
        assert_eq!(err.entities, vec!["a".to_string(), "b".to_string()]);
        let err = Error::from(err);
        assert!(err.is_cycle());
        assert!(!err.is_internal());
        assert!(err.to_string().contains("a<temp:1> <-> b<temp:2>"));
    }

    #[test]
    fn merge_errors_are_internal() {
        let err = Error::from(MergeError::new(
            MergeErrorKind::ConflictingDeletes,
            "artist{id=1}",
            "two deletes",
        ));
        assert!(err.is_internal());
        assert_eq!(err.failed_batch(), None);
    }

    #[test]
    fn execution_error_exposes_source() {
        let err = Error::Execution(ExecutionError {
            batch_index: 3,
            entity: "painting".into(),
            message: "constraint violated".into(),
            source: Some(Box::new(Error::Custom("fk violation".into()))),
        });
        assert_eq!(err.failed_batch(), Some(3));
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("fk violation".to_string())
        );
    }

    #[test]
    fn config_error_from_json() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(parse);
        assert!(matches!(err, Error::Config(_)));
        assert!(err.source().is_some());
    }
}
