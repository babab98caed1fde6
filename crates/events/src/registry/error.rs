use thiserror::Error;

use crate::subject::{self, Subject};

/// Errors that can occur in the contract registry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The subject is already registered with a different schema.
    #[error("subject `{0}` is already registered with a different schema")]
    DuplicateSubject(Subject),

    /// The subject name is invalid.
    #[error(transparent)]
    InvalidSubject(#[from] subject::Error),

    /// The contract's schema differs from the registered one.
    #[error("contract for `{0}` does not match the registered schema")]
    SchemaMismatch(Subject),

    /// No contract is registered for the subject.
    #[error("no contract registered for subject `{0}`")]
    UnknownSubject(String),
}
