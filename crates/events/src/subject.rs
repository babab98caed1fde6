use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised when validating a subject name.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The subject is empty.
    #[error("subject must not be empty")]
    Empty,

    /// The subject contains a character other than ASCII letters, digits, '-' or ':'.
    #[error("invalid subject `{0}` - only ASCII letters, digits, '-' and ':' are allowed")]
    InvalidCharacter(String),
}

/// An immutable subject name, scoped to exactly one event contract.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(Arc<str>);

impl Subject {
    /// Creates a new `Subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or contains anything but ASCII
    /// letters, digits, '-' and ':'.
    pub fn new(subject: impl Into<String>) -> Result<Self, Error> {
        let subject = subject.into();

        if subject.is_empty() {
            return Err(Error::Empty);
        }

        if !subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':')
        {
            return Err(Error::InvalidCharacter(subject));
        }

        Ok(Self(subject.into()))
    }

    /// Returns the subject name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Subject {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0.to_string()
    }
}

impl TryFrom<&str> for Subject {
    type Error = Error;

    fn try_from(subject: &str) -> Result<Self, Self::Error> {
        Self::new(subject)
    }
}
