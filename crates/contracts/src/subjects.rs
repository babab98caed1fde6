use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Every subject exchanged between ticketing services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subjects {
    /// A product was listed.
    ProductCreated,

    /// A product's details changed.
    ProductUpdated,
}

impl Subjects {
    /// All subjects, in declaration order.
    pub const ALL: [Self; 2] = [Self::ProductCreated, Self::ProductUpdated];

    /// The wire name of the subject.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProductCreated => "product:created",
            Self::ProductUpdated => "product:updated",
        }
    }
}

impl fmt::Display for Subjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The name does not belong to any known subject.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown subject `{0}`")]
pub struct UnknownSubject(pub String);

impl FromStr for Subjects {
    type Err = UnknownSubject;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| UnknownSubject(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_parse_round_trips_wire_names() {
        for subject in Subjects::ALL {
            assert_eq!(subject.as_str().parse::<Subjects>().unwrap(), subject);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_matches!("TicketCreated".parse::<Subjects>(), Err(UnknownSubject(name)) if name == "TicketCreated");
    }
}
