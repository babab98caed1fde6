//! Event contracts shared by every ticketing service.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod products;
mod subjects;

pub use products::{ProductCreated, ProductCreatedData, ProductUpdated, ProductUpdatedData};
pub use subjects::{Subjects, UnknownSubject};

use ticketing_events::{ContractRegistry, registry};

/// Builds the registry of every contract known to the ticketing system.
///
/// # Errors
///
/// Returns a registry error if two contracts claim the same subject.
pub fn registry() -> Result<ContractRegistry, registry::Error> {
    let mut builder = ContractRegistry::builder();
    builder
        .register_contract::<ProductCreated>()?
        .register_contract::<ProductUpdated>()?;

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_subject() {
        let registry = registry().unwrap();

        assert_eq!(registry.len(), Subjects::ALL.len());
        for subject in Subjects::ALL {
            assert!(registry.contains(subject.as_str()), "{subject} missing");
        }
    }
}
