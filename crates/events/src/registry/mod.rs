mod error;

pub use error::Error;

use std::collections::HashMap;

use tracing::debug;

use crate::contract::{EventContract, Schema};
use crate::subject::Subject;

/// Collects contracts during process warm-up.
///
/// Once [`RegistryBuilder::build`] is called the resulting [`ContractRegistry`]
/// is immutable, so the set of subjects cannot drift while serving traffic.
#[derive(Clone, Debug, Default)]
pub struct RegistryBuilder {
    contracts: HashMap<Subject, Schema>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema for a subject.
    ///
    /// Registering the same schema twice is accepted.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateSubject` if the subject is already registered
    /// with a different schema.
    pub fn register(&mut self, subject: Subject, schema: Schema) -> Result<&mut Self, Error> {
        if let Some(existing) = self.contracts.get(&subject) {
            if *existing == schema {
                return Ok(self);
            }
            return Err(Error::DuplicateSubject(subject));
        }

        debug!(%subject, fields = schema.fields().len(), "registered event contract");
        self.contracts.insert(subject, schema);

        Ok(self)
    }

    /// Registers a typed contract.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSubject` if the contract's subject is malformed, or
    /// `Error::DuplicateSubject` if it clashes with an earlier registration.
    pub fn register_contract<C>(&mut self) -> Result<&mut Self, Error>
    where
        C: EventContract,
    {
        let subject = Subject::new(C::SUBJECT)?;
        self.register(subject, C::schema())
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> ContractRegistry {
        ContractRegistry {
            contracts: self.contracts,
        }
    }
}

/// The read-only set of subjects a process can publish or listen to.
#[derive(Clone, Debug, Default)]
pub struct ContractRegistry {
    contracts: HashMap<Subject, Schema>,
}

impl ContractRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Looks up the schema registered for a subject.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSubject` if nothing is registered for the subject.
    pub fn lookup(&self, subject: &str) -> Result<&Schema, Error> {
        self.contracts
            .get(subject)
            .ok_or_else(|| Error::UnknownSubject(subject.to_string()))
    }

    /// Resolves a typed contract against the registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSubject` if the contract was never registered, or
    /// `Error::SchemaMismatch` if its schema differs from the registered one.
    pub fn resolve<C>(&self) -> Result<(Subject, Schema), Error>
    where
        C: EventContract,
    {
        let (subject, schema) = self
            .contracts
            .get_key_value(C::SUBJECT)
            .ok_or_else(|| Error::UnknownSubject(C::SUBJECT.to_string()))?;

        if *schema != C::schema() {
            return Err(Error::SchemaMismatch(subject.clone()));
        }

        Ok((subject.clone(), schema.clone()))
    }

    /// Whether a subject is registered.
    #[must_use]
    pub fn contains(&self, subject: &str) -> bool {
        self.contracts.contains_key(subject)
    }

    /// Iterates over every registered subject.
    pub fn subjects(&self) -> impl Iterator<Item = &Subject> {
        self.contracts.keys()
    }

    /// The number of registered subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// Whether no subject is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::contract::FieldKind;

    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Deserialize, Serialize)]
    struct OrderPlacedData {
        id: String,
    }

    struct OrderPlaced;

    impl EventContract for OrderPlaced {
        const SUBJECT: &'static str = "order:placed";

        type Data = OrderPlacedData;

        fn schema() -> Schema {
            Schema::new().required("id", FieldKind::String)
        }
    }

    struct DriftedOrderPlaced;

    impl EventContract for DriftedOrderPlaced {
        const SUBJECT: &'static str = "order:placed";

        type Data = OrderPlacedData;

        fn schema() -> Schema {
            Schema::new()
                .required("id", FieldKind::String)
                .required("total", FieldKind::Number)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = ContractRegistry::builder();
        builder.register_contract::<OrderPlaced>().unwrap();
        let registry = builder.build();

        assert_eq!(registry.lookup("order:placed").unwrap(), &OrderPlaced::schema());
        assert!(registry.contains("order:placed"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregistering_identical_schema_is_accepted() {
        let mut builder = ContractRegistry::builder();
        builder
            .register_contract::<OrderPlaced>()
            .unwrap()
            .register_contract::<OrderPlaced>()
            .unwrap();

        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn test_duplicate_subject_with_different_schema() {
        let mut builder = ContractRegistry::builder();
        builder.register_contract::<OrderPlaced>().unwrap();

        assert_matches!(
            builder.register_contract::<DriftedOrderPlaced>(),
            Err(Error::DuplicateSubject(subject)) if subject.as_str() == "order:placed"
        );
    }

    #[test]
    fn test_unknown_subject() {
        let registry = ContractRegistry::builder().build();

        assert_matches!(
            registry.lookup("order:placed"),
            Err(Error::UnknownSubject(subject)) if subject == "order:placed"
        );
        assert_matches!(
            registry.resolve::<OrderPlaced>(),
            Err(Error::UnknownSubject(_))
        );
    }

    #[test]
    fn test_resolve_detects_schema_drift() {
        let mut builder = ContractRegistry::builder();
        builder.register_contract::<OrderPlaced>().unwrap();
        let registry = builder.build();

        let (subject, schema) = registry.resolve::<OrderPlaced>().unwrap();
        assert_eq!(subject.as_str(), "order:placed");
        assert_eq!(schema, OrderPlaced::schema());

        assert_matches!(
            registry.resolve::<DriftedOrderPlaced>(),
            Err(Error::SchemaMismatch(_))
        );
    }

    #[test]
    fn test_invalid_subject() {
        let mut builder = ContractRegistry::builder();

        assert_matches!(
            builder.register(
                Subject::new("order:placed").unwrap(),
                Schema::new().required("id", FieldKind::String),
            ),
            Ok(_)
        );

        struct Bad;
        impl EventContract for Bad {
            const SUBJECT: &'static str = "order.placed";
            type Data = OrderPlacedData;
            fn schema() -> Schema {
                Schema::new()
            }
        }

        assert_matches!(
            builder.register_contract::<Bad>(),
            Err(Error::InvalidSubject(_))
        );
    }
}
