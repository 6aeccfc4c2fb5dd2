//! Shared fixtures for the crate's test suites.
use once_cell::sync::Lazy;

use crate::schema::Schema;

pub(crate) static ANIMALS_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::parse(include_str!("resources/schemas/animals.graphql"))
        .expect("the animals test schema is valid")
});
