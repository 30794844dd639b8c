//! # Atlas postgres store

#![deny(missing_docs)]

/// Database migrations for the atlas schema
pub mod migrations;

/// The region store implementation for postgres
pub mod region_store;

pub use migrations::{
    AppliedMigration, FailureKind, Migration, MigrationError, Migrator, MigratorConfig,
};
pub use region_store::PgRegionStore;
