//! # Atlas
//!
//! Region storage on PostGIS, with the schema migrations that create it.

#![deny(missing_docs)]

#[cfg(feature = "postgres")]
/// Postgres implementations: the migration runner and the region store.
pub mod pg {
    //! Re-exports `atlas_pg`.
    pub use atlas_pg::*;
}

pub mod prelude {
    //! The prelude module for the `atlas` crate.
    pub use atlas_core::prelude::*;

    #[cfg(feature = "postgres")]
    pub use super::pg::{Migrator, MigratorConfig, PgRegionStore};
}
