//! Migration 99a3d2eb08f9: Enable the PostGIS and hstore extensions.
//!
//! Base of the revision chain. The region table declares `GEOMETRY` and
//! `HSTORE` columns, neither of which exists on a stock Postgres until these
//! extensions are installed.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::{Migration, MigrationError};

/// Installs the extensions providing the spatial and key-value column types.
pub struct EnableSpatialExtensions;

#[async_trait]
impl Migration for EnableSpatialExtensions {
    fn revision(&self) -> &'static str {
        "99a3d2eb08f9"
    }

    fn down_revision(&self) -> Option<&'static str> {
        None
    }

    fn name(&self) -> &'static str {
        "enable_spatial_extensions"
    }

    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
            .execute(&mut **tx)
            .await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS hstore")
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn down<'a>(&self, _tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        // Extensions are database-wide and may back objects outside this
        // chain, so they stay installed.
        Ok(())
    }
}
