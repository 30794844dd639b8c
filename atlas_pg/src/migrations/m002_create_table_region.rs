//! Migration a049e5eb24dd: Create the region table.
//!
//! Regions are administrative or geographic areas keyed by a caller supplied
//! relation id. The geometry column gets its GIST index as a separate
//! statement, with pages packed full (`FILLFACTOR=100`).

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::{Migration, MigrationError};

/// Creates the `region` table and its indexes.
pub struct CreateTableRegion;

#[async_trait]
impl Migration for CreateTableRegion {
    fn revision(&self) -> &'static str {
        "a049e5eb24dd"
    }

    fn down_revision(&self) -> Option<&'static str> {
        Some("99a3d2eb08f9")
    }

    fn name(&self) -> &'static str {
        "create_table_region"
    }

    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        // No IF NOT EXISTS: an existing table is a conflict, not a no-op.
        sqlx::query(
            r#"
            CREATE TABLE region (
                relation_id BIGINT NOT NULL,
                name TEXT,
                geometry GEOMETRY(GEOMETRY, 3857),
                admin_level INTEGER,
                tags HSTORE,
                PRIMARY KEY (relation_id)
            )
            "#,
        )
        .execute(&mut **tx)
        .await?;

        sqlx::query("CREATE INDEX ix_region_relation_id ON region (relation_id)")
            .execute(&mut **tx)
            .await?;

        sqlx::query("CREATE INDEX ix_region_admin_level ON region (admin_level)")
            .execute(&mut **tx)
            .await?;

        sqlx::query(
            r#"
            CREATE INDEX ix_region_geometry ON region
            USING GIST (geometry) WITH (FILLFACTOR=100)
            "#,
        )
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn down<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        // Indexes are dropped with the table. A missing table is an error.
        sqlx::query("DROP TABLE region")
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}
