//! Database migration system for atlas_pg.
//!
//! Migrations are reversible steps identified by opaque revision tokens. Each
//! step names the revision it builds on, and the steps are applied in the
//! order of that chain. Applied revisions are tracked in the database together
//! with a checksum.
//!
//! # Usage
//!
//! ```rust,ignore
//! use atlas_pg::migrations::Migrator;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://...").await?;
//! let migrator = Migrator::new(pool);
//!
//! // Upgrade to the newest revision
//! let applied = migrator.run().await?;
//!
//! // Revert the newest step
//! migrator.downgrade(1).await?;
//!
//! println!("Current revision: {:?}", migrator.current_revision().await?);
//! ```
//!
//! # Adding New Migrations
//!
//! 1. Create a new file `mXXX_description.rs` in this directory
//! 2. Implement the `Migration` trait, pointing `down_revision` at the
//!    current head
//! 3. Add the migration to the `MIGRATIONS` array in this file

mod config;
mod m001_enable_spatial_extensions;
mod m002_create_table_region;

pub use config::{DEFAULT_TRACKING_TABLE, MigratorConfig};
pub use m001_enable_spatial_extensions::EnableSpatialExtensions;
pub use m002_create_table_region::CreateTableRegion;

use async_trait::async_trait;
use atlas_core::{RevisionChain, RevisionGraphError};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;

/// All bundled migrations. Order here does not matter; the revision chain
/// decides it.
const MIGRATIONS: &[&dyn Migration] = &[&EnableSpatialExtensions, &CreateTableRegion];

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A database error occurred outside of a migration step.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The migrations do not form a single chain, or a target is not on it.
    #[error("Revision error: {0}")]
    Revision(#[from] RevisionGraphError),

    /// A migration's checksum doesn't match what was previously applied.
    #[error("Migration {revision} ({name}) checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        /// The revision of the migration with mismatched checksum.
        revision: String,
        /// The name of the migration.
        name: String,
        /// The checksum that was expected (from the database).
        expected: String,
        /// The checksum that was found (from the code).
        found: String,
    },

    /// The database records a revision this build does not know about.
    #[error("Applied revision {0} is not part of the migration chain")]
    UnknownApplied(String),

    /// The applied revisions skip over an earlier step of the chain.
    #[error("Revision {revision} is applied but its predecessor {missing} is not")]
    OutOfOrder {
        /// An applied revision.
        revision: String,
        /// The earlier revision that is not applied.
        missing: String,
    },

    /// A migration step failed. `source` is the database error, unchanged.
    #[error("Migration {revision} ({name}) failed: {source}")]
    MigrationFailed {
        /// The revision of the migration that failed.
        revision: String,
        /// The name of the migration.
        name: String,
        /// The underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// The migrator configuration is unusable.
    #[error("Invalid migrator configuration: {0}")]
    InvalidConfig(String),
}

/// Broad category of a database failure, read from its SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The object being created already exists.
    SchemaConflict,
    /// The role lacks the privilege for the statement.
    PermissionDenied,
    /// A type or extension the statement needs is not installed.
    UnsupportedType,
    /// The object being dropped or altered does not exist.
    MissingObject,
    /// Anything else, including non-database errors.
    Other,
}

impl FailureKind {
    /// Classifies a Postgres SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            // duplicate_table, duplicate_object
            "42P07" | "42710" => Self::SchemaConflict,
            // insufficient_privilege
            "42501" => Self::PermissionDenied,
            // undefined_object, feature_not_supported, undefined_file
            "42704" | "0A000" | "58P01" => Self::UnsupportedType,
            // undefined_table
            "42P01" => Self::MissingObject,
            _ => Self::Other,
        }
    }
}

impl MigrationError {
    /// Classifies the underlying database error without altering it.
    pub fn kind(&self) -> FailureKind {
        let source = match self {
            Self::Database(err) | Self::MigrationFailed { source: err, .. } => err,
            _ => return FailureKind::Other,
        };
        source
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| FailureKind::from_sqlstate(&code))
            .unwrap_or(FailureKind::Other)
    }
}

/// Represents a single reversible database migration.
///
/// Migrations are defined as structs implementing this trait, allowing
/// both simple SQL execution and complex Rust logic when needed.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use atlas_pg::migrations::{Migration, MigrationError};
/// use sqlx::{Postgres, Transaction};
///
/// pub struct CreateRiver;
///
/// #[async_trait]
/// impl Migration for CreateRiver {
///     fn revision(&self) -> &'static str { "5d41402abc4b" }
///
///     fn down_revision(&self) -> Option<&'static str> { Some("a049e5eb24dd") }
///
///     fn name(&self) -> &'static str { "create_table_river" }
///
///     async fn up<'a>(
///         &self,
///         tx: &mut Transaction<'a, Postgres>,
///     ) -> Result<(), MigrationError> {
///         sqlx::query("CREATE TABLE river (id BIGINT PRIMARY KEY)")
///             .execute(&mut **tx)
///             .await?;
///         Ok(())
///     }
///
///     async fn down<'a>(
///         &self,
///         tx: &mut Transaction<'a, Postgres>,
///     ) -> Result<(), MigrationError> {
///         sqlx::query("DROP TABLE river").execute(&mut **tx).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Migration: Send + Sync {
    /// Opaque token identifying this step (e.g. "a049e5eb24dd").
    fn revision(&self) -> &'static str;

    /// Revision that must be applied before this one, `None` for the base.
    fn down_revision(&self) -> Option<&'static str>;

    /// Human-readable name (e.g., "create_table_region").
    fn name(&self) -> &'static str;

    /// Apply the step within the provided transaction.
    ///
    /// The transaction is managed by the Migrator - do not commit or rollback.
    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError>;

    /// Revert the step within the provided transaction.
    ///
    /// The transaction is managed by the Migrator - do not commit or rollback.
    async fn down<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError>;

    /// Returns the checksum of this migration for tamper detection.
    ///
    /// Default implementation computes SHA-256 of revision, down revision and name.
    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.revision().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.down_revision().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.name().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl atlas_core::Revisioned for dyn Migration {
    fn revision(&self) -> &str {
        Migration::revision(self)
    }

    fn down_revision(&self) -> Option<&str> {
        Migration::down_revision(self)
    }
}

/// Record of a migration that has been applied.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    /// The revision of the migration.
    pub revision: String,
    /// The revision it was applied on top of.
    pub down_revision: Option<String>,
    /// The human-readable name of the migration.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: chrono::DateTime<chrono::Utc>,
    /// The checksum recorded when the migration was applied.
    pub checksum: String,
}

type Chain = RevisionChain<&'static dyn Migration>;

/// Handles database migrations for atlas_pg.
///
/// The migrator tracks applied revisions in its tracking table and moves the
/// schema up or down the revision chain one transaction per step.
#[derive(Clone)]
pub struct Migrator {
    pool: PgPool,
    config: MigratorConfig,
    migrations: &'static [&'static dyn Migration],
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field(
                "migrations",
                &self.migrations.iter().map(|m| m.revision()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Creates a new migrator with the given connection pool and default configuration.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: MigratorConfig::default(),
            migrations: MIGRATIONS,
        }
    }

    /// Creates a migrator with a custom configuration.
    pub fn with_config(pool: PgPool, config: MigratorConfig) -> Result<Self, MigrationError> {
        config.validate()?;
        Ok(Self {
            pool,
            config,
            migrations: MIGRATIONS,
        })
    }

    /// Replaces the bundled migrations with another set.
    pub fn with_migrations(mut self, migrations: &'static [&'static dyn Migration]) -> Self {
        self.migrations = migrations;
        self
    }

    fn chain(&self) -> Result<Chain, MigrationError> {
        Ok(RevisionChain::build(self.migrations.iter().copied())?)
    }

    /// Ensures the migration tracking table exists.
    async fn ensure_tracking_table(&self) -> Result<(), MigrationError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                revision VARCHAR(64) PRIMARY KEY,
                down_revision VARCHAR(64),
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
                checksum VARCHAR(64) NOT NULL
            )
            "#,
            self.config.tracking_table
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        Ok(())
    }

    /// Reads the applied revisions and checks them against the chain.
    ///
    /// Returns the newest applied revision.
    async fn current(&self, chain: &Chain) -> Result<Option<&'static str>, MigrationError> {
        let applied = self.applied().await?;
        let count = applied.len();

        let mut positions = HashMap::with_capacity(count);
        for record in &applied {
            let position = chain
                .position(&record.revision)
                .ok_or_else(|| MigrationError::UnknownApplied(record.revision.clone()))?;

            let migration = chain.steps()[position];
            let current_checksum = migration.checksum();
            if current_checksum != record.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    revision: record.revision.clone(),
                    name: record.name.clone(),
                    expected: record.checksum.clone(),
                    found: current_checksum,
                });
            }
            positions.insert(position, record);
        }

        // Applied revisions must be exactly the first `count` steps.
        if let Some((&position, record)) = positions.iter().find(|(p, _)| **p >= count) {
            let missing = (0..position)
                .find(|p| !positions.contains_key(p))
                .map(|p| chain.steps()[p].revision())
                .unwrap_or_default();
            return Err(MigrationError::OutOfOrder {
                revision: record.revision.clone(),
                missing: missing.to_string(),
            });
        }

        Ok(count.checked_sub(1).map(|p| chain.steps()[p].revision()))
    }

    async fn begin_step(&self) -> Result<Transaction<'static, Postgres>, MigrationError> {
        let mut tx = self.pool.begin().await?;
        if let Some(sql) = self.config.lock_timeout_statement() {
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        Ok(tx)
    }

    fn step_failed(migration: &dyn Migration, err: MigrationError) -> MigrationError {
        log::warn!(
            "Migration {} ({}) failed: {}",
            migration.revision(),
            migration.name(),
            err
        );
        match err {
            MigrationError::Database(source) => MigrationError::MigrationFailed {
                revision: migration.revision().to_string(),
                name: migration.name().to_string(),
                source,
            },
            other => other,
        }
    }

    async fn apply(&self, migration: &'static dyn Migration) -> Result<(), MigrationError> {
        log::info!(
            "Upgrading {} -> {} ({})...",
            migration.down_revision().unwrap_or("base"),
            migration.revision(),
            migration.name()
        );

        let mut tx = self.begin_step().await?;

        migration
            .up(&mut tx)
            .await
            .map_err(|e| Self::step_failed(migration, e))?;

        let sql = format!(
            r#"
            INSERT INTO {} (revision, down_revision, name, checksum)
            VALUES ($1, $2, $3, $4)
            "#,
            self.config.tracking_table
        );
        sqlx::query(&sql)
            .bind(migration.revision())
            .bind(migration.down_revision())
            .bind(migration.name())
            .bind(migration.checksum())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::info!(
            "Migration {} ({}) applied successfully",
            migration.revision(),
            migration.name()
        );
        Ok(())
    }

    async fn revert(&self, migration: &'static dyn Migration) -> Result<(), MigrationError> {
        log::info!(
            "Downgrading {} -> {} ({})...",
            migration.revision(),
            migration.down_revision().unwrap_or("base"),
            migration.name()
        );

        let mut tx = self.begin_step().await?;

        migration
            .down(&mut tx)
            .await
            .map_err(|e| Self::step_failed(migration, e))?;

        let sql = format!(
            "DELETE FROM {} WHERE revision = $1",
            self.config.tracking_table
        );
        sqlx::query(&sql)
            .bind(migration.revision())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::info!(
            "Migration {} ({}) reverted successfully",
            migration.revision(),
            migration.name()
        );
        Ok(())
    }

    /// Upgrades to the newest revision.
    ///
    /// Each migration runs in its own transaction. If a migration fails,
    /// that transaction is rolled back, previously applied migrations
    /// remain committed and no further migrations run.
    ///
    /// Returns the number of migrations applied.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        let chain = self.chain()?;
        match chain.head() {
            Some(head) => self.upgrade_to(head.revision()).await,
            None => {
                log::debug!("No migrations to run");
                Ok(0)
            }
        }
    }

    /// Upgrades up to and including `target`.
    ///
    /// Returns the number of migrations applied.
    pub async fn upgrade_to(&self, target: &str) -> Result<usize, MigrationError> {
        self.ensure_tracking_table().await?;
        let chain = self.chain()?;
        let current = self.current(&chain).await?;

        let path = chain.upgrade_path(current, target)?;
        if path.is_empty() {
            log::debug!("Already at revision {target}");
        }

        for migration in path {
            self.apply(*migration).await?;
        }

        Ok(path.len())
    }

    /// Reverts the newest `steps` applied migrations, or fewer if fewer are applied.
    ///
    /// Returns the number of migrations reverted.
    pub async fn downgrade(&self, steps: usize) -> Result<usize, MigrationError> {
        self.ensure_tracking_table().await?;
        let chain = self.chain()?;
        let current = self.current(&chain).await?;

        let path = chain.downgrade_path(current, None)?;
        let mut count = 0;
        for migration in path.into_iter().take(steps) {
            self.revert(*migration).await?;
            count += 1;
        }

        Ok(count)
    }

    /// Reverts migrations until `target` is the newest applied revision.
    ///
    /// `None` reverts every migration.
    ///
    /// Returns the number of migrations reverted.
    pub async fn downgrade_to(&self, target: Option<&str>) -> Result<usize, MigrationError> {
        self.ensure_tracking_table().await?;
        let chain = self.chain()?;
        let current = self.current(&chain).await?;

        let path = chain.downgrade_path(current, target)?;
        let count = path.len();
        for migration in path {
            self.revert(*migration).await?;
        }

        Ok(count)
    }

    /// Returns the newest applied revision, `None` if nothing is applied.
    pub async fn current_revision(&self) -> Result<Option<String>, MigrationError> {
        self.ensure_tracking_table().await?;
        let chain = self.chain()?;
        Ok(self.current(&chain).await?.map(str::to_string))
    }

    /// Returns every known migration, from base to head.
    pub fn history(&self) -> Result<Vec<&'static dyn Migration>, MigrationError> {
        Ok(self.chain()?.steps().to_vec())
    }

    /// Returns list of all pending migrations, oldest first.
    pub async fn pending(&self) -> Result<Vec<&'static dyn Migration>, MigrationError> {
        self.ensure_tracking_table().await?;
        let chain = self.chain()?;
        let applied = match self.current(&chain).await? {
            Some(current) => chain.position(current).map_or(0, |p| p + 1),
            None => 0,
        };

        Ok(chain.steps()[applied..].to_vec())
    }

    /// Returns list of all applied migrations, in the order they were applied.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_tracking_table().await?;

        let sql = format!(
            r#"
            SELECT revision, down_revision, name, applied_at, checksum
            FROM {}
            ORDER BY applied_at ASC, revision ASC
            "#,
            self.config.tracking_table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration {
                revision: row.get("revision"),
                down_revision: row.get("down_revision"),
                name: row.get("name"),
                applied_at: row.get("applied_at"),
                checksum: row.get("checksum"),
            })
            .collect())
    }
}
