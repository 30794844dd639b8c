//! Configuration for the migration runner.

use std::time::Duration;

use super::MigrationError;

/// Name of the table that records applied revisions unless configured otherwise.
pub const DEFAULT_TRACKING_TABLE: &str = "_atlas_migrations";

/// Postgres truncates identifiers beyond this length.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Configuration for the [`Migrator`](super::Migrator).
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Table recording which revisions are applied.
    ///
    /// Must be a bare SQL identifier (ASCII letters, digits and `_`, not
    /// starting with a digit). It is interpolated into statements unquoted.
    ///
    /// Default: `_atlas_migrations`
    pub tracking_table: String,

    /// Upper bound on how long a step waits for catalog locks.
    ///
    /// When set, every step transaction starts with `SET LOCAL lock_timeout`.
    ///
    /// Default: `None` (the server setting applies)
    pub lock_timeout: Option<Duration>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
            lock_timeout: None,
        }
    }
}

impl MigratorConfig {
    /// Sets the tracking table name.
    pub fn with_tracking_table(mut self, table: impl Into<String>) -> Self {
        self.tracking_table = table.into();
        self
    }

    /// Sets the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub(super) fn validate(&self) -> Result<(), MigrationError> {
        let table = self.tracking_table.as_str();
        let mut chars = table.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_start || !valid_rest || table.len() > MAX_IDENTIFIER_LEN {
            return Err(MigrationError::InvalidConfig(format!(
                "tracking table {table:?} is not a valid identifier"
            )));
        }

        if self.lock_timeout.is_some_and(|t| t.as_millis() == 0) {
            // Sent in whole milliseconds; Postgres reads 0ms as "wait forever".
            return Err(MigrationError::InvalidConfig(
                "lock_timeout must be at least 1ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Statement applying the lock timeout to the current transaction.
    pub(super) fn lock_timeout_statement(&self) -> Option<String> {
        self.lock_timeout
            .map(|timeout| format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MigratorConfig::default();
        assert_eq!(config.tracking_table, "_atlas_migrations");
        assert!(config.lock_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["schema_versions", "_t", "v2_migrations"] {
            let config = MigratorConfig::default().with_tracking_table(name);
            assert!(config.validate().is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let too_long = "x".repeat(64);
        for name in ["", "1table", "region; DROP TABLE region", "my-table", too_long.as_str()] {
            let config = MigratorConfig::default().with_tracking_table(name);
            assert!(
                matches!(config.validate(), Err(MigrationError::InvalidConfig(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_zero_lock_timeout() {
        let config = MigratorConfig::default().with_lock_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(MigrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_sub_millisecond_lock_timeout() {
        let config = MigratorConfig::default().with_lock_timeout(Duration::from_micros(500));
        assert!(matches!(
            config.validate(),
            Err(MigrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn lock_timeout_statement_uses_milliseconds() {
        assert_eq!(MigratorConfig::default().lock_timeout_statement(), None);

        let config = MigratorConfig::default().with_lock_timeout(Duration::from_millis(1));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.lock_timeout_statement().as_deref(),
            Some("SET LOCAL lock_timeout = '1ms'")
        );

        let config = MigratorConfig::default().with_lock_timeout(Duration::from_secs(5));
        assert_eq!(
            config.lock_timeout_statement().as_deref(),
            Some("SET LOCAL lock_timeout = '5000ms'")
        );
    }
}
