//! # Database Migrations
//!
//! Incremental SQL migrations discovered from a directory and tracked in
//! `payroll_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Several orchestrator processes may boot against the same database. The
//! runner takes a session-level advisory lock on a dedicated connection before
//! reading the tracking table, so exactly one process applies a given version:
//!
//! ```sql
//! SELECT pg_advisory_lock(7201908412660375)
//! ```
//!
//! ## Migration Discovery
//!
//! Files are named `YYYYMMDDHHMMSS_description.sql` and applied in version
//! order. Files that do not match the pattern are ignored.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Advisory lock key reserved for schema migrations
const MIGRATION_LOCK_KEY: i64 = 7_201_908_412_660_375;

/// Default directory, relative to the working directory
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// A single migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS)
    pub version: String,
    pub name: String,
    pub path: PathBuf,
}

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply outstanding migrations from [`DEFAULT_MIGRATIONS_DIR`]
    pub async fn run_all(pool: &PgPool) -> Result<Vec<Migration>, sqlx::Error> {
        Self::run_from_directory(pool, Path::new(DEFAULT_MIGRATIONS_DIR)).await
    }

    /// Apply outstanding migrations from `dir`, returning the ones applied
    pub async fn run_from_directory(
        pool: &PgPool,
        dir: &Path,
    ) -> Result<Vec<Migration>, sqlx::Error> {
        let migrations = Self::discover_migrations(dir)?;
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::apply_outstanding(&mut conn, &migrations).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn apply_outstanding(
        conn: &mut PoolConnection<Postgres>,
        migrations: &BTreeMap<String, Migration>,
    ) -> Result<Vec<Migration>, sqlx::Error> {
        Self::ensure_migration_table(conn).await?;
        let applied = Self::applied_versions(conn).await?;

        let mut newly_applied = Vec::new();
        for migration in migrations.values() {
            if applied.contains(&migration.version) {
                debug!(version = %migration.version, "Migration already applied");
                continue;
            }

            info!(
                version = %migration.version,
                name = %migration.name,
                "Applying migration"
            );
            let sql = fs::read_to_string(&migration.path).map_err(sqlx::Error::Io)?;

            let mut tx = sqlx::Connection::begin(&mut **conn).await?;
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO payroll_schema_migrations (version) VALUES ($1)")
                .bind(&migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            newly_applied.push(migration.clone());
        }

        Ok(newly_applied)
    }

    /// Discover migration files in `dir`; a missing directory yields none
    pub fn discover_migrations(dir: &Path) -> Result<BTreeMap<String, Migration>, sqlx::Error> {
        if !dir.exists() {
            return Ok(BTreeMap::new());
        }

        let mut migrations = BTreeMap::new();

        for entry in fs::read_dir(dir).map_err(sqlx::Error::Io)? {
            let path = entry.map_err(sqlx::Error::Io)?.path();

            if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
                continue;
            }

            if let Some((version, name)) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(Self::parse_migration_filename)
            {
                migrations.insert(
                    version.clone(),
                    Migration {
                        version,
                        name,
                        path,
                    },
                );
            }
        }

        Ok(migrations)
    }

    /// Split `YYYYMMDDHHMMSS_some_name` into version and human-readable name
    pub fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }

        let (version, rest) = filename.split_at(14);
        if !version.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = rest.strip_prefix('_')?.replace('_', " ");
        Some((version.to_string(), name))
    }

    async fn ensure_migration_table(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS payroll_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut **conn)
        .await?;

        Ok(())
    }

    async fn applied_versions(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM payroll_schema_migrations")
            .fetch_all(&mut **conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }
}
