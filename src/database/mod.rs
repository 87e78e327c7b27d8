//! # Database
//!
//! Pool construction and schema migrations for the PostgreSQL backend.
//!
//! - [`connection`] - pooled connection built from [`DatabaseConfig`](crate::config::DatabaseConfig)
//! - [`migrations`] - ordered SQL migrations from `migrations/`, tracked in
//!   `payroll_schema_migrations` and serialized with an advisory lock

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::{DatabaseMigrations, Migration};
