//! Persistent node registry for the burrow broker.
//!
//! SQLite via SeaORM. The broker opens the database once at startup with
//! [`connect`] + [`migrate`] and hands a [`NodeStore`] to everything that
//! reads or writes node records.

pub mod entities;
pub mod migrator;
mod store;

pub use store::{NodeStore, RegistryError};

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

/// Open a database connection.
///
/// Accepts any SeaORM SQLite URL; `sqlite::memory:` works for tests and
/// `sqlite://burrow.db?mode=rwc` creates the file on first run.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;
    info!(url = %database_url, "database connected");
    Ok(db)
}

/// Apply any pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}
