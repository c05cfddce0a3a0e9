//! Schema migrations
//!
//! Migrations live in `migrations/` as `YYYYMMDDHHMMSS_description.sql` and are
//! embedded at compile time. Version tracking and locking are handled by
//! sqlx's `_sqlx_migrations` table.

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::PgPool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every pending migration in order
    pub async fn run_all(pool: &PgPool) -> Result<(), MigrateError> {
        info!(
            available = MIGRATOR.iter().count(),
            "Running outreach schema migrations"
        );
        MIGRATOR.run(pool).await
    }
}
