use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the configured database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    // SQLite allows one writer; in-memory test databases also live and die
    // with their single connection.
    let max_connections = if database_url.starts_with("sqlite") {
        1
    } else {
        10
    };

    let mut opts = ConnectOptions::new(database_url.to_string());
    opts.max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let conn = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(conn)
}

pub async fn establish_connection_from_app_config(
    config: &AppConfig,
) -> Result<DbPool, ServiceError> {
    establish_connection(&config.database_url).await
}

/// Runs pending migrations. SQLite in-memory databases get a full schema
/// here as well, which is what the integration tests rely on.
pub async fn run_migrations(conn: &DbPool) -> Result<(), ServiceError> {
    Migrator::up(conn, None).await?;
    info!("Database migrations applied");
    Ok(())
}
