use crate::config::DatabaseConfig;
use crate::error::InsightError;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, InsightError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<String, InsightError> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Apply the embedded migrations under `insight-core/migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), InsightError> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}
