//! Read access to the seeded `stores` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `stores` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoreRow {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returns every store, ordered by code.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stores(pool: &PgPool) -> Result<Vec<StoreRow>, DbError> {
    let rows = sqlx::query_as::<_, StoreRow>(
        "SELECT id, code, name, created_at, updated_at \
         FROM stores \
         ORDER BY code",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Looks a store up by code, falling back to its display name. Records carry
/// the code, but CSV files written by hand sometimes carry the name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_store_by_code(pool: &PgPool, code: &str) -> Result<Option<StoreRow>, DbError> {
    let row = sqlx::query_as::<_, StoreRow>(
        "SELECT id, code, name, created_at, updated_at \
         FROM stores \
         WHERE code = $1 OR name = $1 \
         ORDER BY (code = $1) DESC \
         LIMIT 1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
