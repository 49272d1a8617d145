//! Bulk upsert of scraped records into stores → categories → products →
//! prices.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use grocer_core::{slugify, NormalizedRecord, PRICE_CURRENCY};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use crate::DbError;

/// Largest magnitude a `NUMERIC(12,2)` column accepts.
const MAX_AMOUNT: i64 = 10_000_000_000;

/// Row counts touched by one [`persist_records`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub stores: usize,
    pub categories: usize,
    pub products: usize,
    pub prices: usize,
}

/// Leading decimal number of a scraped price string, rounded to cents:
/// `"41.90 грн/кг"` → `41.90`, `"12,5 грн"` → `12.50`. `None` when the
/// string does not start with a number or the value would not fit the
/// `amount` column.
#[must_use]
pub fn parse_amount(price: &str) -> Option<Decimal> {
    let number: String = price
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let amount = Decimal::from_str(number.trim_end_matches('.')).ok()?;
    (amount.abs() < Decimal::from(MAX_AMOUNT)).then(|| amount.round_dp(2))
}

/// Commits `records` as one batch.
///
/// Inside a single transaction: every distinct store value is resolved (by
/// code, then name), categories and products are upserted on their
/// `(store_id, slug)` / `(store_id, ref)` identities, and one price row is
/// appended per record. Repeating a batch leaves categories and products
/// unchanged and appends another set of prices.
///
/// # Errors
///
/// Returns [`DbError::UnknownStore`] if any record names a store that does
/// not exist; nothing from the batch is written. Returns [`DbError::Sqlx`]
/// if a statement fails, in which case the transaction is rolled back.
pub async fn persist_records(
    pool: &PgPool,
    records: &[NormalizedRecord],
) -> Result<PersistSummary, DbError> {
    if records.is_empty() {
        return Ok(PersistSummary::default());
    }

    let mut tx = pool.begin().await?;

    let store_ids = resolve_stores(&mut *tx, records).await?;
    let categories = upsert_categories(&mut *tx, records, &store_ids).await?;
    let product_ids = upsert_products(&mut *tx, records, &store_ids).await?;
    let prices = insert_prices(&mut *tx, records, &store_ids, &product_ids).await?;

    tx.commit().await?;

    Ok(PersistSummary {
        stores: store_ids.len(),
        categories,
        products: product_ids.len(),
        prices,
    })
}

async fn resolve_stores<'r>(
    conn: &mut PgConnection,
    records: &'r [NormalizedRecord],
) -> Result<BTreeMap<&'r str, i64>, DbError> {
    let mut store_ids = BTreeMap::new();
    for record in records {
        let store = record.store.as_str();
        if store_ids.contains_key(store) {
            continue;
        }
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM stores \
             WHERE code = $1 OR name = $1 \
             ORDER BY (code = $1) DESC \
             LIMIT 1",
        )
        .bind(store)
        .fetch_optional(&mut *conn)
        .await?;
        let id = id.ok_or_else(|| DbError::UnknownStore {
            code: store.to_owned(),
        })?;
        store_ids.insert(store, id);
    }
    Ok(store_ids)
}

/// Upserts one row per distinct `(store, slug)`. A later title for the same
/// slug wins, since one statement cannot touch a row twice.
async fn upsert_categories(
    conn: &mut PgConnection,
    records: &[NormalizedRecord],
    store_ids: &BTreeMap<&str, i64>,
) -> Result<usize, DbError> {
    let mut index: HashMap<(i64, String), usize> = HashMap::new();
    let mut row_store_ids: Vec<i64> = Vec::new();
    let mut slugs: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    for record in records {
        let store_id = store_ids[record.store.as_str()];
        let slug = slugify(&record.category);
        if let Some(&i) = index.get(&(store_id, slug.clone())) {
            names[i].clone_from(&record.category);
            continue;
        }
        index.insert((store_id, slug.clone()), slugs.len());
        row_store_ids.push(store_id);
        slugs.push(slug);
        names.push(record.category.clone());
    }

    let ids: Vec<i64> = sqlx::query_scalar(
        "INSERT INTO categories (store_id, slug, name) \
         SELECT * FROM UNNEST($1::int8[], $2::text[], $3::text[]) \
         ON CONFLICT (store_id, slug) DO UPDATE SET \
             name       = EXCLUDED.name, \
             updated_at = NOW() \
         RETURNING id",
    )
    .bind(&row_store_ids)
    .bind(&slugs)
    .bind(&names)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.len())
}

/// Upserts one row per distinct `(store, ref)` and returns their ids. The
/// ref doubles as the product URL.
async fn upsert_products(
    conn: &mut PgConnection,
    records: &[NormalizedRecord],
    store_ids: &BTreeMap<&str, i64>,
) -> Result<HashMap<(i64, String), i64>, DbError> {
    let mut index: HashMap<(i64, &str), usize> = HashMap::new();
    let mut row_store_ids: Vec<i64> = Vec::new();
    let mut refs: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    for record in records {
        let store_id = store_ids[record.store.as_str()];
        if let Some(&i) = index.get(&(store_id, record.product_ref.as_str())) {
            names[i].clone_from(&record.name);
            continue;
        }
        index.insert((store_id, record.product_ref.as_str()), refs.len());
        row_store_ids.push(store_id);
        refs.push(record.product_ref.clone());
        names.push(record.name.clone());
    }

    let rows: Vec<(i64, i64, String)> = sqlx::query_as(
        "INSERT INTO products (store_id, ref, name, url) \
         SELECT store_id, ref, name, ref \
         FROM UNNEST($1::int8[], $2::text[], $3::text[]) AS t (store_id, ref, name) \
         ON CONFLICT (store_id, ref) DO UPDATE SET \
             name       = EXCLUDED.name, \
             url        = EXCLUDED.url, \
             updated_at = NOW() \
         RETURNING id, store_id, ref",
    )
    .bind(&row_store_ids)
    .bind(&refs)
    .bind(&names)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, store_id, product_ref)| ((store_id, product_ref), id))
        .collect())
}

/// Appends one price observation per record, duplicates included.
async fn insert_prices(
    conn: &mut PgConnection,
    records: &[NormalizedRecord],
    store_ids: &BTreeMap<&str, i64>,
    product_ids: &HashMap<(i64, String), i64>,
) -> Result<usize, DbError> {
    let mut ids: Vec<i64> = Vec::with_capacity(records.len());
    let mut prices: Vec<String> = Vec::with_capacity(records.len());
    let mut amounts: Vec<Option<Decimal>> = Vec::with_capacity(records.len());

    for record in records {
        let store_id = store_ids[record.store.as_str()];
        let Some(&product_id) = product_ids.get(&(store_id, record.product_ref.clone())) else {
            continue;
        };
        ids.push(product_id);
        prices.push(record.price.clone());
        amounts.push(parse_amount(&record.price));
    }

    let inserted = sqlx::query(
        "INSERT INTO prices (product_id, price, amount, currency) \
         SELECT product_id, price, amount, $4 \
         FROM UNNEST($1::int8[], $2::text[], $3::numeric[]) AS t (product_id, price, amount)",
    )
    .bind(&ids)
    .bind(&prices)
    .bind(&amounts)
    .bind(PRICE_CURRENCY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_amount_reads_leading_number() {
        assert_eq!(parse_amount("41.90 грн/кг"), Decimal::from_str("41.90").ok());
        assert_eq!(parse_amount("12.5 грн"), Decimal::from_str("12.50").ok());
        assert_eq!(parse_amount(" 8 грн/шт"), Decimal::from_str("8").ok());
    }

    #[test]
    fn parse_amount_accepts_decimal_comma() {
        assert_eq!(parse_amount("12,50 грн"), Decimal::from_str("12.50").ok());
    }

    #[test]
    fn parse_amount_rounds_to_cents() {
        assert_eq!(parse_amount("3.456 грн"), Decimal::from_str("3.46").ok());
    }

    #[test]
    fn parse_amount_rejects_non_numeric_and_oversized() {
        assert_eq!(parse_amount("грн"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1.2.3 грн"), None);
        assert_eq!(parse_amount("99999999999 грн"), None);
    }
}
