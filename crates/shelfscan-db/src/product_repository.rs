use chrono::{DateTime, Utc};
use shelfscan_core::error::AppError;
use shelfscan_core::locator;
use shelfscan_core::models::{
    ChangeHistoryEntry, ChangeKind, ExtractionResult, ProductFields, ProductOption, ProductRecord,
    UpsertOutcome,
};
use shelfscan_core::query::{ProductQuery, SortKey, SortOrder};
use shelfscan_core::traits::ProductStore;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

const PRODUCT_COLUMNS: &str = "id, locator_key, locator, platform, name, price, images, options, \
     description, stock, category, data_hash, collected_at, updated_at";

const CHANGE_COLUMNS: &str =
    "id, product_id, old_price, new_price, old_stock, new_stock, change_kinds, changed_at";

/// PostgreSQL-backed [`ProductStore`].
///
/// Upserts take a transaction-scoped advisory lock on the locator key, so
/// concurrent collections of the same product serialize and never insert
/// twice.
#[derive(Clone)]
pub struct ProductRepository {
    pool: Pool<Postgres>,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_key(
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
    ) -> Result<Option<ProductRecord>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE locator_key = $1"
        ))
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn insert(tx: &mut Transaction<'_, Postgres>, record: &ProductRecord) -> Result<(), AppError> {
        let f = &record.fields;
        sqlx::query(
            r#"
            INSERT INTO products (id, locator_key, locator, platform, name, price, images, options,
                                  description, stock, category, data_hash, collected_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(&record.locator_key)
        .bind(&record.locator)
        .bind(&record.platform)
        .bind(&f.name)
        .bind(f.price)
        .bind(Json(&f.images))
        .bind(Json(&f.options))
        .bind(&f.description)
        .bind(f.stock.as_str())
        .bind(&f.category)
        .bind(&record.data_hash)
        .bind(record.collected_at)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn update(tx: &mut Transaction<'_, Postgres>, record: &ProductRecord) -> Result<(), AppError> {
        let f = &record.fields;
        sqlx::query(
            r#"
            UPDATE products
            SET locator = $2, platform = $3, name = $4, price = $5, images = $6, options = $7,
                description = $8, stock = $9, category = $10, data_hash = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.locator)
        .bind(&record.platform)
        .bind(&f.name)
        .bind(f.price)
        .bind(Json(&f.images))
        .bind(Json(&f.options))
        .bind(&f.description)
        .bind(f.stock.as_str())
        .bind(&f.category)
        .bind(&record.data_hash)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn insert_change(
        tx: &mut Transaction<'_, Postgres>,
        entry: &ChangeHistoryEntry,
    ) -> Result<(), AppError> {
        let kinds: Vec<&str> = entry.change_kinds.iter().map(ChangeKind::as_str).collect();
        sqlx::query(
            r#"
            INSERT INTO product_changes (id, product_id, old_price, new_price, old_stock, new_stock,
                                         change_kinds, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.product_id)
        .bind(entry.old_price)
        .bind(entry.new_price)
        .bind(entry.old_stock.as_str())
        .bind(entry.new_stock.as_str())
        .bind(&kinds)
        .bind(entry.timestamp)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    locator_key: String,
    locator: String,
    platform: String,
    name: String,
    price: Option<f64>,
    images: Json<Vec<String>>,
    options: Json<Vec<ProductOption>>,
    description: Option<String>,
    stock: String,
    category: Option<String>,
    data_hash: String,
    collected_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        ProductRecord {
            id: row.id,
            locator_key: row.locator_key,
            locator: row.locator,
            platform: row.platform,
            fields: ProductFields {
                name: row.name,
                price: row.price,
                images: row.images.0,
                options: row.options.0,
                description: row.description,
                stock: row.stock.parse().unwrap_or_default(),
                category: row.category,
            },
            data_hash: row.data_hash,
            collected_at: row.collected_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: Uuid,
    product_id: Uuid,
    old_price: Option<f64>,
    new_price: Option<f64>,
    old_stock: String,
    new_stock: String,
    change_kinds: Vec<String>,
    changed_at: DateTime<Utc>,
}

impl From<ChangeRow> for ChangeHistoryEntry {
    fn from(row: ChangeRow) -> Self {
        ChangeHistoryEntry {
            id: row.id,
            product_id: row.product_id,
            old_price: row.old_price,
            new_price: row.new_price,
            old_stock: row.old_stock.parse().unwrap_or_default(),
            new_stock: row.new_stock.parse().unwrap_or_default(),
            change_kinds: row
                .change_kinds
                .iter()
                .filter_map(|k| k.parse().ok())
                .collect(),
            timestamp: row.changed_at,
        }
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern and wrap it in wildcards.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn order_clause(query: &ProductQuery) -> String {
    let Some(spec) = query.sort else {
        return " ORDER BY seq".to_string();
    };
    // Byte-wise collation so text ordering does not depend on the server locale.
    let column = match spec.key {
        SortKey::Name => "name COLLATE \"C\"",
        SortKey::Platform => "platform COLLATE \"C\"",
        SortKey::Price => "price",
        SortKey::CollectedAt => "collected_at",
        SortKey::UpdatedAt => "updated_at",
    };
    let direction = match spec.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!(" ORDER BY {column} {direction} NULLS LAST, seq")
}

// -- Trait implementation --

impl ProductStore for ProductRepository {
    async fn upsert(&self, result: &ExtractionResult) -> Result<UpsertOutcome, AppError> {
        let key = locator::normalize(&result.locator)?;
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let outcome = match Self::find_by_key(&mut tx, &key).await? {
            None => {
                let record = ProductRecord::first_collection(result, key, now);
                Self::insert(&mut tx, &record).await?;
                UpsertOutcome::created(record.id)
            }
            Some(old) => {
                let new = old.merged_with(result, now);
                let change = ChangeHistoryEntry::between(&old, &new, now);
                Self::update(&mut tx, &new).await?;
                if let Some(entry) = &change {
                    Self::insert_change(&mut tx, entry).await?;
                }
                UpsertOutcome::updated(&old, &new, change)
            }
        };

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(id = %outcome.id, kind = ?outcome.kind, changed = outcome.changed, "Product upserted");
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProductRecord>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_by_locator(&self, locator: &str) -> Result<Option<ProductRecord>, AppError> {
        let key = locator::normalize(locator)?;
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE locator_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn query(&self, query: &ProductQuery) -> Result<Vec<ProductRecord>, AppError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE TRUE"));

        if let Some(platform) = &query.platform {
            qb.push(" AND platform = ").push_bind(platform.clone());
        }
        if let Some(category) = &query.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(needle) = &query.name_contains {
            qb.push(" AND name ILIKE ")
                .push_bind(like_pattern(needle))
                .push(" ESCAPE '\\'");
        }
        if let Some(needle) = &query.description_contains {
            qb.push(" AND description ILIKE ")
                .push_bind(like_pattern(needle))
                .push(" ESCAPE '\\'");
        }
        if query.min_price.is_some() || query.max_price.is_some() {
            qb.push(" AND price IS NOT NULL");
        }
        if let Some(min) = query.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = query.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        qb.push(order_clause(query));
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn history(
        &self,
        product_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChangeHistoryEntry>, AppError> {
        let rows = sqlx::query_as::<_, ChangeRow>(&format!(
            "SELECT {CHANGE_COLUMNS} FROM product_changes WHERE product_id = $1 ORDER BY seq DESC LIMIT $2"
        ))
        .bind(product_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as u64)
    }
}
