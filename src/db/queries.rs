use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::models::product::{CatalogItem, ClassificationRecord, ItemKind};
use crate::services::catalog::{Catalog, CatalogError};

/// Catalog backed by the PostgreSQL catalog tables.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stored classification record for an item and country
    pub async fn classification(
        &self,
        item_id: i64,
        country: &str,
    ) -> Result<Option<ClassificationRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT classification_id, hs_code
            FROM item_classifications
            WHERE item_id = $1 AND country = $2
            "#,
        )
        .bind(item_id)
        .bind(country)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<ClassificationRecord, sqlx::Error> {
            Ok(ClassificationRecord {
                classification_id: r.try_get("classification_id")?,
                hs_code: r.try_get("hs_code")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn list_items(&self, kinds: &[ItemKind], limit: u32, page: u32) -> Result<Vec<i64>, CatalogError> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

        let rows = sqlx::query(
            r#"
            SELECT id
            FROM catalog_items
            WHERE kind = ANY($1)
            ORDER BY id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&kinds)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_get::<i64, _>("id").map_err(CatalogError::from))
            .collect()
    }

    async fn find_item(&self, item_id: i64) -> Result<Option<CatalogItem>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT i.id, i.kind, i.parent_id, i.name, i.short_description, i.description, i.tax_code,
                   COALESCE(
                       (SELECT array_agg(c.category_id ORDER BY c.category_id)
                        FROM catalog_item_categories c WHERE c.item_id = i.id),
                       '{}'
                   ) AS category_ids,
                   COALESCE(
                       (SELECT array_agg(v.id ORDER BY v.id)
                        FROM catalog_items v WHERE v.parent_id = i.id AND v.kind = 'variation'),
                       '{}'
                   ) AS children
            FROM catalog_items i
            WHERE i.id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let kind_str: String = r.try_get("kind")?;
        let kind = kind_str
            .parse::<ItemKind>()
            .map_err(|_| CatalogError::Unavailable(format!("unknown item kind '{kind_str}' for item {item_id}")))?;

        Ok(Some(CatalogItem {
            id: r.try_get("id")?,
            kind,
            parent_id: r.try_get("parent_id")?,
            name: r.try_get("name")?,
            short_description: r.try_get("short_description")?,
            description: r.try_get("description")?,
            category_ids: r.try_get("category_ids")?,
            tax_code: r.try_get("tax_code")?,
            children: r.try_get("children")?,
        }))
    }

    async fn classification_id(&self, item_id: i64, country: &str) -> Result<Option<String>, CatalogError> {
        Ok(self
            .classification(item_id, country)
            .await?
            .and_then(|record| record.classification_id)
            .filter(|id| !id.is_empty()))
    }

    async fn save_classification_id(
        &self,
        item_id: i64,
        country: &str,
        classification_id: &str,
    ) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            INSERT INTO item_classifications (item_id, country, classification_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (item_id, country)
            DO UPDATE SET classification_id = EXCLUDED.classification_id, updated_at = NOW()
            "#,
        )
        .bind(item_id)
        .bind(country)
        .bind(classification_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_hs_code(&self, item_id: i64, country: &str, hs_code: &str) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            INSERT INTO item_classifications (item_id, country, hs_code)
            VALUES ($1, $2, $3)
            ON CONFLICT (item_id, country)
            DO UPDATE SET hs_code = EXCLUDED.hs_code, updated_at = NOW()
            "#,
        )
        .bind(item_id)
        .bind(country)
        .bind(hs_code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_tax_code(&self, item_id: i64, tax_code: &str) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            UPDATE catalog_items
            SET tax_code = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(tax_code)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
