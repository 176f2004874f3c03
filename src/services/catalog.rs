use async_trait::async_trait;

use crate::models::product::{CatalogItem, ItemKind};

/// Catalog access needed by the sync engine: stable paging over item ids and
/// the per-country classification records the catalog owns.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// One page (1-based) of item ids of the given kinds, ordered by id ascending.
    async fn list_items(&self, kinds: &[ItemKind], limit: u32, page: u32) -> Result<Vec<i64>, CatalogError>;

    async fn find_item(&self, item_id: i64) -> Result<Option<CatalogItem>, CatalogError>;

    async fn classification_id(&self, item_id: i64, country: &str) -> Result<Option<String>, CatalogError>;

    async fn save_classification_id(
        &self,
        item_id: i64,
        country: &str,
        classification_id: &str,
    ) -> Result<(), CatalogError>;

    async fn save_hs_code(&self, item_id: i64, country: &str, hs_code: &str) -> Result<(), CatalogError>;

    async fn save_tax_code(&self, item_id: i64, tax_code: &str) -> Result<(), CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}
