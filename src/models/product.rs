use std::collections::BTreeSet;

use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Catalog item kinds. Every kind, variations included, is classified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemKind {
    Simple,
    Variable,
    Variation,
    Grouped,
    External,
}

impl ItemKind {
    pub const ALL: [ItemKind; 5] = [
        ItemKind::Simple,
        ItemKind::Variable,
        ItemKind::Variation,
        ItemKind::Grouped,
        ItemKind::External,
    ];
}

/// Classification-relevant view of a catalog item.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CatalogItem {
    #[garde(range(min = 1))]
    pub id: i64,

    #[garde(skip)]
    pub kind: ItemKind,

    #[garde(skip)]
    pub parent_id: Option<i64>,

    #[garde(length(min = 1, max = 500))]
    pub name: String,

    #[garde(skip)]
    pub short_description: String,

    #[garde(skip)]
    pub description: String,

    #[garde(skip)]
    pub category_ids: Vec<i64>,

    /// Locally stored tax code, if any.
    #[garde(skip)]
    pub tax_code: Option<String>,

    /// Variation ids when `kind` is [`ItemKind::Variable`].
    #[garde(skip)]
    #[serde(default)]
    pub children: Vec<i64>,
}

impl CatalogItem {
    pub fn is_variable(&self) -> bool {
        self.kind == ItemKind::Variable
    }

    pub fn is_variation(&self) -> bool {
        self.kind == ItemKind::Variation
    }
}

/// Per item and destination country result owned by the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassificationRecord {
    pub classification_id: Option<String>,
    pub hs_code: Option<String>,
}

/// Field names whose change forces a new classification.
pub const CLASSIFICATION_FIELDS: [&str; 5] = ["description", "short_description", "name", "parent_id", "category_ids"];

/// Pending (unsaved) change set of an item, as field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ProductChanges(pub BTreeSet<String>);

impl ProductChanges {
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn affects_classification(&self) -> bool {
        CLASSIFICATION_FIELDS.iter().any(|field| self.0.contains(*field))
    }
}

/// Stored fields of an item as seen right before an update is written.
///
/// `category_ids` on the incoming side is `None` when the edit did not post
/// categories at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemSnapshot {
    pub kind: Option<ItemKind>,
    pub name: String,
    pub short_description: String,
    pub description: String,
    pub parent_id: Option<i64>,
    pub category_ids: Option<Vec<i64>>,
}
