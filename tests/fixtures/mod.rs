//! Catalog items used across the sync tests.

#![allow(dead_code)]

use classification_sync::models::product::{CatalogItem, ItemKind};

pub fn simple_item(id: i64) -> CatalogItem {
    CatalogItem {
        id,
        kind: ItemKind::Simple,
        parent_id: None,
        name: format!("Cotton sweater {id}"),
        short_description: "Knitted sweater".to_string(),
        description: "Men's knitted sweater, 100% cotton".to_string(),
        category_ids: vec![12, 31],
        tax_code: None,
        children: Vec::new(),
    }
}

/// A variable item `id` and its variations `id + 1 ..= id + count`.
pub fn variable_item(id: i64, count: i64) -> Vec<CatalogItem> {
    let children: Vec<i64> = (1..=count).map(|n| id + n).collect();
    let mut items = vec![CatalogItem {
        kind: ItemKind::Variable,
        children: children.clone(),
        ..simple_item(id)
    }];
    items.extend(children.into_iter().map(|child| CatalogItem {
        kind: ItemKind::Variation,
        parent_id: Some(id),
        ..simple_item(child)
    }));
    items
}
