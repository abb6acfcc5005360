//! Persistence for products, their sources and everything recorded about them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{
    FalsePositive, NotificationConfig, NotificationLog, Product, Source, ValueComparison, ValueHistory,
};
use crate::utils::error::AppError;

pub type StoreResult<T> = Result<T, AppError>;

/// Storage operations used by the tracking engine.
///
/// `save_*` methods upsert by id. Listing methods return rows in insertion order unless
/// documented otherwise; history and log listings are newest first.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_product(&self, product: &Product) -> StoreResult<()>;
    async fn get_product(&self, id: &str) -> StoreResult<Option<Product>>;
    async fn list_products(&self) -> StoreResult<Vec<Product>>;
    /// Removes the product together with its sources, their history, comparisons,
    /// notification configs, logs and false positives. Returns true if it existed.
    async fn delete_product(&self, id: &str) -> StoreResult<bool>;

    async fn save_source(&self, source: &Source) -> StoreResult<()>;
    async fn get_source(&self, id: &str) -> StoreResult<Option<Source>>;
    async fn list_sources(&self, product_id: &str) -> StoreResult<Vec<Source>>;
    /// Removes the source and its history. Returns true if it existed.
    async fn delete_source(&self, id: &str) -> StoreResult<bool>;

    async fn append_history(&self, entry: &ValueHistory) -> StoreResult<()>;
    async fn list_history(&self, source_id: &str, limit: Option<usize>) -> StoreResult<Vec<ValueHistory>>;
    async fn count_history(&self, source_id: &str) -> StoreResult<usize>;
    /// Drops the source's observations recorded strictly before `before`. Returns how many went.
    async fn prune_history(&self, source_id: &str, before: DateTime<Utc>) -> StoreResult<usize>;

    async fn save_comparison(&self, comparison: &ValueComparison) -> StoreResult<()>;
    async fn list_comparisons(&self, product_id: &str, limit: Option<usize>) -> StoreResult<Vec<ValueComparison>>;

    async fn save_notification_config(&self, config: &NotificationConfig) -> StoreResult<()>;
    async fn get_notification_config(&self, id: &str) -> StoreResult<Option<NotificationConfig>>;
    async fn list_notification_configs(&self, product_id: &str) -> StoreResult<Vec<NotificationConfig>>;
    async fn delete_notification_config(&self, id: &str) -> StoreResult<bool>;

    async fn append_notification_log(&self, log: &NotificationLog) -> StoreResult<()>;
    async fn list_notification_logs(&self, product_id: &str, limit: Option<usize>) -> StoreResult<Vec<NotificationLog>>;

    async fn save_false_positive(&self, entry: &FalsePositive) -> StoreResult<()>;
    async fn list_false_positives(&self, product_id: &str) -> StoreResult<Vec<FalsePositive>>;
}

#[derive(Default)]
struct Tables {
    products: Vec<Product>,
    sources: Vec<Source>,
    history: Vec<ValueHistory>,
    comparisons: Vec<ValueComparison>,
    notification_configs: Vec<NotificationConfig>,
    notification_logs: Vec<NotificationLog>,
    false_positives: Vec<FalsePositive>,
}

fn upsert<T: Clone>(rows: &mut Vec<T>, row: &T, same: impl Fn(&T) -> bool) {
    match rows.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
}

fn newest_first<T: Clone>(rows: impl DoubleEndedIterator<Item = T>, limit: Option<usize>) -> Vec<T> {
    rows.rev().take(limit.unwrap_or(usize::MAX)).collect()
}

/// Process-local store. Everything is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row counts per table, for diagnostics.
    pub async fn table_sizes(&self) -> HashMap<&'static str, usize> {
        let tables = self.tables.read().await;
        HashMap::from([
            ("products", tables.products.len()),
            ("sources", tables.sources.len()),
            ("history", tables.history.len()),
            ("comparisons", tables.comparisons.len()),
            ("notification_configs", tables.notification_configs.len()),
            ("notification_logs", tables.notification_logs.len()),
            ("false_positives", tables.false_positives.len()),
        ])
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_product(&self, product: &Product) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        upsert(&mut tables.products, product, |p| p.id == product.id);
        Ok(())
    }

    async fn get_product(&self, id: &str) -> StoreResult<Option<Product>> {
        let tables = self.tables.read().await;
        Ok(tables.products.iter().find(|p| p.id == id).cloned())
    }

    async fn list_products(&self) -> StoreResult<Vec<Product>> {
        let tables = self.tables.read().await;
        Ok(tables.products.clone())
    }

    async fn delete_product(&self, id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.products.len();
        tables.products.retain(|p| p.id != id);
        if tables.products.len() == before {
            return Ok(false);
        }

        let source_ids: Vec<String> = tables
            .sources
            .iter()
            .filter(|s| s.product_id == id)
            .map(|s| s.id.clone())
            .collect();
        tables.sources.retain(|s| s.product_id != id);
        tables.history.retain(|h| !source_ids.contains(&h.source_id));
        tables.comparisons.retain(|c| c.product_id != id);
        tables.notification_configs.retain(|c| c.product_id != id);
        tables.notification_logs.retain(|l| l.product_id != id);
        tables.false_positives.retain(|f| f.product_id != id);
        Ok(true)
    }

    async fn save_source(&self, source: &Source) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.products.iter().any(|p| p.id == source.product_id) {
            return Err(AppError::Store(format!(
                "Source {} references unknown product {}",
                source.id, source.product_id
            )));
        }
        upsert(&mut tables.sources, source, |s| s.id == source.id);
        Ok(())
    }

    async fn get_source(&self, id: &str) -> StoreResult<Option<Source>> {
        let tables = self.tables.read().await;
        Ok(tables.sources.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sources(&self, product_id: &str) -> StoreResult<Vec<Source>> {
        let tables = self.tables.read().await;
        Ok(tables.sources.iter().filter(|s| s.product_id == product_id).cloned().collect())
    }

    async fn delete_source(&self, id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.sources.len();
        tables.sources.retain(|s| s.id != id);
        let existed = tables.sources.len() != before;
        if existed {
            tables.history.retain(|h| h.source_id != id);
        }
        Ok(existed)
    }

    async fn append_history(&self, entry: &ValueHistory) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.history.push(entry.clone());
        Ok(())
    }

    async fn list_history(&self, source_id: &str, limit: Option<usize>) -> StoreResult<Vec<ValueHistory>> {
        let tables = self.tables.read().await;
        Ok(newest_first(
            tables.history.iter().filter(|h| h.source_id == source_id).cloned(),
            limit,
        ))
    }

    async fn count_history(&self, source_id: &str) -> StoreResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables.history.iter().filter(|h| h.source_id == source_id).count())
    }

    async fn prune_history(&self, source_id: &str, before: DateTime<Utc>) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let count = tables.history.len();
        tables
            .history
            .retain(|h| h.source_id != source_id || h.timestamp >= before);
        Ok(count - tables.history.len())
    }

    async fn save_comparison(&self, comparison: &ValueComparison) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        upsert(&mut tables.comparisons, comparison, |c| c.id == comparison.id);
        Ok(())
    }

    async fn list_comparisons(&self, product_id: &str, limit: Option<usize>) -> StoreResult<Vec<ValueComparison>> {
        let tables = self.tables.read().await;
        Ok(newest_first(
            tables.comparisons.iter().filter(|c| c.product_id == product_id).cloned(),
            limit,
        ))
    }

    async fn save_notification_config(&self, config: &NotificationConfig) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        upsert(&mut tables.notification_configs, config, |c| c.id == config.id);
        Ok(())
    }

    async fn get_notification_config(&self, id: &str) -> StoreResult<Option<NotificationConfig>> {
        let tables = self.tables.read().await;
        Ok(tables.notification_configs.iter().find(|c| c.id == id).cloned())
    }

    async fn list_notification_configs(&self, product_id: &str) -> StoreResult<Vec<NotificationConfig>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notification_configs
            .iter()
            .filter(|c| c.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn delete_notification_config(&self, id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.notification_configs.len();
        tables.notification_configs.retain(|c| c.id != id);
        Ok(tables.notification_configs.len() != before)
    }

    async fn append_notification_log(&self, log: &NotificationLog) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.notification_logs.push(log.clone());
        Ok(())
    }

    async fn list_notification_logs(&self, product_id: &str, limit: Option<usize>) -> StoreResult<Vec<NotificationLog>> {
        let tables = self.tables.read().await;
        Ok(newest_first(
            tables.notification_logs.iter().filter(|l| l.product_id == product_id).cloned(),
            limit,
        ))
    }

    async fn save_false_positive(&self, entry: &FalsePositive) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        upsert(&mut tables.false_positives, entry, |f| f.id == entry.id);
        Ok(())
    }

    async fn list_false_positives(&self, product_id: &str) -> StoreResult<Vec<FalsePositive>> {
        let tables = self.tables.read().await;
        Ok(tables
            .false_positives
            .iter()
            .filter(|f| f.product_id == product_id)
            .cloned()
            .collect())
    }
}
