//! In-process product store, optionally persisted to a JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::locator;
use crate::models::{ChangeHistoryEntry, ExtractionResult, ProductRecord, UpsertOutcome};
use crate::query::ProductQuery;
use crate::traits::ProductStore;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    /// Insertion order is the store's natural order.
    products: Vec<ProductRecord>,
    history: Vec<ChangeHistoryEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl StoreState {
    fn rebuild_index(&mut self) {
        self.index = self
            .products
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.locator_key.clone(), pos))
            .collect();
    }

    fn find(&self, key: &str) -> Option<&ProductRecord> {
        self.index.get(key).map(|&pos| &self.products[pos])
    }
}

/// Product store held in memory behind a single lock.
///
/// The whole lookup-then-write of an upsert happens under that lock, so
/// concurrent upserts of one key cannot create duplicates. When opened
/// with a path, every successful write is flushed to disk through a
/// temporary file and a rename; a failed flush rolls the write back.
///
/// Each flush rewrites the whole file, so a write costs O(records). The
/// file write runs on the blocking pool after the state lock is released;
/// writers are serialized so flushes land in the order they were made.
#[derive(Debug, Clone, Default)]
pub struct MemoryProductStore {
    state: Arc<Mutex<StoreState>>,
    writes: Arc<tokio::sync::Mutex<()>>,
    path: Option<PathBuf>,
}

/// How to take back an applied upsert when its flush fails.
enum Undo {
    Restore {
        pos: usize,
        old: ProductRecord,
        recorded_change: bool,
    },
    Remove {
        key: String,
    },
}

impl Undo {
    fn apply(self, state: &mut StoreState) {
        match self {
            Undo::Restore {
                pos,
                old,
                recorded_change,
            } => {
                state.products[pos] = old;
                if recorded_change {
                    state.history.pop();
                }
            }
            Undo::Remove { key } => {
                state.products.pop();
                state.index.remove(&key);
            }
        }
    }
}

impl MemoryProductStore {
    /// A store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or start) a store persisted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let mut state = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice::<StoreState>(&bytes)?
        } else {
            StoreState::default()
        };
        state.rebuild_index();
        tracing::debug!(path = %path.display(), products = state.products.len(), "Opened product store");

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            writes: Arc::default(),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an upsert to the in-memory state and report how to undo it.
    fn apply(
        state: &mut StoreState,
        key: String,
        result: &ExtractionResult,
        now: chrono::DateTime<Utc>,
    ) -> (UpsertOutcome, Undo) {
        match state.index.get(&key).copied() {
            Some(pos) => {
                let old = state.products[pos].clone();
                let new = old.merged_with(result, now);
                let change = ChangeHistoryEntry::between(&old, &new, now);
                let outcome = UpsertOutcome::updated(&old, &new, change.clone());

                state.products[pos] = new;
                let recorded_change = change.is_some();
                if let Some(entry) = change {
                    state.history.push(entry);
                }
                (
                    outcome,
                    Undo::Restore {
                        pos,
                        old,
                        recorded_change,
                    },
                )
            }
            None => {
                let record = ProductRecord::first_collection(result, key.clone(), now);
                let outcome = UpsertOutcome::created(record.id);

                let pos = state.products.len();
                state.products.push(record);
                state.index.insert(key.clone(), pos);
                (outcome, Undo::Remove { key })
            }
        }
    }

    async fn flush(path: PathBuf, bytes: Vec<u8>) -> Result<(), AppError> {
        tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            let mut tmp = path.clone().into_os_string();
            tmp.push(".tmp");
            let tmp = PathBuf::from(tmp);
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::StoreWrite(e.to_string()))?
    }
}

impl ProductStore for MemoryProductStore {
    async fn upsert(&self, result: &ExtractionResult) -> Result<UpsertOutcome, AppError> {
        let key = locator::normalize(&result.locator)?;
        let now = Utc::now();
        let _writer = self.writes.lock().await;

        let (outcome, undo, snapshot) = {
            let mut state = self.lock();
            let (outcome, undo) = Self::apply(&mut state, key, result, now);
            let Some(path) = &self.path else {
                return Ok(outcome);
            };
            match serde_json::to_vec_pretty(&*state) {
                Ok(bytes) => (outcome, undo, (path.clone(), bytes)),
                Err(e) => {
                    undo.apply(&mut state);
                    return Err(AppError::StoreWrite(e.to_string()));
                }
            }
        };

        let (path, bytes) = snapshot;
        if let Err(e) = Self::flush(path, bytes).await {
            undo.apply(&mut self.lock());
            return Err(AppError::StoreWrite(e.to_string()));
        }
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProductRecord>, AppError> {
        Ok(self.lock().products.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_locator(&self, locator: &str) -> Result<Option<ProductRecord>, AppError> {
        let key = locator::normalize(locator)?;
        Ok(self.lock().find(&key).cloned())
    }

    async fn query(&self, query: &ProductQuery) -> Result<Vec<ProductRecord>, AppError> {
        Ok(query.apply(&self.lock().products))
    }

    async fn history(
        &self,
        product_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChangeHistoryEntry>, AppError> {
        Ok(self
            .lock()
            .history
            .iter()
            .rev()
            .filter(|e| e.product_id == product_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, AppError> {
        Ok(self.lock().products.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, ProductFields, StockStatus, UpsertKind};

    fn result(locator: &str, price: Option<f64>, stock: StockStatus) -> ExtractionResult {
        ExtractionResult::new(
            locator,
            "generic",
            ProductFields {
                name: "Ceramic Mug".into(),
                price,
                stock,
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn first_upsert_creates_without_history() {
        let store = MemoryProductStore::new();
        let outcome = store
            .upsert(&result("https://shop.example.com/mug", Some(12.0), StockStatus::InStock))
            .await
            .unwrap();

        assert_eq!(outcome.kind, UpsertKind::Created);
        assert!(outcome.change.is_none());
        assert!(store.history(outcome.id, 10).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn price_drop_updates_in_place_and_records_history() {
        let store = MemoryProductStore::new();
        let first = store
            .upsert(&result("https://shop.example.com/mug?utm_source=a", Some(12.0), StockStatus::InStock))
            .await
            .unwrap();
        let before = store.get(first.id).await.unwrap().unwrap();

        let second = store
            .upsert(&result("https://shop.example.com/mug#reviews", Some(9.5), StockStatus::InStock))
            .await
            .unwrap();

        assert_eq!(second.kind, UpsertKind::Updated);
        assert_eq!(second.id, first.id);
        assert_eq!(store.count().await.unwrap(), 1);

        let after = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(after.collected_at, before.collected_at);
        assert_eq!(after.fields.price, Some(9.5));
        assert_eq!(after.locator, "https://shop.example.com/mug#reviews");

        let history = store.history(first.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].change_kinds.contains(&ChangeKind::PriceDown));
        assert_eq!(history[0].old_price, Some(12.0));
    }

    #[tokio::test]
    async fn identical_price_and_stock_record_no_history() {
        let store = MemoryProductStore::new();
        let locator = "https://shop.example.com/mug";
        let first = store
            .upsert(&result(locator, Some(12.0), StockStatus::InStock))
            .await
            .unwrap();
        let second = store
            .upsert(&result(locator, Some(12.0), StockStatus::InStock))
            .await
            .unwrap();

        assert!(!second.changed);
        assert!(second.change.is_none());
        assert!(store.history(first.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn price_and_stock_change_together() {
        let store = MemoryProductStore::new();
        let locator = "https://shop.example.com/mug";
        let first = store
            .upsert(&result(locator, Some(12.0), StockStatus::InStock))
            .await
            .unwrap();
        store
            .upsert(&result(locator, Some(15.0), StockStatus::OutOfStock))
            .await
            .unwrap();
        store
            .upsert(&result(locator, Some(11.0), StockStatus::OutOfStock))
            .await
            .unwrap();

        let history = store.history(first.id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(
            history[0].change_kinds.iter().copied().collect::<Vec<_>>(),
            vec![ChangeKind::PriceDown]
        );
        assert!(history[1].change_kinds.contains(&ChangeKind::PriceUp));
        assert!(history[1].change_kinds.contains(&ChangeKind::StockChange));

        assert_eq!(store.history(first.id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_of_one_key_create_one_record() {
        let store = MemoryProductStore::new();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let locator = format!("https://shop.example.com/mug?utm_campaign={i}");
                store
                    .upsert(&result(&locator, Some(10.0 + i as f64), StockStatus::InStock))
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().kind == UpsertKind::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_keeps_insertion_order() {
        let store = MemoryProductStore::new();
        for slug in ["c", "a", "b"] {
            store
                .upsert(&result(&format!("https://shop.example.com/{slug}"), Some(1.0), StockStatus::Unknown))
                .await
                .unwrap();
        }
        let records = store.query(&ProductQuery::new()).await.unwrap();
        let locators: Vec<_> = records.iter().map(|r| r.locator.as_str()).collect();
        assert_eq!(
            locators,
            vec![
                "https://shop.example.com/c",
                "https://shop.example.com/a",
                "https://shop.example.com/b"
            ]
        );
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let locator = "https://shop.example.com/mug";

        let id = {
            let store = MemoryProductStore::open(&path).unwrap();
            let created = store
                .upsert(&result(locator, Some(12.0), StockStatus::InStock))
                .await
                .unwrap();
            store
                .upsert(&result(locator, Some(8.0), StockStatus::InStock))
                .await
                .unwrap();
            created.id
        };

        let reopened = MemoryProductStore::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let record = reopened.get_by_locator(locator).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.fields.price, Some(8.0));
        assert_eq!(reopened.history(id, 10).await.unwrap().len(), 1);

        // The reopened index still dedups.
        let again = reopened
            .upsert(&result(locator, Some(8.0), StockStatus::InStock))
            .await
            .unwrap();
        assert_eq!(again.kind, UpsertKind::Updated);
    }

    #[tokio::test]
    async fn failed_flush_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("products.json");
        let store = MemoryProductStore::open(&path).unwrap();

        let err = store
            .upsert(&result("https://shop.example.com/mug", Some(1.0), StockStatus::InStock))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreWrite(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_flush_restores_the_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let path = nested.join("products.json");
        let locator = "https://shop.example.com/mug";

        let store = MemoryProductStore::open(&path).unwrap();
        let created = store
            .upsert(&result(locator, Some(12.0), StockStatus::InStock))
            .await
            .unwrap();

        std::fs::remove_dir_all(&nested).unwrap();
        let err = store
            .upsert(&result(locator, Some(7.0), StockStatus::OutOfStock))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreWrite(_)));

        let record = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(record.fields.price, Some(12.0));
        assert!(store.history(created.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_file_store_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let store = MemoryProductStore::open(&path).unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let locator = format!("https://shop.example.com/item-{i}");
                store
                    .upsert(&result(&locator, Some(i as f64), StockStatus::InStock))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // The last flush on disk carries every write.
        let reopened = MemoryProductStore::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 16);
    }
}
