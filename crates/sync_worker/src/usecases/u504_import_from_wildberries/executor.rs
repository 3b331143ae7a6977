use super::{
    pacing::{Pacer, PacingPolicy},
    processors::product,
    wildberries_api_client::{CatalogError, CatalogPage, CatalogSource, ImportCursor},
};
use crate::domain::a001_product::repository;
use crate::system::queue::collaborators::ProductImporter;
use async_trait::async_trait;
use contracts::usecases::u504_import_from_wildberries::{ImportMethod, ImportOutcome, ImportRequest};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::sync::Arc;

/// Счётчики одной страницы; принадлежат одному вызову обработки
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub imported: u64,
    pub updated: u64,
    pub errors: u64,
}

impl BatchResult {
    fn absorb(&mut self, other: BatchResult) {
        self.imported += other.imported;
        self.updated += other.updated;
        self.errors += other.errors;
    }

    fn record(&mut self, is_new: bool) {
        if is_new {
            self.imported += 1;
        } else {
            self.updated += 1;
        }
    }
}

/// Executor импорта карточек Wildberries в таблицу products
pub struct ImportExecutor {
    db: DatabaseConnection,
    source: Arc<dyn CatalogSource>,
    pacing: PacingPolicy,
}

impl ImportExecutor {
    pub fn new(db: DatabaseConnection, source: Arc<dyn CatalogSource>, pacing: PacingPolicy) -> Self {
        Self { db, source, pacing }
    }

    pub async fn run(&self, request: &ImportRequest) -> ImportOutcome {
        match request.method {
            ImportMethod::Batch => self.import_products(request.batch_size).await,
            ImportMethod::Single => self.import_products_single(request.batch_size).await,
        }
    }

    /// Постраничный импорт: одна проверка существования на страницу
    pub async fn import_products(&self, batch_size: u32) -> ImportOutcome {
        self.run_pages(batch_size, ImportMethod::Batch).await
    }

    /// Тот же курсор, но проверка и upsert по одной карточке
    pub async fn import_products_single(&self, batch_size: u32) -> ImportOutcome {
        self.run_pages(batch_size, ImportMethod::Single).await
    }

    async fn run_pages(&self, batch_size: u32, method: ImportMethod) -> ImportOutcome {
        let batch_size = batch_size.max(1);
        tracing::info!(
            "Starting Wildberries products import (method: {}, batch size: {})",
            method,
            batch_size
        );

        let mut cursor = ImportCursor::default();
        let mut totals = BatchResult::default();
        let mut pacer = Pacer::new(&self.pacing);
        let mut page_no = 0usize;

        loop {
            let page = match self.fetch_with_retry(&mut pacer, batch_size, &cursor).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!("Failed to fetch catalog page {}: {}", page_no + 1, e);
                    return abort(method, totals, e.to_string());
                }
            };
            page_no += 1;

            if page.cards.is_empty() {
                tracing::info!("Catalog page {} is empty, import finished", page_no);
                break;
            }
            cursor = page.cursor.clone();

            let processed = match method {
                ImportMethod::Batch => self.process_batch(&page.cards).await,
                ImportMethod::Single => Ok(self.process_single(&page.cards).await),
            };
            let batch = match processed {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Failed to process catalog page {}: {}", page_no, e);
                    return abort(method, totals, e.to_string());
                }
            };
            totals.absorb(batch);

            tracing::info!(
                "Page {}: {} cards, +{} new, {} updated, {} errors (total: {} of {})",
                page_no,
                page.cards.len(),
                batch.imported,
                batch.updated,
                batch.errors,
                totals.imported + totals.updated,
                page.total
            );

            pacer.pause().await;
        }

        let outcome =
            ImportOutcome::completed(method, totals.imported, totals.updated, totals.errors);
        tracing::info!("{}", outcome.message());
        outcome
    }

    /// Запрос страницы; 429 повторяется только если политика пейсинга это разрешает
    async fn fetch_with_retry(
        &self,
        pacer: &mut Pacer,
        batch_size: u32,
        cursor: &ImportCursor,
    ) -> Result<CatalogPage, CatalogError> {
        loop {
            match self.source.fetch_page(batch_size, cursor).await {
                Ok(page) => {
                    pacer.on_success();
                    return Ok(page);
                }
                Err(e) => {
                    let retry = match &e {
                        CatalogError::RateLimited { retry_after } => {
                            pacer.on_rate_limited(*retry_after)
                        }
                        _ => None,
                    };
                    let Some(delay) = retry else {
                        return Err(e);
                    };
                    tracing::warn!("Rate limited by Wildberries, retrying page in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Страница целиком: один запрос `nm_id IN (...)`, затем upsert каждой карточки.
    /// Повтор nm_id внутри страницы считается обновлением.
    async fn process_batch(&self, cards: &[Value]) -> anyhow::Result<BatchResult> {
        let prepared: Vec<_> = cards.iter().map(product::prepare).collect();
        let nm_ids: Vec<i64> = prepared
            .iter()
            .filter_map(|entry| entry.as_ref().ok().map(|e| e.nm_id))
            .collect();
        let mut known = repository::find_existing_nm_ids(&self.db, &nm_ids).await?;

        let mut result = BatchResult::default();
        for entry in prepared {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping card: {}", e);
                    result.errors += 1;
                    continue;
                }
            };
            match repository::upsert(&self.db, &entry).await {
                Ok(()) => {
                    tracing::debug!("Upserted product nm_id={}", entry.nm_id);
                    result.record(known.insert(entry.nm_id));
                }
                Err(e) => {
                    tracing::error!("Failed to save product nm_id={}: {}", entry.nm_id, e);
                    result.errors += 1;
                }
            }
        }
        Ok(result)
    }

    async fn process_single(&self, cards: &[Value]) -> BatchResult {
        let mut result = BatchResult::default();
        for card in cards {
            match self.process_card(card).await {
                Ok(is_new) => result.record(is_new),
                Err(e) => {
                    tracing::warn!("Failed to import card: {}", e);
                    result.errors += 1;
                }
            }
        }
        result
    }

    /// Обработать одну карточку; `true`, если товар новый
    async fn process_card(&self, card: &Value) -> anyhow::Result<bool> {
        let entry = product::prepare(card)?;
        let existed = repository::exists(&self.db, entry.nm_id).await?;
        repository::upsert(&self.db, &entry).await?;
        Ok(!existed)
    }
}

fn abort(method: ImportMethod, totals: BatchResult, error: String) -> ImportOutcome {
    ImportOutcome::aborted(method, totals.imported, totals.updated, totals.errors, error)
}

#[async_trait]
impl ProductImporter for ImportExecutor {
    async fn import(&self, request: &ImportRequest) -> ImportOutcome {
        self.run(request).await
    }
}
