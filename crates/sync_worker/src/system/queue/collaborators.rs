use async_trait::async_trait;
use chrono::NaiveDate;
use contracts::usecases::u504_import_from_wildberries::{ImportOutcome, ImportRequest};
use serde_json::Value;
use std::sync::Arc;

/// Отправка данных на сайт продавца
#[async_trait]
pub trait OutboundDelivery: Send + Sync {
    async fn send_products(&self, main_ids: &[String], vendor: Option<&str>)
        -> anyhow::Result<Value>;
    async fn send_stocks(&self, vendor_codes: &[String]) -> anyhow::Result<Value>;
}

/// Заказы маркетплейса
#[async_trait]
pub trait MarketplaceOrders: Send + Sync {
    async fn get_orders(&self, date_from: NaiveDate, flag: i32) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait StockRefresh: Send + Sync {
    async fn update_stocks(&self) -> anyhow::Result<Value>;
}

/// Импорт карточек; сбой загрузки страницы возвращается как `success: false`
#[async_trait]
pub trait ProductImporter: Send + Sync {
    async fn import(&self, request: &ImportRequest) -> ImportOutcome;
}

/// Все исполнители задач воркера
#[derive(Clone)]
pub struct Collaborators {
    pub outbound: Arc<dyn OutboundDelivery>,
    pub orders: Arc<dyn MarketplaceOrders>,
    pub stocks: Arc<dyn StockRefresh>,
    pub importer: Arc<dyn ProductImporter>,
}
