use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::shared::settings::WbSettings;
use crate::system::queue::collaborators::{MarketplaceOrders, StockRefresh};

const CONTENT_API_URL: &str = "https://content-api.wildberries.ru";
const STATISTICS_API_URL: &str = "https://statistics-api.wildberries.ru";

/// Самая ранняя дата, с которой Statistics API отдаёт полный срез остатков
const STOCKS_DATE_FROM: &str = "2019-06-20";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Wildberries API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Wildberries API rate limit exceeded (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Wildberries API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse Wildberries API response: {0}")]
    Parse(String),
}

/// Курсор пагинации каталога: пустой на первой странице, дальше берётся из ответа
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportCursor {
    pub updated_at: Option<String>,
    pub nm_id: i64,
}

impl ImportCursor {
    pub fn is_start(&self) -> bool {
        self.updated_at.is_none() && self.nm_id == 0
    }
}

/// Одна страница каталога. Карточки остаются сырым JSON, чтобы одна кривая
/// карточка не ломала разбор всей страницы.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub cards: Vec<Value>,
    pub cursor: ImportCursor,
    pub total: i64,
}

/// Фильтр запроса /content/v2/get/cards/list.
/// Читается из `[import.filter]` в snake_case, в API уходит в camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"), default)]
pub struct CatalogFilter {
    /// -1 все, 0 без фото, 1 с фото
    pub with_photo: i32,
    #[serde(rename(serialize = "objectIDs"), skip_serializing_if = "Vec::is_empty")]
    pub object_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub brands: Vec<String>,
    #[serde(rename(serialize = "tagIDs"), skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<i64>,
    #[serde(rename(serialize = "imtID"), skip_serializing_if = "Option::is_none")]
    pub imt_id: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub allowed_categories_only: bool,
    /// Уходит в sort.ascending, а не в filter
    #[serde(skip_serializing)]
    pub ascending: bool,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            with_photo: -1,
            object_ids: Vec::new(),
            brands: Vec::new(),
            tag_ids: Vec::new(),
            imt_id: None,
            allowed_categories_only: false,
            ascending: false,
        }
    }
}

/// Источник страниц каталога для конвейера импорта
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_page(&self, limit: u32, cursor: &ImportCursor)
        -> Result<CatalogPage, CatalogError>;
}

/// HTTP-клиент для работы с Wildberries Supplier API
pub struct WildberriesApiClient {
    client: reqwest::Client,
    api_token: String,
    content_url: String,
    statistics_url: String,
    filter: CatalogFilter,
}

impl WildberriesApiClient {
    pub fn new(settings: &WbSettings) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy) = &settings.proxy {
            tracing::info!("Wildberries API requests go through proxy");
            builder = builder
                .proxy(reqwest::Proxy::all(proxy)?)
                .danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
            api_token: settings.api_token.clone(),
            content_url: CONTENT_API_URL.to_string(),
            statistics_url: STATISTICS_API_URL.to_string(),
            filter: CatalogFilter::default(),
        })
    }

    pub fn with_filter(mut self, filter: CatalogFilter) -> Self {
        self.filter = filter;
        self
    }

    #[cfg(test)]
    pub(crate) fn filter(&self) -> &CatalogFilter {
        &self.filter
    }

    /// Получить страницу карточек через POST /content/v2/get/cards/list
    pub async fn fetch_product_list(
        &self,
        limit: u32,
        cursor: &ImportCursor,
    ) -> Result<CatalogPage, CatalogError> {
        let url = format!("{}/content/v2/get/cards/list", self.content_url);
        let body = cards_list_request(limit, cursor, &self.filter);

        tracing::debug!("POST {} cursor: {:?}", url, cursor);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_token)
            .json(&body)
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        let data: CardsListResponse =
            serde_json::from_str(&body).map_err(|e| CatalogError::Parse(e.to_string()))?;

        let page = CatalogPage {
            cards: data.cards.unwrap_or_default(),
            cursor: ImportCursor {
                updated_at: data.cursor.updated_at,
                nm_id: data.cursor.nm_id.unwrap_or_default(),
            },
            total: data.cursor.total,
        };

        tracing::info!(
            "Wildberries API response: {} items, total: {}, cursor: updatedAt={}, nmID={}",
            page.cards.len(),
            page.total,
            page.cursor.updated_at.as_deref().unwrap_or("none"),
            page.cursor.nm_id
        );

        Ok(page)
    }

    /// Заказы через Statistics API
    /// GET /api/v1/supplier/orders
    pub async fn fetch_orders(
        &self,
        date_from: NaiveDate,
        flag: i32,
    ) -> Result<Vec<Value>, CatalogError> {
        let url = format!("{}/api/v1/supplier/orders", self.statistics_url);
        let query = [
            ("dateFrom", date_from.format("%Y-%m-%d").to_string()),
            ("flag", flag.to_string()),
        ];
        self.get_rows(&url, &query).await
    }

    /// Остатки на складах WB
    /// GET /api/v1/supplier/stocks
    pub async fn fetch_stocks(&self, date_from: &str) -> Result<Vec<Value>, CatalogError> {
        let url = format!("{}/api/v1/supplier/stocks", self.statistics_url);
        self.get_rows(&url, &[("dateFrom", date_from.to_string())])
            .await
    }

    async fn get_rows(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, CatalogError> {
        tracing::debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url)
            .header("Authorization", &self.api_token)
            .query(query)
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        // пустой ответ Statistics API приходит как `null`
        let rows: Option<Vec<Value>> =
            serde_json::from_str(&body).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Ok(rows.unwrap_or_default())
    }
}

#[async_trait]
impl CatalogSource for WildberriesApiClient {
    async fn fetch_page(
        &self,
        limit: u32,
        cursor: &ImportCursor,
    ) -> Result<CatalogPage, CatalogError> {
        self.fetch_product_list(limit, cursor).await
    }
}

#[async_trait]
impl MarketplaceOrders for WildberriesApiClient {
    async fn get_orders(&self, date_from: NaiveDate, flag: i32) -> anyhow::Result<Value> {
        let orders = self.fetch_orders(date_from, flag).await?;
        tracing::info!("Received {} orders since {}", orders.len(), date_from);
        Ok(json!({
            "date_from": date_from.format("%Y-%m-%d").to_string(),
            "flag": flag,
            "count": orders.len(),
        }))
    }
}

#[async_trait]
impl StockRefresh for WildberriesApiClient {
    async fn update_stocks(&self) -> anyhow::Result<Value> {
        let stocks = self.fetch_stocks(STOCKS_DATE_FROM).await?;
        tracing::info!("Received {} stock rows", stocks.len());
        Ok(json!({ "count": stocks.len() }))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(response.headers());
        tracing::warn!("Wildberries API rate limit hit, retry after {:?}", retry_after);
        return Err(CatalogError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!("Wildberries API request failed: {} {}", status, body);
    Err(CatalogError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Секунды из `Retry-After` или `X-Ratelimit-Retry`
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    ["retry-after", "x-ratelimit-retry"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .next()
}

fn cards_list_request(limit: u32, cursor: &ImportCursor, filter: &CatalogFilter) -> Value {
    let mut request_cursor = json!({ "limit": limit });
    if let Some(updated_at) = &cursor.updated_at {
        request_cursor["updatedAt"] = json!(updated_at);
    }
    if cursor.nm_id != 0 {
        request_cursor["nmID"] = json!(cursor.nm_id);
    }

    json!({
        "settings": {
            "cursor": request_cursor,
            "filter": filter,
            "sort": { "ascending": filter.ascending },
        }
    })
}

// ============================================================================
// Response structures для Wildberries API
// ============================================================================

#[derive(Debug, Deserialize)]
struct CardsListResponse {
    #[serde(default)]
    cards: Option<Vec<Value>>,
    #[serde(default)]
    cursor: ResponseCursor,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseCursor {
    #[serde(rename = "updatedAt")]
    updated_at: Option<String>,
    #[serde(rename = "nmID")]
    nm_id: Option<i64>,
    #[serde(default)]
    total: i64,
}
