use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::shared::settings::WbSettings;
use crate::system::queue::collaborators::OutboundDelivery;

/// HTTP-клиент сайта продавца: отправка товаров и остатков
pub struct SiteApiClient {
    client: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
    vendor: String,
}

#[derive(Debug, Serialize)]
struct ProductsRequest<'a> {
    vendor: &'a str,
    main_id: &'a [String],
}

#[derive(Debug, Serialize)]
struct StocksRequest<'a> {
    vendor: &'a str,
    vendor_codes: &'a [String],
}

impl SiteApiClient {
    pub fn new(settings: &WbSettings) -> anyhow::Result<Self> {
        if settings.site_url.is_none() {
            tracing::warn!("Site URL is not configured, outbound tasks will fail");
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: settings
                .site_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            token: settings.site_token.clone(),
            vendor: settings.name.clone(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> anyhow::Result<Value> {
        let Some(base_url) = &self.base_url else {
            anyhow::bail!("Site URL is not configured in wb_settings");
        };
        let url = format!("{}{}", base_url, path);
        tracing::debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("Site request {} failed with status {}: {}", path, status, text);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl OutboundDelivery for SiteApiClient {
    async fn send_products(&self, main_ids: &[String], vendor: Option<&str>) -> anyhow::Result<Value> {
        let body = ProductsRequest {
            vendor: vendor.unwrap_or(&self.vendor),
            main_id: main_ids,
        };
        tracing::info!("Sending {} products to site (vendor: {})", main_ids.len(), body.vendor);
        self.post("/mp_api_client/getTovars/", &body).await
    }

    async fn send_stocks(&self, vendor_codes: &[String]) -> anyhow::Result<Value> {
        let body = StocksRequest {
            vendor: &self.vendor,
            vendor_codes,
        };
        tracing::info!("Sending stocks for {} vendor codes to site", vendor_codes.len());
        self.post("/mp_api_client/getStocks/", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::settings::BrokerSettings;

    fn settings(site_url: Option<&str>) -> WbSettings {
        WbSettings {
            name: "shop".into(),
            api_token: "token".into(),
            proxy: None,
            site_url: site_url.map(str::to_string),
            site_token: Some("site-token".into()),
            broker: BrokerSettings::default(),
        }
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = SiteApiClient::new(&settings(Some("https://shop.example/"))).unwrap();
        assert_eq!(client.base_url.as_deref(), Some("https://shop.example"));
        assert_eq!(client.vendor, "shop");
    }

    #[tokio::test]
    async fn test_send_without_site_url_fails_per_call() {
        let client = SiteApiClient::new(&settings(None)).unwrap();
        let err = client.send_products(&["1".to_string()], None).await.unwrap_err();
        assert!(err.to_string().contains("Site URL is not configured"));
    }

    #[test]
    fn test_products_payload_shape() {
        let body = ProductsRequest {
            vendor: "shop",
            main_id: &["1".to_string(), "a1b2".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"vendor": "shop", "main_id": ["1", "a1b2"]})
        );
    }
}
