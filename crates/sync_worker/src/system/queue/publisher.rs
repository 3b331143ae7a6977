use chrono::NaiveDate;
use contracts::system::queue::{Task, TaskEnvelope};
use contracts::usecases::u504_import_from_wildberries::ImportMethod;
use std::sync::Arc;

use crate::shared::broker::MessagePublisher;

/// Типизированная публикация задач; ключ маршрутизации выбирается по типу задачи
pub struct TaskPublisher {
    publisher: Arc<dyn MessagePublisher>,
}

impl TaskPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }

    /// Опубликовать задачу; `Some(message_id)`, если брокер её принял
    pub async fn publish(&self, task: Task) -> Option<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let envelope = TaskEnvelope {
            message_id: Some(message_id.clone()),
            ..TaskEnvelope::new(task)
        };
        let kind = envelope.kind();

        let body = match serde_json::to_value(&envelope) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to serialize {} task: {}", kind, e);
                return None;
            }
        };

        if self.publisher.publish(kind.routing_key(), &body).await {
            tracing::info!("Published {} task {}", kind, message_id);
            Some(message_id)
        } else {
            tracing::warn!("{} task was not published", kind);
            None
        }
    }

    pub async fn publish_products_task(
        &self,
        main_ids: Vec<String>,
        vendor: Option<String>,
    ) -> bool {
        self.publish(Task::SendProducts {
            main_id: main_ids,
            vendor,
        })
        .await
        .is_some()
    }

    pub async fn publish_stocks_task(&self, vendor_codes: Vec<String>) -> bool {
        self.publish(Task::SendStocks { vendor_codes })
            .await
            .is_some()
    }

    pub async fn publish_orders_task(&self, date_from: Option<NaiveDate>, flag: i32) -> bool {
        self.publish(Task::SendOrders { date_from, flag })
            .await
            .is_some()
    }

    pub async fn publish_import_task(&self, batch_size: Option<u32>, method: ImportMethod) -> bool {
        self.publish(Task::ImportProducts { batch_size, method })
            .await
            .is_some()
    }

    pub async fn publish_update_stocks_task(&self) -> bool {
        self.publish(Task::UpdateStocks).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::broker::memory::MemoryBroker;
    use contracts::system::queue::RoutingKey;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_tasks_routed_by_family() {
        let broker = Arc::new(MemoryBroker::new(5));
        let publisher = TaskPublisher::new(broker.clone());

        assert!(publisher.publish_products_task(vec!["1".into(), "2".into()], None).await);
        assert!(publisher.publish_stocks_task(vec!["A-1".into()]).await);
        assert!(publisher.publish_orders_task(None, 1).await);
        assert!(publisher.publish_import_task(Some(50), ImportMethod::Single).await);
        assert!(publisher.publish_update_stocks_task().await);

        let keys: Vec<RoutingKey> = broker.published().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                RoutingKey::Products,
                RoutingKey::Stocks,
                RoutingKey::Orders,
                RoutingKey::Products,
                RoutingKey::Stocks,
            ]
        );
        assert_eq!(broker.depth("wb_products_queue"), 2);
        assert_eq!(broker.depth("wb_stocks_queue"), 2);
        assert_eq!(broker.depth("wb_orders_queue"), 1);
    }

    #[tokio::test]
    async fn test_envelope_is_flat_with_message_id_and_timestamp() {
        let broker = Arc::new(MemoryBroker::new(5));
        let publisher = TaskPublisher::new(broker.clone());

        let message_id = publisher
            .publish(Task::SendProducts {
                main_id: vec!["123".to_string()],
                vendor: Some("v1".into()),
            })
            .await
            .unwrap();

        let (_, body) = broker.published().remove(0);
        assert_eq!(body["type"], "send_products");
        assert_eq!(body["main_id"], serde_json::json!(["123"]));
        assert_eq!(body["vendor"], "v1");
        assert_eq!(body["message_id"], message_id.as_str());
        assert!(body["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_transport_failure_reports_false() {
        let broker = Arc::new(MemoryBroker::new(5));
        broker.fail_publish.store(true, Ordering::SeqCst);
        let publisher = TaskPublisher::new(broker.clone());

        assert!(!publisher.publish_update_stocks_task().await);
        assert!(broker.published().is_empty());
    }
}
