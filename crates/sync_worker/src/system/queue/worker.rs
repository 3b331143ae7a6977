use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use contracts::system::queue::{
    EnvelopeError, MessageResult, RoutingKey, RunReport, SweepReport, Task, TaskEnvelope, TaskKind,
};
use contracts::usecases::u504_import_from_wildberries::ImportRequest;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::collaborators::Collaborators;
use crate::shared::broker::{
    BrokerError, DeliveryHandler, HandlerOutcome, InboundMessage, MessageQueue,
};

/// Ошибка обработки одного сообщения. Дальше границы сообщения не уходит.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Envelope(EnvelopeError),

    #[error("{kind} failed: {source}")]
    Collaborator {
        kind: TaskKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    Import(String),
}

impl DispatchError {
    /// Повторная доставка закончится тем же самым
    pub fn is_permanent(&self) -> bool {
        matches!(self, DispatchError::Envelope(e) if e.is_permanent())
    }
}

impl From<EnvelopeError> for DispatchError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::UnknownType(tag) => DispatchError::UnknownType(tag),
            other => DispatchError::Envelope(other),
        }
    }
}

/// Маршрутизация задачи к исполнителю с извлечением аргументов
pub struct TaskDispatcher {
    collaborators: Collaborators,
    default_batch_size: u32,
}

impl TaskDispatcher {
    pub fn new(collaborators: Collaborators, default_batch_size: u32) -> Self {
        Self {
            collaborators,
            default_batch_size,
        }
    }

    pub async fn dispatch(&self, task: &Task) -> Result<Value, DispatchError> {
        let kind = task.kind();
        let collaborator_error = |source| DispatchError::Collaborator { kind, source };

        match task {
            Task::SendProducts { main_id, vendor } => self
                .collaborators
                .outbound
                .send_products(main_id, vendor.as_deref())
                .await
                .map_err(collaborator_error),

            Task::SendStocks { vendor_codes } => self
                .collaborators
                .outbound
                .send_stocks(vendor_codes)
                .await
                .map_err(collaborator_error),

            Task::SendOrders { date_from, flag } => {
                let date_from =
                    date_from.unwrap_or_else(|| (Utc::now() - ChronoDuration::days(1)).date_naive());
                self.collaborators
                    .orders
                    .get_orders(date_from, *flag)
                    .await
                    .map_err(collaborator_error)
            }

            Task::ImportProducts { batch_size, method } => {
                let request = ImportRequest {
                    batch_size: batch_size.unwrap_or(self.default_batch_size),
                    method: *method,
                };
                let outcome = self.collaborators.importer.import(&request).await;
                if !outcome.success {
                    return Err(DispatchError::Import(outcome.message()));
                }
                let mut result = serde_json::to_value(&outcome)
                    .map_err(|e| DispatchError::Import(e.to_string()))?;
                result["message"] = json!(outcome.message());
                Ok(result)
            }

            Task::UpdateStocks => self
                .collaborators
                .stocks
                .update_stocks()
                .await
                .map_err(collaborator_error),
        }
    }
}

/// Обработчик доставок: decode → dispatch → запись результата
struct RecordingHandler<'a> {
    dispatcher: &'a TaskDispatcher,
    results: Vec<MessageResult>,
}

#[async_trait]
impl DeliveryHandler for RecordingHandler<'_> {
    async fn handle(&mut self, message: &InboundMessage) -> HandlerOutcome {
        let decoded = TaskEnvelope::decode(&message.body);

        let message_id = decoded
            .as_ref()
            .ok()
            .and_then(|envelope| envelope.message_id.clone())
            .or_else(|| message.message_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (task_type, dispatched) = match decoded {
            Ok(envelope) => (
                Some(envelope.kind().as_str().to_string()),
                self.dispatcher.dispatch(&envelope.task).await,
            ),
            Err(e) => (e.task_type(), Err(DispatchError::from(e))),
        };

        match dispatched {
            Ok(result) => {
                tracing::info!(
                    "Message {} ({}) processed",
                    message_id,
                    task_type.as_deref().unwrap_or("-")
                );
                self.results
                    .push(MessageResult::succeeded(message_id, task_type, result));
                HandlerOutcome::Success
            }
            Err(e) => {
                tracing::error!("Message {} failed: {}", message_id, e);
                let permanent = e.is_permanent();
                self.results
                    .push(MessageResult::failed(message_id, task_type, e.to_string()));
                HandlerOutcome::Failure {
                    error: e.to_string(),
                    permanent,
                }
            }
        }
    }
}

/// Воркер: выбирает сообщения из очередей и передаёт их диспетчеру
pub struct WorkerDispatch {
    queue: Arc<dyn MessageQueue>,
    dispatcher: TaskDispatcher,
    inter_queue_pause: Duration,
}

impl WorkerDispatch {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        dispatcher: TaskDispatcher,
        inter_queue_pause: Duration,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            inter_queue_pause,
        }
    }

    /// Обработать до `max_messages` сообщений из очереди. Ошибки обработчиков
    /// попадают в результаты; наружу выходят только ошибки брокера.
    pub async fn run(
        &self,
        queue: &str,
        max_messages: Option<usize>,
    ) -> Result<RunReport, BrokerError> {
        let mut handler = RecordingHandler {
            dispatcher: &self.dispatcher,
            results: Vec::new(),
        };

        let processed = self.queue.consume(queue, &mut handler, max_messages).await?;

        let report = RunReport {
            processed,
            results: handler.results,
        };
        tracing::info!(
            "Queue '{}': processed {}, failed {}",
            queue,
            report.processed,
            report.failed_count()
        );
        Ok(report)
    }

    /// Последовательный обход трёх рабочих очередей с паузой между ними
    pub async fn run_all(
        &self,
        max_messages_per_queue: Option<usize>,
    ) -> Result<SweepReport, BrokerError> {
        let mut sweep = SweepReport::default();

        for (i, key) in RoutingKey::WORK.iter().enumerate() {
            if i > 0 && !self.inter_queue_pause.is_zero() {
                tokio::time::sleep(self.inter_queue_pause).await;
            }
            let report = self.run(key.queue_name(), max_messages_per_queue).await?;
            sweep.queues.insert(key.queue_name().to_string(), report);
        }

        Ok(sweep)
    }

    pub async fn close(&self) {
        self.queue.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::broker::memory::MemoryBroker;
    use crate::shared::broker::Settlement;
    use crate::system::queue::collaborators::fakes::{collaborators, Call, Recorder};
    use crate::system::queue::TaskPublisher;
    use chrono::NaiveDate;
    use contracts::usecases::u504_import_from_wildberries::ImportMethod;

    fn worker(broker: &Arc<MemoryBroker>, recorder: &Arc<Recorder>) -> WorkerDispatch {
        WorkerDispatch::new(
            broker.clone(),
            TaskDispatcher::new(collaborators(recorder), 100),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_send_orders_scenario() {
        let broker = Arc::new(MemoryBroker::new(5));
        let recorder = Arc::new(Recorder::default());
        broker.push_raw(
            "wb_orders_queue",
            br#"{"type":"send_orders","date_from":"2024-01-01"}"#,
            Some("amqp-1"),
        );

        let report = worker(&broker, &recorder)
            .run("wb_orders_queue", Some(10))
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(
            recorder.calls(),
            vec![Call::Orders(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 0)]
        );
        assert!(report.results[0].success);
        assert_eq!(report.results[0].message_id, "amqp-1");
        assert_eq!(report.results[0].task_type.as_deref(), Some("send_orders"));
        assert_eq!(
            broker.settlements(),
            vec![("wb_orders_queue".to_string(), Settlement::Ack)]
        );
    }

    #[tokio::test]
    async fn test_dispatch_extracts_arguments_for_every_type() {
        let broker = Arc::new(MemoryBroker::new(5));
        let recorder = Arc::new(Recorder::default());
        let publisher = TaskPublisher::new(broker.clone());

        publisher
            .publish_products_task(vec!["123".into(), "456".into()], Some("v1".into()))
            .await;
        publisher
            .publish_import_task(None, ImportMethod::Batch)
            .await;
        publisher
            .publish_stocks_task(vec!["A".into(), "B".into()])
            .await;
        publisher.publish_update_stocks_task().await;
        publisher.publish_orders_task(None, 1).await;

        let sweep = worker(&broker, &recorder).run_all(Some(10)).await.unwrap();

        assert_eq!(sweep.total_processed(), 5);
        assert_eq!(sweep.queues["wb_products_queue"].processed, 2);
        let yesterday = (Utc::now() - ChronoDuration::days(1)).date_naive();
        assert_eq!(
            recorder.calls(),
            vec![
                Call::SendProducts(vec!["123".into(), "456".into()], Some("v1".into())),
                Call::Import(100, ImportMethod::Batch),
                Call::SendStocks(vec!["A".into(), "B".into()]),
                Call::UpdateStocks,
                Call::Orders(yesterday, 1),
            ]
        );
        let import_result = sweep.queues["wb_products_queue"].results[1]
            .result
            .clone()
            .unwrap();
        assert_eq!(import_result["total"], 4);
        assert_eq!(
            import_result["message"],
            "Successfully imported 3 new products and updated 1 existing products"
        );
    }

    #[tokio::test]
    async fn test_legacy_producer_body_is_dispatched() {
        let broker = Arc::new(MemoryBroker::new(5));
        let recorder = Arc::new(Recorder::default());
        broker.push_raw(
            "wb_products_queue",
            br#"{"type":"send_products","main_id":[1,"a1b2"],"vendor":null,"created_at":"2024-01-01 10:00:00"}"#,
            None,
        );

        let report = worker(&broker, &recorder)
            .run("wb_products_queue", Some(1))
            .await
            .unwrap();

        assert!(report.results[0].success);
        assert_eq!(
            recorder.calls(),
            vec![Call::SendProducts(vec!["1".into(), "a1b2".into()], None)]
        );
        assert_eq!(
            broker.settlements(),
            vec![("wb_products_queue".to_string(), Settlement::Ack)]
        );
        assert_eq!(broker.depth("wb_dead_letter_queue"), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_requeued_with_failure_result() {
        let broker = Arc::new(MemoryBroker::new(0));
        let recorder = Arc::new(Recorder::default());
        broker.push_raw("wb_stocks_queue", br#"{"type":"reticulate_splines"}"#, None);

        let report = worker(&broker, &recorder)
            .run("wb_stocks_queue", Some(1))
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert!(!report.results[0].success);
        assert_eq!(
            report.results[0].error.as_deref(),
            Some("unknown message type: reticulate_splines")
        );
        assert_eq!(
            broker.settlements(),
            vec![("wb_stocks_queue".to_string(), Settlement::Requeue)]
        );
        assert_eq!(broker.depth("wb_stocks_queue"), 1);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_dead_lettered_immediately() {
        let broker = Arc::new(MemoryBroker::new(5));
        let recorder = Arc::new(Recorder::default());
        broker.push_raw("wb_products_queue", b"not json at all", None);
        broker.push_raw(
            "wb_products_queue",
            br#"{"type":"send_products","main_id":"oops"}"#,
            None,
        );

        let report = worker(&broker, &recorder)
            .run("wb_products_queue", None)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.results[0].task_type, None);
        assert_eq!(report.results[1].task_type.as_deref(), Some("send_products"));
        assert!(broker
            .settlements()
            .iter()
            .all(|(_, s)| matches!(s, Settlement::DeadLetter { .. })));
        assert_eq!(broker.depth("wb_dead_letter_queue"), 2);
        assert_eq!(broker.depth("wb_products_queue"), 0);
    }

    #[tokio::test]
    async fn test_failing_collaborator_is_bounded_by_max_attempts() {
        let broker = Arc::new(MemoryBroker::new(3));
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_with.lock().unwrap() = Some("site is down".into());
        TaskPublisher::new(broker.clone())
            .publish_stocks_task(vec!["A".into()])
            .await;

        let worker = worker(&broker, &recorder);
        for _ in 0..3 {
            let report = worker.run("wb_stocks_queue", Some(1)).await.unwrap();
            assert_eq!(report.processed, 1);
            assert!(report.results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("site is down"));
        }

        assert_eq!(recorder.calls().len(), 3);
        assert_eq!(broker.depth("wb_stocks_queue"), 0);
        assert_eq!(broker.depth("wb_dead_letter_queue"), 1);
    }

    #[tokio::test]
    async fn test_failed_import_outcome_is_a_dispatch_failure() {
        let broker = Arc::new(MemoryBroker::new(5));
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_with.lock().unwrap() = Some("timeout".into());
        TaskPublisher::new(broker.clone())
            .publish_import_task(Some(20), ImportMethod::Single)
            .await;

        let report = worker(&broker, &recorder)
            .run("wb_products_queue", Some(1))
            .await
            .unwrap();

        assert_eq!(recorder.calls(), vec![Call::Import(20, ImportMethod::Single)]);
        assert_eq!(report.results[0].error.as_deref(), Some("Import failed: timeout"));
        assert_eq!(
            broker.settlements(),
            vec![("wb_products_queue".to_string(), Settlement::Requeue)]
        );
    }

    #[tokio::test]
    async fn test_broker_failure_propagates() {
        let broker = Arc::new(MemoryBroker::new(5));
        broker
            .fail_consume
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let recorder = Arc::new(Recorder::default());

        let err = worker(&broker, &recorder).run_all(Some(10)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
    }
}
