use async_trait::async_trait;
use contracts::system::queue::{QueueBinding, RoutingKey, EXCHANGE};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    drive_consumer, BrokerError, DeliveryHandler, InboundMessage, Inbox, MessagePublisher,
    MessageQueue, RedeliveryTracker, Settlement,
};
use crate::shared::config::BrokerConfig;
use crate::shared::settings::BrokerSettings;

const PERSISTENT: u8 = 2;
const CONTENT_TYPE: &str = "application/json";

/// Владелец соединения с RabbitMQ: топология, публикация, потребление, статистика очередей
pub struct TopologyManager {
    connection: Arc<Connection>,
    channel: Channel,
    tracker: Mutex<RedeliveryTracker>,
    idle_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl TopologyManager {
    /// Подключиться и объявить exchange, три рабочие очереди и dead-letter очередь.
    /// Повторное объявление существующей топологии ничего не меняет.
    pub async fn connect(
        settings: &BrokerSettings,
        config: &BrokerConfig,
    ) -> Result<Self, BrokerError> {
        tracing::info!("Connecting to RabbitMQ at {}", settings.display_uri());

        let connection =
            Connection::connect(&settings.amqp_uri(), ConnectionProperties::default())
                .await
                .map_err(BrokerError::Connection)?;

        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::Channel)?;

        declare_topology(&channel).await?;

        tracing::info!(
            "RabbitMQ topology ready: exchange '{}', queues {:?}",
            EXCHANGE,
            QueueBinding::work_queues().map(|b| b.queue)
        );

        Ok(Self {
            connection: Arc::new(connection),
            channel,
            tracker: Mutex::new(RedeliveryTracker::new(config.max_attempts)),
            idle_timeout: config.idle_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    /// Опубликовать JSON под ключом маршрутизации. Ошибки не пробрасываются: `false` + лог.
    pub async fn publish(&self, routing_key: RoutingKey, body: &Value) -> bool {
        let message_id = body
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let payload = match serde_json::to_vec(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize message for {}: {}", routing_key, e);
                return false;
            }
        };

        match publish_persistent(&self.channel, routing_key, &payload, &message_id, None).await {
            Ok(()) => {
                tracing::debug!("Published {} to '{}'", message_id, routing_key);
                true
            }
            Err(e) => {
                tracing::error!("Failed to publish message to '{}': {}", routing_key, e);
                false
            }
        }
    }

    /// Потребление очереди с prefetch = 1 на отдельном канале
    pub async fn consume(
        &self,
        queue: &str,
        handler: &mut dyn DeliveryHandler,
        max_messages: Option<usize>,
    ) -> Result<usize, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(BrokerError::Channel)?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(BrokerError::Channel)?;

        let consumer_tag = format!("sync-worker-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Consume {
                queue: queue.to_string(),
                source,
            })?;

        tracing::info!("Consuming from '{}' (max: {:?})", queue, max_messages);

        let mut inbox = AmqpInbox {
            channel,
            consumer,
            consumer_tag,
            queue: queue.to_string(),
            idle_timeout: self.idle_timeout,
            cancelled: false,
        };

        let mut tracker = self.tracker.lock().await;
        let result = drive_consumer(&mut inbox, handler, &mut tracker, max_messages).await;

        // незавершённые prefetch-доставки вернутся в очередь при закрытии канала
        if let Err(e) = inbox.channel.close(200, "Consumer finished").await {
            tracing::debug!("Consumer channel close: {}", e);
        }

        result
    }

    /// Число сообщений в каждой рабочей очереди. Пассивное объявление на короткоживущем
    /// канале; при ошибке транспорта пустой результат.
    pub async fn queue_stats(&self) -> BTreeMap<String, u32> {
        let mut stats = BTreeMap::new();

        let channel = match self.connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!("Failed to open channel for queue stats: {}", e);
                return stats;
            }
        };

        for binding in QueueBinding::work_queues() {
            let declared = channel
                .queue_declare(
                    binding.queue,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await;
            match declared {
                Ok(queue) => {
                    stats.insert(binding.queue.to_string(), queue.message_count());
                }
                Err(e) => {
                    // после ошибки passive declare канал закрыт брокером
                    tracing::error!("Failed to get stats for '{}': {}", binding.queue, e);
                    return BTreeMap::new();
                }
            }
        }

        let _ = channel.close(200, "Stats collected").await;
        stats
    }

    /// Закрыть канал и соединение. Повторный вызов ничего не делает, ошибки только логируются.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.channel.close(200, "Bye").await {
            tracing::debug!("RabbitMQ channel close: {}", e);
        }
        if let Err(e) = self.connection.close(200, "Bye").await {
            tracing::debug!("RabbitMQ connection close: {}", e);
        }
        tracing::info!("RabbitMQ connection closed");
    }
}

impl Drop for TopologyManager {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let channel = self.channel.clone();
        let connection = Arc::clone(&self.connection);
        runtime.spawn(async move {
            let _ = channel.close(200, "Bye").await;
            let _ = connection.close(200, "Bye").await;
        });
    }
}

#[async_trait]
impl MessageQueue for TopologyManager {
    async fn consume(
        &self,
        queue: &str,
        handler: &mut dyn DeliveryHandler,
        max_messages: Option<usize>,
    ) -> Result<usize, BrokerError> {
        TopologyManager::consume(self, queue, handler, max_messages).await
    }

    async fn close(&self) {
        TopologyManager::close(self).await
    }
}

#[async_trait]
impl MessagePublisher for TopologyManager {
    async fn publish(&self, routing_key: RoutingKey, body: &Value) -> bool {
        TopologyManager::publish(self, routing_key, body).await
    }
}

async fn declare_topology(channel: &Channel) -> Result<(), BrokerError> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| BrokerError::Declare {
            name: EXCHANGE.to_string(),
            source,
        })?;

    let bindings = QueueBinding::work_queues()
        .into_iter()
        .chain(std::iter::once(QueueBinding::dead_letter()));

    for binding in bindings {
        channel
            .queue_declare(
                binding.queue,
                QueueDeclareOptions {
                    durable: binding.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Declare {
                name: binding.queue.to_string(),
                source,
            })?;

        channel
            .queue_bind(
                binding.queue,
                binding.exchange,
                binding.routing_key.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Declare {
                name: format!("{} <- {}", binding.queue, binding.routing_key),
                source,
            })?;
    }

    Ok(())
}

async fn publish_persistent(
    channel: &Channel,
    routing_key: RoutingKey,
    payload: &[u8],
    message_id: &str,
    headers: Option<FieldTable>,
) -> Result<(), BrokerError> {
    let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let properties = message_properties(message_id, timestamp, headers);

    let publish_error = |reason: String| BrokerError::Publish {
        routing_key: routing_key.to_string(),
        reason,
    };

    channel
        .basic_publish(
            EXCHANGE,
            routing_key.as_str(),
            BasicPublishOptions::default(),
            payload,
            properties,
        )
        .await
        .map_err(|e| publish_error(e.to_string()))?
        .await
        .map_err(|e| publish_error(e.to_string()))?;

    Ok(())
}

/// JSON, persistent, время отправки (unix-секунды) и message_id
fn message_properties(
    message_id: &str,
    timestamp: u64,
    headers: Option<FieldTable>,
) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_content_type(ShortString::from(CONTENT_TYPE))
        .with_delivery_mode(PERSISTENT)
        .with_timestamp(timestamp)
        .with_message_id(ShortString::from(message_id));
    match headers {
        Some(headers) => properties.with_headers(headers),
        None => properties,
    }
}

fn dead_letter_headers(reason: &str, original_queue: &str) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from("x-dead-letter-reason"),
        AMQPValue::LongString(LongString::from(reason.to_string())),
    );
    headers.insert(
        ShortString::from("x-original-queue"),
        AMQPValue::LongString(LongString::from(original_queue.to_string())),
    );
    headers
}

/// Операции канала, через которые доставка получает терминальный исход
#[async_trait]
trait DeliveryChannel: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;
    async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), BrokerError>;
    async fn republish_dead_letter(
        &self,
        message: &InboundMessage,
        headers: FieldTable,
    ) -> Result<(), BrokerError>;
}

fn settle_error(delivery_tag: u64) -> impl FnOnce(lapin::Error) -> BrokerError {
    move |source| BrokerError::Settle {
        delivery_tag,
        source,
    }
}

#[async_trait]
impl DeliveryChannel for Channel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(settle_error(delivery_tag))
    }

    async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.basic_nack(
            delivery_tag,
            BasicNackOptions {
                requeue: true,
                ..Default::default()
            },
        )
        .await
        .map_err(settle_error(delivery_tag))
    }

    async fn republish_dead_letter(
        &self,
        message: &InboundMessage,
        headers: FieldTable,
    ) -> Result<(), BrokerError> {
        let message_id = RedeliveryTracker::key(message);
        publish_persistent(
            self,
            RoutingKey::DeadLetter,
            &message.body,
            &message_id,
            Some(headers),
        )
        .await
    }
}

/// Ack / nack с возвратом / переопубликация в dead-letter и ack.
/// Если переопубликовать не удалось, доставка возвращается в очередь.
async fn settle_on<C: DeliveryChannel + ?Sized>(
    channel: &C,
    queue: &str,
    message: &InboundMessage,
    settlement: Settlement,
) -> Result<(), BrokerError> {
    let tag = message.delivery_tag;
    match settlement {
        Settlement::Ack => channel.ack(tag).await,
        Settlement::Requeue => channel.nack_requeue(tag).await,
        Settlement::DeadLetter { reason } => {
            let headers = dead_letter_headers(&reason, queue);
            match channel.republish_dead_letter(message, headers).await {
                Ok(()) => {
                    tracing::warn!(
                        "Message {} from '{}' moved to dead-letter queue: {}",
                        tag,
                        queue,
                        reason
                    );
                    channel.ack(tag).await
                }
                Err(e) => {
                    tracing::error!("Dead-letter publish failed, requeueing {}: {}", tag, e);
                    channel.nack_requeue(tag).await
                }
            }
        }
    }
}

/// Доставки одного consumer'а lapin
struct AmqpInbox {
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
    queue: String,
    idle_timeout: Option<Duration>,
    cancelled: bool,
}

#[async_trait]
impl Inbox for AmqpInbox {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next(&mut self) -> Result<Option<InboundMessage>, BrokerError> {
        let next = match self.idle_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.consumer.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!("No messages in '{}' for {:?}", self.queue, timeout);
                    return Ok(None);
                }
            },
            None => self.consumer.next().await,
        };

        match next {
            None => Ok(None),
            Some(Err(source)) => Err(BrokerError::Consume {
                queue: self.queue.clone(),
                source,
            }),
            Some(Ok(delivery)) => Ok(Some(InboundMessage {
                delivery_tag: delivery.delivery_tag,
                message_id: delivery
                    .properties
                    .message_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string()),
                body: delivery.data,
            })),
        }
    }

    async fn settle(
        &mut self,
        message: &InboundMessage,
        settlement: Settlement,
    ) -> Result<(), BrokerError> {
        settle_on(&self.channel, &self.queue, message, settlement).await
    }

    async fn cancel(&mut self) -> Result<(), BrokerError> {
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(BrokerError::Channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingChannel {
        ops: StdMutex<Vec<String>>,
        headers: StdMutex<Option<FieldTable>>,
        fail_republish: bool,
    }

    impl RecordingChannel {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
            self.ops.lock().unwrap().push(format!("ack {}", delivery_tag));
            Ok(())
        }

        async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), BrokerError> {
            self.ops.lock().unwrap().push(format!("nack {}", delivery_tag));
            Ok(())
        }

        async fn republish_dead_letter(
            &self,
            message: &InboundMessage,
            headers: FieldTable,
        ) -> Result<(), BrokerError> {
            self.ops
                .lock()
                .unwrap()
                .push(format!("republish {}", message.delivery_tag));
            *self.headers.lock().unwrap() = Some(headers);
            if self.fail_republish {
                return Err(BrokerError::Publish {
                    routing_key: "dead_letter".into(),
                    reason: "channel closed".into(),
                });
            }
            Ok(())
        }
    }

    fn message(tag: u64) -> InboundMessage {
        InboundMessage {
            delivery_tag: tag,
            body: br#"{"type":"update_stocks"}"#.to_vec(),
            message_id: None,
        }
    }

    fn header<'a>(headers: &'a FieldTable, name: &str) -> Option<&'a AMQPValue> {
        headers.inner().get(&ShortString::from(name))
    }

    #[test]
    fn test_connection_handle_moves_into_close_task() {
        fn spawnable<T: Clone + Send + Sync + 'static>() {}
        spawnable::<Arc<Connection>>();
        spawnable::<Channel>();
        fn shared<T: Send + Sync>() {}
        shared::<TopologyManager>();
    }

    #[test]
    fn test_message_properties() {
        let properties = message_properties("msg-1", 1_700_000_000, None);

        assert_eq!(
            properties.content_type().as_ref().map(ShortString::as_str),
            Some("application/json")
        );
        assert_eq!(*properties.delivery_mode(), Some(2));
        assert_eq!(*properties.timestamp(), Some(1_700_000_000));
        assert_eq!(
            properties.message_id().as_ref().map(ShortString::as_str),
            Some("msg-1")
        );
        assert!(properties.headers().is_none());
    }

    #[test]
    fn test_dead_letter_headers() {
        let headers = dead_letter_headers("attempts exhausted: boom", "wb_stocks_queue");

        assert_eq!(
            header(&headers, "x-dead-letter-reason"),
            Some(&AMQPValue::LongString(LongString::from(
                "attempts exhausted: boom".to_string()
            )))
        );
        assert_eq!(
            header(&headers, "x-original-queue"),
            Some(&AMQPValue::LongString(LongString::from(
                "wb_stocks_queue".to_string()
            )))
        );

        let properties = message_properties("msg-2", 0, Some(headers));
        assert!(properties.headers().is_some());
    }

    #[tokio::test]
    async fn test_settlement_maps_to_ack_and_nack() {
        let channel = RecordingChannel::default();

        settle_on(&channel, "wb_orders_queue", &message(1), Settlement::Ack)
            .await
            .unwrap();
        settle_on(&channel, "wb_orders_queue", &message(2), Settlement::Requeue)
            .await
            .unwrap();

        assert_eq!(channel.ops(), vec!["ack 1", "nack 2"]);
    }

    #[tokio::test]
    async fn test_dead_letter_republishes_then_acks() {
        let channel = RecordingChannel::default();

        settle_on(
            &channel,
            "wb_products_queue",
            &message(7),
            Settlement::DeadLetter {
                reason: "Malformed message body".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(channel.ops(), vec!["republish 7", "ack 7"]);
        let headers = channel.headers.lock().unwrap().clone().unwrap();
        assert_eq!(
            header(&headers, "x-original-queue"),
            Some(&AMQPValue::LongString(LongString::from(
                "wb_products_queue".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_failed_dead_letter_publish_requeues() {
        let channel = RecordingChannel {
            fail_republish: true,
            ..Default::default()
        };

        settle_on(
            &channel,
            "wb_products_queue",
            &message(9),
            Settlement::DeadLetter {
                reason: "bad".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(channel.ops(), vec!["republish 9", "nack 9"]);
    }
}
