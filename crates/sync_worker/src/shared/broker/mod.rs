pub mod consumer;
pub mod error;
#[cfg(test)]
pub mod memory;
pub mod topology;

pub use consumer::{drive_consumer, RedeliveryTracker};
pub use error::BrokerError;
pub use topology::TopologyManager;

use async_trait::async_trait;
use contracts::system::queue::RoutingKey;
use serde_json::Value;

/// Одно полученное из очереди сообщение
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// AMQP-свойство message_id, если продюсер его поставил
    pub message_id: Option<String>,
}

/// Терминальный исход доставки; ровно один на сообщение
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Ack,
    Requeue,
    /// Переопубликовать в wb_dead_letter_queue и подтвердить оригинал
    DeadLetter { reason: String },
}

/// Результат обработчика; ошибка ниже границы сообщения становится значением
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Success,
    Failure { error: String, permanent: bool },
}

impl HandlerOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            error: error.into(),
            permanent: false,
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            error: error.into(),
            permanent: true,
        }
    }
}

#[async_trait]
pub trait DeliveryHandler: Send {
    async fn handle(&mut self, message: &InboundMessage) -> HandlerOutcome;
}

/// Источник доставок одного consumer'а
#[async_trait]
pub trait Inbox: Send {
    fn queue(&self) -> &str;

    /// `None` — consumer больше не активен (отменён брокером или истёк idle timeout)
    async fn next(&mut self) -> Result<Option<InboundMessage>, BrokerError>;

    async fn settle(
        &mut self,
        message: &InboundMessage,
        settlement: Settlement,
    ) -> Result<(), BrokerError>;

    async fn cancel(&mut self) -> Result<(), BrokerError>;
}

/// Потребление очереди с prefetch = 1; возвращает число терминально обработанных доставок
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn consume(
        &self,
        queue: &str,
        handler: &mut dyn DeliveryHandler,
        max_messages: Option<usize>,
    ) -> Result<usize, BrokerError>;

    /// Освободить соединение; по умолчанию ничего не делает
    async fn close(&self) {}
}

/// Публикация JSON в exchange; ошибка транспорта логируется и превращается в `false`
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, routing_key: RoutingKey, body: &Value) -> bool;
}
