use serde::{Deserialize, Serialize};
use std::fmt;

/// Direct-обменник, через который публикуются все задачи
pub const EXCHANGE: &str = "wb_api_exchange";

/// Ключ маршрутизации. Каждому ключу соответствует ровно одна очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKey {
    Products,
    Stocks,
    Orders,
    /// Сообщения, которые не удалось обработать за отведённое число попыток
    DeadLetter,
}

impl RoutingKey {
    /// Рабочие очереди в порядке обхода при sweep
    pub const WORK: [RoutingKey; 3] = [RoutingKey::Products, RoutingKey::Stocks, RoutingKey::Orders];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::Products => "products",
            RoutingKey::Stocks => "stocks",
            RoutingKey::Orders => "orders",
            RoutingKey::DeadLetter => "dead_letter",
        }
    }

    pub fn queue_name(&self) -> &'static str {
        match self {
            RoutingKey::Products => "wb_products_queue",
            RoutingKey::Stocks => "wb_stocks_queue",
            RoutingKey::Orders => "wb_orders_queue",
            RoutingKey::DeadLetter => "wb_dead_letter_queue",
        }
    }

    /// Accepts both the routing key (`products`) and the queue name (`wb_products_queue`).
    pub fn parse(value: &str) -> Option<Self> {
        [
            RoutingKey::Products,
            RoutingKey::Stocks,
            RoutingKey::Orders,
            RoutingKey::DeadLetter,
        ]
        .into_iter()
        .find(|key| key.as_str() == value || key.queue_name() == value)
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Привязка очереди к обменнику
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    pub exchange: &'static str,
    pub queue: &'static str,
    pub routing_key: RoutingKey,
    pub durable: bool,
}

impl QueueBinding {
    pub const fn new(routing_key: RoutingKey, queue: &'static str) -> Self {
        Self {
            exchange: EXCHANGE,
            queue,
            routing_key,
            durable: true,
        }
    }

    /// Три рабочие привязки: products / stocks / orders
    pub fn work_queues() -> [QueueBinding; 3] {
        RoutingKey::WORK.map(|key| QueueBinding::new(key, key.queue_name()))
    }

    pub fn dead_letter() -> QueueBinding {
        QueueBinding::new(RoutingKey::DeadLetter, RoutingKey::DeadLetter.queue_name())
    }
}
