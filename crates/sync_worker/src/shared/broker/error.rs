use thiserror::Error;

/// Ошибки брокера выше границы сообщения: соединение, канал, декларация топологии
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("RabbitMQ connection failed: {0}")]
    Connection(#[source] lapin::Error),

    #[error("Failed to declare {name}: {source}")]
    Declare {
        name: String,
        #[source]
        source: lapin::Error,
    },

    #[error("RabbitMQ channel error: {0}")]
    Channel(#[source] lapin::Error),

    #[error("Consuming from {queue} failed: {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("Failed to settle delivery {delivery_tag}: {source}")]
    Settle {
        delivery_tag: u64,
        #[source]
        source: lapin::Error,
    },

    #[error("Publish to {routing_key} failed: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("RabbitMQ connection is closed")]
    Closed,
}
