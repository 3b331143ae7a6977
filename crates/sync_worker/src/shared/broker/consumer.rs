use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::{BrokerError, DeliveryHandler, HandlerOutcome, InboundMessage, Inbox, Settlement};

/// Сколько ключей сообщений помним, прежде чем сбросить счётчики целиком
const TRACKER_CAPACITY: usize = 10_000;

/// Счётчик неудачных попыток по сообщению. Живёт столько же, сколько менеджер
/// топологии, поэтому переживает отдельные запуски consume.
#[derive(Debug)]
pub struct RedeliveryTracker {
    max_attempts: u32,
    attempts: HashMap<String, u32>,
}

impl RedeliveryTracker {
    /// `max_attempts = 0`: без ограничения, сообщение возвращается в очередь всегда
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: HashMap::new(),
        }
    }

    /// Ключ сообщения: AMQP message_id, иначе SHA-256 тела
    pub fn key(message: &InboundMessage) -> String {
        match &message.message_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let digest = Sha256::digest(&message.body);
                digest.iter().map(|b| format!("{:02x}", b)).collect()
            }
        }
    }

    /// Учитывает неудачу; `true`, если попытки исчерпаны
    pub fn record_failure(&mut self, key: &str) -> bool {
        if self.max_attempts == 0 {
            return false;
        }
        if self.attempts.len() >= TRACKER_CAPACITY && !self.attempts.contains_key(key) {
            tracing::warn!(
                "Redelivery tracker reached {} entries, resetting counters",
                TRACKER_CAPACITY
            );
            self.attempts.clear();
        }

        let attempts = self.attempts.entry(key.to_string()).or_insert(0);
        *attempts += 1;
        if *attempts >= self.max_attempts {
            self.attempts.remove(key);
            true
        } else {
            false
        }
    }

    pub fn forget(&mut self, key: &str) {
        self.attempts.remove(key);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }
}

/// Цикл приёма: одна доставка за раз, ровно один терминальный исход на каждую.
/// По достижении `max_messages` consumer сразу отменяется; отмена выполняется и
/// при любом другом выходе из цикла.
pub async fn drive_consumer<I, H>(
    inbox: &mut I,
    handler: &mut H,
    tracker: &mut RedeliveryTracker,
    max_messages: Option<usize>,
) -> Result<usize, BrokerError>
where
    I: Inbox + ?Sized,
    H: DeliveryHandler + ?Sized,
{
    let mut settled = 0usize;

    let result = loop {
        if max_messages.is_some_and(|max| settled >= max) {
            tracing::debug!("Message budget reached on {}, cancelling consumer", inbox.queue());
            break Ok(());
        }

        let message = match inbox.next().await {
            Ok(Some(message)) => message,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let key = RedeliveryTracker::key(&message);
        let settlement = match handler.handle(&message).await {
            HandlerOutcome::Success => {
                tracker.forget(&key);
                Settlement::Ack
            }
            HandlerOutcome::Failure {
                error,
                permanent: true,
            } => {
                tracker.forget(&key);
                Settlement::DeadLetter { reason: error }
            }
            HandlerOutcome::Failure { error, .. } => {
                if tracker.record_failure(&key) {
                    Settlement::DeadLetter {
                        reason: format!("attempts exhausted: {}", error),
                    }
                } else {
                    Settlement::Requeue
                }
            }
        };

        if let Err(e) = inbox.settle(&message, settlement).await {
            break Err(e);
        }
        settled += 1;
    };

    if let Err(e) = inbox.cancel().await {
        tracing::warn!("Failed to cancel consumer on {}: {}", inbox.queue(), e);
    }

    result.map(|_| settled)
}
