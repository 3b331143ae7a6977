//! In-memory брокер для тестов: очереди в VecDeque, все исходы доставок записываются.

use async_trait::async_trait;
use contracts::system::queue::RoutingKey;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    drive_consumer, BrokerError, DeliveryHandler, InboundMessage, Inbox, MessagePublisher,
    MessageQueue, RedeliveryTracker, Settlement,
};

pub struct MemoryInbox {
    queue: String,
    pending: VecDeque<InboundMessage>,
    pub settlements: Vec<(InboundMessage, Settlement)>,
    pub cancelled: usize,
    /// Requeue кладёт сообщение обратно в конец этой же очереди
    pub requeue_to_back: bool,
    /// После стольких выданных сообщений `next` возвращает ошибку соединения
    pub fail_after: Option<usize>,
    delivered: usize,
}

impl MemoryInbox {
    pub fn new(queue: &str, messages: impl IntoIterator<Item = InboundMessage>) -> Self {
        Self {
            queue: queue.to_string(),
            pending: messages.into_iter().collect(),
            settlements: Vec::new(),
            cancelled: 0,
            requeue_to_back: false,
            fail_after: None,
            delivered: 0,
        }
    }

    pub fn into_pending(self) -> VecDeque<InboundMessage> {
        self.pending
    }
}

#[async_trait]
impl Inbox for MemoryInbox {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next(&mut self) -> Result<Option<InboundMessage>, BrokerError> {
        if self.fail_after.is_some_and(|limit| self.delivered >= limit) {
            return Err(BrokerError::Closed);
        }
        let message = self.pending.pop_front();
        if message.is_some() {
            self.delivered += 1;
        }
        Ok(message)
    }

    async fn settle(
        &mut self,
        message: &InboundMessage,
        settlement: Settlement,
    ) -> Result<(), BrokerError> {
        if settlement == Settlement::Requeue && self.requeue_to_back {
            self.pending.push_back(message.clone());
        }
        self.settlements.push((message.clone(), settlement));
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), BrokerError> {
        self.cancelled += 1;
        Ok(())
    }
}

/// Брокер целиком: publish кладёт в очередь по ключу, consume гоняет настоящий drive_consumer
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<InboundMessage>>>,
    published: Mutex<Vec<(RoutingKey, Value)>>,
    settlements: Mutex<Vec<(String, Settlement)>>,
    tracker: tokio::sync::Mutex<RedeliveryTracker>,
    next_tag: AtomicU64,
    pub consume_calls: AtomicUsize,
    pub fail_consume: AtomicBool,
    pub fail_publish: AtomicBool,
    pub closed: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            settlements: Mutex::new(Vec::new()),
            tracker: tokio::sync::Mutex::new(RedeliveryTracker::new(max_attempts)),
            next_tag: AtomicU64::new(1),
            consume_calls: AtomicUsize::new(0),
            fail_consume: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            closed: AtomicUsize::new(0),
        }
    }

    /// Положить сырое тело напрямую в очередь
    pub fn push_raw(&self, queue: &str, body: &[u8], message_id: Option<&str>) {
        let message = InboundMessage {
            delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
            body: body.to_vec(),
            message_id: message_id.map(str::to_string),
        };
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn published(&self) -> Vec<(RoutingKey, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn settlements(&self) -> Vec<(String, Settlement)> {
        self.settlements.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageQueue for MemoryBroker {
    async fn consume(
        &self,
        queue: &str,
        handler: &mut dyn DeliveryHandler,
        max_messages: Option<usize>,
    ) -> Result<usize, BrokerError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_consume.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let pending = self
            .queues
            .lock()
            .unwrap()
            .remove(queue)
            .unwrap_or_default();
        let mut inbox = MemoryInbox::new(queue, pending);

        let mut tracker = self.tracker.lock().await;
        let result = drive_consumer(&mut inbox, handler, &mut tracker, max_messages).await;

        let settlements = std::mem::take(&mut inbox.settlements);
        let mut remaining = inbox.into_pending();
        for (message, settlement) in settlements {
            match &settlement {
                Settlement::Requeue => remaining.push_back(message),
                Settlement::DeadLetter { .. } => self.push_raw(
                    RoutingKey::DeadLetter.queue_name(),
                    &message.body,
                    message.message_id.as_deref(),
                ),
                Settlement::Ack => {}
            }
            self.settlements
                .lock()
                .unwrap()
                .push((queue.to_string(), settlement));
        }
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .extend(remaining);

        result
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish(&self, routing_key: RoutingKey, body: &Value) -> bool {
        if self.fail_publish.load(Ordering::SeqCst) {
            return false;
        }
        let message_id = body.get("message_id").and_then(Value::as_str);
        self.push_raw(
            routing_key.queue_name(),
            body.to_string().as_bytes(),
            message_id,
        );
        self.published
            .lock()
            .unwrap()
            .push((routing_key, body.clone()));
        true
    }
}
