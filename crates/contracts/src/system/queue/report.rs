use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Результат обработки одного сообщения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResult {
    pub message_id: String,

    #[serde(rename = "type")]
    pub task_type: Option<String>,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub processed_at: DateTime<Utc>,
}

impl MessageResult {
    pub fn succeeded(message_id: String, task_type: Option<String>, result: Value) -> Self {
        Self {
            message_id,
            task_type,
            success: true,
            result: Some(result),
            error: None,
            processed_at: Utc::now(),
        }
    }

    pub fn failed(message_id: String, task_type: Option<String>, error: String) -> Self {
        Self {
            message_id,
            task_type,
            success: false,
            result: None,
            error: Some(error),
            processed_at: Utc::now(),
        }
    }
}

/// Итог одного прохода воркера по очереди
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub processed: usize,
    pub results: Vec<MessageResult>,
}

impl RunReport {
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Итог обхода всех рабочих очередей (ключ — имя очереди)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SweepReport {
    pub queues: BTreeMap<String, RunReport>,
}

impl SweepReport {
    pub fn total_processed(&self) -> usize {
        self.queues.values().map(|r| r.processed).sum()
    }
}
