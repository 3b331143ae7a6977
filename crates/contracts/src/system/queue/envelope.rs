use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use super::binding::RoutingKey;
use crate::usecases::u504_import_from_wildberries::ImportMethod;

/// Вид задачи (значение поля `type` в теле сообщения)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SendProducts,
    SendStocks,
    SendOrders,
    ImportProducts,
    UpdateStocks,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::SendProducts,
        TaskKind::SendStocks,
        TaskKind::SendOrders,
        TaskKind::ImportProducts,
        TaskKind::UpdateStocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SendProducts => "send_products",
            TaskKind::SendStocks => "send_stocks",
            TaskKind::SendOrders => "send_orders",
            TaskKind::ImportProducts => "import_products",
            TaskKind::UpdateStocks => "update_stocks",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Очередь, в которую публикуется задача данного вида
    pub fn routing_key(&self) -> RoutingKey {
        match self {
            TaskKind::SendProducts | TaskKind::ImportProducts => RoutingKey::Products,
            TaskKind::SendStocks | TaskKind::UpdateStocks => RoutingKey::Stocks,
            TaskKind::SendOrders => RoutingKey::Orders,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Задача с полями, необходимыми для её выполнения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Отправить товары на сайт по списку main_id (коды карточек, числа приводятся к строке)
    SendProducts {
        #[serde(default, deserialize_with = "string_or_number_list")]
        main_id: Vec<String>,
        #[serde(default)]
        vendor: Option<String>,
    },

    /// Отправить остатки по артикулам
    SendStocks {
        #[serde(default)]
        vendor_codes: Vec<String>,
    },

    /// Получить заказы маркетплейса начиная с даты
    SendOrders {
        #[serde(default)]
        date_from: Option<NaiveDate>,
        #[serde(default)]
        flag: i32,
    },

    /// Импорт карточек товаров из Wildberries
    ImportProducts {
        #[serde(default)]
        batch_size: Option<u32>,
        #[serde(default)]
        method: ImportMethod,
    },

    /// Обновить остатки из Wildberries
    UpdateStocks,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::SendProducts { .. } => TaskKind::SendProducts,
            Task::SendStocks { .. } => TaskKind::SendStocks,
            Task::SendOrders { .. } => TaskKind::SendOrders,
            Task::ImportProducts { .. } => TaskKind::ImportProducts,
            Task::UpdateStocks => TaskKind::UpdateStocks,
        }
    }
}

/// Конверт задачи: плоский JSON-объект `{type, ...поля задачи, created_at}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(flatten)]
    pub task: Task,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// RFC 3339 или `Y-m-d H:i:s`; нечитаемое значение заменяется текущим временем
    #[serde(default = "chrono::Utc::now", deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
}

const LEGACY_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn string_or_number_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<Value>::deserialize(deserializer)?
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(de::Error::custom(format!(
                "expected string or number in main_id, got {}",
                other
            ))),
        })
        .collect()
}

impl TaskEnvelope {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            message_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind()
    }

    /// Decodes a message body in three steps: JSON object with a string `type`,
    /// known `type`, fields matching that type. Each step has its own error.
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EnvelopeError::Malformed("missing string field `type`".to_string()))?;

        let kind =
            TaskKind::parse(tag).ok_or_else(|| EnvelopeError::UnknownType(tag.to_string()))?;

        serde_json::from_value(value).map_err(|e| EnvelopeError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }
}

/// Ошибки разбора конверта
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("Malformed message body: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: TaskKind, reason: String },
}

impl EnvelopeError {
    /// A permanent error will fail identically on every redelivery.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, EnvelopeError::UnknownType(_))
    }

    /// Значение `type`, если его удалось прочитать
    pub fn task_type(&self) -> Option<String> {
        match self {
            EnvelopeError::Malformed(_) => None,
            EnvelopeError::UnknownType(tag) => Some(tag.clone()),
            EnvelopeError::InvalidPayload { kind, .. } => Some(kind.as_str().to_string()),
        }
    }
}
