use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Размер страницы каталога по умолчанию
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Запрос на импорт карточек товаров из Wildberries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Количество карточек на одной странице каталога
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default)]
    pub method: ImportMethod,
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

impl Default for ImportRequest {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            method: ImportMethod::default(),
        }
    }
}

/// Способ записи страницы в базу
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMethod {
    /// Одна проверка существования на страницу, затем upsert каждой карточки
    #[default]
    Batch,

    /// Проверка и upsert по одной карточке
    Single,
}

impl ImportMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMethod::Batch => "batch",
            ImportMethod::Single => "single",
        }
    }
}

impl fmt::Display for ImportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(ImportMethod::Batch),
            "single" => Ok(ImportMethod::Single),
            other => Err(format!("unknown import method: {}", other)),
        }
    }
}
