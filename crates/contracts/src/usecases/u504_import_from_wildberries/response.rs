use serde::{Deserialize, Serialize};

use super::request::ImportMethod;

/// Итог импорта карточек
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub imported: u64,
    pub updated: u64,
    pub errors: u64,
    /// imported + updated
    pub total: u64,
    pub method: ImportMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportOutcome {
    pub fn completed(method: ImportMethod, imported: u64, updated: u64, errors: u64) -> Self {
        Self {
            success: true,
            imported,
            updated,
            errors,
            total: imported + updated,
            method,
            error: None,
        }
    }

    pub fn aborted(
        method: ImportMethod,
        imported: u64,
        updated: u64,
        errors: u64,
        error: String,
    ) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::completed(method, imported, updated, errors)
        }
    }

    /// Человекочитаемое описание результата
    pub fn message(&self) -> String {
        match &self.error {
            None => format!(
                "Successfully imported {} new products and updated {} existing products",
                self.imported, self.updated
            ),
            Some(e) => format!("Import failed: {}", e),
        }
    }
}
