use anyhow::Result;
use serde_json::Value;

use crate::domain::a001_product::repository::ProductEntry;

/// Подготовить карточку WB к записи в products.
/// Ошибка только если у карточки нет корректного nmID.
pub fn prepare(card: &Value) -> Result<ProductEntry> {
    let nm_id = card
        .get("nmID")
        .and_then(as_i64)
        .filter(|id| *id != 0)
        .ok_or_else(|| anyhow::anyhow!("Card has no valid nmID"))?;

    let imt_id = card.get("imtID").and_then(as_i64);

    // mainId: id карточки, иначе imtID
    let main_id = card
        .get("id")
        .and_then(as_text)
        .or_else(|| imt_id.map(|id| id.to_string()));

    let chrt_id = card
        .get("chrtID")
        .and_then(as_i64)
        .or_else(|| card.pointer("/variations/0/chrtID").and_then(as_i64))
        .or_else(|| card.pointer("/sizes/0/chrtID").and_then(as_i64));

    let vendor_code = card
        .get("vendorCode")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string);

    Ok(ProductEntry {
        nm_id,
        main_id,
        vendor_code,
        imt_id,
        chrt_id,
        specifications_wb: card.to_string(),
    })
}

/// Число или строка с числом
fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
