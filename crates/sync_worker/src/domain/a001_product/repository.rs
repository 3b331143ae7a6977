use anyhow::Result;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Товар локального каталога; естественный ключ nm_id Wildberries
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(nullable)]
    pub main_id: Option<String>,
    #[sea_orm(nullable)]
    pub vendor_code: Option<String>,
    /// Нормализованные характеристики для сайта; импорт из WB их не трогает
    #[sea_orm(nullable, column_type = "Text")]
    pub specifications: Option<String>,
    /// Полная карточка WB в JSON
    #[sea_orm(column_type = "Text")]
    pub specifications_wb: String,
    #[sea_orm(unique)]
    pub nm_id: i64,
    #[sea_orm(nullable)]
    pub imt_id: Option<i64>,
    #[sea_orm(nullable)]
    pub chrt_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Данные карточки для upsert
#[derive(Debug, Clone, PartialEq)]
pub struct ProductEntry {
    pub nm_id: i64,
    pub main_id: Option<String>,
    pub vendor_code: Option<String>,
    pub imt_id: Option<i64>,
    pub chrt_id: Option<i64>,
    pub specifications_wb: String,
}

/// Какие из nm_id уже есть в таблице (одним запросом на страницу)
pub async fn find_existing_nm_ids(db: &DatabaseConnection, nm_ids: &[i64]) -> Result<HashSet<i64>> {
    if nm_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let existing: Vec<i64> = Entity::find()
        .select_only()
        .column(Column::NmId)
        .filter(Column::NmId.is_in(nm_ids.iter().copied()))
        .into_tuple()
        .all(db)
        .await?;

    Ok(existing.into_iter().collect())
}

pub async fn exists(db: &DatabaseConnection, nm_id: i64) -> Result<bool> {
    let count = Entity::find()
        .filter(Column::NmId.eq(nm_id))
        .count(db)
        .await?;
    Ok(count > 0)
}

/// INSERT ... ON CONFLICT(nm_id) DO UPDATE: повторный импорт той же карточки сходится к одной строке
pub async fn upsert(db: &DatabaseConnection, entry: &ProductEntry) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let model = ActiveModel {
        main_id: Set(entry.main_id.clone()),
        vendor_code: Set(entry.vendor_code.clone()),
        specifications: Set(None),
        specifications_wb: Set(entry.specifications_wb.clone()),
        nm_id: Set(entry.nm_id),
        imt_id: Set(entry.imt_id),
        chrt_id: Set(entry.chrt_id),
        created_at: Set(now.clone()),
        updated_at: Set(now),
        ..Default::default()
    };

    Entity::insert(model)
        .on_conflict(
            OnConflict::column(Column::NmId)
                .update_columns([
                    Column::MainId,
                    Column::VendorCode,
                    Column::SpecificationsWb,
                    Column::ImtId,
                    Column::ChrtId,
                    Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Ok(())
}

pub async fn get_by_nm_id(db: &DatabaseConnection, nm_id: i64) -> Result<Option<Model>> {
    Ok(Entity::find()
        .filter(Column::NmId.eq(nm_id))
        .one(db)
        .await?)
}

pub async fn count(db: &DatabaseConnection) -> Result<u64> {
    Ok(Entity::find().count(db).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::connect_in_memory;

    fn entry(nm_id: i64, vendor_code: &str) -> ProductEntry {
        ProductEntry {
            nm_id,
            main_id: Some("42".into()),
            vendor_code: Some(vendor_code.into()),
            imt_id: Some(42),
            chrt_id: None,
            specifications_wb: format!(r#"{{"nmID":{}}}"#, nm_id),
        }
    }

    #[tokio::test]
    async fn test_upsert_converges_on_nm_id() {
        let db = connect_in_memory().await;

        upsert(&db, &entry(100, "A-1")).await.unwrap();
        let first = get_by_nm_id(&db, 100).await.unwrap().unwrap();

        upsert(&db, &entry(100, "A-2")).await.unwrap();
        let second = get_by_nm_id(&db, 100).await.unwrap().unwrap();

        assert_eq!(count(&db).await.unwrap(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.vendor_code.as_deref(), Some("A-2"));
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_upsert_keeps_site_specifications() {
        let db = connect_in_memory().await;
        upsert(&db, &entry(7, "B")).await.unwrap();

        let row = get_by_nm_id(&db, 7).await.unwrap().unwrap();
        let mut active: ActiveModel = row.into();
        active.specifications = Set(Some("site blob".into()));
        active.update(&db).await.unwrap();

        upsert(&db, &entry(7, "B")).await.unwrap();
        let row = get_by_nm_id(&db, 7).await.unwrap().unwrap();
        assert_eq!(row.specifications.as_deref(), Some("site blob"));
    }

    #[tokio::test]
    async fn test_find_existing_nm_ids() {
        let db = connect_in_memory().await;
        upsert(&db, &entry(1, "a")).await.unwrap();
        upsert(&db, &entry(3, "c")).await.unwrap();

        let existing = find_existing_nm_ids(&db, &[1, 2, 3]).await.unwrap();
        assert_eq!(existing, HashSet::from([1, 3]));
        assert!(find_existing_nm_ids(&db, &[]).await.unwrap().is_empty());
        assert!(exists(&db, 3).await.unwrap());
        assert!(!exists(&db, 2).await.unwrap());
    }
}
