use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};

use crate::domain::a001_product;
use crate::shared::settings;

/// Подключение к хранилищу по DSN (`sqlite://...`, `mysql://...`)
pub async fn connect(url: &str) -> anyhow::Result<DatabaseConnection> {
    if let Some(path) = sqlite_file_path(url) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let mut options = ConnectOptions::new(url.to_string());
    options.sqlx_logging(false);
    let conn = Database::connect(options).await?;
    tracing::info!("Database connected: {}", redact(url));
    Ok(conn)
}

/// Минимальный bootstrap схемы: таблицы products и wb_settings, если их ещё нет
pub async fn ensure_schema(db: &DatabaseConnection) -> anyhow::Result<()> {
    create_table_if_missing(db, a001_product::repository::Entity).await?;
    create_table_if_missing(db, settings::Entity).await?;
    Ok(())
}

async fn create_table_if_missing<E: EntityTrait>(
    db: &DatabaseConnection,
    entity: E,
) -> anyhow::Result<()> {
    let backend = db.get_database_backend();
    let mut statement = Schema::new(backend).create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

fn sqlite_file_path(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("sqlite://")?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty() && path != ":memory:").then_some(path)
}

/// Пароль из DSN в логи не попадает
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://****{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Отдельная in-memory база на каждый тест; одно соединение, иначе у каждого своя память
#[cfg(test)]
pub async fn connect_in_memory() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    ensure_schema(&db).await.unwrap();
    db
}
