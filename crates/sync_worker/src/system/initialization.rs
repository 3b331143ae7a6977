use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

use crate::shared::broker::TopologyManager;
use crate::shared::config::Config;
use crate::shared::data::db;
use crate::shared::settings::{self, WbSettings};
use crate::system::queue::{Collaborators, TaskDispatcher, TaskPublisher, WorkerDispatch};
use crate::usecases::u504_import_from_wildberries::{ImportExecutor, WildberriesApiClient};
use crate::usecases::u505_send_to_site::SiteApiClient;

/// Явные зависимости процесса: конфигурация, база, активные настройки Wildberries
pub struct AppContext {
    pub config: Config,
    pub db: DatabaseConnection,
    pub settings: WbSettings,
}

impl AppContext {
    /// Подключение к базе, создание схемы, загрузка активной записи wb_settings.
    /// Отсутствие настроек или токена фатально.
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let db = db::connect(&config.database.url).await?;
        db::ensure_schema(&db).await?;

        let settings = settings::load_active(&db).await?;
        tracing::info!(
            "Using Wildberries settings '{}' (broker {})",
            settings.name,
            settings.broker.display_uri()
        );

        Ok(Self {
            config,
            db,
            settings,
        })
    }

    pub fn wildberries_client(&self) -> anyhow::Result<Arc<WildberriesApiClient>> {
        let client = WildberriesApiClient::new(&self.settings)?
            .with_filter(self.config.import.filter.clone());
        Ok(Arc::new(client))
    }

    pub fn importer(&self, client: Arc<WildberriesApiClient>) -> ImportExecutor {
        ImportExecutor::new(self.db.clone(), client, self.config.import.pacing.clone())
    }

    /// Исполнители задач воркера
    pub fn collaborators(&self) -> anyhow::Result<Collaborators> {
        let client = self.wildberries_client()?;
        let site = Arc::new(SiteApiClient::new(&self.settings)?);

        Ok(Collaborators {
            outbound: site,
            orders: client.clone(),
            stocks: client.clone(),
            importer: Arc::new(self.importer(client)),
        })
    }

    /// Новое соединение с брокером; топология объявляется при подключении
    pub async fn connect_broker(&self) -> anyhow::Result<Arc<TopologyManager>> {
        let manager = TopologyManager::connect(&self.settings.broker, &self.config.broker).await?;
        Ok(Arc::new(manager))
    }

    pub async fn publisher(&self) -> anyhow::Result<(TaskPublisher, Arc<TopologyManager>)> {
        let manager = self.connect_broker().await?;
        Ok((TaskPublisher::new(manager.clone()), manager))
    }

    /// Воркер на свежем соединении
    pub async fn worker(&self) -> anyhow::Result<WorkerDispatch> {
        let manager = self.connect_broker().await?;
        let dispatcher = TaskDispatcher::new(self.collaborators()?, self.config.import.batch_size);

        Ok(WorkerDispatch::new(
            manager,
            dispatcher,
            Duration::from_millis(self.config.worker.inter_queue_pause_ms),
        ))
    }
}
