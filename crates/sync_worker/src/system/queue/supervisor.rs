use contracts::system::queue::RoutingKey;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, info, warn};

use super::worker::WorkerDispatch;
use crate::shared::broker::BrokerError;
use crate::shared::config::WorkerConfig;

/// Какие очереди обслуживает непрерывный воркер
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeScope {
    All,
    Queue(RoutingKey),
}

/// Непрерывный режим: подключение → обход очередей → пауза → переподключение при сбое.
/// Сигнал остановки проверяется между итерациями и во время пауз; начатое сообщение
/// всегда дорабатывается до конца.
pub struct Supervisor {
    config: WorkerConfig,
    scope: ServeScope,
}

impl Supervisor {
    pub fn new(config: WorkerConfig, scope: ServeScope) -> Self {
        Self { config, scope }
    }

    /// Возвращает число выполненных итераций
    pub async fn run<C, Fut, S>(&self, connect: C, shutdown: S) -> usize
    where
        C: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<WorkerDispatch>>,
        S: Future<Output = ()>,
    {
        info!(
            "Worker started ({:?}, up to {} messages per queue)",
            self.scope, self.config.max_messages_per_run
        );
        let idle_backoff = Duration::from_secs(self.config.idle_backoff_secs);
        let error_backoff = Duration::from_secs(self.config.error_backoff_secs);

        tokio::pin!(shutdown);
        let mut session: Option<WorkerDispatch> = None;
        let mut iterations = 0usize;

        loop {
            if (&mut shutdown).now_or_never().is_some() {
                break;
            }

            let worker = match session.take() {
                Some(worker) => worker,
                None => match connect().await {
                    Ok(worker) => worker,
                    Err(e) => {
                        error!("Worker failed to connect: {:#}", e);
                        if backoff(error_backoff, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            iterations += 1;
            match self.iterate(&worker).await {
                Ok(0) => {
                    info!("No messages processed, sleeping for {:?}", idle_backoff);
                    session = Some(worker);
                    if backoff(idle_backoff, &mut shutdown).await {
                        break;
                    }
                }
                Ok(processed) => {
                    info!("Iteration {}: processed {} messages", iterations, processed);
                    session = Some(worker);
                }
                Err(e) => {
                    error!("Worker error: {}", e);
                    warn!("Reconnecting in {:?}", error_backoff);
                    worker.close().await;
                    if backoff(error_backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        if let Some(worker) = session {
            worker.close().await;
        }
        info!("Worker stopped after {} iterations", iterations);
        iterations
    }

    async fn iterate(&self, worker: &WorkerDispatch) -> Result<usize, BrokerError> {
        let max = Some(self.config.max_messages_per_run);
        match self.scope {
            ServeScope::All => Ok(worker.run_all(max).await?.total_processed()),
            ServeScope::Queue(key) => Ok(worker.run(key.queue_name(), max).await?.processed),
        }
    }
}

/// Пауза, прерываемая сигналом остановки; `true`, если пришёл сигнал
async fn backoff<S>(delay: Duration, shutdown: &mut Pin<&mut S>) -> bool
where
    S: Future<Output = ()>,
{
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown => true,
    }
}
