use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::types::time::OffsetDateTime;
use sqlx::PgPool;
use tracing::info;

use crate::config::Settings;
use crate::error::SystemError;
use crate::listener::NotificationListener;
use crate::pool::WorkerPool;
use crate::queue::HandOffQueue;
use crate::repository::EventRepository;
use crate::router::EventRouter;

/// Facade tying together the pool, listener, queue and router into one
/// start/stop lifecycle.
pub struct EventSystem {
    pool: PgPool,
    repo: EventRepository,
    router: Arc<EventRouter>,
    settings: Settings,
    queue: Arc<HandOffQueue>,
    listener: Option<NotificationListener>,
    worker_pool: Option<WorkerPool>,
    started: Arc<AtomicBool>,
}

impl EventSystem {
    /// Builds a lazily-connecting pool from `settings.database` — no connection is
    /// attempted until `start()` runs. Fails only if the assembled connection URL
    /// itself is malformed.
    pub fn new(router: EventRouter, settings: Settings) -> Result<Self, SystemError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.event_system.n_workers as u32 + 2)
            .connect_lazy(&settings.database.connection_url())?;

        let repo = EventRepository::new(settings.database.schema_name.clone());
        let queue = Arc::new(HandOffQueue::new(settings.event_system.queue_maxsize));

        Ok(Self {
            pool,
            repo,
            router: Arc::new(router),
            settings,
            queue,
            listener: None,
            worker_pool: None,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Ensures the schema exists, runs migrations, opens the listener connection,
    /// performs an initial stuck-row reap, then starts the listener and worker pool.
    /// Idempotent only in the sense that a second call raises `AlreadyStarted`; it
    /// does not tear down and restart.
    pub async fn start(&mut self) -> Result<(), SystemError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SystemError::AlreadyStarted);
        }

        self.ensure_schema().await?;
        crate::migrations::run(&self.pool, &self.settings.database.schema_name).await?;

        let initial_grace =
            time::Duration::try_from(self.settings.event_system.running_grace_period)
                .unwrap_or(time::Duration::minutes(5));
        self.repo
            .reap_stuck_running(&self.pool, initial_grace, OffsetDateTime::now_utc())
            .await?;

        let mut listener = NotificationListener::new(
            self.pool.clone(),
            self.repo.clone(),
            self.queue.clone(),
            self.settings.event_system.channel.clone(),
        );
        listener.start().await.map_err(crate::error::ListenerError::Database)?;
        self.listener = Some(listener);

        let mut worker_pool = WorkerPool::new(
            self.pool.clone(),
            self.repo.clone(),
            self.queue.clone(),
            self.settings.event_system.clone(),
        );
        worker_pool.start(self.router.clone());
        self.worker_pool = Some(worker_pool);

        info!("event system started");
        Ok(())
    }

    /// Stops the listener first (no new ids enter the queue), optionally waits for
    /// in-flight and queued work to drain, then stops the worker pool. A second call
    /// on an already-stopped system is a no-op.
    pub async fn stop(&mut self) -> Result<(), SystemError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut listener) = self.listener.take() {
            listener.stop().await;
        }

        if let Some(mut worker_pool) = self.worker_pool.take() {
            worker_pool
                .stop(
                    self.settings.event_system.shutdown_wait_for_completion,
                    self.settings.event_system.shutdown_wait_timeout,
                )
                .await;
        }

        self.pool.close().await;

        info!("event system stopped");
        Ok(())
    }

    pub fn get_queue_size(&self) -> i64 {
        self.queue.qsize()
    }

    pub fn get_worker_count(&self) -> usize {
        self.settings.event_system.n_workers
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        let query = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.settings.database.schema_name
        );
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
