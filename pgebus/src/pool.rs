use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::types::time::OffsetDateTime;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::EventSystemConfig;
use crate::queue::HandOffQueue;
use crate::repository::EventRepository;
use crate::router::EventRouter;
use crate::worker::Worker;

/// Owns the fixed pool of worker tasks plus the background stuck-row reaper.
pub struct WorkerPool {
    pool: PgPool,
    repo: EventRepository,
    queue: Arc<HandOffQueue>,
    config: EventSystemConfig,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(pool: PgPool, repo: EventRepository, queue: Arc<HandOffQueue>, config: EventSystemConfig) -> Self {
        Self {
            pool,
            repo,
            queue,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            reaper: None,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.config.n_workers
    }

    /// Spawns `n_workers` tasks plus one background reaper that periodically resets
    /// rows left `Running` by a crashed worker.
    pub fn start(&mut self, router: Arc<EventRouter>) {
        self.shutdown.store(false, Ordering::SeqCst);

        for id in 0..self.config.n_workers {
            let worker = Worker::new(
                id,
                self.pool.clone(),
                self.repo.clone(),
                router.clone(),
                self.queue.clone(),
                self.config.poll_interval,
                self.config.max_retries,
                self.shutdown.clone(),
            );
            self.handles.push(tokio::spawn(worker.run()));
        }

        self.reaper = Some(tokio::spawn(reap_loop(
            self.pool.clone(),
            self.repo.clone(),
            self.shutdown.clone(),
            self.config.running_grace_period,
            self.config.stuck_reap_interval,
        )));

        info!(n_workers = self.config.n_workers, "worker pool started");
    }

    /// Signals every worker to stop taking new work, optionally waits up to
    /// `shutdown_wait_timeout` for in-flight work to finish, then joins all tasks.
    pub async fn stop(&mut self, wait_for_completion: bool, timeout: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.close();

        if wait_for_completion {
            self.queue.wait_until_empty(timeout).await;
        }

        for handle in self.handles.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }

        debug!("worker pool stopped");
    }
}

async fn reap_loop(
    pool: PgPool,
    repo: EventRepository,
    shutdown: Arc<AtomicBool>,
    grace_period: Duration,
    interval: Duration,
) {
    let older_than = time::Duration::try_from(grace_period).unwrap_or(time::Duration::minutes(5));
    loop {
        tokio::time::sleep(interval).await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match repo.reap_stuck_running(&pool, older_than, OffsetDateTime::now_utc()).await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "reaped stuck running events"),
            Err(e) => error!(error = %e, "stuck-row reap failed"),
        }
    }
}
