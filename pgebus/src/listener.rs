use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::types::time::OffsetDateTime;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::HandOffQueue;
use crate::repository::EventRepository;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Owns a dedicated database connection (never drawn from a pool — pooled connections
/// cannot reliably receive asynchronous server messages) and converts `NOTIFY` payloads
/// into ids on the hand-off queue.
pub struct NotificationListener {
    pool: PgPool,
    repo: EventRepository,
    queue: Arc<HandOffQueue>,
    channel: String,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl NotificationListener {
    pub fn new(pool: PgPool, repo: EventRepository, queue: Arc<HandOffQueue>, channel: String) -> Self {
        Self {
            pool,
            repo,
            queue,
            channel,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Opens the dedicated connection, issues `LISTEN`, back-fills due pending rows,
    /// then spawns the receive loop. Connection failures here propagate to the caller:
    /// once the receive loop is running, transient disconnects are handled internally
    /// by the reconnect-with-backoff path below, but a failure to ever get the first
    /// connection up is a misconfiguration the caller needs to know about.
    pub async fn start(&mut self) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;

        self.back_fill(&self.pool).await;

        let repo = self.repo.clone();
        let queue = self.queue.clone();
        let channel = self.channel.clone();
        let pool = self.pool.clone();
        let stopped = self.stopped.clone();
        let stop_notify = self.stop_notify.clone();

        self.task = Some(tokio::spawn(async move {
            receive_loop(listener, pool, repo, queue, channel, stopped, stop_notify).await;
        }));

        Ok(())
    }

    async fn back_fill(&self, pool: &PgPool) {
        let now = OffsetDateTime::now_utc();
        match self
            .repo
            .fetch_due_pending_ids(pool, now, self.queue_backfill_limit())
            .await
        {
            Ok(ids) => {
                if !ids.is_empty() {
                    info!(count = ids.len(), "back-filling due pending events");
                }
                for id in ids {
                    self.queue.offer(id);
                }
            }
            Err(e) => error!(error = %e, "back-fill scan failed"),
        }
    }

    fn queue_backfill_limit(&self) -> i64 {
        // queue_maxsize == 0 means unbounded; cap the back-fill scan itself so a huge
        // pending backlog can't stall startup indefinitely.
        10_000
    }

    /// Idempotent: cancels the receive loop, issues `UNLISTEN`, closes the connection.
    pub async fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_waiters();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn receive_loop(
    mut listener: PgListener,
    pool: PgPool,
    repo: EventRepository,
    queue: Arc<HandOffQueue>,
    channel: String,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    let mut backoff = RECONNECT_BASE;

    loop {
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            _ = stop_notify.notified() => break,
            notification = listener.recv() => {
                match notification {
                    Ok(notification) => {
                        backoff = RECONNECT_BASE;
                        match notification.payload().parse::<i64>() {
                            Ok(id) => queue.offer(id),
                            Err(e) => warn!(
                                payload = notification.payload(),
                                error = %e,
                                "malformed notification payload, skipping"
                            ),
                        }
                    }
                    Err(e) => {
                        error!(error = %e, backoff = ?backoff, "notification listener connection error, reconnecting");
                        tokio::select! {
                            _ = stop_notify.notified() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        match PgListener::connect_with(&pool).await {
                            Ok(mut new_listener) => match new_listener.listen(&channel).await {
                                Ok(()) => {
                                    info!("notification listener reconnected");
                                    listener = new_listener;
                                    backfill_after_reconnect(&repo, &pool, &queue).await;
                                    backoff = RECONNECT_BASE;
                                }
                                Err(e) => {
                                    debug!(error = %e, "failed to re-subscribe after reconnect");
                                    backoff = (backoff * 2).min(RECONNECT_CAP);
                                }
                            },
                            Err(e) => {
                                debug!(error = %e, "failed to reconnect listener");
                                backoff = (backoff * 2).min(RECONNECT_CAP);
                            }
                        }
                    }
                }
            }
        }
    }

    let _ = listener.unlisten_all().await;
}

async fn backfill_after_reconnect(repo: &EventRepository, pool: &PgPool, queue: &Arc<HandOffQueue>) {
    let now = OffsetDateTime::now_utc();
    match repo.fetch_due_pending_ids(pool, now, 10_000).await {
        Ok(ids) => {
            for id in ids {
                queue.offer(id);
            }
        }
        Err(e) => error!(error = %e, "post-reconnect back-fill failed"),
    }
}
