use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sqlx::types::time::OffsetDateTime;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::queue::{HandOffQueue, Taken};
use crate::repository::EventRepository;
use crate::router::EventRouter;

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(300);

/// One of `n_workers` identical loops. The id taken off the hand-off queue is only a
/// hint — the worker always claims via `claim_one`, which may return a different,
/// older row, or none at all if another worker already won the race.
pub struct Worker {
    pub id: usize,
    pool: PgPool,
    repo: EventRepository,
    router: Arc<EventRouter>,
    queue: Arc<HandOffQueue>,
    poll_interval: Duration,
    max_retries: u32,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        pool: PgPool,
        repo: EventRepository,
        router: Arc<EventRouter>,
        queue: Arc<HandOffQueue>,
        poll_interval: Duration,
        max_retries: u32,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            pool,
            repo,
            router,
            queue,
            poll_interval,
            max_retries,
            shutdown,
        }
    }

    pub async fn run(self) {
        debug!(worker_id = self.id, "worker started");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.queue.take(self.poll_interval).await {
                Taken::Closed => break,
                Taken::Timeout => continue,
                Taken::Id(_hint) => {
                    self.queue.mark_in_flight();
                    let outcome = self.claim_and_process().await;
                    self.queue.mark_finished();
                    if let Err(e) = outcome {
                        error!(worker_id = self.id, error = %e, "unexpected error processing claimed event");
                    }
                }
            }
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    async fn claim_and_process(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = OffsetDateTime::now_utc();

        let claimed = match self.repo.claim_one(&mut *tx, now).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                tx.commit().await?;
                return Ok(());
            }
            Err(e) => {
                tx.rollback().await?;
                return Err(match e {
                    crate::error::RepositoryError::Database(inner) => inner,
                    other => {
                        warn!(error = %other, "unexpected repository error while claiming");
                        return Ok(());
                    }
                });
            }
        };

        let result = self.router.handle(&mut tx, &claimed).await;

        match result {
            Ok(true) => {
                if let Err(e) = self.repo.mark_done(&mut *tx, claimed.id).await {
                    tx.rollback().await?;
                    error!(event_id = claimed.id, error = %e, "failed to mark event done");
                    return Ok(());
                }
                tx.commit().await?;
                info!(event_id = claimed.id, event_type = %claimed.event_type, "event processed");
            }
            Ok(false) => {
                // No route matched: this is not an error. Commit the claim as Done so
                // an unroutable event type can never wedge the queue in a retry loop.
                if let Err(e) = self.repo.mark_done(&mut *tx, claimed.id).await {
                    tx.rollback().await?;
                    error!(event_id = claimed.id, error = %e, "failed to finalize unrouted event");
                    return Ok(());
                }
                tx.commit().await?;
                warn!(event_id = claimed.id, event_type = %claimed.event_type, "no route matched");
            }
            Err(handler_err) => {
                tx.rollback().await?;
                self.finalize_failure(&claimed, &handler_err.to_string()).await;
            }
        }

        Ok(())
    }

    async fn finalize_failure(&self, event: &crate::models::Event, err: &str) {
        let next_attempt = event.retry_count as u64 + 1;

        if next_attempt >= self.max_retries as u64 {
            if let Err(e) = self.repo.mark_failed(&self.pool, event.id, err).await {
                error!(event_id = event.id, error = %e, "failed to mark event failed");
            } else {
                warn!(
                    event_id = event.id,
                    event_type = %event.event_type,
                    attempts = next_attempt,
                    "event exhausted retries, marked failed"
                );
            }
            return;
        }

        let delay = retry_backoff(event.retry_count as u32);
        let next_run_at = OffsetDateTime::now_utc() + time::Duration::try_from(delay).unwrap_or(time::Duration::ZERO);

        if let Err(e) = self.repo.mark_retry(&self.pool, event.id, err, next_run_at).await {
            error!(event_id = event.id, error = %e, "failed to schedule retry");
        } else {
            warn!(
                event_id = event.id,
                event_type = %event.event_type,
                attempt = next_attempt,
                delay_secs = delay.as_secs_f64(),
                error = err,
                "event failed, scheduled for retry"
            );
        }
    }
}

/// Exponential backoff with full jitter: `min(cap, base * 2^retry_count) * U(0.5, 1.5)`.
fn retry_backoff(retry_count: u32) -> Duration {
    let exp = RETRY_BASE.saturating_mul(1u32.checked_shl(retry_count).unwrap_or(u32::MAX));
    let capped = exp.min(RETRY_CAP);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    capped.mul_f64(jitter)
}
