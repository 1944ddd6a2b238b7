use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::error::HandlerError;
use crate::models::Event;

/// A handler invoked for one matched event type. Returning `Ok(())` marks the event
/// `Done`; an `Err` drives the retry/fail path.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, tx: &mut Transaction<'_, Postgres>, event: &Event) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(&mut Transaction<'_, Postgres>, &Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn call(&self, tx: &mut Transaction<'_, Postgres>, event: &Event) -> Result<(), HandlerError> {
        (self)(tx, event).await
    }
}

/// Maps dotted event types to handlers. Analogous to the original system's
/// `EventRouter`/`APIRouter`-style decorator registration, minus the decorator
/// sugar: routes are registered explicitly via `register`.
#[derive(Default)]
pub struct EventRouter {
    prefix: String,
    routes: Vec<(String, std::sync::Arc<dyn Handler>)>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
        }
    }

    /// Registers `handler` for the dotted path `path` (relative to this router's prefix).
    pub fn register(&mut self, path: impl Into<String>, handler: impl Handler + 'static) {
        self.routes.push((path.into(), std::sync::Arc::new(handler)));
    }

    /// Mounts `other`'s routes into this router, concatenating
    /// `extra_prefix + other.prefix + path` with `.` joins.
    pub fn merge(&mut self, other: EventRouter, extra_prefix: Option<&str>) {
        for (path, handler) in other.routes {
            let mut parts = Vec::new();
            if let Some(p) = extra_prefix {
                if !p.is_empty() {
                    parts.push(p.to_string());
                }
            }
            if !other.prefix.is_empty() {
                parts.push(other.prefix.clone());
            }
            if !path.is_empty() {
                parts.push(path);
            }
            self.routes.push((parts.join("."), handler));
        }
    }

    /// Finds the first route whose path equals `event.event_type` and invokes it.
    /// Returns `Ok(true)` if a route matched, `Ok(false)` if none did. A miss is not
    /// an error: an unroutable event type will never become routable by retrying it,
    /// so the caller finalizes it as done rather than wedging it in a retry loop.
    pub async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &Event,
    ) -> Result<bool, HandlerError> {
        for (path, handler) in &self.routes {
            if path == &event.event_type {
                handler.call(tx, event).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_paths(router: &EventRouter) -> Vec<&str> {
        router.routes.iter().map(|(path, _)| path.as_str()).collect()
    }

    fn noop_handler(
        _tx: &mut Transaction<'_, Postgres>,
        _event: &Event,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), HandlerError>> + Send>> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn register_stores_the_exact_path() {
        let mut router = EventRouter::new();
        router.register("template.version.created", noop_handler);
        assert_eq!(route_paths(&router), vec!["template.version.created"]);
    }

    #[test]
    fn merge_concatenates_prefix_and_extra_prefix_with_dots() {
        let mut child = EventRouter::with_prefix("template");
        child.register("created", noop_handler);
        child.register("deleted", noop_handler);

        let mut parent = EventRouter::new();
        parent.merge(child, Some("v2"));

        let mut paths = route_paths(&parent);
        paths.sort_unstable();
        assert_eq!(paths, vec!["v2.template.created", "v2.template.deleted"]);
    }

    #[test]
    fn merge_without_extra_prefix_keeps_the_child_prefix_only() {
        let mut child = EventRouter::with_prefix("billing");
        child.register("invoice.paid", noop_handler);

        let mut parent = EventRouter::new();
        parent.merge(child, None);

        assert_eq!(route_paths(&parent), vec!["billing.invoice.paid"]);
    }
}
