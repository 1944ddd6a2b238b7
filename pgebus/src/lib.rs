//! A durable, at-least-once event bus built on PostgreSQL `NOTIFY`/`LISTEN`.
//!
//! Producers call [`publish_event`] inside their own transaction; a running
//! [`EventSystem`] claims due rows with `FOR UPDATE SKIP LOCKED`, dispatches them
//! through an [`EventRouter`], and retries failures with jittered exponential backoff.
//! The database is the single source of truth — the in-memory hand-off queue is only
//! a wake-up hint and may silently drop ids under backpressure without losing events.

mod config;
mod error;
mod listener;
mod migrations;
mod models;
mod pool;
mod producer;
mod queue;
mod repository;
mod router;
mod system;
mod telemetry;
mod worker;

pub use config::{ConfigError, DatabaseConfig, EventSystemConfig, Settings};
pub use error::{HandlerError, ListenerError, RepositoryError, SystemError};
pub use models::{Event, EventSource, EventStatus};
pub use producer::publish_event;
pub use queue::{HandOffQueue, Taken};
pub use repository::EventRepository;
pub use router::{EventRouter, Handler};
pub use system::EventSystem;
pub use telemetry::init_tracing;
