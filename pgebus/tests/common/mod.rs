use std::time::Duration;

use pgebus::{DatabaseConfig, EventSystemConfig, Settings};
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tokio::time::sleep;

/// Spins up a disposable Postgres container and returns a ready-to-use pool plus
/// `Settings` pointed at it.
pub struct TestDb {
    pub pool: PgPool,
    pub settings: Settings,
    _container: ContainerAsync<Postgres>,
}

impl TestDb {
    pub async fn new() -> Self {
        tracing_subscriber::fmt::try_init().ok();

        let container = Postgres::default().start().await.expect("start postgres container");
        let port = container.get_host_port_ipv4(5432).await.expect("container port");

        let database = DatabaseConfig {
            host: "localhost".to_string(),
            port,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            application_name: "pgebus-tests".to_string(),
            schema_name: "pgebus_test".to_string(),
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&database.connection_url())
            .await
            .expect("connect to test postgres");

        let settings = Settings {
            database,
            event_system: EventSystemConfig {
                poll_interval: Duration::from_millis(100),
                stuck_reap_interval: Duration::from_secs(3600),
                ..EventSystemConfig::default()
            },
        };

        Self {
            pool,
            settings,
            _container: container,
        }
    }
}

/// Polls `f` every 50ms until it returns `Some` or `timeout` elapses.
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(v) = f().await {
            return Some(v);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(50)).await;
    }
}
