//! Catalog server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use catalog_core::ResourceKind;
use catalog_server::app::{Catalog, CatalogConfig};
use catalog_server::network::{NetworkConfig, TlsConfig};
use catalog_server::outbox::{NotificationConfig, OutboxConfig};
use catalog_server::publisher::{ChannelPublisher, WebhookPublisher};
use catalog_server::service::ServerConfig;
#[cfg(feature = "postgres")]
use catalog_server::storage::PgStore;
use catalog_server::storage::MemoryStore;
use catalog_server::traits::{EventPublisher, OutboxStore, ResourceStore};
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Messages kept by the in-process publisher when no broker is configured.
const LOCAL_PUBLISHER_HISTORY: usize = 1024;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "catalog-server", version, about = "Catalog CRUD server with HTTP/JSON gateway and MsgPack RPC")]
struct Args {
    #[arg(long, env = "CATALOG_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "CATALOG_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "CATALOG_NODE_ID", default_value = "catalog-1")]
    node_id: String,

    /// PostgreSQL URL. Without it, resources live in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "CATALOG_DB_MAX_CONNECTIONS", default_value_t = 10)]
    #[cfg_attr(not(feature = "postgres"), allow(dead_code))]
    db_max_connections: u32,

    /// Base URL notifications are POSTed to (`{url}/{topic}`). Without it,
    /// notifications stay in process.
    #[arg(long, env = "CATALOG_PUBLISHER_URL")]
    publisher_url: Option<String>,

    #[arg(long, env = "CATALOG_PUBLISH_TIMEOUT_MS", default_value_t = 2_000)]
    publish_timeout_ms: u64,

    #[arg(long, env = "CATALOG_RELAY_INTERVAL_MS", default_value_t = 5_000)]
    relay_interval_ms: u64,

    #[arg(long, env = "CATALOG_OUTBOX_GRACE_MS", default_value_t = 10_000)]
    outbox_grace_ms: u64,

    #[arg(long, env = "CATALOG_OUTBOX_MAX_ATTEMPTS", default_value_t = 10)]
    outbox_max_attempts: u32,

    #[arg(long, env = "CATALOG_OUTBOX_BATCH_SIZE", default_value_t = 100)]
    outbox_batch_size: usize,

    /// Topic for book creations. Empty disables book notifications.
    #[arg(long, env = "CATALOG_BOOK_TOPIC", default_value = "book_creation_queue")]
    book_topic: String,

    #[arg(long, env = "CATALOG_COMIC_TOPIC")]
    comic_topic: Option<String>,

    #[arg(long, env = "CATALOG_USER_TOPIC")]
    user_topic: Option<String>,

    #[arg(long, env = "CATALOG_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    #[arg(long, env = "CATALOG_MAX_CONCURRENT_OPERATIONS", default_value_t = 1_000)]
    max_concurrent_operations: u32,

    #[arg(long, env = "CATALOG_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long = "cors-origin", env = "CATALOG_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    #[arg(long, env = "CATALOG_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "CATALOG_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    #[arg(long, env = "CATALOG_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "CATALOG_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn notifications(&self) -> NotificationConfig {
        let topics = [
            (ResourceKind::Books, Some(self.book_topic.as_str())),
            (ResourceKind::Comics, self.comic_topic.as_deref()),
            (ResourceKind::Users, self.user_topic.as_deref()),
        ];
        topics
            .into_iter()
            .filter_map(|(kind, topic)| topic.filter(|t| !t.is_empty()).map(|t| (kind, t)))
            .fold(NotificationConfig::disabled(), |config, (kind, topic)| {
                config.with_topic(kind, topic)
            })
    }

    fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            server: ServerConfig {
                node_id: self.node_id.clone(),
                default_operation_timeout_ms: self.operation_timeout_ms,
                max_concurrent_operations: self.max_concurrent_operations,
                ..ServerConfig::default()
            },
            network: NetworkConfig {
                host: self.host.clone(),
                port: self.port,
                tls: self.tls_cert.clone().zip(self.tls_key.clone()).map(
                    |(cert_path, key_path)| TlsConfig {
                        cert_path,
                        key_path,
                    },
                ),
                cors_origins: self.cors_origins.clone(),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                ..NetworkConfig::default()
            },
            outbox: OutboxConfig {
                relay_interval_ms: self.relay_interval_ms,
                grace_ms: self.outbox_grace_ms,
                max_attempts: self.outbox_max_attempts,
                batch_size: self.outbox_batch_size,
                publish_timeout_ms: self.publish_timeout_ms,
            },
            notifications: self.notifications(),
        }
    }

    fn publisher(&self) -> anyhow::Result<Arc<dyn EventPublisher>> {
        if let Some(url) = &self.publisher_url {
            let publisher =
                WebhookPublisher::new(url.clone(), Duration::from_millis(self.publish_timeout_ms))
                    .context("building webhook publisher")?;
            info!(url = %url, "notifications go to webhook");
            return Ok(Arc::new(publisher));
        }
        warn!("no publisher URL configured, notifications stay in process");
        let publisher = ChannelPublisher::with_history_limit(LOCAL_PUBLISHER_HISTORY);
        let mut rx = publisher.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = rx.recv().await {
                info!(
                    topic = %message.topic,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "notification"
                );
            }
        });
        Ok(Arc::new(publisher))
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn run<S>(config: CatalogConfig, store: Arc<S>, publisher: Arc<dyn EventPublisher>) -> anyhow::Result<()>
where
    S: ResourceStore + OutboxStore + 'static,
{
    let catalog = Catalog::build(config, store, publisher)?;
    catalog.start().await?;

    let mut network = catalog.network_module();
    let port = network.start().await?;
    info!(port, "catalog server listening");

    let served = network.serve(shutdown_signal()).await;
    let stopped = catalog.shutdown().await;
    served.and(stopped)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "Prometheus metrics listener started");
    }

    let publisher = args.publisher()?;
    let config = args.catalog_config();

    match &args.database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = PgStore::connect(url, args.db_max_connections)
                .await
                .context("connecting to PostgreSQL")?;
            info!("using PostgreSQL store");
            run(config, Arc::new(store), publisher).await
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => anyhow::bail!("DATABASE_URL is set but the server was built without the `postgres` feature"),
        None => {
            info!("using in-memory store");
            run(config, Arc::new(MemoryStore::new()), publisher).await
        }
    }
}
