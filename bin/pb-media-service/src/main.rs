//! PostBus Media Service
//!
//! Serves media metadata from MongoDB through the cache. Subscribes to
//! `post.deleted` and removes the media the deleted post referenced.
//!
//! ## Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PB_CONFIG` | - | TOML configuration file |
//! | `PORT` | `3003` | HTTP port |
//! | `RABBITMQ_URL` | `amqp://127.0.0.1:5672` | Broker URL |
//! | `DEAD_LETTER_EXCHANGE` | - | Exchange for facts that fail twice |
//! | `REDIS_URL` | `redis://127.0.0.1:6379` | Cache and rate-limit store |
//! | `SENSITIVE_ROUTES` | `/api/auth/register,/api/auth/login` | Path prefixes under the tighter window |
//! | `MONGODB_URL` | `mongodb://127.0.0.1:27017` | MongoDB connection URL |
//! | `RUST_LOG` | `info` | Log level |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use pb_admission::{AdmissionLimiter, RedisCounterStore};
use pb_api::{build_app, install_metrics_recorder, media_router, serve, shutdown_signal};
use pb_broker::{AmqpBroker, Broker, ExchangeSpec};
use pb_cache::{CacheLayer, RedisCacheStore};
use pb_common::{init_tracing, POST_DELETED};
use pb_config::AppConfig;
use pb_platform::repository::{ensure_indexes, MongoMediaStore};
use pb_platform::{MediaService, MediaStore};
use pb_subscriber::{ExchangeDeadLetterSink, HandlerRegistry, MediaReferenceHandler, SubscriptionManager};

const SERVICE_NAME: &str = "media-service";
const DEFAULT_PORT: u16 = 3003;

#[derive(Parser, Debug)]
#[command(name = "pb-media-service", about = "PostBus media service")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "PB_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = AppConfig::load(AppConfig::for_service(SERVICE_NAME, DEFAULT_PORT), args.config.as_deref())?;
    if let Some(port) = args.port {
        config.service.port = port;
    }

    init_tracing(&config.service.name, config.service.log_format);
    info!("Starting PostBus Media Service");

    let metrics_handle = match install_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };

    info!("Connecting to MongoDB: {}", config.mongo.database);
    let mongo = mongodb::Client::with_uri_str(&config.mongo.url).await?;
    let db = mongo.database(&config.mongo.database);
    ensure_indexes(&db).await?;

    let cache = CacheLayer::new(Arc::new(RedisCacheStore::connect(&config.cache.redis_url).await?));
    let limiter = Arc::new(AdmissionLimiter::new(
        &config.rate_limit,
        Arc::new(RedisCounterStore::connect(&config.cache.redis_url).await?),
    ));

    let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::connect_with_retry(&config.broker, SERVICE_NAME).await?);
    broker.declare_exchange(&ExchangeSpec::topic(&config.broker.exchange)).await?;

    let mut manager = SubscriptionManager::new(broker.clone(), &config.broker, &config.subscriber);
    if let Some(dlx) = &config.subscriber.dead_letter_exchange {
        broker.declare_exchange(&ExchangeSpec::topic(dlx)).await?;
        manager = manager.with_dead_letter_sink(Arc::new(ExchangeDeadLetterSink::new(broker.clone(), dlx)));
    }

    let store: Arc<dyn MediaStore> = Arc::new(MongoMediaStore::new(&db));
    let registry = HandlerRegistry::new().with(
        POST_DELETED,
        Arc::new(MediaReferenceHandler::new(store.clone(), cache.clone())),
    );
    let queue = manager.subscribe_registry(registry).await?;
    info!(queue = %queue, "Subscribed to post facts");

    let media = MediaService::new(store, cache).with_ttl(config.cache.media_ttl());

    let housekeeping = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                limiter.retain_recent();
            }
        })
    };

    let app = build_app(SERVICE_NAME, media_router(media), Some(limiter), metrics_handle);
    serve(app, config.service.port, shutdown_signal()).await?;

    info!("Shutdown signal received, stopping");
    housekeeping.abort();
    manager.shutdown().await;
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close failed");
    }

    info!("Media Service shutdown complete");
    Ok(())
}
