//! Card Fraud Decision Engine — single-binary `axum` + `tokio` service.
//!
//! Boots the field registry, ruleset registry, velocity service, and
//! outbox pipeline; blocks on `StartupLoader::run` before serving traffic;
//! then runs the HTTP surface alongside four background workers (writer,
//! publisher, reclaimer, hot-reload watcher) until a Ctrl-C triggers a
//! bounded graceful drain.

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, routing::{get, post}, Router};
use cardguard_engine::api::auth::evaluate_auth;
use cardguard_engine::api::health::{healthz, readyz};
use cardguard_engine::api::AppState;
use cardguard_engine::fraud::compile::CustomFieldSet;
use cardguard_engine::fraud::config::EngineConfig;
use cardguard_engine::fraud::field_registry::FieldRegistry;
use cardguard_engine::fraud::loader::RulesetLoader;
use cardguard_engine::fraud::object_store::S3ObjectStore;
use cardguard_engine::fraud::outbox::publisher::{build_producer, PublisherConfig};
use cardguard_engine::fraud::outbox::reclaim::ReclaimConfig;
use cardguard_engine::fraud::outbox::writer::WriterConfig;
use cardguard_engine::fraud::outbox::{self, OutboxQueue, DEFAULT_CAPACITY};
use cardguard_engine::fraud::registry::RulesetRegistry;
use cardguard_engine::fraud::shed::{load_shed_middleware, LoadShedConfig, LoadShedder};
use cardguard_engine::fraud::startup::StartupLoader;
use cardguard_engine::fraud::velocity::VelocityService;
use cardguard_engine::fraud::watcher::{self, WatcherConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Required `(country, ruleset_key)` pairs this engine must have loaded
/// before declaring readiness (spec §4.9 gate 2). A thin config surface in
/// a real deployment would drive this from an env var or a discovery
/// call; this core pins it to the single AUTH ruleset used throughout
/// spec.md's worked examples.
fn required_rulesets() -> Vec<(String, String)> {
    vec![
        ("US".to_string(), "CARD_AUTH".to_string()),
        ("global".to_string(), "CARD_AUTH".to_string()),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("cardguard engine starting");

    let config = EngineConfig::from_env();

    if let Err(e) = cardguard_engine::fraud::metrics::install(config.metrics_bind_addr) {
        warn!(error = %e, "failed to install prometheus exporter, continuing without metrics export");
    }

    let object_store = Arc::new(
        S3ObjectStore::connect(
            config.s3_endpoint_url.as_deref(),
            &config.s3_region,
            &config.s3_access_key,
            &config.s3_secret_key,
            &config.ruleset_bucket,
        )
        .await,
    );
    let loader = Arc::new(RulesetLoader::new(object_store, config.ruleset_environment.clone()));

    let field_registry = Arc::new(FieldRegistry::builtin());
    let custom_fields = Arc::new(CustomFieldSet::new());
    let registry = Arc::new(RulesetRegistry::new());

    let mut velocity = VelocityService::connect(&config.redis_url)
        .await
        .context("failed to connect velocity service to redis")?;

    let redis_client =
        redis::Client::open(config.redis_url.clone()).context("invalid REDIS_URL")?;
    let mut outbox_redis_conn = redis_client
        .get_connection_manager()
        .await
        .context("failed to connect outbox control-plane redis connection")?;

    let required = required_rulesets();

    let startup = StartupLoader::new();
    startup
        .run(
            &config,
            &registry,
            &field_registry,
            &custom_fields,
            &loader,
            &required,
            &mut outbox_redis_conn,
            &mut velocity,
        )
        .await
        .context("startup readiness gates failed")?;

    let ready = startup.readiness_handle();

    let (outbox_queue, outbox_rx) = OutboxQueue::bounded(DEFAULT_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer_conn = redis_client
        .get_connection_manager()
        .await
        .context("failed to connect writer redis connection")?;
    let writer_config = WriterConfig {
        stream_key: config.outbox_stream_key.clone(),
        maxlen: config.outbox_maxlen,
        ..WriterConfig::default()
    };
    let writer_handle = tokio::spawn(outbox::writer::run(
        outbox_rx,
        writer_conn,
        writer_config,
        outbox_queue.stats(),
        shutdown_rx.clone(),
    ));

    let publisher_conn = redis_client
        .get_connection_manager()
        .await
        .context("failed to connect publisher redis connection")?;
    let producer =
        build_producer(&config.kafka_bootstrap_servers).context("failed to build kafka producer")?;
    let publisher_config = PublisherConfig {
        stream_key: config.outbox_stream_key.clone(),
        consumer_group: config.outbox_consumer_group.clone(),
        consumer_name: config.outbox_consumer_name.clone(),
        block_timeout: config.outbox_redis_timeout,
        kafka_topic: config.outbox_stream_key.clone(),
    };
    let publisher_handle = tokio::spawn(outbox::publisher::run(
        publisher_conn,
        producer,
        publisher_config,
        shutdown_rx.clone(),
    ));

    let reclaim_conn = redis_client
        .get_connection_manager()
        .await
        .context("failed to connect reclaimer redis connection")?;
    let reclaim_config = ReclaimConfig {
        stream_key: config.outbox_stream_key.clone(),
        consumer_group: config.outbox_consumer_group.clone(),
        consumer_name: config.outbox_consumer_name.clone(),
        ..ReclaimConfig::default()
    };
    let reclaimer_handle = tokio::spawn(outbox::reclaim::run(
        reclaim_conn,
        reclaim_config,
        shutdown_rx.clone(),
    ));

    let watcher_config = WatcherConfig {
        poll_interval: config.hot_reload_poll_interval,
        tracked: required.clone(),
    };
    let watcher_handle = tokio::spawn(watcher::run(
        registry.clone(),
        loader.clone(),
        field_registry.clone(),
        custom_fields.clone(),
        watcher_config,
        shutdown_rx.clone(),
    ));

    let app_state = AppState {
        registry,
        field_registry,
        custom_fields,
        velocity: Arc::new(tokio::sync::Mutex::new(velocity)),
        outbox: outbox_queue,
        ready,
    };

    let shedder = LoadShedder::new(LoadShedConfig {
        enabled: config.load_shed_enabled,
        max_concurrent: config.load_shed_max_concurrent,
    });

    let app = Router::new()
        .route("/v1/evaluate/auth", post(evaluate_auth))
        .route_layer(axum_mw::from_fn_with_state(shedder, load_shed_middleware))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "cardguard engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("no longer accepting requests, draining outbox queue");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(10), writer_handle)
        .await
        .is_err()
    {
        warn!("outbox writer did not drain within the shutdown deadline");
    }
    let _ = publisher_handle.await;
    let _ = reclaimer_handle.await;
    let _ = watcher_handle.await;

    info!("cardguard engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, starting graceful shutdown"),
        Err(e) => error!(error = %e, "failed to install ctrl-c handler"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardguard_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv::dotenv();
}
