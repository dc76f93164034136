use actix_web::{web, App, HttpServer};
use match_control_plane::auth::TokenVerifier;
use match_control_plane::config::AppConfig;
use match_control_plane::hub::Hub;
use match_control_plane::http::{health_check, metrics_handler};
use match_control_plane::metrics::Metrics;
use match_control_plane::pubsub::{PubSubBus, RedisBus};
use match_control_plane::router::CommandRouter;
use match_control_plane::store::{EventLogAppender, MatchStore, PgMatchStore};
use match_control_plane::ws::routes::WsAppState;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let bus: Arc<dyn PubSubBus> = Arc::new(RedisBus::new(&config.pubsub_url)?);
    let store: Arc<dyn MatchStore> = Arc::new(PgMatchStore::new(pool));
    let metrics = Arc::new(Metrics::new());

    let appender = EventLogAppender::new(store.clone(), config.command_retry_max);
    let router = Arc::new(CommandRouter::new(appender, bus.clone(), metrics.clone(), config.ws_send_timeout));
    let hub = Hub::new(bus.clone(), store.clone(), router, metrics.clone(), config.ws_ping_interval);

    let token_verifier = Arc::new(TokenVerifier::new(&config.token_shared_secret, config.token_issuer.clone()));

    let ws_state = WsAppState {
        hub,
        token_verifier,
        ping_interval: config.ws_ping_interval,
        idle_timeout: config.ws_idle_timeout,
        queue_capacity: config.ws_send_queue_size,
        send_timeout: config.ws_send_timeout,
    };

    let bind_addr = "0.0.0.0:8080";
    let metrics_bind_addr = config.metrics_bind_addr.clone();
    info!(bind_addr, metrics_bind_addr = %metrics_bind_addr, "starting match control plane");

    let main_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ws_state.clone()))
            .app_data(web::Data::new(bus.clone()))
            .app_data(web::Data::new(store.clone()))
            .route("/health", web::get().to(health_check))
            .configure(match_control_plane::ws::routes::configure)
    })
    .bind(bind_addr)?
    .run();

    let metrics_data = metrics.clone();
    let metrics_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(metrics_data.clone()))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(&metrics_bind_addr)?
    .run();

    tokio::try_join!(main_server, metrics_server)?;

    Ok(())
}
