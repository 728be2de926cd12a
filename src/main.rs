use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use spark_signal::config::{Settings, StoreBackend};
use spark_signal::routes::{self, handle_json_payload_error, handle_query_payload_error, AppState};
use spark_signal::services::{BroadcastNotifier, MemoryStore, PostgresStore, Store, TokenIssuer};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    init_logging(&settings.logging.level, &settings.logging.format);

    info!("Starting Spark Signal service...");

    let store: Arc<dyn Store> = match settings.database.backend {
        StoreBackend::Postgres => {
            let db_max_conn = settings.database.max_connections.unwrap_or(10);
            let postgres = PostgresStore::from_settings(
                &settings.database.url,
                Some(db_max_conn),
                settings.database.min_connections,
                settings.database.acquire_timeout_secs,
                settings.database.idle_timeout_secs,
            )
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
            })?;
            info!("PostgreSQL store initialized (max: {} connections)", db_max_conn);
            Arc::new(postgres)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; all data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = Arc::new(BroadcastNotifier::new(settings.notifier.channel_capacity));
    let tokens = TokenIssuer::new(
        &settings.auth.jwt_secret,
        chrono::Duration::hours(settings.auth.token_ttl_hours),
    );
    let engine_config = settings.engine_config();

    info!("Matching engine configured: {:?}", engine_config);

    let app_state = AppState::new(store, hub, tokens, &settings.auth.host_key, engine_config);

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
