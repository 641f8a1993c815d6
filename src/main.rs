use std::sync::Arc;

use anyhow::Context;
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowdeck_backend::config::{Config, LogFormat};
use flowdeck_backend::db::{
    postgres_integration_repository::PostgresIntegrationConnectionRepository,
    postgres_oauth_token_repository::PostgresOAuthTokenCache,
    postgres_user_repository::PostgresUserDirectory,
    postgres_workflow_repository::PostgresWorkflowRepository,
};
use flowdeck_backend::routes;
use flowdeck_backend::state::{AppState, Stores};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    init_tracing(config.log_format);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let stores = Stores {
        workflows: Arc::new(PostgresWorkflowRepository { pool: pool.clone() }),
        connections: Arc::new(PostgresIntegrationConnectionRepository { pool: pool.clone() }),
        tokens: Arc::new(PostgresOAuthTokenCache { pool: pool.clone() }),
        users: Arc::new(PostgresUserDirectory { pool }),
    };
    let state = AppState::new(config.clone(), stores);

    let mut app = routes::router(state).layer(TraceLayer::new_for_http());
    if let Some(origin) = &config.frontend_origin {
        let origin = origin
            .parse::<HeaderValue>()
            .context("FRONTEND_ORIGIN is not a valid header value")?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([CONTENT_TYPE]),
        );
    }

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "workflow engine listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
