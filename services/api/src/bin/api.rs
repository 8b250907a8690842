//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        FileCredentialStore, JsonFileStore, LocalImageStorage, LogNotifier, OpenAiChatAdapter,
        OpenAiImageAdapter, PgUserStore,
    },
    config::Config,
    error::ApiError,
    web::{self, rest::ApiDoc, state::AuthSessions, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{extract::DefaultBodyLimit, Router};
use chat_core::ports::UserStore;
use chat_core::{ChatOrchestrator, ImageStudio, UserDirectory};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use tower_http::cors::CorsLayer;
use axum::http::{Method, HeaderValue, header::{ACCEPT, CONTENT_TYPE}};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the User Store ---
    let store: Arc<dyn UserStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let pg_store = PgUserStore::new(db_pool);
            info!("Running database migrations...");
            pg_store.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(pg_store)
        }
        None => {
            info!(path = %config.users_file.display(), "Using the JSON user file.");
            Arc::new(JsonFileStore::new(config.users_file.clone()))
        }
    };
    let directory = Arc::new(UserDirectory::new(store));

    // --- 3. Initialize Service Adapters ---
    let mut openai_config = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());
    if let Some(api_base) = &config.openai_api_base {
        openai_config = openai_config.with_api_base(api_base.clone());
    }
    let openai_client = Client::with_config(openai_config);

    let chat_adapter = Arc::new(OpenAiChatAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
    ));
    let image_adapter = Arc::new(OpenAiImageAdapter::new(openai_client, &config.image_model));
    let image_storage = Arc::new(LocalImageStorage::new(config.images_dir.clone()));
    image_storage.ensure_dir().await?;

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        directory: directory.clone(),
        chat: Arc::new(ChatOrchestrator::new(
            directory.clone(),
            chat_adapter,
            config.app_context.clone(),
        )),
        images: Arc::new(ImageStudio::new(directory, image_adapter, image_storage)),
        credentials: Arc::new(FileCredentialStore::new(config.credentials_file.clone())),
        notifier: Arc::new(LogNotifier),
        auth_sessions: Arc::new(AuthSessions::new()),
    });

    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    let api_router = web::router(app_state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
