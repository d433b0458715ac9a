//! AgroBot - agricultural advisor chat API
//!
//! Serves the AgroBot chatbot: conversations are persisted in SQLite and each
//! new message is answered by an upstream LLM (Gemini by default) with the
//! stored dialogue replayed as history. When the database cannot be reached
//! the API keeps answering, statelessly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use crate::config::{resolve_system_prompt, Config};
use crate::core::{ChatSession, SqliteStore};
use crate::providers::Provider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<ChatSession>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agrobot_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Panics inside handlers are contained per connection; make sure they are visible
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(%info, "⚠️ Unhandled panic");
    }));

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // Initialize conversation storage
    if let Some(dir) = config.database_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    let store = Arc::new(SqliteStore::open(&config.database_url)?);
    match store.connect().await {
        Ok(()) => tracing::info!("✅ Database connected"),
        Err(e) => tracing::error!(
            error = %e,
            "❌ Database connection failed, conversations will not be saved"
        ),
    }

    // Initialize completion provider
    let system_prompt = resolve_system_prompt(config.persona_file.as_deref()).await?;
    let provider = Provider::from_config(&config.llm, &system_prompt)?;
    if config.llm.api_key.is_none() && matches!(provider, Provider::Gemini(_)) {
        tracing::warn!("GEMINI_API_KEY is not set, chat requests will fail");
    }
    tracing::info!(
        provider = provider.name(),
        model = %config.llm.model,
        max_output_tokens = config.llm.max_output_tokens,
        "🤖 Completion provider ready"
    );

    let session = Arc::new(ChatSession::new(store.clone(), Arc::new(provider)));
    let state = AppState { session };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("🚀 AgroBot API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    tracing::info!("👋 Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
