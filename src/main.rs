use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handlers;
mod models;
mod services;

use config::Settings;
use error::IndexError;
use models::openai::OpenAIEmbeddingClient;
use services::agent::HybridAgent;
use services::classifier::QueryClassifier;
use services::llm::{ChatClient, ChatClientFactory, EmbeddingClient};
use services::retriever::PassageRetriever;
use services::stats_tool::HttpStatsTool;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    info!("starting Courtside assistant service");

    // Configuration errors are fatal at startup, never per-request.
    let settings = Settings::from_env().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    let embedder: Arc<dyn EmbeddingClient> = match OpenAIEmbeddingClient::new(
        settings.openai_api_key.clone(),
        settings.embedding_model.clone(),
        settings.request_timeout_secs,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("failed to initialize embedding client: {}", e);
            std::process::exit(1);
        }
    };

    let chat_client: Arc<dyn ChatClient> = ChatClientFactory::create(
        &settings.chat_provider,
        &settings.chat_model,
        &settings,
    )
    .unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    // Classifier model tier is optional; without it the word-count fallback
    // tier applies.
    let classifier_client = match &settings.classifier_provider {
        Some(provider) => {
            match ChatClientFactory::create(provider, &settings.classifier_model, &settings) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("classifier model tier disabled: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let retriever = Arc::new(PassageRetriever::new(
        Arc::clone(&embedder),
        settings.index_path.clone(),
        settings.corpus_path.clone(),
        settings.index_auto_build,
    ));

    // Load (or, if configured, auto-build) the index up front so a missing
    // artifact prevents serving instead of surfacing per-request.
    if let Err(e) = retriever.initialize().await {
        match &e {
            IndexError::NotFound(path) => {
                error!(
                    "no passage index at {path}; build one from the corpus or set \
                     INDEX_AUTO_BUILD=true"
                );
            }
            other => error!("failed to initialize passage index: {}", other),
        }
        std::process::exit(1);
    }

    let stats_tool = Arc::new(HttpStatsTool::new(
        settings.stats_service_url.clone(),
        settings.request_timeout_secs,
    ));

    let agent = Arc::new(HybridAgent::new(
        QueryClassifier::new(classifier_client),
        chat_client,
        Arc::clone(&retriever),
        stats_tool,
        settings.max_iterations,
        settings.top_k,
    ));

    info!(
        chat_provider = %settings.chat_provider,
        chat_model = %settings.chat_model,
        embedding_model = %settings.embedding_model,
        top_k = settings.top_k,
        max_iterations = settings.max_iterations,
        "engine initialized"
    );

    let agent_data = web::Data::new(agent);
    let retriever_data = web::Data::new(retriever);
    let (host, port) = (settings.host.clone(), settings.port);

    info!("starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .app_data(agent_data.clone())
            .app_data(retriever_data.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .service(
                web::scope("/api")
                    .route("/chat", web::post().to(handlers::chat))
                    .route("/index/rebuild", web::post().to(handlers::rebuild_index)),
            )
            .route("/health", web::get().to(handlers::health))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
