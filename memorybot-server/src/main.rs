use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::signal;
use tower_http::services::ServeDir;

mod api;

use api::AppState;
use memorybot_core::config::Config;
use memorybot_core::embedding::Embedder;
use memorybot_core::embedding::local::LocalEmbedder;
use memorybot_core::provider::gemini::GeminiProvider;
use memorybot_core::store::sqlite::SqliteVectorStore;
use memorybot_core::vision::gemini::GeminiVision;

#[derive(Parser)]
#[command(name = "memorybot-server", about = "Multimodal image search and chat server")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "memorybot.toml")]
    config: PathBuf,
}

fn exit_with(message: String) -> ! {
    error!("{message}");
    eprintln!("Error: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = Config::load_or_default(&args.config).unwrap_or_else(|e| exit_with(e));

    let embedder = LocalEmbedder::new().unwrap_or_else(|e| exit_with(e.to_string()));
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);

    let db_path = config.storage.database.clone();
    let store = SqliteVectorStore::open(
        Path::new(&db_path),
        &config.storage.collection,
        embedder.dimensions(),
    )
    .unwrap_or_else(|e| exit_with(e.to_string()));

    let vision_config = &config.models.vision;
    let api_key = vision_config
        .resolve_api_key()
        .unwrap_or_else(|e| exit_with(e));
    let vision = Arc::new(GeminiVision::new(
        &api_key,
        &vision_config.model,
        &vision_config.endpoint,
    ));
    let provider = GeminiProvider::new(
        &api_key,
        &vision_config.model,
        &vision_config.endpoint,
        &config.chat.system_prompt,
        vision_config.temperature,
    );

    let addr = config.bind_address();
    let static_dir = config.server.static_dir.clone();
    let model = vision_config.model.clone();
    let collection = config.storage.collection.clone();

    let state = Arc::new(AppState::new(
        config,
        provider,
        embedder.clone(),
        Arc::new(store),
        vision.clone(),
        vision,
    ));

    let app = api::router(state).fallback_service(ServeDir::new(&static_dir));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| exit_with(format!("failed to bind to {addr}: {e}")));

    info!("memorybot server started");
    info!("  address:    http://{addr}");
    info!("  model:      {model}");
    info!("  embedder:   {} ({} dims)", embedder.model_name(), embedder.dimensions());
    info!("  database:   {db_path}");
    info!("  collection: {collection}");
    info!("  static:     {static_dir}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("shutting down");
}
