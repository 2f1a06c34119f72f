use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use memorybot_core::config::Config;
use memorybot_core::embedding::Embedder;
use memorybot_core::embedding::local::LocalEmbedder;
use memorybot_core::fusion::{FusionError, FusionStrategy, Query, QueryFuser};
use memorybot_core::ingest::Ingestor;
use memorybot_core::retrieval::{Aggregator, PathRewrite, normalize_hits};
use memorybot_core::store::VectorStore;
use memorybot_core::store::sqlite::SqliteVectorStore;
use memorybot_core::throttle::Throttle;
use memorybot_core::vision::gemini::GeminiVision;

const VALID_SECTIONS: &[&str] = &[
    "server", "storage", "paths", "models", "search", "chat", "ingest",
];

#[derive(Parser)]
#[command(name = "memorybot-cli")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "memorybot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Describe, analyze and index every image in a directory
    Ingest {
        /// Directory to walk
        dir: PathBuf,
    },
    /// Search the collection by text, image, or both
    Search {
        #[arg(long)]
        text: Option<String>,
        /// Path to a query image
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long)]
        top_k: Option<usize>,
        /// `score` or `vector`
        #[arg(long)]
        strategy: Option<String>,
    },
    /// List the serving path of every stored image
    Gallery,
    /// Remove every record from the collection
    Reset,
    /// View and modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Pretty-print the config as TOML
    Show {
        /// Optional section name to display
        section: Option<String>,
    },
    /// Get a config value by dot notation
    Get {
        /// Dot-notation key (e.g., search.top_k)
        key: String,
    },
    /// Set a scalar config value
    Set {
        /// Dot-notation key (e.g., search.top_k)
        key: String,
        /// The value to set
        value: String,
    },
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ingest { dir } => run_ingest(&cli.config, &dir).await,
        Command::Search {
            text,
            image,
            top_k,
            strategy,
        } => run_search(&cli.config, text.as_deref(), image.as_deref(), top_k, strategy.as_deref()),
        Command::Gallery => run_gallery(&cli.config),
        Command::Reset => run_reset(&cli.config),
        Command::Config { action } => match action {
            ConfigAction::Show { section } => show_config(&cli.config, section.as_deref()),
            ConfigAction::Get { key } => get_value(&cli.config, &key),
            ConfigAction::Set { key, value } => set_value(&cli.config, &key, &value),
            ConfigAction::Validate => validate_config(&cli.config),
        },
    };

    match result {
        Ok(output) => print!("{output}"),
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(1);
        }
    }
}

// ── Collection commands ─────────────────────────────────────────────

fn load_config(config_path: &Path) -> Result<Config, String> {
    Config::load_or_default(config_path).map_err(|e| format!("Config error: {e}"))
}

fn open_store(config: &Config, dimensions: usize) -> Result<Arc<dyn VectorStore>, String> {
    let store = SqliteVectorStore::open(
        Path::new(&config.storage.database),
        &config.storage.collection,
        dimensions,
    )
    .map_err(|e| format!("Store error: {e}"))?;
    Ok(Arc::new(store))
}

fn open_embedder() -> Result<Arc<dyn Embedder>, String> {
    let embedder = LocalEmbedder::new().map_err(|e| format!("Embedder error: {e}"))?;
    Ok(Arc::new(embedder))
}

fn rewrite_for(config: &Config) -> PathRewrite {
    PathRewrite::new(
        config.paths.storage_root.clone(),
        config.paths.serving_root.clone(),
    )
}

async fn run_ingest(config_path: &Path, dir: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let embedder = open_embedder()?;
    let store = open_store(&config, embedder.dimensions())?;

    let vision_config = &config.models.vision;
    let api_key = vision_config.resolve_api_key()?;
    let vision = Arc::new(GeminiVision::new(
        &api_key,
        &vision_config.model,
        &vision_config.endpoint,
    ));
    let throttle = Arc::new(Throttle::new(Duration::from_millis(
        config.ingest.min_interval_ms,
    )));
    let ingestor = Ingestor::new(store, embedder, vision.clone(), vision, throttle, &config.ingest);
    ingest_output(&ingestor, dir).await
}

async fn ingest_output(ingestor: &Ingestor, dir: &Path) -> Result<String, String> {
    let report = ingestor
        .ingest_directory(dir)
        .await
        .map_err(|e| format!("Ingest failed: {e}"))?;

    let mut out = format!(
        "Ingested {} of {} image(s).\n",
        report.succeeded.len(),
        report.total()
    );
    for failure in &report.failed {
        out.push_str(&format!("  failed: {} ({})\n", failure.path, failure.reason));
    }
    Ok(out)
}

fn run_search(
    config_path: &Path,
    text: Option<&str>,
    image: Option<&Path>,
    top_k: Option<usize>,
    strategy: Option<&str>,
) -> Result<String, String> {
    let config = load_config(config_path)?;
    let strategy = match strategy {
        Some(name) => parse_strategy(name)?,
        None => config.search.strategy,
    };
    let embedder = open_embedder()?;
    let store = open_store(&config, embedder.dimensions())?;
    let fuser = QueryFuser::new(embedder, store)
        .with_candidate_multiplier(config.search.candidate_multiplier);

    search_output(
        &fuser,
        &rewrite_for(&config),
        Query::new(text, image),
        top_k.unwrap_or(config.search.top_k),
        &config,
        strategy,
    )
}

fn parse_strategy(name: &str) -> Result<FusionStrategy, String> {
    match name {
        "score" => Ok(FusionStrategy::Score),
        "vector" => Ok(FusionStrategy::Vector),
        other => Err(format!(
            "Unknown strategy '{other}'. Valid strategies: score, vector"
        )),
    }
}

fn search_output(
    fuser: &QueryFuser,
    rewrite: &PathRewrite,
    query: Query<'_>,
    top_k: usize,
    config: &Config,
    strategy: FusionStrategy,
) -> Result<String, String> {
    let result = match fuser.search(query, top_k, config.search.weights(), strategy) {
        Ok(result) => result,
        Err(e @ FusionError::NoQueryProvided) => return Err(e.to_string()),
        Err(e) => return Err(format!("Search failed: {e}")),
    };
    let ranked = normalize_hits(&result.hits, rewrite);
    let json = serde_json::to_string_pretty(&ranked).map_err(|e| format!("Output error: {e}"))?;
    Ok(format!("{json}\n"))
}

fn run_gallery(config_path: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let embedder = open_embedder()?;
    let store = open_store(&config, embedder.dimensions())?;
    gallery_output(&Aggregator::new(store, rewrite_for(&config)))
}

fn gallery_output(aggregator: &Aggregator) -> Result<String, String> {
    let paths = aggregator
        .image_paths()
        .map_err(|e| format!("Store error: {e}"))?;
    Ok(paths.iter().map(|p| format!("{p}\n")).collect())
}

fn run_reset(config_path: &Path) -> Result<String, String> {
    let config = load_config(config_path)?;
    let embedder = open_embedder()?;
    let store = open_store(&config, embedder.dimensions())?;
    reset_output(store.as_ref())
}

fn reset_output(store: &dyn VectorStore) -> Result<String, String> {
    let removed = store.count().map_err(|e| format!("Store error: {e}"))?;
    store
        .reset_collection()
        .map_err(|e| format!("Store error: {e}"))?;
    log::info!("reset collection '{}'", store.collection());
    Ok(format!(
        "Removed {removed} record(s) from '{}'.\n",
        store.collection()
    ))
}

// ── Config commands ─────────────────────────────────────────────────

fn read_config_file(config_path: &Path) -> Result<String, String> {
    if !config_path.exists() {
        return Err(format!(
            "Config file not found: {}. Use --config to specify the path.",
            config_path.display()
        ));
    }
    std::fs::read_to_string(config_path).map_err(|e| format!("Config error: {e}"))
}

fn show_config(config_path: &Path, section: Option<&str>) -> Result<String, String> {
    let contents = read_config_file(config_path)?;
    let config = Config::parse(&contents).map_err(|e| format!("Config error: {e}"))?;

    let Some(name) = section else {
        return Ok(config.to_toml_string());
    };
    if !VALID_SECTIONS.contains(&name) {
        return Err(format!(
            "Unknown section '{name}'. Valid sections: {}",
            VALID_SECTIONS.join(", ")
        ));
    }
    let full_toml: toml::Value = toml::de::from_str(&config.to_toml_string())
        .map_err(|e| format!("Config error: {e}"))?;
    let section_value = full_toml
        .get(name)
        .cloned()
        .unwrap_or_else(|| toml::Value::Table(toml::map::Map::new()));
    let mut wrapper = toml::map::Map::new();
    wrapper.insert(name.to_string(), section_value);
    toml::to_string_pretty(&wrapper).map_err(|e| format!("Config error: {e}"))
}

fn get_value(config_path: &Path, key: &str) -> Result<String, String> {
    let contents = read_config_file(config_path)?;
    let root: toml::Value =
        toml::de::from_str(&contents).map_err(|e| format!("Config error: {e}"))?;

    let value = navigate_value(&root, key).ok_or_else(|| format!("Key '{key}' not found"))?;

    match value {
        toml::Value::String(s) => Ok(format!("{s}\n")),
        toml::Value::Integer(n) => Ok(format!("{n}\n")),
        toml::Value::Float(f) => Ok(format!("{f}\n")),
        toml::Value::Boolean(b) => Ok(format!("{b}\n")),
        toml::Value::Datetime(d) => Ok(format!("{d}\n")),
        toml::Value::Array(_) | toml::Value::Table(_) => {
            toml::to_string_pretty(value).map_err(|e| format!("Config error: {e}"))
        }
    }
}

fn set_value(config_path: &Path, key: &str, value: &str) -> Result<String, String> {
    let contents = read_config_file(config_path)?;
    let mut root: toml::Value =
        toml::de::from_str(&contents).map_err(|e| format!("Config error: {e}"))?;

    let parts: Vec<&str> = key.split('.').collect();
    if key.is_empty() {
        return Err("Key must not be empty".to_string());
    }
    set_nested_value(&mut root, &parts, parse_scalar(value))?;

    let new_contents =
        toml::to_string_pretty(&root).map_err(|e| format!("Config error: {e}"))?;

    // Never write a file the server would refuse to load.
    Config::parse(&new_contents)
        .map_err(|e| format!("Validation failed: {e}. Config was not modified."))?;

    std::fs::write(config_path, &new_contents)
        .map_err(|e| format!("Failed to write config: {e}"))?;

    Ok(format!("Updated {key} = {value}\n"))
}

fn validate_config(config_path: &Path) -> Result<String, String> {
    let contents = read_config_file(config_path)?;
    Config::parse(&contents).map_err(|e| format!("Config error: {e}"))?;
    Ok("Configuration is valid.\n".to_string())
}

/// Navigate a TOML value tree using dot notation.
fn navigate_value<'a>(root: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(root, |current, part| current.get(part))
}

/// Parse a string into the most appropriate TOML scalar type.
fn parse_scalar(s: &str) -> toml::Value {
    if let Ok(b) = s.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(n) = s.parse::<i64>() {
        return toml::Value::Integer(n);
    }
    // Only dotted numbers are floats.
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return toml::Value::Float(f);
        }
    }
    toml::Value::String(s.to_string())
}

fn set_nested_value(
    root: &mut toml::Value,
    parts: &[&str],
    value: toml::Value,
) -> Result<(), String> {
    let toml::Value::Table(table) = root else {
        return Err(format!("Cannot navigate into '{}': not a table", parts[0]));
    };
    match parts {
        [last] => {
            table.insert(last.to_string(), value);
            Ok(())
        }
        [first, rest @ ..] => {
            let entry = table
                .entry(first.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            set_nested_value(entry, rest, value)
        }
        [] => Err("Key must not be empty".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memorybot_core::store::{Metadata, Record, keys};
    use memorybot_core::testutil::{MockAnalyzer, MockDescriber, MockEmbedder};

    fn minimal_config_toml() -> &'static str {
        r#"[server]
host = "127.0.0.1"
port = 3000

[storage]
collection = "photos"

[search]
top_k = 4

[chat]
system_prompt = "Test prompt"
"#
    }

    fn write_temp_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("memorybot.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn seeded_store() -> Arc<dyn VectorStore> {
        let store = SqliteVectorStore::open_in_memory("images", 2).unwrap();
        for (id, path, embedding) in [
            ("cat", "../frontend/static/images/cat.jpg", vec![1.0, 0.0]),
            ("dog", "../frontend/static/images/dog.jpg", vec![0.0, 1.0]),
        ] {
            let mut metadata = Metadata::new();
            metadata.insert(keys::IMAGE_PATH.into(), path.into());
            metadata.insert(keys::TAGS.into(), id.into());
            store
                .upsert(Record {
                    id: id.into(),
                    embedding,
                    document: format!("a {id}"),
                    metadata,
                })
                .unwrap();
        }
        Arc::new(store)
    }

    fn rewrite() -> PathRewrite {
        PathRewrite::new("../frontend/static", "../static")
    }

    // ── Config commands ─────────────────────────────────────────────

    #[test]
    fn show_config_returns_valid_toml_that_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        let output = show_config(&path, None).unwrap();
        let config = Config::parse(&output).unwrap();
        assert_eq!(config.storage.collection, "photos");
    }

    #[test]
    fn show_config_section_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        let output = show_config(&path, Some("search")).unwrap();
        assert!(output.contains("[search]"), "{output}");
        assert!(output.contains("top_k = 4"), "{output}");
        assert!(!output.contains("[server]"), "{output}");
    }

    #[test]
    fn show_config_unknown_section_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        let err = show_config(&path, Some("auth")).unwrap_err();
        assert!(err.contains("Unknown section 'auth'"), "{err}");
        assert!(err.contains("Valid sections: server, storage"), "{err}");
    }

    #[test]
    fn show_config_nonexistent_path_returns_error() {
        let err = show_config(Path::new("/nonexistent/path.toml"), None).unwrap_err();
        assert!(err.contains("Config file not found"), "{err}");
        assert!(err.contains("/nonexistent/path.toml"), "{err}");
    }

    #[test]
    fn get_value_reads_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        assert_eq!(get_value(&path, "chat.system_prompt").unwrap().trim(), "Test prompt");
        assert_eq!(get_value(&path, "server.port").unwrap().trim(), "3000");
        assert!(get_value(&path, "search.missing").is_err());
    }

    #[test]
    fn set_value_updates_weight() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        let result = set_value(&path, "search.text_weight", "0.7").unwrap();
        assert_eq!(result, "Updated search.text_weight = 0.7\n");
        assert_eq!(get_value(&path, "search.text_weight").unwrap().trim(), "0.7");
    }

    #[test]
    fn set_value_out_of_range_weight_does_not_modify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        let original = std::fs::read_to_string(&path).unwrap();

        let err = set_value(&path, "search.image_weight", "1.5").unwrap_err();
        assert!(err.contains("Validation failed"), "{err}");
        assert!(err.contains("Config was not modified"), "{err}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn validate_config_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp_config(&dir, minimal_config_toml());
        assert_eq!(validate_config(&path).unwrap(), "Configuration is valid.\n");

        let path = write_temp_config(&dir, "[server]\nport = 0\n");
        let err = validate_config(&path).unwrap_err();
        assert!(err.starts_with("Config error:"), "{err}");
    }

    #[test]
    fn parse_scalar_picks_types() {
        assert_eq!(parse_scalar("true"), toml::Value::Boolean(true));
        assert_eq!(parse_scalar("3"), toml::Value::Integer(3));
        assert_eq!(parse_scalar("0.25"), toml::Value::Float(0.25));
        assert_eq!(parse_scalar("vector"), toml::Value::String("vector".into()));
    }

    // ── Collection commands ─────────────────────────────────────────

    #[test]
    fn parse_strategy_accepts_known_names() {
        assert_eq!(parse_strategy("score").unwrap(), FusionStrategy::Score);
        assert_eq!(parse_strategy("vector").unwrap(), FusionStrategy::Vector);
        assert!(parse_strategy("rrf").unwrap_err().contains("Unknown strategy"));
    }

    #[test]
    fn search_output_prints_ranked_entries_with_serving_paths() {
        let embedder = Arc::new(MockEmbedder::new(2).with_text("cat", vec![1.0, 0.0]));
        let fuser = QueryFuser::new(embedder, seeded_store());

        let output = search_output(
            &fuser,
            &rewrite(),
            Query::new(Some("cat"), None),
            1,
            &Config::default(),
            FusionStrategy::Score,
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        let results = json.as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["image_path"], "../static/images/cat.jpg");
        assert_eq!(results[0]["tags"], serde_json::json!(["cat"]));
    }

    #[test]
    fn search_output_without_query_is_an_error() {
        let fuser = QueryFuser::new(Arc::new(MockEmbedder::new(2)), seeded_store());
        let err = search_output(
            &fuser,
            &rewrite(),
            Query::new(Some("   "), None),
            3,
            &Config::default(),
            FusionStrategy::Score,
        )
        .unwrap_err();
        assert_eq!(err, "Please provide a text query or image to search.");
    }

    #[test]
    fn gallery_output_lists_one_path_per_line() {
        let aggregator = Aggregator::new(seeded_store(), rewrite());
        assert_eq!(
            gallery_output(&aggregator).unwrap(),
            "../static/images/cat.jpg\n../static/images/dog.jpg\n"
        );
    }

    #[test]
    fn reset_output_reports_removed_count() {
        let store = seeded_store();
        let output = reset_output(store.as_ref()).unwrap();
        assert_eq!(output, "Removed 2 record(s) from 'images'.\n");
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn ingest_output_summarizes_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), [0u8; 4]).unwrap();
        std::fs::write(dir.path().join("b.png"), [0u8; 4]).unwrap();

        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open_in_memory("images", 4).unwrap());
        let mut config = Config::default();
        config.ingest.min_interval_ms = 0;
        config.ingest.max_retries = 0;
        let ingestor = Ingestor::new(
            store.clone(),
            Arc::new(MockEmbedder::new(4)),
            Arc::new(MockDescriber::new().failing("b.png")),
            Arc::new(MockAnalyzer::new()),
            Arc::new(Throttle::new(Duration::ZERO)),
            &config.ingest,
        );

        let output = ingest_output(&ingestor, dir.path()).await.unwrap();
        assert!(output.starts_with("Ingested 1 of 2 image(s).\n"), "{output}");
        assert!(output.contains("b.png"), "{output}");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn ingest_output_missing_directory_is_an_error() {
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open_in_memory("images", 4).unwrap());
        let ingestor = Ingestor::new(
            store,
            Arc::new(MockEmbedder::new(4)),
            Arc::new(MockDescriber::new()),
            Arc::new(MockAnalyzer::new()),
            Arc::new(Throttle::new(Duration::ZERO)),
            &Config::default().ingest,
        );
        let err = ingest_output(&ingestor, Path::new("/nonexistent/memorybot"))
            .await
            .unwrap_err();
        assert!(err.starts_with("Ingest failed:"), "{err}");
    }
}
