use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use common::{
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig},
        embedding::{Embedder, EmbeddingProvider},
    },
};
use ingestion_pipeline::{
    extractor::LlmExtractor,
    pipeline::ArticleProcessor,
    sources::{web::WebSource, wikipedia::WikipediaSource, ContentSource},
    ExpansionDriver, ExpansionOptions,
};
use pack_lifecycle::{
    generate_skill_md, load_url_list, package_pack, save_manifest, GraphStats, PackInstaller,
    PackManifest, PackRegistry,
};
use retrieval_pipeline::{OpenAiChat, QueryEngine, RetrievalConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lorepack", about = "Build and query knowledge packs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a seed set into the pack graph
    Expand {
        /// Seed article titles (Wikipedia) or a urls.txt path (web)
        #[arg(long, num_args = 1.., conflicts_with = "urls")]
        seeds: Vec<String>,
        /// Path to a line-oriented URL list for web crawling
        #[arg(long)]
        urls: Option<PathBuf>,
        #[arg(long, default_value_t = 2)]
        max_depth: i64,
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        #[arg(long, default_value_t = 100)]
        target_count: usize,
        #[arg(long, default_value = "General")]
        category: String,
        /// Enable LLM entity/fact extraction during ingestion
        #[arg(long)]
        extract: bool,
        /// Concurrent fetch slots (1 = sequential)
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Ask the pack a question
    Query {
        question: String,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
        #[arg(long)]
        graph_rag: bool,
    },
    /// Scaffold a pack directory: manifest, skill descriptor, retrieval config
    InitPack {
        pack_dir: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "0.1.0")]
        version: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "CC-BY-SA-4.0")]
        license: String,
    },
    /// Package a pack directory into a .tar.gz archive
    Package {
        pack_dir: PathBuf,
        output: PathBuf,
    },
    /// Install a pack archive
    Install { archive: PathBuf },
    /// List installed packs
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Expand {
            seeds,
            urls,
            max_depth,
            batch_size,
            target_count,
            category,
            extract,
            concurrency,
        } => {
            let config = get_config()?;
            let db = connect(&config).await?;
            db.ensure_initialized(config.embedding_dimensions as usize)
                .await?;

            let openai_client = openai(&config);
            let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingProvider::new(
                openai_client.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            ));
            let extractor = extract.then(|| {
                Arc::new(LlmExtractor::new(
                    openai_client.clone(),
                    config.extraction_model.clone(),
                ))
            });

            let (source, seed_titles): (Arc<dyn ContentSource>, Vec<String>) = match urls {
                Some(path) => (
                    Arc::new(WebSource::new(
                        config.rate_limit_ms,
                        config.http_timeout_secs,
                        200,
                    )),
                    load_url_list(&path)?,
                ),
                None => (
                    Arc::new(WikipediaSource::new(
                        config.rate_limit_ms,
                        config.max_retries,
                        config.http_timeout_secs,
                    )),
                    seeds,
                ),
            };

            let processor = Arc::new(ArticleProcessor::new(
                db.clone(),
                source,
                embedder,
                extractor,
            ));

            let driver = ExpansionDriver::new(
                db,
                processor,
                ExpansionOptions {
                    max_depth,
                    batch_size,
                    target_count,
                    fetch_concurrency: concurrency,
                    ..ExpansionOptions::default()
                },
            );

            driver.initialize_seeds(&seed_titles, &category).await?;
            let report = driver.run().await?;
            info!(
                iterations = report.iterations,
                duration_secs = report.duration.as_secs(),
                stats = ?report.stats,
                "Expansion finished"
            );
            println!(
                "loaded={} processed={} failed={} discovered={} total={}",
                report.stats.loaded,
                report.stats.processed,
                report.stats.failed,
                report.stats.discovered,
                report.stats.total
            );
        }
        Command::Query {
            question,
            max_results,
            graph_rag,
        } => {
            let config = get_config()?;
            let db = connect(&config).await?;

            let openai_client = openai(&config);
            let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingProvider::new(
                openai_client.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            ));
            let chat = Arc::new(OpenAiChat::new(openai_client));

            let retrieval = RetrievalConfig {
                synthesis_model: config.synthesis_model.clone(),
                fast_model: config.fast_model.clone(),
                ..RetrievalConfig::default()
            };
            let engine = QueryEngine::new(db, chat, embedder, retrieval).await;

            let response = engine.query(&question, max_results, graph_rag).await?;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!("\nSources: {}", response.sources.join(", "));
            }
        }
        Command::InitPack {
            pack_dir,
            name,
            version,
            description,
            license,
        } => {
            let manifest = PackManifest::new(
                &name,
                &version,
                &description,
                &license,
                GraphStats {
                    articles: 0,
                    entities: 0,
                    relationships: 0,
                    size_mb: 0,
                },
            );
            save_manifest(&manifest, &pack_dir)?;

            let kg_config = serde_json::to_string_pretty(&RetrievalConfig::default())?;
            std::fs::write(pack_dir.join("kg_config.json"), kg_config)?;

            let skill = generate_skill_md(&manifest, &pack_dir.join("kg_config.json"));
            std::fs::write(pack_dir.join("skill.md"), skill)?;

            println!("{}", pack_dir.display());
        }
        Command::Package { pack_dir, output } => {
            let archive = package_pack(&pack_dir, &output)?;
            println!("{}", archive.display());
        }
        Command::Install { archive } => {
            let config = get_config()?;
            let installer = PackInstaller::new(std::path::Path::new(&config.pack_install_dir));
            let info = installer.install_from_file(&archive)?;
            println!("Installed {} {} at {}", info.name, info.version, info.path.display());
        }
        Command::List => {
            let config = get_config()?;
            let registry = PackRegistry::new(std::path::Path::new(&config.pack_install_dir))?;
            for pack in registry.list_packs() {
                println!("{} {}", pack.name, pack.version);
            }
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> Result<Arc<SurrealDbClient>, surrealdb::Error> {
    Ok(Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    ))
}

fn openai(config: &AppConfig) -> Arc<async_openai::Client<async_openai::config::OpenAIConfig>> {
    Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ))
}
