mod batch;
mod config;
mod error;
mod graph_store;
mod memory_store;
mod neo4j_storage;
mod pipeline;
mod procedures;
mod records;
mod schema;
mod source;

use anyhow::{Context, Result};
use config::Config;
use memory_store::MemoryGraph;
use neo4j_storage::Neo4jStore;
use pipeline::{ImportPipeline, PipelineSources};
use records::GenomeTagRecord;
use source::{CsvSource, RecordSource};
use tracing::{info, warn};

fn csv_sources(config: &Config) -> PipelineSources {
    let genome_tags = if config.genome_tags_path.is_file() {
        let source: Box<dyn RecordSource<GenomeTagRecord>> =
            Box::new(CsvSource::new(&config.genome_tags_path));
        Some(source)
    } else {
        warn!(
            "⚠️  Genome tag dictionary not found at {:?}; skipping tag reconciliation",
            config.genome_tags_path
        );
        None
    };

    PipelineSources {
        movies: Box::new(CsvSource::new(&config.movies_path)),
        ratings: Box::new(CsvSource::new(&config.ratings_path)),
        tags: Box::new(CsvSource::new(&config.tags_path)),
        genome_tags,
        genome_scores: Box::new(CsvSource::new(&config.genome_scores_path)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("🚀 MovieLens graph import starting...");

    // Load configuration
    let config = Config::from_env()?;
    let pipeline = ImportPipeline::new(config.batch_sizes, config.retry_policy())
        .context("Invalid batch configuration")?;
    let sources = csv_sources(&config);

    let summary = if config.dry_run {
        info!("🧪 Dry run: importing into an in-memory graph");
        let graph = MemoryGraph::new();
        let summary = pipeline
            .run(&graph, &sources)
            .await
            .context("Dry-run import failed")?;
        info!(
            "📊 In-memory graph: {}",
            serde_json::to_string(&graph.stats())?
        );
        summary
    } else {
        let store = Neo4jStore::connect(
            &config.neo4j_uri,
            &config.neo4j_user,
            &config.neo4j_password,
            &config.connect_policy(),
        )
        .await?;

        pipeline
            .run(&store, &sources)
            .await
            .context("Import failed; fix the cause and re-run, imports are idempotent")?
    };

    info!("✅ Import completed!");
    info!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
