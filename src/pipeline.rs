//! Import Pipeline
//!
//! Runs the entity procedures in a fixed order:
//! Movies → Ratings → Tags → GenomeTags → GenomeScores.
//!
//! Relationship imports create missing endpoints with only their key, so the
//! order is not needed for the final graph to be correct. Loading movies
//! first keeps the window in which Movie nodes lack attributes short.

use crate::batch::{BatchPlanner, RetryPolicy};
use crate::error::ImportResult;
use crate::graph_store::GraphStore;
use crate::procedures::{
    EntityImport, GenomeScoresImport, GenomeTagsImport, ImportProcedure, MoviesImport,
    ProcedureReport, RatingsImport, TagDictionary, TagsImport,
};
use crate::records::{GenomeScoreRecord, GenomeTagRecord, MovieRecord, RatingRecord, TagRecord};
use crate::source::RecordSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Records per transaction for each procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub movies: usize,
    pub ratings: usize,
    pub tags: usize,
    pub genome: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            movies: 1000,
            ratings: 5000,
            tags: 5000,
            genome: 5000,
        }
    }
}

pub struct PipelineSources {
    pub movies: Box<dyn RecordSource<MovieRecord>>,
    pub ratings: Box<dyn RecordSource<RatingRecord>>,
    pub tags: Box<dyn RecordSource<TagRecord>>,
    /// Optional tagId → name dictionary for genome scores.
    pub genome_tags: Option<Box<dyn RecordSource<GenomeTagRecord>>>,
    pub genome_scores: Box<dyn RecordSource<GenomeScoreRecord>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub procedures: Vec<ProcedureReport>,
}

impl ImportSummary {
    pub fn records_imported(&self) -> usize {
        self.procedures.iter().map(|p| p.records_imported).sum()
    }
}

pub struct ImportPipeline {
    movies: BatchPlanner,
    ratings: BatchPlanner,
    tags: BatchPlanner,
    genome: BatchPlanner,
    retry: RetryPolicy,
}

impl ImportPipeline {
    /// Fails up front if any batch size is zero.
    pub fn new(batch_sizes: BatchSizes, retry: RetryPolicy) -> ImportResult<Self> {
        Ok(Self {
            movies: BatchPlanner::new(batch_sizes.movies)?,
            ratings: BatchPlanner::new(batch_sizes.ratings)?,
            tags: BatchPlanner::new(batch_sizes.tags)?,
            genome: BatchPlanner::new(batch_sizes.genome)?,
            retry,
        })
    }

    fn procedure<E: EntityImport>(&self, template: E, planner: BatchPlanner) -> ImportProcedure<E> {
        ImportProcedure::new(template, planner, self.retry.clone())
    }

    pub async fn import_movies(
        &self,
        store: &dyn GraphStore,
        source: &dyn RecordSource<MovieRecord>,
    ) -> ImportResult<ProcedureReport> {
        self.procedure(MoviesImport, self.movies).run(store, source).await
    }

    pub async fn import_ratings(
        &self,
        store: &dyn GraphStore,
        source: &dyn RecordSource<RatingRecord>,
    ) -> ImportResult<ProcedureReport> {
        self.procedure(RatingsImport, self.ratings).run(store, source).await
    }

    pub async fn import_tags(
        &self,
        store: &dyn GraphStore,
        source: &dyn RecordSource<TagRecord>,
    ) -> ImportResult<ProcedureReport> {
        self.procedure(TagsImport, self.tags).run(store, source).await
    }

    /// Import the genome tag dictionary and return it for reconciling
    /// genome scores.
    pub async fn import_genome_tags(
        &self,
        store: &dyn GraphStore,
        source: &dyn RecordSource<GenomeTagRecord>,
    ) -> ImportResult<(ProcedureReport, TagDictionary)> {
        let report = self
            .procedure(GenomeTagsImport, self.genome)
            .run(store, source)
            .await?;
        let dictionary = TagDictionary::load(source)?;
        info!("📚 Loaded {} genome tag names", dictionary.len());
        Ok((report, dictionary))
    }

    pub async fn import_genome_scores(
        &self,
        store: &dyn GraphStore,
        source: &dyn RecordSource<GenomeScoreRecord>,
        tags: TagDictionary,
    ) -> ImportResult<ProcedureReport> {
        self.procedure(GenomeScoresImport::new(tags), self.genome)
            .run(store, source)
            .await
    }

    /// Run every procedure in order. The first failure aborts the run.
    pub async fn run(
        &self,
        store: &dyn GraphStore,
        sources: &PipelineSources,
    ) -> ImportResult<ImportSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("🚀 Starting import run {}", run_id);

        let mut procedures = Vec::with_capacity(5);
        procedures.push(self.import_movies(store, sources.movies.as_ref()).await?);
        procedures.push(self.import_ratings(store, sources.ratings.as_ref()).await?);
        procedures.push(self.import_tags(store, sources.tags.as_ref()).await?);

        let tags = match &sources.genome_tags {
            Some(source) => {
                let (report, dictionary) = self.import_genome_tags(store, source.as_ref()).await?;
                procedures.push(report);
                dictionary
            }
            None => TagDictionary::default(),
        };
        if tags.is_empty() {
            warn!("⚠️  No genome tag names available; genome scores will key Tag nodes by tagId");
        }

        procedures.push(
            self.import_genome_scores(store, sources.genome_scores.as_ref(), tags)
                .await?,
        );

        let summary = ImportSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            procedures,
        };
        info!(
            "🏁 Import run {} finished: {} records imported",
            run_id,
            summary.records_imported()
        );
        Ok(summary)
    }
}
