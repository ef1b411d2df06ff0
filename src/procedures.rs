//! Import Procedures
//!
//! One procedure per entity type. Every procedure follows the same template:
//! ensure indexes, stream the extract, drop records failing the entity's
//! data-quality filter, batch, and apply each batch as one upsert
//! transaction. The entity-specific parts live in `EntityImport` impls.

use crate::batch::{BatchPlanner, RetryPolicy, UpsertTransaction};
use crate::error::ImportResult;
use crate::graph_store::{merge_edge, merge_node, GraphStore, IndexSpec, MergeOp, StoreSession};
use crate::records::{GenomeScoreRecord, GenomeTagRecord, MovieRecord, RatingRecord, TagRecord};
use crate::schema::{self, RelType};
use crate::source::RecordSource;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// Entity Templates
// ============================================================================

pub trait EntityImport: Send + Sync {
    type Record: Send + 'static;

    /// Plural name used in logs and reports, e.g. "movies".
    fn entity(&self) -> &'static str;

    fn indexes(&self) -> &'static [IndexSpec];

    /// Data-quality filter. Rejected records are dropped before batching.
    fn accept(&self, _record: &Self::Record) -> ImportResult<()> {
        Ok(())
    }

    fn merge_ops(&self, record: &Self::Record, ops: &mut Vec<MergeOp>);

    /// Called once after every batch has committed.
    fn finish(&self) {}
}

pub struct MoviesImport;

impl EntityImport for MoviesImport {
    type Record = MovieRecord;

    fn entity(&self) -> &'static str {
        "movies"
    }

    fn indexes(&self) -> &'static [IndexSpec] {
        &[schema::MOVIE_ID_INDEX]
    }

    fn merge_ops(&self, movie: &MovieRecord, ops: &mut Vec<MergeOp>) {
        ops.push(merge_node(
            schema::movie(movie.movie_id),
            vec![
                ("title", movie.title.clone().into()),
                ("genres", movie.genres.clone().into()),
                ("total_ratings", movie.total_ratings.unwrap_or(0).into()),
                ("avg_rating", movie.avg_rating.unwrap_or(0.0).into()),
                ("total_users", movie.total_users.unwrap_or(0).into()),
                ("popularity_score", movie.popularity_score.unwrap_or(0.0).into()),
            ],
        ));
    }
}

pub struct RatingsImport;

impl EntityImport for RatingsImport {
    type Record = RatingRecord;

    fn entity(&self) -> &'static str {
        "ratings"
    }

    fn indexes(&self) -> &'static [IndexSpec] {
        &[schema::USER_ID_INDEX]
    }

    fn merge_ops(&self, rating: &RatingRecord, ops: &mut Vec<MergeOp>) {
        ops.push(merge_edge(
            RelType::Rated.as_str(),
            schema::user(rating.user_id),
            schema::movie(rating.movie_id),
            vec![
                ("rating", rating.rating.into()),
                ("timestamp", rating.timestamp.into()),
            ],
        ));
    }
}

/// Freeform user tags. TAGGED collapses per (user, movie): when a user put
/// several tags on one movie, the last row's timestamp wins.
pub struct TagsImport;

impl EntityImport for TagsImport {
    type Record = TagRecord;

    fn entity(&self) -> &'static str {
        "tags"
    }

    fn indexes(&self) -> &'static [IndexSpec] {
        &[schema::TAG_NAME_INDEX, schema::USER_ID_INDEX]
    }

    fn accept(&self, tag: &TagRecord) -> ImportResult<()> {
        tag.tag_text().map(|_| ())
    }

    fn merge_ops(&self, tag: &TagRecord, ops: &mut Vec<MergeOp>) {
        // accept() guarantees the text is present
        let Ok(text) = tag.tag_text() else {
            return;
        };

        ops.push(merge_edge(
            RelType::Tagged.as_str(),
            schema::user(tag.user_id),
            schema::movie(tag.movie_id),
            vec![("timestamp", tag.timestamp.into())],
        ));
        ops.push(merge_edge(
            RelType::HasTag.as_str(),
            schema::movie(tag.movie_id),
            schema::tag_by_name(text),
            Vec::new(),
        ));
    }
}

/// Genome tag dictionary rows: reconciles genome tagIds with tag names.
pub struct GenomeTagsImport;

impl EntityImport for GenomeTagsImport {
    type Record = GenomeTagRecord;

    fn entity(&self) -> &'static str {
        "genome tags"
    }

    fn indexes(&self) -> &'static [IndexSpec] {
        &[schema::TAG_NAME_INDEX, schema::TAG_ID_INDEX]
    }

    fn accept(&self, tag: &GenomeTagRecord) -> ImportResult<()> {
        tag.tag_text().map(|_| ())
    }

    fn merge_ops(&self, tag: &GenomeTagRecord, ops: &mut Vec<MergeOp>) {
        let Ok(text) = tag.tag_text() else {
            return;
        };
        ops.push(merge_node(
            schema::tag_by_name(text),
            vec![(schema::TAG_ID, tag.tag_id.into())],
        ));
    }
}

/// Lookup from genome tagId to tag name.
#[derive(Debug, Clone, Default)]
pub struct TagDictionary {
    names: HashMap<i64, String>,
}

impl TagDictionary {
    /// Read the whole dictionary. Rows without text are skipped.
    pub fn load(source: &dyn RecordSource<GenomeTagRecord>) -> ImportResult<Self> {
        let mut names = HashMap::new();
        for row in source.open()? {
            let row = row?;
            if let Ok(text) = row.tag_text() {
                names.insert(row.tag_id, text.to_string());
            }
        }
        Ok(Self { names })
    }

    pub fn resolve(&self, tag_id: i64) -> Option<&str> {
        self.names.get(&tag_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(i64, String)> for TagDictionary {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

/// Movie/tag relevance scores. Tags are addressed by name through the
/// dictionary; unknown tagIds fall back to a tagId-keyed Tag.
pub struct GenomeScoresImport {
    tags: TagDictionary,
    unresolved: AtomicUsize,
}

impl GenomeScoresImport {
    pub fn new(tags: TagDictionary) -> Self {
        Self {
            tags,
            unresolved: AtomicUsize::new(0),
        }
    }
}

impl EntityImport for GenomeScoresImport {
    type Record = GenomeScoreRecord;

    fn entity(&self) -> &'static str {
        "genome scores"
    }

    fn indexes(&self) -> &'static [IndexSpec] {
        &[schema::TAG_NAME_INDEX, schema::TAG_ID_INDEX]
    }

    fn merge_ops(&self, score: &GenomeScoreRecord, ops: &mut Vec<MergeOp>) {
        let tag = match self.tags.resolve(score.tag_id) {
            Some(name) => schema::tag_by_name(name),
            None => {
                self.unresolved.fetch_add(1, Ordering::Relaxed);
                schema::tag_by_id(score.tag_id)
            }
        };

        ops.push(merge_edge(
            RelType::HasTag.as_str(),
            schema::movie(score.movie_id),
            tag,
            vec![("relevance", score.relevance.into())],
        ));
    }

    fn finish(&self) {
        let unresolved = self.unresolved.swap(0, Ordering::Relaxed);
        if unresolved > 0 {
            warn!(
                "⚠️  {} genome scores referenced tagIds missing from the tag dictionary; \
                 they were linked to tagId-keyed Tag nodes",
                unresolved
            );
        }
    }
}

// ============================================================================
// Procedure Driver
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcedureReport {
    pub entity: &'static str,
    pub records_read: usize,
    pub records_dropped: usize,
    pub records_imported: usize,
    pub batches: usize,
    pub retries: u32,
    pub elapsed_ms: u64,
}

impl ProcedureReport {
    fn new(entity: &'static str) -> Self {
        Self {
            entity,
            records_read: 0,
            records_dropped: 0,
            records_imported: 0,
            batches: 0,
            retries: 0,
            elapsed_ms: 0,
        }
    }
}

pub struct ImportProcedure<E> {
    template: E,
    planner: BatchPlanner,
    retry: RetryPolicy,
}

impl<E: EntityImport> ImportProcedure<E> {
    pub fn new(template: E, planner: BatchPlanner, retry: RetryPolicy) -> Self {
        Self {
            template,
            planner,
            retry,
        }
    }

    /// Run the whole procedure on its own session. The session is released
    /// whether the import succeeds or fails.
    pub async fn run(
        &self,
        store: &dyn GraphStore,
        source: &dyn RecordSource<E::Record>,
    ) -> ImportResult<ProcedureReport> {
        let entity = self.template.entity();
        let started = Instant::now();
        info!(
            "📥 Importing {} from {} (batch_size={})",
            entity,
            source.name(),
            self.planner.batch_size()
        );

        let mut session = store.open_session().await?;
        let result = self.import(session.as_mut(), source).await;
        let released = session.close().await;

        let mut report = match (result, released) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => {
                error!("❌ Failed to release session after importing {}: {}", entity, e);
                return Err(e);
            }
            (Err(e), released) => {
                if let Err(close_err) = released {
                    warn!("Failed to release session for {}: {}", entity, close_err);
                }
                error!("❌ Import of {} aborted: {}", entity, e);
                return Err(e);
            }
        };

        self.template.finish();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "✅ Imported {} {} in {} batches ({} dropped, {} retries)",
            report.records_imported, entity, report.batches, report.records_dropped, report.retries
        );
        Ok(report)
    }

    async fn import(
        &self,
        session: &mut dyn StoreSession,
        source: &dyn RecordSource<E::Record>,
    ) -> ImportResult<ProcedureReport> {
        let template = &self.template;
        let mut report = ProcedureReport::new(template.entity());

        for index in template.indexes() {
            session.ensure_index(index).await?;
        }

        let mut dropped = 0usize;
        {
            let accepted = source.open()?.filter(|row| match row {
                Ok(record) => match template.accept(record) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Dropping record: {}", e);
                        dropped += 1;
                        false
                    }
                },
                // Undecodable rows are not filtered; they abort the batch below
                Err(_) => true,
            });

            for batch in self.planner.plan(accepted) {
                let records = batch.into_iter().collect::<ImportResult<Vec<_>>>()?;

                let mut ops = Vec::with_capacity(records.len() * 2);
                for record in &records {
                    template.merge_ops(record, &mut ops);
                }

                report.retries += UpsertTransaction::new(ops)
                    .execute(session, &self.retry)
                    .await?;
                report.batches += 1;
                report.records_imported += records.len();
                info!("   Processed {} {}...", report.records_imported, template.entity());
            }
        }

        report.records_dropped = dropped;
        report.records_read = report.records_imported + dropped;
        Ok(report)
    }
}
