//! Record Sources
//!
//! Lazy, finite, ordered sequences of typed records. `open` starts a fresh
//! pass over the extract, so a source can be read more than once.

use crate::error::{ImportError, ImportResult};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

pub type RecordIter<T> = Box<dyn Iterator<Item = ImportResult<T>> + Send>;

pub trait RecordSource<T>: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    fn open(&self) -> ImportResult<RecordIter<T>>;
}

// ============================================================================
// CSV Extracts
// ============================================================================

/// CSV file with a header row. Rows are decoded one at a time.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    name: String,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }
}

impl<T> RecordSource<T> for CsvSource
where
    T: DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> ImportResult<RecordIter<T>> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| ImportError::source_error(self.name.clone(), e))?;

        let name = self.name.clone();
        let rows = reader
            .into_deserialize::<T>()
            .map(move |row| row.map_err(|e| ImportError::source_error(name.clone(), e)));

        Ok(Box::new(rows))
    }
}

// ============================================================================
// In-Memory Records
// ============================================================================

/// Records held in memory, for test fixtures.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MemorySource<T> {
    name: String,
    records: Vec<T>,
}

#[cfg(test)]
impl<T> MemorySource<T> {
    pub fn new(name: impl Into<String>, records: Vec<T>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

#[cfg(test)]
impl<T> RecordSource<T> for MemorySource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> ImportResult<RecordIter<T>> {
        Ok(Box::new(self.records.clone().into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{MovieRecord, RatingRecord, TagRecord};
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write csv");
        file.flush().expect("flush csv");
        file
    }

    fn read_all<T>(source: &dyn RecordSource<T>) -> Vec<ImportResult<T>> {
        source.open().expect("open source").collect()
    }

    #[test]
    fn test_movies_without_stats_columns_default_to_none() {
        let file = write_csv("movieId,title,genres\n1,Toy Story (1995),Adventure|Animation\n");
        let source = CsvSource::new(file.path());

        let rows = read_all::<MovieRecord>(&source);
        assert_eq!(rows.len(), 1);
        let movie = rows[0].as_ref().unwrap();
        assert_eq!(movie.movie_id, 1);
        assert_eq!(movie.title, "Toy Story (1995)");
        assert_eq!(movie.genres, "Adventure|Animation");
        assert_eq!(movie.total_ratings, None);
        assert_eq!(movie.avg_rating, None);
    }

    #[test]
    fn test_movies_with_partial_stats() {
        let file = write_csv(
            "movieId,title,genres,total_ratings,avg_rating,total_users,popularity_score\n\
             2,Jumanji (1995),Adventure,120,3.2,,0.8\n",
        );
        let source = CsvSource::new(file.path());

        let rows = read_all::<MovieRecord>(&source);
        let movie = rows[0].as_ref().unwrap();
        assert_eq!(movie.total_ratings, Some(120));
        assert_eq!(movie.avg_rating, Some(3.2));
        assert_eq!(movie.total_users, None);
        assert_eq!(movie.popularity_score, Some(0.8));
    }

    #[test]
    fn test_movie_counts_written_as_floats() {
        let file = write_csv(
            "movieId,title,genres,total_ratings,avg_rating,total_users,popularity_score\n\
             1,A,Action,12.0,4.2,7.0,0.5\n\
             2,B,Drama,,,,\n",
        );
        let source = CsvSource::new(file.path());

        let rows: Vec<MovieRecord> = read_all::<MovieRecord>(&source)
            .into_iter()
            .collect::<ImportResult<_>>()
            .unwrap();
        assert_eq!(rows[0].total_ratings, Some(12));
        assert_eq!(rows[0].total_users, Some(7));
        assert_eq!(rows[1].total_ratings, None);
        assert_eq!(rows[1].total_users, None);
    }

    #[test]
    fn test_fractional_count_is_rejected() {
        let file = write_csv("movieId,title,genres,total_ratings\n1,A,Action,12.5\n");
        let source = CsvSource::new(file.path());

        let rows = read_all::<MovieRecord>(&source);
        assert!(matches!(rows[0], Err(ImportError::Source { .. })));
    }

    #[test]
    fn test_ratings_accept_both_timestamp_styles() {
        let file = write_csv(
            "userId,movieId,rating,timestamp\n\
             1,2,3.5,1112486027\n\
             1,29,3.5,2005-04-02 23:31:16\n",
        );
        let source = CsvSource::new(file.path());

        let rows: Vec<RatingRecord> = read_all::<RatingRecord>(&source)
            .into_iter()
            .collect::<ImportResult<_>>()
            .unwrap();
        assert_eq!(rows[0].timestamp, 1112486027);
        assert_eq!(rows[1].timestamp, 1112484676);
    }

    #[test]
    fn test_empty_tag_cell_decodes_as_missing() {
        let file = write_csv(
            "userId,movieId,tag,timestamp\n\
             18,4141,Mark Waters,1240597180\n\
             65,208,,1368150078\n",
        );
        let source = CsvSource::new(file.path());

        let rows: Vec<TagRecord> = read_all::<TagRecord>(&source)
            .into_iter()
            .collect::<ImportResult<_>>()
            .unwrap();
        assert_eq!(rows[0].tag.as_deref(), Some("Mark Waters"));
        assert!(rows[1].tag_text().is_err());
    }

    #[test]
    fn test_undecodable_row_reports_source_name() {
        let file = write_csv("userId,movieId,rating,timestamp\nabc,2,3.5,1000\n");
        let source = CsvSource::new(file.path());

        let rows = read_all::<RatingRecord>(&source);
        match &rows[0] {
            Err(ImportError::Source { source_name, .. }) => {
                assert_eq!(source_name, source.name.as_str())
            }
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_fails_on_open() {
        let source = CsvSource::new("/nonexistent/ratings.csv");
        let result = RecordSource::<RatingRecord>::open(&source);
        assert!(matches!(result, Err(ImportError::Source { .. })));
    }

    #[test]
    fn test_csv_source_is_restartable() {
        let file = write_csv("movieId,title,genres\n1,A,Action\n2,B,Drama\n");
        let source = CsvSource::new(file.path());

        assert_eq!(read_all::<MovieRecord>(&source).len(), 2);
        assert_eq!(read_all::<MovieRecord>(&source).len(), 2);
    }
}
