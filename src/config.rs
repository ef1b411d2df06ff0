use crate::batch::RetryPolicy;
use crate::pipeline::BatchSizes;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DATASET_PATH: &str = "data/movielens";
const PROCESSED_DATASET_PATH: &str = "data/movielens/processed";

#[derive(Debug, Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_connect_retries: u32,
    pub movies_path: PathBuf,
    pub ratings_path: PathBuf,
    pub tags_path: PathBuf,
    pub genome_tags_path: PathBuf,
    pub genome_scores_path: PathBuf,
    pub batch_sizes: BatchSizes,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let path = |key: &str, dir: &str, file: &str| {
            lookup(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(dir).join(file))
        };
        let defaults = BatchSizes::default();

        Ok(Config {
            neo4j_uri: string("NEO4J_URI", "bolt://localhost:7687"),
            neo4j_user: string("NEO4J_USER", "neo4j"),
            neo4j_password: string("NEO4J_PASSWORD", "password"),
            neo4j_connect_retries: parse_or(&lookup, "NEO4J_CONNECT_RETRIES", 4)?,
            movies_path: path("MOVIES_PATH", PROCESSED_DATASET_PATH, "movies_processed.csv"),
            ratings_path: path("RATINGS_PATH", PROCESSED_DATASET_PATH, "ratings_processed.csv"),
            tags_path: path("TAGS_PATH", DATASET_PATH, "tag.csv"),
            genome_tags_path: path("GENOME_TAGS_PATH", DATASET_PATH, "genome_tags.csv"),
            genome_scores_path: path("GENOME_SCORES_PATH", DATASET_PATH, "genome_scores.csv"),
            batch_sizes: BatchSizes {
                movies: parse_or(&lookup, "MOVIES_BATCH_SIZE", defaults.movies)?,
                ratings: parse_or(&lookup, "RATINGS_BATCH_SIZE", defaults.ratings)?,
                tags: parse_or(&lookup, "TAGS_BATCH_SIZE", defaults.tags)?,
                genome: parse_or(&lookup, "GENOME_BATCH_SIZE", defaults.genome)?,
            },
            max_attempts: parse_or(&lookup, "IMPORT_MAX_ATTEMPTS", 4)?,
            retry_base_delay: Duration::from_millis(parse_or(&lookup, "IMPORT_RETRY_BASE_MS", 1000)?),
            dry_run: parse_or(&lookup, "IMPORT_DRY_RUN", false)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_base_delay)
    }

    /// Backoff for the initial Neo4j connection: 1s, 2s, 4s, ...
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.neo4j_connect_retries, Duration::from_secs(1))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.neo4j_uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j_user, "neo4j");
        assert_eq!(config.batch_sizes, BatchSizes::default());
        assert_eq!(config.batch_sizes.movies, 1000);
        assert_eq!(config.batch_sizes.ratings, 5000);
        assert_eq!(config.tags_path, PathBuf::from("data/movielens/tag.csv"));
        assert_eq!(
            config.movies_path,
            PathBuf::from("data/movielens/processed/movies_processed.csv")
        );
        assert_eq!(config.retry_policy().max_attempts(), 4);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("NEO4J_URI", "bolt://graph:7687"),
            ("RATINGS_BATCH_SIZE", "250"),
            ("IMPORT_MAX_ATTEMPTS", "1"),
            ("IMPORT_RETRY_BASE_MS", "10"),
            ("IMPORT_DRY_RUN", "true"),
            ("TAGS_PATH", "/tmp/tags.csv"),
        ])
        .unwrap();

        assert_eq!(config.neo4j_uri, "bolt://graph:7687");
        assert_eq!(config.batch_sizes.ratings, 250);
        assert_eq!(config.batch_sizes.movies, 1000);
        assert_eq!(config.retry_policy().max_attempts(), 1);
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
        assert!(config.dry_run);
        assert_eq!(config.tags_path, PathBuf::from("/tmp/tags.csv"));
    }

    #[test]
    fn test_large_connect_retry_count_backs_off_without_overflow() {
        let config = config_from(&[("NEO4J_CONNECT_RETRIES", "100")]).unwrap();
        let policy = config.connect_policy();

        assert_eq!(policy.max_attempts(), 100);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        // Saturates instead of overflowing
        assert!(policy.delay_for(99) >= policy.delay_for(32));
    }

    #[test]
    fn test_invalid_number_is_reported_with_key() {
        let err = config_from(&[("MOVIES_BATCH_SIZE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("MOVIES_BATCH_SIZE"));
    }
}
