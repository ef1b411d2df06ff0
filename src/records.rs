//! Typed rows of the MovieLens extracts.

use crate::error::{ImportError, ImportResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MovieRecord {
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    pub title: String,
    #[serde(default)]
    pub genres: String,
    #[serde(default, deserialize_with = "optional_count")]
    pub total_ratings: Option<i64>,
    #[serde(default)]
    pub avg_rating: Option<f64>,
    #[serde(default, deserialize_with = "optional_count")]
    pub total_users: Option<i64>,
    #[serde(default)]
    pub popularity_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RatingRecord {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    pub rating: f64,
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TagRecord {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: i64,
}

impl TagRecord {
    /// Tag text with surrounding whitespace removed, if any remains.
    pub fn tag_text(&self) -> ImportResult<&str> {
        self.tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ImportError::MalformedRecord(format!(
                    "tag by user {} on movie {} has no text",
                    self.user_id, self.movie_id
                ))
            })
    }
}

/// Row of the genome tag dictionary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenomeTagRecord {
    #[serde(rename = "tagId")]
    pub tag_id: i64,
    #[serde(default)]
    pub tag: Option<String>,
}

impl GenomeTagRecord {
    pub fn tag_text(&self) -> ImportResult<&str> {
        self.tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ImportError::MalformedRecord(format!("genome tag {} has no text", self.tag_id))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenomeScoreRecord {
    #[serde(rename = "movieId")]
    pub movie_id: i64,
    #[serde(rename = "tagId")]
    pub tag_id: i64,
    pub relevance: f64,
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamps appear either as unix seconds or as `YYYY-MM-DD HH:MM:SS`
/// (UTC) depending on the MovieLens distribution. Both become unix seconds.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Counts in the processed extract may be written as `12` or `12.0`.
/// Blank cells are missing values.
fn optional_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_integral(raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid count `{}`", raw))),
    }
}

// pandas writes integer columns with NaN neighbours as floats
fn parse_integral(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && value.fract() == 0.0)
        .map(|value| value as i64)
}

pub fn parse_timestamp(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if let Some(secs) = parse_integral(raw) {
        return Ok(secs);
    }
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|e| format!("invalid timestamp `{}`: {}", raw, e))
}
