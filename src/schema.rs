//! Graph Schema
//!
//! Labels, relationship types, key properties and indexes of the MovieLens
//! graph.

use crate::graph_store::{IndexSpec, NodeKey};

/// Node labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Movie,
    User,
    Tag,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Movie => "Movie",
            Label::User => "User",
            Label::Tag => "Tag",
        }
    }
}

/// Relationship types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelType {
    /// User rated a movie
    Rated,
    /// User tagged a movie
    Tagged,
    /// Movie carries a tag (freeform or genome)
    HasTag,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Rated => "RATED",
            RelType::Tagged => "TAGGED",
            RelType::HasTag => "HAS_TAG",
        }
    }
}

pub const MOVIE_ID: &str = "movieId";
pub const USER_ID: &str = "userId";
pub const TAG_NAME: &str = "name";
pub const TAG_ID: &str = "tagId";

pub const MOVIE_ID_INDEX: IndexSpec = IndexSpec::new("movie_id_index", "Movie", MOVIE_ID);
pub const USER_ID_INDEX: IndexSpec = IndexSpec::new("user_id_index", "User", USER_ID);
pub const TAG_NAME_INDEX: IndexSpec = IndexSpec::new("tag_name_index", "Tag", TAG_NAME);
pub const TAG_ID_INDEX: IndexSpec = IndexSpec::new("tag_id_index", "Tag", TAG_ID);

pub fn movie(movie_id: i64) -> NodeKey {
    NodeKey::new(Label::Movie.as_str(), MOVIE_ID, movie_id)
}

pub fn user(user_id: i64) -> NodeKey {
    NodeKey::new(Label::User.as_str(), USER_ID, user_id)
}

pub fn tag_by_name(name: &str) -> NodeKey {
    NodeKey::new(Label::Tag.as_str(), TAG_NAME, name)
}

/// Identity for genome tags that could not be reconciled to a name.
pub fn tag_by_id(tag_id: i64) -> NodeKey {
    NodeKey::new(Label::Tag.as_str(), TAG_ID, tag_id)
}
