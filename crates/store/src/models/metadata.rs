use modvault_intern::{InternPool, Text};
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

/// The only remote result code that denotes a usable artifact.
pub const RESULT_OK: i32 = 1;

/// Snapshot of an artifact's remote catalog entry.
///
/// Serialized inside every persisted record, and returned by the metadata
/// resolver. Whether an artifact is UGC isn't stored separately: it is
/// implied by the absence of a direct package URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModMetadata {
    pub id: u64,
    /// Remote result code; anything other than [`RESULT_OK`] is unusable.
    pub result: i32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Direct package URL for non-UGC artifacts.
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub preview_size: u64,
    #[serde(with = "super::unix")]
    pub created: UtcDateTime,
    #[serde(with = "super::unix")]
    pub updated: UtcDateTime,
    #[serde(default)]
    pub creator: u64,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub subscriptions: u32,
    #[serde(default)]
    pub favorited: i64,
    #[serde(default)]
    pub comments: i32,
    #[serde(default)]
    pub vote_score: f64,
    #[serde(default)]
    pub tags: Vec<Text>,
    /// Manifest id of the published content (UGC only).
    #[serde(default)]
    pub content_file: u64,
    #[serde(default)]
    pub can_subscribe: bool,
}

impl ModMetadata {
    pub fn is_valid(&self) -> bool {
        self.result == RESULT_OK
    }

    /// UGC artifacts are distributed as a depot manifest instead of a single
    /// package download.
    pub fn is_ugc(&self) -> bool {
        self.file_url.as_deref().is_none_or(str::is_empty) && self.is_valid()
    }

    /// Compare the fields that can change without the artifact's content
    /// changing. Returns `true` if any of them differ.
    pub fn secondary_fields_differ(&self, other: &Self) -> bool {
        self.title != other.title
            || self.description != other.description
            || self.views != other.views
            || self.subscriptions != other.subscriptions
            || self.favorited != other.favorited
            || self.comments != other.comments
            || self.preview_url != other.preview_url
            || self.tags != other.tags
            || self.vote_score.to_bits() != other.vote_score.to_bits()
    }

    /// Copy the secondary fields from a fresher snapshot, leaving everything
    /// content-related alone.
    pub fn absorb_secondary_fields(&mut self, other: &Self) {
        self.title.clone_from(&other.title);
        self.description.clone_from(&other.description);
        self.views = other.views;
        self.subscriptions = other.subscriptions;
        self.favorited = other.favorited;
        self.comments = other.comments;
        self.preview_url.clone_from(&other.preview_url);
        self.preview_size = other.preview_size;
        self.tags.clone_from(&other.tags);
        self.vote_score = other.vote_score;
    }

    /// Share tag strings through the pool.
    pub fn intern(&mut self, pool: &InternPool) {
        for tag in &mut self.tags {
            *tag = pool.intern(tag);
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn metadata(id: u64) -> ModMetadata {
        ModMetadata {
            id,
            result: RESULT_OK,
            title: Some(format!("Mod {id}")),
            description: Some("A mod".to_string()),
            file_url: None,
            file_size: 0,
            preview_url: Some(format!("https://images.example.com/{id}.png")),
            preview_size: 1024,
            created: UtcDateTime::from_unix_timestamp(1_500_000_000).unwrap(),
            updated: UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            creator: 76561198000000000,
            views: 10,
            subscriptions: 5,
            favorited: 1,
            comments: 0,
            vote_score: 0.5,
            tags: vec!["item".into(), "all_clients_require_mod".into()],
            content_file: 900 + id,
            can_subscribe: true,
        }
    }
}
