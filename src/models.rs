// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A base64-encoded image plus its mime type, the unit of exchange with the
/// generation gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub base64: String,
    pub mime_type: String,
}

/// A proposed visual asset. Immutable once created; destroyed only by
/// clearing the whole idea list when a new brief is submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetIdea {
    pub id: Uuid,
    pub section: String,
    pub description: String,
    pub prompt: String,
    pub animation_prompt: String,
}

impl AssetIdea {
    /// Transient loading entry shown while an ideas request is in flight.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            section: "Generating Idea...".to_string(),
            description: "Please wait while we come up with a new creative concept.".to_string(),
            prompt: String::new(),
            animation_prompt: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

/// Mutable generation state bound to exactly one `AssetIdea` via shared id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetState {
    pub id: Uuid,
    pub idea: AssetIdea,
    pub image_url: String,
    pub mime_type: String,
    pub status: AssetStatus,
    pub error: Option<String>,
    pub is_bookmarked: bool,
    pub video_url: Option<String>,
    pub is_editing: bool,
    pub is_animating: bool,
    pub is_removing_background: bool,
    pub generated_at: Option<DateTime<Utc>>,
}

impl AssetState {
    pub fn generating(idea: AssetIdea, is_bookmarked: bool) -> Self {
        Self {
            id: idea.id,
            idea,
            image_url: String::new(),
            mime_type: String::new(),
            status: AssetStatus::Generating,
            error: None,
            is_bookmarked,
            video_url: None,
            is_editing: false,
            is_animating: false,
            is_removing_background: false,
            generated_at: None,
        }
    }

    /// A secondary operation is already in flight for this asset.
    pub fn is_busy(&self) -> bool {
        self.is_editing || self.is_animating || self.is_removing_background
    }
}

/// Design critique produced alongside a fresh idea batch. Replaced wholesale
/// by the next brief; a load-more continuation keeps the previous one unless
/// the gateway supplies a new audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignAnalysis {
    pub score: u8,
    pub style: String,
    pub palette: Vec<String>,
    pub critique: String,
    pub improvements: Vec<String>,
}

/// The creative brief, in one of three shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerateInput {
    Text { value: String },
    File { image: ImagePayload, tips: Option<String> },
    Url { url: String },
}

/// Gateway response for an ideas-generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaBatch {
    pub ideas: Vec<AssetIdea>,
    pub analysis: Option<DesignAnalysis>,
}

/// Immutable read model handed to the presentation layer. Assets follow the
/// idea-list order so re-renders are stable.
#[derive(Debug, Clone, Serialize)]
pub struct StudioSnapshot {
    pub ideas: Vec<AssetIdea>,
    pub assets: Vec<AssetState>,
    pub analysis: Option<DesignAnalysis>,
    pub is_generating_ideas: bool,
    pub is_loading_more: bool,
    pub is_bulk_processing: bool,
    pub last_error: Option<String>,
}

/// Library filter by asset kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryKind {
    #[default]
    All,
    Image,
    Video,
}

/// Pure projection over the bookmarked set: kind filter plus case-insensitive
/// substring search over section and description. Never mutates anything.
pub fn filter_library(assets: &[AssetState], kind: LibraryKind, query: &str) -> Vec<AssetState> {
    let needle = query.trim().to_lowercase();
    assets
        .iter()
        .filter(|asset| match kind {
            LibraryKind::All => true,
            LibraryKind::Image => asset.video_url.is_none(),
            LibraryKind::Video => asset.video_url.is_some(),
        })
        .filter(|asset| {
            needle.is_empty()
                || asset.idea.section.to_lowercase().contains(&needle)
                || asset.idea.description.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}
