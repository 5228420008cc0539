use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod api;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod retention;
pub mod server;
pub mod store;
pub mod submit;
pub mod telemetry;
pub mod worker;

pub use error::Error;
pub use lifecycle::{JobState, StageOutcome};

/// A validated submission for one source URL, ready to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_url: String,
    pub display_name: String,
    pub model_hint: String,
}

/// One tracked unit of analysis work.
///
/// `state`, `progress`, `report` and `failure_reason` are written only through
/// [`lifecycle::apply`]; `deleted_at` only through the retention operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub owner: String,
    pub source_url: String,
    pub display_name: String,
    pub model_hint: String,
    pub state: JobState,
    pub progress: u8,
    pub report: Option<AnalysisReport>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Full analysis output, present once a job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub media_path: String,
    pub metadata: VideoMetadata,
    pub analysis: AiAnalysis,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub url: String,
    pub author: String,
    pub publish_time: String,
    pub description: String,
    pub category: String,
    pub stats: EngagementStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementStats {
    pub plays: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub favorites: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub score: u8,
    pub short_summary: String,
    pub detail_summary: String,
    pub suggestions: String,
}

/// A timestamped slice of the analyzed video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_secs: u32,
    pub end_secs: u32,
    pub transcript: String,
    pub translation: String,
    pub visual: String,
    pub preview_path: String,
}

/// Downloadable packaging of a completed job's report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBundle {
    pub job_id: Uuid,
    pub display_name: String,
    pub source_url: String,
    pub exported_at: DateTime<Utc>,
    pub report: AnalysisReport,
}
