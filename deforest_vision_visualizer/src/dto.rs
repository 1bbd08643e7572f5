//! JSON bodies of the HTTP API.

use crate::store::StoredAnalysis;
use deforest_vision::narrative::{AnalysisFocus, PairNarrative};
use chrono::{DateTime, Utc};
use deforest_vision::pipeline::{PairSummary, TrendSummary};
use deforest_vision::query::QueryOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: Uuid,
    pub prompt: Option<String>,
    pub frames: Vec<String>,
    pub pairs: Vec<PairSummary>,
    pub trend: TrendSummary,
    /// One entry per pair; `None` for skipped pairs.
    pub overlay_urls: Vec<Option<String>>,
    pub trend_chart_url: String,
    pub panel_url: String,
}

impl AnalysisSummary {
    pub fn from_stored(analysis: &StoredAnalysis) -> Self {
        let id = analysis.id;
        let pairs = analysis.report.summaries();
        let overlay_urls = analysis
            .report
            .pairs
            .iter()
            .map(|p| {
                p.overlay()
                    .map(|_| format!("/results/{id}/overlays/{}", p.label()))
            })
            .collect();
        Self {
            id,
            prompt: analysis.prompt.clone(),
            frames: analysis.frames.iter().map(|f| f.name().to_string()).collect(),
            pairs,
            trend: analysis.report.trend.clone(),
            overlay_urls,
            trend_chart_url: format!("/results/{id}/trend.png"),
            panel_url: format!("/results/{id}/panel.png"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub analysis_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub analysis_id: Uuid,
    pub focus: AnalysisFocus,
    pub reply: String,
    #[serde(default)]
    pub narratives: Vec<PairNarrative>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// Answer to a text-only question. `analysis.status` tells structured answers
/// from raw excerpts and failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub analysis: QueryOutcome,
    pub answered_at: DateTime<Utc>,
}
