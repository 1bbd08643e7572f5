// THEORY:
// A query is a question asked without images ("what was the deforestation rate
// in Borneo from 2015 to 2020?"). It goes straight to the narrator, which is
// asked to answer with a fixed JSON layout. The answer is read the same way as
// pair narrations: fences stripped, the outermost `{...}` span parsed.
//
// Reading rules:
// 1.  **Required fields**: `query_summary`, `direct_answer` and
//     `deforestation_rate` are always present in a structured answer. Missing
//     ones are filled with the query itself or a pending marker, and numbers are
//     kept as their text.
// 2.  **Optional sections**: Detailed analysis, statistics and chart data are
//     dropped when malformed instead of failing the whole answer.
// 3.  **No invented data**: When the answer is not JSON at all, the result keeps
//     an excerpt of the raw text plus whatever location and time period can be
//     read from the question. No rates or chart values are made up.

use crate::narrative::{NarrativeError, Narrator, json_span, strip_fences};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Shortest question worth sending.
pub const MIN_QUERY_LEN: usize = 10;

/// Placeholder for a required field the narrator left out.
pub const PENDING: &str = "Analysis in progress";

const EXCERPT_CHARS: usize = 300;

const LOCATION_PATTERNS: [&str; 2] = [
    r"(?i)\bin ([A-Za-z\s]+?)(?:\s+from|\s+between|\s+during|[?.!]*$)",
    r"(?i)\bof ([A-Za-z\s]+?)(?:\s+from|\s+between|\s+during|[?.!]*$)",
];

const PERIOD_PATTERNS: [&str; 3] = [
    r"(\d{4})\s*[-–]\s*(\d{4})",
    r"(?i)from (\d{4}) to (\d{4})",
    r"(?i)between (\d{4}) and (\d{4})",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDetails {
    #[serde(default, deserialize_with = "lenient_text")]
    pub current_situation: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub historical_trends: Option<String>,
    #[serde(default, deserialize_with = "lenient_texts")]
    pub primary_causes: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub environmental_impact: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub economic_factors: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub conservation_efforts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStatistics {
    #[serde(default, deserialize_with = "lenient_text")]
    pub estimated_forest_loss: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub annual_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub comparison_data: Option<String>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
}

/// Yearly series the narrator offers for charting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationData {
    #[serde(default, deserialize_with = "lenient_texts")]
    pub years: Vec<String>,
    #[serde(default)]
    pub deforestation_percentages: Vec<f64>,
    #[serde(default)]
    pub forest_cover_remaining: Vec<f64>,
}

/// A structured answer to a text query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_summary: String,
    pub direct_answer: String,
    pub deforestation_rate: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub time_period: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "or_none")]
    pub detailed_analysis: Option<QueryDetails>,
    #[serde(default, deserialize_with = "or_none")]
    pub statistics: Option<QueryStatistics>,
    #[serde(default, deserialize_with = "lenient_texts")]
    pub recommendations: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub sources_note: Option<String>,
    #[serde(default, deserialize_with = "or_none")]
    pub visualization_data: Option<VisualizationData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Structured(QueryAnalysis),
    /// The narrator answered, but not in the requested layout.
    Unstructured {
        query_summary: String,
        direct_answer: String,
        location: Option<String>,
        time_period: Option<String>,
    },
    Failed {
        query_summary: String,
        reason: String,
    },
}

/// Trims the query and rejects empty or too short ones.
pub fn validate_query(query: &str) -> Result<&str, NarrativeError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(NarrativeError::InvalidQuery {
            reason: "query cannot be empty".to_string(),
        });
    }
    if query.chars().count() < MIN_QUERY_LEN {
        return Err(NarrativeError::InvalidQuery {
            reason: format!("query must be at least {MIN_QUERY_LEN} characters"),
        });
    }
    Ok(query)
}

pub fn query_prompt(query: &str) -> String {
    format!(
        r#"You are an expert environmental analyst specializing in deforestation analysis.
A user has asked: "{query}"

Provide a comprehensive analysis that includes:
1. DIRECT ANSWER: Address the specific query with available data or estimates
2. CONTEXT: Explain the deforestation situation in the mentioned area and timeframe
3. DATA ANALYSIS: If specific rates or percentages are requested, give estimates you can support
4. CAUSES: Identify the main drivers of deforestation in the area
5. ENVIRONMENTAL IMPACT: Describe the ecological consequences
6. SOLUTIONS: Suggest mitigation strategies

Respond with a single JSON object:
{{
    "query_summary": "<brief summary of what was asked>",
    "direct_answer": "<direct response with specific data or estimates>",
    "deforestation_rate": "<X% per year or X hectares per year>",
    "time_period": "<time period from the query>",
    "location": "<geographic area mentioned>",
    "detailed_analysis": {{
        "current_situation": "<current deforestation status>",
        "historical_trends": "<historical patterns and changes>",
        "primary_causes": ["<cause>", "<cause>"],
        "environmental_impact": "<environmental consequences>",
        "economic_factors": "<economic drivers and impacts>",
        "conservation_efforts": "<existing conservation initiatives>"
    }},
    "statistics": {{
        "estimated_forest_loss": "<total estimated forest area lost>",
        "annual_rate": "<annual deforestation rate>",
        "comparison_data": "<comparison with other regions>",
        "confidence_level": <number 0-100>
    }},
    "recommendations": ["<recommendation>", "<recommendation>", "<recommendation>"],
    "sources_note": "<what the answer is based on>",
    "visualization_data": {{
        "years": ["<year>", "<year>"],
        "deforestation_percentages": [<number per year>],
        "forest_cover_remaining": [<number per year>]
    }}
}}

Use null for any value you cannot estimate."#
    )
}

/// Reads a narrator answer into a structured analysis.
pub fn parse_query_analysis(query: &str, text: &str) -> Option<QueryAnalysis> {
    let unfenced = strip_fences(text);
    let mut value: Value = serde_json::from_str(json_span(&unfenced)?).ok()?;
    let fields = value.as_object_mut()?;

    for (field, missing) in [
        ("query_summary", query),
        ("direct_answer", PENDING),
        ("deforestation_rate", PENDING),
    ] {
        let filled = match fields.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => continue,
            None | Some(Value::Null) | Some(Value::String(_)) => missing.to_string(),
            Some(other) => other.to_string(),
        };
        fields.insert(field.to_string(), Value::String(filled));
    }

    serde_json::from_value(value).ok()
}

/// Outcome for a narrator answer (or failure) to `query`.
pub fn query_outcome(query: &str, answer: Result<String, NarrativeError>) -> QueryOutcome {
    match answer {
        Ok(text) => match parse_query_analysis(query, &text) {
            Some(analysis) => QueryOutcome::Structured(analysis),
            None => QueryOutcome::Unstructured {
                query_summary: query.to_string(),
                direct_answer: excerpt(text.trim(), EXCERPT_CHARS),
                location: extract_location(query),
                time_period: extract_time_period(query),
            },
        },
        Err(e) => {
            warn!(error = %e, "query narration failed");
            QueryOutcome::Failed {
                query_summary: query.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Validates `query` and asks the narrator about it, without images.
pub async fn analyze_query(narrator: &dyn Narrator, query: &str) -> Result<QueryOutcome, NarrativeError> {
    let query = validate_query(query)?;
    debug!(query, "analyzing query");
    let answer = narrator.analyze(&query_prompt(query), &[]).await;
    Ok(query_outcome(query, answer))
}

/// Place named after "in" or "of", up to a time phrase or the end.
pub fn extract_location(query: &str) -> Option<String> {
    LOCATION_PATTERNS.iter().find_map(|pattern| {
        let caps = Regex::new(pattern).ok()?.captures(query)?;
        let place = caps.get(1)?.as_str().trim();
        (!place.is_empty()).then(|| place.to_string())
    })
}

/// `start-end` years mentioned in the query.
pub fn extract_time_period(query: &str) -> Option<String> {
    PERIOD_PATTERNS.iter().find_map(|pattern| {
        let caps = Regex::new(pattern).ok()?.captures(query)?;
        Some(format!("{}-{}", caps.get(1)?.as_str(), caps.get(2)?.as_str()))
    })
}

fn excerpt(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn text_of(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(text_of(Value::deserialize(deserializer)?))
}

fn lenient_texts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(text_of).collect(),
        other => text_of(other).into_iter().collect(),
    })
}

fn or_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).ok())
}
