// THEORY:
// The narrative layer is an optional second opinion. The measured percentages
// come from the change detector; a `Narrator` (usually a hosted multimodal model)
// is asked to describe each pair in words. Its answer is free text that
// hopefully contains JSON, so everything here is about asking precisely and
// reading defensively.
//
// A narrator that fails or answers nonsense produces a `Failed` or `Unparsed`
// outcome. No number is ever invented in its place.

use crate::core_modules::image_loader::Frame;
use crate::core_modules::utils::image_helper::image_helper::encode_gray_png;
use crate::pipeline::{PairOutcome, SequenceReport, pair_label, pair_period};
use async_trait::async_trait;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default pause between two narrator requests.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

pub const SYSTEM_INSTRUCTION: &str = "You are an expert in analyzing satellite images for \
environmental changes such as deforestation, urban growth, and vegetation patterns. Provide \
detailed, accurate, and insightful analysis based on the images provided.";

#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("narrator is not configured")]
    Unavailable,

    #[error("narrator request failed: {message}")]
    Request { message: String },

    #[error("narrator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("narrator returned no text")]
    EmptyResponse,

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error(transparent)]
    Vision(#[from] crate::error::VisionError),
}

/// An image ready to be attached to a narrator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl EncodedImage {
    pub fn png(image: &GrayImage) -> crate::error::Result<Self> {
        Ok(Self {
            mime_type: "image/png".to_string(),
            data: encode_gray_png(image)?,
        })
    }
}

/// Something that can look at images and answer a prompt in text.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn analyze(&self, prompt: &str, images: &[EncodedImage]) -> Result<String, NarrativeError>;
}

/// What the user is asking about, guessed from their wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFocus {
    Deforestation,
    UrbanGrowth,
    Vegetation,
    GeneralChange,
    Custom,
}

impl AnalysisFocus {
    pub fn from_prompt(prompt: &str) -> Self {
        let prompt = prompt.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| prompt.contains(w));

        if mentions(&["deforest", "forest", "tree", "logging"]) {
            AnalysisFocus::Deforestation
        } else if mentions(&["urban", "city", "building", "development", "construction"]) {
            AnalysisFocus::UrbanGrowth
        } else if mentions(&["vegetation", "green", "plant", "crop", "agriculture"]) {
            AnalysisFocus::Vegetation
        } else if mentions(&["compare", "difference", "change", "over time"]) {
            AnalysisFocus::GeneralChange
        } else {
            AnalysisFocus::Custom
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AnalysisFocus::Deforestation => "forest coverage",
            AnalysisFocus::UrbanGrowth => "urban development",
            AnalysisFocus::Vegetation => "vegetation changes",
            AnalysisFocus::GeneralChange => "general changes",
            AnalysisFocus::Custom => "the user's request",
        }
    }
}

/// Prompt for one consecutive pair. Indices are 0-based frame positions.
pub fn pair_prompt(focus: AnalysisFocus, earlier: usize, later: usize, user_prompt: &str) -> String {
    format!(
        r#"User question: "{user_prompt}"

Analyze these two satellite images of the same location taken at different times.
Image 1 is from period {a} and Image 2 is from period {b}.

Focus on {focus} and estimate:
1. Percentage of deforestation (0-100)
2. Areas where trees or forests have been removed
3. Signs of logging, clearing, or natural forest loss

Respond in JSON format:
{{
    "deforestation_percentage": <number 0-100>,
    "description": "<detailed description>",
    "confidence": <number 0-100>,
    "key_changes": "<main changes observed>",
    "affected_areas": "<description of affected regions>"
}}"#,
        a = earlier + 1,
        b = later + 1,
        focus = focus.description(),
    )
}

/// Prompt for a single request covering every frame at once.
pub fn overview_prompt(focus: AnalysisFocus, frame_count: usize, user_prompt: &str) -> String {
    match focus {
        AnalysisFocus::Custom => format!(
            r#"Analyze these {frame_count} satellite images based on this specific request: "{user_prompt}"

Describe what you observe that is relevant to the request, including changes between images."#
        ),
        _ => format!(
            r#"User request: "{user_prompt}"
Analysis focus: {focus}

Analyze these {frame_count} satellite images for {focus}.
Provide insights about changes, patterns, and trends you observe.

Consider temporal changes, spatial patterns, and any significant developments."#,
            focus = focus.description(),
        ),
    }
}

/// Structured answer for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeAssessment {
    pub deforestation_percentage: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub key_changes: Option<String>,
    #[serde(default)]
    pub affected_areas: Option<String>,
}

/// Reads a narrator answer. Accepts fenced or surrounded JSON, then falls back
/// to the first `<number>%` in the text.
pub fn parse_assessment(text: &str) -> Option<NarrativeAssessment> {
    let unfenced = strip_fences(text);
    if let Some(assessment) = json_span(&unfenced).and_then(|span| serde_json::from_str(span).ok()) {
        return Some(assessment);
    }

    first_percentage(&unfenced).map(|deforestation_percentage| NarrativeAssessment {
        deforestation_percentage,
        description: String::new(),
        confidence: None,
        key_changes: None,
        affected_areas: None,
    })
}

/// Drops markdown fence lines (```json, ```) from a model answer.
pub(crate) fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The text from the first `{` to the last `}`, if both exist in that order.
pub(crate) fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn first_percentage(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    for (i, _) in text.match_indices('%') {
        let mut start = i;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        // Leading dots are not part of the number ("...5%").
        while start < i && bytes[start] == b'.' {
            start += 1;
        }
        if start < i {
            if let Ok(value) = text[start..i].parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrativeOutcome {
    Assessed(NarrativeAssessment),
    Unparsed { raw: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairNarrative {
    pub label: String,
    pub period: String,
    pub outcome: NarrativeOutcome,
}

/// Asks the narrator about every consecutive pair, pausing between requests.
/// Pairs touching an undecodable frame come back as `Failed`.
pub async fn narrate_pairs(
    narrator: &dyn Narrator,
    frames: &[Frame],
    focus: AnalysisFocus,
    user_prompt: &str,
    pause: Duration,
) -> Vec<PairNarrative> {
    let mut narratives = Vec::with_capacity(frames.len().saturating_sub(1));
    for (i, pair) in frames.windows(2).enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        let outcome = match narrate_pair(narrator, &pair[0], &pair[1], focus, i, user_prompt).await {
            Ok(text) => match parse_assessment(&text) {
                Some(assessment) => NarrativeOutcome::Assessed(assessment),
                None => NarrativeOutcome::Unparsed { raw: text },
            },
            Err(e) => {
                warn!(pair = i + 1, error = %e, "narration failed");
                NarrativeOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        debug!(pair = i + 1, "pair narrated");
        narratives.push(PairNarrative {
            label: pair_label(i),
            period: pair_period(i),
            outcome,
        });
    }
    narratives
}

async fn narrate_pair(
    narrator: &dyn Narrator,
    earlier: &Frame,
    later: &Frame,
    focus: AnalysisFocus,
    index: usize,
    user_prompt: &str,
) -> Result<String, NarrativeError> {
    let images = [
        EncodedImage::png(earlier.require_image()?)?,
        EncodedImage::png(later.require_image()?)?,
    ];
    let prompt = pair_prompt(focus, index, index + 1, user_prompt);
    narrator.analyze(&prompt, &images).await
}

/// One request covering the whole series.
pub async fn narrate_overview(
    narrator: &dyn Narrator,
    frames: &[GrayImage],
    focus: AnalysisFocus,
    user_prompt: &str,
) -> Result<String, NarrativeError> {
    let images = frames
        .iter()
        .map(EncodedImage::png)
        .collect::<crate::error::Result<Vec<_>>>()?;
    let prompt = overview_prompt(focus, frames.len(), user_prompt);
    narrator.analyze(&prompt, &images).await
}

/// Markdown report combining measured percentages with narrated details.
pub fn compose_report(user_prompt: &str, report: &SequenceReport, narratives: &[PairNarrative]) -> String {
    let trend = &report.trend;
    let Some(peak) = trend.peak.as_ref() else {
        return "Unable to analyze deforestation patterns from the provided images.".to_string();
    };

    let mut out = String::new();
    let _ = writeln!(out, "Based on your question: \"{user_prompt}\"\n");
    let _ = writeln!(out, "## Deforestation Analysis Results\n");
    let _ = writeln!(out, "**Summary Statistics:**");
    let _ = writeln!(out, "- Total change across all periods: {:.2}%", trend.total);
    let _ = writeln!(out, "- Average change rate: {:.2}%", trend.average);
    let _ = writeln!(
        out,
        "- Highest change period: {} ({:.2}%)",
        peak.period, peak.percentage
    );
    let _ = writeln!(out, "- Number of time periods analyzed: {}", trend.compared_pairs);
    if trend.skipped_pairs > 0 {
        let _ = writeln!(out, "- Periods skipped: {}", trend.skipped_pairs);
    }

    let _ = writeln!(out, "\n**Period-by-Period Analysis:**");
    for pair in &report.pairs {
        match pair {
            PairOutcome::Compared(p) => {
                let _ = writeln!(out, "\n**{}:** {:.2}% change", p.period, p.percentage);
            }
            PairOutcome::Skipped { period, reason, .. } => {
                let _ = writeln!(out, "\n**{period}:** skipped ({reason})");
                continue;
            }
        }
        let narrated = narratives.iter().find(|n| n.period == pair.period());
        match narrated.map(|n| &n.outcome) {
            Some(NarrativeOutcome::Assessed(a)) => {
                if !a.description.is_empty() {
                    let _ = writeln!(out, "- {}", a.description);
                }
                if let Some(changes) = &a.key_changes {
                    let _ = writeln!(out, "- Key changes: {changes}");
                }
                let _ = writeln!(out, "- Narrated estimate: {:.2}%", a.deforestation_percentage);
                if let Some(confidence) = a.confidence {
                    let _ = writeln!(out, "- Confidence: {confidence:.0}%");
                }
            }
            Some(NarrativeOutcome::Unparsed { .. }) => {
                let _ = writeln!(out, "- Narration could not be read");
            }
            Some(NarrativeOutcome::Failed { reason }) => {
                let _ = writeln!(out, "- Narration unavailable: {reason}");
            }
            None => {}
        }
    }

    let level = if trend.average > 10.0 {
        "concerning"
    } else if trend.average > 5.0 {
        "moderate"
    } else {
        "minimal"
    };
    let recommendation = if peak.percentage > 15.0 {
        "Immediate conservation action recommended"
    } else if peak.percentage > 10.0 {
        "Monitoring recommended"
    } else {
        "Current forest loss appears manageable"
    };
    let _ = writeln!(out, "\n**Key Insights:**");
    let _ = writeln!(out, "- The analysis shows {level} levels of forest loss");
    let _ = writeln!(out, "- {recommendation}");
    let _ = writeln!(
        out,
        "- Overlays highlight affected areas in red, darker for larger regions"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SequencePipeline;
    use image::Luma;
    use std::sync::Mutex;

    /// Replays canned answers and records prompts.
    struct ScriptedNarrator {
        answers: Mutex<Vec<Result<String, NarrativeError>>>,
        prompts: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedNarrator {
        fn new(answers: Vec<Result<String, NarrativeError>>) -> Self {
            let mut answers = answers;
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Narrator for ScriptedNarrator {
        async fn analyze(&self, prompt: &str, images: &[EncodedImage]) -> Result<String, NarrativeError> {
            self.prompts.lock().unwrap().push((prompt.to_string(), images.len()));
            self.answers.lock().unwrap().pop().unwrap_or(Err(NarrativeError::EmptyResponse))
        }
    }

    fn frames(count: usize) -> Vec<GrayImage> {
        (0..count)
            .map(|i| GrayImage::from_fn(24, 24, |x, _| Luma([if x < 4 * i as u32 { 200 } else { 30 }])))
            .collect()
    }

    #[test]
    fn focus_follows_keyword_priority() {
        assert_eq!(AnalysisFocus::from_prompt("How much FOREST was lost?"), AnalysisFocus::Deforestation);
        assert_eq!(AnalysisFocus::from_prompt("city growth vs trees"), AnalysisFocus::Deforestation);
        assert_eq!(AnalysisFocus::from_prompt("new construction"), AnalysisFocus::UrbanGrowth);
        assert_eq!(AnalysisFocus::from_prompt("crop health"), AnalysisFocus::Vegetation);
        assert_eq!(AnalysisFocus::from_prompt("what changed over time"), AnalysisFocus::GeneralChange);
        assert_eq!(AnalysisFocus::from_prompt("hello"), AnalysisFocus::Custom);
    }

    #[test]
    fn fenced_json_is_parsed() {
        let text = "Here you go:\n```json\n{\"deforestation_percentage\": 12.5, \"description\": \"clearing in the north\", \"confidence\": 80}\n```";
        let a = parse_assessment(text).unwrap();
        assert_eq!(a.deforestation_percentage, 12.5);
        assert_eq!(a.description, "clearing in the north");
        assert_eq!(a.confidence, Some(80.0));
        assert_eq!(a.key_changes, None);
    }

    #[test]
    fn percentage_fallback_and_nothing() {
        let a = parse_assessment("Roughly 7.25% of the canopy disappeared, maybe 9%.").unwrap();
        assert_eq!(a.deforestation_percentage, 7.25);
        assert!(a.description.is_empty());

        assert!(parse_assessment("{not json} and no numbers").is_none());
        assert!(parse_assessment("").is_none());
    }

    #[test]
    fn pair_prompt_names_both_periods() {
        let prompt = pair_prompt(AnalysisFocus::Deforestation, 2, 3, "trees?");
        assert!(prompt.contains("period 3"));
        assert!(prompt.contains("period 4"));
        assert!(prompt.contains("\"deforestation_percentage\""));
        assert!(prompt.contains("User question: \"trees?\""));
    }

    #[tokio::test]
    async fn every_pair_gets_an_outcome() {
        let narrator = ScriptedNarrator::new(vec![
            Ok(r#"{"deforestation_percentage": 4, "description": "minor"}"#.to_string()),
            Ok("I cannot tell".to_string()),
            Err(NarrativeError::Status {
                status: 429,
                body: "quota".into(),
            }),
        ]);
        let mut series: Vec<Frame> = frames(4)
            .into_iter()
            .enumerate()
            .map(|(i, image)| Frame::Decoded {
                name: format!("{i}.png"),
                image,
            })
            .collect();
        series.push(Frame::Undecodable {
            name: "4.png".into(),
            reason: "truncated".into(),
        });
        let result = narrate_pairs(
            &narrator,
            &series,
            AnalysisFocus::Deforestation,
            "forest loss?",
            Duration::ZERO,
        )
        .await;

        assert_eq!(result.len(), 4);
        assert_eq!(result[0].period, "1-2");
        assert!(matches!(result[0].outcome, NarrativeOutcome::Assessed(_)));
        assert!(matches!(result[1].outcome, NarrativeOutcome::Unparsed { .. }));
        assert!(matches!(result[2].outcome, NarrativeOutcome::Failed { .. }));
        assert!(matches!(result[3].outcome, NarrativeOutcome::Failed { .. }));

        let prompts = narrator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.iter().all(|(_, images)| *images == 2));
    }

    #[tokio::test]
    async fn overview_sends_every_frame() {
        let narrator = ScriptedNarrator::new(vec![Ok("new roads in the east".to_string())]);
        let text = narrate_overview(&narrator, &frames(3), AnalysisFocus::UrbanGrowth, "city?")
            .await
            .unwrap();
        assert_eq!(text, "new roads in the east");
        let prompts = narrator.prompts.lock().unwrap();
        assert_eq!(prompts[0].1, 3);
        assert!(prompts[0].0.contains("urban development"));
    }

    #[test]
    fn report_reflects_trend_levels() {
        let report = SequencePipeline::default().run(&frames(3)).unwrap();
        let narratives = vec![PairNarrative {
            label: "1".into(),
            period: "1-2".into(),
            outcome: NarrativeOutcome::Assessed(NarrativeAssessment {
                deforestation_percentage: 3.0,
                description: "a new clearing".into(),
                confidence: Some(70.0),
                key_changes: Some("road".into()),
                affected_areas: None,
            }),
        }];
        let text = compose_report("forest?", &report, &narratives);
        assert!(text.starts_with("Based on your question: \"forest?\""));
        assert!(text.contains("**1-2:**"));
        assert!(text.contains("**2-3:**"));
        assert!(text.contains("- a new clearing"));
        assert!(text.contains("- Key changes: road"));
        assert!(text.contains("levels of forest loss"));
    }

    #[test]
    fn report_without_comparisons_says_so() {
        let images = vec![GrayImage::new(4, 4), GrayImage::new(5, 4)];
        let report = SequencePipeline::default().run(&images).unwrap();
        let text = compose_report("forest?", &report, &[]);
        assert_eq!(text, "Unable to analyze deforestation patterns from the provided images.");
    }
}
