//! Route handlers. Each upload is analyzed on the blocking pool and kept in
//! memory under its own id, so concurrent requests never share state.

use crate::dto::{AnalysisSummary, ChatRequest, ChatResponse, QueryRequest, QueryResponse};
use crate::error::AppError;
use crate::page::INDEX_HTML;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use deforest_vision::core_modules::chart::{ChartStyle, render_comparison_panel, render_trend_chart};
use deforest_vision::core_modules::image_loader::{DEFAULT_EXTENSIONS, has_allowed_extension};
use deforest_vision::core_modules::utils::image_helper::image_helper::encode_rgb_png;
use deforest_vision::narrative::{AnalysisFocus, NarrativeError, compose_report, narrate_overview, narrate_pairs};
use deforest_vision::pipeline::MIN_FRAMES;
use deforest_vision::query::{analyze_query, validate_query};
use deforest_vision::{Frame, VisionError};
use image::GrayImage;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type HandlerResult<T> = Result<Json<T>, AppError>;

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AnalysisSummary>), AppError> {
    let mut files: Vec<(String, Bytes)> = Vec::new();
    let mut prompt = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("files") => {
                let Some(file_name) = field.file_name().map(str::to_owned) else {
                    return Err(AppError::BadRequest("file part without a filename".into()));
                };
                if !has_allowed_extension(&file_name, DEFAULT_EXTENSIONS) {
                    return Err(AppError::BadRequest(format!(
                        "unsupported file type: {file_name} (allowed: {})",
                        DEFAULT_EXTENSIONS.join(", ")
                    )));
                }
                files.push((file_name, field.bytes().await?));
            }
            Some("prompt") => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    prompt = Some(text);
                }
            }
            _ => {}
        }
    }

    if files.len() < MIN_FRAMES {
        return Err(VisionError::InsufficientInput {
            provided: files.len(),
            required: MIN_FRAMES,
        }
        .into());
    }
    if let Some(required) = state.config.required_images {
        if files.len() != required {
            return Err(AppError::BadRequest(format!(
                "exactly {required} images are required, got {}",
                files.len()
            )));
        }
    }

    let pipeline = state.pipeline.clone();
    let (frames, report) = tokio::task::spawn_blocking(move || {
        let frames: Vec<Frame> = files
            .iter()
            .map(|(name, bytes)| Frame::from_bytes(name.clone(), bytes))
            .collect();
        pipeline.run_frames(&frames).map(|report| (frames, report))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    let analysis = state.store.insert(prompt, frames, report);
    info!(id = %analysis.id, pairs = analysis.report.pairs.len(), "analysis stored");
    Ok((StatusCode::CREATED, Json(AnalysisSummary::from_stored(&analysis))))
}

fn lookup(state: &AppState, id: Uuid) -> Result<Arc<crate::store::StoredAnalysis>, AppError> {
    state
        .store
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("analysis {id} not found")))
}

fn png_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], bytes).into_response()
}

pub async fn get_result(State(state): State<AppState>, Path(id): Path<Uuid>) -> HandlerResult<AnalysisSummary> {
    let analysis = lookup(&state, id)?;
    Ok(Json(AnalysisSummary::from_stored(&analysis)))
}

pub async fn delete_result(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    if state.store.remove(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("analysis {id} not found")))
    }
}

/// `index` is the 1-based pair label.
pub async fn get_overlay(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Response, AppError> {
    let analysis = lookup(&state, id)?;
    let overlay = index
        .checked_sub(1)
        .and_then(|i| analysis.report.pairs.get(i))
        .and_then(|pair| pair.overlay())
        .ok_or_else(|| AppError::NotFound(format!("no overlay {index} for analysis {id}")))?;
    Ok(png_response(encode_rgb_png(overlay)?))
}

pub async fn get_trend_chart(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, AppError> {
    let analysis = lookup(&state, id)?;
    let values: Vec<f64> = analysis.report.percentages().into_iter().flatten().collect();
    let chart = render_trend_chart(&values, &ChartStyle::default());
    Ok(png_response(encode_rgb_png(&chart)?))
}

pub async fn get_panel(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, AppError> {
    let analysis = lookup(&state, id)?;
    let blank = GrayImage::new(0, 0);
    let frames: Vec<&GrayImage> = analysis
        .frames
        .iter()
        .map(|f| f.image().unwrap_or(&blank))
        .collect();
    let overlays = analysis.report.overlays();
    let panel = render_comparison_panel(&frames, &overlays);
    Ok(png_response(encode_rgb_png(&panel)?))
}

/// Narrates a stored analysis. Forest questions get a per-pair report; other
/// questions get a single overview answer.
pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> HandlerResult<ChatResponse> {
    let narrator = state.narrator.clone().ok_or(NarrativeError::Unavailable)?;
    let analysis = lookup(&state, request.analysis_id)?;
    let focus = AnalysisFocus::from_prompt(&request.message);

    let (reply, narratives) = if focus == AnalysisFocus::Deforestation {
        let narratives = narrate_pairs(
            narrator.as_ref(),
            &analysis.frames,
            focus,
            &request.message,
            state.config.narration_pause,
        )
        .await;
        (compose_report(&request.message, &analysis.report, &narratives), narratives)
    } else {
        let images: Vec<GrayImage> = analysis.frames.iter().filter_map(Frame::image).cloned().collect();
        let reply = narrate_overview(narrator.as_ref(), &images, focus, &request.message).await?;
        (reply, Vec::new())
    };

    Ok(Json(ChatResponse {
        analysis_id: analysis.id,
        focus,
        reply,
        narratives,
    }))
}

/// Answers a question about deforestation without any images.
pub async fn analyze(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> HandlerResult<QueryResponse> {
    let query = validate_query(&request.query)?.to_string();
    let narrator = state.narrator.clone().ok_or(NarrativeError::Unavailable)?;
    let analysis = analyze_query(narrator.as_ref(), &query).await?;
    info!(query = %query, "query analyzed");
    Ok(Json(QueryResponse {
        query,
        analysis,
        answered_at: chrono::Utc::now(),
    }))
}
