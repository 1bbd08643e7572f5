//! Router configuration: routes, body limit, tracing and CORS.

use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::health_check))
        .route("/upload", post(handlers::upload))
        .route(
            "/results/:id",
            get(handlers::get_result).delete(handlers::delete_result),
        )
        .route("/results/:id/overlays/:index", get(handlers::get_overlay))
        .route("/results/:id/trend.png", get(handlers::get_trend_chart))
        .route("/results/:id/panel.png", get(handlers::get_panel))
        .route("/chat", post(handlers::chat))
        .route("/api/analyze", post(handlers::analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::dto::{AnalysisSummary, ChatResponse, QueryResponse};
    use crate::error::ApiError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use deforest_vision::SequencePipeline;
    use deforest_vision::core_modules::utils::image_helper::image_helper::encode_gray_png;
    use deforest_vision::narrative::{EncodedImage, NarrativeError, Narrator};
    use deforest_vision::query::QueryOutcome;
    use http_body_util::BodyExt;
    use image::{GrayImage, Luma};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "dv-test-boundary";

    struct FixedNarrator;

    #[async_trait]
    impl Narrator for FixedNarrator {
        async fn analyze(&self, _prompt: &str, images: &[EncodedImage]) -> Result<String, NarrativeError> {
            if images.is_empty() {
                return Ok(r#"{"query_summary": "Borneo loss", "direct_answer": "About 1.3% a year.",
                    "deforestation_rate": "1.3% per year", "recommendations": ["Protect peat"]}"#
                    .to_string());
            }
            Ok(format!(
                r#"```json
{{"deforestation_percentage": 6.5, "description": "saw {} images", "confidence": 90}}
```"#,
                images.len()
            ))
        }
    }

    fn app(config: ServerConfig, narrator: Option<Arc<dyn Narrator>>) -> Router {
        create_router(AppState::new(config, SequencePipeline::default(), narrator))
    }

    fn png(side: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(40, 40, |x, y| {
            if x < side && y < side { Luma([210]) } else { Luma([25]) }
        });
        encode_gray_png(&img).unwrap()
    }

    fn multipart(files: &[(&str, Vec<u8>)], prompt: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(prompt) = prompt {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\n{prompt}\r\n")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn upload_three(app: &Router) -> AnalysisSummary {
        let req = multipart(
            &[("a.png", png(8)), ("b.png", png(16)), ("c.png", png(24))],
            Some("forest loss?"),
        );
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    #[tokio::test]
    async fn health_and_index_respond() {
        let app = app(ServerConfig::default(), None);
        let resp = app.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, b"ok");

        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(html.contains("Deforest Vision"));
    }

    #[tokio::test]
    async fn upload_then_fetch_every_artifact() {
        let app = app(ServerConfig::default(), None);
        let summary = upload_three(&app).await;

        assert_eq!(summary.frames, ["a.png", "b.png", "c.png"]);
        assert_eq!(summary.pairs.len(), 2);
        assert_eq!(summary.pairs[0].period, "1-2");
        assert_eq!(summary.prompt.as_deref(), Some("forest loss?"));
        assert_eq!(summary.trend.compared_pairs, 2);
        let overlay_url = summary.overlay_urls[0].clone().unwrap();

        let id = summary.id;
        for uri in [
            format!("/results/{id}"),
            overlay_url,
            format!("/results/{id}/trend.png"),
            format!("/results/{id}/panel.png"),
        ] {
            let resp = app.clone().oneshot(get(&uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        }

        let resp = app.clone().oneshot(get(&format!("/results/{id}/overlays/3"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.clone().oneshot(get(&format!("/results/{id}/overlays/1"))).await.unwrap();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        let overlay = image::load_from_memory(&body_bytes(resp).await).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (40, 40));

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/results/{id}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = app.oneshot(get(&format!("/results/{id}"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn single_image_is_insufficient() {
        let app = app(ServerConfig::default(), None);
        let resp = app.oneshot(multipart(&[("a.png", png(8))], None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let err: ApiError = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(err.code, "INSUFFICIENT_INPUT");
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let app = app(ServerConfig::default(), None);
        let req = multipart(&[("a.png", png(8)), ("notes.txt", b"hello".to_vec())], None);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn required_image_count_is_enforced() {
        let config = ServerConfig {
            required_images: Some(5),
            ..ServerConfig::default()
        };
        let app = app(config, None);
        let req = multipart(&[("a.png", png(8)), ("b.png", png(16)), ("c.png", png(24))], None);
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn corrupt_upload_is_reported_as_skipped_pairs() {
        let app = app(ServerConfig::default(), None);
        let req = multipart(
            &[("a.png", png(8)), ("b.png", b"garbage".to_vec()), ("c.png", png(24))],
            None,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let summary: AnalysisSummary = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(summary.trend.skipped_pairs, 2);
        assert!(summary.overlay_urls.iter().all(Option::is_none));
    }

    fn chat_request(message: &str, id: uuid::Uuid) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "message": message, "analysis_id": id }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_without_narrator_is_unavailable() {
        let app = app(ServerConfig::default(), None);
        let summary = upload_three(&app).await;
        let resp = app.oneshot(chat_request("forest?", summary.id)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn chat_narrates_stored_analysis() {
        let config = ServerConfig {
            narration_pause: Duration::ZERO,
            ..ServerConfig::default()
        };
        let app = app(config, Some(Arc::new(FixedNarrator)));
        let summary = upload_three(&app).await;

        let resp = app
            .clone()
            .oneshot(chat_request("How much forest was lost?", summary.id))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let chat: ChatResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(chat.narratives.len(), 2);
        assert!(chat.reply.contains("Deforestation Analysis Results"));
        assert!(chat.reply.contains("saw 2 images"));

        let resp = app
            .clone()
            .oneshot(chat_request("any new buildings?", summary.id))
            .await
            .unwrap();
        let chat: ChatResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert!(chat.narratives.is_empty());
        assert!(chat.reply.contains("saw 3 images"));

        let resp = app
            .oneshot(chat_request("forest?", uuid::Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    fn query(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn text_query_is_answered() {
        let app = app(ServerConfig::default(), Some(Arc::new(FixedNarrator)));
        let resp = app
            .oneshot(query(r#"{"query": "Deforestation rate in Borneo from 2015 to 2020?"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let answer: QueryResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(answer.query, "Deforestation rate in Borneo from 2015 to 2020?");
        match answer.analysis {
            QueryOutcome::Structured(analysis) => {
                assert_eq!(analysis.deforestation_rate, "1.3% per year");
                assert_eq!(analysis.recommendations, ["Protect peat"]);
            }
            other => panic!("expected structured answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_query_is_validated_before_the_narrator() {
        let app = app(ServerConfig::default(), None);
        let resp = app.clone().oneshot(query(r#"{"query": "  "}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let err: ApiError = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(err.code, "INVALID_QUERY");

        let resp = app
            .oneshot(query(r#"{"query": "Forest loss in the Amazon since 2000"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
