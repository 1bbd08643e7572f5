// THEORY:
// The visualizer is the web face of the engine. A browser uploads an ordered set
// of images, the server runs the sequence driver on them and keeps the result in
// memory under a fresh id. The page then pulls overlays, the trend chart and the
// comparison panel as PNGs, and can ask an optional narrator about the analysis.
//
// Everything HTTP-shaped lives behind the `web` feature. Without it the crate
// still builds and only exposes the configuration and a stub `start_server`.

pub mod config;

#[cfg(feature = "web")]
pub mod dto;
#[cfg(feature = "web")]
pub mod error;
#[cfg(feature = "web")]
pub mod gemini;
#[cfg(feature = "web")]
pub mod handlers;
#[cfg(feature = "web")]
mod page;
#[cfg(feature = "web")]
pub mod router;
#[cfg(feature = "web")]
pub mod state;
#[cfg(feature = "web")]
pub mod store;

pub use config::ServerConfig;

#[cfg(feature = "web")]
pub async fn start_server(cfg: ServerConfig) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use anyhow::Context;
    use deforest_vision::SequencePipeline;
    use deforest_vision::narrative::{Narrator, SYSTEM_INSTRUCTION};
    use std::sync::Arc;
    use tracing::{error, info, warn};

    let pipeline = SequencePipeline::new(&cfg.load_pipeline_config()?)?;

    let narrator: Option<Arc<dyn Narrator>> = match &cfg.gemini_api_key {
        Some(key) => {
            let gemini = gemini::GeminiNarrator::new(key.clone(), cfg.gemini_model.clone())?
                .with_system_instruction(SYSTEM_INSTRUCTION);
            Some(Arc::new(gemini))
        }
        None => {
            warn!("DV_GEMINI_API_KEY not set, chat endpoint disabled");
            None
        }
    };

    let bind_addr = cfg.bind_addr.clone();
    let app = router::create_router(state::AppState::new(cfg, pipeline, narrator));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("Visualizer server listening on http://{}", bind_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "server stopped");
        }
    });
    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(_cfg: ServerConfig) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for deforest_vision_visualizer"))
}
