use anyhow::Context;
use deforest_vision::PipelineConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    /// When set, uploads must contain exactly this many images.
    pub required_images: Option<usize>,
    pub max_stored_results: usize,
    pub pipeline_config_path: Option<PathBuf>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub narration_pause: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
            required_images: None,
            max_stored_results: 32,
            pipeline_config_path: None,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            narration_pause: deforest_vision::narrative::DEFAULT_PAUSE,
        }
    }
}

impl ServerConfig {
    /// Reads `DV_*` variables from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(bind) = value("DV_BIND") {
            cfg.bind_addr = bind;
        }
        if let Some(mb) = value("DV_MAX_UPLOAD_MB") {
            let mb: usize = mb.parse().with_context(|| format!("DV_MAX_UPLOAD_MB={mb}"))?;
            cfg.max_upload_bytes = mb
                .checked_mul(1024 * 1024)
                .with_context(|| format!("DV_MAX_UPLOAD_MB={mb} overflows the upload byte limit"))?;
        }
        if let Some(n) = value("DV_REQUIRED_IMAGES") {
            let n: usize = n.parse().with_context(|| format!("DV_REQUIRED_IMAGES={n}"))?;
            anyhow::ensure!(n >= 2, "DV_REQUIRED_IMAGES must be at least 2, got {n}");
            cfg.required_images = Some(n);
        }
        if let Some(n) = value("DV_MAX_RESULTS") {
            let n: usize = n.parse().with_context(|| format!("DV_MAX_RESULTS={n}"))?;
            cfg.max_stored_results = n.max(1);
        }
        cfg.pipeline_config_path = value("DV_PIPELINE_CONFIG").map(PathBuf::from);
        cfg.gemini_api_key = value("DV_GEMINI_API_KEY");
        if let Some(model) = value("DV_GEMINI_MODEL") {
            cfg.gemini_model = model;
        }
        if let Some(ms) = value("DV_NARRATION_PAUSE_MS") {
            let ms: u64 = ms.parse().with_context(|| format!("DV_NARRATION_PAUSE_MS={ms}"))?;
            cfg.narration_pause = Duration::from_millis(ms);
        }
        Ok(cfg)
    }

    /// Pipeline settings from `pipeline_config_path` (or defaults) plus `DV_*` overrides.
    pub fn load_pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.pipeline_config_path {
            Some(path) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("loading pipeline config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND);
        assert_eq!(cfg.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.required_images, None);
        assert!(cfg.gemini_api_key.is_none());
        assert_eq!(cfg.narration_pause, Duration::from_secs(1));
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("DV_BIND", "0.0.0.0:8080"),
            ("DV_MAX_UPLOAD_MB", "4"),
            ("DV_REQUIRED_IMAGES", "5"),
            ("DV_GEMINI_API_KEY", "  "),
            ("DV_NARRATION_PAUSE_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.max_upload_bytes, 4 * 1024 * 1024);
        assert_eq!(cfg.required_images, Some(5));
        assert!(cfg.gemini_api_key.is_none());
        assert!(cfg.narration_pause.is_zero());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[("DV_MAX_UPLOAD_MB", "lots")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("DV_REQUIRED_IMAGES", "1")])).is_err());
    }

    #[test]
    fn oversized_upload_limit_is_an_error() {
        let huge = usize::MAX.to_string();
        let err = ServerConfig::from_lookup(lookup(&[("DV_MAX_UPLOAD_MB", huge.as_str())])).unwrap_err();
        assert!(err.to_string().contains("DV_MAX_UPLOAD_MB"));
    }
}
