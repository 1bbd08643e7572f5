use anyhow::{Context, bail};
use clap::Parser;
use deforest_vision::core_modules::chart::{ChartStyle, render_comparison_panel, render_trend_chart};
use deforest_vision::core_modules::image_loader::{DEFAULT_EXTENSIONS, load_directory};
use deforest_vision::core_modules::utils::image_helper::image_helper::save_rgb_png;
use deforest_vision::pipeline::{PairSummary, TrendSummary};
use deforest_vision::{FailurePolicy, Frame, PipelineConfig, SequencePipeline};
use image::GrayImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs the change pipeline over a directory of ordered images and writes
/// overlays, charts and a JSON summary.
#[derive(Parser, Debug)]
#[command(name = "visual_tester", version, about)]
struct Args {
    /// Directory with the images, compared in filename order.
    input_dir: PathBuf,
    /// Directory that receives the results. Created if missing.
    output_dir: PathBuf,
    /// TOML pipeline configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Regions at or below this area are listed but not painted.
    #[arg(long)]
    min_fill_area: Option<f64>,
    /// Fail on the first pair that cannot be compared instead of skipping it.
    #[arg(long)]
    abort_on_error: bool,
}

#[derive(Debug, Serialize)]
struct AnalysisData {
    frames: Vec<String>,
    periods: Vec<String>,
    percentages: Vec<Option<f64>>,
    details: Vec<PairSummary>,
    total_change: f64,
    average_change: f64,
    max_change: Option<f64>,
    trend: TrendSummary,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let data = run(&Args::parse())?;
    println!(
        "Analyzed {} periods: total {:.2}%, average {:.2}%",
        data.periods.len(),
        data.total_change,
        data.average_change
    );
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<AnalysisData> {
    // --- 1. Configuration ---
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_env_overrides()?;
    if args.min_fill_area.is_some() {
        config.min_fill_area = args.min_fill_area;
    }
    if args.abort_on_error {
        config.sequence.failure_policy = FailurePolicy::Abort;
    }
    config.validate()?;
    let pipeline = SequencePipeline::new(&config)?;

    // --- 2. Input ---
    let frames = load_directory(&args.input_dir, DEFAULT_EXTENSIONS)?;
    if frames.is_empty() {
        bail!("no images found in {}", args.input_dir.display());
    }
    info!(count = frames.len(), dir = %args.input_dir.display(), "frames loaded");

    // --- 3. Analysis ---
    let report = pipeline.run_frames(&frames)?;

    // --- 4. Output ---
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    for pair in report.compared() {
        save_rgb_png(&pair.overlay, &output(&args.output_dir, &format!("overlay_{}.png", pair.label)))?;
    }

    let values: Vec<f64> = report.percentages().into_iter().flatten().collect();
    let chart = render_trend_chart(&values, &ChartStyle::default());
    save_rgb_png(&chart, &output(&args.output_dir, "deforestation_trend.png"))?;

    let blank = GrayImage::new(0, 0);
    let images: Vec<&GrayImage> = frames.iter().map(|f| f.image().unwrap_or(&blank)).collect();
    let panel = render_comparison_panel(&images, &report.overlays());
    save_rgb_png(&panel, &output(&args.output_dir, "deforestation_panel.png"))?;

    let data = AnalysisData {
        frames: frames.iter().map(Frame::name).map(str::to_owned).collect(),
        periods: report.periods(),
        percentages: report.percentages(),
        details: report.summaries(),
        total_change: report.trend.total,
        average_change: report.trend.average,
        max_change: report.trend.peak.as_ref().map(|p| p.percentage),
        trend: report.trend.clone(),
    };
    let json_path = output(&args.output_dir, "analysis_data.json");
    std::fs::write(&json_path, serde_json::to_string_pretty(&data)?)
        .with_context(|| format!("writing {}", json_path.display()))?;
    info!(dir = %args.output_dir.display(), "results written");
    Ok(data)
}

fn output(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
