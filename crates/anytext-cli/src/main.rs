use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use anytext_contracts::events::EventWriter;
use anytext_contracts::jobs::{JobConfig, LayoutPriority};
use anytext_contracts::receipts::{build_receipt, write_receipt, JobResultSummary};
use anytext_engine::{AnyTextEngine, DashscopeClient, JobOutput};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "anytext-rs", version, about = "Run one AnyText image generation job")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(RunArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// JSON file holding a job configuration record.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    mask_image_url: Option<String>,
    #[arg(long)]
    base_image_url: Option<String>,
    #[arg(long)]
    appended_prompt: Option<String>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long)]
    layout_priority: Option<LayoutPriority>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long, allow_negative_numbers = true)]
    seed: Option<i64>,
    #[arg(long)]
    image_width: Option<u32>,
    #[arg(long)]
    image_height: Option<u32>,
    /// Falls back to DASHSCOPE_API_KEY when neither flag nor file sets it.
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("anytext-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_job(args),
    }
}

fn run_job(args: RunArgs) -> Result<i32> {
    let config = resolve_config(&args, |key| env::var(key).ok())?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(&events_path, Uuid::new_v4().to_string());

    let engine = AnyTextEngine::new(DashscopeClient::from_env()?, events);
    let output = engine.run_logged(&config)?;
    let artifacts = write_artifacts(&args.out, &output)?;

    println!(
        "task {} -> {}x{} image, {} mask, {} poll(s); receipt {}",
        output.handle,
        output.image.width(),
        output.image.height(),
        if output.mask.is_placeholder() {
            "placeholder"
        } else {
            "alpha"
        },
        output.poll_attempts,
        artifacts
            .get("receipt_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
    );
    Ok(0)
}

/// Defaults, then the `--config` file, then individual flags. The key falls
/// back to `DASHSCOPE_API_KEY` only when still empty after all of those.
fn resolve_config(
    args: &RunArgs,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<JobConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            serde_json::from_str::<JobConfig>(&raw)
                .with_context(|| format!("invalid job config in {}", path.display()))?
        }
        None => JobConfig::default(),
    };

    let text_overrides = [
        (&args.prompt, &mut config.prompt),
        (&args.mask_image_url, &mut config.mask_image_url),
        (&args.base_image_url, &mut config.base_image_url),
        (&args.appended_prompt, &mut config.appended_prompt),
        (&args.negative_prompt, &mut config.negative_prompt),
        (&args.api_key, &mut config.api_key),
    ];
    for (flag, field) in text_overrides {
        if let Some(value) = flag {
            *field = value.clone();
        }
    }
    if let Some(layout_priority) = args.layout_priority {
        config.layout_priority = layout_priority;
    }
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(width) = args.image_width {
        config.image_width = width;
    }
    if let Some(height) = args.image_height {
        config.image_height = height;
    }

    if config.api_key.trim().is_empty() {
        if let Some(key) = env_lookup("DASHSCOPE_API_KEY")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            config.api_key = key;
        }
    }
    Ok(config)
}

fn write_artifacts(out_dir: &Path, output: &JobOutput) -> Result<Map<String, Value>> {
    let image_path = out_dir.join("image.png");
    let mask_path = out_dir.join("mask.png");
    let receipt_path = out_dir.join("receipt.json");

    output
        .image
        .to_rgb8()
        .save(&image_path)
        .with_context(|| format!("failed to save {}", image_path.display()))?;
    output
        .mask
        .to_luma8()
        .save(&mask_path)
        .with_context(|| format!("failed to save {}", mask_path.display()))?;

    let artifacts = json!({
        "image_path": image_path.to_string_lossy(),
        "mask_path": mask_path.to_string_lossy(),
        "receipt_path": receipt_path.to_string_lossy(),
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    let summary = JobResultSummary {
        handle: output.handle.clone(),
        result_url: output.result_url.clone(),
        asset_sha256: output.asset_sha256.clone(),
        width: output.image.width() as u32,
        height: output.image.height() as u32,
        mask_kind: output.mask.kind(),
        poll_attempts: output.poll_attempts,
    };
    let receipt = build_receipt(&output.request, &summary, &artifacts);
    write_receipt(&receipt_path, &receipt)?;
    Ok(artifacts)
}
