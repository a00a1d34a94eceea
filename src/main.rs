mod client;
mod config;
mod error;
mod export;
mod pipeline;
mod progress;
mod prompt_source;
mod store;
mod types;
mod view;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use client::ImagenClient;
use config::{Config, ExportMode};
use export::Exporter;
use pipeline::GenerationPipeline;
use view::ControlsView;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn controls(pipeline: &GenerationPipeline, exporter: &Exporter) -> ControlsView {
    ControlsView {
        status: pipeline.status(),
        prompt_count: pipeline.prompts().len(),
        success_count: pipeline.results().counts().success,
        aspect_ratio: pipeline.aspect_ratio(),
        zipping: exporter.is_zipping(),
    }
}

async fn export_results(config: &Config, pipeline: &GenerationPipeline, exporter: &Exporter) {
    let successful = pipeline.results().successful();
    if successful.is_empty() || !controls(pipeline, exporter).can_download() {
        info!("No images to save");
        return;
    }
    if config.export_mode.files() {
        for (label, saved) in export::save_images(&config.output_dir, &successful).await {
            match saved {
                Ok(path) => println!("Saved {}", path.display()),
                Err(err) => error!("Couldn't save {label}: {err}"),
            }
        }
    }
    if config.export_mode.archive() {
        let dest = config.output_dir.join(export::ARCHIVE_NAME);
        match exporter.export_archive(successful, &dest).await {
            Ok(path) => println!("Saved archive {}", path.display()),
            Err(err) => {
                error!("Error creating ZIP file: {err}");
                eprintln!("Error creating ZIP file: {err}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let config = Config::from_env()?;
    let client = ImagenClient::new(&config.api).context("Couldn't create image client")?;
    let exporter = Exporter::default();
    let mut pipeline = GenerationPipeline::new(config.pipeline);
    pipeline.set_aspect_ratio(config.aspect_ratio)?;

    match prompt_source::load(&config.prompts_path).await {
        Ok(prompts) => pipeline.load_prompts(prompts)?,
        Err(err) => {
            error!("Couldn't load prompts: {err}");
            eprintln!("Error reading prompt files: {err}");
            return Ok(());
        }
    }

    let ready = controls(&pipeline, &exporter);
    println!("{}\n", ready.render());
    if !ready.can_generate() {
        warn!("No prompts found in {}", config.prompts_path.display());
        return Ok(());
    }

    println!("{}\n", ready.generate_label());
    let panel = view::spawn_progress_panel(pipeline.progress(), pipeline.results(), view::RENDER_PERIOD);
    let summaries = pipeline.run_all(&client).await;
    panel.stop().await;
    let summaries = summaries?;

    let snapshot = pipeline.snapshot();
    let elapsed: Duration = summaries.iter().map(|summary| summary.elapsed).sum();
    let failed: usize = summaries.iter().map(|summary| summary.failed).sum();
    println!(
        "{}\nCompleted {}/{} in {} ({} run(s))\n",
        view::render_gallery(&pipeline.results().snapshot()),
        snapshot.completed(),
        snapshot.total,
        view::format_time(elapsed),
        summaries.len()
    );
    let counts = pipeline.results().counts();
    info!(
        success = counts.success,
        error = counts.error,
        pending = counts.pending,
        generating = counts.generating,
        "Run complete"
    );
    if failed > 0 {
        warn!("{failed} requests failed across {} run(s)", summaries.len());
    }

    if config.export_mode != ExportMode::Disabled {
        export_results(&config, &pipeline, &exporter).await;
    }
    println!("{}", controls(&pipeline, &exporter).render());
    Ok(())
}
