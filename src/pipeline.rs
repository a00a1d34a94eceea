//! The generation run: one prompt at a time, with a fixed pause between
//! requests to stay under the API's rate limits.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::{
    client::ImageGenerator,
    error::{GenerationError, PipelineError},
    progress::{ProgressSnapshot, ProgressTracker},
    store::ResultStore,
    types::{AspectRatio, ImageData, PipelineStatus, PromptEntry, ResultState, RunSummary},
};

pub(crate) const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(15);
pub(crate) const UNKNOWN_ERROR: &str = "An unknown error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PipelineSettings {
    pub aspect_ratio: AspectRatio,
    pub request_delay: Duration,
    /// Put every entry back to pending before a re-run instead of keeping
    /// the previous run's outcomes until each prompt is reprocessed.
    pub reset_on_rerun: bool,
    /// How many times `run_all` goes over the prompt set.
    pub runs: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            request_delay: DEFAULT_REQUEST_DELAY,
            reset_on_rerun: false,
            runs: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Request(usize),
    Cooldown { next: usize },
    Finished,
}

/// Outcome of a single prompt.
#[must_use]
enum ItemOutput {
    Success,
    Error,
}

/// Owns the loaded prompts and drives runs over them.
pub(crate) struct GenerationPipeline {
    prompts: Vec<PromptEntry>,
    results: ResultStore,
    progress: ProgressTracker,
    settings: PipelineSettings,
}

impl GenerationPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            prompts: Vec::new(),
            results: ResultStore::default(),
            progress: ProgressTracker::new(settings.request_delay),
            settings,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.progress.status()
    }

    pub fn prompts(&self) -> &[PromptEntry] {
        &self.prompts
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.settings.aspect_ratio
    }

    /// Handle for reading results, including while a run is in progress.
    pub fn results(&self) -> ResultStore {
        self.results.clone()
    }

    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Replaces the prompt set and every result.
    pub fn load_prompts(&mut self, prompts: Vec<PromptEntry>) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        let prompts: Vec<_> = prompts
            .into_iter()
            .filter(|prompt| !prompt.text.trim().is_empty())
            .collect();
        self.results.replace_all(&prompts);
        self.progress.reset(prompts.len());
        info!("Loaded {} prompts", prompts.len());
        self.prompts = prompts;
        Ok(())
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.settings.aspect_ratio = aspect_ratio;
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.status() == PipelineStatus::Generating {
            return Err(PipelineError::Busy);
        }
        Ok(())
    }

    /// Runs every prompt once. A failed prompt never stops the run.
    pub async fn start<G: ImageGenerator>(&mut self, client: &G) -> Result<RunSummary, PipelineError> {
        self.ensure_idle()?;
        if self.prompts.is_empty() {
            debug!("Start requested without prompts, nothing to do");
            return Ok(RunSummary::default());
        }
        if self.settings.reset_on_rerun && self.status() == PipelineStatus::Done {
            self.results.reset_pending();
        }

        let total = self.prompts.len();
        let started_at = Instant::now();
        info!(
            "Starting generation of {total} images ({}, {:?} between requests)",
            self.settings.aspect_ratio, self.settings.request_delay
        );
        let mut guard = RunGuard::arm(&self.results, &self.progress);
        let run_ticker = self.progress.begin_run(total);

        let mut summary = RunSummary::default();
        let mut step = Step::Request(0);
        loop {
            step = match step {
                Step::Request(index) => {
                    match self.run_item(index, client).await {
                        ItemOutput::Success => summary.succeeded += 1,
                        ItemOutput::Error => summary.failed += 1,
                    }
                    if index + 1 < total {
                        Step::Cooldown { next: index + 1 }
                    } else {
                        Step::Finished
                    }
                }
                Step::Cooldown { next } => {
                    self.cool_down().await;
                    Step::Request(next)
                }
                Step::Finished => break,
            };
        }

        run_ticker.stop().await;
        self.progress.finish_run();
        guard.disarm();
        summary.elapsed = started_at.elapsed();
        info!(
            "Generation finished: {} succeeded, {} failed in {:.1}s",
            summary.succeeded,
            summary.failed,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    /// Runs the prompt set `runs` times, one summary per run. Later runs are
    /// the "Generate Again" path and honor `reset_on_rerun`.
    pub async fn run_all<G: ImageGenerator>(
        &mut self,
        client: &G,
    ) -> Result<Vec<RunSummary>, PipelineError> {
        let runs = self.settings.runs.max(1);
        let mut summaries = Vec::new();
        for run in 1..=runs {
            if self.prompts.is_empty() {
                break;
            }
            if run > 1 {
                info!("Generating again (run {run}/{runs})");
            }
            summaries.push(self.start(client).await?);
        }
        Ok(summaries)
    }

    async fn run_item<G: ImageGenerator>(&self, index: usize, client: &G) -> ItemOutput {
        let prompt = &self.prompts[index];
        self.results.update(index, ResultState::Generating);
        self.progress.begin_item(index);
        debug!("Generating {}/{}: {}", index + 1, self.prompts.len(), prompt.label);

        let ramp = self.progress.start_ramp();
        let outcome = self.run_impl(prompt, client).await;
        ramp.stop().await;

        match outcome {
            Ok(image) => {
                self.progress.complete_item();
                info!("Generated {} ({} bytes)", prompt.label, image.len());
                self.results.update(index, ResultState::Success(image));
                ItemOutput::Success
            }
            Err(err) => {
                warn!("Failed to generate image for prompt {:?}: {err}", prompt.label);
                self.results.update(index, ResultState::Error(describe(&err)));
                ItemOutput::Error
            }
        }
    }

    async fn run_impl<G: ImageGenerator>(
        &self,
        prompt: &PromptEntry,
        client: &G,
    ) -> Result<ImageData, GenerationError> {
        let encoded = client
            .generate(&prompt.text, self.settings.aspect_ratio)
            .await?;
        ImageData::from_base64(&encoded)
    }

    async fn cool_down(&self) {
        let delay = self.settings.request_delay;
        debug!("Waiting {delay:?} before the next request");
        let countdown = self.progress.start_countdown(delay);
        time::sleep(delay).await;
        countdown.stop().await;
        self.progress.end_countdown();
    }
}

fn describe(err: &GenerationError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        UNKNOWN_ERROR.to_string()
    } else {
        message
    }
}

/// Settles the shared state if a run is dropped before it finishes.
struct RunGuard {
    results: ResultStore,
    progress: ProgressTracker,
    armed: bool,
}

impl RunGuard {
    fn arm(results: &ResultStore, progress: &ProgressTracker) -> Self {
        Self {
            results: results.clone(),
            progress: progress.clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let interrupted = self.results.interrupt_generating();
        self.progress.finish_run();
        warn!("Generation run dropped before completion ({interrupted} request interrupted)");
    }
}
