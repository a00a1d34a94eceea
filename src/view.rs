//! Plain-text rendering of controls, the progress panel and the results.

use std::{ops::ControlFlow, time::Duration};

use crate::{
    progress::{ProgressSnapshot, ProgressTracker, Ticker},
    store::ResultStore,
    types::{AspectRatio, PipelineStatus, ResultEntry, ResultState},
};

pub(crate) const RENDER_PERIOD: Duration = Duration::from_secs(1);
const NO_TIME: &str = "--:--";
const BAR_WIDTH: usize = 30;

/// `m:ss`, truncating to whole seconds.
pub(crate) fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Countdowns round up so the last second still shows as `0:01`.
fn format_countdown(remaining: Option<Duration>) -> String {
    match remaining.filter(|d| !d.is_zero()) {
        Some(d) => {
            let secs = d.as_millis().div_ceil(1000);
            format_time(Duration::from_secs(u64::try_from(secs).unwrap_or(u64::MAX)))
        }
        None => NO_TIME.to_string(),
    }
}

fn bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// What the user may do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ControlsView {
    pub status: PipelineStatus,
    pub prompt_count: usize,
    pub success_count: usize,
    pub aspect_ratio: AspectRatio,
    pub zipping: bool,
}

impl ControlsView {
    pub fn loading_enabled(&self) -> bool {
        self.status != PipelineStatus::Generating
    }

    pub fn aspect_ratio_enabled(&self) -> bool {
        self.status != PipelineStatus::Generating
    }

    pub fn can_generate(&self) -> bool {
        matches!(self.status, PipelineStatus::Ready | PipelineStatus::Done) && self.prompt_count > 0
    }

    pub fn can_download(&self) -> bool {
        self.success_count > 0 && self.status != PipelineStatus::Generating && !self.zipping
    }

    pub fn generate_label(&self) -> &'static str {
        match self.status {
            PipelineStatus::Generating => "Generating...",
            PipelineStatus::Done => "Generate Again",
            _ => "Start Generation",
        }
    }

    pub fn download_label(&self) -> String {
        if self.zipping {
            "Zipping...".to_string()
        } else {
            format!("Download All ({})", self.success_count)
        }
    }

    pub fn status_line(&self) -> String {
        if self.prompt_count > 0 {
            format!("Loaded {} prompts. Ready.", self.prompt_count)
        } else {
            "Load a prompt folder to begin.".to_string()
        }
    }

    pub fn render(&self) -> String {
        let mark = |enabled: bool| if enabled { "" } else { " (disabled)" };
        [
            self.status_line(),
            format!("Load Prompts{}", mark(self.loading_enabled())),
            format!(
                "Aspect ratio: {}{}",
                self.aspect_ratio.label(),
                mark(self.aspect_ratio_enabled())
            ),
            format!("{}{}", self.generate_label(), mark(self.can_generate())),
            format!("{}{}", self.download_label(), mark(self.can_download())),
        ]
        .join("\n")
    }
}

/// The progress panel, shown only while a run is in progress.
pub(crate) fn render_progress(snapshot: &ProgressSnapshot, current_label: Option<&str>) -> Option<String> {
    if snapshot.status != PipelineStatus::Generating {
        return None;
    }
    let overall = snapshot.overall_percentage();
    let position = if snapshot.current_index < snapshot.total {
        snapshot.current_index + 1
    } else {
        snapshot.total
    };
    let mut lines = vec![
        format!("Overall Progress {} {:>3}%", bar(overall, BAR_WIDTH), overall.round()),
        format!(
            "Processing Prompt {position}/{} {} {:>3}%",
            snapshot.total,
            bar(f64::from(snapshot.sub_progress), BAR_WIDTH),
            snapshot.sub_progress
        ),
        format!(
            "Elapsed {} | Est. Remaining {} | Next Request In {} | Completed {}/{}",
            format_time(snapshot.elapsed),
            format_time(snapshot.estimated_remaining),
            format_countdown(snapshot.next_request_in),
            snapshot.completed(),
            snapshot.total
        ),
    ];
    if let Some(label) = current_label.filter(|_| snapshot.current_index < snapshot.total) {
        lines.push(format!("Current Prompt File: {label}"));
    }
    Some(lines.join("\n"))
}

const PREVIEW_CHARS: usize = 60;

fn preview(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// One result, as a status line followed by the prompt it came from.
pub(crate) fn render_card(entry: &ResultEntry) -> String {
    let status = match &entry.state {
        ResultState::Pending => format!("[pending]    {}", entry.label),
        ResultState::Generating => format!("[generating] {}", entry.label),
        ResultState::Success(image) => format!(
            "[done]       {} ({:.1} KB)",
            entry.label,
            image.len() as f64 / 1024.0
        ),
        ResultState::Error(_) => {
            let message = entry
                .error_message()
                .filter(|message| !message.trim().is_empty())
                .unwrap_or("Unknown error");
            format!("[error]      {}: {message}", entry.label)
        }
    };
    format!("{status}\n             {}", preview(&entry.text))
}

pub(crate) fn render_gallery(entries: &[ResultEntry]) -> String {
    let generated = entries.iter().filter(|e| e.image().is_some()).count();
    let mut out = format!("Results ({generated}/{} generated)", entries.len());
    for entry in entries {
        out.push('\n');
        out.push_str(&render_card(entry));
    }
    out
}

/// Prints the progress panel every `period` while a run is in progress.
pub(crate) fn spawn_progress_panel(
    progress: ProgressTracker,
    results: ResultStore,
    period: Duration,
) -> Ticker {
    Ticker::spawn(period, move || {
        let snapshot = progress.snapshot();
        let label = results.get(snapshot.current_index).map(|entry| entry.label);
        if let Some(panel) = render_progress(&snapshot, label.as_deref()) {
            println!("{panel}\n");
        }
        ControlFlow::Continue(())
    })
}
