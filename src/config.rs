use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::{
    client::ApiSettings,
    pipeline::{PipelineSettings, DEFAULT_REQUEST_DELAY},
    types::AspectRatio,
};

const API_KEY: &str = "GEMINI_API_KEY";
const FALLBACK_API_KEY: &str = "GOOGLE_API_KEY";
const PROMPTS_PATH: &str = "PROMPTS_PATH";
const ASPECT_RATIO: &str = "ASPECT_RATIO";
const OUTPUT_DIR: &str = "OUTPUT_DIR";
const EXPORT_MODE: &str = "EXPORT_MODE";
const REQUEST_DELAY_SECS: &str = "REQUEST_DELAY_SECS";
const RESET_ON_RERUN: &str = "RESET_ON_RERUN";
const RUNS: &str = "RUNS";
const IMAGEN_MODEL: &str = "IMAGEN_MODEL";
const API_BASE: &str = "GEMINI_API_BASE";
const REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "imagen-3.0-generate-002";
const DEFAULT_OUTPUT_DIR: &str = "generated";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// What to write once a run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ExportMode {
    Files,
    Archive,
    #[default]
    Both,
    Disabled,
}

impl ExportMode {
    pub fn files(self) -> bool {
        matches!(self, Self::Files | Self::Both)
    }

    pub fn archive(self) -> bool {
        matches!(self, Self::Archive | Self::Both)
    }
}

impl FromStr for ExportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "files" => Self::Files,
            "archive" | "zip" => Self::Archive,
            "both" => Self::Both,
            "none" => Self::Disabled,
            other => anyhow::bail!("Unrecognized export mode: {other:?}"),
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub api: ApiSettings,
    pub prompts_path: PathBuf,
    pub aspect_ratio: AspectRatio,
    pub output_dir: PathBuf,
    pub export_mode: ExportMode,
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_key = get(API_KEY)
            .or_else(|| get(FALLBACK_API_KEY))
            .with_context(|| format!("Missing {API_KEY}"))?;
        let prompts_path = get(PROMPTS_PATH).with_context(|| format!("Missing {PROMPTS_PATH}"))?;

        let aspect_ratio = get(ASPECT_RATIO)
            .map(|value| value.parse::<AspectRatio>())
            .transpose()
            .with_context(|| format!("Invalid {ASPECT_RATIO}"))?
            .unwrap_or_default();
        let export_mode = get(EXPORT_MODE)
            .map(|value| value.parse::<ExportMode>())
            .transpose()
            .with_context(|| format!("Invalid {EXPORT_MODE}"))?
            .unwrap_or_default();
        let request_delay = parse_secs(get(REQUEST_DELAY_SECS), REQUEST_DELAY_SECS)?
            .unwrap_or(DEFAULT_REQUEST_DELAY);
        let request_timeout = parse_secs(get(REQUEST_TIMEOUT_SECS), REQUEST_TIMEOUT_SECS)?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let reset_on_rerun = get(RESET_ON_RERUN)
            .map(|value| parse_flag(&value))
            .transpose()
            .with_context(|| format!("Invalid {RESET_ON_RERUN}"))?
            .unwrap_or(false);
        let runs = get(RUNS)
            .map(|value| parse_runs(&value))
            .transpose()
            .with_context(|| format!("Invalid {RUNS}"))?
            .unwrap_or(1);

        Ok(Self {
            api: ApiSettings {
                api_key,
                api_base: get(API_BASE).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                model: get(IMAGEN_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                request_timeout,
            },
            prompts_path: PathBuf::from(prompts_path),
            aspect_ratio,
            output_dir: PathBuf::from(get(OUTPUT_DIR).unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())),
            export_mode,
            pipeline: PipelineSettings {
                request_delay,
                reset_on_rerun,
                runs,
                ..PipelineSettings::default()
            },
        })
    }
}

fn parse_secs(value: Option<String>, name: &str) -> Result<Option<Duration>> {
    value
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .with_context(|| format!("Invalid {name}: {value:?}"))
        })
        .transpose()
}

fn parse_runs(value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(runs) if runs > 0 => Ok(runs),
        _ => anyhow::bail!("Expected a positive count, got {value:?}"),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("Not a boolean: {other:?}"),
    }
}
