use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_MODEL: &str = "sonar-pro";
pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

const APP_DIR: &str = ".sonar-cli";
const CONFIG_FILE: &str = "config.toml";
const CONVERSATIONS_DIR: &str = "conversations";

/// How multi-line paste is distinguished from typed Enter presses.
///
/// `Bracketed` relies on terminal paste-bracket signaling and is the primary
/// design; `Debounce` joins lines that arrive within a short quiet window and
/// exists for terminals without bracketed paste. The two are never active in
/// the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasteMode {
    Bracketed,
    Debounce,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub paste_mode: PasteMode,
    pub markdown: bool,
    pub color: bool,
    pub log_filter: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub data_dir: Option<String>,
    pub paste_mode: Option<PasteMode>,
    pub markdown: Option<bool>,
}

pub fn default_config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(APP_DIR).join(CONFIG_FILE),
        None => PathBuf::from(APP_DIR).join(CONFIG_FILE),
    }
}

pub fn default_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(APP_DIR).join(CONVERSATIONS_DIR),
        None => PathBuf::from(APP_DIR).join(CONVERSATIONS_DIR),
    }
}

pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file at '{}'", path.display()))?;
    toml::from_str::<ConfigFile>(&content).with_context(|| {
        format!(
            "invalid configuration in '{}'. Check field names and values.",
            path.display()
        )
    })
}

pub fn resolve_runtime_config(cli: &Cli, file: &ConfigFile) -> RuntimeConfig {
    let stdout_tty = std::io::stdout().is_terminal();
    let no_color = std::env::var_os("NO_COLOR").is_some();

    RuntimeConfig {
        api_key: cli.api_key.clone(),
        model: cli
            .model
            .clone()
            .or_else(|| file.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        base_url: cli
            .base_url
            .clone()
            .or_else(|| file.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        data_dir: cli
            .data_dir
            .clone()
            .map(PathBuf::from)
            .or_else(|| file.data_dir.clone().map(PathBuf::from))
            .unwrap_or_else(default_data_dir),
        paste_mode: cli
            .paste_mode
            .or(file.paste_mode)
            .unwrap_or(PasteMode::Bracketed),
        markdown: !cli.plain && file.markdown.unwrap_or(true),
        color: stdout_tty && !no_color && !cli.plain,
        log_filter: cli.log_filter.clone(),
    }
}

pub fn require_api_key(cfg: &RuntimeConfig) -> Result<String> {
    cfg.api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow::anyhow!("no API key configured. Set the PERPLEXITY_API_KEY environment variable.")
        })
}
