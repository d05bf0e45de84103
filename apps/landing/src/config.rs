use std::{fs, io::ErrorKind, path::Path, time::Duration};

use anyhow::Context;
use chat_core::{
    gemini::{DEFAULT_API_BASE_URL, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT},
    GeminiOptions, DEFAULT_GREETING,
};
use scramble::{ScrambleConfig, ScrambleError, DEFAULT_RESOLVE_RATE, DEFAULT_TICK_INTERVAL};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "landing.toml";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the virtual assistant of a senior SEO consultant \
who applies AI to business workflows. Be professional, direct and results-oriented. Answer in at \
most two or three sentences. If asked about pricing, say every project is audited first and \
quoted after. If asked how to get in touch, suggest the contact form on this page.";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub system_instruction: String,
    pub greeting: String,
    pub request_timeout_secs: u64,
    pub scramble_tick_ms: u64,
    pub scramble_resolve_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            greeting: DEFAULT_GREETING.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            scramble_tick_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            scramble_resolve_rate: DEFAULT_RESOLVE_RATE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_key: Option<String>,
    api_base_url: Option<String>,
    model: Option<String>,
    system_instruction: Option<String>,
    greeting: Option<String>,
    request_timeout_secs: Option<u64>,
    scramble_tick_ms: Option<u64>,
    scramble_resolve_rate: Option<f64>,
}

impl Settings {
    /// Blank keys count as missing.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn gemini_options(&self) -> GeminiOptions {
        GeminiOptions {
            api_base_url: self.api_base_url.clone(),
            model: self.model.clone(),
            system_instruction: Some(self.system_instruction.clone()),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn scramble_config(&self) -> Result<ScrambleConfig, ScrambleError> {
        ScrambleConfig::with_timing(
            Duration::from_millis(self.scramble_tick_ms),
            self.scramble_resolve_rate,
        )
    }
}

/// Defaults, then the optional TOML file, then environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            apply_file_settings(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()));
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_key {
        settings.api_key = Some(v);
    }
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.model {
        settings.model = v;
    }
    if let Some(v) = file_cfg.system_instruction {
        settings.system_instruction = v;
    }
    if let Some(v) = file_cfg.greeting {
        settings.greeting = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs.filter(|secs| *secs > 0) {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.scramble_tick_ms {
        settings.scramble_tick_ms = v;
    }
    if let Some(v) = file_cfg.scramble_resolve_rate {
        settings.scramble_resolve_rate = v;
    }
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    for key in ["API_KEY", "GEMINI_API_KEY", "APP__API_KEY"] {
        if let Some(v) = env(key) {
            settings.api_key = Some(v);
        }
    }

    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__MODEL") {
        settings.model = v;
    }
    if let Some(v) = env("APP__SYSTEM_INSTRUCTION") {
        settings.system_instruction = v;
    }
    if let Some(v) = env("APP__GREETING") {
        settings.greeting = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Some(parsed) = v.parse::<u64>().ok().filter(|secs| *secs > 0) {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = env("APP__SCRAMBLE_TICK_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.scramble_tick_ms = parsed;
        }
    }
    if let Some(v) = env("APP__SCRAMBLE_RESOLVE_RATE") {
        if let Ok(parsed) = v.parse::<f64>() {
            settings.scramble_resolve_rate = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
