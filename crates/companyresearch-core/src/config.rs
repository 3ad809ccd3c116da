use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{ResearchError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "COMPANYRESEARCH_CONFIG";
const MODEL_ENV: &str = "OPENAI_MODEL";
const TEMPERATURE_ENV: &str = "OPENAI_TEMPERATURE";
const MAX_SEARCH_RESULTS: usize = 20;

/// Top-level configuration. Every table is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.llm.api_key_env)
    }

    /// Resolve the configured search secret value (from environment only).
    pub fn search_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.search.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `COMPANYRESEARCH_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    ///
    /// Only the implicit `config.toml` may be absent; defaults are used then.
    /// `OPENAI_MODEL` and `OPENAI_TEMPERATURE` override the file afterwards.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let (candidate, explicit) = resolve_path(path);
        let mut config = if !explicit && !candidate.exists() {
            Config::default()
        } else {
            let raw = fs::read_to_string(&candidate)
                .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
            Self::parse(&raw)?
        };

        apply_overrides(&mut config, |key| env::var(key).ok())?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse a TOML document without touching the environment.
    pub fn parse(raw: &str) -> Result<Config, ResearchError> {
        toml::from_str(raw).map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))
    }

    pub fn validate(config: &Config) -> Result<(), ResearchError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }
        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                config.llm.temperature
            )));
        }
        if config.search.max_results == 0 || config.search.max_results > MAX_SEARCH_RESULTS {
            return Err(ResearchError::InvalidConfiguration(format!(
                "search.max_results must be within 1..={MAX_SEARCH_RESULTS}, got {}",
                config.search.max_results
            )));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ResearchError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(model) = lookup(MODEL_ENV).filter(|value| !value.trim().is_empty()) {
        config.llm.model = model.trim().to_string();
    }

    if let Some(raw) = lookup(TEMPERATURE_ENV).filter(|value| !value.trim().is_empty()) {
        config.llm.temperature = raw.trim().parse::<f32>().map_err(|_| {
            ResearchError::InvalidConfiguration(format!("{TEMPERATURE_ENV} is not a number: {raw}"))
        })?;
    }

    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub api_key_env: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    pub max_results: usize,
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "TAVILY_API_KEY".to_string(),
            max_results: 5,
            base_url: "https://api.tavily.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            retention_days: 90,
        }
    }
}
