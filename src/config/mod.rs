use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::Category;
use crate::rules::RuleGroup;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub ai: AiConfig,
    pub rules: RulesConfig,
    pub cache: CacheConfig,
    pub synth: SynthConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub fallback_models: Vec<String>,
    pub modes: Vec<Category>,
    pub api_key_env: String,
    pub base_url: String,
    pub max_concurrency: usize,
    pub max_prompt_chars: usize,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulesConfig {
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthConfig {
    pub command: String,
    pub output: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            ai: AiConfig {
                enabled: true,
                model: None,
                fallback_models: crate::ai::DEFAULT_FALLBACK_MODELS
                    .iter()
                    .map(|m| m.to_string())
                    .collect(),
                modes: Vec::new(),
                api_key_env: "GEMINI_API_KEY".to_string(),
                base_url: crate::ai::DEFAULT_BASE_URL.to_string(),
                max_concurrency: 4,
                max_prompt_chars: 4000,
                temperature: 0.2,
                max_output_tokens: 2048,
                max_attempts: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 30_000,
                request_timeout_secs: 60,
                input_price_per_million: 0.075,
                output_price_per_million: 0.30,
            },
            rules: RulesConfig { groups: Vec::new() },
            cache: CacheConfig {
                persistent: true,
                dir: None,
            },
            synth: SynthConfig {
                command: "npx cdk synth --quiet".to_string(),
                output: "cdk.out".to_string(),
                timeout_secs: 300,
            },
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
        }
    }
}

impl EffectiveConfig {
    pub fn cache_dir(&self, home_dir: &Path) -> PathBuf {
        match &self.cache.dir {
            Some(dir) => PathBuf::from(dir),
            None => crate::cache::default_cache_dir(home_dir),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ai: Option<RawAiConfig>,
    rules: Option<RawRulesConfig>,
    cache: Option<RawCacheConfig>,
    synth: Option<RawSynthConfig>,
    ui: Option<RawUiConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAiConfig {
    enabled: Option<bool>,
    model: Option<String>,
    fallback_models: Option<Vec<String>>,
    modes: Option<Vec<String>>,
    api_key_env: Option<String>,
    base_url: Option<String>,
    max_concurrency: Option<usize>,
    max_prompt_chars: Option<usize>,
    temperature: Option<f64>,
    max_output_tokens: Option<u32>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    input_price_per_million: Option<f64>,
    output_price_per_million: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRulesConfig {
    groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCacheConfig {
    persistent: Option<bool>,
    dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSynthConfig {
    command: Option<String>,
    output: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/infralens/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let explicit = config_path.is_some();
    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        cfg.config_path = Some(path.display().to_string());
    } else if explicit {
        anyhow::bail!("config file not found: {}", path.display());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(ai) = raw.ai {
        let target = &mut cfg.ai;
        if let Some(v) = ai.enabled {
            target.enabled = v;
        }
        if let Some(v) = ai.model {
            target.model = non_empty(&v);
        }
        if let Some(v) = ai.fallback_models {
            target.fallback_models = v;
        }
        if let Some(v) = ai.modes {
            target.modes = parse_modes(&v)?;
        }
        if let Some(v) = ai.api_key_env {
            target.api_key_env = v;
        }
        if let Some(v) = ai.base_url {
            target.base_url = v;
        }
        if let Some(v) = ai.max_concurrency {
            target.max_concurrency = v;
        }
        if let Some(v) = ai.max_prompt_chars {
            target.max_prompt_chars = v;
        }
        if let Some(v) = ai.temperature {
            target.temperature = v;
        }
        if let Some(v) = ai.max_output_tokens {
            target.max_output_tokens = v;
        }
        if let Some(v) = ai.max_attempts {
            target.max_attempts = v;
        }
        if let Some(v) = ai.initial_backoff_ms {
            target.initial_backoff_ms = v;
        }
        if let Some(v) = ai.max_backoff_ms {
            target.max_backoff_ms = v;
        }
        if let Some(v) = ai.request_timeout_secs {
            target.request_timeout_secs = v;
        }
        if let Some(v) = ai.input_price_per_million {
            target.input_price_per_million = v;
        }
        if let Some(v) = ai.output_price_per_million {
            target.output_price_per_million = v;
        }
    }

    if let Some(rules) = raw.rules {
        if let Some(groups) = rules.groups {
            cfg.rules.groups = parse_groups(&groups)?;
        }
    }

    if let Some(cache) = raw.cache {
        if let Some(persistent) = cache.persistent {
            cfg.cache.persistent = persistent;
        }
        if let Some(dir) = cache.dir {
            cfg.cache.dir = non_empty(&dir);
        }
    }

    if let Some(synth) = raw.synth {
        if let Some(command) = synth.command {
            cfg.synth.command = command;
        }
        if let Some(output) = synth.output {
            cfg.synth.output = output;
        }
        if let Some(timeout_secs) = synth.timeout_secs {
            cfg.synth.timeout_secs = timeout_secs;
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("INFRALENS_AI_ENABLED") {
        cfg.ai.enabled = parse_bool(&v).with_context(|| "INFRALENS_AI_ENABLED")?;
    }
    if let Ok(v) = std::env::var("INFRALENS_AI_MODEL") {
        if let Some(model) = non_empty(&v) {
            cfg.ai.model = Some(model);
        }
    }
    if let Ok(v) = std::env::var("INFRALENS_AI_MAX_CONCURRENCY") {
        cfg.ai.max_concurrency = v
            .trim()
            .parse::<usize>()
            .with_context(|| "INFRALENS_AI_MAX_CONCURRENCY")?;
    }
    if let Ok(v) = std::env::var("INFRALENS_AI_MODES") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.ai.modes = parse_modes(&parts).with_context(|| "INFRALENS_AI_MODES")?;
        }
    }
    if let Ok(v) = std::env::var("INFRALENS_RULES_GROUPS") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.rules.groups = parse_groups(&parts).with_context(|| "INFRALENS_RULES_GROUPS")?;
        }
    }
    if let Ok(v) = std::env::var("INFRALENS_CACHE_PERSISTENT") {
        cfg.cache.persistent = parse_bool(&v).with_context(|| "INFRALENS_CACHE_PERSISTENT")?;
    }
    if let Ok(v) = std::env::var("INFRALENS_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "INFRALENS_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("INFRALENS_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "INFRALENS_UI_MAX_TABLE_ROWS")?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.ai.max_concurrency == 0 || cfg.ai.max_concurrency > crate::ai::MAX_CONCURRENCY {
        anyhow::bail!(
            "ai.max_concurrency must be between 1 and {} (got {})",
            crate::ai::MAX_CONCURRENCY,
            cfg.ai.max_concurrency
        );
    }
    if cfg.ai.max_attempts == 0 {
        anyhow::bail!("ai.max_attempts must be at least 1");
    }
    if !(0.0..=2.0).contains(&cfg.ai.temperature) {
        anyhow::bail!("ai.temperature must be between 0.0 and 2.0");
    }
    if cfg.synth.command.trim().is_empty() {
        anyhow::bail!("synth.command must not be empty");
    }
    Ok(())
}

pub fn parse_groups(values: &[String]) -> Result<Vec<RuleGroup>> {
    values
        .iter()
        .map(|v| v.parse::<RuleGroup>().map_err(anyhow::Error::msg))
        .collect()
}

pub fn parse_modes(values: &[String]) -> Result<Vec<Category>> {
    values
        .iter()
        .map(|v| v.parse::<Category>().map_err(anyhow::Error::msg))
        .collect()
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
