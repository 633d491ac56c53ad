//! Application configuration for dbt-docgen.
//!
//! The config file is `docgen.toml`, looked up in the dbt project root first and
//! then in `~/.dbt-docgen/`. CLI flags override config file values, which
//! override defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocgenError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docgen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dbt-docgen";

// ---------------------------------------------------------------------------
// Config structs (matching docgen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model provider settings.
    #[serde(default)]
    pub provider: ProviderSection,

    /// Generation scheduling and prompt settings.
    #[serde(default)]
    pub generation: GenerationSection,

    /// Output locations and schema mutation policy.
    #[serde(default)]
    pub output: OutputSection,
}

/// Which generation service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
        }
    }
}

/// `[provider]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent to the provider.
    #[serde(default = "default_model")]
    pub model: String,

    /// Override for the provider endpoint (OpenAI-compatible gateways, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_request_timeout() -> u64 {
    120
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Maximum concurrent in-flight requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries after a rate-limit response before giving up.
    #[serde(default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Retries after a transport error or timeout.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Transformation logic is cut to this many characters in prompts.
    #[serde(default = "default_max_logic_chars")]
    pub max_logic_chars: usize,

    /// Overall run deadline; unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Custom prompt template file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<PathBuf>,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_rate_limit_retries: default_rate_limit_retries(),
            transport_retries: default_transport_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter: true,
            max_logic_chars: default_max_logic_chars(),
            run_timeout_secs: None,
            prompt_template: None,
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_rate_limit_retries() -> u32 {
    5
}
fn default_transport_retries() -> u32 {
    1
}
fn default_base_backoff() -> u64 {
    1_000
}
fn default_max_backoff() -> u64 {
    60_000
}
fn default_true() -> bool {
    true
}
fn default_max_logic_chars() -> usize {
    1_000
}

/// What to do when a schema entry already carries a hand-written description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DescriptionPolicy {
    /// Replace it with the doc block reference.
    #[default]
    Overwrite,
    /// Leave it alone; the model is reported as skipped.
    SkipIfPresent,
}

impl FromStr for DescriptionPolicy {
    type Err = DocgenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(Self::Overwrite),
            "skip-if-present" => Ok(Self::SkipIfPresent),
            other => Err(DocgenError::config(format!(
                "unknown description policy '{other}' (expected overwrite or skip-if-present)"
            ))),
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Doc block directory, relative to the project root.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,

    #[serde(default)]
    pub description_policy: DescriptionPolicy,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            description_policy: DescriptionPolicy::default(),
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime provider configuration, including the resolved credential.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub base_url: Url,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Build from the `[provider]` section and an already-resolved key.
    pub fn from_section(section: &ProviderSection, api_key: String) -> Result<Self> {
        let raw_url = section
            .base_url
            .as_deref()
            .unwrap_or_else(|| section.kind.default_base_url());
        let base_url = Url::parse(raw_url)
            .map_err(|e| DocgenError::config(format!("invalid provider.base_url '{raw_url}': {e}")))?;

        Ok(Self {
            kind: section.kind,
            api_key,
            model: section.model.clone(),
            base_url,
            temperature: section.temperature,
            max_tokens: section.max_tokens,
            request_timeout: Duration::from_secs(section.request_timeout_secs),
        })
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url.as_str())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Runtime generation scheduling configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Upper bound on in-flight requests (never below 1).
    pub concurrency: usize,
    pub max_rate_limit_retries: u32,
    pub transport_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
    pub max_logic_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for GenerationConfig {
    fn from(config: &AppConfig) -> Self {
        let generation = &config.generation;
        Self {
            concurrency: generation.concurrency.max(1),
            max_rate_limit_retries: generation.max_rate_limit_retries,
            transport_retries: generation.transport_retries,
            base_backoff: Duration::from_millis(generation.base_backoff_ms),
            max_backoff: Duration::from_millis(generation.max_backoff_ms),
            jitter: generation.jitter,
            max_logic_chars: generation.max_logic_chars,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the user config directory (`~/.dbt-docgen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DocgenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Locate the config file: project-local first, then the user config directory.
pub fn find_config_file(project_root: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(root) = project_root {
        let local = root.join(CONFIG_FILE_NAME);
        if local.is_file() {
            return Ok(Some(local));
        }
    }

    let user = config_dir()?.join(CONFIG_FILE_NAME);
    Ok(user.is_file().then_some(user))
}

/// Load the application config. Returns defaults if no config file exists.
pub fn load_config(project_root: Option<&Path>) -> Result<AppConfig> {
    match find_config_file(project_root)? {
        Some(path) => load_config_from(&path),
        None => {
            tracing::debug!("config file not found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocgenError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocgenError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file into `dir` (the user config directory when `None`).
/// Returns the path to the created file.
pub fn init_config(dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => config_dir()?,
    };
    std::fs::create_dir_all(&dir).map_err(|e| DocgenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| DocgenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocgenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the provider API key from the env var named in the config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.provider.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(DocgenError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}
