//! Gateway configuration: explicit structs with defaults, YAML env-var expansion, and
//! deep-merge of user config over built-in defaults.

use crate::rule::RoutingRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unclosed ${{...}} expression in config")]
    UnclosedExpression,
}

fn d_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn d_true() -> bool {
    true
}
fn d_false() -> bool {
    false
}
fn d_request_timeout_ms() -> u64 {
    30_000
}
fn d_retry_base_ms() -> u64 {
    250
}
fn d_retry_factor() -> f64 {
    2.0
}
fn d_retry_max_ms() -> u64 {
    10_000
}
fn d_retries() -> u32 {
    3
}
fn d_embedding_dimensions() -> usize {
    384
}
fn d_token_budget() -> u32 {
    2000
}
fn d_retrieval_limit() -> u32 {
    10
}
fn d_min_score() -> f64 {
    0.3
}
fn d_query_context_messages() -> u32 {
    3
}
fn d_min_confidence() -> f64 {
    0.7
}
fn d_triviality_chars() -> usize {
    20
}
fn d_extraction_model() -> String {
    "local/extraction".to_string()
}
fn d_summary_model() -> String {
    "local/summary".to_string()
}
fn d_gap_threshold_ms() -> u64 {
    4 * 3_600_000
}
fn d_lookback_ms() -> u64 {
    24 * 3_600_000
}
fn d_max_messages() -> u32 {
    50
}
fn d_min_messages() -> u32 {
    4
}
fn d_extraction_queue_capacity() -> usize {
    256
}
fn d_half_life_hours() -> f64 {
    72.0
}
fn d_default_model() -> String {
    "auto".to_string()
}
fn d_store_path() -> String {
    "~/.pearl/memories.db".to_string()
}
fn d_credentials_path() -> String {
    "~/.pearl/credentials.json".to_string()
}
fn d_transcript_dir() -> String {
    "~/.pearl/transcripts".to_string()
}
fn d_request_log_path() -> String {
    "~/.pearl/requests.jsonl".to_string()
}
fn d_api_key_header() -> String {
    "x-api-key".to_string()
}
fn d_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub auth_enabled: bool,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub cors_allow_any: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: d_bind_addr(),
            auth_enabled: d_false(),
            api_key: None,
            api_key_header: d_api_key_header(),
            cors_allow_any: d_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub request_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_factor: f64,
    pub retry_max_ms: u64,
    pub retries: u32,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            request_timeout_ms: d_request_timeout_ms(),
            retry_base_ms: d_retry_base_ms(),
            retry_factor: d_retry_factor(),
            retry_max_ms: d_retry_max_ms(),
            retries: d_retries(),
            base_url: None,
            api_key: None,
            oauth_client_id: None,
            oauth_client_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub store_path: String,
    pub embedding_dimensions: usize,
    pub token_budget: u32,
    pub retrieval_limit: u32,
    pub min_score: f64,
    pub query_context_messages: u32,
    pub recency_boost_enabled: bool,
    pub half_life_hours: f64,
    pub min_confidence: f64,
    pub triviality_chars: usize,
    pub extraction_model: String,
    /// When set, the assembled assistant response is also enqueued for
    /// extraction once its stream completes cleanly (in addition to the
    /// user message enqueued at request start).
    pub extract_from_assistant: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            store_path: d_store_path(),
            embedding_dimensions: d_embedding_dimensions(),
            token_budget: d_token_budget(),
            retrieval_limit: d_retrieval_limit(),
            min_score: d_min_score(),
            query_context_messages: d_query_context_messages(),
            recency_boost_enabled: d_true(),
            half_life_hours: d_half_life_hours(),
            min_confidence: d_min_confidence(),
            triviality_chars: d_triviality_chars(),
            extraction_model: d_extraction_model(),
            extract_from_assistant: d_false(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SunriseConfig {
    pub enabled: bool,
    pub gap_threshold_ms: u64,
    pub lookback_ms: u64,
    pub max_messages: u32,
    pub min_messages: u32,
    pub summary_model: String,
}

impl Default for SunriseConfig {
    fn default() -> Self {
        SunriseConfig {
            enabled: d_true(),
            gap_threshold_ms: d_gap_threshold_ms(),
            lookback_ms: d_lookback_ms(),
            max_messages: d_max_messages(),
            min_messages: d_min_messages(),
            summary_model: d_summary_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub rules: Vec<RoutingRule>,
    pub default_model: String,
    pub agent_overrides: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            rules: Vec::new(),
            default_model: d_default_model(),
            agent_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub transcript_dir: String,
    pub request_log_path: String,
    pub credentials_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            transcript_dir: d_transcript_dir(),
            request_log_path: d_request_log_path(),
            credentials_path: d_credentials_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: d_log_level(),
        }
    }
}

fn d_guard_action() -> String {
    "log_only".to_string()
}

/// Configures the optional persistence-claim guard: whether it runs at all,
/// and what it does with an unmatched claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// One of `auto_fix`, `warn`, `log_only`.
    pub action: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            enabled: d_false(),
            action: d_guard_action(),
        }
    }
}

/// The top-level, fully-merged gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub backends: HashMap<String, BackendConfig>,
    pub memory: MemoryConfig,
    pub sunrise: SunriseConfig,
    pub routing: RoutingConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub guard: GuardConfig,
    pub extraction_queue_capacity: usize,
}

static BUILTIN_DEFAULTS_YAML: &str = "{}\n";

impl GatewayConfig {
    /// Parses `raw` (already env-var-expanded YAML) and deep-merges it over the
    /// built-in defaults.
    pub fn load_from_yaml(raw: &str) -> Result<GatewayConfig, ConfigError> {
        let defaults: serde_yaml::Value = serde_yaml::from_str(BUILTIN_DEFAULTS_YAML)?;
        let user: serde_yaml::Value = serde_yaml::from_str(raw)?;
        let merged = deep_merge(defaults, user);
        let mut config: GatewayConfig = serde_yaml::from_value(merged)?;
        if config.extraction_queue_capacity == 0 {
            config.extraction_queue_capacity = d_extraction_queue_capacity();
        }
        Ok(config)
    }
}

/// Deep-merges `override_value` onto `base`: maps merge key-wise (recursively), any
/// other shape (scalar, sequence, or a type mismatch) is replaced wholesale by the
/// override. `deep_merge(defaults, empty_map) == defaults`.
pub fn deep_merge(base: serde_yaml::Value, override_value: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, override_value) {
        (Value::Mapping(mut base_map), Value::Mapping(override_map)) => {
            for (k, v) in override_map {
                let merged = match base_map.remove(&k) {
                    Some(base_v) => deep_merge(base_v, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, override_value) => override_value,
    }
}

static VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-(.*?))?\}").unwrap());

/// Expands `${VAR}` and `${VAR:-default}` in `raw` against process environment
/// variables. A single-variable whole-string expression (the entire value of `raw`
/// is exactly one `${...}`) is left as a bare substituted string so the YAML parser
/// can still coerce it to a number or bool; multi-variable or mixed-text expressions
/// stay strings. Idempotent on strings containing no `${...}`.
pub fn expand_env_vars(raw: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(raw.len());
    let mut last_end = 0;
    for caps in VAR_PATTERN.captures_iter(raw) {
        let whole = caps.get(0).unwrap();
        result.push_str(&raw[last_end..whole.start()]);
        let var_name = &caps[1];
        let default = caps.get(3).map(|m| m.as_str());
        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => default.unwrap_or_default().to_string(),
        };
        result.push_str(&value);
        last_end = whole.end();
    }
    result.push_str(&raw[last_end..]);
    Ok(result)
}

/// Expands a leading `~` to `$HOME` (or `%USERPROFILE%` on platforms without `HOME`).
pub fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}
