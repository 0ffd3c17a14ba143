use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::machine::Policy;
use crate::merge::TextLayout;
use crate::models::ExecutionMode;
use crate::recency::RecencyPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub recency: RecencyConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Literal bearer token. Prefer `token_env` outside of tests.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("wiki-batch/{}", env!("CARGO_PKG_VERSION"))
}
fn default_token_env() -> String {
    "WBATCH_TOKEN".to_string()
}

impl ApiConfig {
    /// The credential: the literal token, else the named environment variable.
    pub fn credential(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportStrategy {
    #[default]
    Patch,
    Legacy,
}

impl std::str::FromStr for TransportStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patch" => Ok(TransportStrategy::Patch),
            "legacy" => Ok(TransportStrategy::Legacy),
            other => anyhow::bail!("Unknown transport: '{}'. Must be patch or legacy.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TransportConfig {
    #[serde(default)]
    pub strategy: TransportStrategy,
    #[serde(default)]
    pub legacy: Option<LegacyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LegacyConfig {
    pub base_url: String,
    #[serde(default = "default_edit_path")]
    pub edit_path: String,
    #[serde(default)]
    pub formhash: Option<String>,
    #[serde(default = "default_formhash_env")]
    pub formhash_env: String,
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,
    /// Text whose presence in a 2xx response body means the edit was refused.
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,
}

fn default_edit_path() -> String {
    "/subject/{id}/new_revision".to_string()
}
fn default_formhash_env() -> String {
    "WBATCH_FORMHASH".to_string()
}
fn default_cookie_env() -> String {
    "WBATCH_COOKIE".to_string()
}
fn default_failure_marker() -> String {
    "class=\"error\"".to_string()
}

impl LegacyConfig {
    pub fn formhash(&self) -> Option<String> {
        self.formhash
            .clone()
            .or_else(|| std::env::var(&self.formhash_env).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn cookie(&self) -> Option<String> {
        std::env::var(&self.cookie_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,
    #[serde(default = "default_observe_delay_ms")]
    pub observe_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub text_layout: TextLayout,
    #[serde(default = "default_flag_columns")]
    pub flag_columns: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            retry_cap: default_retry_cap(),
            observe_delay_ms: default_observe_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            text_layout: TextLayout::default(),
            flag_columns: default_flag_columns(),
        }
    }
}

fn default_retry_cap() -> u32 {
    3
}
fn default_observe_delay_ms() -> u64 {
    500
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_flag_columns() -> Vec<String> {
    vec!["series".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecencyConfig {
    #[serde(default = "default_recency_policy")]
    pub policy: String,
    #[serde(default = "default_weekday")]
    pub weekday: String,
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            policy: default_recency_policy(),
            weekday: default_weekday(),
            time: default_time(),
            window_hours: default_window_hours(),
        }
    }
}

fn default_recency_policy() -> String {
    "weekly".to_string()
}
fn default_weekday() -> String {
    "Tue".to_string()
}
fn default_time() -> String {
    "21:30".to_string()
}
fn default_window_hours() -> u32 {
    24
}

impl RecencyConfig {
    pub fn to_policy(&self) -> Result<RecencyPolicy> {
        match self.policy.as_str() {
            "weekly" => {
                let weekday: Weekday = self
                    .weekday
                    .parse()
                    .map_err(|_| anyhow::anyhow!("recency.weekday '{}' is not a weekday", self.weekday))?;
                let time = NaiveTime::parse_from_str(&self.time, "%H:%M")
                    .with_context(|| format!("recency.time '{}' must be HH:MM", self.time))?;
                Ok(RecencyPolicy::Weekly { weekday, time })
            }
            "rolling" => Ok(RecencyPolicy::Rolling {
                window: chrono::Duration::hours(i64::from(self.window_hours)),
            }),
            "disabled" => Ok(RecencyPolicy::Disabled),
            other => anyhow::bail!(
                "Unknown recency policy: '{}'. Must be weekly, rolling, or disabled.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/wbatch.sqlite")
}

impl Config {
    /// Run policy for the state machine, with optional per-run overrides.
    pub fn policy(&self, mode: Option<ExecutionMode>) -> Result<Policy> {
        Ok(Policy {
            mode: mode.unwrap_or(self.batch.mode),
            retry_cap: self.batch.retry_cap,
            observe_delay: Duration::from_millis(self.batch.observe_delay_ms),
            retry_delay: Duration::from_millis(self.batch.retry_delay_ms),
            recency: self.recency.to_policy()?,
            flag_columns: self.batch.flag_columns.clone(),
            layout: self.batch.text_layout,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate api
    if config.api.base_url.trim().is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }
    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    // Validate batch
    if config.batch.retry_cap == 0 {
        anyhow::bail!("batch.retry_cap must be >= 1");
    }

    // Validate recency
    config.recency.to_policy()?;
    if config.recency.policy == "rolling" && config.recency.window_hours == 0 {
        anyhow::bail!("recency.window_hours must be > 0 for the rolling policy");
    }

    // Validate transport
    if config.transport.strategy == TransportStrategy::Legacy {
        match &config.transport.legacy {
            None => anyhow::bail!("transport.legacy must be configured when strategy is 'legacy'"),
            Some(legacy) if !legacy.edit_path.contains("{id}") => {
                anyhow::bail!("transport.legacy.edit_path must contain '{{id}}'")
            }
            Some(_) => {}
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[api]
base_url = "https://api.example.org"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.api.token_env, "WBATCH_TOKEN");
        assert_eq!(config.transport.strategy, TransportStrategy::Patch);
        assert_eq!(config.batch.mode, ExecutionMode::Interactive);
        assert_eq!(config.batch.retry_cap, 3);
        assert_eq!(config.batch.flag_columns, vec!["series"]);
        assert_eq!(config.state.path, PathBuf::from("./data/wbatch.sqlite"));

        let policy = config.policy(None).unwrap();
        assert_eq!(policy.recency, RecencyPolicy::default());
        assert_eq!(policy.observe_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
[api]
base_url = "https://api.example.org"
token = "abc"
timeout_secs = 5

[transport]
strategy = "legacy"

[transport.legacy]
base_url = "https://www.example.org"
formhash = "f00"

[batch]
mode = "unattended"
retry_cap = 5
text_layout = "plain"
flag_columns = ["series", "locked"]

[recency]
policy = "rolling"
window_hours = 12

[state]
path = "/tmp/wb.sqlite"
"#,
        )
        .unwrap();

        assert_eq!(config.api.credential().as_deref(), Some("abc"));
        let legacy = config.transport.legacy.as_ref().unwrap();
        assert_eq!(legacy.edit_path, "/subject/{id}/new_revision");
        assert_eq!(legacy.formhash().as_deref(), Some("f00"));

        let policy = config.policy(None).unwrap();
        assert_eq!(policy.mode, ExecutionMode::Unattended);
        assert_eq!(policy.retry_cap, 5);
        assert_eq!(policy.layout, TextLayout::Plain);
        assert_eq!(
            policy.recency,
            RecencyPolicy::Rolling {
                window: chrono::Duration::hours(12)
            }
        );

        let overridden = config.policy(Some(ExecutionMode::Interactive)).unwrap();
        assert_eq!(overridden.mode, ExecutionMode::Interactive);
    }

    #[test]
    fn test_weekly_recency_parsing() {
        let config = parse_config(&format!(
            "{}\n[recency]\nweekday = \"Fri\"\ntime = \"08:15\"\n",
            MINIMAL
        ))
        .unwrap();
        assert_eq!(
            config.recency.to_policy().unwrap(),
            RecencyPolicy::Weekly {
                weekday: Weekday::Fri,
                time: NaiveTime::from_hms_opt(8, 15, 0).unwrap(),
            }
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_cap = format!("{}\n[batch]\nretry_cap = 0\n", MINIMAL);
        assert!(parse_config(&zero_cap).is_err());

        let bad_time = format!("{}\n[recency]\ntime = \"9pm\"\n", MINIMAL);
        assert!(parse_config(&bad_time).is_err());

        let bad_policy = format!("{}\n[recency]\npolicy = \"sometimes\"\n", MINIMAL);
        assert!(parse_config(&bad_policy).is_err());

        let legacy_missing = format!("{}\n[transport]\nstrategy = \"legacy\"\n", MINIMAL);
        assert!(parse_config(&legacy_missing).is_err());

        assert!(parse_config("[api]\nbase_url = \"\"\n").is_err());
    }

    #[test]
    fn test_transport_strategy_from_str() {
        assert_eq!("legacy".parse::<TransportStrategy>().unwrap(), TransportStrategy::Legacy);
        assert!("smoke".parse::<TransportStrategy>().is_err());
    }
}
