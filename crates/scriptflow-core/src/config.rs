use crate::error::Result;
use crate::pipeline;
use crate::types::StepNumber;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "scriptflow.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// WebhookConfig
// ---------------------------------------------------------------------------

/// Automation-service URL per step. A missing URL makes that step's proxy
/// route answer with its "not configured" message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub transcript_analysis: Option<String>,
    #[serde(default)]
    pub research: Option<String>,
    #[serde(default)]
    pub outline_generation: Option<String>,
}

impl WebhookConfig {
    pub fn url_for(&self, step: StepNumber) -> Option<&str> {
        let url = match step {
            StepNumber::TranscriptAnalysis => &self.transcript_analysis,
            StepNumber::Research => &self.research,
            StepNumber::OutlineGeneration => &self.outline_generation,
        };
        url.as_deref().filter(|u| !u.trim().is_empty())
    }

    fn slot(&mut self, step: StepNumber) -> &mut Option<String> {
        match step {
            StepNumber::TranscriptAnalysis => &mut self.transcript_analysis,
            StepNumber::Research => &mut self.research,
            StepNumber::OutlineGeneration => &mut self.outline_generation,
        }
    }
}

// ---------------------------------------------------------------------------
// PollingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_ceiling")]
    pub ceiling_secs: u64,
}

fn default_interval() -> u64 {
    3
}

fn default_ceiling() -> u64 {
    300
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            ceiling_secs: default_ceiling(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

// ---------------------------------------------------------------------------
// DatastoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Base URL of a PostgREST endpoint. When unset the embedded store is used.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default = "default_data_path")]
    pub path: PathBuf,
}

fn default_data_path() -> PathBuf {
    PathBuf::from(".scriptflow/data.redb")
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            access_key: None,
            path: default_data_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Long enough for a slow model run behind the automation service.
fn default_webhook_timeout() -> u64 {
    720
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhooks: WebhookConfig::default(),
            webhook_timeout_secs: default_webhook_timeout(),
            polling: PollingConfig::default(),
            datastore: DatastoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load from an optional YAML file, then apply environment overrides.
    ///
    /// `env` is the variable lookup; the CLI passes `std::env::var(..).ok()`.
    pub fn load<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match path {
            Some(p) => {
                let data = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&data)?
            }
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    serde_yaml::from_str(&std::fs::read_to_string(fallback)?)?
                } else {
                    Config::default()
                }
            }
        };
        cfg.apply_env(env);
        Ok(cfg)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for spec in pipeline::PIPELINE.iter() {
            if let Some(url) = env(spec.env_var) {
                *self.webhooks.slot(spec.number) = Some(url);
            }
        }
        if let Some(url) = env("DATASTORE_URL").filter(|u| !u.is_empty()) {
            self.datastore.url = Some(url);
        }
        if let Some(key) = env("DATASTORE_ACCESS_KEY") {
            self.datastore.access_key = Some(key);
        }
        if let Some(path) = env("SCRIPTFLOW_DATA_PATH") {
            self.datastore.path = PathBuf::from(path);
        }
        if let Some(port) = env("SCRIPTFLOW_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for spec in pipeline::PIPELINE.iter() {
            if self.webhooks.url_for(spec.number).is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "no webhook URL for step {} ({}); set {}",
                        spec.number, spec.name, spec.env_var
                    ),
                });
            }
        }

        if self.polling.interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "polling.interval_secs must be greater than zero".into(),
            });
        }
        if self.polling.ceiling_secs < self.polling.interval_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "polling.ceiling_secs ({}) is shorter than one interval ({})",
                    self.polling.ceiling_secs, self.polling.interval_secs
                ),
            });
        }
        if self.webhook_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "webhook_timeout_secs must be greater than zero".into(),
            });
        }
        if self.datastore.url.is_some()
            && self
                .datastore
                .access_key
                .as_deref()
                .map_or(true, str::is_empty)
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "datastore.url is set but no access key is configured".into(),
            });
        }

        warnings
    }
}
