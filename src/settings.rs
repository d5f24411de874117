use std::{env, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_REQUEST_TIMEOUT: &str = "30s";
const DEFAULT_IMDS_URL: &str = "http://169.254.169.254/opc/v2/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub group_name: String,
    /// Raw value of `OCI_USE_WORKLOAD_IDENTITY`. Only the literal `true` enables it.
    pub use_workload_identity: Option<String>,
    pub request_timeout: String,
    #[serde(default)]
    pub log_format: LogFormat,
    pub kube_api_url: Option<String>,
    pub imds_url: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .set_default("request_timeout", DEFAULT_REQUEST_TIMEOUT)?
            .set_default("imds_url", DEFAULT_IMDS_URL)?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("/etc/oci-dns01-solver/config").required(false))
            .add_source(Environment::with_prefix("APP"))
            .set_override_option("group_name", env::var("GROUP_NAME").ok())?
            .set_override_option(
                "use_workload_identity",
                env::var("OCI_USE_WORKLOAD_IDENTITY").ok(),
            )?
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        if settings.group_name.is_empty() {
            return Err(ConfigError::Message("GROUP_NAME must be specified".into()));
        }
        Ok(settings)
    }

    pub fn workload_identity_enabled(&self) -> bool {
        self.use_workload_identity.as_deref() == Some("true")
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.request_timeout)
            .map_err(|e| ConfigError::Message(format!("invalid request_timeout: {}", e)))
    }
}
