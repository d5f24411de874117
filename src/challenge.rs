use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ChallengeAction {
    Present,
    CleanUp,
}

/// A single DNS-01 challenge as handed over by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[serde(default)]
    pub uid: String,
    pub action: ChallengeAction,
    #[serde(default)]
    pub dns_name: String,
    pub key: String,
    pub resource_namespace: String,
    #[serde(rename = "resolvedFQDN")]
    pub resolved_fqdn: String,
    pub resolved_zone: String,
    #[serde(default)]
    pub allow_ambient_credentials: bool,
    #[serde(default)]
    pub config: Option<Value>,
}

/// Per-issuer configuration carried in the request's `config` blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "compartmentOCID", default)]
    pub compartment_ocid: String,
    #[serde(rename = "ociProfileSecretName", default)]
    pub profile_secret_name: String,
}

/// Decodes the opaque config blob. A missing (or `null`) blob is an empty config.
pub fn load_config(raw: Option<&Value>) -> Result<ProviderConfig, serde_json::Error> {
    match raw {
        None | Some(Value::Null) => Ok(ProviderConfig::default()),
        Some(value) => ProviderConfig::deserialize(value),
    }
}
