use std::collections::BTreeMap;

use thiserror::Error;

pub mod kube;

/// Raw secret payload, keyed by field name.
pub type SecretData = BTreeMap<String, Vec<u8>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<SecretData, SecretStoreError>;
}

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret `{namespace}/{name}` not found")]
    NotFound { namespace: String, name: String },
    #[error("`{0}` is not a valid Kubernetes object name")]
    InvalidName(String),
    #[error("secret store responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error(transparent)]
    Kube(#[from] ::kube::Error),
    #[error(transparent)]
    InferConfig(#[from] ::kube::config::InferConfigError),
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),
}
