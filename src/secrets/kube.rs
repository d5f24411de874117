use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, Config};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use tracing::debug;

use super::{SecretData, SecretStore, SecretStoreError};

/// RFC 1123 subdomain, the rule Kubernetes applies to secret names.
static SECRET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});
/// RFC 1123 label, the rule Kubernetes applies to namespace names.
static NAMESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

const MAX_SECRET_NAME_LEN: usize = 253;
const MAX_NAMESPACE_LEN: usize = 63;

/// Reads `v1/Secret` objects through the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Uses the local kubeconfig, falling back to the pod's service account.
    pub async fn infer(timeout: Duration) -> Result<Self, SecretStoreError> {
        let mut config = Config::infer().await?;
        config.connect_timeout = Some(timeout);
        config.read_timeout = Some(timeout);
        Ok(Self::new(Client::try_from(config)?))
    }

    /// Talks to an explicit API server without credentials, e.g. `kubectl proxy`.
    pub fn with_api_url(url: &str, timeout: Duration) -> Result<Self, SecretStoreError> {
        let mut config = Config::new(url.parse::<http::Uri>()?);
        config.connect_timeout = Some(timeout);
        config.read_timeout = Some(timeout);
        Ok(Self::new(Client::try_from(config)?))
    }
}

fn validate(namespace: &str, name: &str) -> Result<(), SecretStoreError> {
    if namespace.len() > MAX_NAMESPACE_LEN || !NAMESPACE.is_match(namespace) {
        return Err(SecretStoreError::InvalidName(namespace.to_owned()));
    }
    if name.len() > MAX_SECRET_NAME_LEN || !SECRET_NAME.is_match(name) {
        return Err(SecretStoreError::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, namespace: &str, name: &str) -> Result<SecretData, SecretStoreError> {
        let not_found = || SecretStoreError::NotFound {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        if name.is_empty() {
            return Err(not_found());
        }
        validate(namespace, name)?;

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match secrets.get(name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(response)) if response.code == 404 => return Err(not_found()),
            Err(kube::Error::Api(response)) => {
                return Err(SecretStoreError::Status(
                    StatusCode::from_u16(response.code)
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let data: SecretData = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(field, value)| (field, value.0))
            .collect();
        debug!(fields = data.len(), "fetched secret");

        Ok(data)
    }
}
