use std::fmt::{Display, Formatter};

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::secrets::SecretStore;
use self::{credentials::CredentialBundle, signer::KeyError, signer::RequestSigner};

pub mod credentials;
pub mod oci;
pub mod region;
pub mod signer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    WorkloadIdentity,
    ExplicitCredential,
    InstancePrincipal,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::WorkloadIdentity => f.write_str("Workload Identity"),
            Strategy::ExplicitCredential => f.write_str("user credentials"),
            Strategy::InstancePrincipal => f.write_str("Instance Principal"),
        }
    }
}

/// Authentication for one challenge operation. Never cached or shared between requests.
#[derive(Debug, Clone)]
pub struct AuthContext {
    strategy: Strategy,
    region: String,
    signer: RequestSigner,
}

impl AuthContext {
    pub fn new(strategy: Strategy, region: impl Into<String>, signer: RequestSigner) -> Self {
        Self {
            strategy,
            region: region.into(),
            signer,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }
}

/// Initializers for each authentication strategy.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn workload_identity(&self) -> Result<AuthContext, AuthError>;
    fn explicit(&self, bundle: CredentialBundle) -> Result<AuthContext, AuthError>;
    async fn instance_principal(&self) -> Result<AuthContext, AuthError>;
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to authenticate with {strategy}; {source}")]
    Init {
        strategy: Strategy,
        #[source]
        source: InitError,
    },
    #[error("no authentication strategy applies")]
    Unresolved,
}

impl AuthError {
    pub fn init(strategy: Strategy) -> impl FnOnce(InitError) -> AuthError {
        move |source| AuthError::Init { strategy, source }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("{0} is not set")]
    MissingEnv(&'static str),
    #[error("unsupported OCI_RESOURCE_PRINCIPAL_VERSION `{0}`, expected 2.2")]
    UnsupportedVersion(String),
    #[error("{0} is empty")]
    Empty(&'static str),
    #[error("invalid leaf certificate: {0}")]
    Certificate(&'static str),
    #[error("{0} responded with status {1}")]
    Status(&'static str, StatusCode),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("malformed PEM: {0}")]
    Pem(#[from] pem::PemError),
    #[error("malformed token response: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed token response: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}

const STRATEGY_ORDER: [Strategy; 3] = [
    Strategy::WorkloadIdentity,
    Strategy::ExplicitCredential,
    Strategy::InstancePrincipal,
];

enum Attempt {
    Authenticated(AuthContext),
    Disqualified(String),
}

/// Picks the first applicable strategy in [`STRATEGY_ORDER`].
#[derive(Debug)]
pub struct CredentialResolver<P: AuthProvider> {
    provider: P,
    use_workload_identity: bool,
}

impl<P: AuthProvider> CredentialResolver<P> {
    pub fn new(provider: P, use_workload_identity: bool) -> Self {
        Self {
            provider,
            use_workload_identity,
        }
    }

    #[tracing::instrument(skip(self, secrets), level = "debug")]
    pub async fn resolve(
        &self,
        secrets: &dyn SecretStore,
        namespace: &str,
        secret_name: &str,
    ) -> Result<AuthContext, AuthError> {
        for strategy in STRATEGY_ORDER {
            match self.attempt(strategy, secrets, namespace, secret_name).await? {
                Attempt::Authenticated(ctx) => {
                    debug!(%strategy, region = ctx.region(), "authenticated");
                    return Ok(ctx);
                }
                Attempt::Disqualified(reason) => {
                    debug!(%strategy, "strategy not applicable: {}", reason);
                }
            }
        }

        Err(AuthError::Unresolved)
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        secrets: &dyn SecretStore,
        namespace: &str,
        secret_name: &str,
    ) -> Result<Attempt, AuthError> {
        let ctx = match strategy {
            Strategy::WorkloadIdentity => {
                if !self.use_workload_identity {
                    return Ok(Attempt::Disqualified(
                        "OCI_USE_WORKLOAD_IDENTITY is not `true`".into(),
                    ));
                }
                self.provider.workload_identity().await?
            }
            Strategy::ExplicitCredential => {
                debug!(
                    "trying to load oci profile from secret `{}` in namespace `{}`",
                    secret_name, namespace
                );
                let lookup = secrets.get(namespace, secret_name).await;
                match CredentialBundle::from_lookup(lookup, namespace, secret_name) {
                    Ok(bundle) => self.provider.explicit(bundle)?,
                    Err(diagnostic) => return Ok(Attempt::Disqualified(diagnostic)),
                }
            }
            Strategy::InstancePrincipal => self.provider.instance_principal().await?,
        };

        Ok(Attempt::Authenticated(ctx))
    }
}
