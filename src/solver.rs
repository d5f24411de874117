use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::info;

use crate::{
    auth::{AuthError, AuthProvider, CredentialResolver},
    challenge::{load_config, ChallengeAction, ChallengeRequest, ProviderConfig},
    dns::{self, ClientBuilder, DnsError, Operation},
    secrets::SecretStore,
};

pub const SOLVER_NAME: &str = "oci";

/// Presents and cleans up DNS-01 TXT records in OCI DNS.
///
/// Each call runs decode, authenticate, mutate in that order and stops at the first failure.
/// The only state kept between calls is the secret store installed by [`OciSolver::initialize`].
pub struct OciSolver<P: AuthProvider, B: ClientBuilder> {
    resolver: CredentialResolver<P>,
    builder: B,
    secrets: OnceCell<Arc<dyn SecretStore>>,
}

impl<P: AuthProvider, B: ClientBuilder> OciSolver<P, B> {
    pub fn new(resolver: CredentialResolver<P>, builder: B) -> Self {
        Self {
            resolver,
            builder,
            secrets: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        SOLVER_NAME
    }

    /// Installs the shared secret store. Called once at startup.
    pub fn initialize(&self, secrets: Arc<dyn SecretStore>) -> Result<(), SolverError> {
        self.secrets
            .set(secrets)
            .map_err(|_| SolverError::AlreadyInitialized)
    }

    pub async fn solve(&self, ch: &ChallengeRequest) -> Result<(), SolverError> {
        match ch.action {
            ChallengeAction::Present => self.present(ch).await,
            ChallengeAction::CleanUp => self.clean_up(ch).await,
        }
    }

    /// Publishes the challenge record. Safe to call repeatedly with the same request.
    pub async fn present(&self, ch: &ChallengeRequest) -> Result<(), SolverError> {
        info!(
            namespace = %ch.resource_namespace,
            zone = %ch.resolved_zone,
            fqdn = %ch.resolved_fqdn,
            "call function Present"
        );
        self.run(ch, Operation::Add)
            .await
            .map_err(SolverError::from_stage(Operation::Add))
    }

    /// Removes only the record carrying this request's key, leaving other values at the same name.
    pub async fn clean_up(&self, ch: &ChallengeRequest) -> Result<(), SolverError> {
        info!(
            namespace = %ch.resource_namespace,
            zone = %ch.resolved_zone,
            fqdn = %ch.resolved_fqdn,
            "call function CleanUp"
        );
        self.run(ch, Operation::Remove)
            .await
            .map_err(SolverError::from_stage(Operation::Remove))
    }

    async fn run(&self, ch: &ChallengeRequest, operation: Operation) -> Result<(), Stage> {
        let cfg = load_config(ch.config.as_ref()).map_err(Stage::Config)?;
        let client = self
            .client(&cfg, &ch.resource_namespace)
            .await
            .map_err(Stage::ClientInit)?;

        dns::mutate(&client, &cfg, ch, operation)
            .await
            .map_err(Stage::Mutation)
    }

    async fn client(
        &self,
        cfg: &ProviderConfig,
        namespace: &str,
    ) -> Result<B::Client, ClientInitError> {
        let secrets = self.secrets.get().ok_or(ClientInitError::NotInitialized)?;
        let auth = self
            .resolver
            .resolve(secrets.as_ref(), namespace, &cfg.profile_secret_name)
            .await?;

        Ok(self.builder.build(auth)?)
    }
}

enum Stage {
    Config(serde_json::Error),
    ClientInit(ClientInitError),
    Mutation(DnsError),
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("unable to load config: {0}")]
    Config(#[source] serde_json::Error),
    #[error("unable to initialize oci dns client: {0}")]
    ClientInit(#[source] ClientInitError),
    #[error("can not create TXT record: {0}")]
    CreateRecord(#[source] DnsError),
    #[error("can not delete TXT record: {0}")]
    DeleteRecord(#[source] DnsError),
    #[error("solver is already initialized")]
    AlreadyInitialized,
}

impl SolverError {
    fn from_stage(operation: Operation) -> impl FnOnce(Stage) -> SolverError {
        move |stage| match (stage, operation) {
            (Stage::Config(e), _) => SolverError::Config(e),
            (Stage::ClientInit(e), _) => SolverError::ClientInit(e),
            (Stage::Mutation(e), Operation::Add) => SolverError::CreateRecord(e),
            (Stage::Mutation(e), Operation::Remove) => SolverError::DeleteRecord(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientInitError {
    #[error("secret store is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Client(#[from] DnsError),
}
