#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    auth::{oci::OciAuthProvider, CredentialResolver},
    challenge::ChallengeRequest,
    dns::oci::OciClientBuilder,
    secrets::{kube::KubeSecretStore, SecretStore},
    settings::{LogFormat, Settings},
    solver::OciSolver,
};

mod auth;
mod challenge;
mod dns;
mod retry;
mod secrets;
mod settings;
mod solver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Settings::new()?;
    init_tracing(cfg.log_format)?;

    run(cfg).await
}

fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

async fn run(cfg: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = cfg.request_timeout()?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let secrets: Arc<dyn SecretStore> = match &cfg.kube_api_url {
        Some(url) => Arc::new(KubeSecretStore::with_api_url(url, timeout)?),
        None => Arc::new(KubeSecretStore::infer(timeout).await?),
    };

    let provider = OciAuthProvider::new(cfg.imds_url.as_str(), client.clone())?.with_timeout(timeout);
    let resolver = CredentialResolver::new(provider, cfg.workload_identity_enabled());
    let solver = OciSolver::new(resolver, OciClientBuilder::new(client));
    solver.initialize(secrets)?;

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let ch: ChallengeRequest = serde_json::from_str(&input)?;

    info!(
        group = %cfg.group_name,
        solver = solver.name(),
        uid = %ch.uid,
        action = ?ch.action,
        "handling challenge request"
    );

    if let Err(e) = solver.solve(&ch).await {
        error!(uid = %ch.uid, "{}", e);
        return Err(e.into());
    }
    Ok(())
}
