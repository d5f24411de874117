use serde::Serialize;

use crate::{
    auth::AuthContext,
    challenge::{ChallengeRequest, ProviderConfig},
};

pub mod oci;

pub use self::oci::DnsError;

pub const RECORD_TYPE: &str = "TXT";
/// Short so that cleanup and re-validation take effect quickly.
pub const RECORD_TTL: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOperation {
    pub domain: String,
    pub rtype: String,
    pub rdata: String,
    pub ttl: u32,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchZoneRecordsRequest {
    pub compartment_id: String,
    pub zone_name_or_id: String,
    pub items: Vec<RecordOperation>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DnsClient: Send + Sync {
    /// Applies the record operations. Adding an existing record or removing an absent one
    /// is not an error.
    async fn patch_zone_records(&self, request: &PatchZoneRecordsRequest) -> Result<(), DnsError>;
}

/// Constructs an authenticated client for one challenge operation.
pub trait ClientBuilder: Send + Sync {
    type Client: DnsClient;

    fn build(&self, auth: AuthContext) -> Result<Self::Client, DnsError>;
}

/// The single-record patch for a challenge.
pub fn patch_request(
    cfg: &ProviderConfig,
    ch: &ChallengeRequest,
    operation: Operation,
) -> PatchZoneRecordsRequest {
    let domain = ch
        .resolved_fqdn
        .strip_suffix('.')
        .unwrap_or(&ch.resolved_fqdn);

    PatchZoneRecordsRequest {
        compartment_id: cfg.compartment_ocid.clone(),
        zone_name_or_id: ch.resolved_zone.clone(),
        items: vec![RecordOperation {
            domain: domain.to_owned(),
            rtype: RECORD_TYPE.to_owned(),
            rdata: ch.key.clone(),
            ttl: RECORD_TTL,
            operation,
        }],
    }
}

/// Submits the challenge record patch once; retries happen inside the client's transport.
#[tracing::instrument(skip_all, fields(fqdn = %ch.resolved_fqdn, operation = ?operation))]
pub async fn mutate<C: DnsClient + ?Sized>(
    client: &C,
    cfg: &ProviderConfig,
    ch: &ChallengeRequest,
    operation: Operation,
) -> Result<(), DnsError> {
    client
        .patch_zone_records(&patch_request(cfg, ch, operation))
        .await
}
