use reqwest::{header::CONTENT_TYPE, Client, IntoUrl, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::{ClientBuilder, DnsClient, PatchZoneRecordsRequest, RecordOperation};
use crate::{
    auth::{signer::KeyError, AuthContext},
    retry::{HttpStatus, RetryPolicy},
};

const API_VERSION: &str = "20180115";
const OPC_REQUEST_ID: &str = "opc-request-id";

/// OCI DNS `PatchZoneRecords` over HTTPS, signed with the resolved principal.
#[derive(Debug, Clone)]
pub struct OciDnsClient {
    base_url: Url,
    auth: AuthContext,
    client: Client,
    retry: RetryPolicy,
}

impl OciDnsClient {
    pub fn new(auth: AuthContext, client: Client) -> Result<Self, DnsError> {
        let endpoint = format!("https://dns.{}.oraclecloud.com/", auth.region());
        Self::with_endpoint(endpoint, auth, client)
    }

    pub fn with_endpoint<U: IntoUrl>(
        url: U,
        auth: AuthContext,
        client: Client,
    ) -> Result<Self, DnsError> {
        let base_url = url.into_url()?;

        if base_url.cannot_be_a_base() {
            Err(DnsError::BadBaseUrl)
        } else {
            Ok(Self {
                base_url,
                auth,
                client,
                retry: RetryPolicy::default(),
            })
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
    pub fn retry_policy_mut(&mut self) -> &mut RetryPolicy {
        &mut self.retry
    }

    fn records_url(&self, request: &PatchZoneRecordsRequest) -> Result<Url, DnsError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DnsError::BadBaseUrl)?
            .pop_if_empty()
            .extend([API_VERSION, "zones", request.zone_name_or_id.as_str(), "records"]);
        if !request.compartment_id.is_empty() {
            url.query_pairs_mut()
                .append_pair("compartmentId", &request.compartment_id);
        }
        Ok(url)
    }

    async fn send_once(&self, url: &Url, body: &PatchBody<'_>) -> Result<Patched, DnsError> {
        let mut request = self
            .client
            .patch(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .build()?;
        self.auth.signer().sign(&mut request)?;

        let response = self.client.execute(request).await?;
        let status = response.status();
        let request_id = response
            .headers()
            .get(OPC_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        if status.is_success() {
            return Ok(Patched { status, request_id });
        }

        let error = response.json::<ServiceErrorBody>().await.unwrap_or_default();
        debug!(
            %status,
            request_id = request_id.as_deref().unwrap_or("-"),
            "PATCH {} responded {}",
            url,
            status
        );
        Err(DnsError::Service {
            status,
            code: error.code,
            message: error.message,
        })
    }
}

#[async_trait::async_trait]
impl DnsClient for OciDnsClient {
    #[tracing::instrument(skip(self, request), fields(zone = %request.zone_name_or_id))]
    async fn patch_zone_records(&self, request: &PatchZoneRecordsRequest) -> Result<(), DnsError> {
        let url = self.records_url(request)?;
        let body = PatchBody {
            items: &request.items,
        };

        let patched = self
            .retry
            .run(&Method::PATCH, &url, || self.send_once(&url, &body))
            .await?;
        info!(
            status = %patched.status,
            request_id = patched.request_id.as_deref().unwrap_or("-"),
            "patched zone records"
        );

        Ok(())
    }
}

/// Builds [`OciDnsClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct OciClientBuilder {
    client: Client,
    endpoint: Option<Url>,
}

impl OciClientBuilder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: None,
        }
    }

    /// Overrides the regional `https://dns.<region>.oraclecloud.com/` endpoint.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

impl ClientBuilder for OciClientBuilder {
    type Client = OciDnsClient;

    fn build(&self, auth: AuthContext) -> Result<Self::Client, DnsError> {
        match &self.endpoint {
            Some(endpoint) => OciDnsClient::with_endpoint(endpoint.clone(), auth, self.client.clone()),
            None => OciDnsClient::new(auth, self.client.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct PatchBody<'a> {
    items: &'a [RecordOperation],
}

#[derive(Debug)]
struct Patched {
    status: StatusCode,
    request_id: Option<String>,
}

impl HttpStatus for Patched {
    fn http_status(&self) -> Option<StatusCode> {
        Some(self.status)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Error)]
pub enum DnsError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error("bad base url")]
    BadBaseUrl,
    #[error(transparent)]
    SigningError(#[from] KeyError),
    #[error("service responded {status}: {code} {message}")]
    Service {
        status: StatusCode,
        code: String,
        message: String,
    },
}

impl HttpStatus for DnsError {
    fn http_status(&self) -> Option<StatusCode> {
        match self {
            DnsError::ReqwestError(e) => e.status(),
            DnsError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn is_local(&self) -> bool {
        match self {
            DnsError::ReqwestError(e) => e.is_builder(),
            DnsError::BadBaseUrl | DnsError::SigningError(_) => true,
            DnsError::Service { .. } => false,
        }
    }
}
