use std::{env, fs, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{header::AUTHORIZATION, Certificate, Client, IntoUrl, Url};
use ring::signature::RsaKeyPair;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{
    credentials::CredentialBundle,
    region::canonical_region,
    signer::{generate_session_key, public_key_der, public_key_pem, KeyError, RequestSigner},
    AuthContext, AuthError, AuthProvider, InitError, Strategy,
};

const RP_VERSION: &str = "OCI_RESOURCE_PRINCIPAL_VERSION";
const RP_REGION: &str = "OCI_RESOURCE_PRINCIPAL_REGION";
const RP_SUPPORTED_VERSION: &str = "2.2";
const SA_TOKEN_PATH: &str = "OCI_KUBERNETES_SERVICE_ACCOUNT_TOKEN_PATH";
const SA_CERT_PATH: &str = "OCI_KUBERNETES_SERVICE_ACCOUNT_CERT_PATH";
const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
const DEFAULT_SA_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const DEFAULT_SA_CERT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const PROXYMUX_PORT: u16 = 12250;
const TOKEN_EXCHANGE_PATH: &str = "resourcePrincipalSessionTokens";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SECURITY_TOKEN_PREFIX: &str = "ST$";
const TENANT_PREFIXES: [&str; 2] = ["opc-tenant:", "opc-identity:"];

/// Authentication against OCI using its environment-provided principals.
#[derive(Debug, Clone)]
pub struct OciAuthProvider {
    client: Client,
    imds_url: Url,
    federation_url: Option<Url>,
    token_exchange_url: Option<Url>,
    timeout: Duration,
    session_key: fn() -> Result<RsaKeyPair, KeyError>,
}

impl OciAuthProvider {
    pub fn new<U: IntoUrl>(imds_url: U, client: Client) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client,
            imds_url: imds_url.into_url()?,
            federation_url: None,
            token_exchange_url: None,
            timeout: DEFAULT_TIMEOUT,
            session_key: generate_session_key,
        })
    }

    /// Overrides `https://auth.<region>.oraclecloud.com/`.
    pub fn with_federation_url(mut self, url: Url) -> Self {
        self.federation_url = Some(url);
        self
    }

    /// Overrides the in-cluster `https://$KUBERNETES_SERVICE_HOST:12250/` token exchange.
    pub fn with_token_exchange_url(mut self, url: Url) -> Self {
        self.token_exchange_url = Some(url);
        self
    }

    /// Timeout for the cluster-CA client built for the token exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// OKE workload identity: trades the pod's service account token for a resource
    /// principal session token bound to a fresh session key.
    #[tracing::instrument(skip_all)]
    async fn oke_workload_identity(
        &self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<AuthContext, InitError> {
        let require = |name: &'static str| lookup(name).ok_or(InitError::MissingEnv(name));

        let version = require(RP_VERSION)?;
        if version != RP_SUPPORTED_VERSION {
            return Err(InitError::UnsupportedVersion(version));
        }
        let region = canonical_region(&require(RP_REGION)?);

        let token_path = lookup(SA_TOKEN_PATH).unwrap_or_else(|| DEFAULT_SA_TOKEN_PATH.to_owned());
        let sa_token = fs::read_to_string(&*shellexpand::tilde(&token_path))?
            .trim()
            .to_owned();
        if sa_token.is_empty() {
            return Err(InitError::Empty("service account token"));
        }

        let (client, url) = match &self.token_exchange_url {
            Some(url) => (self.client.clone(), url.join(TOKEN_EXCHANGE_PATH)?),
            None => {
                let host = require(KUBERNETES_SERVICE_HOST)?;
                let host = if host.contains(':') {
                    format!("[{}]", host)
                } else {
                    host
                };
                let ca_path = lookup(SA_CERT_PATH).unwrap_or_else(|| DEFAULT_SA_CERT_PATH.to_owned());
                let ca = Certificate::from_pem(&fs::read(&*shellexpand::tilde(&ca_path))?)?;
                let client = Client::builder()
                    .add_root_certificate(ca)
                    .timeout(self.timeout)
                    .build()?;
                let url = Url::parse(&format!(
                    "https://{}:{}/{}",
                    host, PROXYMUX_PORT, TOKEN_EXCHANGE_PATH
                ))?;
                (client, url)
            }
        };

        let session_key = (self.session_key)()?;
        let body = TokenExchangeRequest {
            pod_key: public_key_pem(&session_key)?,
        };
        debug!(%url, %region, "exchanging service account token");
        let response = client
            .post(url)
            .bearer_auth(&sa_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(InitError::Status("token exchange endpoint", response.status()));
        }

        // The body is base64-encoded JSON.
        let encoded = response.text().await?;
        let TokenResponse { token } = serde_json::from_slice(&STANDARD.decode(encoded.trim())?)?;
        let token = token.strip_prefix(SECURITY_TOKEN_PREFIX).unwrap_or(&token);
        if token.is_empty() {
            return Err(InitError::Empty("resource principal session token"));
        }

        Ok(AuthContext::new(
            Strategy::WorkloadIdentity,
            region,
            RequestSigner::new(format!("{}{}", SECURITY_TOKEN_PREFIX, token), session_key),
        ))
    }

    async fn imds_get(&self, path: &str) -> Result<String, InitError> {
        let response = self
            .client
            .get(self.imds_url.join(path)?)
            .header(AUTHORIZATION, "Bearer Oracle")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(InitError::Status("instance metadata service", response.status()));
        }
        Ok(response.text().await?)
    }

    /// Instance principal: federates the instance's leaf certificate for a security token
    /// bound to a fresh session key.
    #[tracing::instrument(skip(self))]
    async fn federate(&self) -> Result<AuthContext, InitError> {
        let region = canonical_region(&self.imds_get("instance/region").await?);
        let leaf_cert = pem::parse(self.imds_get("identity/cert.pem").await?)?;
        let leaf_key = self.imds_get("identity/key.pem").await?;
        let intermediate = pem::parse(self.imds_get("identity/intermediate.pem").await?)?;

        let tenancy = tenancy_from_certificate(leaf_cert.contents())?;
        let key_id = format!(
            "{}/fed-x509-sha256/{}",
            tenancy,
            certificate_fingerprint(leaf_cert.contents())
        );
        let leaf_signer = RequestSigner::from_pem(key_id, &leaf_key, None)?;
        let session_key = (self.session_key)()?;
        debug!(%region, %tenancy, "requesting instance principal security token");

        let url = match &self.federation_url {
            Some(url) => url.join("v1/x509")?,
            None => Url::parse(&format!("https://auth.{}.oraclecloud.com/v1/x509", region))?,
        };
        let body = FederationRequest {
            certificate: STANDARD.encode(leaf_cert.contents()),
            public_key: STANDARD.encode(public_key_der(&session_key)?),
            intermediate_certificates: vec![STANDARD.encode(intermediate.contents())],
            purpose: "DEFAULT",
            fingerprint_algorithm: "SHA256",
        };
        let mut request = self.client.post(url).json(&body).build()?;
        leaf_signer.sign(&mut request)?;

        let response = self.client.execute(request).await?;
        if !response.status().is_success() {
            return Err(InitError::Status("federation endpoint", response.status()));
        }
        let token = response.json::<TokenResponse>().await?.token;
        if token.is_empty() {
            return Err(InitError::Empty("security token"));
        }

        Ok(AuthContext::new(
            Strategy::InstancePrincipal,
            region,
            RequestSigner::new(format!("{}{}", SECURITY_TOKEN_PREFIX, token), session_key),
        ))
    }
}

#[async_trait::async_trait]
impl AuthProvider for OciAuthProvider {
    async fn workload_identity(&self) -> Result<AuthContext, AuthError> {
        self.oke_workload_identity(|name| env::var(name).ok())
            .await
            .map_err(AuthError::init(Strategy::WorkloadIdentity))
    }

    fn explicit(&self, bundle: CredentialBundle) -> Result<AuthContext, AuthError> {
        let key_id = format!(
            "{}/{}/{}",
            bundle.tenancy.trim(),
            bundle.user.trim(),
            bundle.fingerprint.trim()
        );
        let signer = RequestSigner::from_pem(
            key_id,
            &bundle.private_key,
            Some(&bundle.private_key_passphrase),
        )
        .map_err(|e| AuthError::Init {
            strategy: Strategy::ExplicitCredential,
            source: e.into(),
        })?;

        Ok(AuthContext::new(
            Strategy::ExplicitCredential,
            canonical_region(&bundle.region),
            signer,
        ))
    }

    async fn instance_principal(&self) -> Result<AuthContext, AuthError> {
        self.federate()
            .await
            .map_err(AuthError::init(Strategy::InstancePrincipal))
    }
}

/// Reads the tenancy OCID from the `opc-tenant:` (or `opc-identity:`) subject attribute.
fn tenancy_from_certificate(der: &[u8]) -> Result<String, InitError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|_| InitError::Certificate("unable to parse leaf certificate"))?;

    let tenancy = cert
        .subject()
        .iter_attributes()
        .filter_map(|attr| attr.as_str().ok())
        .find_map(|value| TENANT_PREFIXES.iter().find_map(|p| value.strip_prefix(p)))
        .filter(|tenancy| !tenancy.is_empty())
        .map(ToOwned::to_owned)
        .ok_or(InitError::Certificate("no opc-tenant subject attribute"));
    tenancy
}

fn certificate_fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenExchangeRequest {
    pod_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FederationRequest {
    certificate: String,
    public_key: String,
    intermediate_certificates: Vec<String>,
    purpose: &'static str,
    fingerprint_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::PathBuf};

    use super::*;
    use crate::auth::{
        credentials::{tests::complete_secret, PRIVATE_KEY, PRIVATE_KEY_PASSPHRASE},
        signer::tests::{session_key, PKCS8_KEY, SPKI},
    };
    use httptest::{all_of, matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    const LEAF_CERT: &str = include_str!("../testdata/test_leaf_cert.pem");
    const LEAF_FINGERPRINT: &str = "79:53:60:3F:83:AF:47:7A:A0:6A:D8:6C:59:96:71:BC:3D:64:CE:D0:A5:86:16:11:08:A6:53:9E:3F:80:B4:B3";
    const ENCRYPTED_KEY: &str = include_str!("../testdata/test_key_encrypted.pem");
    const SESSION_SPKI: &[u8] = include_bytes!("../testdata/test_session_key_spki.der");

    fn provider(imds: &str) -> OciAuthProvider {
        let mut provider = OciAuthProvider::new(imds, Client::new()).unwrap();
        provider.session_key = session_key;
        provider
    }

    fn leaf_der() -> Vec<u8> {
        pem::parse(LEAF_CERT).unwrap().into_contents()
    }

    /// Service account token file unique to the calling test.
    fn token_file(test: &str, contents: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("oci-wi-{}-{}", test, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");
        fs::write(&path, contents).unwrap();
        path
    }

    fn oke_env(
        overrides: &[(&'static str, Option<&str>)],
    ) -> impl Fn(&'static str) -> Option<String> {
        let mut env: HashMap<&'static str, Option<String>> = HashMap::from([
            (RP_VERSION, Some("2.2".to_owned())),
            (RP_REGION, Some("phx".to_owned())),
        ]);
        for (name, value) in overrides {
            env.insert(*name, value.map(ToOwned::to_owned));
        }
        move |name| env.get(name).cloned().flatten()
    }

    fn token_body(token: &str) -> String {
        STANDARD.encode(json!({ "token": token }).to_string())
    }

    #[tokio::test]
    async fn workload_identity_exchanges_service_account_token() {
        let token = token_file("exchange", "sa-token\n");
        let pod_key = public_key_pem(&session_key().unwrap()).unwrap();
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/resourcePrincipalSessionTokens"),
                request::headers(contains(("authorization", "Bearer sa-token"))),
                request::body(json_decoded(eq(json!({ "podKey": pod_key })))),
            ])
            .respond_with(status_code(200).body(token_body("ST$rpst-token"))),
        );

        let provider = provider("http://127.0.0.1:1/")
            .with_token_exchange_url(Url::parse(&server.url_str("/")).unwrap());
        let path = token.to_string_lossy().into_owned();
        let ctx = provider
            .oke_workload_identity(oke_env(&[(SA_TOKEN_PATH, Some(path.as_str()))]))
            .await
            .unwrap();

        assert_eq!(ctx.strategy(), Strategy::WorkloadIdentity);
        assert_eq!(ctx.region(), "us-phoenix-1");
        assert_eq!(ctx.signer().key_id(), "ST$rpst-token");
        assert_eq!(ctx.signer().public_key_der().unwrap(), SESSION_SPKI);
    }

    #[tokio::test]
    async fn workload_identity_needs_only_version_and_region() {
        let token = token_file("minimal", "sa-token");
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/resourcePrincipalSessionTokens"))
                .respond_with(status_code(200).body(token_body("unprefixed"))),
        );

        let provider = provider("http://127.0.0.1:1/")
            .with_token_exchange_url(Url::parse(&server.url_str("/")).unwrap());
        let path = token.to_string_lossy().into_owned();
        let ctx = provider
            .oke_workload_identity(oke_env(&[(SA_TOKEN_PATH, Some(path.as_str()))]))
            .await
            .unwrap();
        assert_eq!(ctx.signer().key_id(), "ST$unprefixed");
    }

    #[tokio::test]
    async fn workload_identity_requires_environment() {
        let provider = provider("http://127.0.0.1:1/");
        assert!(matches!(
            provider.oke_workload_identity(oke_env(&[(RP_REGION, None)])).await,
            Err(InitError::MissingEnv(RP_REGION))
        ));
        assert!(matches!(
            provider
                .oke_workload_identity(oke_env(&[(RP_VERSION, Some("1.1"))]))
                .await,
            Err(InitError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            provider
                .oke_workload_identity(oke_env(&[(SA_TOKEN_PATH, Some("/nonexistent/token"))]))
                .await,
            Err(InitError::Io(_))
        ));

        let token = token_file("no-host", "sa-token");
        let path = token.to_string_lossy().into_owned();
        assert!(matches!(
            provider
                .oke_workload_identity(oke_env(&[(SA_TOKEN_PATH, Some(path.as_str()))]))
                .await,
            Err(InitError::MissingEnv(KUBERNETES_SERVICE_HOST))
        ));
    }

    #[tokio::test]
    async fn workload_identity_rejected_exchange() {
        let token = token_file("rejected", "sa-token");
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/resourcePrincipalSessionTokens"))
                .respond_with(status_code(403)),
        );

        let provider = provider("http://127.0.0.1:1/")
            .with_token_exchange_url(Url::parse(&server.url_str("/")).unwrap());
        let path = token.to_string_lossy().into_owned();
        let err = provider
            .oke_workload_identity(oke_env(&[(SA_TOKEN_PATH, Some(path.as_str()))]))
            .await
            .unwrap_err();
        assert!(matches!(err, InitError::Status(_, status) if status.as_u16() == 403));
    }

    #[test]
    fn explicit_credentials_build_api_key_id() {
        let provider = provider("http://127.0.0.1:1/");
        let mut data = complete_secret();
        data.insert(PRIVATE_KEY.into(), PKCS8_KEY.as_bytes().to_vec());
        data.insert("region".into(), b"fra".to_vec());
        data.insert("fingerprint".into(), b"aa:bb\n".to_vec());
        let bundle = CredentialBundle::from_lookup(Ok(data), "ns", "oci").unwrap();

        let ctx = provider.explicit(bundle).unwrap();
        assert_eq!(ctx.strategy(), Strategy::ExplicitCredential);
        assert_eq!(ctx.region(), "eu-frankfurt-1");
        assert_eq!(ctx.signer().key_id(), "tenancy-value/user-value/aa:bb");
    }

    #[test]
    fn explicit_credentials_decrypt_with_passphrase() {
        let provider = provider("http://127.0.0.1:1/");
        let mut data = complete_secret();
        data.insert(PRIVATE_KEY.into(), ENCRYPTED_KEY.as_bytes().to_vec());
        data.insert(PRIVATE_KEY_PASSPHRASE.into(), b"secret".to_vec());
        let bundle = CredentialBundle::from_lookup(Ok(data), "ns", "oci").unwrap();

        let ctx = provider.explicit(bundle).unwrap();
        assert_eq!(ctx.signer().public_key_der().unwrap(), SPKI);
    }

    #[test]
    fn explicit_credentials_with_bad_key_fail() {
        let provider = provider("http://127.0.0.1:1/");
        let bundle = CredentialBundle::from_lookup(Ok(complete_secret()), "ns", "oci").unwrap();

        let err = provider.explicit(bundle).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("unable to authenticate with user credentials"));
    }

    #[test]
    fn reads_tenancy_from_certificate() {
        let der = leaf_der();
        assert_eq!(
            tenancy_from_certificate(&der).unwrap(),
            "ocid1.tenancy.oc1..aaaatesttenancy"
        );
        assert_eq!(certificate_fingerprint(&der), LEAF_FINGERPRINT);
        assert!(matches!(
            tenancy_from_certificate(b"no tenant here"),
            Err(InitError::Certificate(_))
        ));
    }

    #[tokio::test]
    async fn instance_principal_federates_a_session_key() {
        let server = Server::run();
        let metadata = |path: &'static str, body: &'static str| {
            Expectation::matching(all_of![
                request::method_path("GET", path),
                request::headers(contains(("authorization", "Bearer Oracle"))),
            ])
            .respond_with(status_code(200).body(body))
        };
        server.expect(metadata("/opc/v2/instance/region", "iad\n"));
        server.expect(metadata("/opc/v2/identity/cert.pem", LEAF_CERT));
        server.expect(metadata("/opc/v2/identity/key.pem", PKCS8_KEY));
        server.expect(metadata("/opc/v2/identity/intermediate.pem", LEAF_CERT));
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/v1/x509"),
                request::headers(contains((
                    "authorization",
                    matches(format!(
                        "keyId=\"ocid1.tenancy.oc1..aaaatesttenancy/fed-x509-sha256/{}\"",
                        LEAF_FINGERPRINT
                    ))
                ))),
                request::body(json_decoded(eq(json!({
                    "certificate": STANDARD.encode(leaf_der()),
                    "publicKey": STANDARD.encode(SESSION_SPKI),
                    "intermediateCertificates": [STANDARD.encode(leaf_der())],
                    "purpose": "DEFAULT",
                    "fingerprintAlgorithm": "SHA256",
                })))),
            ])
            .respond_with(json_encoded(json!({ "token": "security-token" }))),
        );

        let provider = provider(&server.url_str("/opc/v2/"))
            .with_federation_url(Url::parse(&server.url_str("/")).unwrap());
        let ctx = provider.instance_principal().await.unwrap();

        assert_eq!(ctx.strategy(), Strategy::InstancePrincipal);
        assert_eq!(ctx.region(), "us-ashburn-1");
        assert_eq!(ctx.signer().key_id(), "ST$security-token");
        let signing_key = ctx.signer().public_key_der().unwrap();
        assert_eq!(signing_key, SESSION_SPKI);
        assert_ne!(signing_key, SPKI);
    }

    #[tokio::test]
    async fn instance_principal_fails_without_metadata_service() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/opc/v2/instance/region"))
                .respond_with(status_code(404)),
        );

        let err = provider(&server.url_str("/opc/v2/"))
            .instance_principal()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Init {
                strategy: Strategy::InstancePrincipal,
                source: InitError::Status(..),
            }
        ));
    }
}
