use std::{fmt, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST},
    Method, Request,
};
use pem::{EncodeConfig, LineEnding, Pem};
use pkcs8::{EncodePrivateKey, EncodePublicKey, EncryptedPrivateKeyInfo};
use ring::{
    rand::SystemRandom,
    signature::{KeyPair, RsaKeyPair, RSA_PKCS1_SHA256},
};
use rsa::{pkcs1::DecodeRsaPublicKey, rand_core::OsRng, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use url::Position;

const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);
const X_CONTENT_SHA256: &str = "x-content-sha256";
const SESSION_KEY_BITS: usize = 2048;

/// Signs OCI API requests (draft-cavage HTTP signatures, `rsa-sha256`).
#[derive(Clone)]
pub struct RequestSigner {
    key_id: String,
    key: Arc<RsaKeyPair>,
}

impl RequestSigner {
    pub fn new(key_id: impl Into<String>, key: RsaKeyPair) -> Self {
        Self {
            key_id: key_id.into(),
            key: Arc::new(key),
        }
    }

    pub fn from_pem(
        key_id: impl Into<String>,
        pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self, KeyError> {
        Ok(Self::new(key_id, parse_private_key(pem, passphrase)?))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// DER `SubjectPublicKeyInfo` of the signing key.
    pub fn public_key_der(&self) -> Result<Vec<u8>, KeyError> {
        public_key_der(&self.key)
    }

    pub fn sign(&self, request: &mut Request) -> Result<(), KeyError> {
        let date = OffsetDateTime::now_utc()
            .format(HTTP_DATE)
            .map_err(|_| KeyError::Signing)?;
        let url = request.url();
        let host = url[Position::BeforeHost..Position::AfterPort].to_owned();
        let target = format!(
            "{} {}",
            request.method().as_str().to_lowercase(),
            &url[Position::BeforePath..Position::AfterQuery]
        );

        let mut headers = vec![
            ("date", date),
            ("(request-target)", target),
            ("host", host.clone()),
        ];

        if [Method::POST, Method::PUT, Method::PATCH].contains(request.method()) {
            let body = request
                .body()
                .and_then(|b| b.as_bytes())
                .unwrap_or_default();
            let digest = STANDARD.encode(Sha256::digest(body));
            let content_type = request
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_owned();

            headers.push(("content-length", body.len().to_string()));
            headers.push(("content-type", content_type));
            headers.push((X_CONTENT_SHA256, digest));
        }

        let signing_string = headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("\n");

        let mut signature = vec![0; self.key.public().modulus_len()];
        self.key
            .sign(
                &RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                signing_string.as_bytes(),
                &mut signature,
            )
            .map_err(|_| KeyError::Signing)?;

        let authorization = format!(
            "Signature version=\"1\",headers=\"{}\",keyId=\"{}\",algorithm=\"rsa-sha256\",signature=\"{}\"",
            headers.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(" "),
            self.key_id,
            STANDARD.encode(signature),
        );

        for (name, value) in headers {
            let value = HeaderValue::from_str(&value).map_err(|_| KeyError::Signing)?;
            match name {
                "(request-target)" => continue,
                "date" => request.headers_mut().insert(DATE, value),
                "host" => request.headers_mut().insert(HOST, value),
                "content-length" => request.headers_mut().insert(CONTENT_LENGTH, value),
                "content-type" => request.headers_mut().insert(CONTENT_TYPE, value),
                other => request.headers_mut().insert(other, value),
            };
        }
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization).map_err(|_| KeyError::Signing)?,
        );

        Ok(())
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed PEM: {0}")]
    Pem(#[from] pem::PemError),
    #[error("legacy encrypted PEM keys are not supported; convert the key to encrypted PKCS#8")]
    LegacyEncrypted,
    #[error("private key is encrypted but no passphrase was given")]
    PassphraseRequired,
    #[error("unable to decode PKCS#8 key: {0}")]
    Pkcs8(#[from] pkcs8::Error),
    #[error("unsupported PEM block `{0}`")]
    UnsupportedLabel(String),
    #[error("private key rejected: {0}")]
    Rejected(#[from] ring::error::KeyRejected),
    #[error("unable to encode public key: {0}")]
    PublicKey(#[from] pkcs8::spki::Error),
    #[error("invalid RSA public key: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),
    #[error("unable to generate session key: {0}")]
    Generate(#[from] rsa::Error),
    #[error("unable to sign request")]
    Signing,
}

/// Parses an RSA private key in PKCS#1, PKCS#8 or passphrase-protected PKCS#8 PEM form.
///
/// The passphrase is ignored for unencrypted keys.
pub fn parse_private_key(input: &str, passphrase: Option<&str>) -> Result<RsaKeyPair, KeyError> {
    let block = pem::parse(input.trim())?;
    if block
        .headers()
        .get("Proc-Type")
        .map_or(false, |v| v.contains("ENCRYPTED"))
    {
        return Err(KeyError::LegacyEncrypted);
    }

    match block.tag() {
        "PRIVATE KEY" => Ok(RsaKeyPair::from_pkcs8(block.contents())?),
        "RSA PRIVATE KEY" => Ok(RsaKeyPair::from_der(block.contents())?),
        "ENCRYPTED PRIVATE KEY" => {
            let passphrase = passphrase
                .filter(|p| !p.is_empty())
                .ok_or(KeyError::PassphraseRequired)?;
            let document = EncryptedPrivateKeyInfo::try_from(block.contents())
                .map_err(pkcs8::Error::from)?
                .decrypt(passphrase)?;
            Ok(RsaKeyPair::from_pkcs8(document.as_bytes())?)
        }
        label => Err(KeyError::UnsupportedLabel(label.to_owned())),
    }
}

/// Fresh 2048-bit key for a federated session.
pub fn generate_session_key() -> Result<RsaKeyPair, KeyError> {
    let key = RsaPrivateKey::new(&mut OsRng, SESSION_KEY_BITS)?;
    let document = key.to_pkcs8_der()?;
    Ok(RsaKeyPair::from_pkcs8(document.as_bytes())?)
}

/// DER `SubjectPublicKeyInfo` of `key`.
pub fn public_key_der(key: &RsaKeyPair) -> Result<Vec<u8>, KeyError> {
    let public = RsaPublicKey::from_pkcs1_der(key.public_key().as_ref())?;
    Ok(public.to_public_key_der()?.into_vec())
}

/// `PUBLIC KEY` PEM block of `key`, `\n` line endings.
pub fn public_key_pem(key: &RsaKeyPair) -> Result<String, KeyError> {
    let block = Pem::new("PUBLIC KEY", public_key_der(key)?);
    Ok(pem::encode_config(
        &block,
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    ))
}
