use std::fmt::{self, Write};

use crate::secrets::{SecretData, SecretStoreError};

pub const TENANCY: &str = "tenancy";
pub const USER: &str = "user";
pub const REGION: &str = "region";
pub const FINGERPRINT: &str = "fingerprint";
pub const PRIVATE_KEY: &str = "privateKey";
pub const PRIVATE_KEY_PASSPHRASE: &str = "privateKeyPassphrase";

/// API-key credentials read from a stored profile secret.
///
/// Only built when all six fields are present; it is handed to the auth provider by value
/// and dropped with it.
pub struct CredentialBundle {
    pub tenancy: String,
    pub user: String,
    pub region: String,
    pub fingerprint: String,
    pub private_key: String,
    pub private_key_passphrase: String,
}

impl CredentialBundle {
    /// Extracts a complete bundle from a secret lookup.
    ///
    /// On failure returns a diagnostic listing the lookup error and every missing field.
    pub fn from_lookup(
        lookup: Result<SecretData, SecretStoreError>,
        namespace: &str,
        name: &str,
    ) -> Result<Self, String> {
        let mut diagnostic = String::new();
        let mut data = match lookup {
            Ok(data) => data,
            Err(e) => {
                let _ = writeln!(
                    diagnostic,
                    "unable to get secret `{}/{}`; {}",
                    namespace, name, e
                );
                SecretData::new()
            }
        };

        let mut field = |key: &str| match data.remove(key).map(String::from_utf8) {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => {
                let _ = writeln!(
                    diagnostic,
                    "unable to get {} from secret `{}/{}`; value is not UTF-8: {}",
                    key, namespace, name, e
                );
                None
            }
            None => {
                let _ = writeln!(
                    diagnostic,
                    "unable to get {} from secret `{}/{}`; key {:?} not found in secret data",
                    key, namespace, name, key
                );
                None
            }
        };

        let tenancy = field(TENANCY);
        let user = field(USER);
        let region = field(REGION);
        let fingerprint = field(FINGERPRINT);
        let private_key = field(PRIVATE_KEY);
        let private_key_passphrase = field(PRIVATE_KEY_PASSPHRASE);

        match (
            tenancy,
            user,
            region,
            fingerprint,
            private_key,
            private_key_passphrase,
        ) {
            (
                Some(tenancy),
                Some(user),
                Some(region),
                Some(fingerprint),
                Some(private_key),
                Some(private_key_passphrase),
            ) => Ok(Self {
                tenancy,
                user,
                region,
                fingerprint,
                private_key,
                private_key_passphrase,
            }),
            _ => Err(diagnostic.trim_end().to_owned()),
        }
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("tenancy", &self.tenancy)
            .field("user", &self.user)
            .field("region", &self.region)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
