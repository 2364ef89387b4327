//! TLS client material for PD, read from Kubernetes secrets

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::error::{Error, Result};

use super::client::CertSource;

/// CA certificate key in the client secret
pub const CA_KEY: &str = "ca.crt";
/// Client certificate key in the client secret
pub const CERT_KEY: &str = "tls.crt";
/// Client private key key in the client secret
pub const KEY_KEY: &str = "tls.key";

/// Name of the secret holding a cluster's client certificate
pub fn client_tls_secret_name(cluster: &str) -> String {
    format!("{}-cluster-client-secret", cluster)
}

/// TLS credentials structure
#[derive(Debug, Clone)]
pub struct TlsCredentials {
    pub ca_cert: String,
    pub client_cert: String,
    pub client_key: String,
}

/// Fetch a secret from Kubernetes
pub async fn get_secret(client: &Client, name: &str, namespace: &str) -> Result<Secret> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets.get(name).await.map_err(|e| match e {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            Error::SecretNotFound(format!("{}/{}", namespace, name))
        }
        other => Error::Kube(other),
    })
}

/// Get a string value from a secret
pub fn get_secret_string(secret: &Secret, key: &str) -> Result<String> {
    let missing = || Error::SecretKeyNotFound {
        secret: secret.metadata.name.clone().unwrap_or_default(),
        key: key.to_string(),
    };
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(missing)?;

    String::from_utf8(bytes.0.clone())
        .map_err(|e| Error::Tls(format!("Invalid UTF-8 in secret key '{}': {}", key, e)))
}

/// Fetch the client TLS credentials of `source`
pub async fn load_client_tls(client: &Client, source: &CertSource) -> Result<TlsCredentials> {
    let secret = get_secret(
        client,
        &client_tls_secret_name(&source.cluster),
        &source.namespace,
    )
    .await?;
    credentials_from_secret(&secret)
}

/// Extract the CA, certificate and key from a client secret
pub fn credentials_from_secret(secret: &Secret) -> Result<TlsCredentials> {
    Ok(TlsCredentials {
        ca_cert: get_secret_string(secret, CA_KEY)?,
        client_cert: get_secret_string(secret, CERT_KEY)?,
        client_key: get_secret_string(secret, KEY_KEY)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(keys: &[(&str, &str)]) -> Secret {
        let data: BTreeMap<String, ByteString> = keys
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        Secret {
            metadata: ObjectMeta {
                name: Some("demo-cluster-client-secret".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_secret_name() {
        assert_eq!(client_tls_secret_name("demo"), "demo-cluster-client-secret");
    }

    #[test]
    fn test_credentials_from_secret() {
        let creds = credentials_from_secret(&secret(&[
            (CA_KEY, "ca"),
            (CERT_KEY, "cert"),
            (KEY_KEY, "key"),
        ]))
        .unwrap();
        assert_eq!(creds.ca_cert, "ca");
        assert_eq!(creds.client_cert, "cert");
        assert_eq!(creds.client_key, "key");
    }

    #[test]
    fn test_missing_key_names_secret_and_key() {
        let err = credentials_from_secret(&secret(&[(CA_KEY, "ca")])).unwrap_err();
        match err {
            Error::SecretKeyNotFound { secret, key } => {
                assert_eq!(secret, "demo-cluster-client-secret");
                assert_eq!(key, CERT_KEY);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
