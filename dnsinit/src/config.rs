//! Bootstrap configuration read from the cluster
//!
//! The controller reads a YAML document from the `config` key of the
//! `default/ingress-config` ConfigMap, then resolves provider credentials
//! from the Secret that document names.
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace holding the bootstrap ConfigMap and Secret
pub const CONFIG_NAMESPACE: &str = "default";
/// Name of the bootstrap ConfigMap
pub const CONFIG_MAP_NAME: &str = "ingress-config";
/// Key of the YAML document inside the ConfigMap
pub const CONFIG_KEY: &str = "config";

const SERVICE_PRINCIPAL_KEY: &str = "servicePrincipal";
const CLIENT_SECRET_KEY: &str = "secret";

/// Possible errors when loading configuration
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read ConfigMap {name}: {source}")]
    ReadConfigMap {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("ConfigMap {0} has no \"config\" entry")]
    MissingDocument(String),
    #[error("failed to parse configuration document: {0}")]
    Parse(#[source] serde_yaml::Error),
    #[error("failed to read Secret {name}: {source}")]
    ReadSecret {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("Secret {secret} has no {key:?} entry")]
    MissingSecretKey { secret: String, key: &'static str },
    #[error("Secret {secret} entry {key:?} is not valid UTF-8")]
    InvalidSecretKey { secret: String, key: &'static str },
}

/// The parsed bootstrap document
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ControllerConfig {
    pub dns: DnsConfig,
    pub azure: AzureConfig,
}

/// Routing domain settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    /// DNS zone records are created in
    pub domain: String,
    /// Target every created CNAME points at
    #[serde(rename = "defaultCName")]
    pub default_cname: String,
}

/// Provider credential settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    pub tenant: String,
    pub subscription: String,
    pub resource_group: String,
    /// Name of the Secret holding the service principal
    #[serde(alias = "secret")]
    pub secret_ref: String,
}

/// Service principal material resolved from a Secret
#[derive(Clone, Debug)]
pub struct Credentials {
    pub service_principal: String,
    pub client_secret: SecretString,
}

impl ControllerConfig {
    /// Parse the YAML bootstrap document
    pub fn from_yaml(doc: &str) -> Result<Self, Error> {
        serde_yaml::from_str(doc).map_err(Error::Parse)
    }

    /// Read and parse the bootstrap ConfigMap
    pub async fn load(client: Client) -> Result<Self, Error> {
        let cms: Api<ConfigMap> = Api::namespaced(client, CONFIG_NAMESPACE);
        let cm = cms.get(CONFIG_MAP_NAME).await.map_err(|source| Error::ReadConfigMap {
            name: CONFIG_MAP_NAME.into(),
            source,
        })?;
        let doc = cm
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
            .ok_or_else(|| Error::MissingDocument(CONFIG_MAP_NAME.into()))?;
        Self::from_yaml(doc)
    }
}

impl Credentials {
    /// Read the Secret named by [`AzureConfig::secret_ref`]
    pub async fn load(client: Client, azure: &AzureConfig) -> Result<Self, Error> {
        let secrets: Api<Secret> = Api::namespaced(client, CONFIG_NAMESPACE);
        let secret = secrets
            .get(&azure.secret_ref)
            .await
            .map_err(|source| Error::ReadSecret {
                name: azure.secret_ref.clone(),
                source,
            })?;
        Self::from_secret(&secret, &azure.secret_ref)
    }

    fn from_secret(secret: &Secret, name: &str) -> Result<Self, Error> {
        let field = |key: &'static str| {
            let raw = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .ok_or_else(|| Error::MissingSecretKey {
                    secret: name.into(),
                    key,
                })?;
            String::from_utf8(raw.0.clone()).map_err(|_| Error::InvalidSecretKey {
                secret: name.into(),
                key,
            })
        };
        Ok(Self {
            service_principal: field(SERVICE_PRINCIPAL_KEY)?,
            client_secret: field(CLIENT_SECRET_KEY)?.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use secrecy::ExposeSecret;
    use std::collections::BTreeMap;

    #[test]
    fn parses_bootstrap_document() {
        let cfg = ControllerConfig::from_yaml(
            r#"
dns:
  domain: example.com
  defaultCName: lb.example.com
azure:
  tenant: t
  subscription: s
  resourceGroup: rg
  secretRef: azure-sp
"#,
        )
        .unwrap();
        assert_eq!(cfg.dns.default_cname, "lb.example.com");
        assert_eq!(cfg.azure.resource_group, "rg");
        assert_eq!(cfg.azure.secret_ref, "azure-sp");
    }

    #[test]
    fn accepts_legacy_secret_key() {
        let cfg = ControllerConfig::from_yaml(
            "dns: {domain: d, defaultCName: c}\n\
             azure: {tenant: t, subscription: s, resourceGroup: rg, secret: sp}",
        )
        .unwrap();
        assert_eq!(cfg.azure.secret_ref, "sp");
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let err = ControllerConfig::from_yaml("dns: {domain: d, defaultCName: c}").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn credentials_come_from_secret_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("servicePrincipal".to_string(), ByteString(b"sp-id".to_vec())),
                ("secret".to_string(), ByteString(b"hunter2".to_vec())),
            ])),
            ..Secret::default()
        };
        let creds = Credentials::from_secret(&secret, "azure-sp").unwrap();
        assert_eq!(creds.service_principal, "sp-id");
        assert_eq!(creds.client_secret.expose_secret(), "hunter2");

        let empty = Secret::default();
        let err = Credentials::from_secret(&empty, "azure-sp").unwrap_err();
        assert!(matches!(err, Error::MissingSecretKey { key: "servicePrincipal", .. }));
    }
}
