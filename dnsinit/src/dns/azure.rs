use std::time::Duration;

use form_urlencoded::Serializer;
use http::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, Request, Version,
};
use http_body_util::BodyExt;
use hyper_timeout::TimeoutConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{DnsBinding, Error, RecordInfo};
use crate::config::{AzureConfig, Credentials, DnsConfig};

type HttpsConnector = TimeoutConnector<hyper_rustls::HttpsConnector<HttpConnector>>;

const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const DNS_API_VERSION: &str = "2018-05-01";
const RECORD_TTL: u32 = 300;

// per connection; a stalled provider fails the binding rather than holding it
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Azure DNS binding that points every host label at the configured default CNAME
///
/// Each call requests a fresh service principal token and issues a `CreateOrUpdate`
/// on the `CNAME` record set, which is idempotent for the same name.
pub struct AzureDns {
    client_id: String,
    client_secret: SecretString,
    azure: AzureConfig,
    dns: DnsConfig,
    https_client: Client<HttpsConnector, String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: SecretString,
}

#[derive(Deserialize)]
struct RecordSet {
    name: String,
    #[serde(default)]
    properties: Option<RecordSetProperties>,
}

#[derive(Deserialize)]
struct RecordSetProperties {
    fqdn: Option<String>,
}

impl AzureDns {
    /// Create a binding for the zone `dns.domain` in the given subscription
    pub fn new(credentials: Credentials, azure: AzureConfig, dns: DnsConfig) -> Result<Self, Error> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|_| Error::NoValidNativeRootCA)?
            .https_only()
            .enable_http1()
            .build();
        let mut connector = TimeoutConnector::new(https);
        set_timeouts(&mut connector);
        let https_client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client_id: credentials.service_principal,
            client_secret: credentials.client_secret,
            azure,
            dns,
            https_client,
        })
    }

    async fn access_token(&self) -> Result<SecretString, Error> {
        let request = token_request(
            LOGIN_ENDPOINT,
            &self.azure.tenant,
            &self.client_id,
            &self.client_secret,
        )?;
        let body = self.send(request).await?;
        let token = serde_json::from_slice::<TokenResponse>(&body).map_err(Error::InvalidResponse)?;
        Ok(token.access_token)
    }

    async fn send(&self, request: Request<String>) -> Result<bytes::Bytes, Error> {
        let response = self.https_client.request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }
}

impl DnsBinding for AzureDns {
    async fn ensure_record(&self, hostname: &str) -> Result<RecordInfo, Error> {
        info!(record = hostname, zone = %self.dns.domain, "ensuring record in Azure DNS");
        let token = self.access_token().await?;
        let request = record_request(
            MANAGEMENT_ENDPOINT,
            &self.azure,
            &self.dns,
            token.expose_secret(),
            hostname,
        )?;
        let body = self.send(request).await?;
        let record = serde_json::from_slice::<RecordSet>(&body).map_err(Error::InvalidResponse)?;
        debug!(record = %record.name, "record set stored");
        Ok(RecordInfo {
            name: record.name,
            fqdn: record.properties.and_then(|p| p.fqdn),
        })
    }
}

fn set_timeouts<C>(connector: &mut TimeoutConnector<C>) {
    connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    connector.set_read_timeout(Some(READ_TIMEOUT));
    connector.set_write_timeout(Some(WRITE_TIMEOUT));
}

/// Client credentials grant for the management API
fn token_request(
    endpoint: &str,
    tenant: &str,
    client_id: &str,
    client_secret: &SecretString,
) -> Result<Request<String>, http::Error> {
    let resource = format!("{MANAGEMENT_ENDPOINT}/");
    let body = Serializer::new(String::new())
        .extend_pairs([
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("resource", resource.as_str()),
        ])
        .finish();
    Request::builder()
        .uri(format!("{endpoint}/{tenant}/oauth2/token"))
        .method(Method::POST)
        .header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        )
        .version(Version::HTTP_11)
        .body(body)
}

/// `CreateOrUpdate` of the CNAME record set named `hostname`
fn record_request(
    endpoint: &str,
    azure: &AzureConfig,
    dns: &DnsConfig,
    token: &str,
    hostname: &str,
) -> Result<Request<String>, http::Error> {
    let uri = format!(
        "{endpoint}/subscriptions/{}/resourceGroups/{}\
         /providers/Microsoft.Network/dnsZones/{}/CNAME/{hostname}?api-version={DNS_API_VERSION}",
        azure.subscription, azure.resource_group, dns.domain,
    );
    let body = json!({
        "properties": {
            "TTL": RECORD_TTL,
            "CNAMERecord": { "cname": dns.default_cname },
        }
    });
    Request::builder()
        .uri(uri)
        .method(Method::PUT)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .version(Version::HTTP_11)
        .body(body.to_string())
}
