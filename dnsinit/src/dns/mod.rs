//! DNS record bindings for route hosts
use std::future::Future;

use http::StatusCode;
use thiserror::Error;

mod azure;
pub use azure::AzureDns;

/// A record that exists at the provider after [`DnsBinding::ensure_record`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordInfo {
    /// Record name relative to the zone
    pub name: String,
    /// Fully qualified name, when the provider reports one
    pub fqdn: Option<String>,
}

/// Possible errors when binding a record
///
/// None of these are fatal to initialization; callers log them and carry on.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to build a provider request
    #[error("failed to build request: {0}")]
    BuildRequest(#[from] http::Error),
    /// Failed to reach the provider
    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
    /// Failed to read a provider response
    #[error("failed to read response: {0}")]
    ReadResponse(#[from] hyper::Error),
    /// Provider answered with a non-success status
    #[error("provider responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// Provider answered with a body we could not parse
    #[error("invalid provider response: {0}")]
    InvalidResponse(#[source] serde_json::Error),
    /// No usable root certificates for TLS
    #[error("no valid native root CA certificates found")]
    NoValidNativeRootCA,
}

/// Capability that makes sure a record exists for a host label
///
/// Implementations must be idempotent for the same `hostname` and safe to call repeatedly.
pub trait DnsBinding: Send + Sync {
    /// Create or refresh the record for `hostname`
    fn ensure_record(&self, hostname: &str) -> impl Future<Output = Result<RecordInfo, Error>> + Send;
}
