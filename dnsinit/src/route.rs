//! The `Route` custom resource and host name helpers
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pending::Initializers;

/// Routing rules for a set of hosts, initialized by this controller before use
///
/// Clusters no longer carry `metadata.initializers`, so the queue of pending
/// initializers lives in the spec using the same wire shape.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "sample.io", version = "v1", kind = "Route", namespaced)]
#[kube(shortname = "rt")]
pub struct RouteSpec {
    /// Initializers still owed to this object, in application order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializers: Option<Initializers>,
    /// Host rules, in declaration order
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

/// A single host rule
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RouteRule {
    /// Fully qualified host, e.g. `app.example.com`
    pub host: String,
}

impl RouteRule {
    /// The leftmost label of [`RouteRule::host`]
    pub fn hostname(&self) -> Result<&str, HostnameError> {
        hostname(&self.host)
    }
}

/// A rule host that cannot be turned into a record name
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostnameError {
    #[error("host {0:?} has no domain part")]
    NoDomain(String),
    #[error("host {0:?} has an empty leftmost label")]
    EmptyLabel(String),
}

/// Derive the record name of a host: everything before the first `.`
///
/// A host without a dot is rejected rather than used as-is.
pub fn hostname(host: &str) -> Result<&str, HostnameError> {
    match host.split_once('.') {
        None => Err(HostnameError::NoDomain(host.to_string())),
        Some(("", _)) => Err(HostnameError::EmptyLabel(host.to_string())),
        Some((label, _)) => Ok(label),
    }
}

impl Route {
    /// Hosts of all rules, for logging
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.spec.rules.iter().map(|r| r.host.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn hostname_is_leftmost_label() {
        assert_eq!(hostname("app.example.com"), Ok("app"));
        assert_eq!(hostname("svc.cluster.example.com"), Ok("svc"));
    }

    #[test]
    fn hostname_without_dot_is_an_error() {
        assert_eq!(
            hostname("localhost"),
            Err(HostnameError::NoDomain("localhost".into()))
        );
        assert_eq!(hostname(".example.com"), Err(HostnameError::EmptyLabel(".example.com".into())));
    }

    #[test]
    fn route_deserializes_pending_initializers() {
        let route: Route = serde_json::from_value(serde_json::json!({
            "apiVersion": "sample.io/v1",
            "kind": "Route",
            "metadata": { "name": "x", "namespace": "apps" },
            "spec": {
                "initializers": { "pending": [{ "name": "ingress.initializer.sample.io" }] },
                "rules": [{ "host": "svc.cluster.example.com" }]
            }
        }))
        .unwrap();
        let pending = route.spec.initializers.as_ref().unwrap();
        assert_eq!(pending.first(), Some("ingress.initializer.sample.io"));
        assert_eq!(route.hosts().collect::<Vec<_>>(), vec!["svc.cluster.example.com"]);
        assert_eq!(Route::kind(&()), "Route");
    }

    #[test]
    fn absent_initializers_are_not_serialized() {
        let route = Route::new("x", RouteSpec::default());
        let value = serde_json::to_value(&route).unwrap();
        assert!(value["spec"].get("initializers").is_none());
    }
}
