//! Exactly-once initialization of newly created routes
//!
//! A route is owned by this controller while [`INITIALIZER_NAME`] heads its
//! pending initializer queue. On [`RouteInitializer::create`] the controller:
//!
//! 1. skips the route unless it is the owner,
//! 2. claims it by dropping its own name from the queue,
//! 3. stops there (beyond persisting the claim) when [`REQUIRED_ANNOTATION`] is missing,
//! 4. otherwise sets [`OUTPUT_ANNOTATION`] on the staged copy,
//! 5. persists the staged copy as a single merge patch guarded by the original `resourceVersion`,
//! 6. and, if the annotation was set and the patch landed, ensures a DNS record per rule host.
//!
//! Step 5 runs on every path once step 2 succeeded.
//! DNS failures are logged and never undo the persisted claim.
use kube::{
    api::{Api, PatchParams},
    runtime::reflector::ObjectRef,
    Client, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    dns::{DnsBinding, RecordInfo},
    patch::PatchDelta,
    route::Route,
    Error, Result,
};

/// Name this controller holds in the pending initializer queue
pub const INITIALIZER_NAME: &str = "ingress.initializer.sample.io";
/// Annotation a route must carry to be annotated and bound
pub const REQUIRED_ANNOTATION: &str = "initializer.sample.io/ingress";
/// Annotation set on initialized routes
pub const OUTPUT_ANNOTATION: &str = "ingress.sample.io";
/// Value of [`OUTPUT_ANNOTATION`]
pub const OUTPUT_VALUE: &str = "dns-initialized";

/// What [`RouteInitializer::create`] did with a route
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Not ours to initialize; nothing was written
    Skipped,
    /// Ownership released without annotating, since the required annotation was missing
    Claimed,
    /// Annotated, persisted and bound
    Initialized {
        /// Records ensured for rule hosts
        bound: Vec<RecordInfo>,
        /// Rules whose host was malformed or whose binding failed
        failed: usize,
    },
}

/// Ownership of a route taken from the front of its initializer queue
///
/// Holds the untouched original next to the staged copy. A claim can only be
/// released through [`Claim::scope`], which persists it exactly once.
#[must_use = "a claim must be persisted"]
struct Claim<'a> {
    original: &'a Route,
    staged: Route,
}

impl<'a> Claim<'a> {
    fn take(route: &'a Route, name: &str) -> Option<Self> {
        let queue = route.spec.initializers.as_ref()?;
        if !queue.is_owned_by(name) {
            return None;
        }
        let mut staged = route.clone();
        staged.spec.initializers = queue.remove_own(name);
        Some(Self {
            original: route,
            staged,
        })
    }

    /// Mutate the staged copy with `f`, then persist whatever it staged
    ///
    /// `f` may bail out early by returning; the claim is persisted regardless.
    async fn scope<T>(mut self, client: &Client, f: impl FnOnce(&mut Route) -> T) -> (T, Result<Route>) {
        let out = f(&mut self.staged);
        (out, self.persist(client).await)
    }

    async fn persist(self, client: &Client) -> Result<Route> {
        let name = self.original.metadata.name.clone().ok_or(Error::UnnamedObject)?;
        let namespace = self
            .original
            .namespace()
            .ok_or_else(|| Error::UnnamespacedObject(name.clone()))?;
        let delta = PatchDelta::between(self.original, &self.staged)
            .map_err(Error::SerializeSnapshot)?
            .guarded_by(self.original.metadata.resource_version.as_deref());
        debug!(patch = %delta.as_value(), "persisting route");

        let api: Api<Route> = Api::namespaced(client.clone(), &namespace);
        api.patch(&name, &PatchParams::default(), &delta.as_patch())
            .await
            .map_err(|source| Error::Persist { name, source })
    }
}

/// Drives the initializer state machine for routes
pub struct RouteInitializer<D> {
    client: Client,
    dns: D,
}

impl<D: DnsBinding> RouteInitializer<D> {
    pub fn new(client: Client, dns: D) -> Self {
        Self { client, dns }
    }

    /// Initialize a route that was just seen for the first time
    ///
    /// Safe to call repeatedly for the same object: once the claim is persisted
    /// the route is no longer owned and later calls skip it.
    #[instrument(skip(self, route), fields(route = %ObjectRef::from_obj(route)))]
    pub async fn create(&self, route: &Route) -> Result<Outcome> {
        let Some(claim) = Claim::take(route, INITIALIZER_NAME) else {
            let pending = route.spec.initializers.iter().flat_map(|q| q.names()).collect::<Vec<_>>();
            info!(?pending, "route skipped");
            return Ok(Outcome::Skipped);
        };

        let (annotated, persisted) = claim
            .scope(&self.client, |staged| {
                if !staged.annotations().contains_key(REQUIRED_ANNOTATION) {
                    info!(
                        required = REQUIRED_ANNOTATION,
                        "annotation missing; releasing route without initialization"
                    );
                    return false;
                }
                info!("initializing route");
                staged
                    .annotations_mut()
                    .insert(OUTPUT_ANNOTATION.into(), OUTPUT_VALUE.into());
                true
            })
            .await;

        let persisted = persisted.inspect_err(|err| {
            if err.is_conflict() {
                warn!(error = %err, "route modified concurrently; claim left unpersisted");
            } else {
                error!(error = %err, "failed to initialize route");
            }
        })?;
        if !annotated {
            return Ok(Outcome::Claimed);
        }

        let (bound, failed) = self.bind_hosts(&persisted).await;
        Ok(Outcome::Initialized { bound, failed })
    }

    async fn bind_hosts(&self, route: &Route) -> (Vec<RecordInfo>, usize) {
        let mut bound = Vec::new();
        let mut failed = 0;
        for rule in &route.spec.rules {
            let hostname = match rule.hostname() {
                Ok(hostname) => hostname,
                Err(err) => {
                    warn!(error = %err, "skipping malformed rule");
                    failed += 1;
                    continue;
                }
            };
            match self.dns.ensure_record(hostname).await {
                Ok(record) => {
                    info!(record = %record.name, "record ensured");
                    bound.push(record);
                }
                Err(err) => {
                    warn!(error = %err, hostname, "failed to ensure record");
                    failed += 1;
                }
            }
        }
        (bound, failed)
    }

    /// Changes to existing routes are not propagated to DNS
    pub async fn update(&self, old: &Route, new: &Route) -> Result<()> {
        debug!(
            route = %ObjectRef::from_obj(new),
            from = old.resource_version().as_deref().unwrap_or_default(),
            to = new.resource_version().as_deref().unwrap_or_default(),
            "ignoring route update"
        );
        Ok(())
    }

    /// Deleted routes keep their records; the hosts are only logged
    pub async fn delete(&self, route: &Route) -> Result<()> {
        for host in route.hosts() {
            info!(route = %ObjectRef::from_obj(route), host, "route deleted; leaving record in place");
        }
        Ok(())
    }
}
