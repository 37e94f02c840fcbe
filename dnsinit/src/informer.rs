//! Watch and periodic resync of routes, feeding a single dispatch loop
//!
//! The [`Informer`] keeps a live view of all routes through a watch plus a
//! full relist every [`Informer::DEFAULT_RESYNC`], and turns what it sees into
//! [`RouteEvent`]s on a bounded channel. [`dispatch`] drains that channel and
//! calls into the [`RouteInitializer`].
//!
//! Delivery is at least once: the same object may be seen again on relist or
//! after a watch restart, so handlers must be idempotent.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use kube::{
    api::{Api, ListParams},
    runtime::{reflector::ObjectRef, watcher, WatchStreamExt},
    Client, ResourceExt,
};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{dns::DnsBinding, initializer::RouteInitializer, route::Route, Error, Result};

/// A change to the set of routes, as seen by the informer
#[derive(Clone, Debug)]
pub enum RouteEvent {
    /// First sighting of an object
    Added(Arc<Route>),
    /// A known object was observed again, possibly unchanged
    Updated { old: Arc<Route>, new: Arc<Route> },
    /// The object is gone
    Deleted(Arc<Route>),
}

impl RouteEvent {
    /// Reference to the route this event is about
    pub fn object_ref(&self) -> ObjectRef<Route> {
        match self {
            RouteEvent::Added(route) | RouteEvent::Deleted(route) => ObjectRef::from_obj(&**route),
            RouteEvent::Updated { new, .. } => ObjectRef::from_obj(&**new),
        }
    }
}

/// Last seen snapshot of every route
///
/// Classifies observations from the watch stream and from relists into [`RouteEvent`]s.
#[derive(Debug, Default)]
pub struct ObjectCache {
    known: HashMap<ObjectRef<Route>, Arc<Route>>,
    // objects of an in-progress initial list
    pending_init: Option<Vec<Route>>,
    established: bool,
}

impl ObjectCache {
    /// Record an added or modified object
    pub fn apply(&mut self, route: Route) -> RouteEvent {
        let new = Arc::new(route);
        match self.known.insert(ObjectRef::from_obj(&*new), new.clone()) {
            Some(old) => RouteEvent::Updated { old, new },
            None => RouteEvent::Added(new),
        }
    }

    /// Record a deleted object
    pub fn delete(&mut self, route: Route) -> RouteEvent {
        let last = self.known.remove(&ObjectRef::from_obj(&route));
        RouteEvent::Deleted(last.unwrap_or_else(|| Arc::new(route)))
    }

    /// Replace the view with a full listing
    ///
    /// Every listed object is applied; known objects missing from the listing are deleted.
    pub fn relist(&mut self, routes: Vec<Route>) -> Vec<RouteEvent> {
        let listed = routes.iter().map(ObjectRef::from_obj).collect::<HashSet<_>>();
        let mut gone = self
            .known
            .keys()
            .filter(|key| !listed.contains(*key))
            .cloned()
            .collect::<Vec<_>>();
        gone.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

        let mut events = routes.into_iter().map(|r| self.apply(r)).collect::<Vec<_>>();
        events.extend(
            gone.into_iter()
                .filter_map(|key| self.known.remove(&key))
                .map(RouteEvent::Deleted),
        );
        events
    }

    /// Classify one event from the watch stream
    pub fn observe(&mut self, event: watcher::Event<Route>) -> Vec<RouteEvent> {
        match event {
            watcher::Event::Apply(route) => vec![self.apply(route)],
            watcher::Event::Delete(route) => vec![self.delete(route)],
            watcher::Event::Init => {
                self.pending_init = Some(Vec::new());
                Vec::new()
            }
            watcher::Event::InitApply(route) => {
                self.pending_init.get_or_insert_with(Vec::new).push(route);
                Vec::new()
            }
            watcher::Event::InitDone => {
                self.established = true;
                let routes = self.pending_init.take().unwrap_or_default();
                self.relist(routes)
            }
        }
    }

    /// Whether a complete initial list has been received
    pub fn is_established(&self) -> bool {
        self.established
    }

    fn len(&self) -> usize {
        self.known.len()
    }
}

/// Watches all routes in all namespaces and relists them periodically
pub struct Informer {
    api: Api<Route>,
    resync_period: Duration,
    cache: ObjectCache,
}

impl Informer {
    /// Interval between full relists
    pub const DEFAULT_RESYNC: Duration = Duration::from_secs(30);

    /// Create an informer over routes in every namespace
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            resync_period: Self::DEFAULT_RESYNC,
            cache: ObjectCache::default(),
        }
    }

    /// Configure the interval between full relists
    #[must_use]
    pub fn resync_every(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Watch parameters used for the subscription
    ///
    /// No selectors: objects still awaiting any initializer must be listed too.
    pub fn watcher_config() -> watcher::Config {
        watcher::Config::default()
    }

    /// List parameters used for periodic relists
    pub fn list_params() -> ListParams {
        ListParams::default()
    }

    /// Run until `shutdown` is cancelled, sending events to `tx`
    ///
    /// Errors before the first complete list are fatal. Later watch errors are
    /// logged while the underlying watcher re-establishes itself, and failed
    /// relists are retried on the next tick.
    pub async fn run(mut self, tx: mpsc::Sender<RouteEvent>, shutdown: CancellationToken) -> Result<()> {
        info!("Starting route watcher");
        let mut stream = watcher(self.api.clone(), Self::watcher_config())
            .default_backoff()
            .boxed();
        let mut resync = time::interval_at(Instant::now() + self.resync_period, self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let events = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Stopping route watcher");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => self.cache.observe(event),
                    Some(Err(err)) if !self.cache.is_established() => return Err(Error::WatchStart(err)),
                    Some(Err(err)) => {
                        warn!(error = %err, "route watch failed; re-establishing");
                        continue;
                    }
                    None => return Ok(()),
                },
                _ = resync.tick() => match self.api.list(&Self::list_params()).await {
                    Ok(list) => {
                        debug!(routes = list.items.len(), cached = self.cache.len(), "resyncing routes");
                        self.cache.relist(list.items)
                    }
                    Err(err) => {
                        warn!(error = %err, "route relist failed");
                        continue;
                    }
                },
            };
            for event in events {
                // a full channel must not keep shutdown waiting
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("Stopping route watcher");
                        return Ok(());
                    }
                    sent = tx.send(event) => if sent.is_err() {
                        warn!("route dispatcher gone; stopping route watcher");
                        return Ok(());
                    },
                }
            }
        }
    }
}

/// Counters of what [`dispatch`] forwarded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub created: usize,
    pub updated: usize,
    pub suppressed: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Drain `rx` into `initializer` until every sender is dropped
///
/// Up to `limit` routes are handled at once (`0` means unbounded). Events for
/// a route that is still being handled are held back and run in arrival order
/// once it finishes, so a single route never sees overlapping handlers.
///
/// Updates whose `resourceVersion` did not change are suppressed.
/// Handler errors are counted and logged; they never stop the loop.
pub async fn dispatch<D: DnsBinding>(
    mut rx: mpsc::Receiver<RouteEvent>,
    initializer: &RouteInitializer<D>,
    limit: usize,
) -> DispatchStats {
    let mut stats = DispatchStats::default();
    let mut running = FuturesUnordered::new();
    let mut held: HashMap<ObjectRef<Route>, VecDeque<RouteEvent>> = HashMap::new();
    let mut open = true;

    loop {
        tokio::select! {
            event = rx.recv(), if open && (limit == 0 || running.len() < limit) => {
                let Some(event) = event else {
                    open = false;
                    continue;
                };
                if !stats.count(&event) {
                    continue;
                }
                let key = event.object_ref();
                match held.get_mut(&key) {
                    Some(queue) => queue.push_back(event),
                    None => {
                        held.insert(key.clone(), VecDeque::new());
                        running.push(handle(initializer, key, event));
                    }
                }
            }
            Some((key, handled)) = running.next() => {
                if handled.is_err() {
                    stats.failed += 1;
                }
                match held.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(next) => running.push(handle(initializer, key, next)),
                    None => {
                        held.remove(&key);
                    }
                }
            }
            else => break,
        }
    }
    stats
}

impl DispatchStats {
    // false for events that need no handler
    fn count(&mut self, event: &RouteEvent) -> bool {
        match event {
            RouteEvent::Added(route) => {
                info!("Route added: {}", route.name_any());
                self.created += 1;
            }
            RouteEvent::Updated { old, new } if old.resource_version() == new.resource_version() => {
                trace!("Route {} unchanged", new.name_any());
                self.suppressed += 1;
                return false;
            }
            RouteEvent::Updated { old, new } => {
                info!(
                    "Route {} v{} updated: v{}",
                    new.name_any(),
                    old.resource_version().unwrap_or_default(),
                    new.resource_version().unwrap_or_default()
                );
                self.updated += 1;
            }
            RouteEvent::Deleted(route) => {
                info!("Route deleted: {}", route.name_any());
                self.deleted += 1;
            }
        }
        true
    }
}

async fn handle<D: DnsBinding>(
    initializer: &RouteInitializer<D>,
    key: ObjectRef<Route>,
    event: RouteEvent,
) -> (ObjectRef<Route>, Result<()>) {
    let handled = match event {
        RouteEvent::Added(route) => initializer.create(&route).await.map(|outcome| {
            debug!(?outcome, "route handled");
        }),
        RouteEvent::Updated { old, new } => initializer.update(&old, &new).await,
        RouteEvent::Deleted(route) => initializer.delete(&route).await,
    };
    (key, handled)
}
