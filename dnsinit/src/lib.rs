//! Route initializer controller
//!
//! Watches `Route` objects across all namespaces and performs a one-time,
//! idempotent initialization on each route that names this controller at the
//! front of its pending initializer queue:
//!
//! - the claim and an output annotation are written back as one merge patch,
//!   guarded by the route's `resourceVersion`
//! - every rule host then gets a DNS record through a [`dns::DnsBinding`]
//!
//! The moving parts, leaf first, are [`patch`], [`initializer`] and [`informer`].
//! [`run`] wires the latter two together.

pub mod config;
pub mod dns;
mod error;
pub mod informer;
pub mod initializer;
pub mod patch;
pub mod pending;
pub mod route;

pub use error::{Error, Result};
pub use informer::{dispatch, DispatchStats, Informer, RouteEvent};
pub use initializer::{Outcome, RouteInitializer};
pub use route::{Route, RouteSpec};

use kube::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Capacity of the channel between the informer and the dispatcher
pub const EVENT_BUFFER: usize = 64;
/// Routes handled at the same time by the dispatcher
pub const DISPATCH_CONCURRENCY: usize = 16;

/// Watch routes and initialize them until `shutdown` is cancelled
///
/// Once the watch stops, events already queued are still handled before this returns.
pub async fn run<D: dns::DnsBinding>(
    client: Client,
    initializer: RouteInitializer<D>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let informer = Informer::new(client);
    let (watched, stats) = tokio::join!(
        informer.run(tx, shutdown),
        dispatch(rx, &initializer, DISPATCH_CONCURRENCY)
    );
    info!(?stats, "route dispatcher drained");
    watched
}
