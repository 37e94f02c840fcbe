use kube::error::ErrorResponse;
use thiserror::Error;

/// Possible errors from the initializer and its watch loop
#[derive(Debug, Error)]
pub enum Error {
    #[error("object has no name")]
    UnnamedObject,
    #[error("object {0} has no namespace")]
    UnnamespacedObject(String),
    #[error("failed to serialize snapshot: {0}")]
    SerializeSnapshot(#[source] serde_json::Error),
    #[error("failed to persist route {name}: {source}")]
    Persist {
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to start watching routes: {0}")]
    WatchStart(#[source] kube::runtime::watcher::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the write lost a race against another writer of the same object
    ///
    /// The claim stays unpersisted; nothing retries it.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Persist {
                source: kube::Error::Api(ErrorResponse { code: 409, .. }),
                ..
            }
        )
    }
}
