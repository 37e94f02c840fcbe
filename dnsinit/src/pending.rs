//! Ordered queue of initializers an object is still waiting on
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named gate that must be removed before the object is fully admitted
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct Initializer {
    pub name: String,
}

/// Initializers still owed to an object
///
/// Insertion order is application order: only the initializer at the front
/// of `pending` may act on the object. The sequence is never edited in place
/// by an owner; [`Initializers::remove_own`] returns the successor sequence
/// and the write is guarded by the object's `resourceVersion`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Initializers {
    #[serde(default)]
    pub pending: Vec<Initializer>,
}

impl Initializers {
    /// Build a queue from names, front first
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: names
                .into_iter()
                .map(|name| Initializer { name: name.into() })
                .collect(),
        }
    }

    /// Name of the initializer currently allowed to act
    pub fn first(&self) -> Option<&str> {
        self.pending.first().map(|i| i.name.as_str())
    }

    /// Whether `name` is at the front of the queue
    pub fn is_owned_by(&self, name: &str) -> bool {
        self.first() == Some(name)
    }

    /// The queue left once `name` gives up ownership
    ///
    /// Returns `None` when nothing remains, so the field disappears rather than
    /// holding an empty list. If `name` is not the owner the queue is returned unchanged.
    #[must_use]
    pub fn remove_own(&self, name: &str) -> Option<Self> {
        let rest = if self.is_owned_by(name) {
            &self.pending[1..]
        } else {
            &self.pending[..]
        };
        if rest.is_empty() {
            None
        } else {
            Some(Self { pending: rest.to_vec() })
        }
    }

    /// Names in queue order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|i| i.name.as_str())
    }
}
