use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use svge_core::GroupKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A position sequence: the games collection or one membership group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum OrderScope {
    Games,
    Group(GroupKey),
}

impl OrderScope {
    pub(crate) fn lock_key(&self) -> String {
        match self {
            Self::Games => String::from("svge:games"),
            Self::Group(group) => format!("svge:group:{group}"),
        }
    }

    pub(crate) const fn metric_label(&self) -> &'static str {
        match self {
            Self::Games => "games",
            Self::Group(_) => "group",
        }
    }
}

impl std::fmt::Display for OrderScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Games => f.write_str("games"),
            Self::Group(group) => write!(f, "group {group}"),
        }
    }
}

/// Per-scope critical sections. Scopes that are not locked together never
/// wait on each other.
#[derive(Default)]
pub(crate) struct GroupLocks {
    scopes: Mutex<HashMap<OrderScope, Arc<AsyncMutex<()>>>>,
}

#[must_use]
pub(crate) struct ScopeLocks {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl GroupLocks {
    /// Locks every scope in a fixed global order so overlapping multi-scope
    /// acquisitions cannot deadlock.
    pub(crate) async fn acquire(&self, scopes: &[OrderScope]) -> ScopeLocks {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();

        let handles: Vec<Arc<AsyncMutex<()>>> = {
            let mut registry = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
            registry.retain(|_, lock| Arc::strong_count(lock) > 1);
            scopes
                .iter()
                .map(|scope| Arc::clone(registry.entry(scope.clone()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        ScopeLocks { _guards: guards }
    }

    #[cfg(test)]
    pub(crate) fn tracked_scopes(&self) -> usize {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
