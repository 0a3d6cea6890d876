//! Live-session records and the concurrent session registry.

pub mod timer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::service::{CancelFn, Upstream};

pub use timer::{TimerHandle, schedule};

/// Mutable half of a session, serialized by the per-session lock.
///
/// `timer` is `Some` for every registry-resident session; taking it is how
/// the routing layer disarms a pending expiry. `cancel` tears the
/// environment down and can be taken at most once.
pub struct SessionState {
    pub timer: Option<TimerHandle>,
    pub cancel: Option<CancelFn>,
}

/// A live browser session owned by one environment.
///
/// Everything outside `state` is immutable after registration; `quota`,
/// `browser`, `version` and `screen` exist for logging and the status
/// listing only.
pub struct Session {
    pub quota: String,
    pub browser: String,
    pub version: String,
    pub screen: String,
    pub upstream: Upstream,
    pub container: Option<String>,
    pub vnc: Option<String>,
    pub state: tokio::sync::Mutex<SessionState>,
}

/// Thread-safe map from session id to session record.
///
/// `remove` is linearizable: for any id, exactly one caller gets the record
/// back and with it the obligation to drive teardown.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: impl Into<String>, session: Arc<Session>) {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .insert(id.into(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the registry contents. Order is unspecified.
    pub fn snapshot(&self) -> Vec<(String, Arc<Session>)> {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect()
    }
}
