use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tafwatch_core::ids::{FullTmiId, SessionId};
use tafwatch_core::model::{Session, TrustModelInstance};

use crate::event_log::EventLog;

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// All sessions and TMIs known to this process.
///
/// Anyone may read; only the reconciler and the snapshot loader mutate,
/// through the crate-private methods below.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplicaStore {
    sessions: BTreeMap<SessionId, Session>,
    tmis: BTreeMap<FullTmiId, TrustModelInstance>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &BTreeMap<SessionId, Session> {
        &self.sessions
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn tmis(&self) -> &BTreeMap<FullTmiId, TrustModelInstance> {
        &self.tmis
    }

    pub fn tmi(&self, id: &FullTmiId) -> Option<&TrustModelInstance> {
        self.tmis.get(id)
    }

    /// TMIs whose identity names `session_id`, whether or not the session
    /// itself is known.
    pub fn tmis_in_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> impl Iterator<Item = &'a TrustModelInstance> + 'a {
        self.tmis.values().filter(move |tmi| &tmi.session_id == session_id)
    }

    pub(crate) fn put_session(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub(crate) fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub(crate) fn put_tmi(&mut self, tmi: TrustModelInstance) {
        self.tmis.insert(tmi.full_id.clone(), tmi);
    }

    pub(crate) fn tmi_mut(&mut self, id: &FullTmiId) -> Option<&mut TrustModelInstance> {
        self.tmis.get_mut(id)
    }

    pub(crate) fn replace_tmis(&mut self, tmis: BTreeMap<FullTmiId, TrustModelInstance>) {
        self.tmis = tmis;
    }
}

/// Shared handle to the process-wide replica.
///
/// Every mutation takes the write lock once and releases it before the
/// caller can reach an `.await`, so readers never see a half-applied event
/// or merge.
#[derive(Clone)]
pub struct Replica {
    store: Arc<RwLock<ReplicaStore>>,
    log: Arc<EventLog>,
}

impl Replica {
    pub fn new(event_log_capacity: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(ReplicaStore::new())),
            log: Arc::new(EventLog::new(event_log_capacity)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ReplicaStore> {
        self.store.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ReplicaStore> {
        self.store.write()
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> ReplicaStore {
        self.store.read().clone()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.read();
        f.debug_struct("Replica")
            .field("sessions", &store.sessions.len())
            .field("tmis", &store.tmis.len())
            .field("logged_events", &self.log.len())
            .finish()
    }
}
