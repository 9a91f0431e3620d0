//! Event reconciliation.
//!
//! [`Reconciler::apply`] folds one [`ReplicaEvent`] into the replica. Events
//! are applied in delivery order, which need not match the server's version
//! order, so TMI updates follow a first-claim-wins rule per version:
//!
//! - the first `TRUST_MODEL_INSTANCE_UPDATED` for version `V` stores the
//!   state at `V`, files its update under `V`, and may advance `latest_version`;
//! - any later one for the same `V` leaves `states[V]` alone and files its
//!   update under `V + 1`, without touching `latest_version`.
//!
//! References to unknown sessions or TMIs are logged and dropped. A later
//! snapshot load fills the gap.

use serde_json::Value;
use tracing::{debug, info, warn};

use tafwatch_core::events::{ReplicaEvent, TmiSnapshot};
use tafwatch_core::ids::{ClientId, FullTmiId, SessionId};
use tafwatch_core::model::{Atl, Session, TrustModelInstance, Version};

use crate::replica::{Replica, ReplicaStore};

/// What applying one event did to the replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The version was already claimed; the update payload was filed under `to_version`.
    Deferred { to_version: Version },
    /// The version was already claimed and the event carried no update payload.
    Duplicate,
    UnknownEntity,
    Ignored,
    Unrecognized,
    Malformed,
}

impl ApplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Deferred { .. } => "deferred",
            Self::Duplicate => "duplicate",
            Self::UnknownEntity => "unknown_entity",
            Self::Ignored => "ignored",
            Self::Unrecognized => "unrecognized",
            Self::Malformed => "malformed",
        }
    }
}

/// Outcome counters for a batch of events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub applied: u32,
    pub deferred: u32,
    pub duplicate: u32,
    pub unknown_entity: u32,
    pub ignored: u32,
    pub unrecognized: u32,
    pub malformed: u32,
}

impl ReconcileStats {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Deferred { .. } => self.deferred += 1,
            ApplyOutcome::Duplicate => self.duplicate += 1,
            ApplyOutcome::UnknownEntity => self.unknown_entity += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
            ApplyOutcome::Unrecognized => self.unrecognized += 1,
            ApplyOutcome::Malformed => self.malformed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.applied
            + self.deferred
            + self.duplicate
            + self.unknown_entity
            + self.ignored
            + self.unrecognized
            + self.malformed
    }
}

/// Applies push-stream events to a [`Replica`].
#[derive(Clone, Debug)]
pub struct Reconciler {
    replica: Replica,
}

impl Reconciler {
    pub fn new(replica: Replica) -> Self {
        Self { replica }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Decode, log and apply one raw push-stream message. Never fails:
    /// undecodable input is recorded as [`ApplyOutcome::Malformed`].
    pub fn apply_raw(&self, raw: &str) -> ApplyOutcome {
        let payload: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping non-JSON push message");
                self.replica
                    .event_log()
                    .record(None, ApplyOutcome::Malformed.label(), Value::String(raw.to_owned()));
                return ApplyOutcome::Malformed;
            }
        };

        let event_type = payload.get("EventType").and_then(Value::as_str).map(str::to_owned);
        let outcome = match ReplicaEvent::from_value(payload.clone()) {
            Ok(event) => self.apply(event),
            Err(e) => {
                warn!(error = %e, event_type = ?event_type, "dropping malformed push message");
                ApplyOutcome::Malformed
            }
        };
        self.replica.event_log().record(event_type, outcome.label(), payload);
        outcome
    }

    pub fn apply_batch(&self, events: impl IntoIterator<Item = ReplicaEvent>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for event in events {
            stats.record(self.apply(event));
        }
        stats
    }

    /// Apply one decoded event. The write lock is held for the whole event.
    pub fn apply(&self, event: ReplicaEvent) -> ApplyOutcome {
        let mut store = self.replica.write();
        let outcome = match event {
            ReplicaEvent::SessionCreated {
                session_id,
                client_id,
                trust_model_template,
            } => session_created(&mut store, session_id, client_id, trust_model_template),
            ReplicaEvent::SessionTorndown { session_id } => session_torndown(&mut store, &session_id),
            ReplicaEvent::TrustModelInstanceSpawned(snapshot) => tmi_spawned(&mut store, snapshot),
            ReplicaEvent::TrustModelInstanceUpdated(snapshot) => tmi_updated(&mut store, snapshot),
            ReplicaEvent::TrustModelInstanceDeleted { full_tmi } => tmi_deleted(&mut store, &full_tmi),
            ReplicaEvent::AtlUpdated {
                full_tmi,
                version,
                new_atls,
            } => atl_updated(&mut store, &full_tmi, version, new_atls),
            ReplicaEvent::AtlRemoved { .. } => ApplyOutcome::Ignored,
            ReplicaEvent::Unrecognized { event_type } => {
                info!(event_type = %event_type, "ignoring unrecognized event type");
                ApplyOutcome::Unrecognized
            }
        };
        debug!(outcome = outcome.label(), "event reconciled");
        outcome
    }
}

/// Creates or replaces the session; the TMI list starts empty either way.
fn session_created(
    store: &mut ReplicaStore,
    session_id: SessionId,
    client_id: ClientId,
    template: String,
) -> ApplyOutcome {
    debug!(session_id = %session_id, "session created");
    store.put_session(Session::new(session_id, client_id, template));
    ApplyOutcome::Applied
}

fn session_torndown(store: &mut ReplicaStore, session_id: &SessionId) -> ApplyOutcome {
    match store.session_mut(session_id) {
        Some(session) => {
            session.active = false;
            ApplyOutcome::Applied
        }
        None => {
            warn!(session_id = %session_id, "teardown for unknown session");
            ApplyOutcome::UnknownEntity
        }
    }
}

fn tmi_spawned(store: &mut ReplicaStore, snapshot: TmiSnapshot) -> ApplyOutcome {
    let identity = match snapshot.full_tmi.identity() {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "spawn event with malformed identifier");
            return ApplyOutcome::Malformed;
        }
    };

    if let Some(session) = store.session_mut(&identity.session_id) {
        if !session.tmis.contains(&snapshot.full_tmi) {
            session.tmis.push(snapshot.full_tmi.clone());
        }
    } else {
        debug!(full_tmi = %snapshot.full_tmi, session_id = %identity.session_id, "spawned TMI has no known session");
    }

    let version = snapshot.version;
    let state = snapshot.to_state();

    // A snapshot load may have created the TMI first; keep what it recorded.
    if let Some(existing) = store.tmi_mut(&snapshot.full_tmi) {
        debug!(full_tmi = %snapshot.full_tmi, version, "spawn for already known TMI");
        existing.states.entry(version).or_insert(state);
        existing.advance_latest(version);
        existing.active = true;
        return ApplyOutcome::Applied;
    }

    let mut tmi = TrustModelInstance::empty(snapshot.full_tmi, identity, true, version);
    if !snapshot.id.is_empty() {
        tmi.id = snapshot.id;
    }
    tmi.states.insert(version, state);
    store.put_tmi(tmi);
    ApplyOutcome::Applied
}

fn tmi_updated(store: &mut ReplicaStore, snapshot: TmiSnapshot) -> ApplyOutcome {
    let Some(tmi) = store.tmi_mut(&snapshot.full_tmi) else {
        warn!(full_tmi = %snapshot.full_tmi, version = snapshot.version, "update for unknown TMI");
        return ApplyOutcome::UnknownEntity;
    };

    let version = snapshot.version;
    if tmi.has_state(version) {
        let next = version.saturating_add(1);
        return match snapshot.update {
            Some(update) => {
                debug!(full_tmi = %tmi.full_id, version, to_version = next, "version already claimed, deferring update");
                tmi.push_update(next, update);
                ApplyOutcome::Deferred { to_version: next }
            }
            None => ApplyOutcome::Duplicate,
        };
    }

    let state = snapshot.to_state();
    tmi.states.insert(version, state);
    if let Some(update) = snapshot.update {
        tmi.push_update(version, update);
    }
    tmi.advance_latest(version);
    ApplyOutcome::Applied
}

fn tmi_deleted(store: &mut ReplicaStore, full_tmi: &FullTmiId) -> ApplyOutcome {
    match store.tmi_mut(full_tmi) {
        Some(tmi) => {
            tmi.active = false;
            ApplyOutcome::Applied
        }
        None => {
            warn!(full_tmi = %full_tmi, "delete for unknown TMI");
            ApplyOutcome::UnknownEntity
        }
    }
}

/// Keys the ATL by its own version, not by the event's nominal one.
fn atl_updated(
    store: &mut ReplicaStore,
    full_tmi: &FullTmiId,
    nominal_version: Option<Version>,
    atl: Atl,
) -> ApplyOutcome {
    let Some(tmi) = store.tmi_mut(full_tmi) else {
        warn!(full_tmi = %full_tmi, "ATL update for unknown TMI");
        return ApplyOutcome::UnknownEntity;
    };
    if let Some(nominal) = nominal_version.filter(|v| *v != atl.version) {
        debug!(full_tmi = %full_tmi, nominal, atl_version = atl.version, "ATL version differs from event version");
    }
    tmi.atls.insert(atl.version, atl);
    ApplyOutcome::Applied
}
