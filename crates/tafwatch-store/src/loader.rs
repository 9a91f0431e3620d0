//! Snapshot loading.
//!
//! The loader awaits the network first and only then takes the write lock
//! for the merge, so a failed fetch never touches the replica.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use tafwatch_core::errors::FetchError;
use tafwatch_core::ids::{FullTmiId, SessionId, TmiIdentity};
use serde_json::Value;
use tafwatch_core::model::{TrustModelInstance, Update};
use tafwatch_core::wire::{AtlPayload, TmiDetail, TmiListing, TmiRequest, UpdatesPayload, VersionSelector};

use crate::error::StoreError;
use crate::replica::Replica;

/// Where snapshots come from. Implementations own their transport concerns
/// (timeouts, retry); the loader only sees the final result.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// `GET /tmis`
    async fn list_tmis(&self) -> Result<TmiListing, FetchError>;

    /// `GET /tmis/{application}/{session}/{template}/{id}/{version}`
    async fn fetch_tmi(&self, request: &TmiRequest) -> Result<TmiDetail, FetchError>;
}

/// Outcome of [`SnapshotLoader::hydrate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HydrateReport {
    pub loaded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SnapshotLoader {
    source: Arc<dyn SnapshotSource>,
    replica: Replica,
}

impl SnapshotLoader {
    pub fn new(source: Arc<dyn SnapshotSource>, replica: Replica) -> Self {
        Self { source, replica }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Fetch the TMI listing and replace the whole TMI collection with
    /// empty-bodied records built from it.
    ///
    /// Application and session are read from each listing key; the new
    /// collection is keyed by each entry's own `fullTMI`. Sessions are left
    /// alone.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<TmiListing, StoreError> {
        let listing = self.source.list_tmis().await?;

        let mut tmis = BTreeMap::new();
        for (key, summary) in &listing {
            let key_id = FullTmiId::from_raw(key.as_str());
            if key_id.as_str() != summary.full_tmi.as_str() {
                debug!(key = %key, full_tmi = %summary.full_tmi, "listing key differs from fullTMI");
            }
            let identity = TmiIdentity {
                application: key_id.application().unwrap_or_default().to_owned(),
                session_id: key_id.session_id().unwrap_or_else(|| SessionId::from_raw("")),
                template: summary.template.clone(),
                id: summary.id.clone(),
            };
            let tmi = TrustModelInstance::empty(
                summary.full_tmi.clone(),
                identity,
                summary.active,
                summary.latest_version,
            );
            tmis.insert(summary.full_tmi.clone(), tmi);
        }

        let count = tmis.len();
        self.replica.write().replace_tmis(tmis);
        info!(tmis = count, "replica resynchronized from listing");
        Ok(listing)
    }

    /// Fetch one TMI and merge it into the replica, creating it if unknown.
    /// Returns the merged record.
    #[instrument(skip(self, request), fields(full_tmi = %request.full_tmi(), version = %request.version))]
    pub async fn load_one(&self, request: &TmiRequest) -> Result<TrustModelInstance, StoreError> {
        let detail = self.source.fetch_tmi(request).await?;

        let mut store = self.replica.write();
        let mut tmi = match store.tmi(&detail.full_tmi) {
            Some(existing) => existing.clone(),
            None => {
                let identity = identity_from_detail(&detail)?;
                TrustModelInstance::empty(detail.full_tmi.clone(), identity, detail.active, detail.latest_version)
            }
        };
        merge_detail(&mut tmi, detail);
        store.put_tmi(tmi.clone());
        Ok(tmi)
    }

    /// Fetch every version of every TMI currently in the replica. Failures
    /// are logged per TMI and do not stop the pass.
    pub async fn hydrate(&self) -> HydrateReport {
        let requests: Vec<TmiRequest> = self
            .replica
            .read()
            .tmis()
            .values()
            .map(|tmi| {
                TmiRequest::new(&tmi.application, tmi.session_id.as_str(), &tmi.template, &tmi.id)
                    .with_version(VersionSelector::All)
            })
            .collect();

        let mut report = HydrateReport::default();
        for request in &requests {
            match self.load_one(request).await {
                Ok(_) => report.loaded += 1,
                Err(e) => {
                    warn!(full_tmi = %request.full_tmi(), error = %e, "failed to hydrate TMI");
                    report.failed += 1;
                }
            }
        }
        info!(loaded = report.loaded, failed = report.failed, "hydration finished");
        report
    }
}

impl std::fmt::Debug for SnapshotLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotLoader").field("replica", &self.replica).finish_non_exhaustive()
    }
}

/// Identity for a TMI first seen through a fetch: application and session
/// from the response's `fullTMI`, template and id from the response body.
fn identity_from_detail(detail: &TmiDetail) -> Result<TmiIdentity, StoreError> {
    let malformed = || StoreError::MalformedIdentifier(detail.full_tmi.to_string());
    let application = detail.full_tmi.application().filter(|a| !a.is_empty()).ok_or_else(malformed)?;
    let session_id = detail
        .full_tmi
        .session_id()
        .filter(|s| !s.as_str().is_empty())
        .ok_or_else(malformed)?;
    Ok(TmiIdentity {
        application: application.to_owned(),
        session_id,
        template: detail.template.clone(),
        id: detail.id.clone(),
    })
}

/// Merge precedence: a single ATL goes in under its own version; a single
/// state (plus its update list) merges into its version; otherwise a full
/// `states` map replaces states, and version-keyed updates and ATLs if sent.
fn merge_detail(tmi: &mut TrustModelInstance, detail: TmiDetail) {
    let TmiDetail {
        atls,
        state,
        states,
        updates,
        ..
    } = detail;

    let atl_map = match atls {
        Some(AtlPayload::Single(atl)) => {
            tmi.atls.insert(atl.version, atl);
            None
        }
        Some(AtlPayload::ByVersion(map)) => Some(map),
        None => None,
    };

    if let Some(state) = state {
        let version = state.version;
        tmi.states.insert(version, state);
        match updates {
            Some(UpdatesPayload::List(list)) => {
                tmi.updates.insert(version, list);
            }
            // Some servers send the version's update as one bare object.
            Some(UpdatesPayload::Other(value @ Value::Object(_))) => {
                tmi.updates.insert(version, vec![Update(value)]);
            }
            Some(UpdatesPayload::Other(Value::Null)) | None => {}
            Some(other) => warn!(version, updates = ?other, "dropping unusable updates in single-version response"),
        }
        tmi.advance_latest(version);
        return;
    }

    if let Some(states) = states {
        if let Some(max) = states.keys().next_back() {
            tmi.advance_latest(*max);
        }
        tmi.states = states;
        if let Some(UpdatesPayload::ByVersion(map)) = updates {
            tmi.updates = map;
        }
        if let Some(map) = atl_map {
            tmi.atls = map;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use serde_json::json;
    use tafwatch_core::model::{Update, Version};

    use crate::reconcile::Reconciler;
    use tafwatch_core::events::ReplicaEvent;

    const FULL: &str = "//app/sess1/tmpl/abc";

    #[derive(Default)]
    struct FakeSource {
        listing: Mutex<Option<Result<TmiListing, FetchError>>>,
        details: Mutex<HashMap<String, Result<TmiDetail, FetchError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with_listing(self, listing: serde_json::Value) -> Self {
            *self.listing.lock() = Some(Ok(serde_json::from_value(listing).unwrap()));
            self
        }

        fn with_detail(self, path: &str, detail: serde_json::Value) -> Self {
            self.details
                .lock()
                .insert(path.to_owned(), Ok(serde_json::from_value(detail).unwrap()));
            self
        }

        fn with_failure(self, path: &str, error: FetchError) -> Self {
            self.details.lock().insert(path.to_owned(), Err(error));
            self
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSource {
        async fn list_tmis(&self) -> Result<TmiListing, FetchError> {
            self.calls.lock().push("tmis".into());
            self.listing
                .lock()
                .clone()
                .unwrap_or_else(|| Err(FetchError::Network("no listing".into())))
        }

        async fn fetch_tmi(&self, request: &TmiRequest) -> Result<TmiDetail, FetchError> {
            let path = request.path();
            self.calls.lock().push(path.clone());
            self.details
                .lock()
                .get(&path)
                .cloned()
                .unwrap_or(Err(FetchError::NotFound(path)))
        }
    }

    fn state(version: Version, fingerprint: u64) -> serde_json::Value {
        json!({
            "Version": version,
            "Fingerprint": fingerprint,
            "Structure": {"operator": "CUMULATIVE_FUSION", "adjacency_list": []},
            "Values": {},
            "RTLs": {}
        })
    }

    fn loader(source: FakeSource) -> SnapshotLoader {
        SnapshotLoader::new(Arc::new(source), Replica::default())
    }

    fn spawn(replica: &Replica, version: Version) {
        let event = ReplicaEvent::decode(
            &json!({
                "EventType": "TRUST_MODEL_INSTANCE_SPAWNED",
                "FullTMI": FULL, "ID": "abc", "Version": version, "Fingerprint": 1,
                "Structure": {"operator": "CUMULATIVE_FUSION", "adjacency_list": []},
                "Values": {}, "RTLs": {}
            })
            .to_string(),
        )
        .unwrap();
        Reconciler::new(replica.clone()).apply(event);
    }

    #[tokio::test]
    async fn load_all_replaces_collection_with_empty_records() {
        let source = FakeSource::default().with_listing(json!({
            "//app/sess1/tmpl/abc": {
                "id": "abc", "fullTMI": "//app/sess1/tmpl/abc",
                "template": "tmpl", "active": true, "latestVersion": 4
            },
            "//app/sess2/tmpl/def": {
                "id": "def", "fullTMI": "//app/sess2/tmpl/def",
                "template": "tmpl", "active": false, "latestVersion": 0
            }
        }));
        let loader = loader(source);
        spawn(loader.replica(), 0);
        loader.replica().write().put_tmi(TrustModelInstance::empty(
            FullTmiId::from_raw("//app/old/tmpl/gone"),
            FullTmiId::from_raw("//app/old/tmpl/gone").identity().unwrap(),
            true,
            0,
        ));

        let listing = loader.load_all().await.unwrap();
        assert_eq!(listing.len(), 2);

        let store = loader.replica().read();
        assert_eq!(store.tmis().len(), 2);
        assert!(store.tmi(&FullTmiId::from_raw("//app/old/tmpl/gone")).is_none());

        let abc = store.tmi(&FullTmiId::from_raw(FULL)).unwrap();
        assert_eq!(abc.application, "app");
        assert_eq!(abc.session_id.as_str(), "sess1");
        assert_eq!(abc.latest_version, 4);
        assert!(abc.states.is_empty());
        assert!(abc.atls.is_empty());
        assert!(abc.updates.is_empty());

        let def = store.tmi(&FullTmiId::from_raw("//app/sess2/tmpl/def")).unwrap();
        assert!(!def.active);
    }

    #[tokio::test]
    async fn load_all_takes_session_from_listing_key() {
        let source = FakeSource::default().with_listing(json!({
            "//app/keysess/tmpl/abc": {
                "id": "abc", "fullTMI": "//app/bodysess/tmpl/abc",
                "template": "tmpl", "active": true, "latestVersion": 1
            }
        }));
        let loader = loader(source);
        loader.load_all().await.unwrap();

        let store = loader.replica().read();
        let tmi = store.tmi(&FullTmiId::from_raw("//app/bodysess/tmpl/abc")).unwrap();
        assert_eq!(tmi.session_id.as_str(), "keysess");
    }

    #[tokio::test]
    async fn load_all_failure_leaves_replica_untouched() {
        let loader = loader(FakeSource::default());
        spawn(loader.replica(), 0);
        let before = loader.replica().snapshot();

        let err = loader.load_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Fetch(FetchError::Network(_))));
        assert!(err.is_retryable());
        assert_eq!(before, loader.replica().snapshot());
    }

    #[tokio::test]
    async fn single_version_merge_is_disjoint() {
        let path = "tmis/app/sess1/tmpl/abc/3";
        let source = FakeSource::default().with_detail(
            path,
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 3,
                "state": state(3, 33),
                "updates": [{"op": "UPDATE_TO"}],
                "atls": {"TmiID": "abc", "Version": 3, "PpResults": {"C_1": 0.4}}
            }),
        );
        let loader = loader(source);
        spawn(loader.replica(), 0);
        loader
            .replica()
            .write()
            .tmi_mut(&FullTmiId::from_raw(FULL))
            .unwrap()
            .push_update(0, Update(json!({"op": "INITIAL"})));

        let req = TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::At(3));
        let merged = loader.load_one(&req).await.unwrap();

        assert_eq!(merged.states.keys().copied().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(merged.states[&3].fingerprint, 33);
        assert_eq!(merged.updates[&0], vec![Update(json!({"op": "INITIAL"}))]);
        assert_eq!(merged.updates[&3], vec![Update(json!({"op": "UPDATE_TO"}))]);
        assert_eq!(merged.atls[&3].pp_results["C_1"], 0.4);
        assert_eq!(merged.latest_version, 3);
        assert_eq!(loader.replica().read().tmi(&FullTmiId::from_raw(FULL)), Some(&merged));
    }

    #[tokio::test]
    async fn refetching_a_version_keeps_later_versions() {
        let detail = |version: Version| {
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 3,
                "state": state(version, version * 10),
                "updates": [{"op": format!("UPDATE_{version}")}]
            })
        };
        let source = FakeSource::default()
            .with_detail("tmis/app/sess1/tmpl/abc/2", detail(2))
            .with_detail("tmis/app/sess1/tmpl/abc/3", detail(3));
        let loader = loader(source);
        let at = |v| TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::At(v));

        loader.load_one(&at(2)).await.unwrap();
        loader.load_one(&at(3)).await.unwrap();
        let merged = loader.load_one(&at(2)).await.unwrap();

        assert_eq!(merged.states.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(merged.updates.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(merged.states[&3].fingerprint, 30);
        assert_eq!(merged.latest_version, 3);
    }

    #[tokio::test]
    async fn lone_update_object_is_stored_as_one_entry() {
        let source = FakeSource::default().with_detail(
            "tmis/app/sess1/tmpl/abc/1",
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 1,
                "state": state(1, 10),
                "updates": {"op": "UPDATE_TO", "target": "C_1"}
            }),
        );
        let loader = loader(source);
        let req = TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::At(1));
        let merged = loader.load_one(&req).await.unwrap();

        assert_eq!(merged.updates[&1], vec![Update(json!({"op": "UPDATE_TO", "target": "C_1"}))]);
    }

    #[tokio::test]
    async fn full_states_response_replaces_wholesale() {
        let path = "tmis/app/sess1/tmpl/abc/all";
        let source = FakeSource::default().with_detail(
            path,
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 2,
                "states": {"1": state(1, 10), "2": state(2, 20)},
                "updates": {"2": [{"op": "UPDATE_TO"}]},
                "atls": {"2": {"Version": 2}}
            }),
        );
        let loader = loader(source);
        spawn(loader.replica(), 0);
        {
            let mut store = loader.replica().write();
            let tmi = store.tmi_mut(&FullTmiId::from_raw(FULL)).unwrap();
            tmi.push_update(0, Update(json!({"stale": true})));
        }

        let merged = loader
            .load_one(&TmiRequest::new("app", "sess1", "tmpl", "abc"))
            .await
            .unwrap();

        assert_eq!(merged.states.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(merged.updates.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(merged.atls.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(merged.latest_version, 2);
    }

    #[tokio::test]
    async fn state_wins_over_states_when_both_present() {
        let path = "tmis/app/sess1/tmpl/abc/5";
        let source = FakeSource::default().with_detail(
            path,
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 5,
                "state": state(5, 50),
                "states": {"9": state(9, 90)}
            }),
        );
        let loader = loader(source);
        spawn(loader.replica(), 0);

        let req = TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::At(5));
        let merged = loader.load_one(&req).await.unwrap();
        assert_eq!(merged.states.keys().copied().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[tokio::test]
    async fn load_one_creates_unknown_tmi() {
        let source = FakeSource::default().with_detail(
            "tmis/app/sess1/tmpl/abc/latest",
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": false, "latestVersion": 7,
                "state": state(7, 70),
                "updates": []
            }),
        );
        let loader = loader(source);
        let req = TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::Latest);
        let tmi = loader.load_one(&req).await.unwrap();

        assert_eq!(tmi.application, "app");
        assert_eq!(tmi.session_id.as_str(), "sess1");
        assert!(!tmi.active);
        assert_eq!(tmi.latest_version, 7);
        assert!(tmi.updates[&7].is_empty());
    }

    #[tokio::test]
    async fn load_one_does_not_lower_latest_version() {
        let source = FakeSource::default().with_detail(
            "tmis/app/sess1/tmpl/abc/1",
            json!({
                "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 9,
                "state": state(1, 1)
            }),
        );
        let loader = loader(source);
        spawn(loader.replica(), 4);
        let req = TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::At(1));
        let tmi = loader.load_one(&req).await.unwrap();
        assert_eq!(tmi.latest_version, 4);
    }

    #[tokio::test]
    async fn load_one_rejects_malformed_identifier_for_new_tmi() {
        let source = FakeSource::default().with_detail(
            "tmis/app/sess1/tmpl/abc/all",
            json!({"fullTMI": "broken", "id": "abc", "states": {}}),
        );
        let loader = loader(source);
        let err = loader
            .load_one(&TmiRequest::new("app", "sess1", "tmpl", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedIdentifier(_)));
        assert!(loader.replica().read().tmis().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_replica_untouched() {
        let source = FakeSource::default().with_failure(
            "tmis/app/sess1/tmpl/abc/all",
            FetchError::ServerError {
                status: 503,
                body: "busy".into(),
            },
        );
        let loader = loader(source);
        spawn(loader.replica(), 0);
        let before = loader.replica().snapshot();

        let err = loader
            .load_one(&TmiRequest::new("app", "sess1", "tmpl", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Fetch(FetchError::ServerError { status: 503, .. })));
        assert_eq!(before, loader.replica().snapshot());
    }

    #[tokio::test]
    async fn hydrate_loads_each_tmi_and_counts_failures() {
        let source = FakeSource::default()
            .with_listing(json!({
                "//app/sess1/tmpl/abc": {"id": "abc", "fullTMI": "//app/sess1/tmpl/abc", "template": "tmpl", "active": true, "latestVersion": 1},
                "//app/sess1/tmpl/def": {"id": "def", "fullTMI": "//app/sess1/tmpl/def", "template": "tmpl", "active": true, "latestVersion": 0}
            }))
            .with_detail(
                "tmis/app/sess1/tmpl/abc/all",
                json!({
                    "fullTMI": FULL, "id": "abc", "template": "tmpl", "active": true, "latestVersion": 1,
                    "states": {"0": state(0, 1), "1": state(1, 2)}, "updates": {}, "atls": {}
                }),
            );
        let source = Arc::new(source);
        let loader = SnapshotLoader::new(source.clone(), Replica::default());

        loader.load_all().await.unwrap();
        let report = loader.hydrate().await;
        assert_eq!(report, HydrateReport { loaded: 1, failed: 1 });

        let store = loader.replica().read();
        assert_eq!(store.tmi(&FullTmiId::from_raw(FULL)).unwrap().states.len(), 2);
        assert_eq!(source.calls.lock().len(), 3);
    }
}
