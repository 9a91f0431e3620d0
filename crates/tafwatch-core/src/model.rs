//! Replica entity model.
//!
//! Field names on the wire follow the upstream server: versioned snapshots
//! and ATL bundles use PascalCase keys, opinions and graph structure use
//! lower/snake case, and the summary records use camelCase.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{ClientId, FullTmiId, SessionId, TmiIdentity};

/// TMI version number. Always an integer key, never a string.
pub type Version = u64;

/// A subjective-logic opinion. Stored as received; see [`Self::is_well_formed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectiveLogicOpinion {
    pub belief: f64,
    pub disbelief: f64,
    pub uncertainty: f64,
    pub base_rate: f64,
}

impl SubjectiveLogicOpinion {
    pub fn new(belief: f64, disbelief: f64, uncertainty: f64, base_rate: f64) -> Self {
        Self {
            belief,
            disbelief,
            uncertainty,
            base_rate,
        }
    }

    /// Masses sum to one within `tolerance` and `base_rate` lies in `[0, 1]`.
    /// The replica never calls this; it is offered to consumers that want it.
    pub fn is_well_formed(&self, tolerance: f64) -> bool {
        let masses = [self.belief, self.disbelief, self.uncertainty];
        masses.iter().all(|m| (0.0..=1.0).contains(m))
            && (masses.iter().sum::<f64>() - 1.0).abs() <= tolerance
            && (0.0..=1.0).contains(&self.base_rate)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyEntry {
    #[serde(rename = "sourceNode")]
    pub source_node: String,
    #[serde(rename = "targetNodes", default)]
    pub target_nodes: Vec<String>,
}

/// Named operator plus directed edges between named nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustGraphStructure {
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub adjacency_list: Vec<AdjacencyEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustRelationship {
    pub source: String,
    pub destination: String,
    pub opinion: SubjectiveLogicOpinion,
}

/// One structural/value snapshot of a TMI. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedState {
    #[serde(rename = "Version")]
    pub version: Version,
    #[serde(rename = "Fingerprint", default)]
    pub fingerprint: u64,
    #[serde(rename = "Structure", default)]
    pub structure: TrustGraphStructure,
    #[serde(rename = "Values", default, deserialize_with = "null_as_default")]
    pub values: BTreeMap<String, Vec<TrustRelationship>>,
    #[serde(rename = "RTLs", default, deserialize_with = "null_as_default")]
    pub rtls: BTreeMap<String, SubjectiveLogicOpinion>,
}

/// Actual trustworthiness level bundle for one (TMI, version).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Atl {
    #[serde(rename = "TmiID", default)]
    pub tmi_id: String,
    #[serde(rename = "Version")]
    pub version: Version,
    #[serde(rename = "SlResults", default, deserialize_with = "null_as_default")]
    pub sl_results: BTreeMap<String, SubjectiveLogicOpinion>,
    #[serde(rename = "PpResults", default, deserialize_with = "numeric_results")]
    pub pp_results: BTreeMap<String, f64>,
    #[serde(rename = "TdResults", default, deserialize_with = "numeric_results")]
    pub td_results: BTreeMap<String, f64>,
}

/// Opaque delta payload attached to a version transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update(pub serde_json::Value);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Session {
    #[serde(rename = "sessionId")]
    pub id: SessionId,
    #[serde(rename = "clientId")]
    pub client_id: ClientId,
    pub active: bool,
    pub template: String,
    /// Full identifiers of TMIs spawned in this session, in arrival order.
    pub tmis: Vec<FullTmiId>,
}

impl Session {
    pub fn new(id: SessionId, client_id: ClientId, template: String) -> Self {
        Self {
            id,
            client_id,
            active: true,
            template,
            tmis: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrustModelInstance {
    pub id: String,
    #[serde(rename = "fullTMI")]
    pub full_id: FullTmiId,
    pub application: String,
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    pub template: String,
    pub active: bool,
    #[serde(rename = "latestVersion")]
    pub latest_version: Version,
    pub states: BTreeMap<Version, VersionedState>,
    pub atls: BTreeMap<Version, Atl>,
    pub updates: BTreeMap<Version, Vec<Update>>,
}

impl TrustModelInstance {
    /// A TMI with identity fields filled in and no versions recorded yet.
    pub fn empty(full_id: FullTmiId, identity: TmiIdentity, active: bool, latest_version: Version) -> Self {
        Self {
            id: identity.id,
            full_id,
            application: identity.application,
            session_id: identity.session_id,
            template: identity.template,
            active,
            latest_version,
            states: BTreeMap::new(),
            atls: BTreeMap::new(),
            updates: BTreeMap::new(),
        }
    }

    pub fn has_state(&self, version: Version) -> bool {
        self.states.contains_key(&version)
    }

    /// Raise `latest_version` to `version` if it is larger. Never lowers it.
    pub fn advance_latest(&mut self, version: Version) -> bool {
        if version > self.latest_version {
            self.latest_version = version;
            true
        } else {
            false
        }
    }

    pub fn push_update(&mut self, version: Version, update: Update) {
        self.updates.entry(version).or_default().push(update);
    }

    pub fn latest_state(&self) -> Option<&VersionedState> {
        self.states.get(&self.latest_version)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Numeric result map that also accepts booleans (trust decisions are
/// emitted as `true`/`false` by some server builds).
fn numeric_results<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Number(f64),
        Flag(bool),
    }

    let raw: Option<BTreeMap<String, Numeric>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let n = match value {
                Numeric::Number(n) => n,
                Numeric::Flag(true) => 1.0,
                Numeric::Flag(false) => 0.0,
            };
            (key, n)
        })
        .collect())
}
