//! Request/response shapes of the snapshot fetch API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::ids::FullTmiId;
use crate::model::{Atl, TrustModelInstance, Update, Version, VersionedState};

/// Entry of the `GET /tmis` listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TmiSummary {
    pub id: String,
    #[serde(rename = "fullTMI")]
    pub full_tmi: FullTmiId,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "latestVersion", default)]
    pub latest_version: Version,
}

impl From<&TrustModelInstance> for TmiSummary {
    fn from(tmi: &TrustModelInstance) -> Self {
        Self {
            id: tmi.id.clone(),
            full_tmi: tmi.full_id.clone(),
            template: tmi.template.clone(),
            active: tmi.active,
            latest_version: tmi.latest_version,
        }
    }
}

/// `GET /tmis` body: opaque listing key to summary.
pub type TmiListing = BTreeMap<String, TmiSummary>;

/// `atls` is a single bundle in the single-version shape and a
/// version-keyed map in the multi-version shape.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AtlPayload {
    Single(Atl),
    ByVersion(BTreeMap<Version, Atl>),
}

// Decoded through `Value` rather than `#[serde(untagged)]`: buffered
// untagged content cannot parse integer map keys out of JSON strings.
impl<'de> Deserialize<'de> for AtlPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.get("Version").is_some() {
            serde_json::from_value(value).map(Self::Single).map_err(D::Error::custom)
        } else {
            serde_json::from_value(value).map(Self::ByVersion).map_err(D::Error::custom)
        }
    }
}

/// `updates` is a list for the requested version in the single-version
/// shape and a version-keyed map of lists in the multi-version shape.
/// Anything else is kept as [`UpdatesPayload::Other`] and ignored.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpdatesPayload {
    List(Vec<Update>),
    ByVersion(BTreeMap<Version, Vec<Update>>),
    Other(Value),
}

impl<'de> Deserialize<'de> for UpdatesPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Array(_) => serde_json::from_value(value)
                .map(Self::List)
                .map_err(D::Error::custom)?,
            Value::Object(_) => match serde_json::from_value(value.clone()) {
                Ok(by_version) => Self::ByVersion(by_version),
                Err(_) => Self::Other(value),
            },
            other => Self::Other(other),
        })
    }
}

/// `GET /tmis/{application}/{session}/{template}/{id}/{version}` body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TmiDetail {
    #[serde(rename = "fullTMI")]
    pub full_tmi: FullTmiId,
    pub id: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "latestVersion", default)]
    pub latest_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atls: Option<AtlPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<VersionedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<BTreeMap<Version, VersionedState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<UpdatesPayload>,
}

impl TmiDetail {
    fn header(tmi: &TrustModelInstance) -> Self {
        Self {
            full_tmi: tmi.full_id.clone(),
            id: tmi.id.clone(),
            template: tmi.template.clone(),
            active: tmi.active,
            latest_version: tmi.latest_version,
            atls: None,
            state: None,
            states: None,
            updates: None,
        }
    }

    /// Single-version shape for `version`, or `None` if no state exists there.
    pub fn single_version(tmi: &TrustModelInstance, version: Version) -> Option<Self> {
        let state = tmi.states.get(&version)?;
        Some(Self {
            atls: tmi.atls.get(&version).cloned().map(AtlPayload::Single),
            state: Some(state.clone()),
            updates: Some(UpdatesPayload::List(
                tmi.updates.get(&version).cloned().unwrap_or_default(),
            )),
            ..Self::header(tmi)
        })
    }

    /// Multi-version shape carrying every recorded version.
    pub fn all_versions(tmi: &TrustModelInstance) -> Self {
        Self {
            atls: Some(AtlPayload::ByVersion(tmi.atls.clone())),
            states: Some(tmi.states.clone()),
            updates: Some(UpdatesPayload::ByVersion(tmi.updates.clone())),
            ..Self::header(tmi)
        }
    }
}

/// Which versions a single-TMI fetch asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VersionSelector {
    #[default]
    All,
    Latest,
    At(Version),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Latest => f.write_str("latest"),
            Self::At(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for VersionSelector {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "latest" => Ok(Self::Latest),
            other => other
                .parse::<Version>()
                .map(Self::At)
                .map_err(|_| format!("invalid version selector: {other}")),
        }
    }
}

/// Address of one TMI on the fetch API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TmiRequest {
    pub application: String,
    pub session_id: String,
    pub template: String,
    pub id: String,
    pub version: VersionSelector,
}

impl TmiRequest {
    pub fn new(
        application: impl Into<String>,
        session_id: impl Into<String>,
        template: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            session_id: session_id.into(),
            template: template.into(),
            id: id.into(),
            version: VersionSelector::All,
        }
    }

    pub fn with_version(mut self, version: VersionSelector) -> Self {
        self.version = version;
        self
    }

    /// Path relative to the API root, e.g. `tmis/app/sess1/tmpl/abc/all`.
    pub fn path(&self) -> String {
        format!(
            "tmis/{}/{}/{}/{}/{}",
            self.application, self.session_id, self.template, self.id, self.version
        )
    }

    pub fn full_tmi(&self) -> FullTmiId {
        FullTmiId::merge(&self.application, &self.session_id, &self.template, &self.id)
    }
}
