use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EventDecodeError;
use crate::ids::{ClientId, FullTmiId, SessionId};
use crate::model::{Atl, SubjectiveLogicOpinion, TrustGraphStructure, TrustRelationship, Update, Version, VersionedState};

/// `EventType` tags understood by [`ReplicaEvent`].
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "SESSION_CREATED",
    "SESSION_TORNDOWN",
    "TRUST_MODEL_INSTANCE_SPAWNED",
    "TRUST_MODEL_INSTANCE_UPDATED",
    "TRUST_MODEL_INSTANCE_DELETED",
    "ATL_UPDATED",
    "ATL_REMOVED",
];

/// Snapshot fields carried by spawn and update events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TmiSnapshot {
    #[serde(rename = "FullTMI")]
    pub full_tmi: FullTmiId,
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Version")]
    pub version: Version,
    #[serde(rename = "Fingerprint", default)]
    pub fingerprint: u64,
    #[serde(rename = "Structure", default)]
    pub structure: TrustGraphStructure,
    #[serde(rename = "Values", default)]
    pub values: Option<BTreeMap<String, Vec<TrustRelationship>>>,
    #[serde(rename = "RTLs", default)]
    pub rtls: Option<BTreeMap<String, SubjectiveLogicOpinion>>,
    #[serde(rename = "Update", default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,
}

impl TmiSnapshot {
    pub fn to_state(&self) -> VersionedState {
        VersionedState {
            version: self.version,
            fingerprint: self.fingerprint,
            structure: self.structure.clone(),
            values: self.values.clone().unwrap_or_default(),
            rtls: self.rtls.clone().unwrap_or_default(),
        }
    }
}

/// One message from the push stream, validated at the boundary.
///
/// Decode with [`ReplicaEvent::decode`]; unknown tags become
/// [`ReplicaEvent::Unrecognized`] instead of failing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "EventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaEvent {
    SessionCreated {
        #[serde(rename = "SessionID")]
        session_id: SessionId,
        #[serde(rename = "ClientID", default = "unknown_client")]
        client_id: ClientId,
        #[serde(rename = "TrustModelTemplate", default)]
        trust_model_template: String,
    },

    SessionTorndown {
        #[serde(rename = "SessionID")]
        session_id: SessionId,
    },

    TrustModelInstanceSpawned(TmiSnapshot),

    TrustModelInstanceUpdated(TmiSnapshot),

    TrustModelInstanceDeleted {
        #[serde(rename = "FullTMI")]
        full_tmi: FullTmiId,
    },

    #[serde(rename = "ATL_UPDATED")]
    AtlUpdated {
        #[serde(rename = "FullTMI")]
        full_tmi: FullTmiId,
        /// Nominal version of the event; the ATL's own version is authoritative.
        #[serde(rename = "Version", default)]
        version: Option<Version>,
        #[serde(rename = "NewATLs")]
        new_atls: Atl,
    },

    /// Reserved upstream; carries nothing the replica uses.
    #[serde(rename = "ATL_REMOVED")]
    AtlRemoved {
        #[serde(rename = "FullTMI", default)]
        full_tmi: Option<FullTmiId>,
    },

    /// Any tag not in [`KNOWN_EVENT_TYPES`].
    #[serde(skip)]
    Unrecognized { event_type: String },
}

fn unknown_client() -> ClientId {
    ClientId::from_raw("")
}

impl ReplicaEvent {
    /// Decode one raw JSON message.
    pub fn decode(raw: &str) -> Result<Self, EventDecodeError> {
        let value: Value = serde_json::from_str(raw).map_err(EventDecodeError::InvalidJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EventDecodeError> {
        let event_type = value
            .get("EventType")
            .and_then(Value::as_str)
            .ok_or(EventDecodeError::MissingEventType)?
            .to_owned();

        if !KNOWN_EVENT_TYPES.contains(&event_type.as_str()) {
            return Ok(Self::Unrecognized { event_type });
        }

        serde_json::from_value(value).map_err(|source| EventDecodeError::Malformed { event_type, source })
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::SessionCreated { .. } => "SESSION_CREATED",
            Self::SessionTorndown { .. } => "SESSION_TORNDOWN",
            Self::TrustModelInstanceSpawned(_) => "TRUST_MODEL_INSTANCE_SPAWNED",
            Self::TrustModelInstanceUpdated(_) => "TRUST_MODEL_INSTANCE_UPDATED",
            Self::TrustModelInstanceDeleted { .. } => "TRUST_MODEL_INSTANCE_DELETED",
            Self::AtlUpdated { .. } => "ATL_UPDATED",
            Self::AtlRemoved { .. } => "ATL_REMOVED",
            Self::Unrecognized { event_type } => event_type,
        }
    }

    /// The TMI this event addresses, if any.
    pub fn full_tmi(&self) -> Option<&FullTmiId> {
        match self {
            Self::TrustModelInstanceSpawned(snapshot) | Self::TrustModelInstanceUpdated(snapshot) => {
                Some(&snapshot.full_tmi)
            }
            Self::TrustModelInstanceDeleted { full_tmi } | Self::AtlUpdated { full_tmi, .. } => Some(full_tmi),
            Self::AtlRemoved { full_tmi } => full_tmi.as_ref(),
            Self::SessionCreated { .. } | Self::SessionTorndown { .. } | Self::Unrecognized { .. } => None,
        }
    }
}
