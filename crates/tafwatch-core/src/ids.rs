use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::IdError;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId);
branded_id!(ClientId);
branded_id!(FullTmiId);

/// Positional layout of a full TMI identifier: `<scheme>/<scheme>/<application>/<session>/<template>/<id>`.
const APPLICATION_FIELD: usize = 2;
const SESSION_FIELD: usize = 3;
const TEMPLATE_FIELD: usize = 4;
const ID_FIELD: usize = 5;

/// Identity fields derived from a full TMI identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TmiIdentity {
    pub application: String,
    pub session_id: SessionId,
    pub template: String,
    pub id: String,
}

impl FullTmiId {
    /// Build the canonical identifier `//{application}/{session}/{template}/{id}`.
    pub fn merge(application: &str, session_id: &str, template: &str, id: &str) -> Self {
        Self(format!("//{application}/{session_id}/{template}/{id}"))
    }

    fn field(&self, index: usize) -> Option<&str> {
        self.0.split('/').nth(index)
    }

    pub fn application(&self) -> Option<&str> {
        self.field(APPLICATION_FIELD)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.field(SESSION_FIELD).map(SessionId::from_raw)
    }

    /// Split into all four identity fields. Every field must be present and
    /// non-empty.
    pub fn identity(&self) -> Result<TmiIdentity, IdError> {
        let parts: Vec<&str> = self.0.split('/').collect();
        let get = |index: usize| -> Result<String, IdError> {
            match parts.get(index) {
                Some(part) if !part.is_empty() => Ok((*part).to_owned()),
                _ => Err(IdError::Malformed {
                    raw: self.0.clone(),
                    missing: index,
                }),
            }
        };
        Ok(TmiIdentity {
            application: get(APPLICATION_FIELD)?,
            session_id: SessionId::from_raw(get(SESSION_FIELD)?),
            template: get(TEMPLATE_FIELD)?,
            id: get(ID_FIELD)?,
        })
    }
}
