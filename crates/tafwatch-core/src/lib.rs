//! Entity model, identifiers and wire shapes shared by every tafwatch crate.

pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod wire;

pub use errors::{EventDecodeError, FetchError, IdError};
pub use events::ReplicaEvent;
pub use ids::{ClientId, FullTmiId, SessionId, TmiIdentity};
pub use model::{Atl, Session, SubjectiveLogicOpinion, TrustModelInstance, Update, Version, VersionedState};
