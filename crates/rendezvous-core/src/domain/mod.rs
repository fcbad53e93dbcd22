//! Domain model (errors, ids, store layout, listener states, outcomes).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod paths;
pub mod state;

pub use self::errors::{Error, ErrorKind, Result};
pub use self::ids::{ResultId, SessionId};
pub use self::outcome::{Artifact, Outcome, OutcomeKind, TaskResult};
pub use self::paths::NodePaths;
pub use self::state::{GenerationState, ListenerState};
