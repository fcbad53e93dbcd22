//! Outcome model: what a worker reports back through the Store.
//!
//! Results never travel over the socket channel. Each executed task leaves one
//! `TaskResult` JSON blob under the node's results prefix, and the coordinator
//! collects them from there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ResultId;

/// We serialize as SCREAMING_SNAKE_CASE: SUCCESS / FAILURE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Something produced or observed while running a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Artifact {
    Stdout(String),
    Stderr(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            artifacts: Vec::new(),
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            artifacts: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

/// One result blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: ResultId,
    pub node: String,
    /// The raw task line as it was drained.
    pub task: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_required_names() {
        let s = serde_json::to_string(&OutcomeKind::Success).unwrap();
        assert_eq!(s, "\"SUCCESS\"");

        let s = serde_json::to_string(&OutcomeKind::Failure).unwrap();
        assert_eq!(s, "\"FAILURE\"");
    }

    #[test]
    fn artifact_is_tagged_enum() {
        let a = Artifact::Stdout("hello".to_string());
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["kind"], "Stdout");
        assert_eq!(v["value"], "hello");
    }

    #[test]
    fn failure_keeps_reason_and_skips_empty_artifacts() {
        let v = serde_json::to_value(Outcome::failure("boom")).unwrap();
        assert_eq!(v["reason"], "boom");
        assert!(v.get("artifacts").is_none());
    }
}
