//! The anomaly taxonomy.
//!
//! Every component in the runtime reports failure as an [`Anomaly`]: a
//! category drawn from a small closed set, a human-readable message, and an
//! optional structured `explain` value for validation failures. Callers
//! either propagate anomalies unchanged or map them at the boundary (the
//! HTTP layer maps categories onto status codes).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyCategory {
    /// The caller supplied invalid input; retrying unchanged will fail again.
    Incorrect,
    /// The named thing does not exist.
    NotFound,
    /// The caller is not allowed to do this.
    Forbidden,
    /// The request conflicts with current state.
    Conflict,
    /// The callee failed; the fault is on this side of the boundary.
    Fault,
    /// A required collaborator is not available.
    Unavailable,
    /// The callee is overloaded; retrying later may succeed.
    Busy,
    /// Processing was interrupted before completion.
    Interrupted,
}

impl std::fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnomalyCategory::Incorrect => "incorrect",
            AnomalyCategory::NotFound => "not-found",
            AnomalyCategory::Forbidden => "forbidden",
            AnomalyCategory::Conflict => "conflict",
            AnomalyCategory::Fault => "fault",
            AnomalyCategory::Unavailable => "unavailable",
            AnomalyCategory::Busy => "busy",
            AnomalyCategory::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// A structured error value returned in place of a success value.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct Anomaly {
    /// Failure category.
    pub category: AnomalyCategory,
    /// Human-readable description.
    pub message: String,
    /// Structured detail, present on validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<Value>,
}

impl Anomaly {
    /// Build an anomaly with the given category and message.
    pub fn new(category: AnomalyCategory, message: impl Into<String>) -> Self {
        Self { category, message: message.into(), explain: None }
    }

    /// Invalid input from the caller.
    pub fn incorrect(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Incorrect, message)
    }

    /// The named thing does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::NotFound, message)
    }

    /// The caller is not allowed to do this.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Forbidden, message)
    }

    /// The request conflicts with current state.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Conflict, message)
    }

    /// The callee failed.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Fault, message)
    }

    /// A required collaborator is not available.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Unavailable, message)
    }

    /// The callee is overloaded.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Busy, message)
    }

    /// Processing was interrupted.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(AnomalyCategory::Interrupted, message)
    }

    /// Attach a structured explain value, consuming and returning the anomaly.
    pub fn with_explain(mut self, explain: Value) -> Self {
        self.explain = Some(explain);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_uses_kebab_case_category() {
        let anomaly = Anomaly::not_found("Unknown Command");
        assert_eq!(anomaly.to_string(), "not-found: Unknown Command");
    }

    #[test]
    fn explain_survives_serde() {
        let anomaly = Anomaly::incorrect("Invalid Command")
            .with_explain(json!({"problems": [{"field": "name"}]}));
        let round: Anomaly =
            serde_json::from_str(&serde_json::to_string(&anomaly).unwrap()).unwrap();
        assert_eq!(round, anomaly);
    }

    #[test]
    fn explain_omitted_when_absent() {
        let value = serde_json::to_value(Anomaly::fault("boom")).unwrap();
        assert!(value.get("explain").is_none());
        assert_eq!(value["category"], json!("fault"));
    }
}
