//! Error types for the Migration Operator

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Migration Operator
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Migration spec rejected by admission checks.
    /// Swallowed after an event is recorded; the user must fix the spec.
    #[error("Invalid migration: {reason}")]
    Validation { reason: String },

    /// Cluster pair exists but the named component is not ready yet
    #[error("Cluster pair {pair} {component} status is not ready")]
    PairNotReady { pair: String, component: String },

    /// Volume driver error
    #[error("Volume driver error: {0}")]
    Driver(String),

    /// Named pre/post rule does not resolve
    #[error("Rule {name} not found in namespace {namespace}")]
    RuleNotFound { name: String, namespace: String },

    /// Rule execution failed
    #[error("Rule execution failed: {0}")]
    Rule(String),

    /// A single object could not be prepared for the destination cluster
    #[error("Failed to prepare {name} for migration: {reason}")]
    ResourcePreparation { name: String, reason: String },

    /// A single object could not be applied on the destination cluster
    #[error("Failed to apply {name} on destination cluster: {reason}")]
    Apply { name: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors the reconciler swallows after recording an event, so the
    /// controller framework does not back off on user error.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::PairNotReady { .. } | Error::RuleNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_swallowed() {
        assert!(Error::Validation {
            reason: "empty clusterPair".into()
        }
        .is_user_error());
        assert!(Error::PairNotReady {
            pair: "pair-a".into(),
            component: "storage".into()
        }
        .is_user_error());
        assert!(Error::RuleNotFound {
            name: "quiesce".into(),
            namespace: "team-a".into()
        }
        .is_user_error());
    }

    #[test]
    fn test_infrastructure_errors_propagate() {
        assert!(!Error::Driver("copy failed".into()).is_user_error());
        assert!(!Error::Internal("oops".into()).is_user_error());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::PairNotReady {
            pair: "pair-a".into(),
            component: "scheduler".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cluster pair pair-a scheduler status is not ready"
        );
    }
}
