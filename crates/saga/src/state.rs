//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──┬──► Completed
///           └──► Compensating ──┬──► Compensated
///                               └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga steps are being executed.
    #[default]
    Started,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed and compensating actions are in progress.
    Compensating,

    /// Every compensation succeeded after a failure (terminal state).
    Compensated,

    /// The saga could not complete and could not fully compensate, or
    /// exhausted its retry budget (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "Started",
            SagaState::Completed => "Completed",
            SagaState::Compensating => "Compensating",
            SagaState::Compensated => "Compensated",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_started() {
        assert_eq!(SagaState::default(), SagaState::Started);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaState::Started.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Compensated.is_terminal());
        assert!(SagaState::Failed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::Started.to_string(), "Started");
        assert_eq!(SagaState::Completed.to_string(), "Completed");
        assert_eq!(SagaState::Compensating.to_string(), "Compensating");
        assert_eq!(SagaState::Compensated.to_string(), "Compensated");
        assert_eq!(SagaState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_serialization() {
        let state = SagaState::Compensated;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: SagaState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
