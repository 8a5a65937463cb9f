//! The invocation state machine.
//!
//! `Init → Thinking → (ToolDispatch → Thinking)* → Done | Error | IterationLimit`

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Init,
    Thinking { iteration: u32 },
    ToolDispatch { iteration: u32 },
    Done,
    Error,
    IterationLimit,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::IterationLimit)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (Init, Thinking { iteration: 1 }) | (Init, Error) => true,
            (Thinking { iteration: a }, ToolDispatch { iteration: b }) => a == b,
            (Thinking { .. }, Done | Error | IterationLimit) => true,
            (ToolDispatch { iteration: a }, Thinking { iteration: b }) => b == a + 1,
            (ToolDispatch { .. }, Error | IterationLimit) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Thinking { iteration } => write!(f, "THINKING({iteration})"),
            Self::ToolDispatch { iteration } => write!(f, "TOOL_DISPATCH({iteration})"),
            Self::Done => write!(f, "DONE"),
            Self::Error => write!(f, "ERROR"),
            Self::IterationLimit => write!(f, "ITERATION_LIMIT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use AgentState::*;
        assert!(Init.can_transition_to(Thinking { iteration: 1 }));
        assert!(Thinking { iteration: 3 }.can_transition_to(ToolDispatch { iteration: 3 }));
        assert!(ToolDispatch { iteration: 3 }.can_transition_to(Thinking { iteration: 4 }));
        assert!(ToolDispatch { iteration: 15 }.can_transition_to(IterationLimit));
        assert!(!Done.can_transition_to(Thinking { iteration: 1 }));
        assert!(!Init.can_transition_to(Done));
        assert!(!ToolDispatch { iteration: 2 }.can_transition_to(Thinking { iteration: 2 }));
    }

    #[test]
    fn terminal_states() {
        assert!(AgentState::Done.is_terminal());
        assert!(AgentState::IterationLimit.is_terminal());
        assert!(!AgentState::Thinking { iteration: 1 }.is_terminal());
        assert_eq!(AgentState::IterationLimit.to_string(), "ITERATION_LIMIT");
    }
}
