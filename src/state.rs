//! Connection and agent state machines
//!
//! Both dimensions live in one `StateMachine` value owned by the session.
//! Every change goes through `set_connection` / `set_agent`, which check the
//! transition table and report whether anything actually changed.

use std::fmt;

/// Lifecycle of the duplex connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Ended by a failure; `connect` may be retried from here
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

impl ConnectionState {
    /// `Connecting` or `Connected`: a session task is alive.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Connecting)
                | (Error, Disconnected)
        )
    }
}

/// Who is acting in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Idle => write!(f, "Idle"),
            AgentState::Listening => write!(f, "Listening"),
            AgentState::Thinking => write!(f, "Thinking"),
            AgentState::Speaking => write!(f, "Speaking"),
        }
    }
}

impl AgentState {
    /// Microphone audio is held back while the agent thinks or speaks.
    pub fn mutes_capture(self) -> bool {
        matches!(self, AgentState::Thinking | AgentState::Speaking)
    }

    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            // Teardown always lands in Idle
            (_, Idle) => true,
            (Idle, Speaking) => false,
            (Idle, _) => true,
            (Listening, Thinking | Speaking) => true,
            (Thinking, Listening | Speaking) => true,
            (Speaking, Listening | Thinking) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind} transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub kind: &'static str,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Default)]
pub struct StateMachine {
    connection: ConnectionState,
    agent: AgentState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn agent(&self) -> AgentState {
        self.agent
    }

    /// Returns `Ok(true)` if the state changed, `Ok(false)` if it already was `next`.
    pub fn set_connection(&mut self, next: ConnectionState) -> Result<bool, InvalidTransition> {
        if self.connection == next {
            return Ok(false);
        }
        if !self.connection.can_transition_to(next) {
            return Err(InvalidTransition {
                kind: "connection",
                from: self.connection.to_string(),
                to: next.to_string(),
            });
        }
        self.connection = next;
        Ok(true)
    }

    /// Returns `Ok(true)` if the state changed, `Ok(false)` if it already was `next`.
    pub fn set_agent(&mut self, next: AgentState) -> Result<bool, InvalidTransition> {
        if self.agent == next {
            return Ok(false);
        }
        if !self.agent.can_transition_to(next) {
            return Err(InvalidTransition {
                kind: "agent",
                from: self.agent.to_string(),
                to: next.to_string(),
            });
        }
        self.agent = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_STATES: [AgentState; 4] = [
        AgentState::Idle,
        AgentState::Listening,
        AgentState::Thinking,
        AgentState::Speaking,
    ];

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Error.to_string(), "Error");
        assert_eq!(AgentState::Thinking.to_string(), "Thinking");
    }

    #[test]
    fn test_idle_never_jumps_to_speaking() {
        let mut sm = StateMachine::new();
        let err = sm.set_agent(AgentState::Speaking).unwrap_err();
        assert_eq!(err.to_string(), "Invalid agent transition: Idle -> Speaking");
        assert_eq!(sm.agent(), AgentState::Idle);

        assert!(sm.set_agent(AgentState::Listening).unwrap());
        assert!(sm.set_agent(AgentState::Speaking).unwrap());
    }

    #[test]
    fn test_agent_transition_table() {
        for from in AGENT_STATES {
            for to in AGENT_STATES {
                let allowed = from.can_transition_to(to);
                if from == AgentState::Idle && to == AgentState::Speaking {
                    assert!(!allowed);
                } else if from != to {
                    assert!(allowed, "{} -> {} should be allowed", from, to);
                }
            }
        }
    }

    #[test]
    fn test_mute_coupling() {
        let muted: Vec<_> = AGENT_STATES.iter().filter(|s| s.mutes_capture()).collect();
        assert_eq!(muted, vec![&AgentState::Thinking, &AgentState::Speaking]);
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut sm = StateMachine::new();
        assert!(sm.set_connection(ConnectionState::Connected).is_err());
        assert!(sm.set_connection(ConnectionState::Connecting).unwrap());
        assert!(!sm.set_connection(ConnectionState::Connecting).unwrap());
        assert!(sm.set_connection(ConnectionState::Connected).unwrap());
        assert!(sm.set_connection(ConnectionState::Connecting).is_err());
        assert!(sm.set_connection(ConnectionState::Error).unwrap());
        // Retry after a failure
        assert!(sm.set_connection(ConnectionState::Connecting).unwrap());
        assert!(sm.set_connection(ConnectionState::Disconnected).unwrap());
        assert!(sm.set_connection(ConnectionState::Error).is_err());
    }

    #[test]
    fn test_is_active() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Error.is_active());
    }
}
