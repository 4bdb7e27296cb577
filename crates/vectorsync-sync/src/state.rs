//! Participation state of a node.
//!
//! ```text
//! Active       -> Intermediate   probe round starts, SleepCommand received
//! Intermediate -> Active         delegated, below quorum, settled after wake
//! Intermediate -> Sleeping       final-sync barrier done, SyncACK to self
//! Sleeping     -> Intermediate   wake timer, host wake
//! ```
//!
//! Every other transition is rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Participation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Publishing, syncing and answering probes.
    Active,
    /// Probing, delegating, running the final-sync barrier, or catching up
    /// after waking.
    Intermediate,
    /// Dormant: originates nothing and ignores the group.
    Sleeping,
}

impl NodeState {
    /// All states.
    pub const ALL: [NodeState; 3] = [
        NodeState::Active,
        NodeState::Intermediate,
        NodeState::Sleeping,
    ];

    /// Whether the transition table allows `self -> to`.
    pub fn can_transition_to(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Active, Intermediate)
                | (Intermediate, Active)
                | (Intermediate, Sleeping)
                | (Sleeping, Intermediate)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Active => "active",
            NodeState::Intermediate => "intermediate",
            NodeState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// A node's current state plus transition bookkeeping.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: NodeState,
    transitions: u64,
}

impl StateMachine {
    /// Start in `Active`.
    pub fn new() -> Self {
        Self {
            current: NodeState::Active,
            transitions: 0,
        }
    }

    pub fn current(&self) -> NodeState {
        self.current
    }

    pub fn is(&self, state: NodeState) -> bool {
        self.current == state
    }

    /// Number of transitions taken so far.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Move to `to`, returning the previous state.
    pub fn transition(&mut self, to: NodeState) -> Result<NodeState> {
        let from = self.current;
        if !from.can_transition_to(to) {
            return Err(SyncError::IllegalTransition { from, to });
        }
        self.current = to;
        self.transitions += 1;
        Ok(from)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_cycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.transition(NodeState::Intermediate).unwrap(), NodeState::Active);
        sm.transition(NodeState::Sleeping).unwrap();
        sm.transition(NodeState::Intermediate).unwrap();
        sm.transition(NodeState::Active).unwrap();
        assert!(sm.is(NodeState::Active));
        assert_eq!(sm.transitions(), 4);
    }

    #[test]
    fn test_every_illegal_transition_rejected() {
        let legal = [
            (NodeState::Active, NodeState::Intermediate),
            (NodeState::Intermediate, NodeState::Active),
            (NodeState::Intermediate, NodeState::Sleeping),
            (NodeState::Sleeping, NodeState::Intermediate),
        ];
        for from in NodeState::ALL {
            for to in NodeState::ALL {
                let mut sm = StateMachine {
                    current: from,
                    transitions: 0,
                };
                let result = sm.transition(to);
                if legal.contains(&(from, to)) {
                    assert!(result.is_ok(), "{} -> {} should be legal", from, to);
                } else {
                    assert!(
                        matches!(result, Err(SyncError::IllegalTransition { .. })),
                        "{} -> {} should be rejected",
                        from,
                        to
                    );
                    assert_eq!(sm.current(), from);
                    assert_eq!(sm.transitions(), 0);
                }
            }
        }
    }
}
