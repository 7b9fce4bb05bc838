use crate::waiter::Target;
use std::collections::BTreeSet;
use std::fmt;

/// Operator-invoked stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PowerOff,
    PowerOn,
}

impl Stage {
    /// Description used in prompts and begin/end log lines.
    pub fn action(&self) -> &'static str {
        match self {
            Stage::PowerOff => "shutdown of management NCNs",
            Stage::PowerOn => "boot of management NCNs",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PowerOff => f.write_str("power-off-management-nodes"),
            Stage::PowerOn => f.write_str("power-on-management-nodes"),
        }
    }
}

/// Result of a convergence step that may have left hosts behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    Converged,
    Stragglers(BTreeSet<Target>),
}

impl EscalationOutcome {
    pub fn from_pending(pending: BTreeSet<Target>) -> Self {
        if pending.is_empty() {
            EscalationOutcome::Converged
        } else {
            EscalationOutcome::Stragglers(pending)
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, EscalationOutcome::Converged)
    }
}
