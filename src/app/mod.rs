mod orchestrator;
mod shutdown;
mod startup;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{Collaborators, PowerOrchestrator};
pub use startup::HostGroup;
pub use types::{EscalationOutcome, Stage};
