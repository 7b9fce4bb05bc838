pub mod app;
pub mod config;
pub mod console;
pub mod credentials;
pub mod error;
pub mod hosts;
pub mod ipmi;
pub mod mock;
pub mod service;
pub mod ssh;
pub mod waiter;

pub use app::{Collaborators, EscalationOutcome, HostGroup, PowerOrchestrator, Stage};
pub use config::PowerConfig;
pub use console::{ConsoleLogControl, ConsoleLogSession, ScriptConsoleLogger};
pub use credentials::Credentials;
pub use error::{PowerError, Result};
pub use hosts::{HostInventory, HostsFileToggle, NameResolution, StaticInventory};
pub use ipmi::{IpmitoolClient, OutOfBandPower};
pub use service::{RunningService, ServiceControl, SystemctlService};
pub use ssh::{OpenSshClient, RemoteSession, RemoteShell};
pub use waiter::{
    Condition, GroupWaiter, PowerState, PowerStateWaiter, PreWaitAction, SshAvailableWaiter,
    Target,
};
