use crate::config::PowerConfig;
use crate::console::{ConsoleLogControl, ScriptConsoleLogger};
use crate::error::Result;
use crate::hosts::{HostInventory, HostsFileToggle, NameResolution, StaticInventory};
use crate::ipmi::{IpmitoolClient, OutOfBandPower};
use crate::mock::{MockConsoleLog, MockNameResolution, MockPower, MockServiceControl, MockShell};
use crate::service::{ServiceControl, SystemctlService};
use crate::ssh::{OpenSshClient, RemoteShell};
use crate::waiter::PowerState;
use chrono::Local;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// External capabilities the stages drive.
#[derive(Clone)]
pub struct Collaborators {
    pub power: Arc<dyn OutOfBandPower>,
    pub shell: Arc<dyn RemoteShell>,
    pub inventory: Arc<dyn HostInventory>,
    pub name_resolution: Arc<dyn NameResolution>,
    pub services: Arc<dyn ServiceControl>,
    pub console: Arc<dyn ConsoleLogControl>,
}

impl Collaborators {
    /// Real implementations: ipmitool, ssh, systemctl and the hosts file.
    pub fn system(config: &PowerConfig) -> Self {
        Self {
            power: Arc::new(IpmitoolClient::new(&config.ipmi)),
            shell: Arc::new(OpenSshClient::new(&config.ssh)),
            inventory: Arc::new(StaticInventory::new(config.hosts.inventory.clone())),
            name_resolution: Arc::new(HostsFileToggle::from_config(&config.hosts)),
            services: Arc::new(SystemctlService::new(&config.service)),
            console: Arc::new(ScriptConsoleLogger::new(&config.console)),
        }
    }

    /// Simulated hosts that follow every command, for rehearsing a stage.
    pub fn dry_run(config: &PowerConfig) -> Self {
        let power = Arc::new(MockPower::new());
        let shell = MockShell::new().powering_off(Arc::clone(&power), 1);
        for entry in &config.hosts.inventory {
            power.set_state(&entry.name, PowerState::On);
            shell.reachable_after(&entry.name, 1);
        }

        Self {
            power,
            shell: Arc::new(shell),
            inventory: Arc::new(StaticInventory::new(config.hosts.inventory.clone())),
            name_resolution: Arc::new(MockNameResolution::new()),
            services: Arc::new(MockServiceControl::new()),
            console: Arc::new(MockConsoleLog::new()),
        }
    }
}

/// Drives the management-node power stages
pub struct PowerOrchestrator {
    pub(super) config: PowerConfig,
    pub(super) power: Arc<dyn OutOfBandPower>,
    pub(super) shell: Arc<dyn RemoteShell>,
    pub(super) inventory: Arc<dyn HostInventory>,
    pub(super) name_resolution: Arc<dyn NameResolution>,
    pub(super) services: Arc<dyn ServiceControl>,
    pub(super) console: Arc<dyn ConsoleLogControl>,
    pub(super) run_id: Uuid,
}

impl PowerOrchestrator {
    /// Create an orchestrator backed by the real system tools
    pub fn new(config: PowerConfig) -> Self {
        let collaborators = Collaborators::system(&config);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: PowerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            power: collaborators.power,
            shell: collaborators.shell,
            inventory: collaborators.inventory,
            name_resolution: collaborators.name_resolution,
            services: collaborators.services,
            console: collaborators.console,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Roles never touched by either stage
    pub(super) fn excluded_roles(&self) -> Vec<String> {
        vec![self.config.hosts.bootstrap_role.clone()]
    }

    /// Run `body` between begin/end log lines, inside a span carrying the run id.
    pub(super) async fn logged<F, T>(&self, action: &str, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let span = info_span!("stage", run_id = %self.run_id, action);
        let started = Instant::now();
        info!(parent: &span, "Beginning {} at {}", action, Local::now().format("%Y-%m-%d %H:%M:%S"));

        let outcome = body.instrument(span.clone()).await;
        let elapsed = started.elapsed().as_secs();

        match &outcome {
            Ok(_) => info!(parent: &span, elapsed_secs = elapsed, "Completed {}", action),
            Err(e) => error!(parent: &span, elapsed_secs = elapsed, "Failed {}: {}", action, e),
        }

        outcome
    }
}
