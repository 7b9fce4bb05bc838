use super::{EscalationOutcome, PowerOrchestrator, Stage};
use crate::console::ConsoleLogSession;
use crate::credentials::Credentials;
use crate::error::{join_hosts, PowerError, Result};
use crate::service::RunningService;
use crate::waiter::{PowerState, PowerStateWaiter, Target};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

impl PowerOrchestrator {
    /// Gracefully shut down every management node outside the bootstrap
    /// role, forcing power off for nodes that do not go down in time.
    pub async fn power_off(&self, credentials: Credentials, timeout: Duration) -> Result<()> {
        info!("Enabling required entries in hosts file for NCN mgmt interfaces");
        self.name_resolution.enable_entries()?;

        self.logged(
            Stage::PowerOff.action(),
            self.shutdown_hosts(credentials, timeout),
        )
        .await
    }

    async fn shutdown_hosts(&self, credentials: Credentials, timeout: Duration) -> Result<()> {
        let hosts = self
            .inventory
            .get_hosts(&self.config.hosts.shutdown_roles, &self.excluded_roles())?;

        if hosts.is_empty() {
            warn!("No management nodes found to shut down");
            return Ok(());
        }

        info!("Sending shutdown command to hosts");
        let session = ConsoleLogSession::new(Arc::clone(&self.console), hosts.clone());
        session
            .run(self.shutdown_sequence(&hosts, credentials, timeout))
            .await?;

        info!("Shutdown complete");
        Ok(())
    }

    async fn shutdown_sequence(
        &self,
        hosts: &[Target],
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<()> {
        self.start_shutdown(hosts).await;
        self.finish_shutdown(hosts, credentials, timeout).await
    }

    /// Dispatch the shutdown command to each host over SSH.
    ///
    /// Hosts that cannot be reached are skipped with a warning; they are
    /// left for `finish_shutdown` to force off. Returns the hosts the
    /// command was dispatched to.
    pub async fn start_shutdown(&self, hosts: &[Target]) -> Vec<Target> {
        let command = &self.config.ssh.shutdown_command;
        let mut dispatched = Vec::with_capacity(hosts.len());

        for host in hosts {
            info!(host = %host, "Executing command on host \"{}\": `{}`", host, command);

            let mut session = match self.shell.connect(host).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(host = %host, "Unable to connect to host \"{}\": {}", host, e);
                    continue;
                }
            };

            match session.execute(command).await {
                Ok(()) => dispatched.push(host.clone()),
                Err(e) => warn!(host = %host, "Remote execution failed for host \"{}\": {}", host, e),
            }

            if let Err(e) = session.close().await {
                warn!(host = %host, "Error closing session to host \"{}\": {}", host, e);
            }
        }

        dispatched
    }

    /// Ensure every host reaches IPMI power off.
    ///
    /// Hosts are first observed without sending anything. Only hosts still
    /// on after `timeout` get a forced power off, after which any host
    /// still on is a fatal failure.
    pub async fn finish_shutdown(
        &self,
        hosts: &[Target],
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<()> {
        let service = RunningService::from_config(Arc::clone(&self.services), &self.config.service);
        service
            .run(self.await_power_off(hosts, credentials, timeout))
            .await
    }

    async fn await_power_off(
        &self,
        hosts: &[Target],
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<()> {
        let poll_interval = self.config.ipmi.poll_interval();

        let observer = PowerStateWaiter::new(
            Arc::clone(&self.power),
            PowerState::Off,
            credentials.clone(),
            timeout,
            poll_interval,
            false,
        );
        let pending = match EscalationOutcome::from_pending(
            observer.wait_for_completion(hosts.iter().cloned()).await,
        ) {
            EscalationOutcome::Converged => return Ok(()),
            EscalationOutcome::Stragglers(pending) => pending,
        };

        warn!("Forcibly powering off nodes: {}", join_hosts(&pending));

        let enforcer = PowerStateWaiter::new(
            Arc::clone(&self.power),
            PowerState::Off,
            credentials,
            timeout,
            poll_interval,
            true,
        );
        match EscalationOutcome::from_pending(enforcer.wait_for_completion(pending).await) {
            EscalationOutcome::Converged => Ok(()),
            EscalationOutcome::Stragglers(failed) => {
                error!(
                    "The following nodes failed to reach powered off state: {}",
                    join_hosts(&failed)
                );
                Err(PowerError::HostsFailedToPowerOff { hosts: failed })
            }
        }
    }
}
