use super::{PowerOrchestrator, Stage};
use crate::console::ConsoleLogSession;
use crate::credentials::Credentials;
use crate::error::{join_hosts, PowerError, Result};
use crate::service::RunningService;
use crate::waiter::{PowerState, PowerStateWaiter, SshAvailableWaiter, Target};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Hosts of one role, powered on together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGroup {
    pub role: String,
    pub hosts: Vec<Target>,
}

impl PowerOrchestrator {
    /// Power on the management nodes group by group in the configured role
    /// order, requiring each group to be reachable over SSH before the next
    /// one starts.
    pub async fn power_on(
        &self,
        credentials: Credentials,
        ipmi_timeout: Duration,
        ssh_timeout: Duration,
    ) -> Result<()> {
        self.name_resolution.enable_entries()?;

        self.logged(
            Stage::PowerOn.action(),
            self.boot_groups(credentials, ipmi_timeout, ssh_timeout),
        )
        .await?;

        info!("Disabling entries in hosts file to prepare for starting DNS");
        self.name_resolution.disable_entries()?;
        Ok(())
    }

    /// Role groups in power-on order. A host listed under several roles is
    /// only kept in the first group that names it.
    pub fn resolve_groups(&self) -> Result<Vec<HostGroup>> {
        let exclude = self.excluded_roles();
        let mut seen = BTreeSet::new();
        let mut groups = Vec::new();

        for role in &self.config.hosts.power_on_order {
            let hosts: Vec<Target> = self
                .inventory
                .get_hosts(std::slice::from_ref(role), &exclude)?
                .into_iter()
                .filter(|host| seen.insert(host.clone()))
                .collect();

            groups.push(HostGroup {
                role: role.clone(),
                hosts,
            });
        }

        Ok(groups)
    }

    async fn boot_groups(
        &self,
        credentials: Credentials,
        ipmi_timeout: Duration,
        ssh_timeout: Duration,
    ) -> Result<()> {
        let groups = self.resolve_groups()?;
        let all_hosts: Vec<Target> = groups
            .iter()
            .flat_map(|group| group.hosts.iter().cloned())
            .collect();

        let service = RunningService::from_config(Arc::clone(&self.services), &self.config.service);
        let session = ConsoleLogSession::new(Arc::clone(&self.console), all_hosts);

        service
            .run(session.run(self.boot_in_order(&groups, credentials, ipmi_timeout, ssh_timeout)))
            .await
    }

    async fn boot_in_order(
        &self,
        groups: &[HostGroup],
        credentials: Credentials,
        ipmi_timeout: Duration,
        ssh_timeout: Duration,
    ) -> Result<()> {
        for group in groups {
            self.power_on_group(group, credentials.clone(), ipmi_timeout, ssh_timeout)
                .await?;
        }
        Ok(())
    }

    /// Power on one group and wait for it to accept SSH connections.
    ///
    /// Hosts that stay unreachable are fatal: later roles depend on this one.
    pub async fn power_on_group(
        &self,
        group: &HostGroup,
        credentials: Credentials,
        ipmi_timeout: Duration,
        ssh_timeout: Duration,
    ) -> Result<()> {
        if group.hosts.is_empty() {
            info!(role = %group.role, "No hosts in group {}, skipping", group.role);
            return Ok(());
        }

        info!(
            role = %group.role,
            "Powering on {} host(s) in group {}",
            group.hosts.len(),
            group.role
        );

        // The power on command is sent even to hosts that already report on.
        let ipmi_waiter = PowerStateWaiter::new(
            Arc::clone(&self.power),
            PowerState::On,
            credentials,
            ipmi_timeout,
            self.config.ipmi.poll_interval(),
            true,
        );
        let not_on = ipmi_waiter
            .wait_for_completion(group.hosts.iter().cloned())
            .await;
        if !not_on.is_empty() {
            warn!(
                role = %group.role,
                "Hosts did not report IPMI power on, checking SSH anyway: {}",
                join_hosts(&not_on)
            );
        }

        let ssh_waiter = SshAvailableWaiter::new(
            Arc::clone(&self.shell),
            ssh_timeout,
            self.config.ssh.poll_interval(),
        );
        let inaccessible = ssh_waiter
            .wait_for_completion(group.hosts.iter().cloned())
            .await;

        if !inaccessible.is_empty() {
            error!(
                role = %group.role,
                "Unable to reach the following NCNs via SSH after powering them on: {}. \
                 Troubleshoot the issue and then try again.",
                join_hosts(&inaccessible)
            );
            return Err(PowerError::HostsUnreachable {
                hosts: inaccessible,
            });
        }

        info!(role = %group.role, "Group {} is up", group.role);
        Ok(())
    }
}
