use super::*;
use crate::config::{InventoryEntry, PowerConfig};
use crate::credentials::Credentials;
use crate::error::PowerError;
use crate::hosts::StaticInventory;
use crate::mock::{
    new_journal, CallJournal, MockConsoleLog, MockNameResolution, MockPower, MockServiceControl,
    MockShell,
};
use crate::waiter::{PowerState, Target};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    journal: CallJournal,
    power: Arc<MockPower>,
    shell: MockShell,
    services: Arc<MockServiceControl>,
    console: Arc<MockConsoleLog>,
    names: Arc<MockNameResolution>,
    orchestrator: PowerOrchestrator,
}

fn inventory_entry(name: &str, roles: &[&str]) -> InventoryEntry {
    InventoryEntry {
        name: name.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn create_harness(inventory: Vec<InventoryEntry>) -> Harness {
    let journal = new_journal();
    let power = Arc::new(MockPower::with_journal(journal.clone()));
    let shell = MockShell::with_journal(journal.clone()).powering_off(power.clone(), 1);
    let services = Arc::new(MockServiceControl::with_journal(journal.clone()));
    let console = Arc::new(MockConsoleLog::with_journal(journal.clone()));
    let names = Arc::new(MockNameResolution::with_journal(journal.clone()));

    let mut config = PowerConfig::default();
    config.hosts.inventory = inventory.clone();

    let collaborators = Collaborators {
        power: power.clone(),
        shell: Arc::new(shell.clone()),
        inventory: Arc::new(StaticInventory::new(inventory)),
        name_resolution: names.clone(),
        services: services.clone(),
        console: console.clone(),
    };

    Harness {
        journal,
        power,
        shell,
        services,
        console,
        names,
        orchestrator: PowerOrchestrator::with_collaborators(config, collaborators),
    }
}

fn shutdown_inventory() -> Vec<InventoryEntry> {
    vec![
        inventory_entry("ncn-m001", &["managers", "bis"]),
        inventory_entry("ncn-m002", &["managers"]),
        inventory_entry("ncn-s001", &["storage"]),
        inventory_entry("ncn-w001", &["workers"]),
    ]
}

fn creds() -> Credentials {
    Credentials::new("root", "initial0")
}

fn hosts(names: &[&str]) -> std::collections::BTreeSet<Target> {
    names.iter().map(|n| Target::from(*n)).collect()
}

fn journal_index(journal: &CallJournal, entry: &str) -> usize {
    journal
        .lock()
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("journal has no entry '{}'", entry))
}

fn mark_all(harness: &Harness, state: PowerState) {
    for entry in &harness.orchestrator.config().hosts.inventory {
        harness.power.set_state(&entry.name, state);
    }
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_needs_no_force() {
    let harness = create_harness(shutdown_inventory());
    mark_all(&harness, PowerState::On);
    for host in ["ncn-m002", "ncn-s001", "ncn-w001"] {
        harness.shell.reachable_after(host, 1);
    }

    harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(10))
        .await
        .unwrap();

    assert!(harness.power.commands().is_empty());
    assert_eq!(harness.shell.executed().len(), 3);
    assert!(harness.names.is_enabled());
    assert!(!harness.services.is_running("dhcpd"));
    assert!(!harness.console.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_role_is_never_touched() {
    let harness = create_harness(shutdown_inventory());
    mark_all(&harness, PowerState::On);
    harness.shell.reachable_after("ncn-m001", 1);

    // Unreachable hosts get forced off, the bootstrap node stays up
    harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(harness.shell.connect_attempts("ncn-m001"), 0);
    assert!(harness.power.commands_for("ncn-m001").is_empty());
    assert_eq!(harness.power.state("ncn-m001"), Some(PowerState::On));
    assert_eq!(
        harness.console.sessions(),
        vec![vec![
            Target::from("ncn-m002"),
            Target::from("ncn-s001"),
            Target::from("ncn-w001")
        ]]
    );
}

#[tokio::test(start_paused = true)]
async fn test_escalation_only_touches_stragglers() {
    let harness = create_harness(shutdown_inventory());
    mark_all(&harness, PowerState::On);
    for host in ["ncn-m002", "ncn-s001", "ncn-w001"] {
        harness.shell.reachable_after(host, 1);
    }
    harness.shell.hang_on_shutdown("ncn-w001");

    harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(3))
        .await
        .unwrap();

    assert_eq!(
        harness.power.commands(),
        vec![(Target::from("ncn-w001"), PowerState::Off)]
    );
    assert_eq!(harness.power.state("ncn-w001"), Some(PowerState::Off));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_host_is_skipped_then_forced_off() {
    let harness = create_harness(shutdown_inventory());
    mark_all(&harness, PowerState::On);
    harness.shell.reachable_after("ncn-m002", 1);
    harness.shell.reachable_after("ncn-w001", 1);
    harness.shell.fail_exec("ncn-w001");

    harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(2))
        .await
        .unwrap();

    // ncn-s001 could not be reached and ncn-w001 rejected the command,
    // yet ncn-m002 was still shut down gracefully
    assert_eq!(
        harness.shell.executed(),
        vec![(Target::from("ncn-m002"), "shutdown -h now".to_string())]
    );
    assert!(harness.power.commands_for("ncn-m002").is_empty());
    assert_eq!(harness.power.commands_for("ncn-s001"), vec![PowerState::Off]);
    assert_eq!(harness.power.commands_for("ncn-w001"), vec![PowerState::Off]);
}

#[tokio::test(start_paused = true)]
async fn test_escalation_exhausted_is_fatal() {
    let harness = create_harness(shutdown_inventory());
    mark_all(&harness, PowerState::On);
    for host in ["ncn-m002", "ncn-s001", "ncn-w001"] {
        harness.shell.reachable_after(host, 1);
    }
    harness.shell.hang_on_shutdown("ncn-s001");
    harness.power.ignore_commands("ncn-s001");

    let result = harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(2))
        .await;

    match result {
        Err(PowerError::HostsFailedToPowerOff { hosts: failed }) => {
            assert_eq!(failed, hosts(&["ncn-s001"]));
        }
        other => panic!("expected power off failure, got {:?}", other),
    }

    // Scoped resources are released on the failure path too
    assert!(!harness.services.is_running("dhcpd"));
    assert!(!harness.console.is_open());
    assert_eq!(harness.console.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_dispatch_precedes_power_polling() {
    let harness = create_harness(shutdown_inventory());
    mark_all(&harness, PowerState::On);
    for host in ["ncn-m002", "ncn-s001", "ncn-w001"] {
        harness.shell.reachable_after(host, 1);
    }

    harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(5))
        .await
        .unwrap();

    let journal = &harness.journal;
    let console_start = journal_index(journal, "console start");
    let last_exec = journal_index(journal, "exec ncn-w001 shutdown -h now");
    let service_start = journal_index(journal, "start dhcpd");
    let service_stop = journal_index(journal, "stop dhcpd");
    let console_stop = journal_index(journal, "console stop");

    assert!(journal_index(journal, "hosts enable") < console_start);
    assert!(console_start < last_exec);
    assert!(last_exec < service_start);
    assert!(service_start < service_stop);
    assert!(service_stop < console_stop);
}

#[tokio::test(start_paused = true)]
async fn test_empty_inventory_shutdown_is_a_no_op() {
    let harness = create_harness(vec![inventory_entry("ncn-m001", &["managers", "bis"])]);

    harness
        .orchestrator
        .power_off(creds(), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(harness.services.calls().is_empty());
    assert!(harness.console.sessions().is_empty());
}

fn power_on_inventory() -> Vec<InventoryEntry> {
    vec![
        inventory_entry("ncn-w001", &["workers", "bis"]),
        inventory_entry("ncn-w002", &["workers"]),
        inventory_entry("ncn-s001", &["storage"]),
        inventory_entry("ncn-m001", &["managers"]),
        inventory_entry("ncn-m002", &["managers"]),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_power_on_groups_in_order() {
    let harness = create_harness(power_on_inventory());
    mark_all(&harness, PowerState::Off);
    for host in ["ncn-m001", "ncn-m002", "ncn-s001", "ncn-w002"] {
        harness.shell.reachable_after(host, 2);
    }

    harness
        .orchestrator
        .power_on(creds(), Duration::from_secs(10), Duration::from_secs(30))
        .await
        .unwrap();

    let journal = &harness.journal;
    // Storage is only powered on once the managers answer over SSH
    assert!(journal_index(journal, "connect ncn-m002") < journal_index(journal, "power on ncn-s001"));
    assert!(journal_index(journal, "connect ncn-s001") < journal_index(journal, "power on ncn-w002"));

    assert!(harness.power.commands_for("ncn-w001").is_empty());
    assert_eq!(harness.power.state("ncn-w002"), Some(PowerState::On));

    assert_eq!(
        harness.console.sessions(),
        vec![vec![
            Target::from("ncn-m001"),
            Target::from("ncn-m002"),
            Target::from("ncn-s001"),
            Target::from("ncn-w002")
        ]]
    );
    assert!(!harness.names.is_enabled());
    assert!(journal_index(journal, "stop dhcpd") < journal_index(journal, "hosts disable"));
}

#[tokio::test(start_paused = true)]
async fn test_power_on_sends_command_even_when_already_on() {
    let harness = create_harness(power_on_inventory());
    mark_all(&harness, PowerState::On);
    for host in ["ncn-m001", "ncn-m002", "ncn-s001", "ncn-w002"] {
        harness.shell.reachable_after(host, 1);
    }

    harness
        .orchestrator
        .power_on(creds(), Duration::from_secs(10), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(harness.power.commands_for("ncn-m001"), vec![PowerState::On]);
    assert_eq!(harness.power.commands_for("ncn-s001"), vec![PowerState::On]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_group_aborts_later_groups() {
    let harness = create_harness(power_on_inventory());
    mark_all(&harness, PowerState::Off);
    harness.shell.reachable_after("ncn-m001", 1);
    harness.shell.reachable_after("ncn-s001", 1);
    harness.shell.reachable_after("ncn-w002", 1);

    let result = harness
        .orchestrator
        .power_on(creds(), Duration::from_secs(10), Duration::from_secs(5))
        .await;

    match result {
        Err(PowerError::HostsUnreachable { hosts: unreachable }) => {
            assert_eq!(unreachable, hosts(&["ncn-m002"]));
        }
        other => panic!("expected unreachable hosts, got {:?}", other),
    }

    assert_eq!(harness.shell.connect_attempts("ncn-m001"), 1);
    assert_eq!(harness.shell.connect_attempts("ncn-m002"), 6);
    assert!(harness.power.commands_for("ncn-s001").is_empty());
    assert!(harness.power.commands_for("ncn-w002").is_empty());
    assert_eq!(harness.shell.connect_attempts("ncn-s001"), 0);

    // Entries stay enabled for troubleshooting; scoped resources are released
    assert!(harness.names.is_enabled());
    assert!(!harness.services.is_running("dhcpd"));
    assert!(!harness.console.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_power_state_timeout_is_not_fatal_when_reachable() {
    let harness = create_harness(vec![inventory_entry("ncn-m001", &["managers"])]);
    mark_all(&harness, PowerState::Off);
    harness.power.ignore_commands("ncn-m001");
    harness.shell.reachable_after("ncn-m001", 1);

    harness
        .orchestrator
        .power_on(creds(), Duration::from_secs(2), Duration::from_secs(5))
        .await
        .unwrap();
}

#[test]
fn test_resolve_groups_keeps_first_role() {
    let harness = create_harness(vec![
        inventory_entry("ncn-m001", &["managers", "storage"]),
        inventory_entry("ncn-s001", &["storage"]),
        inventory_entry("ncn-w001", &["workers", "bis"]),
    ]);

    let groups = harness.orchestrator.resolve_groups().unwrap();

    assert_eq!(
        groups,
        vec![
            HostGroup {
                role: "managers".to_string(),
                hosts: vec![Target::from("ncn-m001")],
            },
            HostGroup {
                role: "storage".to_string(),
                hosts: vec![Target::from("ncn-s001")],
            },
            HostGroup {
                role: "workers".to_string(),
                hosts: vec![],
            },
        ]
    );
}

#[test]
fn test_escalation_outcome() {
    assert!(EscalationOutcome::from_pending(Default::default()).is_converged());
    assert_eq!(
        EscalationOutcome::from_pending(hosts(&["h3"])),
        EscalationOutcome::Stragglers(hosts(&["h3"]))
    );
    assert_eq!(Stage::PowerOff.to_string(), "power-off-management-nodes");
}
