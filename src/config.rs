use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PowerConfig {
    pub ipmi: IpmiConfig,
    pub ssh: SshConfig,
    pub service: ServiceConfig,
    pub console: ConsoleConfig,
    pub hosts: HostsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IpmiConfig {
    /// Out-of-band power management executable
    #[serde(default = "default_ipmi_program")]
    pub program: String,

    /// ipmitool interface (`-I`)
    #[serde(default = "default_ipmi_interface")]
    pub interface: String,

    /// Suffix appended to a hostname to address its BMC
    #[serde(default = "default_host_suffix")]
    pub host_suffix: String,

    /// Seconds between power state polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Default wait for power state convergence, in seconds
    #[serde(default = "default_ipmi_timeout")]
    pub timeout_secs: u64,

    /// Upper bound on a single ipmitool invocation, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SshConfig {
    /// Remote shell executable
    #[serde(default = "default_ssh_program")]
    pub program: String,

    /// Login user, defaults to the invoking user
    pub user: Option<String>,

    /// Connection timeout for a single attempt, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds between reachability polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Default wait for reachability, in seconds
    #[serde(default = "default_ssh_timeout")]
    pub timeout_secs: u64,

    /// Command dispatched to start a graceful shutdown
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: String,

    /// Known hosts file; the system defaults are used when unset
    pub known_hosts_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Network-boot support service kept running while nodes power cycle
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Seconds to wait after the service starts
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_systemctl")]
    pub systemctl: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_start")]
    pub start_command: String,

    #[serde(default = "default_console_stop")]
    pub stop_command: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HostsConfig {
    /// Hosts file holding the management interface entries
    #[serde(default = "default_hosts_file")]
    pub hosts_file: String,

    /// Suffix identifying management interface names in the hosts file
    #[serde(default = "default_host_suffix")]
    pub mgmt_suffix: String,

    /// Role never touched by either stage (the node running this tool)
    #[serde(default = "default_bootstrap_role")]
    pub bootstrap_role: String,

    /// Role groups powered on one after another
    #[serde(default = "default_power_on_order")]
    pub power_on_order: Vec<String>,

    /// Roles shut down together
    #[serde(default = "default_power_on_order")]
    pub shutdown_roles: Vec<String>,

    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InventoryEntry {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl IpmiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl SshConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl PowerConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("ipmi.program", default_ipmi_program())?
            .set_default("ipmi.interface", default_ipmi_interface())?
            .set_default("ipmi.host_suffix", default_host_suffix())?
            .set_default("ipmi.poll_interval_secs", default_poll_interval())?
            .set_default("ipmi.timeout_secs", default_ipmi_timeout())?
            .set_default("ipmi.command_timeout_secs", default_command_timeout())?
            .set_default("ssh.program", default_ssh_program())?
            .set_default("ssh.connect_timeout_secs", default_connect_timeout())?
            .set_default("ssh.poll_interval_secs", default_poll_interval())?
            .set_default("ssh.timeout_secs", default_ssh_timeout())?
            .set_default("ssh.shutdown_command", default_shutdown_command())?
            .set_default("service.name", default_service_name())?
            .set_default("service.settle_delay_secs", default_settle_delay())?
            .set_default("service.systemctl", default_systemctl())?
            .set_default("console.start_command", default_console_start())?
            .set_default("console.stop_command", default_console_stop())?
            .set_default("hosts.hosts_file", default_hosts_file())?
            .set_default("hosts.mgmt_suffix", default_host_suffix())?
            .set_default("hosts.bootstrap_role", default_bootstrap_role())?
            .set_default("hosts.power_on_order", default_power_on_order())?
            .set_default("hosts.shutdown_roles", default_power_on_order())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with MGMT_POWER_ prefix
            .add_source(
                Environment::with_prefix("MGMT_POWER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: PowerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ipmi.program.trim().is_empty() {
            return Err(ConfigError::Message(
                "ipmi.program must not be empty".to_string(),
            ));
        }

        if self.ssh.program.trim().is_empty() {
            return Err(ConfigError::Message(
                "ssh.program must not be empty".to_string(),
            ));
        }

        if self.ipmi.poll_interval_secs == 0 || self.ssh.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Poll intervals must be greater than 0".to_string(),
            ));
        }

        if self.ipmi.command_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ipmi.command_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.ssh.connect_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.hosts.power_on_order.is_empty() {
            return Err(ConfigError::Message(
                "hosts.power_on_order must name at least one role".to_string(),
            ));
        }

        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "service.name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            ipmi: IpmiConfig {
                program: default_ipmi_program(),
                interface: default_ipmi_interface(),
                host_suffix: default_host_suffix(),
                poll_interval_secs: default_poll_interval(),
                timeout_secs: default_ipmi_timeout(),
                command_timeout_secs: default_command_timeout(),
            },
            ssh: SshConfig {
                program: default_ssh_program(),
                user: None,
                connect_timeout_secs: default_connect_timeout(),
                poll_interval_secs: default_poll_interval(),
                timeout_secs: default_ssh_timeout(),
                shutdown_command: default_shutdown_command(),
                known_hosts_file: None,
            },
            service: ServiceConfig {
                name: default_service_name(),
                settle_delay_secs: default_settle_delay(),
                systemctl: default_systemctl(),
            },
            console: ConsoleConfig {
                start_command: default_console_start(),
                stop_command: default_console_stop(),
            },
            hosts: HostsConfig {
                hosts_file: default_hosts_file(),
                mgmt_suffix: default_host_suffix(),
                bootstrap_role: default_bootstrap_role(),
                power_on_order: default_power_on_order(),
                shutdown_roles: default_power_on_order(),
                inventory: Vec::new(),
            },
        }
    }
}

// Default value functions
fn default_ipmi_program() -> String {
    "ipmitool".to_string()
}
fn default_ipmi_interface() -> String {
    "lanplus".to_string()
}
fn default_host_suffix() -> String {
    "-mgmt".to_string()
}
fn default_poll_interval() -> u64 {
    1
}
fn default_ipmi_timeout() -> u64 {
    60
}
fn default_command_timeout() -> u64 {
    30
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_ssh_timeout() -> u64 {
    600
}
fn default_shutdown_command() -> String {
    "shutdown -h now".to_string()
}

fn default_service_name() -> String {
    "dhcpd".to_string()
}
fn default_settle_delay() -> u64 {
    5
}
fn default_systemctl() -> String {
    "systemctl".to_string()
}

fn default_console_start() -> String {
    "ipmi_console_start.sh".to_string()
}
fn default_console_stop() -> String {
    "ipmi_console_stop.sh".to_string()
}

fn default_hosts_file() -> String {
    "/etc/hosts".to_string()
}
fn default_bootstrap_role() -> String {
    "bis".to_string()
}
fn default_power_on_order() -> Vec<String> {
    vec![
        "managers".to_string(),
        "storage".to_string(),
        "workers".to_string(),
    ]
}
