//! Host discovery by role and management-interface name resolution.

use crate::config::{HostsConfig, InventoryEntry};
use crate::error::Result;
use crate::waiter::Target;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, info};

pub trait HostInventory: Send + Sync {
    /// Hosts holding any of `roles` and none of `exclude`, sorted by name.
    fn get_hosts(&self, roles: &[String], exclude: &[String]) -> Result<Vec<Target>>;
}

/// Role inventory taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    entries: Vec<InventoryEntry>,
}

impl StaticInventory {
    pub fn new(entries: Vec<InventoryEntry>) -> Self {
        Self { entries }
    }
}

impl HostInventory for StaticInventory {
    fn get_hosts(&self, roles: &[String], exclude: &[String]) -> Result<Vec<Target>> {
        let hosts: BTreeSet<Target> = self
            .entries
            .iter()
            .filter(|entry| entry.roles.iter().any(|r| roles.contains(r)))
            .filter(|entry| !entry.roles.iter().any(|r| exclude.contains(r)))
            .map(|entry| Target::new(entry.name.clone()))
            .collect();

        debug!(
            ?roles,
            ?exclude,
            count = hosts.len(),
            "Resolved hosts from inventory"
        );
        Ok(hosts.into_iter().collect())
    }
}

/// Bracketing name-resolution entries needed while nodes are down.
pub trait NameResolution: Send + Sync {
    fn enable_entries(&self) -> Result<()>;
    fn disable_entries(&self) -> Result<()>;
}

/// Comments and uncomments management-interface lines in a hosts file.
#[derive(Debug, Clone)]
pub struct HostsFileToggle {
    path: PathBuf,
    suffix: String,
}

impl HostsFileToggle {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, suffix: S) -> Self {
        Self {
            path: path.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &HostsConfig) -> Self {
        Self::new(&config.hosts_file, config.mgmt_suffix.clone())
    }

    /// True for an `address name...` entry naming a management interface.
    fn is_mgmt_entry(&self, entry: &str) -> bool {
        let mut fields = entry.split_whitespace();
        let Some(address) = fields.next() else {
            return false;
        };
        address.parse::<IpAddr>().is_ok() && fields.any(|name| name.ends_with(&self.suffix))
    }

    fn rewrite<F>(&self, transform: F) -> Result<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contents = fs::read_to_string(&self.path)?;
        let mut changed = 0;
        let mut lines: Vec<String> = Vec::new();

        for line in contents.lines() {
            match transform(line) {
                Some(new_line) => {
                    changed += 1;
                    lines.push(new_line);
                }
                None => lines.push(line.to_string()),
            }
        }

        if changed > 0 {
            let mut output = lines.join("\n");
            if contents.ends_with('\n') {
                output.push('\n');
            }
            self.replace_contents(&output)?;
        }

        Ok(changed)
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".mgmt-power.tmp");
        PathBuf::from(name)
    }

    /// Swap in new contents with a rename so the file is never left
    /// truncated. Permissions of the original file are kept.
    fn replace_contents(&self, output: &str) -> Result<()> {
        let permissions = fs::metadata(&self.path)?.permissions();
        let tmp_path = self.staging_path();

        let staged = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(output.as_bytes())?;
            file.set_permissions(permissions)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                debug!(path = %tmp_path.display(), "Unable to remove staging file: {}", cleanup);
            }
            return Err(e.into());
        }

        Ok(())
    }
}

impl NameResolution for HostsFileToggle {
    fn enable_entries(&self) -> Result<()> {
        let changed = self.rewrite(|line| {
            let uncommented = line.trim_start().strip_prefix('#')?.trim_start();
            self.is_mgmt_entry(uncommented)
                .then(|| uncommented.to_string())
        })?;

        info!(
            path = %self.path.display(),
            changed,
            "Enabled management entries in hosts file"
        );
        Ok(())
    }

    fn disable_entries(&self) -> Result<()> {
        let changed = self.rewrite(|line| {
            let trimmed = line.trim_start();
            (!trimmed.starts_with('#') && self.is_mgmt_entry(trimmed))
                .then(|| format!("# {}", line))
        })?;

        info!(
            path = %self.path.display(),
            changed,
            "Disabled management entries in hosts file"
        );
        Ok(())
    }
}
