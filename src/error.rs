use crate::waiter::Target;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Unable to find {program}: {source}")]
    ToolNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} command failed with code {code:?}: stderr: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} command did not finish within {seconds}s")]
    CommandTimeout { program: String, seconds: u64 },

    #[error("SSH error on host \"{host}\": {message}")]
    Ssh { host: String, message: String },

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Operation aborted by user")]
    Aborted,

    #[error("The following nodes failed to reach powered off state: {}", join_hosts(.hosts))]
    HostsFailedToPowerOff { hosts: BTreeSet<Target> },

    #[error("Unable to reach the following nodes via SSH after powering them on: {}", join_hosts(.hosts))]
    HostsUnreachable { hosts: BTreeSet<Target> },

    #[error("Service {service} error: {message}")]
    Service { service: String, message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl PowerError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn ssh<H: Into<String>, M: Into<String>>(host: H, message: M) -> Self {
        Self::Ssh {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Hosts named by a fatal convergence failure, if this is one.
    pub fn straggling_hosts(&self) -> Option<&BTreeSet<Target>> {
        match self {
            Self::HostsFailedToPowerOff { hosts } | Self::HostsUnreachable { hosts } => Some(hosts),
            _ => None,
        }
    }
}

pub(crate) fn join_hosts(hosts: &BTreeSet<Target>) -> String {
    hosts
        .iter()
        .map(|h| h.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, PowerError>;
