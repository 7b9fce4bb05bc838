use anyhow::{anyhow, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use mgmt_power::credentials::{prompt_continue, resolve_credentials};
use mgmt_power::{Collaborators, PowerConfig, PowerOrchestrator, Stage};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "mgmt-power")]
#[command(about = "Power off and power on the management nodes of a cluster")]
#[command(version)]
#[command(long_about = "Drives the power lifecycle of a cluster's management nodes. \
power-off sends a graceful shutdown over SSH, watches IPMI power state, and forces \
power off for nodes that do not go down in time. power-on powers nodes on one role \
group at a time and waits for each group to accept SSH connections before moving on.")]
struct Args {
    #[command(subcommand)]
    command: Option<StageCommand>,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "mgmt-power.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Rehearse the stage against simulated hosts
    #[arg(long, global = true, help = "Run the stage against simulated hosts instead of real ones")]
    dry_run: bool,

    /// Do not ask for confirmation before disruptive stages
    #[arg(short = 'y', long, global = true)]
    yes: bool,
}

#[derive(Subcommand, Debug)]
enum StageCommand {
    /// Shut down and power off the management nodes
    #[command(name = "power-off", alias = "power-off-management-nodes")]
    PowerOff {
        #[command(flatten)]
        ipmi: IpmiArgs,
    },

    /// Power on the management nodes and wait for SSH
    #[command(name = "power-on", alias = "power-on-management-nodes")]
    PowerOn {
        #[command(flatten)]
        ipmi: IpmiArgs,

        /// Seconds to wait for each group to accept SSH connections
        #[arg(long, value_name = "SECONDS")]
        ssh_timeout: Option<u64>,
    },
}

#[derive(ClapArgs, Debug)]
struct IpmiArgs {
    /// Seconds to wait for nodes to reach the requested IPMI power state
    #[arg(long, value_name = "SECONDS")]
    ipmi_timeout: Option<u64>,

    #[arg(long, env = "MGMT_POWER_IPMI_USERNAME", hide_env_values = true)]
    ipmi_username: Option<String>,

    #[arg(long, env = "MGMT_POWER_IPMI_PASSWORD", hide_env_values = true)]
    ipmi_password: Option<String>,
}

impl StageCommand {
    fn stage(&self) -> Stage {
        match self {
            StageCommand::PowerOff { .. } => Stage::PowerOff,
            StageCommand::PowerOn { .. } => Stage::PowerOn,
        }
    }

    fn ipmi(&self) -> &IpmiArgs {
        match self {
            StageCommand::PowerOff { ipmi } | StageCommand::PowerOn { ipmi, .. } => ipmi,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting mgmt-power v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match PowerConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        drop(log_guard);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let Some(command) = args.command.as_ref() else {
        eprintln!("No stage given. Run with --help to see the available stages.");
        drop(log_guard);
        std::process::exit(2);
    };

    let exit_code = match run_stage(&args, command, config).await {
        Ok(()) => {
            println!("Succeeded with {}.", command.stage().action());
            0
        }
        Err(e) => {
            error!("{} failed: {}", command.stage(), e);
            eprintln!("ERROR: {}", e);
            1
        }
    };

    drop(log_guard);
    std::process::exit(exit_code);
}

async fn run_stage(args: &Args, command: &StageCommand, config: PowerConfig) -> mgmt_power::Result<()> {
    let stage = command.stage();
    if stage == Stage::PowerOff && !args.yes {
        prompt_continue(stage.action())?;
    }

    let ipmi = command.ipmi();
    let credentials = resolve_credentials(
        ipmi.ipmi_username.clone(),
        ipmi.ipmi_password.clone(),
        "IPMI username",
        "IPMI password",
    )?;

    let ipmi_timeout = Duration::from_secs(ipmi.ipmi_timeout.unwrap_or(config.ipmi.timeout_secs));

    let collaborators = if args.dry_run {
        info!("Dry run mode - using simulated hosts");
        Collaborators::dry_run(&config)
    } else {
        Collaborators::system(&config)
    };
    let orchestrator = PowerOrchestrator::with_collaborators(config, collaborators);
    info!(run_id = %orchestrator.run_id(), "Running stage {}", stage);

    match command {
        StageCommand::PowerOff { .. } => orchestrator.power_off(credentials, ipmi_timeout).await,
        StageCommand::PowerOn { ssh_timeout, .. } => {
            let ssh_timeout = Duration::from_secs(
                ssh_timeout.unwrap_or(orchestrator.config().ssh.timeout_secs),
            );
            orchestrator
                .power_on(credentials, ipmi_timeout, ssh_timeout)
                .await
        }
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
    };

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mgmt_power={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![fmt_layer];
    let mut guard = None;

    if let Some(log_file) = &args.log_file {
        let path = Path::new(log_file);
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("Invalid log file path: {}", log_file))?;
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let (writer, worker_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
        layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# mgmt-power configuration file");
    println!("# This is the default configuration with all available options");
    println!("#");
    println!("# Hosts are listed in the inventory with their roles, e.g.:");
    println!("#");
    println!("# [[hosts.inventory]]");
    println!("# name = \"ncn-m001\"");
    println!("# roles = [\"managers\", \"bis\"]");
    println!();
    print!("{}", toml::to_string_pretty(&PowerConfig::default())?);
    Ok(())
}
