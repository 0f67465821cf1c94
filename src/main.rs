use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, CommandFactory, FromArgMatches, Parser};
use log::{error, info, warn};
use npd::config::{DetectorConfig, ExportersConfig, WebhookExporterConfig};
use npd::exporters::build_exporters;
use npd::node::{resolve_node_name, NODE_NAME_ENV};
use npd::server::DEFAULT_STATUS_PORT;
use npd::{ProblemDetector, Registry, StatusServer};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Command-line arguments for the node problem detector
#[derive(Parser, Debug)]
#[command(
    name = "node-problem-detector",
    version,
    about = "Node problem detector - turns kernel logs and system statistics into node conditions and events",
    long_about = "Runs a set of problem daemons (log, system stats and self monitors), merges their \
                  conditions into one deduplicated view of node health and forwards changes and \
                  events to the configured exporters."
)]
struct Cli {
    /// Path to the detector configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Detector configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Config files keyed by problem daemon name, from the `--config.<name>` flags
    #[arg(skip)]
    monitor_paths: BTreeMap<String, Vec<PathBuf>>,

    /// Use this node name instead of the configured or detected one
    #[arg(long, value_name = "NAME")]
    hostname_override: Option<String>,

    /// Report node status to the process log
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    enable_log_exporter: bool,

    /// POST node status to this URL
    #[arg(long, value_name = "URL")]
    webhook_url: Option<String>,

    /// Address the status endpoint binds to
    #[arg(long, default_value = "127.0.0.1", value_name = "IP")]
    address: IpAddr,

    /// Port of the status endpoint; 0 disables it
    #[arg(long, default_value_t = DEFAULT_STATUS_PORT, value_name = "PORT")]
    port: u16,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults, directories are a mistake.
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
        }

        if self.monitor_paths.is_empty() {
            return Err(
                "No problem daemon configured; pass at least one --config.<daemon> flag"
                    .to_string(),
            );
        }

        for path in self.monitor_paths.values().flatten() {
            if !path.is_file() {
                return Err(format!(
                    "Monitor configuration file not found: {}",
                    path.display()
                ));
            }
        }

        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("Webhook URL must be http(s): {}", url));
            }
        }

        Ok(())
    }

    /// Bind address of the status endpoint, if enabled
    fn status_address(&self) -> Option<SocketAddr> {
        (self.port != 0).then(|| SocketAddr::new(self.address, self.port))
    }

    /// Apply command line overrides to the configured exporters
    fn exporters_config(&self, mut config: ExportersConfig) -> ExportersConfig {
        if !self.enable_log_exporter {
            config.log.enabled = false;
        }
        if let Some(url) = &self.webhook_url {
            config.webhook = Some(match config.webhook.take() {
                Some(existing) => WebhookExporterConfig {
                    url: url.clone(),
                    ..existing
                },
                None => WebhookExporterConfig::new(url.clone()),
            });
        }
        config
    }
}

fn daemon_flag_id(name: &str) -> String {
    format!("config.{}", name)
}

/// Command line definition with one `--config.<name>` flag per registered daemon
fn command(registry: &Registry) -> clap::Command {
    registry
        .list_names()
        .into_iter()
        .fold(Cli::command(), |command, name| {
            let description = registry
                .get_handler(&name)
                .map(|handler| handler.description.clone())
                .unwrap_or_default();
            command.arg(
                Arg::new(daemon_flag_id(&name))
                    .long(daemon_flag_id(&name))
                    .value_name("PATHS")
                    .value_delimiter(',')
                    .action(ArgAction::Append)
                    .value_parser(value_parser!(PathBuf))
                    .help(format!(
                        "Comma separated configurations for the {} daemon. {}",
                        name, description
                    )),
            )
        })
}

fn parse_args<I, T>(registry: &Registry, args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command(registry).try_get_matches_from(args)?;
    let mut cli = Cli::from_arg_matches(&matches)?;
    for name in registry.list_names() {
        let paths: Vec<PathBuf> = matches
            .get_many::<PathBuf>(&daemon_flag_id(&name))
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        if !paths.is_empty() {
            cli.monitor_paths.insert(name, paths);
        }
    }
    Ok(cli)
}

fn run(cli: &Cli, registry: &Registry) -> anyhow::Result<()> {
    let config = DetectorConfig::load(cli.config.as_deref())
        .context("Failed to load detector configuration")?;

    let environment = std::env::var(NODE_NAME_ENV).ok();
    let node_name = resolve_node_name(
        cli.hostname_override.as_deref(),
        config.node_name.as_deref(),
        environment.as_deref(),
    )
    .context("Failed to determine the node name")?;

    let monitors = registry
        .create_all(&cli.monitor_paths)
        .context("Failed to create problem daemons")?;
    if monitors.is_empty() {
        bail!("No problem daemon is applicable on this node");
    }

    let exporters = build_exporters(&cli.exporters_config(config.exporters), &node_name)
        .context("Failed to set up exporters")?;
    if exporters.is_empty() {
        bail!("No exporter is enabled");
    }

    let mut detector = ProblemDetector::new(monitors, exporters);

    let _status_server = match cli.status_address() {
        Some(address) => Some(
            StatusServer::start(address, detector.status_handle())
                .context("Failed to start the status endpoint")?,
        ),
        None => None,
    };

    let shutdown = detector.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        shutdown.trigger();
    })
    .context("Failed to set SIGINT handler")?;

    info!("Node problem detector is running on {}. Press Ctrl+C to stop.", node_name);
    detector.run().context("Problem detector stopped")?;

    info!("Node problem detector shutdown complete");
    Ok(())
}

fn main() {
    let registry = Registry::with_defaults();
    let cli = parse_args(&registry, std::env::args_os()).unwrap_or_else(|e| e.exit());

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting node problem detector {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if cli.config.as_ref().is_some_and(|p| p.extension().is_some_and(|e| e != "toml")) {
        warn!("Configuration file does not have .toml extension");
    }

    if let Err(e) = run(&cli, &registry) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
