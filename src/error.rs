use thiserror::Error;

/// Errors that can occur while collecting observations in a single cycle
///
/// These are transient: the monitor logs them and moves on to the next cycle.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("Subprocess terminated unexpectedly: {0}")]
    SubprocessTerminated(String),

    #[error("Command timed out after {0:?}: {1}")]
    Timeout(std::time::Duration, String),

    #[error("Failed to parse output: {0}")]
    ParseError(String),

    #[error("Input source closed: {0}")]
    SourceClosed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors returned by `Monitor::start`
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to open input source for {source_name}: {error}")]
    SourceUnavailable {
        source_name: String,
        #[source]
        error: CollectorError,
    },

    #[error("Monitor {0} was already started")]
    AlreadyStarted(String),

    #[error("Failed to spawn monitor thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Errors that can occur when exporting node status
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to deliver to {0}: {1}")]
    DeliveryFailed(String, String),

    #[error("Failed to set up exporter {0}: {1}")]
    SetupFailed(String, String),

    #[error("Exporter {0} is shut down")]
    Closed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Fatal conditions surfaced by `ProblemDetector::run`
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("No problem daemon is successfully set up")]
    NoMonitors,

    #[error("No exporter is successfully set up")]
    NoExporters,

    #[error("All {0} monitor(s) exited, nothing left to aggregate")]
    AllMonitorsExited(usize),

    #[error("Failed to spawn detector thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(String, std::io::Error),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Unknown problem daemon type: {0}")]
    UnknownDaemon(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind status server to {0}: {1}")]
    Bind(std::net::SocketAddr, std::io::Error),

    #[error("Failed to start status server: {0}")]
    Setup(#[from] std::io::Error),
}
