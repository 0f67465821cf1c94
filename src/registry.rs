//! Problem daemon registry
//!
//! Maps a daemon type name to the factory building monitors from a
//! configuration file. The registry is an ordinary value: it is filled during
//! startup and only read once monitors are being created.

use crate::error::ConfigError;
use crate::monitor::{
    new_log_monitors, new_self_monitors, new_stats_monitors, Monitor, LOG_MONITOR_NAME,
    SELF_MONITOR_NAME, SYSTEM_STATS_MONITOR_NAME,
};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Builds the monitors described by one configuration file
///
/// An empty list means the daemon is inapplicable on this host.
pub type MonitorFactory =
    Box<dyn Fn(&Path) -> Result<Vec<Box<dyn Monitor>>, ConfigError> + Send + Sync>;

/// Registration entry for one daemon type
pub struct ProblemDaemonHandler {
    pub factory: MonitorFactory,
    /// Help text for the command line flag listing this daemon's configs
    pub description: String,
}

impl ProblemDaemonHandler {
    pub fn new(
        description: impl Into<String>,
        factory: impl Fn(&Path) -> Result<Vec<Box<dyn Monitor>>, ConfigError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            description: description.into(),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<String, ProblemDaemonHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in daemon type
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            LOG_MONITOR_NAME,
            ProblemDaemonHandler::new("Log monitor configuration files", new_log_monitors),
        );
        registry.register(
            SYSTEM_STATS_MONITOR_NAME,
            ProblemDaemonHandler::new(
                "System stats monitor configuration files",
                new_stats_monitors,
            ),
        );
        registry.register(
            SELF_MONITOR_NAME,
            ProblemDaemonHandler::new("Self monitor configuration files", new_self_monitors),
        );
        registry
    }

    /// Register a daemon type; a later registration under the same name wins
    pub fn register(&mut self, name: &str, handler: ProblemDaemonHandler) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            debug!("Problem daemon {} re-registered, replacing previous handler", name);
        }
    }

    pub fn list_names(&self) -> BTreeSet<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn get_handler(&self, name: &str) -> Option<&ProblemDaemonHandler> {
        self.handlers.get(name)
    }

    /// Build every monitor for the given daemon name to config paths map
    ///
    /// An unknown name or a bad configuration is fatal.
    pub fn create_all(
        &self,
        config_paths: &BTreeMap<String, Vec<PathBuf>>,
    ) -> Result<Vec<Box<dyn Monitor>>, ConfigError> {
        let mut monitors = Vec::new();
        for (name, paths) in config_paths {
            let handler = self
                .get_handler(name)
                .ok_or_else(|| ConfigError::UnknownDaemon(name.clone()))?;

            for path in paths {
                let created = (handler.factory)(path.as_path())?;
                if created.is_empty() {
                    info!(
                        "Problem daemon {} is not applicable for {}, skipping",
                        name,
                        path.display()
                    );
                    continue;
                }
                info!(
                    "Created {} {} monitor(s) from {}",
                    created.len(),
                    name,
                    path.display()
                );
                monitors.extend(created);
            }
        }
        Ok(monitors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::types::Status;
    use std::sync::mpsc::Receiver;

    struct NamedMonitor(String);

    impl Monitor for NamedMonitor {
        fn name(&self) -> &str {
            &self.0
        }

        fn start(&self) -> Result<Receiver<Status>, MonitorError> {
            Err(MonitorError::AlreadyStarted(self.0.clone()))
        }

        fn stop(&self) {}
    }

    fn handler(tag: &'static str) -> ProblemDaemonHandler {
        ProblemDaemonHandler::new(tag, move |path: &Path| {
            let name = format!("{}:{}", tag, path.display());
            Ok(vec![Box::new(NamedMonitor(name)) as Box<dyn Monitor>])
        })
    }

    fn paths(entries: Vec<(&str, Vec<&str>)>) -> BTreeMap<String, Vec<PathBuf>> {
        entries
            .into_iter()
            .map(|(name, paths)| (name.to_string(), paths.into_iter().map(PathBuf::from).collect()))
            .collect()
    }

    #[test]
    fn test_defaults_registered() {
        let registry = Registry::with_defaults();
        let names: Vec<String> = registry.list_names().into_iter().collect();
        assert_eq!(
            names,
            vec!["log-monitor", "self-monitor", "system-stats-monitor"]
        );
        assert!(registry.get_handler("log-monitor").is_some());
        assert!(registry.get_handler("custom").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        registry.register("custom", handler("first"));
        registry.register("custom", handler("second"));

        assert_eq!(registry.get_handler("custom").unwrap().description, "second");
        let monitors = registry
            .create_all(&paths(vec![("custom", vec!["a.json"])]))
            .unwrap();
        assert_eq!(monitors[0].name(), "second:a.json");
    }

    #[test]
    fn test_create_all_skips_inapplicable() {
        let mut registry = Registry::new();
        registry.register("custom", handler("custom"));
        registry.register(
            "nowhere",
            ProblemDaemonHandler::new("never applicable", |_: &Path| Ok(Vec::new())),
        );

        let monitors = registry
            .create_all(&paths(vec![
                ("custom", vec!["a.json", "b.json"]),
                ("nowhere", vec!["c.json"]),
            ]))
            .unwrap();
        let names: Vec<&str> = monitors.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["custom:a.json", "custom:b.json"]);
    }

    #[test]
    fn test_unknown_daemon_is_error() {
        let registry = Registry::new();
        let result = registry.create_all(&paths(vec![("missing", vec!["x.json"])]));
        assert!(matches!(result, Err(ConfigError::UnknownDaemon(name)) if name == "missing"));
    }

    #[test]
    fn test_factory_error_propagates() {
        let registry = Registry::with_defaults();
        let result = registry.create_all(&paths(vec![("self-monitor", vec!["/nonexistent/self.json"])]));
        assert!(matches!(result, Err(ConfigError::ReadError(_, _))));
    }
}
