use super::{ConfigError, Configuration, FilterConfig, SharedConfiguration};
use log::{error, info, warn};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_secs(2);

/// Called with every successfully rebuilt configuration.
pub type ConfigChangeCallback = Box<dyn Fn(Arc<Configuration>) + Send + Sync>;

/// Watches the configuration file and rebuilds the filter configuration on
/// change. A file that fails to load or compile leaves the previous
/// configuration in place.
pub struct ConfigWatcher {
    config_path: String,
    watcher: Option<RecommendedWatcher>,
    enabled: bool,
}

impl ConfigWatcher {
    pub fn new(config_path: &str) -> Self {
        Self {
            config_path: config_path.to_string(),
            watcher: None,
            enabled: false,
        }
    }

    /// Starts watching; every rebuilt configuration is passed to `callback`.
    pub fn start_watching(&mut self, callback: ConfigChangeCallback) -> Result<(), String> {
        let config_path = self.config_path.clone();
        let (notify_tx, notify_rx) = mpsc::channel::<Result<Event, notify::Error>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default().with_poll_interval(DEBOUNCE),
        )
        .map_err(|e| format!("Failed to create file watcher: {}", e))?;

        watcher
            .watch(Path::new(&self.config_path), RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch config file: {}", e))?;
        self.watcher = Some(watcher);

        thread::spawn(move || {
            let mut last_reload: Option<Instant> = None;

            loop {
                match notify_rx.recv_timeout(Duration::from_secs(5)) {
                    Ok(Ok(event)) => {
                        if !(event.kind.is_modify() || event.kind.is_create()) {
                            continue;
                        }
                        if last_reload.map_or(false, |at| at.elapsed() < DEBOUNCE) {
                            continue;
                        }

                        info!("Configuration file changed, reloading...");
                        // let the writer finish
                        thread::sleep(Duration::from_millis(100));

                        match reload_config(&config_path) {
                            Ok(config) => {
                                callback(Arc::new(config));
                                last_reload = Some(Instant::now());
                            }
                            Err(e) => {
                                error!("Failed to reload configuration: {}", e);
                                warn!("Keeping previous configuration");
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        error!("File watch error: {}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        info!("Config watcher channel disconnected");
                        break;
                    }
                }
            }
        });

        self.enabled = true;
        info!("Started watching configuration file: {}", self.config_path);
        Ok(())
    }

    /// Starts watching and swaps every rebuilt configuration into `shared`.
    pub fn watch_into(&mut self, shared: SharedConfiguration) -> Result<(), String> {
        self.start_watching(Box::new(move |config| {
            info!(
                "Applying reloaded configuration (default directive '{}')",
                config.default_directive()
            );
            shared.replace(config);
        }))
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Loads, validates and compiles the configuration file at `path`.
pub fn reload_config(path: &str) -> Result<Configuration, ConfigError> {
    info!("Reloading configuration from: {}", path);
    let config = Configuration::build(&FilterConfig::from_file(path)?)?;
    info!("Configuration reloaded successfully");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogFormat;
    use std::io::Write;

    #[test]
    fn test_config_watcher_creation() {
        let watcher = ConfigWatcher::new("config/waf_filter.yaml");
        assert_eq!(watcher.config_path(), "config/waf_filter.yaml");
        assert!(!watcher.is_enabled());
    }

    #[test]
    fn test_reload_config_success() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "log_format: json\ndefault_directive: main\ndirectives:\n  main:\n    rule_engine: Off\n"
        )
        .unwrap();
        let config = reload_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.default_directive(), "main");
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn test_reload_config_not_found() {
        assert!(matches!(
            reload_config("nonexistent.yaml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_reload_config_invalid_cidr() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "default_directive: main\ndirectives:\n  main:\n    ip_filter:\n      blacklist: [\"not-an-ip\"]\n"
        )
        .unwrap();
        assert!(matches!(
            reload_config(file.path().to_str().unwrap()),
            Err(ConfigError::InvalidIpFilter { .. })
        ));
    }

    #[test]
    fn test_start_watching_missing_file() {
        let mut watcher = ConfigWatcher::new("/nonexistent/dir/waf_filter.yaml");
        assert!(watcher.start_watching(Box::new(|_| {})).is_err());
        assert!(!watcher.is_enabled());
    }
}
