use clap::Parser;
use lib_common::core::{DispatcherOptions, HostTakeover};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "server_realtime.conf";

/// Origins of the local web clients used during development.
pub const DEFAULT_ALLOWED_ORIGINS: &str =
    "http://localhost:5173,http://localhost:8080,http://localhost:3000";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Realtime chat coordination server (presence, rooms, signaling, live sessions)", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "REALTIME_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "REALTIME_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REALTIME_GRACE_PERIOD_SECS", help = "Seconds a live session survives its host disconnecting.")]
    pub grace_period_secs: Option<u64>,

    #[clap(long, env = "REALTIME_HOST_TAKEOVER", help = "Who may restart an existing live session: open or token.")]
    pub host_takeover: Option<HostTakeover>,

    #[clap(long, env = "REALTIME_ALLOWED_ORIGINS", help = "Comma separated list of CORS origins.")]
    pub allowed_origins: Option<String>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved configuration, every default applied.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listening port.
    pub port: u16,
    /// Where `setup_logging` writes its files.
    pub log_dir: PathBuf,
    /// One of trace, debug, info, warn, error.
    pub log_level: String,
    /// How long a live session outlives a disconnected host.
    pub grace_period: Duration,
    /// Restart policy for session ids already in use.
    pub host_takeover: HostTakeover,
    /// CORS origins. `*` allows any.
    pub allowed_origins: Vec<String>,
    /// `(cert, key)` when both are configured and present on disk.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Settings {
    /// The subset of settings the dispatcher cares about.
    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            grace_period: self.grace_period,
            host_takeover: self.host_takeover,
        }
    }
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            grace_period_secs: other.grace_period_secs.or(self.grace_period_secs),
            host_takeover: other.host_takeover.or(self.host_takeover),
            allowed_origins: other.allowed_origins.or(self.allowed_origins),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(5000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            grace_period_secs: Some(30),
            host_takeover: Some(HostTakeover::Open),
            allowed_origins: Some(DEFAULT_ALLOWED_ORIGINS.to_string()),
            ..Default::default()
        }
    }

    fn into_settings(self) -> Settings {
        let allowed_origins = self
            .allowed_origins
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let tls = match (self.tls_cert_path, self.tls_key_path) {
            (Some(cert), Some(key)) if cert.exists() && key.exists() => Some((cert, key)),
            (Some(cert), Some(key)) => {
                log::info!(
                    "TLS material not found ({} / {}). Serving plain HTTP.",
                    cert.display(),
                    key.display()
                );
                None
            }
            _ => None,
        };

        Settings {
            port: self.port.unwrap_or(5000),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            grace_period: Duration::from_secs(self.grace_period_secs.unwrap_or(30)),
            host_takeover: self.host_takeover.unwrap_or_default(),
            allowed_origins,
            tls,
        }
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults < config file < `cli` (which already carries env vars).
pub fn resolve(cli: Config) -> Settings {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file (server_realtime.conf) if present.
    //    The CLI may point somewhere else.
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    // 3. Override with environment variables and CLI arguments
    current_config = current_config.merge(cli);

    // 4. Fall back to the usual Let's Encrypt location for TLS material.
    //    It is only used if both files actually exist.
    if current_config.tls_cert_path.is_none() || current_config.tls_key_path.is_none() {
        if let Some(home_dir) = dirs::home_dir() {
            let letsencrypt_dir = home_dir.join(".letsencrypt");
            current_config.tls_cert_path.get_or_insert(letsencrypt_dir.join("fullchain.pem"));
            current_config.tls_key_path.get_or_insert(letsencrypt_dir.join("privkey.pem"));
        } else {
            log::warn!("Could not determine home directory for default TLS paths.");
        }
    }

    current_config.into_settings()
}

pub fn load_config() -> Settings {
    resolve(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn missing_file() -> Config {
        Config {
            config_path: Some(PathBuf::from("/nonexistent/server_realtime.conf")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = resolve(missing_file());
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.grace_period, Duration::from_secs(30));
        assert_eq!(settings.host_takeover, HostTakeover::Open);
        assert_eq!(settings.allowed_origins.len(), 3);
        assert!(settings.tls.is_none());
    }

    #[test]
    fn test_file_then_cli_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "port": 6000, "gracePeriodSecs": 5, "hostTakeover": "token", "logLevel": "debug" }}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(7000),
            ..Default::default()
        };
        let settings = resolve(cli);
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.grace_period, Duration::from_secs(5));
        assert_eq!(settings.host_takeover, HostTakeover::Token);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_unparsable_file_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let cli = Config { config_path: Some(file.path().to_path_buf()), ..Default::default() };
        assert_eq!(resolve(cli).port, 5000);
    }

    #[test]
    fn test_origins_are_split_and_trimmed() {
        let cli = Config {
            allowed_origins: Some(" https://a.example , ,https://b.example".into()),
            ..missing_file()
        };
        assert_eq!(resolve(cli).allowed_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_tls_requires_existing_files() {
        let cli = Config {
            tls_cert_path: Some(PathBuf::from("/nonexistent/fullchain.pem")),
            tls_key_path: Some(PathBuf::from("/nonexistent/privkey.pem")),
            ..missing_file()
        };
        assert!(resolve(cli).tls.is_none());

        let cert = tempfile::NamedTempFile::new().unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        let cli = Config {
            tls_cert_path: Some(cert.path().to_path_buf()),
            tls_key_path: Some(key.path().to_path_buf()),
            ..missing_file()
        };
        assert!(resolve(cli).tls.is_some());
    }
}
