//! Layered configuration for reviewhub.
//!
//! Settings are resolved file → environment → CLI. A missing file means
//! defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! dev_mode = false
//!
//! [database]
//! path = ".reviewhub/reviewhub.db"
//! busy_timeout_ms = 5000
//! call_timeout_ms = 10000
//!
//! [auth]
//! admin_token = "ADMIN"
//! user_token = "USER"
//!
//! [logging]
//! filter = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "reviewhub.toml";

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables permissive CORS for local front-end work
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// SQLite store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long SQLite waits for the write lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Upper bound on a single store call, lock wait included
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl DatabaseSection {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".reviewhub/reviewhub.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

/// Role tokens accepted in the `token` request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_admin_token")]
    pub admin_token: String,
    #[serde(default = "default_user_token")]
    pub user_token: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            admin_token: default_admin_token(),
            user_token: default_user_token(),
        }
    }
}

fn default_admin_token() -> String {
    "ADMIN".to_string()
}

fn default_user_token() -> String {
    "USER".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Root of `reviewhub.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewhubToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Values given on the command line. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
}

impl ReviewhubToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse reviewhub.toml")
    }

    /// Load from `path`, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `REVIEWHUB_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `REVIEWHUB_*` variables from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REVIEWHUB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("REVIEWHUB_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid REVIEWHUB_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("REVIEWHUB_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(token) = lookup("REVIEWHUB_ADMIN_TOKEN") {
            self.auth.admin_token = token;
        }
        if let Some(token) = lookup("REVIEWHUB_USER_TOKEN") {
            self.auth.user_token = token;
        }
        if let Some(json) = lookup("REVIEWHUB_LOG_JSON") {
            self.logging.json = matches!(
                json.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    /// Apply command-line overrides (the top layer).
    pub fn apply_cli(&mut self, cli: CliOverrides) {
        if let Some(host) = cli.host {
            self.server.host = host;
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = cli.db_path {
            self.database.path = path;
        }
        if cli.dev_mode {
            self.server.dev_mode = true;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick an ephemeral port".to_string());
        }
        if self.database.busy_timeout_ms == 0 {
            warnings.push(
                "database.busy_timeout_ms is 0: concurrent writers fail immediately".to_string(),
            );
        }
        if self.database.call_timeout_ms == 0 {
            warnings.push("database.call_timeout_ms is 0: every store call times out".to_string());
        }
        if self
            .auth
            .admin_token
            .trim()
            .eq_ignore_ascii_case(self.auth.user_token.trim())
        {
            warnings.push(
                "auth.admin_token equals auth.user_token: every caller is an admin".to_string(),
            );
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ReviewhubToml::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.dev_mode);
        assert_eq!(config.database.path, PathBuf::from(".reviewhub/reviewhub.db"));
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.database.call_timeout(), Duration::from_millis(10_000));
        assert_eq!(config.auth.admin_token, "ADMIN");
        assert_eq!(config.auth.user_token, "USER");
        assert_eq!(config.logging.filter, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_empty() {
        let config = ReviewhubToml::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = r#"
[server]
port = 9090

[database]
path = "/var/lib/reviewhub/db.sqlite"
call_timeout_ms = 2500

[logging]
json = true
"#;
        let config = ReviewhubToml::parse(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from("/var/lib/reviewhub/db.sqlite"));
        assert_eq!(config.database.call_timeout_ms, 2500);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(ReviewhubToml::parse("[server\nport = ").is_err());
        assert!(ReviewhubToml::parse("[server]\nport = \"high\"").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = ReviewhubToml::load_or_default(&dir.path().join("reviewhub.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reviewhub.toml");
        std::fs::write(&path, "[auth]\nadmin_token = \"root\"\n").unwrap();
        let config = ReviewhubToml::load_or_default(&path).unwrap();
        assert_eq!(config.auth.admin_token, "root");
        assert_eq!(config.auth.user_token, "USER");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ReviewhubToml::parse("[server]\nport = 9090\n").unwrap();
        config
            .apply_env_from(env(&[
                ("REVIEWHUB_PORT", "7070"),
                ("REVIEWHUB_HOST", "0.0.0.0"),
                ("REVIEWHUB_DB_PATH", "/tmp/x.db"),
                ("REVIEWHUB_ADMIN_TOKEN", "a"),
                ("REVIEWHUB_USER_TOKEN", "u"),
                ("REVIEWHUB_LOG_JSON", "true"),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.auth.admin_token, "a");
        assert_eq!(config.auth.user_token, "u");
        assert!(config.logging.json);
    }

    #[test]
    fn test_env_bad_port_is_error() {
        let mut config = ReviewhubToml::default();
        let err = config
            .apply_env_from(env(&[("REVIEWHUB_PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("REVIEWHUB_PORT"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = ReviewhubToml::default();
        config
            .apply_env_from(env(&[("REVIEWHUB_PORT", "7070")]))
            .unwrap();
        config.apply_cli(CliOverrides {
            port: Some(6060),
            dev_mode: true,
            ..Default::default()
        });
        assert_eq!(config.server.port, 6060);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.dev_mode);
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = ReviewhubToml::default();
        config.server.port = 0;
        config.database.busy_timeout_ms = 0;
        config.database.call_timeout_ms = 0;
        config.auth.user_token = " admin ".to_string();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("admin_token")));
    }
}
