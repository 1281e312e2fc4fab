use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chains: ChainsConfig,
    #[serde(default)]
    pub x: XConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 3001, worker_threads: Some(4) }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    #[serde(default = "default_flush_debounce")]
    pub flush_debounce_ms: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            flush_debounce_ms: default_flush_debounce(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            pretty: default_pretty(),
        }
    }
}

fn default_storage_dir() -> String { "storage".into() }
fn default_flush_debounce() -> u64 { 1000 }
fn default_shutdown_timeout() -> u64 { 10 }
fn default_pretty() -> bool { true }

/// Signature oracles, one per chain; a signature is accepted if any accepts it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChainsConfig {
    #[serde(default)]
    pub verifier_endpoints: Vec<String>,
    #[serde(default = "default_verifier_timeout")]
    pub request_timeout_secs: u64,
}

fn default_verifier_timeout() -> u64 { 10 }

#[derive(Debug, Clone, Deserialize)]
pub struct XConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_x_callback")]
    pub callback_uri: String,
    #[serde(default = "default_x_success")]
    pub success_uri: String,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            callback_uri: default_x_callback(),
            success_uri: default_x_success(),
        }
    }
}

fn default_x_callback() -> String { "https://openrd.plopmenz.com/giveaway/callbackX".into() }
fn default_x_success() -> String { "https://openrd.openmesh.network/leaderboard".into() }

impl XConfig {
    /// Client credentials, when both are configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Some((id.clone(), secret.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    /// Required in `X-API-Key` for task management routes; those routes are
    /// disabled when unset.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `compact` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: default_log_format() }
    }
}

fn default_log_format() -> String { "compact".into() }

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Config file if present, else defaults; then env overrides and validation.
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = match load_default() {
            Ok(cfg) => cfg,
            Err(e) if is_not_found(&e) => AppConfig::default(),
            Err(e) => return Err(e),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Environment variables win over the file.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(host) = var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT").or_else(|| var("SERVER_PORT")).and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(threads) = var("TOKIO_WORKER_THREADS").and_then(|v| v.parse::<usize>().ok()) {
            self.server.worker_threads = Some(threads);
        }
        if let Some(dir) = var("STORAGE_DIR") {
            self.storage.dir = dir;
        }
        if let Some(endpoints) = var("VERIFIER_ENDPOINTS") {
            self.chains.verifier_endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(id) = var("X_CLIENT_ID") {
            self.x.client_id = Some(id);
        }
        if let Some(secret) = var("X_CLIENT_SECRET") {
            self.x.client_secret = Some(secret);
        }
        if let Some(key) = var("ADMIN_API_KEY") {
            self.admin.api_key = Some(key);
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.storage.validate()?;
        self.chains.validate()?;
        if self.admin.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.admin.api_key = None;
        }
        Ok(())
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "0.0.0.0".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be in 1..=65535"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        Ok(())
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            return Err(anyhow!("storage.dir must not be empty"));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(anyhow!("storage.shutdown_timeout_secs must be >= 1"));
        }
        Ok(())
    }

    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ChainsConfig {
    pub fn validate(&self) -> Result<()> {
        for url in &self.verifier_endpoints {
            let lower = url.to_lowercase();
            if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                return Err(anyhow!("chains.verifier_endpoints entry must be http(s): {url}"));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() -> Result<()> {
        let mut cfg = parse("")?;
        cfg.normalize_and_validate()?;
        assert_eq!(cfg.server.port, 3001);
        assert_eq!(cfg.storage.dir, "storage");
        assert_eq!(cfg.storage.flush_debounce(), Duration::from_millis(1000));
        assert!(cfg.x.credentials().is_none());
        Ok(())
    }

    #[test]
    fn file_values_then_env_overrides() -> Result<()> {
        let mut cfg = parse(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [storage]
            dir = "data"
            flush_debounce_ms = 250

            [chains]
            verifier_endpoints = ["https://eth.example/verify"]
            "#,
        )?;
        assert_eq!(cfg.storage.flush_debounce_ms, 250);
        assert_eq!(cfg.storage.shutdown_timeout_secs, 10);

        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("VERIFIER_ENDPOINTS", "https://a/verify, https://b/verify,"),
            ("X_CLIENT_ID", "id"),
            ("X_CLIENT_SECRET", "secret"),
            ("ADMIN_API_KEY", "  "),
        ]);
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        cfg.normalize_and_validate()?;
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.chains.verifier_endpoints, vec!["https://a/verify", "https://b/verify"]);
        assert_eq!(cfg.x.credentials(), Some(("id".into(), "secret".into())));
        assert_eq!(cfg.admin.api_key, None);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() -> Result<()> {
        let mut cfg = parse("[chains]\nverifier_endpoints = [\"ftp://nope\"]")?;
        assert!(cfg.normalize_and_validate().is_err());

        let mut cfg = parse("[server]\nhost = \"\"\nport = 0")?;
        assert!(cfg.normalize_and_validate().is_err());
        Ok(())
    }

    #[test]
    fn missing_file_is_detected() {
        let err = load_from_file("/nonexistent-config-for-tests.toml").unwrap_err();
        assert!(is_not_found(&err));
    }
}
