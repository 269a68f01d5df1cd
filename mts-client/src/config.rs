//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MTS_CONFIG or --config)
//! 3. Environment variables
//! 4. Secrets file (credentials only)

use crate::connection::ConnectionConfig;
use mts_protocol::{AppId, LoginPayload, NodeId, RpcIdScope, APP_KEY_LEN, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// MTS server endpoint and timeouts.
    pub server: ServerConfig,
    /// Login credentials.
    pub credentials: CredentialsConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// RPC-id allocation.
    pub rpc: RpcConfig,
    /// Node ids placed in outbound envelopes.
    pub nodes: NodesConfig,
}

impl ClientConfig {
    /// Loads configuration from the file named by `MTS_CONFIG` (if set), then
    /// applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MTS_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from `path` (defaults if `None`), then applies
    /// environment variable overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.server.apply_env_overrides();
        self.credentials.apply_env_overrides();
        self.tls.apply_env_overrides();
        self.reconnect.apply_env_overrides();
        self.rpc.apply_env_overrides();
    }

    /// Loads credentials from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        self.credentials.load_secrets()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::ValidationError("server.host is empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port is 0".to_string()));
        }
        if self.server.connect_timeout_ms == 0 || self.server.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "server timeouts must be non-zero".to_string(),
            ));
        }
        self.credentials.resolve()?;
        self.tls.validate()?;
        self.reconnect.validate()?;
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Transport settings for a single connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.server.host.clone(), self.server.port)
            .with_connect_timeout(self.server.connect_timeout())
            .with_request_timeout(self.server.request_timeout())
            .with_read_buffer_size(self.server.read_buffer_size)
            .with_tls(self.tls.clone())
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server.host = host.into();
        self.server.port = port;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        app_key: &[u8],
    ) -> Self {
        self.credentials.username = username.into();
        self.credentials.password = password.into();
        self.credentials.app_key = hex::encode(app_key);
        self
    }

    pub fn with_tls_enabled(mut self, enabled: bool) -> Self {
        self.tls.enabled = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.server.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_id_scope(mut self, scope: RpcIdScope) -> Self {
        self.rpc.id_scope = scope;
        self
    }
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Bound on every send-then-await-response exchange.
    pub request_timeout_ms: u64,
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            read_buffer_size: crate::connection::DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MTS_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var("MTS_PORT") {
            if let Ok(n) = port.parse() {
                self.port = n;
            }
        }
        if let Ok(ms) = std::env::var("MTS_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.connect_timeout_ms = n;
            }
        }
        if let Ok(ms) = std::env::var("MTS_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.request_timeout_ms = n;
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Login credentials as configured.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
    /// Integrator application id (100, 101, 201 or 202).
    pub app_id: i32,
    /// Pre-shared application key, hex encoded.
    pub app_key: String,
    /// Optional file with `key=value` lines for username, password and app_key.
    pub secrets_file: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            app_id: AppId::RmsServer.into(),
            app_key: String::new(),
            secrets_file: None,
        }
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .field("secrets_file", &self.secrets_file)
            .finish()
    }
}

impl CredentialsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("MTS_USERNAME") {
            self.username = username;
        }
        if let Ok(password) = std::env::var("MTS_PASSWORD") {
            self.password = password;
        }
        if let Ok(id) = std::env::var("MTS_APP_ID") {
            if let Ok(n) = id.parse() {
                self.app_id = n;
            }
        }
        if let Ok(key) = std::env::var("MTS_APP_KEY") {
            self.app_key = key;
        }
        if let Ok(path) = std::env::var("MTS_SECRETS_FILE") {
            self.secrets_file = Some(PathBuf::from(path));
        }
    }

    /// Loads credentials from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.secrets_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.clone(), e))?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    return Err(ConfigError::ParseError(
                        path.clone(),
                        format!("expected key=value, got '{}'", line),
                    ));
                };
                let value = value.trim().to_string();
                match key.trim() {
                    "username" => self.username = value,
                    "password" => self.password = value,
                    "app_key" => self.app_key = value,
                    other => {
                        return Err(ConfigError::ParseError(
                            path.clone(),
                            format!("unknown secret '{}'", other),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Validates the configured values and produces usable credentials.
    pub fn resolve(&self) -> Result<Credentials, ConfigError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(ConfigError::ValidationError(
                "credentials.username and credentials.password are required".to_string(),
            ));
        }
        let app_id = AppId::try_from(self.app_id)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        let app_key = hex::decode(self.app_key.trim()).map_err(|e| {
            ConfigError::ValidationError(format!("credentials.app_key is not hex: {}", e))
        })?;
        if app_key.len() != APP_KEY_LEN {
            return Err(ConfigError::ValidationError(format!(
                "credentials.app_key must be {} bytes, got {}",
                APP_KEY_LEN,
                app_key.len()
            )));
        }
        Ok(Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            app_id,
            app_key,
        })
    }
}

/// Validated login credentials.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    app_id: AppId,
    app_key: Vec<u8>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        app_id: AppId,
        app_key: Vec<u8>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            app_id,
            app_key,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    /// Phase-one login body.
    pub fn password_login(&self) -> LoginPayload {
        LoginPayload::password(
            self.username.clone(),
            self.password.clone(),
            self.app_id,
            self.app_key.clone(),
        )
    }

    /// Phase-two login body presenting `certificate`.
    pub fn certificate_login(&self, certificate: Vec<u8>) -> LoginPayload {
        LoginPayload::certificate(certificate, self.app_id, self.app_key.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Use TLS. Disable only for local emulators speaking plain TCP.
    pub enabled: bool,
    /// PEM CA bundle for verifying the server in the certificate phase.
    /// If None, webpki roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// PEM private key for the issued client certificate, used when the
    /// issued bundle carries no key.
    pub client_key_path: Option<PathBuf>,
    /// Server name for SNI (defaults to the configured host).
    pub server_name: Option<String>,
    /// Also trust the issued certificate chain as a server root.
    pub trust_issued_certificate: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_cert_path: None,
            client_key_path: None,
            server_name: None,
            trust_issued_certificate: false,
        }
    }
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("MTS_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("MTS_TLS_CA_CERT") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("MTS_TLS_CLIENT_KEY") {
            self.client_key_path = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var("MTS_TLS_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        for path in [&self.ca_cert_path, &self.client_key_path].into_iter().flatten() {
            if !path.exists() {
                return Err(ConfigError::ValidationError(format!(
                    "TLS file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Reconnect policy with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("MTS_RECONNECT_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(max) = std::env::var("MTS_RECONNECT_MAX_ATTEMPTS") {
            if let Ok(n) = max.parse() {
                self.max_attempts = n;
            }
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = Duration::from_millis(self.initial_delay_ms).as_secs_f64()
            * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Returns whether the given attempt (1-based) is permitted.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt <= self.max_attempts)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "reconnect.multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "reconnect.initial_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// RPC-id configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub id_scope: RpcIdScope,
}

impl RpcConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(scope) = std::env::var("MTS_RPC_ID_SCOPE") {
            match scope.to_lowercase().as_str() {
                "engine" => self.id_scope = RpcIdScope::Engine,
                "connection" => self.id_scope = RpcIdScope::Connection,
                _ => {}
            }
        }
    }
}

/// Node ids for outbound envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodesConfig {
    pub src_id: NodeId,
    pub dst_id: NodeId,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            src_id: mts_protocol::node::MTS_RMS_SERVER,
            dst_id: mts_protocol::node::MTS_SERVER,
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY_HEX: &str = "4f9d66000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c";

    fn valid() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.credentials.username = "rms".into();
        config.credentials.password = "secret".into();
        config.credentials.app_key = KEY_HEX.into();
        config
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
        assert!(config.tls.enabled);
        assert!(config.reconnect.enabled);
        assert_eq!(config.rpc.id_scope, RpcIdScope::Engine);
        assert_eq!(config.nodes.src_id, 2);
        assert_eq!(config.nodes.dst_id, 1);
        assert_eq!(config.credentials.app_id, 100);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = valid().with_id_scope(RpcIdScope::Connection);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.rpc.id_scope, RpcIdScope::Connection);
        assert_eq!(parsed.credentials.app_key, KEY_HEX);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "server:\n  host: mts.example.com\nrpc:\n  id_scope: connection\n";
        let parsed: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.server.host, "mts.example.com");
        assert_eq!(parsed.server.port, DEFAULT_PORT);
        assert_eq!(parsed.rpc.id_scope, RpcIdScope::Connection);
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mts.yaml");
        valid().with_server("10.0.0.5", 4000).save(&path).unwrap();

        let loaded = ClientConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.host, "10.0.0.5");
        assert_eq!(loaded.server.port, 4000);
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/mts.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
    }

    #[test]
    fn test_resolve_credentials() {
        let creds = valid().credentials.resolve().unwrap();
        assert_eq!(creds.username(), "rms");
        assert_eq!(creds.app_id(), AppId::RmsServer);

        let login = creds.password_login();
        login.validate().unwrap();
        assert_eq!(login.app_key.len(), APP_KEY_LEN);

        let cert_login = creds.certificate_login(b"CERT".to_vec());
        cert_login.validate().unwrap();
        assert!(cert_login.username.is_none());
    }

    #[test]
    fn test_resolve_rejects_bad_values() {
        let mut config = valid();
        config.credentials.app_key = "abcd".into();
        assert!(config.credentials.resolve().is_err());

        let mut config = valid();
        config.credentials.app_key = "zz".repeat(32);
        assert!(config.credentials.resolve().is_err());

        let mut config = valid();
        config.credentials.app_id = 7;
        assert!(config.credentials.resolve().is_err());

        let mut config = valid();
        config.credentials.password.clear();
        assert!(config.credentials.resolve().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let config = valid();
        let dbg = format!("{:?} {:?}", config.credentials, config.credentials.resolve().unwrap());
        assert!(!dbg.contains("secret"));
        assert!(!dbg.contains(KEY_HEX));
    }

    #[test]
    fn test_load_secrets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# integrator secrets").unwrap();
        writeln!(file, "username = rms").unwrap();
        writeln!(file, "password=hunter2").unwrap();
        writeln!(file, "app_key={}", KEY_HEX).unwrap();

        let mut config = ClientConfig::default();
        config.credentials.secrets_file = Some(file.path().to_path_buf());
        config.load_secrets().unwrap();

        assert_eq!(config.credentials.username, "rms");
        assert_eq!(config.credentials.password, "hunter2");
        config.credentials.resolve().unwrap();
    }

    #[test]
    fn test_load_secrets_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "token: abc").unwrap();

        let mut config = ClientConfig::default();
        config.credentials.secrets_file = Some(file.path().to_path_buf());
        assert!(matches!(
            config.load_secrets(),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_validate() {
        valid().validate().unwrap();

        let mut config = valid();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.tls.ca_cert_path = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(config.validate().is_err());

        let mut config = valid().with_tls_enabled(false);
        config.tls.ca_cert_path = Some(PathBuf::from("/nonexistent/ca.pem"));
        config.validate().unwrap();

        let mut config = valid();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff() {
        let policy = ReconnectConfig::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_limit() {
        let unlimited = ReconnectConfig::default();
        assert!(unlimited.allows(1_000_000));

        let limited = ReconnectConfig {
            max_attempts: 3,
            ..ReconnectConfig::default()
        };
        assert!(limited.allows(3));
        assert!(!limited.allows(4));

        assert!(!ReconnectConfig::disabled().allows(1));
    }

    #[test]
    fn test_connection_config() {
        let conn = valid()
            .with_server("mts.local", 1234)
            .with_request_timeout(Duration::from_secs(2))
            .connection_config();
        assert_eq!(conn.host, "mts.local");
        assert_eq!(conn.port, 1234);
        assert_eq!(conn.request_timeout, Duration::from_secs(2));
    }
}
