//! Configuration loading and constants.
//!
//! Loads the node configuration from a TOML file, then applies the
//! environment-variable overrides understood by existing node deployments.
//! `AppConfig` is built once in `main` and passed by reference from then on;
//! nothing below the entry point reads the environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nodegate/nodegate.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "nodegate=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Default bind host for the control transport
pub const DEFAULT_SERVICE_HOST: &str = "0.0.0.0";

/// Default bind port for the control transport
pub const DEFAULT_SERVICE_PORT: u16 = 62050;

/// Default control protocol
pub const DEFAULT_SERVICE_PROTOCOL: &str = "rpc";

/// Default location of the generated server certificate
pub const DEFAULT_CERT_FILE: &str = "/var/lib/nodegate/ssl_cert.pem";

/// Default location of the generated server private key
pub const DEFAULT_KEY_FILE: &str = "/var/lib/nodegate/ssl_key.pem";

/// Common name written into generated certificates
pub const DEFAULT_COMMON_NAME: &str = "nodegate";

/// Validity of generated certificates, in days
pub const DEFAULT_VALIDITY_DAYS: u32 = 3650;

// =============================================================================
// Environment Overrides
// =============================================================================

pub const ENV_SERVICE_HOST: &str = "SERVICE_HOST";
pub const ENV_SERVICE_PORT: &str = "SERVICE_PORT";
pub const ENV_SERVICE_PROTOCOL: &str = "SERVICE_PROTOCOL";
pub const ENV_CERT_FILE: &str = "SSL_CERT_FILE";
pub const ENV_KEY_FILE: &str = "SSL_KEY_FILE";
pub const ENV_CLIENT_CA_FILE: &str = "SSL_CLIENT_CERT_FILE";
pub const ENV_DISABLE_INTERNAL_TLS: &str = "DISABLE_INTERNAL_TLS";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Control transport settings
    #[serde(default)]
    pub service: ServiceConfig,
    /// Server credentials and client trust anchor
    #[serde(default)]
    pub tls: TlsSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_host")]
    pub host: String,
    #[serde(default = "ServiceConfig::default_port")]
    pub port: u16,
    /// Raw protocol selector; validated when the transport is chosen
    #[serde(default = "ServiceConfig::default_protocol")]
    pub protocol: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            protocol: Self::default_protocol(),
        }
    }
}

impl ServiceConfig {
    fn default_host() -> String {
        DEFAULT_SERVICE_HOST.to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_SERVICE_PORT
    }

    fn default_protocol() -> String {
        DEFAULT_SERVICE_PROTOCOL.to_string()
    }
}

/// TLS configuration for the control transport
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    /// Server certificate (PEM), generated on first run if missing
    #[serde(default = "TlsSettings::default_cert_file")]
    pub cert_file: PathBuf,
    /// Server private key (PEM), generated on first run if missing
    #[serde(default = "TlsSettings::default_key_file")]
    pub key_file: PathBuf,
    /// CA bundle used to verify the control plane's client certificate.
    /// Empty means no trust anchor is configured.
    #[serde(default)]
    pub client_ca_file: String,
    /// Skip TLS entirely; for deployments where an ingress terminates TLS
    #[serde(default)]
    pub disable_internal: bool,
    #[serde(default = "TlsSettings::default_common_name")]
    pub common_name: String,
    #[serde(default = "TlsSettings::default_subject_alt_names")]
    pub subject_alt_names: Vec<String>,
    #[serde(default = "TlsSettings::default_validity_days")]
    pub validity_days: u32,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_file: Self::default_cert_file(),
            key_file: Self::default_key_file(),
            client_ca_file: String::new(),
            disable_internal: false,
            common_name: Self::default_common_name(),
            subject_alt_names: Self::default_subject_alt_names(),
            validity_days: Self::default_validity_days(),
        }
    }
}

impl TlsSettings {
    fn default_cert_file() -> PathBuf {
        PathBuf::from(DEFAULT_CERT_FILE)
    }

    fn default_key_file() -> PathBuf {
        PathBuf::from(DEFAULT_KEY_FILE)
    }

    fn default_common_name() -> String {
        DEFAULT_COMMON_NAME.to_string()
    }

    fn default_subject_alt_names() -> Vec<String> {
        vec!["localhost".to_string()]
    }

    fn default_validity_days() -> u32 {
        DEFAULT_VALIDITY_DAYS
    }

    /// The configured client CA path, or `None` when no anchor is set.
    pub fn client_ca_path(&self) -> Option<&Path> {
        let trimmed = self.client_ca_file.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Path::new(trimmed))
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path`, falling back to built-in defaults when the file is
    /// absent and `required` is false.
    pub fn load_or_default<P: AsRef<Path>>(path: P, required: bool) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` as the variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_SERVICE_HOST) {
            self.service.host = host;
        }
        if let Some(port) = lookup(ENV_SERVICE_PORT) {
            self.service.port = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("{ENV_SERVICE_PORT} is not a valid port: {port:?}"))
            })?;
        }
        if let Some(protocol) = lookup(ENV_SERVICE_PROTOCOL) {
            self.service.protocol = protocol;
        }
        if let Some(cert) = lookup(ENV_CERT_FILE) {
            self.tls.cert_file = PathBuf::from(cert);
        }
        if let Some(key) = lookup(ENV_KEY_FILE) {
            self.tls.key_file = PathBuf::from(key);
        }
        if let Some(ca) = lookup(ENV_CLIENT_CA_FILE) {
            self.tls.client_ca_file = ca;
        }
        if let Some(flag) = lookup(ENV_DISABLE_INTERNAL_TLS) {
            // Only the literal "1" disables TLS
            self.tls.disable_internal = flag == "1";
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tls.cert_file.as_os_str().is_empty() || self.tls.key_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "tls.cert_file and tls.key_file must not be empty".to_string(),
            ));
        }
        if self.tls.cert_file == self.tls.key_file {
            return Err(ConfigError::Validation(
                "tls.cert_file and tls.key_file must be different paths".to_string(),
            ));
        }
        if self.tls.validity_days == 0 {
            return Err(ConfigError::Validation(
                "tls.validity_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.service.host, DEFAULT_SERVICE_HOST);
        assert_eq!(config.service.port, DEFAULT_SERVICE_PORT);
        assert_eq!(config.service.protocol, "rpc");
        assert!(!config.tls.disable_internal);
        assert!(config.tls.client_ca_path().is_none());
        assert!(!config.logging.is_json());
    }

    #[test]
    fn parses_full_file() {
        let config = AppConfig::parse(
            r#"
            [service]
            host = "127.0.0.1"
            port = 8443
            protocol = "http"

            [tls]
            cert_file = "/tmp/cert.pem"
            key_file = "/tmp/key.pem"
            client_ca_file = "/tmp/ca.pem"
            validity_days = 30

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.service.port, 8443);
        assert_eq!(config.service.protocol, "http");
        assert_eq!(config.tls.client_ca_path(), Some(Path::new("/tmp/ca.pem")));
        assert_eq!(config.tls.validity_days, 30);
        assert!(config.logging.is_json());
    }

    #[test]
    fn shipped_sample_config_parses() {
        let config = AppConfig::parse(include_str!("../dist/nodegate.toml")).unwrap();
        assert_eq!(config.service.port, DEFAULT_SERVICE_PORT);
        assert_eq!(config.tls.cert_file, PathBuf::from(DEFAULT_CERT_FILE));
    }

    #[test]
    fn whitespace_ca_path_counts_as_empty() {
        let mut config = AppConfig::default();
        config.tls.client_ca_file = "   ".to_string();
        assert!(config.tls.client_ca_path().is_none());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                (ENV_SERVICE_PORT, "7000"),
                (ENV_SERVICE_PROTOCOL, "rest"),
                (ENV_CLIENT_CA_FILE, "/etc/ca.pem"),
                (ENV_DISABLE_INTERNAL_TLS, "1"),
            ]))
            .unwrap();
        assert_eq!(config.service.port, 7000);
        assert_eq!(config.service.protocol, "rest");
        assert_eq!(config.tls.client_ca_file, "/etc/ca.pem");
        assert!(config.tls.disable_internal);
    }

    #[test]
    fn disable_flag_requires_literal_one() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[(ENV_DISABLE_INTERNAL_TLS, "true")]))
            .unwrap();
        assert!(!config.tls.disable_internal);
    }

    #[test]
    fn disable_flag_with_padding_is_not_literal_one() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[(ENV_DISABLE_INTERNAL_TLS, " 1")]))
            .unwrap();
        assert!(!config.tls.disable_internal);
    }

    #[test]
    fn invalid_port_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(env(&[(ENV_SERVICE_PORT, "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn identical_credential_paths_are_rejected() {
        let err = AppConfig::parse(
            r#"
            [tls]
            cert_file = "/tmp/same.pem"
            key_file = "/tmp/same.pem"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn missing_optional_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = AppConfig::load_or_default(&path, false).unwrap();
        assert_eq!(config.service.port, DEFAULT_SERVICE_PORT);
        assert!(matches!(
            AppConfig::load_or_default(&path, true),
            Err(ConfigError::Io(_))
        ));
    }
}
