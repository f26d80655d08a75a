use std::io;
use std::path::PathBuf;

use crate::config::ConfigError;

/// Broad class of a startup failure, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Filesystem,
    Configuration,
    SecurityPolicy,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Configuration => "configuration",
            ErrorKind::SecurityPolicy => "security_policy",
            ErrorKind::Transport => "transport",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Security policy violation: {0}")]
    SecurityPolicy(String),

    #[error("Failed to generate server credential: {0}")]
    CredentialGeneration(String),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Server error: {0}")]
    Server(String),
}

impl BootstrapError {
    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        BootstrapError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::Filesystem { .. } | BootstrapError::CredentialGeneration(_) => {
                ErrorKind::Filesystem
            }
            BootstrapError::Configuration(_) => ErrorKind::Configuration,
            BootstrapError::SecurityPolicy(_) | BootstrapError::TlsConfig(_) => {
                ErrorKind::SecurityPolicy
            }
            BootstrapError::Bind { .. } | BootstrapError::Server(_) => ErrorKind::Transport,
        }
    }

    /// Every startup failure terminates the process with the same status.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl From<ConfigError> for BootstrapError {
    fn from(err: ConfigError) -> Self {
        BootstrapError::Configuration(err.to_string())
    }
}
