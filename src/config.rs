//! Target configuration handed to the collector.
//!
//! Everything here is validated before a scrape ever runs: the collector
//! only consumes a ready [`TargetConfig`]. TLS certificate files are read
//! and parsed once at startup, so a bad file fails the process instead of
//! every scrape.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use native_tls::{Certificate, Identity, TlsConnector};
use thiserror::Error;

use crate::collector::{StatsCommand, TlsParams};
use crate::util::{KeyError, pkcs8_pem};

/// Default memcached address.
pub const DEFAULT_ADDRESS: &str = "localhost:11211";

/// Default per-scrape deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Commands issued when `stats conns` is not requested.
pub const DEFAULT_COMMANDS: [StatsCommand; 4] = [
    StatsCommand::General,
    StatsCommand::Settings,
    StatsCommand::Items,
    StatsCommand::Slabs,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("address {0:?} must be host:port")]
    InvalidAddress(String),

    #[error("telemetry path {0:?} must start with '/'")]
    InvalidTelemetryPath(String),

    #[error("TLS certificate and key files must be given together")]
    IncompleteIdentity,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no PEM certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("invalid PEM in {path}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid private key in {path}: {source}")]
    Key {
        path: PathBuf,
        #[source]
        source: KeyError,
    },

    #[error("invalid TLS material: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("invalid PID in {path}: {content:?}")]
    InvalidPid { path: PathBuf, content: String },
}

/// What one scrape needs to reach its target.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub address: String,
    /// Overall deadline for one scrape: connect, handshake and all commands.
    pub timeout: Duration,
    pub tls: Option<TlsParams>,
    /// Commands issued per scrape, in order.
    pub commands: Vec<StatsCommand>,
}

impl TargetConfig {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let address = address.into();
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if split_host(&address).is_none() {
            return Err(ConfigError::InvalidAddress(address));
        }
        Ok(Self {
            address,
            timeout,
            tls: None,
            commands: DEFAULT_COMMANDS.to_vec(),
        })
    }

    pub fn with_tls(mut self, tls: TlsParams) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Adds `stats conns` to the scrape when `enabled`.
    pub fn with_conns(mut self, enabled: bool) -> Self {
        let has = self.commands.contains(&StatsCommand::Conns);
        if enabled && !has {
            self.commands.push(StatsCommand::Conns);
        } else if !enabled && has {
            self.commands.retain(|c| *c != StatsCommand::Conns);
        }
        self
    }

    pub fn with_commands(mut self, commands: Vec<StatsCommand>) -> Self {
        self.commands = commands;
        self
    }
}

/// TLS files as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct TlsFiles {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    /// Name to verify the server certificate against. Defaults to the host
    /// part of the target address.
    pub server_name: Option<String>,
    pub skip_verify: bool,
}

impl TlsFiles {
    /// Reads and parses the files into a ready connector.
    pub fn load(&self, address: &str) -> Result<TlsParams, ConfigError> {
        let mut builder = TlsConnector::builder();

        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => {
                let key_pem = pkcs8_pem(&read(key)?).map_err(|source| ConfigError::Key {
                    path: key.clone(),
                    source,
                })?;
                let identity = Identity::from_pkcs8(&read(cert)?, key_pem.as_bytes())?;
                builder.identity(identity);
            }
            (None, None) => {}
            _ => return Err(ConfigError::IncompleteIdentity),
        }

        if let Some(ca) = &self.ca_file {
            let pem = read(ca)?;
            let certs = rustls_pemfile::certs(&mut pem.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| ConfigError::Pem {
                    path: ca.clone(),
                    source,
                })?;
            if certs.is_empty() {
                return Err(ConfigError::NoCertificate(ca.clone()));
            }
            for cert in certs {
                builder.add_root_certificate(Certificate::from_der(&cert)?);
            }
        }

        builder
            .danger_accept_invalid_certs(self.skip_verify)
            .danger_accept_invalid_hostnames(self.skip_verify);

        let server_name = match &self.server_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => default_server_name(address),
        };

        Ok(TlsParams {
            connector: builder.build()?,
            server_name,
        })
    }
}

/// Host part of `host:port`, without IPv6 brackets.
pub fn default_server_name(address: &str) -> String {
    split_host(address).unwrap_or(address).to_string()
}

/// Checks that a telemetry path can be routed.
pub fn validate_telemetry_path(path: &str) -> Result<(), ConfigError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::InvalidTelemetryPath(path.to_string()))
    }
}

/// Reads a PID from a PID file.
pub fn read_pid_file(path: &Path) -> Result<i32, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| ConfigError::InvalidPid {
            path: path.to_path_buf(),
            content: content.trim().to_string(),
        })
}

fn split_host(address: &str) -> Option<&str> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host),
    )
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_target_defaults() {
        let cfg = TargetConfig::new("localhost:11211", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(cfg.commands, DEFAULT_COMMANDS.to_vec());
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn test_target_rejects_bad_values() {
        assert!(matches!(
            TargetConfig::new("localhost:11211", Duration::ZERO),
            Err(ConfigError::ZeroTimeout)
        ));
        assert!(matches!(
            TargetConfig::new("localhost", DEFAULT_TIMEOUT),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(
            TargetConfig::new(":11211", DEFAULT_TIMEOUT),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_with_conns_toggles() {
        let cfg = TargetConfig::new("127.0.0.1:11211", DEFAULT_TIMEOUT)
            .unwrap()
            .with_conns(true)
            .with_conns(true);
        assert_eq!(cfg.commands.last(), Some(&StatsCommand::Conns));
        assert_eq!(cfg.commands.len(), 5);

        let cfg = cfg.with_conns(false);
        assert!(!cfg.commands.contains(&StatsCommand::Conns));
    }

    #[test]
    fn test_default_server_name() {
        assert_eq!(default_server_name("cache.internal:11211"), "cache.internal");
        assert_eq!(default_server_name("[::1]:11211"), "::1");
        assert_eq!(default_server_name("10.0.0.1:11211"), "10.0.0.1");
    }

    #[test]
    fn test_validate_telemetry_path() {
        assert!(validate_telemetry_path("/metrics").is_ok());
        assert!(validate_telemetry_path("metrics").is_err());
    }

    #[test]
    fn test_tls_requires_cert_and_key_together() {
        let files = TlsFiles {
            cert_file: Some(PathBuf::from("/nonexistent/cert.pem")),
            ..TlsFiles::default()
        };
        assert!(matches!(
            files.load("localhost:11211"),
            Err(ConfigError::IncompleteIdentity)
        ));
    }

    #[test]
    fn test_tls_missing_ca_file() {
        let files = TlsFiles {
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsFiles::default()
        };
        assert!(matches!(
            files.load("localhost:11211"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_tls_ca_without_certificates() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        writeln!(ca, "not a certificate").unwrap();
        let files = TlsFiles {
            ca_file: Some(ca.path().to_path_buf()),
            ..TlsFiles::default()
        };
        assert!(matches!(
            files.load("localhost:11211"),
            Err(ConfigError::NoCertificate(_))
        ));
    }

    #[test]
    fn test_tls_server_name() {
        let files = TlsFiles {
            skip_verify: true,
            ..TlsFiles::default()
        };
        let params = files.load("cache.internal:11211").unwrap();
        assert_eq!(params.server_name, "cache.internal");

        let files = TlsFiles {
            server_name: Some("memcached.example".to_string()),
            ..TlsFiles::default()
        };
        assert_eq!(
            files.load("10.0.0.1:11211").unwrap().server_name,
            "memcached.example"
        );
    }

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/tls")
            .join(name)
    }

    #[test]
    fn test_tls_ca_bundle() {
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle
            .write_all(&fs::read(fixture("ca.crt")).unwrap())
            .unwrap();
        bundle
            .write_all(&fs::read(fixture("server.crt")).unwrap())
            .unwrap();
        let files = TlsFiles {
            ca_file: Some(bundle.path().to_path_buf()),
            ..TlsFiles::default()
        };
        assert!(files.load("localhost:11211").is_ok());
    }

    #[test]
    fn test_tls_ca_with_broken_base64() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        write!(ca, "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n").unwrap();
        let files = TlsFiles {
            ca_file: Some(ca.path().to_path_buf()),
            ..TlsFiles::default()
        };
        assert!(matches!(
            files.load("localhost:11211"),
            Err(ConfigError::Pem { .. })
        ));
    }

    #[test]
    fn test_tls_identity_key_formats() {
        for (cert, key) in [
            ("server.crt", "server.key"),
            ("server.crt", "server-pkcs1.key"),
            ("client-ec.crt", "client-ec.key"),
        ] {
            let files = TlsFiles {
                cert_file: Some(fixture(cert)),
                key_file: Some(fixture(key)),
                ca_file: Some(fixture("ca.crt")),
                ..TlsFiles::default()
            };
            assert!(files.load("localhost:11211").is_ok(), "{key}");
        }
    }

    #[test]
    fn test_tls_key_file_without_key() {
        let files = TlsFiles {
            cert_file: Some(fixture("server.crt")),
            key_file: Some(fixture("server.crt")),
            ..TlsFiles::default()
        };
        assert!(matches!(
            files.load("localhost:11211"),
            Err(ConfigError::Key {
                source: KeyError::NoKey,
                ..
            })
        ));
    }

    #[test]
    fn test_read_pid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "4242").unwrap();
        assert_eq!(read_pid_file(file.path()).unwrap(), 4242);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "not-a-pid").unwrap();
        assert!(matches!(
            read_pid_file(bad.path()),
            Err(ConfigError::InvalidPid { .. })
        ));

        assert!(matches!(
            read_pid_file(Path::new("/nonexistent/memcached.pid")),
            Err(ConfigError::Read { .. })
        ));
    }
}
