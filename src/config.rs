//! The daemon's configuration: a single TOML file read at startup.
//!
//! Plain `serde`-derived structs, UTF-8-only paths via `camino`, and
//! `deny_unknown_fields` so a typo in the config file is a startup error
//! rather than a silently-ignored field.

use std::net::SocketAddr;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::FatalError;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The Flag Store's root directory.
    pub flag_store_dir: Utf8PathBuf,

    /// Listen address for the command-envelope HTTP endpoint.
    pub listen_addr: SocketAddr,

    /// Path to the access-control-list file, reloadable at runtime.
    pub acl_path: Utf8PathBuf,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Whether `assert_signed` overrides its computed TTL target with
    /// `now`, defeating the cache countdown (the "deadlock" workaround).
    /// A configuration choice, never hard-coded behavior.
    #[serde(default)]
    pub assert_signed_deadlock_override: bool,
}

impl Config {
    pub fn from_file(path: &camino::Utf8Path) -> Result<Config, FatalError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| FatalError::Config(format!("reading {path}: {err}")))?;
        toml::from_str(&text).map_err(|err| FatalError::Config(format!("parsing {path}: {err}")))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Address of the configured local signer ("OpenDNSSEC") used for
    /// `Party::OpenDnssec` probes.
    pub opendnssec_addr: SocketAddr,

    #[serde(
        default = "default_query_timeout",
        with = "humantime_secs",
        rename = "query_timeout_secs"
    )]
    pub query_timeout: Duration,

    #[serde(
        default = "default_initial_backoff",
        with = "humantime_millis",
        rename = "initial_backoff_millis"
    )]
    pub initial_backoff: Duration,

    #[serde(default = "default_dns_port")]
    pub dns_port: u16,
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            opendnssec_addr: "127.0.0.1:53".parse().unwrap(),
            query_timeout: default_query_timeout(),
            initial_backoff: default_initial_backoff(),
            dns_port: default_dns_port(),
        }
    }
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_dns_port() -> u16 {
    53
}

mod humantime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod humantime_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Which backend adapter (C3) the daemon should construct, and its
/// backend-specific settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Spawn a fixed external executable with a structured argument vector.
    Shell {
        executable: Utf8PathBuf,
    },
    /// Publish to, and consume cluster updates from, an AMQP broker.
    Amqp {
        broker_uri: String,
        key_ops_exchange: String,
        key_ops_routing_key: String,
        cluster_exchange: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Shell {
            executable: Utf8PathBuf::from("ods-ksmutil"),
        }
    }
}

/// Where log output goes; mirrors the handful of targets the
/// existing logger already knows how to open.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTargetKind {
    #[default]
    Stderr,
    Stdout,
    File,
    Syslog,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    File(Utf8PathBuf),
    Syslog,
    Stdout,
    Stderr,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

/// The part of [`Config`] that's safe to change on a running daemon: the
/// log level and extra per-target trace directives.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: ReloadableValue<LogLevel>,

    #[serde(default)]
    pub target: ReloadableValue<LogTargetKind>,

    /// Only consulted when `target = "file"`.
    #[serde(default)]
    pub file: Option<Utf8PathBuf>,

    #[serde(default)]
    pub trace_targets: ReloadableValue<Vec<String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: ReloadableValue::new(LogLevel::default()),
            target: ReloadableValue::new(LogTargetKind::default()),
            file: None,
            trace_targets: ReloadableValue::new(Vec::new()),
        }
    }
}

impl LoggingConfig {
    pub fn target_value(&self) -> LogTarget {
        match self.target.value() {
            LogTargetKind::Stderr => LogTarget::Stderr,
            LogTargetKind::Stdout => LogTarget::Stdout,
            LogTargetKind::Syslog => LogTarget::Syslog,
            LogTargetKind::File => {
                LogTarget::File(self.file.clone().unwrap_or_else(|| Utf8PathBuf::from("zonewardd.log")))
            }
        }
    }
}

/// A config value that can be swapped out wholesale on a config reload
/// without touching the rest of [`Config`]. Thin wrapper kept only so
/// `log.rs`'s `.value()` call sites read the same regardless of which
/// field they're pulling from.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ReloadableValue<T>(T);

impl<T> ReloadableValue<T> {
    pub fn new(value: T) -> Self {
        ReloadableValue(value)
    }

    pub fn value(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_shell_config() {
        let toml = r#"
            flag_store_dir = "/var/lib/zonewardd/flags"
            listen_addr = "127.0.0.1:8080"
            acl_path = "/etc/zonewardd/acl.toml"

            [dns]
            opendnssec_addr = "127.0.0.1:5353"

            [backend]
            kind = "shell"
            executable = "ods-ksmutil"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.flag_store_dir, Utf8PathBuf::from("/var/lib/zonewardd/flags"));
        assert!(matches!(config.backend, BackendConfig::Shell { .. }));
        assert!(!config.assert_signed_deadlock_override);
    }

    #[test]
    fn parses_amqp_backend() {
        let toml = r#"
            flag_store_dir = "/flags"
            listen_addr = "0.0.0.0:9000"
            acl_path = "/acl.toml"

            [dns]
            opendnssec_addr = "127.0.0.1:53"

            [backend]
            kind = "amqp"
            broker_uri = "amqp://localhost//"
            key_ops_exchange = "keyops"
            key_ops_routing_key = "key_ops"
            cluster_exchange = "cluster"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.backend, BackendConfig::Amqp { .. }));
    }

    #[test]
    fn rejects_unknown_field() {
        let toml = r#"
            flag_store_dir = "/flags"
            listen_addr = "0.0.0.0:9000"
            acl_path = "/acl.toml"
            bogus_field = true
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
