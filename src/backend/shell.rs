//! A shell-out backend: spawns a configured executable with a fixed,
//! structured argument vector per call.
//!
//! A naive backend might build its command line by string concatenation
//! (`format!("ods-ksmutil zone add --zone \"{zone}\"")` fed to a shell);
//! that lets a pathological zone name escape into extra shell syntax.
//! Every invocation here instead goes through [`tokio::process::Command`]'s
//! argument-array API, so a zone name can never be interpreted as anything
//! but a single opaque argument.

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::BackendError;
use crate::flag::FlagValue;

use super::Backend;

/// One argument in a command template: either a fixed literal, or the
/// place where the zone name is substituted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgTemplate {
    Literal(String),
    Zone,
}

/// Configuration for the shell backend: the executable plus the argument
/// templates for "manage" and "unmanage".
#[derive(Clone, Debug)]
pub struct ShellBackendConfig {
    pub executable: String,
    pub manage_args: Vec<ArgTemplate>,
    pub unmanage_args: Vec<ArgTemplate>,
}

impl ShellBackendConfig {
    /// A template matching the `ods-ksmutil` invocation this backend is
    /// grounded on, minus the string-concatenation bug: `zone add
    /// --zone <zone>` / `zone delete --zone <zone>`.
    pub fn ods_ksmutil(executable: impl Into<String>) -> Self {
        ShellBackendConfig {
            executable: executable.into(),
            manage_args: vec![
                ArgTemplate::Literal("zone".into()),
                ArgTemplate::Literal("add".into()),
                ArgTemplate::Literal("--zone".into()),
                ArgTemplate::Zone,
            ],
            unmanage_args: vec![
                ArgTemplate::Literal("zone".into()),
                ArgTemplate::Literal("delete".into()),
                ArgTemplate::Literal("--zone".into()),
                ArgTemplate::Zone,
            ],
        }
    }
}

pub struct ShellBackend {
    config: ShellBackendConfig,
}

impl ShellBackend {
    pub fn new(config: ShellBackendConfig) -> Self {
        ShellBackend { config }
    }

    async fn run(&self, template: &[ArgTemplate], zone: &str) -> Result<(), BackendError> {
        let mut cmd = Command::new(&self.config.executable);
        for arg in template {
            match arg {
                ArgTemplate::Literal(lit) => {
                    cmd.arg(lit);
                }
                ArgTemplate::Zone => {
                    cmd.arg(zone);
                }
            }
        }
        debug!(executable = %self.config.executable, %zone, "spawning backend process");
        let status = cmd.status().await.map_err(BackendError::Spawn)?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::NonZeroExit { code: status.code() })
        }
    }
}

impl Backend for ShellBackend {
    async fn manage_zone(&self, zone: &str) -> Result<(), BackendError> {
        self.run(&self.config.manage_args, zone).await
    }

    async fn unmanage_zone(&self, zone: &str) -> Result<(), BackendError> {
        self.run(&self.config.unmanage_args, zone).await
    }

    async fn cluster_update(&self, _zone: &str, _flag_long_name: &str, _value: &FlagValue) -> bool {
        // The shell backend has no cluster transport of its own; a
        // deployment that needs cluster replication pairs it with the
        // AMQP backend's consumer instead.
        warn!("shell backend has no cluster transport; update not broadcast");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ods_ksmutil_template_has_no_shell_metacharacters_baked_in() {
        let config = ShellBackendConfig::ods_ksmutil("ods-ksmutil");
        for arg in config.manage_args.iter().chain(&config.unmanage_args) {
            if let ArgTemplate::Literal(lit) = arg {
                assert!(!lit.contains(' '), "a literal argument should be one shell token");
            }
        }
    }
}
