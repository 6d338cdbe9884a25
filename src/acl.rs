//! The access-control list: a static mapping `command -> [kid, ...]`
//! with the wildcard key `"*"` applying to every command.
//!
//! Loaded from a TOML file at startup and reloadable without a restart,
//! since it's one of the few pieces of state an operator needs to change
//! while the daemon keeps running.

use std::collections::HashMap;
use std::sync::RwLock;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::AclError;

const WILDCARD: &str = "*";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
struct AclTable(HashMap<String, Vec<String>>);

/// The loaded ACL, guarded for in-place reload.
#[derive(Debug)]
pub struct Acl {
    table: RwLock<AclTable>,
}

impl Acl {
    pub fn from_file(path: &Utf8Path) -> Result<Acl, AclError> {
        let table = load_table(path)?;
        Ok(Acl { table: RwLock::new(table) })
    }

    /// Replace the ACL in place with the contents of `path`.
    pub fn reload(&self, path: &Utf8Path) -> Result<(), AclError> {
        let table = load_table(path)?;
        *self.table.write().unwrap() = table;
        Ok(())
    }

    /// True iff `kid` is permitted to issue `command`:
    /// `kid ∈ acl['*'] ∨ kid ∈ acl[command]`.
    pub fn permits(&self, kid: &str, command: &str) -> bool {
        let table = self.table.read().unwrap();
        table.0.get(WILDCARD).is_some_and(|kids| kids.iter().any(|k| k == kid))
            || table.0.get(command).is_some_and(|kids| kids.iter().any(|k| k == kid))
    }
}

fn load_table(path: &Utf8Path) -> Result<AclTable, AclError> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|err| AclError::Parse {
        line: err.span().map(|s| s.start).unwrap_or(0),
        message: err.message().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl_from_toml(toml: &str) -> Acl {
        let table: AclTable = toml::from_str(toml).unwrap();
        Acl { table: RwLock::new(table) }
    }

    #[test]
    fn wildcard_grants_every_command() {
        let acl = acl_from_toml(r#""*" = ["portal+key1@example.com"]"#);
        assert!(acl.permits("portal+key1@example.com", "sign_start"));
        assert!(acl.permits("portal+key1@example.com", "drop_dead"));
    }

    #[test]
    fn per_command_grant_is_scoped() {
        let acl = acl_from_toml(r#"sign_start = ["portal+key1@example.com"]"#);
        assert!(acl.permits("portal+key1@example.com", "sign_start"));
        assert!(!acl.permits("portal+key1@example.com", "drop_dead"));
    }

    #[test]
    fn unknown_kid_is_denied() {
        let acl = acl_from_toml(r#"sign_start = ["portal+key1@example.com"]"#);
        assert!(!acl.permits("someone-else@example.com", "sign_start"));
    }

    #[test]
    fn reload_replaces_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acl.toml");
        std::fs::write(&path, r#"sign_start = ["a@example.com"]"#).unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(path).unwrap();
        let acl = Acl::from_file(&path).unwrap();
        assert!(acl.permits("a@example.com", "sign_start"));

        std::fs::write(&path, r#"sign_start = ["b@example.com"]"#).unwrap();
        acl.reload(&path).unwrap();
        assert!(!acl.permits("a@example.com", "sign_start"));
        assert!(acl.permits("b@example.com", "sign_start"));
    }
}
