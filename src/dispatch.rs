//! The Dispatcher (C5): the seam between the external command envelope and
//! the Command Handlers.
//!
//! Validates the command name and the caller's ACL grant once for the
//! whole envelope, then fans out across zones concurrently — each zone is
//! independently normalized, lock-acquired, and (if not already poisoned)
//! run through the requested handler, with a final `invalid`-flag re-check
//! folding in any mid-flight poisoning the handler itself caused.

use std::collections::BTreeMap;

use zoneward_api::{DispatchResult, Outcome};

use crate::acl::Acl;
use crate::backend::Backend;
use crate::dns::DnsProbe;
use crate::handlers::{Clock, Controller};
use crate::local_rules::LocalRules;
use crate::zonename;

/// Run `command` against every zone in `zones` on behalf of `kid`.
///
/// Returns `None` — destined to serialize as JSON `null` — if `command`
/// isn't one of the sixteen known names, or if `kid` isn't permitted to
/// issue it. Otherwise returns the populated
/// classification map, omitting outcome categories nobody landed in.
pub async fn dispatch<D, B, R, C>(
    controller: &Controller<D, B, R, C>,
    acl: &Acl,
    kid: &str,
    command: &str,
    zones: &[String],
) -> DispatchResult
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    if !Controller::<D, B, R, C>::is_known_command(command) {
        return None;
    }
    if !acl.permits(kid, command) {
        return None;
    }

    let outcomes = futures::future::join_all(zones.iter().map(|raw| dispatch_one(controller, command, raw))).await;

    let mut grouped: BTreeMap<Outcome, Vec<String>> = BTreeMap::new();
    for (zone, outcome) in outcomes {
        grouped.entry(outcome).or_default().push(zone);
    }
    Some(grouped)
}

async fn dispatch_one<D, B, R, C>(controller: &Controller<D, B, R, C>, command: &str, raw_zone: &str) -> (String, Outcome)
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    let lowered = raw_zone.to_ascii_lowercase();
    let lowered = lowered.strip_suffix('.').unwrap_or(&lowered).to_string();

    let Some(zone) = zonename::normalize(raw_zone) else {
        return (lowered, Outcome::Error);
    };

    let _guard = controller.lock_zone(zone.as_str()).await;

    if controller.is_invalid(&zone) {
        return (zone.as_str().to_string(), Outcome::Invalid);
    }

    let outcome = controller
        .invoke(command, &zone)
        .await
        .expect("command name already validated against the known-command list");

    let outcome = if controller.is_invalid(&zone) { Outcome::Invalid } else { outcome };
    (zone.as_str().to_string(), outcome)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::error::BackendError;
    use crate::flag::FlagValue;
    use crate::handlers::SystemClock;
    use crate::local_rules::DefaultLocalRules;
    use crate::store::FlagStore;

    struct NoopDns;

    impl DnsProbe for NoopDns {
        async fn test_for_signed_dnskey(&self, _zone: &str, _scope: crate::dns::Scope) -> Option<bool> {
            Some(true)
        }
        async fn dnskey_ttl(&self, _zone: &str, _scope: crate::dns::Scope) -> Option<u32> {
            Some(0)
        }
        async fn have_ds(&self, _zone: &str, _scope: crate::dns::Scope) -> Option<bool> {
            Some(false)
        }
        async fn ds_ttl(&self, _zone: &str) -> Option<u32> {
            Some(0)
        }
        async fn negative_caching_ttl(&self, _zone: &str, _scope: crate::dns::Scope) -> u32 {
            0
        }
    }

    struct NoopBackend;

    impl Backend for NoopBackend {
        async fn manage_zone(&self, _zone: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn unmanage_zone(&self, _zone: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn cluster_update(&self, _zone: &str, _flag: &str, _value: &FlagValue) -> bool {
            true
        }
    }

    fn acl_allowing(command: &str) -> Acl {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acl.toml");
        std::fs::write(&path, format!(r#"{command} = ["tester@example.com"]"#)).unwrap();
        Acl::from_file(&Utf8PathBuf::from_path_buf(path).unwrap()).unwrap()
    }

    fn controller() -> (tempfile::TempDir, Controller<NoopDns, NoopBackend, DefaultLocalRules, SystemClock>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = FlagStore::open(root).unwrap();
        let controller = Controller::standard(store, NoopDns, NoopBackend, false);
        (dir, controller)
    }

    #[tokio::test]
    async fn unknown_command_returns_null() {
        let (_dir, controller) = controller();
        let acl = acl_allowing("*");
        let result = dispatch(&controller, &acl, "tester@example.com", "not_a_command", &["example.org".into()]).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn acl_denial_returns_null() {
        let (_dir, controller) = controller();
        let acl = acl_allowing("sign_start");
        let result = dispatch(&controller, &acl, "someone-else@example.com", "sign_start", &["example.org".into()]).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn malformed_zone_name_is_classified_error() {
        let (_dir, controller) = controller();
        let acl = acl_allowing("*");
        let result = dispatch(&controller, &acl, "tester@example.com", "sign_start", &["not a zone".into()]).await;
        let grouped = result.unwrap();
        assert_eq!(grouped.get(&Outcome::Error).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn distinct_zones_are_classified_independently() {
        let (_dir, controller) = controller();
        let acl = acl_allowing("*");
        let result = dispatch(
            &controller,
            &acl,
            "tester@example.com",
            "sign_start",
            &["a.example.org".into(), "b.example.org".into()],
        )
        .await;
        let grouped = result.unwrap();
        assert_eq!(grouped.get(&Outcome::Ok).map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn invalid_zone_short_circuits_the_handler() {
        let (_dir, controller) = controller();
        let zone = zonename::normalize("example.org").unwrap();
        controller.mark_invalid_for_test(&zone, "poisoned for test").await;
        let acl = acl_allowing("*");
        let result = dispatch(&controller, &acl, "tester@example.com", "sign_start", &["example.org".into()]).await;
        let grouped = result.unwrap();
        assert_eq!(grouped.get(&Outcome::Invalid).map(Vec::len), Some(1));
    }
}
