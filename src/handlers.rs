//! The Command Handlers (C4): the ten primitive operations plus the four
//! compound "goto" drivers that make up the DNSSEC lifecycle state
//! machine.
//!
//! [`Controller`] is the seam every handler hangs off: it owns the Flag
//! Store, the DNS Probe, the Backend Adapter, and the Local Rules hook,
//! generic over the latter three so tests can swap in scripted fakes
//! without touching a single handler body.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};
use zoneward_api::Outcome;

use crate::backend::Backend;
use crate::dns::{DnsProbe, Party, Quorum, Scope};
use crate::flag::{FlagName, FlagUpdate, FlagValue};
use crate::local_rules::{DefaultLocalRules, LocalRules};
use crate::metrics::Metrics;
use crate::store::FlagStore;
use crate::zonename::ZoneName;

/// A source of wall-clock epoch seconds, abstracted so tests can drive
/// TTL countdowns deterministically instead of waiting on a real clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// The real clock, backed by `jiff`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        jiff::Timestamp::now().as_second()
    }
}

const PARENTS_ALL: Scope = Scope::new(Party::Parents, Quorum::All);
const OPENDNSSEC_ALL: Scope = Scope::new(Party::OpenDnssec, Quorum::All);
const AUTHORITATIVES_NONE: Scope = Scope::new(Party::Authoritatives, Quorum::None);

/// The lifecycle engine: holds the four collaborators a handler needs
/// (the data flow is Dispatcher → Handler → {Flag Store, DNS Probe,
/// Backend, Local Rules}) plus the per-zone serialization a correct
/// implementation requires.
pub struct Controller<D, B, R = DefaultLocalRules, C = SystemClock>
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    pub flags: FlagStore,
    pub dns: D,
    pub backend: B,
    pub rules: R,
    pub clock: C,
    /// Whether `assert_signed` overrides its computed TTL target with
    /// `now`, per the deployment-configurable "deadlock" workaround.
    pub assert_signed_deadlock_override: bool,
    zone_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>, foldhash::fast::RandomState>>,
    metrics: Option<Arc<Metrics>>,
}

/// The ten primitive command names, in lifecycle order.
pub const PRIMITIVE_COMMANDS: [&str; 10] = [
    "sign_start",
    "sign_approve",
    "assert_signed",
    "chain_start",
    "assert_chained",
    "chain_stop",
    "assert_unchained",
    "sign_ignore",
    "sign_stop",
    "assert_unsigned",
];

/// The four compound driver names, plus `drop_dead` and `update_signed`.
pub const COMPOUND_COMMANDS: [&str; 6] = [
    "goto_signed",
    "goto_chained",
    "goto_unchained",
    "goto_unsigned",
    "drop_dead",
    "update_signed",
];

impl<D, B> Controller<D, B, DefaultLocalRules, SystemClock>
where
    D: DnsProbe,
    B: Backend,
{
    /// Build a controller with the default (grant-everything) Local
    /// Rules hook and the real system clock — what a production daemon
    /// wants.
    pub fn standard(flags: FlagStore, dns: D, backend: B, assert_signed_deadlock_override: bool) -> Self {
        Controller::new(flags, dns, backend, DefaultLocalRules, SystemClock, assert_signed_deadlock_override)
    }
}

impl<D, B, R, C> Controller<D, B, R, C>
where
    D: DnsProbe,
    B: Backend,
    R: LocalRules,
    C: Clock,
{
    pub fn new(flags: FlagStore, dns: D, backend: B, rules: R, clock: C, assert_signed_deadlock_override: bool) -> Self {
        Controller {
            flags,
            dns,
            backend,
            rules,
            clock,
            assert_signed_deadlock_override,
            zone_locks: AsyncMutex::new(HashMap::default()),
            metrics: None,
        }
    }

    /// Attach a metrics registry: every countdown flag mutation from this
    /// point on is reflected in the `countdowns_active` gauge.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// True iff `command` names one of the ten primitives or six compound
    /// drivers.
    pub fn is_known_command(command: &str) -> bool {
        PRIMITIVE_COMMANDS.contains(&command) || COMPOUND_COMMANDS.contains(&command)
    }

    /// Acquire the per-zone lock serializing this zone's handlers against
    /// themselves and against the cluster consumer.
    pub async fn lock_zone(&self, zone: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.zone_locks.lock().await;
            locks
                .entry(zone.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    pub fn is_invalid(&self, zone: &ZoneName) -> bool {
        self.flags.get(zone, FlagName::Invalid).as_bool()
    }

    /// Run `command` against `zone`, or `None` if it's not one of the
    /// sixteen names this controller knows. Does not itself acquire the
    /// per-zone lock or re-check `invalid` afterwards — that's the
    /// Dispatcher's job, so this stays usable directly from tests.
    pub async fn invoke(&self, command: &str, zone: &ZoneName) -> Option<Outcome> {
        Some(match command {
            "sign_start" => self.sign_start(zone).await,
            "sign_approve" => self.sign_approve(zone).await,
            "assert_signed" => self.assert_signed(zone).await,
            "chain_start" => self.chain_start(zone).await,
            "assert_chained" => self.assert_chained(zone).await,
            "chain_stop" => self.chain_stop(zone).await,
            "assert_unchained" => self.assert_unchained(zone).await,
            "sign_ignore" => self.sign_ignore(zone).await,
            "sign_stop" => self.sign_stop(zone).await,
            "assert_unsigned" => self.assert_unsigned(zone).await,
            "goto_signed" => self.goto_signed(zone).await,
            "goto_chained" => self.goto_chained(zone).await,
            "goto_unchained" => self.goto_unchained(zone).await,
            "goto_unsigned" => self.goto_unsigned(zone).await,
            "drop_dead" => self.drop_dead(zone).await,
            "update_signed" => self.update_signed(zone).await,
            _ => return None,
        })
    }

    // ---- Flag Store helpers -------------------------------------------

    /// Write a flag, broadcast the mutation to the cluster if it actually
    /// changed anything, and escalate a failed read-after-write into the
    /// `invalid`-flag cascade.
    async fn set_flag(&self, zone: &ZoneName, flag: FlagName, update: FlagUpdate) {
        let expected = update.expected();
        let outcome = self.flags.set_checked(zone, flag, update);
        if let Some(metrics) = &self.metrics {
            if matches!(
                flag,
                FlagName::Signed | FlagName::Chained | FlagName::Unchained | FlagName::Unsigning
            ) {
                let active = matches!(expected, FlagValue::Payload(_));
                metrics.set_countdown_active(zone.as_str(), flag.as_str(), active);
            }
        }
        if outcome.changed {
            if !self.backend.cluster_update(zone.as_str(), flag.as_str(), &expected).await {
                warn!(%zone, %flag, "cluster broadcast failed; sibling nodes may lag");
            }
        }
        if !outcome.matches {
            self.mark_invalid(zone, &format!("flag store write mismatch on '{flag}'")).await;
        }
    }

    /// Set the sticky `invalid` flag. A failure to do even this is a
    /// fatal process condition: we've already lost the
    /// ability to record that the zone is broken, so there is no safe
    /// way to keep serving commands for it.
    async fn mark_invalid(&self, zone: &ZoneName, cause: &str) {
        let update = FlagUpdate::Payload(cause.to_string());
        let expected = update.expected();
        let outcome = self.flags.set_checked(zone, FlagName::Invalid, update);
        if !outcome.matches {
            error!(%zone, %cause, "failed to record invalid flag; exiting");
            std::process::exit(1);
        }
        let _ = self.backend.cluster_update(zone.as_str(), FlagName::Invalid.as_str(), &expected).await;
    }

    fn flag_bool(&self, zone: &ZoneName, flag: FlagName) -> bool {
        self.flags.get(zone, flag).as_bool()
    }

    #[cfg(test)]
    pub async fn mark_invalid_for_test(&self, zone: &ZoneName, cause: &str) {
        self.mark_invalid(zone, cause).await;
    }

    // ---- 4.4.1 Ten primitive commands -----------------------------------

    /// `sign_start`: ¬signing ∧ ¬chaining → `local.sign_start`.
    pub async fn sign_start(&self, zone: &ZoneName) -> Outcome {
        if self.flag_bool(zone, FlagName::Signing) || self.flag_bool(zone, FlagName::Chaining) {
            return Outcome::Badstate;
        }
        if !self.rules.sign_start(zone.as_str()).await {
            return Outcome::Error;
        }
        Outcome::Ok
    }

    /// `sign_approve`: ¬signing ∧ ¬chaining ∧ ¬signed → `local.sign_approve`
    /// then `backend.manage_zone`; on success, `signing := true`.
    pub async fn sign_approve(&self, zone: &ZoneName) -> Outcome {
        if self.flag_bool(zone, FlagName::Signing)
            || self.flag_bool(zone, FlagName::Chaining)
            || self.flag_bool(zone, FlagName::Signed)
        {
            return Outcome::Badstate;
        }
        if !self.rules.sign_approve(zone.as_str()).await {
            return Outcome::Error;
        }
        if self.backend.manage_zone(zone.as_str()).await.is_err() {
            return Outcome::Error;
        }
        self.set_flag(zone, FlagName::Signing, FlagUpdate::Mark).await;
        Outcome::Ok
    }

    /// `assert_signed`: signing ∧ ¬chaining.
    pub async fn assert_signed(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signing) || self.flag_bool(zone, FlagName::Chaining) {
            return Outcome::Badstate;
        }
        if !self.rules.assert_signed(zone.as_str()).await {
            return Outcome::Error;
        }

        let signed = self.flags.get(zone, FlagName::Signed);
        let target = if let Some(target) = signed.as_epoch() {
            target
        } else {
            if !self.dns.test_for_signed_dnskey(zone.as_str(), OPENDNSSEC_ALL).await.unwrap_or(false) {
                return Outcome::Error;
            }
            let target = if self.assert_signed_deadlock_override {
                self.clock.now()
            } else {
                let dnskey_ttl = self.dns.dnskey_ttl(zone.as_str(), OPENDNSSEC_ALL).await.unwrap_or(crate::dns::FALLBACK_TTL);
                let neg_ttl = self.dns.negative_caching_ttl(zone.as_str(), OPENDNSSEC_ALL).await;
                self.clock.now() + i64::from(dnskey_ttl.max(neg_ttl))
            };
            self.set_flag(zone, FlagName::Signed, FlagUpdate::epoch(target)).await;
            target
        };

        if self.clock.now() >= target {
            Outcome::Ok
        } else {
            Outcome::Error
        }
    }

    /// `chain_start`: `assert_signed` currently OK ∧ ¬chained.
    pub async fn chain_start(&self, zone: &ZoneName) -> Outcome {
        let signed_result = self.assert_signed(zone).await;
        if signed_result != Outcome::Ok {
            return signed_result;
        }
        if self.flag_bool(zone, FlagName::Chained) {
            return Outcome::Badstate;
        }

        // A pre-existing DS means some other process already started
        // the chain; short-circuit to invalid before `chaining` is set.
        if self.dns.have_ds(zone.as_str(), PARENTS_ALL).await.unwrap_or(false) {
            warn!(%zone, "DS already present at chain_start; marking zone invalid");
            self.mark_invalid(zone, "DS record already present before chain_start").await;
            return Outcome::Invalid;
        }

        if !self.rules.chain_start(zone.as_str()).await {
            return Outcome::Error;
        }
        self.set_flag(zone, FlagName::Chaining, FlagUpdate::Mark).await;
        Outcome::Ok
    }

    /// `assert_chained`: signed ∧ chaining.
    pub async fn assert_chained(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signed) || !self.flag_bool(zone, FlagName::Chaining) {
            return Outcome::Badstate;
        }

        if !self.dns.have_ds(zone.as_str(), PARENTS_ALL).await.unwrap_or(false) {
            if !self.flag_bool(zone, FlagName::WaiveDs) {
                return Outcome::Error;
            }
        }

        let chained = self.flags.get(zone, FlagName::Chained);
        let target = if let Some(target) = chained.as_epoch() {
            target
        } else {
            if !self.rules.assert_chained(zone.as_str()).await {
                return Outcome::Error;
            }
            let ds_ttl = self.dns.ds_ttl(zone.as_str()).await.unwrap_or(crate::dns::FALLBACK_TTL);
            let neg_ttl = self.dns.negative_caching_ttl(zone.as_str(), PARENTS_ALL).await;
            let target = self.clock.now() + i64::from(ds_ttl.max(neg_ttl));
            self.set_flag(zone, FlagName::Chained, FlagUpdate::epoch(target)).await;
            target
        };

        if self.clock.now() >= target {
            Outcome::Ok
        } else {
            Outcome::Error
        }
    }

    /// `chain_stop`: signed ∧ chained ∧ chaining → capture `ds_ttl` into
    /// `dsttl`; `local.chain_stop`; `chaining := false`, `chained := false`.
    pub async fn chain_stop(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signed)
            || !self.flag_bool(zone, FlagName::Chained)
            || !self.flag_bool(zone, FlagName::Chaining)
        {
            return Outcome::Badstate;
        }

        // A null DS TTL here is anomalous enough to be a hard failure,
        // not a value worth storing verbatim.
        let Some(ds_ttl) = self.dns.ds_ttl(zone.as_str()).await else {
            self.mark_invalid(zone, "ds_ttl unavailable at chain_stop").await;
            return Outcome::Invalid;
        };
        self.set_flag(zone, FlagName::DsTtl, FlagUpdate::ttl(ds_ttl)).await;

        if !self.rules.chain_stop(zone.as_str()).await {
            return Outcome::Error;
        }

        self.set_flag(zone, FlagName::Chaining, FlagUpdate::Clear).await;
        self.set_flag(zone, FlagName::Chained, FlagUpdate::Clear).await;
        Outcome::Ok
    }

    /// `assert_unchained`: signed ∧ ¬chaining ∧ ¬chained ∧ dsttl
    /// present.
    pub async fn assert_unchained(&self, zone: &ZoneName) -> Outcome {
        let dsttl = self.flags.get(zone, FlagName::DsTtl).as_ttl();
        if !self.flag_bool(zone, FlagName::Signed)
            || self.flag_bool(zone, FlagName::Chaining)
            || self.flag_bool(zone, FlagName::Chained)
            || dsttl.is_none()
        {
            return Outcome::Badstate;
        }

        if self.dns.have_ds(zone.as_str(), PARENTS_ALL).await.unwrap_or(false) {
            return Outcome::Error;
        }
        if !self.rules.assert_unchained(zone.as_str()).await {
            return Outcome::Error;
        }

        let unchained = self.flags.get(zone, FlagName::Unchained);
        let target = if let Some(target) = unchained.as_epoch() {
            target
        } else {
            let target = self.clock.now() + i64::from(dsttl.unwrap());
            self.set_flag(zone, FlagName::Unchained, FlagUpdate::epoch(target)).await;
            target
        };

        if self.clock.now() >= target {
            Outcome::Ok
        } else {
            Outcome::Error
        }
    }

    /// `sign_ignore`: signed ∧ ¬chained → hook only, no flag change.
    pub async fn sign_ignore(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signed) || self.flag_bool(zone, FlagName::Chained) {
            return Outcome::Badstate;
        }
        if !self.rules.sign_ignore(zone.as_str()).await {
            return Outcome::Error;
        }
        Outcome::Ok
    }

    /// `sign_stop`: signed ∧ ¬chained → capture `dnskey_ttl` into
    /// `dnskeyttl`; `local.sign_stop`; `backend.unmanage_zone`;
    /// `signed := false`.
    pub async fn sign_stop(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signed) || self.flag_bool(zone, FlagName::Chained) {
            return Outcome::Badstate;
        }

        // Mirrors the resolution adopted for chain_stop's ds_ttl capture:
        // `signed` being true means the DNSKEY was already confirmed
        // present, so a null TTL here is equally anomalous.
        let Some(dnskey_ttl) = self.dns.dnskey_ttl(zone.as_str(), OPENDNSSEC_ALL).await else {
            self.mark_invalid(zone, "dnskey_ttl unavailable at sign_stop").await;
            return Outcome::Invalid;
        };
        self.set_flag(zone, FlagName::DnskeyTtl, FlagUpdate::ttl(dnskey_ttl)).await;

        if !self.rules.sign_stop(zone.as_str()).await {
            return Outcome::Error;
        }
        if self.backend.unmanage_zone(zone.as_str()).await.is_err() {
            return Outcome::Error;
        }

        self.set_flag(zone, FlagName::Signed, FlagUpdate::Clear).await;
        Outcome::Ok
    }

    /// `assert_unsigned`: ¬signed ∧ ¬chained.
    pub async fn assert_unsigned(&self, zone: &ZoneName) -> Outcome {
        if self.flag_bool(zone, FlagName::Signed) || self.flag_bool(zone, FlagName::Chained) {
            return Outcome::Badstate;
        }
        if !self.flag_bool(zone, FlagName::Signing) {
            return Outcome::Ok;
        }

        let Some(dnskeyttl) = self.flags.get(zone, FlagName::DnskeyTtl).as_ttl() else {
            return Outcome::Badstate;
        };

        let unsigning = self.flags.get(zone, FlagName::Unsigning);
        let target = if let Some(target) = unsigning.as_epoch() {
            target
        } else {
            if self.dns.test_for_signed_dnskey(zone.as_str(), AUTHORITATIVES_NONE).await != Some(true) {
                return Outcome::Error;
            }
            if !self.rules.assert_unsigned(zone.as_str()).await {
                return Outcome::Error;
            }
            let target = self.clock.now() + i64::from(dnskeyttl);
            self.set_flag(zone, FlagName::Unsigning, FlagUpdate::epoch(target)).await;
            target
        };

        if self.clock.now() < target {
            return Outcome::Error;
        }

        self.set_flag(zone, FlagName::Signing, FlagUpdate::Clear).await;
        if self.flag_bool(zone, FlagName::Signing) {
            // set_flag already escalated the mismatch to `invalid`, but
            // the caller needs to see that reflected in the outcome too.
            return Outcome::Invalid;
        }
        self.set_flag(zone, FlagName::DsTtl, FlagUpdate::Clear).await;
        self.set_flag(zone, FlagName::DnskeyTtl, FlagUpdate::Clear).await;
        self.set_flag(zone, FlagName::Unsigning, FlagUpdate::Clear).await;
        Outcome::Ok
    }

    // ---- 4.4.6 Four compound drivers ------------------------------------

    /// `goto_signed`: drive a zone towards (or back out through) the
    /// signed state, one poll at a time.
    pub async fn goto_signed(&self, zone: &ZoneName) -> Outcome {
        if self.flag_bool(zone, FlagName::Chaining) || self.flag_bool(zone, FlagName::Chained) {
            self.mark_invalid(zone, "goto_signed observed chaining/chained state").await;
            return Outcome::Invalid;
        }

        let signed = self.flags.get(zone, FlagName::Signed);
        if let Some(target) = signed.as_epoch() {
            if self.clock.now() >= target {
                return self.assert_unchained(zone).await;
            }
        }

        if !self.flag_bool(zone, FlagName::Signing) && !signed.as_bool() {
            let result = self.sign_approve(zone).await;
            if result != Outcome::Ok {
                return result;
            }
        }

        self.assert_signed(zone).await
    }

    /// `goto_chained`: ensure signed, then drive towards chained.
    pub async fn goto_chained(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signed) {
            let result = self.goto_signed(zone).await;
            if result != Outcome::Ok {
                return result;
            }
        }

        if self.flag_bool(zone, FlagName::Signing) && !self.flag_bool(zone, FlagName::Chaining) {
            let result = self.chain_start(zone).await;
            if result != Outcome::Ok {
                return result;
            }
        }

        self.assert_chained(zone).await
    }

    /// `goto_unchained`: drive the DS-removal side of the chain
    /// tear-down.
    pub async fn goto_unchained(&self, zone: &ZoneName) -> Outcome {
        let chaining = self.flag_bool(zone, FlagName::Chaining);
        let chained = self.flags.get(zone, FlagName::Chained);
        let chained_passed = chained.as_epoch().is_some_and(|target| self.clock.now() >= target);

        if chaining && !chained_passed {
            return self.goto_chained(zone).await;
        }
        if chaining && chained_passed {
            return self.chain_stop(zone).await;
        }
        self.assert_unchained(zone).await
    }

    /// `goto_unsigned`: drive the whole tear-down, finishing any
    /// in-progress sign first.
    pub async fn goto_unsigned(&self, zone: &ZoneName) -> Outcome {
        let signed = self.flags.get(zone, FlagName::Signed);
        let signed_passed = signed.as_epoch().is_some_and(|target| self.clock.now() >= target);

        if signed.as_bool() && !signed_passed {
            return self.goto_signed(zone).await;
        }
        if self.flag_bool(zone, FlagName::Chained) {
            return self.goto_unchained(zone).await;
        }
        if signed.as_bool() {
            return self.sign_stop(zone).await;
        }
        self.assert_unsigned(zone).await
    }

    /// `drop_dead`: force-tear-down, always OK.
    pub async fn drop_dead(&self, zone: &ZoneName) -> Outcome {
        if let Err(err) = self.backend.unmanage_zone(zone.as_str()).await {
            warn!(%zone, %err, "drop_dead: backend.unmanage_zone failed, clearing flags anyway");
        }
        for flag in FlagName::DROP_DEAD_SET {
            self.set_flag(zone, flag, FlagUpdate::Clear).await;
        }
        Outcome::Ok
    }

    /// `update_signed`: requires `signed`; delegates to the
    /// `update_signed` hook.
    pub async fn update_signed(&self, zone: &ZoneName) -> Outcome {
        if !self.flag_bool(zone, FlagName::Signed) {
            return Outcome::Badstate;
        }
        if self.rules.update_signed(zone.as_str()).await {
            Outcome::Ok
        } else {
            Outcome::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex as StdMutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::error::BackendError;

    #[derive(Clone)]
    struct FakeClock(Arc<AtomicI64>);

    impl FakeClock {
        fn new(now: i64) -> Self {
            FakeClock(Arc::new(AtomicI64::new(now)))
        }

        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeDns {
        signed_dnskey: StdMutex<StdHashMap<String, bool>>,
        have_ds: StdMutex<StdHashMap<String, bool>>,
        dnskey_ttl: i64,
        ds_ttl: Option<u32>,
        neg_ttl: u32,
    }

    impl FakeDns {
        fn with_defaults() -> Self {
            FakeDns {
                signed_dnskey: StdMutex::new(StdHashMap::new()),
                have_ds: StdMutex::new(StdHashMap::new()),
                dnskey_ttl: 3600,
                ds_ttl: Some(3600),
                neg_ttl: 60,
            }
        }

        fn set_signed(&self, zone: &str, value: bool) {
            self.signed_dnskey.lock().unwrap().insert(zone.to_string(), value);
        }

        fn set_have_ds(&self, zone: &str, value: bool) {
            self.have_ds.lock().unwrap().insert(zone.to_string(), value);
        }
    }

    impl DnsProbe for FakeDns {
        async fn test_for_signed_dnskey(&self, zone: &str, _scope: Scope) -> Option<bool> {
            Some(*self.signed_dnskey.lock().unwrap().get(zone).unwrap_or(&false))
        }

        async fn dnskey_ttl(&self, _zone: &str, _scope: Scope) -> Option<u32> {
            Some(self.dnskey_ttl as u32)
        }

        async fn have_ds(&self, zone: &str, _scope: Scope) -> Option<bool> {
            Some(*self.have_ds.lock().unwrap().get(zone).unwrap_or(&false))
        }

        async fn ds_ttl(&self, _zone: &str) -> Option<u32> {
            self.ds_ttl
        }

        async fn negative_caching_ttl(&self, _zone: &str, _scope: Scope) -> u32 {
            self.neg_ttl
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        manage_calls: StdMutex<Vec<String>>,
        unmanage_calls: StdMutex<Vec<String>>,
        fail_manage: bool,
    }

    impl Backend for FakeBackend {
        async fn manage_zone(&self, zone: &str) -> Result<(), BackendError> {
            self.manage_calls.lock().unwrap().push(zone.to_string());
            if self.fail_manage {
                Err(BackendError::NotConfigured)
            } else {
                Ok(())
            }
        }

        async fn unmanage_zone(&self, zone: &str) -> Result<(), BackendError> {
            self.unmanage_calls.lock().unwrap().push(zone.to_string());
            Ok(())
        }

        async fn cluster_update(&self, _zone: &str, _flag: &str, _value: &crate::flag::FlagValue) -> bool {
            true
        }
    }

    fn store() -> (tempfile::TempDir, FlagStore) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, FlagStore::open(root).unwrap())
    }

    fn zone(name: &str) -> ZoneName {
        crate::zonename::normalize(name).unwrap()
    }

    fn controller(
        flags: FlagStore,
        dns: FakeDns,
        backend: FakeBackend,
        clock: FakeClock,
    ) -> Controller<FakeDns, FakeBackend, DefaultLocalRules, FakeClock> {
        Controller::new(flags, dns, backend, DefaultLocalRules, clock, false)
    }

    /// Grants every hook except `assert_signed`, which it always vetoes.
    #[derive(Clone, Copy, Debug, Default)]
    struct VetoingRules;

    impl LocalRules for VetoingRules {
        async fn sign_start(&self, _zone: &str) -> bool {
            true
        }
        async fn sign_approve(&self, _zone: &str) -> bool {
            true
        }
        async fn assert_signed(&self, _zone: &str) -> bool {
            false
        }
        async fn assert_chained(&self, _zone: &str) -> bool {
            true
        }
        async fn chain_start(&self, _zone: &str) -> bool {
            true
        }
        async fn chain_stop(&self, _zone: &str) -> bool {
            true
        }
        async fn assert_unchained(&self, _zone: &str) -> bool {
            true
        }
        async fn assert_unsigned(&self, _zone: &str) -> bool {
            true
        }
        async fn sign_stop(&self, _zone: &str) -> bool {
            true
        }
        async fn sign_ignore(&self, _zone: &str) -> bool {
            true
        }
        async fn update_signed(&self, _zone: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn sign_approve_sets_signing_and_calls_manage_zone() {
        let (_dir, flags) = store();
        let c = controller(flags, FakeDns::with_defaults(), FakeBackend::default(), FakeClock::new(1_000));
        let z = zone("example.org");

        assert_eq!(c.sign_approve(&z).await, Outcome::Ok);
        assert!(c.flag_bool(&z, FlagName::Signing));
        assert_eq!(c.backend.manage_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_sign_approve_is_badstate() {
        let (_dir, flags) = store();
        let c = controller(flags, FakeDns::with_defaults(), FakeBackend::default(), FakeClock::new(1_000));
        let z = zone("example.org");

        assert_eq!(c.sign_approve(&z).await, Outcome::Ok);
        assert_eq!(c.sign_approve(&z).await, Outcome::Badstate);
    }

    #[tokio::test]
    async fn sign_approve_backend_failure_is_error_and_does_not_set_signing() {
        let (_dir, flags) = store();
        let backend = FakeBackend { fail_manage: true, ..Default::default() };
        let c = controller(flags, FakeDns::with_defaults(), backend, FakeClock::new(1_000));
        let z = zone("example.org");

        assert_eq!(c.sign_approve(&z).await, Outcome::Error);
        assert!(!c.flag_bool(&z, FlagName::Signing));
    }

    #[tokio::test]
    async fn assert_signed_waits_out_the_ttl_countdown() {
        let (_dir, flags) = store();
        let dns = FakeDns::with_defaults();
        dns.set_signed("example.org", true);
        let clock = FakeClock::new(1_000);
        let c = controller(flags, dns, FakeBackend::default(), clock.clone());
        let z = zone("example.org");

        c.sign_approve(&z).await;
        assert_eq!(c.assert_signed(&z).await, Outcome::Error);

        clock.advance(10_000);
        assert_eq!(c.assert_signed(&z).await, Outcome::Ok);
        assert!(c.flags.get(&z, FlagName::Signed).as_epoch().is_some());
    }

    #[tokio::test]
    async fn assert_signed_before_dnskey_published_is_error() {
        let (_dir, flags) = store();
        let c = controller(flags, FakeDns::with_defaults(), FakeBackend::default(), FakeClock::new(1_000));
        let z = zone("example.org");

        c.sign_approve(&z).await;
        assert_eq!(c.assert_signed(&z).await, Outcome::Error);
        assert!(c.flags.get(&z, FlagName::Signed).as_epoch().is_none());
    }

    #[tokio::test]
    async fn assert_signed_respects_local_rules_veto() {
        let (_dir, flags) = store();
        let dns = FakeDns::with_defaults();
        dns.set_signed("example.org", true);
        let clock = FakeClock::new(1_000);
        let c = Controller::new(flags, dns, FakeBackend::default(), VetoingRules, clock.clone(), false);
        let z = zone("example.org");

        c.sign_approve(&z).await;
        clock.advance(10_000);
        assert_eq!(c.assert_signed(&z).await, Outcome::Error);
        assert!(c.flags.get(&z, FlagName::Signed).as_epoch().is_none());
    }

    #[tokio::test]
    async fn deadlock_override_skips_the_countdown() {
        let (_dir, flags) = store();
        let dns = FakeDns::with_defaults();
        dns.set_signed("example.org", true);
        let c = Controller::new(flags, dns, FakeBackend::default(), DefaultLocalRules, FakeClock::new(1_000), true);
        let z = zone("example.org");

        c.sign_approve(&z).await;
        assert_eq!(c.assert_signed(&z).await, Outcome::Ok);
    }

    #[tokio::test]
    async fn chain_start_invalidates_zone_on_preexisting_ds() {
        let (_dir, flags) = store();
        let dns = FakeDns::with_defaults();
        dns.set_signed("example.org", true);
        dns.set_have_ds("example.org", true);
        let clock = FakeClock::new(1_000);
        let c = controller(flags, dns, FakeBackend::default(), clock.clone());
        let z = zone("example.org");

        c.sign_approve(&z).await;
        clock.advance(10_000);
        assert_eq!(c.assert_signed(&z).await, Outcome::Ok);

        assert_eq!(c.chain_start(&z).await, Outcome::Invalid);
        assert!(!c.flag_bool(&z, FlagName::Chaining));
        assert!(c.is_invalid(&z));
    }

    #[tokio::test]
    async fn invalid_zone_is_sticky_for_every_subsequent_command() {
        let (_dir, flags) = store();
        let c = controller(flags, FakeDns::with_defaults(), FakeBackend::default(), FakeClock::new(1_000));
        let z = zone("example.org");

        c.mark_invalid(&z, "test").await;
        assert!(c.is_invalid(&z));
        // Any handler run after this point is expected to be gated by the
        // dispatcher's own invalid-flag check; Controller itself
        // just guarantees the flag sticks.
        assert!(c.is_invalid(&z));
    }

    #[tokio::test]
    async fn full_sign_and_unsign_round_trip_clears_every_flag() {
        let (_dir, flags) = store();
        let dns = FakeDns::with_defaults();
        dns.set_signed("example.org", true);
        let clock = FakeClock::new(1_000);
        let c = controller(flags, dns, FakeBackend::default(), clock.clone());
        let z = zone("example.org");

        assert_eq!(c.goto_signed(&z).await, Outcome::Error); // DNSKEY check not yet pollable
        clock.advance(10_000);
        assert_eq!(c.goto_signed(&z).await, Outcome::Ok);
        assert!(c.flag_bool(&z, FlagName::Signed));

        assert_eq!(c.sign_stop(&z).await, Outcome::Ok);
        assert!(!c.flag_bool(&z, FlagName::Signed));

        clock.advance(10_000);
        assert_eq!(c.goto_unsigned(&z).await, Outcome::Ok);

        for flag in FlagName::DROP_DEAD_SET {
            assert!(!c.flag_bool(&z, flag), "flag {flag} should be cleared after full teardown");
        }
    }

    #[tokio::test]
    async fn drop_dead_is_idempotent() {
        let (_dir, flags) = store();
        let c = controller(flags, FakeDns::with_defaults(), FakeBackend::default(), FakeClock::new(1_000));
        let z = zone("example.org");

        c.sign_approve(&z).await;
        assert_eq!(c.drop_dead(&z).await, Outcome::Ok);
        assert_eq!(c.drop_dead(&z).await, Outcome::Ok);
        for flag in FlagName::DROP_DEAD_SET {
            assert!(!c.flag_bool(&z, flag));
        }
    }

    #[tokio::test]
    async fn assert_chained_respects_waiveds_override() {
        let (_dir, flags) = store();
        let dns = FakeDns::with_defaults();
        dns.set_signed("example.org", true);
        let clock = FakeClock::new(1_000);
        let c = controller(flags, dns, FakeBackend::default(), clock.clone());
        let z = zone("example.org");

        c.sign_approve(&z).await;
        clock.advance(10_000);
        c.assert_signed(&z).await;
        c.chain_start(&z).await;

        // No DS published and no waiver: blocked.
        assert_eq!(c.assert_chained(&z).await, Outcome::Error);

        c.set_flag(&z, FlagName::WaiveDs, FlagUpdate::Mark).await;
        assert_eq!(c.assert_chained(&z).await, Outcome::Error); // countdown just started
        clock.advance(10_000);
        assert_eq!(c.assert_chained(&z).await, Outcome::Ok);
    }
}
