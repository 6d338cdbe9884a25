//! The DNS Probe (C2): quorum-combined queries against three publisher
//! scopes, used by the Command Handlers to decide when a TTL countdown has
//! safely drained.
//!
//! The trait in this module is the seam the handlers are tested against;
//! [`live::LiveDnsProbe`] is the only implementation that performs actual
//! network I/O, built on `domain` for wire-format construction/parsing and
//! on `hickory-resolver` for the preliminary system-resolver lookups.

pub mod live;

use std::future::Future;

/// Which set of name servers to query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Party {
    /// The single configured local signer ("OpenDNSSEC output").
    OpenDnssec,
    /// The zone's own NS RRset.
    Authoritatives,
    /// The zone's immediate parent's NS RRset.
    Parents,
}

/// How individual per-server answers combine into one result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Quorum {
    /// True if any individual result is true; `None` counts as false.
    Some,
    /// True only if every result is exactly true.
    All,
    /// True only if every result is exactly false.
    None,
}

/// A `(Party, Quorum)` pair selecting both which servers to ask and how to
/// combine their answers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    pub party: Party,
    pub quorum: Quorum,
}

impl Scope {
    pub const fn new(party: Party, quorum: Quorum) -> Self {
        Scope { party, quorum }
    }
}

/// Combine a batch of per-server boolean results (`None` meaning "no
/// answer, or a query failure") per the selected quorum rule.
pub fn combine(results: &[Option<bool>], quorum: Quorum) -> Option<bool> {
    if results.is_empty() {
        return None;
    }
    Some(match quorum {
        Quorum::Some => results.iter().any(|r| *r == Some(true)),
        Quorum::All => results.iter().all(|r| *r == Some(true)),
        Quorum::None => results.iter().all(|r| *r == Some(false)),
    })
}

/// Add a TTL to "now", returning the absolute epoch second at which a
/// cache holding that TTL is guaranteed to have drained.
pub fn ttl2endtime(ttl: u32, now: i64) -> i64 {
    now + i64::from(ttl)
}

/// The conventional fallback TTL used when a server's answer can't be
/// parsed for its TTL: assume a full day.
pub const FALLBACK_TTL: u32 = 86_400;

/// The seam between the Command Handlers and live DNS.
///
/// All methods return `None` (or, for `negative_caching_ttl`, the
/// documented fallback) when the probe could not form an opinion — e.g.
/// the party has no servers to ask (no parent label) or every query timed
/// out.
pub trait DnsProbe: Send + Sync {
    /// True iff the DNSKEY answer has both a non-empty RRset and a
    /// non-empty RRSIG set, combined per `scope`'s quorum.
    fn test_for_signed_dnskey(
        &self,
        zone: &str,
        scope: Scope,
    ) -> impl Future<Output = Option<bool>> + Send;

    /// Maximum DNSKEY TTL observed across responding servers in `scope`.
    fn dnskey_ttl(&self, zone: &str, scope: Scope) -> impl Future<Output = Option<u32>> + Send;

    /// Same signed-RRset test as `test_for_signed_dnskey`, applied to DS.
    fn have_ds(&self, zone: &str, scope: Scope) -> impl Future<Output = Option<bool>> + Send;

    /// Maximum DS TTL across the zone's parent NSes.
    fn ds_ttl(&self, zone: &str) -> impl Future<Output = Option<u32>> + Send;

    /// SOA-derived `min(SOA.ttl, SOA.minimum)` per server, maxed across
    /// servers; `FALLBACK_TTL` if nothing could be determined.
    fn negative_caching_ttl(&self, zone: &str, scope: Scope) -> impl Future<Output = u32> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn some_is_true_if_any_true() {
        assert_eq!(combine(&[Some(false), Some(true), None], Quorum::Some), Some(true));
        assert_eq!(combine(&[Some(false), None], Quorum::Some), Some(false));
    }

    #[test]
    fn all_fails_on_none() {
        assert_eq!(combine(&[Some(true), None], Quorum::All), Some(false));
        assert_eq!(combine(&[Some(true), Some(true)], Quorum::All), Some(true));
    }

    #[test]
    fn none_fails_on_any_true_or_none() {
        assert_eq!(combine(&[Some(false), Some(false)], Quorum::None), Some(true));
        assert_eq!(combine(&[Some(false), None], Quorum::None), Some(false));
        assert_eq!(combine(&[Some(false), Some(true)], Quorum::None), Some(false));
    }

    #[test]
    fn empty_batch_is_none() {
        assert_eq!(combine(&[], Quorum::Some), None);
    }

    #[test]
    fn ttl2endtime_adds_ttl_to_now() {
        assert_eq!(ttl2endtime(3600, 1_000_000), 1_003_600);
    }
}
