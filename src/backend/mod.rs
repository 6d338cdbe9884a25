//! The Backend Adapter (C3): three opaque entry points plus an optional
//! cluster consumer.
//!
//! `manage_zone`/`unmanage_zone` register or deregister a zone with
//! whatever actually generates and publishes keys (PKCS#11 session,
//! `ods-ksmutil`, ...); none of that is specified here beyond the
//! contract. `cluster_update` is a best-effort broadcast of one flag
//! mutation to sibling nodes.

pub mod amqp;
pub mod shell;

use std::future::Future;

use crate::error::BackendError;
use crate::flag::FlagValue;

pub trait Backend: Send + Sync {
    fn manage_zone(&self, zone: &str) -> impl Future<Output = Result<(), BackendError>> + Send;
    fn unmanage_zone(&self, zone: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Best-effort: a failure here is logged by the caller and never
    /// turned into a handler-level error.
    fn cluster_update(
        &self,
        zone: &str,
        flag_long_name: &str,
        value: &FlagValue,
    ) -> impl Future<Output = bool> + Send;
}

/// Render a flag mutation as the wire-format cluster message body
/// described as wire format: `"<epoch> SET <zone>.<flag> [<value>]"` or
/// `"<epoch> CLEAR <zone>.<flag> "`.
pub fn encode_cluster_message(now: i64, zone: &str, flag: &str, value: &FlagValue) -> String {
    match value {
        FlagValue::Absent => format!("{now} CLEAR {zone}.{flag} "),
        FlagValue::Present => format!("{now} SET {zone}.{flag} "),
        FlagValue::Payload(payload) => format!("{now} SET {zone}.{flag} {payload}"),
    }
}

/// A parsed cluster message, ready to be applied to the local Flag Store
/// subject to the store's mtime rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterMessage {
    pub epoch: i64,
    pub zone: String,
    pub flag: String,
    pub value: FlagValue,
}

pub fn decode_cluster_message(line: &str) -> Option<ClusterMessage> {
    let mut parts = line.splitn(4, ' ');
    let epoch: i64 = parts.next()?.parse().ok()?;
    let verb = parts.next()?;
    let target = parts.next()?;
    let rest = parts.next().unwrap_or("");
    let (zone, flag) = target.rsplit_once('.')?;
    let value = match verb {
        "CLEAR" => FlagValue::Absent,
        "SET" if rest.is_empty() => FlagValue::Present,
        "SET" => FlagValue::Payload(rest.trim_end().to_string()),
        _ => return None,
    };
    Some(ClusterMessage {
        epoch,
        zone: zone.to_string(),
        flag: flag.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_clear() {
        let msg = encode_cluster_message(1_000, "example.org", "signing", &FlagValue::Absent);
        assert_eq!(msg, "1000 CLEAR example.org.signing ");
    }

    #[test]
    fn encodes_payload() {
        let msg = encode_cluster_message(
            1_000,
            "example.org",
            "signed",
            &FlagValue::Payload("12345".to_string()),
        );
        assert_eq!(msg, "1000 SET example.org.signed 12345");
    }

    #[test]
    fn round_trips_through_decode() {
        let msg = encode_cluster_message(
            1_000,
            "example.org",
            "signed",
            &FlagValue::Payload("12345".to_string()),
        );
        let decoded = decode_cluster_message(&msg).unwrap();
        assert_eq!(decoded.epoch, 1_000);
        assert_eq!(decoded.zone, "example.org");
        assert_eq!(decoded.flag, "signed");
        assert_eq!(decoded.value, FlagValue::Payload("12345".to_string()));
    }

    #[test]
    fn decodes_set_with_no_payload_as_present() {
        let decoded = decode_cluster_message("1000 SET example.org.signing ").unwrap();
        assert_eq!(decoded.value, FlagValue::Present);
    }

    #[test]
    fn rejects_malformed_message() {
        assert!(decode_cluster_message("not a cluster message").is_none());
    }
}
