//! The Flag Store's value model.
//!
//! A flag's on-disk representation can mean `false`, `true`, or a string
//! payload depending on context. Rather than carry that ambiguity into
//! callers, it is modeled here as an explicit tagged variant with narrow
//! view methods, so a caller has to say which shape it expects.

use std::fmt;

/// The names of the eleven flags a zone can carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlagName {
    Signing,
    Signed,
    Chaining,
    Chained,
    Unchained,
    Unsigning,
    DsTtl,
    DnskeyTtl,
    WaiveDs,
    Invalid,
}

impl FlagName {
    pub const ALL: [FlagName; 10] = [
        FlagName::Signing,
        FlagName::Signed,
        FlagName::Chaining,
        FlagName::Chained,
        FlagName::Unchained,
        FlagName::Unsigning,
        FlagName::DsTtl,
        FlagName::DnskeyTtl,
        FlagName::WaiveDs,
        FlagName::Invalid,
    ];

    /// The flags cleared by `drop_dead` and by a successful `assert_unsigned`
    /// (a subset, see `UNSIGN_CLEAR_SET`).
    pub const DROP_DEAD_SET: [FlagName; 8] = [
        FlagName::Signing,
        FlagName::Signed,
        FlagName::Chaining,
        FlagName::Chained,
        FlagName::Unchained,
        FlagName::Unsigning,
        FlagName::DsTtl,
        FlagName::DnskeyTtl,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FlagName::Signing => "signing",
            FlagName::Signed => "signed",
            FlagName::Chaining => "chaining",
            FlagName::Chained => "chained",
            FlagName::Unchained => "unchained",
            FlagName::Unsigning => "unsigning",
            FlagName::DsTtl => "dsttl",
            FlagName::DnskeyTtl => "dnskeyttl",
            FlagName::WaiveDs => "waiveds",
            FlagName::Invalid => "invalid",
        }
    }
}

impl fmt::Display for FlagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flag's value, as read from (or about to be written to) the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagValue {
    /// The flag's file does not exist: semantically `false`.
    Absent,
    /// The flag's file exists and is empty: semantically `true`.
    Present,
    /// The flag's file exists and holds a payload (trailing newline
    /// already stripped).
    Payload(String),
}

impl FlagValue {
    pub fn as_bool(&self) -> bool {
        !matches!(self, FlagValue::Absent)
    }

    /// Interpret the payload as an epoch-seconds "assert-from" timestamp.
    pub fn as_epoch(&self) -> Option<i64> {
        match self {
            FlagValue::Payload(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Interpret the payload as a TTL in seconds.
    pub fn as_ttl(&self) -> Option<u32> {
        match self {
            FlagValue::Payload(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            FlagValue::Payload(s) => Some(s),
            _ => None,
        }
    }
}

/// What to write into a flag: the set-side of the store's `{false, true,
/// string}` contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagUpdate {
    Clear,
    Mark,
    Payload(String),
}

impl FlagUpdate {
    pub fn epoch(value: i64) -> Self {
        FlagUpdate::Payload(value.to_string())
    }

    pub fn ttl(value: u32) -> Self {
        FlagUpdate::Payload(value.to_string())
    }

    /// The value this update is expected to produce on a subsequent read,
    /// used for the store's read-after-write check.
    pub fn expected(&self) -> FlagValue {
        match self {
            FlagUpdate::Clear => FlagValue::Absent,
            FlagUpdate::Mark => FlagValue::Present,
            FlagUpdate::Payload(s) => FlagValue::Payload(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_is_false() {
        assert!(!FlagValue::Absent.as_bool());
    }

    #[test]
    fn present_is_true_with_no_payload() {
        assert!(FlagValue::Present.as_bool());
        assert_eq!(FlagValue::Present.payload(), None);
    }

    #[test]
    fn payload_parses_epoch_and_ttl() {
        let v = FlagValue::Payload("86400".to_string());
        assert_eq!(v.as_epoch(), Some(86400));
        assert_eq!(v.as_ttl(), Some(86400));
    }

    #[test]
    fn non_numeric_payload_fails_to_parse_as_epoch() {
        let v = FlagValue::Payload("test failure".to_string());
        assert_eq!(v.as_epoch(), None);
        assert_eq!(v.payload(), Some("test failure"));
    }
}
