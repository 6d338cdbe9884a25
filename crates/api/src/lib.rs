//! Wire-format types shared between `zonewardd` and its clients.
//!
//! These mirror the JSON shapes described by the command-envelope external
//! interface: a request naming a command and a batch of zones, and a
//! response classifying each zone into one of four outcome categories (or
//! `null` when the envelope itself is rejected).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A command envelope submitted to the daemon's HTTP endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommandEnvelope {
    pub command: String,
    pub zones: Vec<String>,
}

/// The four outcome categories a zone can be classified into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Error,
    Invalid,
    Badstate,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Error => "error",
            Outcome::Invalid => "invalid",
            Outcome::Badstate => "badstate",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classified response to a dispatched command: a map from outcome
/// category to the (lowercased) zones that landed in it, omitting empty
/// categories. `None` stands for the JSON `null` returned for an unknown
/// command or an ACL denial.
pub type DispatchResult = Option<BTreeMap<Outcome, Vec<String>>>;
