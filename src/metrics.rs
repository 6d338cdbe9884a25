//! Metrics: a small Prometheus registry scraped over the HTTP
//! surface alongside the command endpoint.
//!
//! Relevant sources for selecting metrics, metric names, and labels:
//! - <https://prometheus.io/docs/practices/naming/>
//! - <https://prometheus.io/docs/instrumenting/writing_exporters/#labels>
//! - <https://prometheus.io/docs/practices/instrumentation/>

use std::fmt;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use zoneward_api::{DispatchResult, Outcome};

const PROMETHEUS_PREFIX: &str = "zonewardd";

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelValue)]
enum MetricOutcome {
    Ok,
    Error,
    Invalid,
    Badstate,
}

impl From<Outcome> for MetricOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok => MetricOutcome::Ok,
            Outcome::Error => MetricOutcome::Error,
            Outcome::Invalid => MetricOutcome::Invalid,
            Outcome::Badstate => MetricOutcome::Badstate,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CommandOutcomeLabels {
    command: String,
    outcome: MetricOutcome,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DnsQueryLabels {
    party: String,
    rtype: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CountdownLabels {
    zone: String,
    flag: String,
}

/// The daemon's metrics registry: one counter family classifying every
/// zone dispatched, a counter for whole envelopes rejected before any
/// zone was even looked at (unknown command or ACL denial), a
/// counter for DNS Probe queries issued, and a gauge tracking which
/// zones currently have a TTL countdown in progress.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    commands_total: Family<CommandOutcomeLabels, Counter>,
    envelopes_rejected_total: Counter,
    dns_queries_total: Family<DnsQueryLabels, Counter>,
    countdowns_active: Family<CountdownLabels, Gauge>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(PROMETHEUS_PREFIX);
        let commands_total = Family::<CommandOutcomeLabels, Counter>::default();
        let envelopes_rejected_total = Counter::default();
        let dns_queries_total = Family::<DnsQueryLabels, Counter>::default();
        let countdowns_active = Family::<CountdownLabels, Gauge>::default();

        registry.register(
            "commands",
            "Zones dispatched, labeled by command and outcome",
            commands_total.clone(),
        );
        registry.register(
            "envelopes_rejected",
            "Command envelopes rejected before any zone was dispatched (unknown command or ACL denial)",
            envelopes_rejected_total.clone(),
        );
        registry.register(
            "dns_queries",
            "DNS Probe queries issued, labeled by publisher party and RR type",
            dns_queries_total.clone(),
        );
        registry.register(
            "countdowns_active",
            "Whether a zone currently has a TTL countdown in progress, labeled by zone and flag",
            countdowns_active.clone(),
        );

        Metrics {
            registry,
            commands_total,
            envelopes_rejected_total,
            dns_queries_total,
            countdowns_active,
        }
    }

    /// Record one DNS Probe query issued against `party` for `rtype`.
    pub fn record_dns_query(&self, party: &str, rtype: &str) {
        self.dns_queries_total
            .get_or_create(&DnsQueryLabels {
                party: party.to_string(),
                rtype: rtype.to_string(),
            })
            .inc();
    }

    /// Mark whether `zone`'s `flag` countdown is currently in progress.
    pub fn set_countdown_active(&self, zone: &str, flag: &str, active: bool) {
        self.countdowns_active
            .get_or_create(&CountdownLabels {
                zone: zone.to_string(),
                flag: flag.to_string(),
            })
            .set(if active { 1 } else { 0 });
    }

    /// Record the outcome of one dispatch call.
    pub fn record(&self, command: &str, result: &DispatchResult) {
        match result {
            None => {
                self.envelopes_rejected_total.inc();
            }
            Some(grouped) => {
                for (outcome, zones) in grouped {
                    self.commands_total
                        .get_or_create(&CommandOutcomeLabels {
                            command: command.to_string(),
                            outcome: (*outcome).into(),
                        })
                        .inc_by(zones.len() as u64);
                }
            }
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
