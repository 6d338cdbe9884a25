//! The live [`DnsProbe`] implementation: resolves name servers via the
//! local system resolver, then sends raw EDNS0 DNSSEC-OK queries directly
//! to each server address with exponential backoff, mirroring the
//! collective-query algorithm this component is grounded on.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::{Message, MessageBuilder, Name, ParsedName, Ttl};
use domain::rdata::{AllRecordData, Soa};
use hickory_resolver::TokioAsyncResolver;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::Metrics;

use super::{DnsProbe, FALLBACK_TTL, Party, Quorum, Scope, combine};

/// Configuration for the live probe.
#[derive(Clone, Debug)]
pub struct DnsProbeConfig {
    /// Address of the locally configured signer output, used for
    /// `Party::OpenDnssec`.
    pub opendnssec_addr: SocketAddr,
    /// Overall timeout budget for one collective query.
    pub query_timeout: Duration,
    /// Initial backoff between per-server retries; doubles each attempt.
    pub initial_backoff: Duration,
    /// UDP port used when querying authoritative/parent name servers
    /// (almost always 53).
    pub dns_port: u16,
}

impl Default for DnsProbeConfig {
    fn default() -> Self {
        DnsProbeConfig {
            opendnssec_addr: "127.0.0.1:53".parse().unwrap(),
            query_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(100),
            dns_port: 53,
        }
    }
}

pub struct LiveDnsProbe {
    config: DnsProbeConfig,
    resolver: TokioAsyncResolver,
    metrics: Option<Arc<Metrics>>,
}

impl LiveDnsProbe {
    pub fn new(config: DnsProbeConfig, resolver: TokioAsyncResolver) -> Self {
        LiveDnsProbe { config, resolver, metrics: None }
    }

    /// Attach a metrics registry: every query issued from this point on
    /// is counted by publisher party and RR type.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn party_label(party: Party) -> &'static str {
        match party {
            Party::OpenDnssec => "opendnssec",
            Party::Authoritatives => "authoritatives",
            Party::Parents => "parents",
        }
    }

    /// Build the list of name servers to query for `party`, each with its
    /// own resolved address list, or `None` if the party can't be resolved
    /// for this zone (e.g. no parent label for `Parents`). Each inner `Vec`
    /// is the address family fan-out for a *single* NS, retried against as
    /// one unit; the outer `Vec` is one entry per distinct NS.
    async fn server_addrs(&self, zone: &str, party: Party) -> Option<Vec<Vec<SocketAddr>>> {
        match party {
            Party::OpenDnssec => Some(vec![vec![self.config.opendnssec_addr]]),
            Party::Authoritatives => self.ns_addrs(zone).await,
            Party::Parents => {
                let (_, parent) = zone.split_once('.')?;
                self.ns_addrs(parent).await
            }
        }
    }

    /// Resolve `name`'s NS RRset, then each NS's own addresses, keeping
    /// each NS's addresses grouped separately so callers can treat every
    /// NS as one independent vote.
    async fn ns_addrs(&self, name: &str) -> Option<Vec<Vec<SocketAddr>>> {
        let ns_names = match self.resolver.ns_lookup(name).await {
            Ok(lookup) => lookup.iter().map(|ns| ns.0.to_utf8()).collect::<Vec<_>>(),
            Err(err) => {
                warn!(zone = name, %err, "NS lookup failed");
                return None;
            }
        };
        let mut groups = Vec::new();
        for ns in ns_names {
            match self.resolver.lookup_ip(ns.as_str()).await {
                Ok(lookup) => {
                    let addrs: Vec<SocketAddr> = lookup
                        .iter()
                        .map(|ip: IpAddr| SocketAddr::new(ip, self.config.dns_port))
                        .collect();
                    if !addrs.is_empty() {
                        groups.push(addrs);
                    }
                }
                Err(err) => {
                    // NXDOMAIN on one address family is tolerated; the
                    // other family may still resolve.
                    debug!(%ns, %err, "address lookup failed for name server");
                }
            }
        }
        if groups.is_empty() { None } else { Some(groups) }
    }

    /// Send the query to each address in turn, with exponential backoff,
    /// until NOERROR, a final NXDOMAIN, or the overall timeout.
    async fn query_one_round(
        &self,
        qname: &Name<Bytes>,
        rtype: Rtype,
        addrs: &[SocketAddr],
    ) -> Option<Message<Bytes>> {
        let deadline = Instant::now() + self.config.query_timeout;
        let mut backoff = self.config.initial_backoff;
        loop {
            for addr in addrs {
                if Instant::now() >= deadline {
                    return None;
                }
                match send_query(*addr, qname, rtype, self.config.query_timeout).await {
                    Ok(msg) => match msg.header().rcode() {
                        Rcode::NOERROR => return Some(msg),
                        Rcode::NXDOMAIN => return Some(msg),
                        Rcode::YXDOMAIN => {
                            warn!(%addr, "YXDOMAIN is a fatal DNS probe response");
                            return None;
                        }
                        other => {
                            debug!(%addr, ?other, "non-terminal rcode, will retry");
                        }
                    },
                    Err(err) => {
                        debug!(%addr, %err, "query attempt failed");
                    }
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())))
                .await;
            backoff *= 2;
        }
    }

    /// Query `rtype` against every NS of `party`, returning one summary per
    /// individual NS (`None` for an NS that never answered in time). Each
    /// NS's own addresses are tried as a unit (for address-family
    /// fallback); the per-NS results are kept separate so callers can
    /// apply ALL/SOME/NONE quorum logic across the actual set of servers.
    async fn collective_query(
        &self,
        zone: &str,
        rtype: Rtype,
        party: Party,
    ) -> Option<Vec<Option<AnswerSummary>>> {
        if let Some(metrics) = &self.metrics {
            metrics.record_dns_query(Self::party_label(party), &format!("{rtype:?}"));
        }
        let groups = self.server_addrs(zone, party).await?;
        let qname: Name<Bytes> = Name::bytes_from_str(&format!("{zone}.")).ok()?;
        let mut results = Vec::with_capacity(groups.len());
        for addrs in &groups {
            let answer = self.query_one_round(&qname, rtype, addrs).await;
            results.push(answer.map(|msg| summarize(&msg, rtype)));
        }
        Some(results)
    }
}

/// What was extracted from one server's answer.
#[derive(Clone, Debug, Default)]
struct AnswerSummary {
    rrset_len: usize,
    rrsig_len: usize,
    max_ttl: u32,
    soa_min_ttl: Option<u32>,
}

fn summarize(msg: &Message<Bytes>, rtype: Rtype) -> AnswerSummary {
    let mut summary = AnswerSummary::default();
    let Ok(answer) = msg.answer() else {
        return summary;
    };
    for record in answer.flatten() {
        if record.rtype() == rtype {
            summary.rrset_len += 1;
            summary.max_ttl = summary.max_ttl.max(record.ttl().as_secs());
            if rtype == Rtype::SOA {
                if let Ok(Some(parsed)) = record.into_any_record::<AllRecordData<_, ParsedName<_>>>() {
                    if let AllRecordData::Soa(soa) = parsed.data() {
                        let ttl = record.ttl().as_secs();
                        summary.soa_min_ttl =
                            Some(ttl.min(soa_minimum(soa)));
                    }
                }
            }
        } else if record.rtype() == Rtype::RRSIG {
            summary.rrsig_len += 1;
        }
    }
    summary
}

fn soa_minimum(soa: &Soa<ParsedName<Bytes>>) -> u32 {
    soa.minimum().into_int()
}

async fn send_query(
    addr: SocketAddr,
    qname: &Name<Bytes>,
    rtype: Rtype,
    timeout: Duration,
) -> std::io::Result<Message<Bytes>> {
    let bind_addr: SocketAddr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" }.parse().unwrap();
    let sock = UdpSocket::bind(bind_addr).await?;
    sock.connect(addr).await?;

    let req = build_query(qname, rtype);
    sock.send(&req).await?;

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(timeout, sock.recv(&mut buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "DNS query timed out"))??;
    buf.truncate(n);
    Message::from_octets(Bytes::from(buf))
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed DNS response"))
}

/// Build a raw EDNS0 DNSSEC-OK query for `qname`/`rtype` with a 4096-byte
/// UDP payload advertisement.
fn build_query(qname: &Name<Bytes>, rtype: Rtype) -> Vec<u8> {
    let mut builder = MessageBuilder::new_vec();
    builder.header_mut().set_rd(true);
    builder.header_mut().set_random_id();
    let mut builder = builder.question();
    builder.push((qname, rtype, Class::IN)).expect("question fits in a fresh message");
    let mut builder = builder.additional();
    builder
        .opt(|opt| {
            opt.set_udp_payload_size(4096);
            opt.set_dnssec_ok(true);
            Ok(())
        })
        .expect("opt record fits in a fresh message");
    builder.finish()
}

impl DnsProbe for LiveDnsProbe {
    fn test_for_signed_dnskey(
        &self,
        zone: &str,
        scope: Scope,
    ) -> impl Future<Output = Option<bool>> + Send {
        let zone = zone.to_string();
        async move {
            let rounds = self.collective_query(&zone, Rtype::DNSKEY, scope.party).await?;
            let bits: Vec<Option<bool>> = rounds
                .iter()
                .map(|r| r.as_ref().map(|s| s.rrset_len > 0 && s.rrsig_len > 0))
                .collect();
            combine(&bits, scope.quorum)
        }
    }

    fn dnskey_ttl(&self, zone: &str, scope: Scope) -> impl Future<Output = Option<u32>> + Send {
        let zone = zone.to_string();
        async move {
            let rounds = self.collective_query(&zone, Rtype::DNSKEY, scope.party).await?;
            rounds
                .iter()
                .map(|r| r.as_ref().map(|s| s.max_ttl).unwrap_or(FALLBACK_TTL))
                .max()
        }
    }

    fn have_ds(&self, zone: &str, scope: Scope) -> impl Future<Output = Option<bool>> + Send {
        let zone = zone.to_string();
        async move {
            let rounds = self.collective_query(&zone, Rtype::DS, scope.party).await?;
            let bits: Vec<Option<bool>> = rounds
                .iter()
                .map(|r| r.as_ref().map(|s| s.rrset_len > 0 && s.rrsig_len > 0))
                .collect();
            combine(&bits, scope.quorum)
        }
    }

    fn ds_ttl(&self, zone: &str) -> impl Future<Output = Option<u32>> + Send {
        let zone = zone.to_string();
        async move {
            let rounds = self
                .collective_query(&zone, Rtype::DS, Party::Parents)
                .await?;
            rounds
                .iter()
                .map(|r| r.as_ref().map(|s| s.max_ttl).unwrap_or(FALLBACK_TTL))
                .max()
        }
    }

    fn negative_caching_ttl(&self, zone: &str, scope: Scope) -> impl Future<Output = u32> + Send {
        let zone = zone.to_string();
        async move {
            let Some(rounds) = self.collective_query(&zone, Rtype::SOA, scope.party).await else {
                return FALLBACK_TTL;
            };
            let values: Vec<u32> = rounds
                .iter()
                .filter_map(|r| r.as_ref().and_then(|s| s.soa_min_ttl))
                .collect();
            if values.is_empty() {
                FALLBACK_TTL
            } else {
                values.into_iter().max().unwrap()
            }
        }
    }
}

