use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, crate_version};
use hickory_resolver::TokioAsyncResolver;
use tracing::{error, info};

use zonewardd::acl::Acl;
use zonewardd::backend::amqp::{AmqpBackend, AmqpBackendConfig};
use zonewardd::backend::shell::{ShellBackend, ShellBackendConfig};
use zonewardd::config::{BackendConfig, Config};
use zonewardd::dns::live::{DnsProbeConfig, LiveDnsProbe};
use zonewardd::handlers::Controller;
use zonewardd::log::Logger;
use zonewardd::metrics::Metrics;
use zonewardd::store::FlagStore;

#[derive(Parser)]
#[command(name = "zonewardd", version = crate_version!())]
struct Args {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, default_value = "/etc/zonewardd/zonewardd.toml")]
    config: Utf8PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("zonewardd couldn't be configured: {err}");
            return ExitCode::FAILURE;
        }
    };

    let logger = match Logger::launch(&config.logging) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("zonewardd couldn't set up logging: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("couldn't start Tokio: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config_path = args.config;
    runtime.block_on(run(config, config_path, logger))
}

async fn run(config: Config, config_path: Utf8PathBuf, logger: &'static Logger) -> ExitCode {
    let flags = match FlagStore::open(config.flag_store_dir.clone()) {
        Ok(flags) => flags,
        Err(err) => {
            error!(%err, "failed to open flag store");
            return ExitCode::FAILURE;
        }
    };

    let acl = match Acl::from_file(&config.acl_path) {
        Ok(acl) => Arc::new(acl),
        Err(err) => {
            error!(%err, "failed to load access-control list");
            return ExitCode::FAILURE;
        }
    };

    spawn_reload_on_sighup(Arc::clone(&acl), config_path, logger);

    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            error!(%err, "failed to set up the system DNS resolver");
            return ExitCode::FAILURE;
        }
    };
    let metrics = Arc::new(Metrics::new());

    let dns = LiveDnsProbe::new(
        DnsProbeConfig {
            opendnssec_addr: config.dns.opendnssec_addr,
            query_timeout: config.dns.query_timeout,
            initial_backoff: config.dns.initial_backoff,
            dns_port: config.dns.dns_port,
        },
        resolver,
    )
    .with_metrics(Arc::clone(&metrics));

    let listen_addr = config.listen_addr;

    match config.backend {
        BackendConfig::Shell { executable } => {
            let backend = ShellBackend::new(ShellBackendConfig::ods_ksmutil(executable.to_string()));
            let controller = Controller::standard(flags, dns, backend, config.assert_signed_deadlock_override)
                .with_metrics(Arc::clone(&metrics));
            serve(listen_addr, controller, acl, metrics).await
        }
        BackendConfig::Amqp {
            broker_uri,
            key_ops_exchange,
            key_ops_routing_key,
            cluster_exchange,
        } => {
            let backend = match AmqpBackend::connect(AmqpBackendConfig {
                broker_uri,
                key_ops_exchange,
                key_ops_routing_key,
                cluster_exchange,
            })
            .await
            {
                Ok(backend) => backend,
                Err(err) => {
                    error!(%err, "failed to connect to the AMQP broker");
                    return ExitCode::FAILURE;
                }
            };

            let cluster_store = Arc::new(flags.clone());
            let cluster_backend = backend.clone();
            tokio::spawn(async move {
                cluster_backend.run_cluster_consumer(cluster_store).await;
            });

            let controller = Controller::standard(flags, dns, backend, config.assert_signed_deadlock_override)
                .with_metrics(Arc::clone(&metrics));
            serve(listen_addr, controller, acl, metrics).await
        }
    }
}

async fn serve<D, B, R, C>(
    listen_addr: std::net::SocketAddr,
    controller: zonewardd::handlers::Controller<D, B, R, C>,
    acl: Arc<Acl>,
    metrics: Arc<Metrics>,
) -> ExitCode
where
    D: zonewardd::dns::DnsProbe + 'static,
    B: zonewardd::backend::Backend + 'static,
    R: zonewardd::local_rules::LocalRules + 'static,
    C: zonewardd::handlers::Clock + 'static,
{
    info!(%listen_addr, "zonewardd starting");
    match zonewardd::httpserver::serve(listen_addr, controller, acl, metrics).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "HTTP server exited");
            ExitCode::FAILURE
        }
    }
}

/// On Unix, reload the ACL and logging level on SIGHUP without a restart
/// both are re-read from the same on-disk config file so
/// an operator edits one file and sends one signal.
#[cfg(unix)]
fn spawn_reload_on_sighup(acl: Arc<Acl>, config_path: Utf8PathBuf, logger: &'static Logger) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(err) => {
                error!(%err, "failed to install SIGHUP handler; reload-on-signal disabled");
                return;
            }
        };

        while sighup.recv().await.is_some() {
            info!("SIGHUP received; reloading ACL and logging configuration");
            match Config::from_file(&config_path) {
                Ok(config) => {
                    if let Err(err) = acl.reload(&config.acl_path) {
                        error!(%err, "ACL reload failed; keeping the previous table");
                    }
                    if let Err(err) = logger.apply(&config.logging) {
                        error!(%err, "logging reload failed; keeping the previous filter");
                    }
                }
                Err(err) => error!(%err, "config reload failed; keeping the previous settings"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_acl: Arc<Acl>, _config_path: Utf8PathBuf, _logger: &'static Logger) {}
