use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tracing::{debug, error, info, warn};

use orka_catalog::{CatalogConfig, CatalogService, MetricsTelemetry, Query, QueryPage, SyncReport};
use orka_core::{CatalogError, HealthStatus};
use orka_kubehub::{KubeAuthorizer, KubeDiscovery, KubeIndexFactory, KubeLister};

#[derive(Parser, Debug)]
#[command(name = "orkactl", version, about = "Orka catalog CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one catalog cycle and print the report and health
    Sync,
    /// Run one cycle, then query the catalog
    Query {
        /// Kind filter: kind, resource, group/kind, group/resource or group/version/resource (repeatable)
        #[arg(long = "kind")]
        kinds: Vec<String>,
        /// Namespace filter; "cluster" selects cluster-scoped objects (repeatable)
        #[arg(long = "ns")]
        namespaces: Vec<String>,
        /// Case-insensitive substring on name, namespace or kind
        #[arg(long = "search", default_value = "")]
        search: String,
        /// Page size (1-1000)
        #[arg(long = "limit")]
        limit: Option<usize>,
        /// Continuation token from a previous page
        #[arg(long = "token")]
        token: Option<String>,
    },
    /// Keep the catalog refreshed until Ctrl-C
    Run,
}

fn init_tracing() {
    let env = std::env::var("ORKA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ORKA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ORKA_METRICS_ADDR; expected host:port");
        }
    }
}

async fn build_service(config: CatalogConfig) -> Result<CatalogService> {
    let client = orka_kubehub::connect().await?;
    let discovery_timeout = config.discovery_timeout;
    CatalogService::builder()
        .config(config)
        .discovery(Arc::new(KubeDiscovery::new(client.clone(), discovery_timeout)))
        .lister(Arc::new(KubeLister::new(client.clone())))
        .evaluator(Arc::new(KubeAuthorizer::new(client.clone())))
        .index_factory(Arc::new(KubeIndexFactory::new(client)))
        .telemetry(Arc::new(MetricsTelemetry))
        .build()
        .context("building catalog service")
}

#[derive(Serialize)]
struct SyncOutput<'a> {
    report: Option<&'a SyncReport>,
    error: Option<String>,
    health: &'a HealthStatus,
}

fn print_sync(output: Output, res: &Result<SyncReport, CatalogError>, health: &HealthStatus) -> Result<()> {
    match output {
        Output::Json => {
            let out = SyncOutput { report: res.as_ref().ok(), error: res.as_ref().err().map(|e| e.to_string()), health };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Output::Human => {
            match res {
                Ok(r) => {
                    let first = r.first_batch_latency.map(|d| format!("{}ms", d.as_millis())).unwrap_or_else(|| "-".into());
                    println!(
                        "synced {} objects across {} resources in {}ms (first batch {}; {} denied)",
                        r.item_count, r.resource_count, r.duration.as_millis(), first, r.denied
                    );
                }
                Err(e) => println!("sync error: {}", e),
            }
            println!(
                "health: {:?} (consecutive failures {}, failed resources {}, stale {})",
                health.state, health.consecutive_failures, health.failed_resource_count, health.stale
            );
        }
    }
    Ok(())
}

fn print_page(output: Output, page: &QueryPage) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(page)?),
        Output::Human => {
            for s in page.items.iter() {
                let ns = if s.namespace.is_empty() { "(cluster)" } else { s.namespace.as_str() };
                let gv = if s.group.is_empty() { s.version.clone() } else { format!("{}/{}", s.group, s.version) };
                println!("{}\t{}\t{}\t{}", gv, s.kind, ns, s.name);
            }
            println!("{} of {} matches across {} resources", page.items.len(), page.total_matches, page.matching_resource_count);
            if !page.next_token.is_empty() {
                println!("next: --token {}", page.next_token);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = CatalogConfig::from_env();

    match cli.command {
        Commands::Sync => {
            let svc = build_service(config).await?;
            let res = svc.sync_once().await;
            if let Err(e) = &res {
                warn!(error = %e, "sync finished with errors");
            }
            print_sync(cli.output, &res, &svc.health())?;
            svc.shutdown();
        }
        Commands::Query { kinds, namespaces, search, limit, token } => {
            let svc = build_service(config).await?;
            match svc.sync_once().await {
                Ok(r) => info!(items = r.item_count, "sync complete"),
                // partial data is still servable
                Err(e @ CatalogError::PartialFailure(_)) => warn!(error = %e, "sync partially failed"),
                Err(e) => {
                    error!(error = %e, "sync failed");
                    eprintln!("sync error: {}", e);
                }
            }
            let page = svc.query(&Query { kinds, namespaces, search, limit, token });
            print_page(cli.output, &page)?;
            svc.shutdown();
        }
        Commands::Run => {
            let svc = build_service(config).await?;
            let mut sub = svc.subscribe_streaming();
            let Some(handle) = svc.start() else {
                anyhow::bail!("catalog is disabled (ORKA_CATALOG_ENABLED)");
            };
            // health is logged by the refresh loop after every cycle
            let reporter = tokio::spawn(async move {
                while let Some(update) = sub.rx.recv().await {
                    if update.ready {
                        info!(items = update.items, chunks = update.chunks, "catalog ready");
                    } else {
                        debug!(items = update.items, "catalog streaming");
                    }
                }
            });
            signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            info!("shutting down");
            svc.shutdown();
            if let Err(e) = handle.await {
                warn!(error = %e, "refresh loop ended abnormally");
            }
            reporter.abort();
            let health = svc.health();
            println!("{} objects cached at shutdown; health {:?}", svc.count(), health.state);
        }
    }
    Ok(())
}
