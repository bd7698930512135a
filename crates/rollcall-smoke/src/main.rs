//! Rollcall smoke harness.
//!
//! Brings up the offline cache worker against a live origin and exercises
//! one full cycle:
//! - start (resume from the cache snapshot, or install the seed list)
//! - fetch every seed URL through the controlling worker
//! - optionally install a newer generation and apply the update
//! - optionally deliver a push message
//! - persist the cache snapshot
//!
//! A JSON report is printed to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_common::{init_logging, LogConfig, LogFormat, RollcallError};
use rollcall_core::OfflineConfig;
use rollcall_net::{LoaderConfig, Request, ResourceLoader};
use rollcall_pwa::{ChannelPlatform, InstallUpdateHook, PageContainer};
use rollcall_sw::{CacheStorage, ServiceWorkerRegistration, WorkerConfig, WorkerContext};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rollcall-smoke")]
#[command(about = "Offline cache worker smoke test against a live origin")]
struct Args {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// App origin (overrides config and ROLLCALL_ORIGIN)
    #[arg(long)]
    origin: Option<String>,

    /// Cache version to start with
    #[arg(long)]
    cache_version: Option<String>,

    /// Install this cache version after the first pass and apply the update
    #[arg(long)]
    update_to: Option<String>,

    /// Push payload (JSON) to deliver after fetching
    #[arg(long)]
    push: Option<String>,

    /// Snapshot file (defaults to the configured cache directory)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Do not read or write the cache snapshot
    #[arg(long)]
    no_snapshot: bool,

    /// Log format: pretty, compact or json (overrides config)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize, Default)]
struct SmokeReport {
    status: String,
    origin: String,
    generation: Option<String>,
    resumed: bool,
    fetches: Vec<FetchRecord>,
    update: Option<UpdateRecord>,
    notification: Option<String>,
    caches: Vec<CacheRecord>,
    snapshot_path: Option<String>,
    elapsed_ms: u128,
    error: Option<String>,
    error_category: Option<&'static str>,
    retryable: Option<bool>,
}

#[derive(Serialize)]
struct FetchRecord {
    url: String,
    status: u16,
    bytes: usize,
    error: Option<String>,
}

#[derive(Serialize)]
struct UpdateRecord {
    generation: String,
    update_detected: bool,
    applied: bool,
}

#[derive(Serialize)]
struct CacheRecord {
    name: String,
    entries: usize,
    bytes: usize,
}

fn load_config(args: &Args) -> Result<OfflineConfig> {
    let mut config = match &args.config {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OfflineConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(origin) = &args.origin {
        config.app.origin = origin.clone();
    }
    if let Some(version) = &args.cache_version {
        config.cache.version = version.clone();
    }
    config.validate()?;
    Ok(config)
}

fn log_config(config: &OfflineConfig, args: &Args) -> LogConfig {
    let base = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default().with_level_name(&config.logging.level)
    };
    let format = args
        .log_format
        .unwrap_or_else(|| config.logging.format.parse().unwrap_or_default());
    let base = base.with_format(format);
    match &config.logging.filter {
        Some(filter) => base.with_filter(filter.clone()),
        None => base,
    }
}

async fn run(args: &Args, config: OfflineConfig, report: &mut SmokeReport) -> Result<()> {
    let origin = config.origin()?;
    report.origin = origin.to_string();

    let loader = ResourceLoader::new(LoaderConfig {
        user_agent: config.net.user_agent.clone(),
        default_timeout: Duration::from_secs(config.net.timeout_secs),
        origin: Some(origin.clone()),
        ..Default::default()
    })
    .map_err(|e| RollcallError::network_with_source("building HTTP client", e))?;

    let snapshot = if args.no_snapshot {
        None
    } else {
        Some(args.snapshot.clone().unwrap_or_else(|| config.snapshot_path()))
    };
    let storage = match &snapshot {
        Some(path) => CacheStorage::load_snapshot(path, config.cache.quota_bytes)
            .await
            .map_err(RollcallError::from)?,
        None => CacheStorage::with_quota(config.cache.quota_bytes),
    };

    let worker_config = WorkerConfig::from_config(&config)?;
    report.resumed = storage.has(&worker_config.generation);

    let registration = Arc::new(ServiceWorkerRegistration::new(
        origin,
        WorkerContext::with_storage(Arc::new(loader), storage),
    ));
    let worker = registration
        .start(worker_config.clone())
        .await
        .map_err(RollcallError::from)?;
    report.generation = Some(worker.generation().to_string());
    info!(generation = %worker.generation(), resumed = report.resumed, "Worker active");

    let page = registration.add_client(worker_config.start_url.clone()).await;
    let platform = Arc::new(ChannelPlatform::new());
    let container = Arc::new(PageContainer::new(registration.clone(), page));
    let _forwarding = container.forward_to(platform.clone());
    let (hook, _events) = InstallUpdateHook::mount(platform.as_ref(), container).await;

    for url in &worker_config.seed {
        let record = match registration.fetch(page, Request::get(url.clone())).await {
            Ok(response) => FetchRecord {
                url: url.to_string(),
                status: response.status_code(),
                bytes: response.body().len(),
                error: None,
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Fetch failed");
                FetchRecord {
                    url: url.to_string(),
                    status: 0,
                    bytes: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        report.fetches.push(record);
    }

    if let Some(version) = &args.update_to {
        let mut next = config.clone();
        next.cache.version = version.clone();
        let next = WorkerConfig::from_config(&next)?;
        let generation = next.generation.clone();
        registration
            .install_generation(next)
            .await
            .map_err(RollcallError::from)?;

        let mut available = hook.watch_update_available();
        let update_detected =
            tokio::time::timeout(Duration::from_secs(5), available.wait_for(|v| *v))
                .await
                .is_ok();
        if update_detected {
            hook.apply_update().await;
        }
        report.update = Some(UpdateRecord {
            generation,
            update_detected,
            applied: update_detected && !hook.is_update_available(),
        });
    }

    if let Some(payload) = &args.push {
        let notification = registration
            .push(Some(payload.as_bytes()))
            .await
            .map_err(RollcallError::from)?;
        report.notification = Some(notification.title);
    }

    registration.wait_until_idle().await;

    {
        let caches = registration.context().caches.read().await;
        for name in caches.keys() {
            if let Some(cache) = caches.get(&name) {
                report.caches.push(CacheRecord {
                    entries: cache.len(),
                    bytes: cache.size_bytes(),
                    name,
                });
            }
        }
    }

    if let Some(path) = snapshot {
        registration
            .save_snapshot(&path)
            .await
            .map_err(RollcallError::from)?;
        report.snapshot_path = Some(path.display().to_string());
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let started = Instant::now();
    let mut report = SmokeReport::default();

    let result = match load_config(&args) {
        Ok(config) => {
            init_logging(log_config(&config, &args));
            run(&args, config, &mut report).await
        }
        Err(e) => Err(e),
    };

    report.elapsed_ms = started.elapsed().as_millis();
    match result {
        Ok(()) => report.status = "ok".to_string(),
        Err(e) => {
            error!(error = %e, "Smoke run failed");
            report.status = "error".to_string();
            report.error = Some(format!("{:#}", e));
            if let Some(err) = e.chain().find_map(|c| c.downcast_ref::<RollcallError>()) {
                report.error_category = Some(err.category());
                report.retryable = Some(err.is_retryable());
            }
        }
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize report: {}", e),
    }

    if report.status != "ok" {
        std::process::exit(1);
    }
}
