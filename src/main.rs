//! fuse-gate — entry point (spec §2, §6).
//!
//! Start-up sequence:
//!   1. Parse `Config` from environment variables (see src/config.rs).
//!   2. Initialise structured logging.
//!   3. Build the backend pool and load the rule registry.
//!   4. Wire the telemetry store, bounded write/alarm queues and their
//!      worker pools, and (if enabled) the device rate limiter.
//!   5. Spawn the periodic expiry sweeper.
//!   6. Serve the localhost-only admin endpoint forever.
//!
//! Integrating `middleware::FuseGate::before_upstream` /
//! `after_upstream` into an actual reverse proxy's request hooks is the
//! proxy's job (§1 Non-goals) — this binary only assembles and runs the
//! engine.

use fuse_gate::alarm::AlarmDispatcher;
use fuse_gate::backend::BackendPool;
use fuse_gate::device_limiter::DeviceLimiter;
use fuse_gate::middleware::FuseGate;
use fuse_gate::rules::RuleRegistry;
use fuse_gate::telemetry::TelemetryStore;
use fuse_gate::time::TimeSource;
use fuse_gate::{admin, config, queue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = config::Config::from_env()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .compact()
        .init();

    info!(
        "fuse-gate v{} starting (rule_dir={}, expired_seconds={})",
        env!("CARGO_PKG_VERSION"),
        config.rule_dir,
        config.expired_seconds,
    );

    let backend = BackendPool::new(&config)?;
    let time_source = TimeSource::default();
    let rules = Arc::new(RuleRegistry::load(&config.rule_dir)?);
    let telemetry = TelemetryStore::new(backend.clone(), time_source, config.expired_seconds);

    let write_queue = queue::WorkQueue::new("telemetry-write", config.write_queue_capacity);
    {
        let telemetry = telemetry.clone();
        queue::spawn_workers(write_queue.clone(), config.write_workers, move |job| {
            let telemetry = telemetry.clone();
            async move { telemetry.perform_write(&job).await }
        });
    }

    let alarm_queue = queue::WorkQueue::new("alarm-dispatch", config.alarm_queue_capacity);
    {
        let dispatcher = AlarmDispatcher::new(config.alarm_url.clone(), config.alarm_timeout_ms);
        queue::spawn_workers(alarm_queue.clone(), config.alarm_workers, move |job| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(job).await }
        });
    }

    let device_limiter = config
        .rate_limiter_enabled
        .then(|| DeviceLimiter::new(backend.clone(), time_source));

    let admin_state = admin::AdminState::new(
        Arc::new(telemetry.clone()),
        write_queue.clone(),
        alarm_queue.clone(),
    );

    let sweeper_device_limiter = device_limiter.clone();

    let gate = FuseGate::new(
        rules.clone(),
        telemetry.clone(),
        write_queue,
        alarm_queue,
        device_limiter,
    );
    // `gate` is the integration point a reverse proxy wires into its
    // request hooks; this binary only needs it constructed and alive so the
    // wiring above is exercised, since driving actual HTTP traffic is out
    // of scope here.
    let _ = &gate;

    let sweep_interval = Duration::from_secs(
        (config.expired_seconds / config.sweep_interval_divisor.max(1)).max(1),
    );
    let sweeper_telemetry = telemetry.clone();
    let sweeper_expired_seconds = config.expired_seconds;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let log = sweeper_telemetry.sweep().await;
            info!("[sweeper] {log}");
            if let Some(limiter) = &sweeper_device_limiter {
                let log = limiter.sweep(sweeper_expired_seconds).await;
                info!("[sweeper] {log}");
            }
        }
    });

    if let Err(e) = admin::run(admin_state, config.admin_port).await {
        error!("[admin] server exited: {e}");
    }

    Ok(())
}
