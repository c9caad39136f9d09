// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use cs_actions::{ActionQueue, ActorRegistry};
use cs_cancel::CancellationHandle;
use cs_config::{load_config, validate_config, ControlServiceConfig};
use cs_consumers::{BucketConsumer, ConfigConsumer, FlagUpdater, TokenConsumer};
use cs_core::kv::{buckets, KvStore};
use cs_core::supervise::Supervised;
use cs_core::{Notification, Signer};
use cs_dedupe::CommandDeduper;
use cs_error::ControlError;
use cs_kv_memory::MemoryKvStore;
use cs_notify::{NotificationConsumer, Notifier};
use cs_registry::ConsumerRegistry;
use cs_reset_guard::{HardwareIdentity, IdentityProbe, ResetGuard, SnapshotContext};
use cs_service::{ControlService, FetchLoopConfig};
use cs_signer::LocalEcdsaSigner;
use cs_transport::{BaseUrl, ControlTransport};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cs-daemon", version, about = "Control service daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "control-service.toml")]
    config: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

/// Stand-in for the osquery one-shot identity probe. The real query shells
/// out to `osqueryi`; this repository treats that binary as an opaque
/// external dependency and only needs to satisfy [`IdentityProbe`]'s
/// contract, so it reads the identifiers from the environment instead.
struct EnvIdentityProbe;

#[async_trait]
impl IdentityProbe for EnvIdentityProbe {
    async fn probe(&self) -> Result<HardwareIdentity, ControlError> {
        Ok(HardwareIdentity {
            hardware_serial: std::env::var("CS_HARDWARE_SERIAL").unwrap_or_default(),
            hardware_uuid: std::env::var("CS_HARDWARE_UUID").unwrap_or_default(),
        })
    }
}

/// Stand-in for the desktop-process notifier IPC, which is out of scope for
/// this repository (interface-only per the external interfaces section).
/// Logs instead of delivering.
struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ControlError> {
        info!(
            target: "control_service.daemon",
            id = %notification.id,
            title = %notification.title,
            "notification delivered (logged, desktop IPC not wired up)"
        );
        Ok(())
    }
}

/// Stand-in for the desktop-process flag-file writer; mirrors config flags
/// into the `agent_flags` bucket instead of writing to disk.
struct KvFlagUpdater {
    kv: Arc<dyn KvStore>,
}

#[async_trait]
impl FlagUpdater for KvFlagUpdater {
    async fn update_flags(&self, flags: BTreeMap<String, String>) -> Result<(), ControlError> {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = flags
            .into_iter()
            .map(|(k, v)| (k.into_bytes(), v.into_bytes()))
            .collect();
        self.kv.bulk_update(buckets::AGENT_FLAGS, &pairs).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("cs=debug,control_service=debug")
    } else {
        EnvFilter::new("cs=info,control_service=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    for warning in validate_config(&config).context("validate config")? {
        warn!(target: "control_service.daemon", %warning, "configuration warning");
    }

    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let root_cancel = CancellationHandle::new();

    run_reset_guard(&config, kv.clone()).await?;

    let transport = Arc::new(build_transport(&config)?);
    let action_queue = Arc::new(build_action_queue(&config, kv.clone()));
    let notification_consumer = Arc::new(build_notification_consumer(&config, kv.clone()));
    let registry = Arc::new(build_registry(kv.clone(), action_queue.clone(), notification_consumer.clone()).await);

    let service = Arc::new(ControlService::new(
        transport,
        registry,
        kv.clone(),
        FetchLoopConfig {
            request_interval: Duration::from_secs(config.request_interval_secs),
            min_acceleration_interval: Duration::from_secs(config.min_acceleration_interval_secs),
        },
        &root_cancel,
    ));

    let cleanup_interval = Duration::from_secs(config.dedupe_sweep_interval_secs);
    let action_cleanup_cancel = root_cancel.child();
    let notify_cleanup_cancel = root_cancel.child();

    let service_task = {
        let service = service.clone();
        tokio::spawn(async move { service.execute().await })
    };
    let action_cleanup_task = tokio::spawn(async move {
        action_queue.run_cleanup(action_cleanup_cancel, cleanup_interval).await;
    });
    let notify_cleanup_task = tokio::spawn(async move {
        notification_consumer
            .run_cleanup(notify_cleanup_cancel, cleanup_interval)
            .await;
    });

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!(target: "control_service.daemon", "shutdown signal received");
    service.interrupt(None);
    root_cancel.cancel();

    let shutdown_budget = Duration::from_secs(config.shutdown_budget_secs);
    if tokio::time::timeout(shutdown_budget, async {
        let _ = service_task.await;
        let _ = action_cleanup_task.await;
        let _ = notify_cleanup_task.await;
    })
    .await
    .is_err()
    {
        warn!(target: "control_service.daemon", "components did not drain within the shutdown budget");
    }

    Ok(())
}

async fn run_reset_guard(config: &ControlServiceConfig, kv: Arc<dyn KvStore>) -> Result<()> {
    let guard = ResetGuard::new(kv);
    let enrollment_jwt = config
        .enrollment_secret
        .resolve()
        .context("resolve enrollment secret")?;
    let reset = guard
        .run(
            &EnvIdentityProbe,
            Duration::from_secs(config.identity_probe_timeout_secs),
            &enrollment_jwt,
            SnapshotContext::default(),
        )
        .await
        .context("run database-reset guard")?;
    if reset {
        warn!(target: "control_service.daemon", "local database was reset due to hardware/tenant drift");
    }
    Ok(())
}

fn build_transport(config: &ControlServiceConfig) -> Result<ControlTransport> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("build http client")?;
    let base_url = BaseUrl::new(config.scheme(), &config.base_url);
    let local_signer: Arc<dyn Signer> = Arc::new(LocalEcdsaSigner::generate());
    Ok(ControlTransport::new(client, base_url, Some(local_signer), None))
}

async fn build_registry(
    kv: Arc<dyn KvStore>,
    action_queue: Arc<ActionQueue>,
    notification_consumer: Arc<NotificationConsumer<LoggingNotifier>>,
) -> ConsumerRegistry {
    let registry = ConsumerRegistry::new();
    registry
        .register_consumer("actions", action_queue)
        .await
        .expect("actions consumer registers once at startup");
    registry
        .register_consumer("desktop_notifier", notification_consumer)
        .await
        .expect("desktop_notifier consumer registers once at startup");
    registry
        .register_consumer("desktop", Arc::new(BucketConsumer::new(kv.clone(), buckets::AGENT_FLAGS)))
        .await
        .expect("desktop consumer registers once at startup");
    registry
        .register_consumer("config", Arc::new(ConfigConsumer::new(KvFlagUpdater { kv: kv.clone() })))
        .await
        .expect("config consumer registers once at startup");
    registry
        .register_consumer("ingest", Arc::new(TokenConsumer::new(kv.clone(), buckets::TOKEN_STORE)))
        .await
        .expect("ingest consumer registers once at startup");
    for (subsystem, bucket) in [
        ("initial_results", buckets::INITIAL_RESULTS),
        ("result_logs", buckets::RESULT_LOGS),
        ("osquery_instance_history", buckets::OSQUERY_INSTANCE_HISTORY),
        ("status_logs", buckets::STATUS_LOGS),
        ("server_provided_data", buckets::SERVER_PROVIDED_DATA),
    ] {
        registry
            .register_consumer(subsystem, Arc::new(BucketConsumer::new(kv.clone(), bucket)))
            .await
            .expect("bucket consumer registers once at startup");
    }
    registry
}

fn build_action_queue(config: &ControlServiceConfig, kv: Arc<dyn KvStore>) -> ActionQueue {
    ActionQueue::new(
        kv,
        buckets::CONTROL_SERVER_ACTIONS,
        Some(buckets::SENT_NOTIFICATIONS),
        chrono::Duration::seconds(config.command_retention_secs as i64),
        ActorRegistry::new(),
    )
}

fn build_notification_consumer(
    config: &ControlServiceConfig,
    kv: Arc<dyn KvStore>,
) -> NotificationConsumer<LoggingNotifier> {
    let deduper = CommandDeduper::new(
        kv,
        buckets::SENT_NOTIFICATIONS,
        chrono::Duration::seconds(config.notification_retention_secs as i64),
    );
    NotificationConsumer::new(LoggingNotifier, deduper)
}
