use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use api_types::NodeAllocationStateSpec;
use api_types::NodeAllocationStateStatus;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonArgs;
use crate::config::MigProfileTable;
use crate::domain::DeviceState;
use crate::infrastructure::k8s::NodeAllocationStateClient;
use crate::infrastructure::kube_client::init_kube_client;
use crate::infrastructure::NvmlEnumerator;
use crate::infrastructure::SpecDirRegistry;

pub type NodeDeviceState = DeviceState<NvmlEnumerator, SpecDirRegistry>;

/// Owns the device state engine and keeps the node's NodeAllocationState in
/// step with it.
pub struct Application {
    args: DaemonArgs,
    state: Arc<NodeDeviceState>,
    nas: Arc<NodeAllocationStateClient>,
    cancellation_token: CancellationToken,
}

impl Application {
    /// Fetch the node's record, enumerate devices and restore allocations
    pub async fn build(args: DaemonArgs) -> Result<Self> {
        let profiles = MigProfileTable::load(args.mig_profiles_path.as_deref()).await?;

        let client = init_kube_client(args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let nas = NodeAllocationStateClient::new(client, &args.namespace, &args.node_name);
        let record = nas
            .get_or_create()
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;

        let cdi_roots = args.cdi_root.clone();
        let state = tokio::task::spawn_blocking(move || -> Result<NodeDeviceState> {
            let enumerator = NvmlEnumerator::new(profiles)?;
            let cdi = SpecDirRegistry::new(cdi_roots);
            Ok(DeviceState::new(enumerator, cdi, &record.spec)?)
        })
        .await
        .context("device state initialization task failed")?
        .context("unable to create device state")?;

        Ok(Self {
            args,
            state: Arc::new(state),
            nas: Arc::new(nas),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Publish on every sync tick until a shutdown signal arrives, then mark
    /// the record `NotReady`.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            node = %self.args.node_name,
            namespace = %self.args.namespace,
            "Starting NodeAllocationState sync"
        );

        let mut sync_task = self.spawn_sync_task();
        let signal_handler = shutdown_signal()?;

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, stopping sync");
                self.cancellation_token.cancel();
                if tokio::time::timeout(Duration::from_secs(30), &mut sync_task).await.is_err() {
                    tracing::warn!("Sync task shutdown timed out");
                }
            }
            result = &mut sync_task => {
                if let Err(e) = result {
                    tracing::error!("Sync task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Sync task completed unexpectedly");
            }
        }

        self.publish(NodeAllocationStateStatus::NotReady).await
    }

    fn spawn_sync_task(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let nas = self.nas.clone();
        let token = self.cancellation_token.clone();
        let sync_interval = self.args.sync_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Sync task completed");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = publish(&state, &nas, NodeAllocationStateStatus::Ready).await {
                            tracing::error!("Failed to publish NodeAllocationState: {e:?}");
                        }
                    }
                }
            }
        })
    }

    async fn publish(&self, status: NodeAllocationStateStatus) -> Result<()> {
        publish(&self.state, &self.nas, status).await
    }
}

async fn publish(
    state: &NodeDeviceState,
    nas: &NodeAllocationStateClient,
    status: NodeAllocationStateStatus,
) -> Result<()> {
    let spec = state.updated_spec(&NodeAllocationStateSpec::default());
    nas.publish(&spec, status)
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    tracing::debug!(name = %nas.name(), %status, "NodeAllocationState synced");
    Ok(())
}

fn shutdown_signal() -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }))
    }
    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {e}");
                return;
            }
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }))
    }
}
