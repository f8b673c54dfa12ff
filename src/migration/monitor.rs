//! Background reconciliation of store migrations.

use crate::external::{ChildControllerClient, LeadershipOracle, MetadataStore};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Handle to a running monitor; dropping it without calling [`stop`] leaves
/// the loop running until the runtime shuts down.
///
/// [`stop`]: MonitorHandle::stop
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Watches migration records and finalizes a migration once every child
/// region of the source cluster routes the store to the destination.
///
/// Finalization clones the store record and its schemas into the destination
/// cluster's parent metadata and then flips the discovered cluster. Each pass
/// is idempotent: a migration whose discovery already points at the
/// destination is skipped, and a crash between clone and flip is repaired by
/// the next pass.
pub struct StoreMigrationMonitor {
    metadata: Arc<dyn MetadataStore>,
    oracle: Arc<dyn LeadershipOracle>,
    /// cluster -> region name -> controller client.
    clients: HashMap<String, HashMap<String, Arc<dyn ChildControllerClient>>>,
    clusters: Vec<String>,
    check_interval: Duration,
}

impl StoreMigrationMonitor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        oracle: Arc<dyn LeadershipOracle>,
        clients: HashMap<String, HashMap<String, Arc<dyn ChildControllerClient>>>,
        clusters: Vec<String>,
        check_interval: Duration,
    ) -> Self {
        StoreMigrationMonitor {
            metadata,
            oracle,
            clients,
            clusters,
            check_interval,
        }
    }

    /// Spawn the reconciliation loop.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let monitor = self;
        let task = tokio::spawn(async move {
            let mut ticker = interval(monitor.check_interval);
            // The first tick of a tokio interval fires immediately; skip it
            // so freshly started coordinators settle before reconciling.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.run_once().await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            info!("Store migration monitor stopping");
                            return;
                        }
                    }
                }
            }
        });
        MonitorHandle {
            stop: stop_tx,
            task,
        }
    }

    /// One reconciliation pass over all migration records. Public so tests
    /// can single-step the monitor without timing games.
    pub async fn run_once(&self) {
        let active: Vec<&String> = self
            .clusters
            .iter()
            .filter(|c| self.oracle.is_leader(c))
            .collect();

        for (store_name, intent) in self.metadata.list_migration_intents().await {
            let (Some(source), Some(destination)) =
                (intent.source_cluster.clone(), intent.destination_cluster.clone())
            else {
                continue;
            };
            if intent.discovered_cluster != source {
                // Already flipped, or the record is stale.
                continue;
            }
            if !active.iter().any(|c| **c == destination) {
                // Another coordinator leads the destination cluster.
                continue;
            }
            let Some(regions) = self.clients.get(&source) else {
                continue;
            };
            if regions.is_empty() {
                continue;
            }

            let mut ready = 0usize;
            for (region, client) in regions {
                match client.discover_cluster(&store_name).await {
                    Ok(discovered) if discovered == destination => ready += 1,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            "Migration check for store '{}': discovery query against region '{}' \
                             failed: {}",
                            store_name, region, err
                        );
                    }
                }
            }
            if ready < regions.len() {
                continue;
            }

            self.finalize(&store_name, &source, &destination).await;
        }
    }

    async fn finalize(&self, store_name: &str, source: &str, destination: &str) {
        let Some(store) = self.metadata.get_store(source, store_name).await else {
            error!(
                "Migration of store '{}' cannot finalize: no record in source cluster '{}'",
                store_name, source
            );
            return;
        };
        if self.metadata.get_store(destination, store_name).await.is_none() {
            self.metadata.put_store(destination, store).await;
        }
        let key_schema = self.metadata.key_schema(source, store_name).await;
        let value_schemas = self.metadata.value_schemas(source, store_name).await;
        self.metadata
            .put_schemas(destination, store_name, key_schema, value_schemas)
            .await;
        info!(
            "All regions route store '{}' to '{}', updating parent cluster discovery",
            store_name, destination
        );
        self.metadata
            .update_cluster_discovery(store_name, source, destination)
            .await;
    }
}
