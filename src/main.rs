use admiral::admin::ParentAdmin;
use admiral::config::CoordinatorConfig;
use admiral::external::memory::{
    FixedLeadershipOracle, InMemoryConsumptionTracker, InMemoryLog, InMemoryMetadataStore,
    ScriptedChildController,
};
use admiral::external::{ChildControllerClient, JobStatusReport};
use admiral::status::ExecutionStatus;
use admiral::store::PushType;
use admiral::topics::naming;
use clap::Parser;
use log::{error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;

/// Demo coordinator wired to in-memory collaborators. It walks through the
/// full admin flow: store creation, a batch push, status aggregation and
/// retention cleanup.
#[derive(Parser, Debug)]
#[command(name = "admiral")]
#[command(about = "Parent coordinator for a multi-region derived-data store", long_about = None)]
struct Args {
    /// Cluster to manage
    #[arg(short, long, default_value = "cluster-0")]
    cluster: String,

    /// Child region names (e.g. east,west,eu)
    #[arg(short, long, value_delimiter = ',', default_value = "east,west")]
    regions: Vec<String>,

    /// Store created by the demo flow
    #[arg(short, long, default_value = "demo_store")]
    store: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    // Wire the in-memory collaborators: the log acks and applies admin
    // commands synchronously, emulating regions that keep up.
    let tracker = Arc::new(InMemoryConsumptionTracker::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let log = Arc::new(InMemoryLog::with_consumer(
        tracker.clone(),
        Some(metadata.clone()),
    ));
    let oracle = Arc::new(FixedLeadershipOracle::leading(&[args.cluster.as_str()]));

    let mut region_clients = Vec::new();
    let mut region_map: HashMap<String, Arc<dyn ChildControllerClient>> = HashMap::new();
    for region in &args.regions {
        let client = Arc::new(ScriptedChildController::new(&format!("http://{}", region)));
        region_map.insert(region.clone(), client.clone());
        region_clients.push(client);
    }
    let mut clients = HashMap::new();
    clients.insert(args.cluster.clone(), region_map);

    let config = CoordinatorConfig::new(vec![args.cluster.clone()]);
    let admin = Arc::new(ParentAdmin::new(
        config, log, tracker, metadata, oracle, clients,
    ));

    admin.start();
    admin.start_cluster(&args.cluster).await?;

    admin
        .create_store(&args.cluster, &args.store, "demo", "\"string\"", "\"string\"")
        .await?;
    info!("Created store '{}'", args.store);

    let version = admin
        .add_version(&args.cluster, &args.store, "demo-push-1", 4, PushType::Batch)
        .await?;
    info!(
        "Admitted push 'demo-push-1' as version {} of '{}'",
        version.number, args.store
    );

    // Regions report the push as finished.
    let topic = naming::work_topic_name(&args.store, version.number);
    for client in &region_clients {
        client.set_job_status(&topic, JobStatusReport::of(ExecutionStatus::Completed));
    }

    match admin.get_push_status(&args.cluster, &topic, None).await {
        Ok(aggregated) => {
            info!("Aggregate push status for '{}': {}", topic, aggregated.status);
            for (region, status) in &aggregated.per_region {
                info!("  {}: {}", region, status);
            }
        }
        Err(err) => error!("Status aggregation failed: {}", err),
    }

    info!("Press Ctrl+C to shut down");
    signal::ctrl_c().await?;

    admin.stop_cluster(&args.cluster);
    admin.close().await;
    Ok(())
}
