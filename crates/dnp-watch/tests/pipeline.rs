//! Scheduler driving watchers that publish on the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dnp_common::config::ChainConfig;
use dnp_common::{DnpError, DnpResult, PackageContainer};
use dnp_watch::{ChainDataWatcher, ChainSyncProvider, EventBus, JobFn, Scheduler, SyncStatus, TaskSpec};
use parking_lot::Mutex;

struct SlowNode;

#[async_trait]
impl ChainSyncProvider for SlowNode {
    async fn status(&self, _chain: &ChainConfig) -> DnpResult<SyncStatus> {
        tokio::time::sleep(Duration::from_secs(12)).await;
        Ok(SyncStatus::Synced { block: 1 })
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn slow_provider_skips_ticks_but_keeps_publishing() {
    let bus = Arc::new(EventBus::new());
    let published = Arc::new(Mutex::new(0_u32));
    let sink = Arc::clone(&published);
    bus.chain_data.on(move |_| {
        *sink.lock() += 1;
        Ok(())
    });

    let watcher = ChainDataWatcher::new(
        vec![ChainConfig {
            name: "geth".to_string(),
            dnp_name: "geth.dnp.dappnode.eth".to_string(),
            rpc_url: "http://geth.dappnode:8545".to_string(),
        }],
        Arc::new(SlowNode),
        Arc::clone(&bus),
    );

    let scheduler = Scheduler::new();
    let task = scheduler.spawn(TaskSpec::new("chains", Duration::from_secs(5)), Arc::new(watcher));

    // Runs start at 0s and 15s; ticks at 5s and 10s find the first still busy.
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(*published.lock(), 1);
    assert_eq!(task.skipped(), 2);

    scheduler.shutdown().await;
    assert_eq!(*published.lock(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn scheduled_trigger_answers_on_response_topic() {
    let bus = Arc::new(EventBus::new());
    let attempts = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&attempts);
    bus.request_packages.respond_with(move || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = {
                let mut attempts = counter.lock();
                *attempts += 1;
                *attempts
            };
            if attempt == 1 {
                return Err(DnpError::InventoryUnavailable {
                    message: "docker not ready".to_string(),
                });
            }
            Ok(vec![PackageContainer::new("admin.dnp.dappnode.eth", true)])
        }
    });

    let inventories = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inventories);
    bus.packages.on(move |packages| {
        sink.lock().push(packages.len());
        Ok(())
    });

    let scheduler = Scheduler::new();
    let trigger_bus = Arc::clone(&bus);
    scheduler.spawn(
        TaskSpec::new("refresh-packages", Duration::from_secs(30)),
        Arc::new(JobFn(move || {
            let bus = Arc::clone(&trigger_bus);
            async move {
                if let Some(run) = bus.request_packages.trigger() {
                    run.await.map_err(|e| DnpError::Internal {
                        message: e.to_string(),
                    })?;
                }
                Ok::<(), DnpError>(())
            }
        })),
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    scheduler.shutdown().await;

    assert_eq!(*attempts.lock(), 2);
    assert_eq!(*inventories.lock(), vec![1]);
}
