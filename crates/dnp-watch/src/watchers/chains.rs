//! Blockchain node sync status.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dnp_common::DnpResult;
use dnp_common::config::ChainConfig;
use dnp_common::events::ChainData;

use crate::bus::EventBus;
use crate::scheduler::Job;

/// What a node reports about its sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Caught up with the network.
    Synced {
        /// Latest local block.
        block: u64,
    },
    /// Still downloading blocks.
    Syncing {
        /// Latest local block.
        current: u64,
        /// Highest block known from peers.
        highest: u64,
    },
}

/// Queries the sync state of a node.
#[async_trait]
pub trait ChainSyncProvider: Send + Sync {
    /// Current sync state of `chain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be reached or answers garbage.
    async fn status(&self, chain: &ChainConfig) -> DnpResult<SyncStatus>;
}

/// Sync progress in percent, within `[0, 100]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sync_progress(status: SyncStatus) -> f64 {
    match status {
        SyncStatus::Synced { .. } => 100.0,
        SyncStatus::Syncing { highest: 0, .. } => 0.0,
        SyncStatus::Syncing { current, highest } => {
            (current as f64 / highest as f64 * 100.0).clamp(0.0, 100.0)
        }
    }
}

/// Entry published for one chain.
#[must_use]
pub fn chain_data(chain: &ChainConfig, status: &DnpResult<SyncStatus>) -> ChainData {
    let (syncing, error, message, progress) = match status {
        Ok(status @ SyncStatus::Syncing { current, highest }) => (
            true,
            false,
            format!("Blocks synced: {current} / {highest}"),
            Some(sync_progress(*status)),
        ),
        Ok(status @ SyncStatus::Synced { block }) => (
            false,
            false,
            format!("Synced #{block}"),
            Some(sync_progress(*status)),
        ),
        Err(e) => (false, true, format!("Could not connect to RPC: {e}"), None),
    };

    ChainData {
        dnp_name: chain.dnp_name.clone(),
        name: chain.name.clone(),
        syncing,
        error,
        message,
        progress,
    }
}

/// Publishes the sync status of every configured chain.
pub struct ChainDataWatcher {
    chains: Vec<ChainConfig>,
    provider: Arc<dyn ChainSyncProvider>,
    bus: Arc<EventBus>,
}

impl ChainDataWatcher {
    /// Create the watcher.
    pub fn new(
        chains: Vec<ChainConfig>,
        provider: Arc<dyn ChainSyncProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            chains,
            provider,
            bus,
        }
    }

    /// Status of every chain, in configuration order.
    pub async fn collect(&self) -> Vec<ChainData> {
        let mut data = Vec::with_capacity(self.chains.len());
        for chain in &self.chains {
            let status = self.provider.status(chain).await;
            if let Err(e) = &status {
                tracing::debug!(chain = %chain.name, error = %e, "Chain status unavailable");
            }
            data.push(chain_data(chain, &status));
        }
        data
    }
}

impl fmt::Debug for ChainDataWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainDataWatcher")
            .field("chains", &self.chains)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for ChainDataWatcher {
    async fn run(&self) -> DnpResult<()> {
        let data = self.collect().await;
        self.bus.chain_data.emit(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnp_common::DnpError;
    use parking_lot::Mutex;

    fn chain(name: &str) -> ChainConfig {
        ChainConfig {
            name: name.to_string(),
            dnp_name: format!("{name}.dnp.dappnode.eth"),
            rpc_url: format!("http://{name}.dappnode:8545"),
        }
    }

    #[test]
    fn progress_is_a_clamped_ratio() {
        let half = SyncStatus::Syncing {
            current: 50,
            highest: 100,
        };
        assert!((sync_progress(half) - 50.0).abs() < f64::EPSILON);

        let ahead = SyncStatus::Syncing {
            current: 120,
            highest: 100,
        };
        assert!((sync_progress(ahead) - 100.0).abs() < f64::EPSILON);

        let unknown = SyncStatus::Syncing {
            current: 10,
            highest: 0,
        };
        assert!(sync_progress(unknown).abs() < f64::EPSILON);
    }

    #[test]
    fn synced_node_is_complete() {
        let data = chain_data(&chain("geth"), &Ok(SyncStatus::Synced { block: 1_234 }));
        assert!(!data.syncing);
        assert!(!data.error);
        assert_eq!(data.progress, Some(100.0));
        assert_eq!(data.message, "Synced #1234");
    }

    #[test]
    fn provider_error_becomes_error_entry() {
        let data = chain_data(
            &chain("geth"),
            &Err(DnpError::provider("chain", "connection refused")),
        );
        assert!(data.error);
        assert_eq!(data.progress, None);
        assert_eq!(data.dnp_name, "geth.dnp.dappnode.eth");
    }

    struct Nodes;

    #[async_trait]
    impl ChainSyncProvider for Nodes {
        async fn status(&self, chain: &ChainConfig) -> DnpResult<SyncStatus> {
            match chain.name.as_str() {
                "geth" => Ok(SyncStatus::Syncing {
                    current: 25,
                    highest: 100,
                }),
                "nethermind" => Ok(SyncStatus::Synced { block: 99 }),
                _ => Err(DnpError::provider("chain", "connection refused")),
            }
        }
    }

    #[tokio::test]
    async fn one_broken_chain_does_not_hide_the_others() {
        let bus = Arc::new(EventBus::new());
        let watcher = ChainDataWatcher::new(
            vec![chain("geth"), chain("broken"), chain("nethermind")],
            Arc::new(Nodes),
            Arc::clone(&bus),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.chain_data.on(move |data| {
            sink.lock().extend(data.iter().map(|d| (d.name.clone(), d.error)));
            Ok(())
        });

        watcher.run().await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                ("geth".to_string(), false),
                ("broken".to_string(), true),
                ("nethermind".to_string(), false),
            ]
        );
    }
}
