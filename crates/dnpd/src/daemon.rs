//! Daemon wiring.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use dnp_common::{
    ComposePortReader, ContainerInventoryProvider, DaemonConfig, DnpPaths, JsonFileStore, KvStore,
    Namespace,
};
use dnp_compose::FsComposePortReader;
use dnp_nat::{
    NatGateway, NatReconciler, PortAggregator, ReconcileReport, ReconcilerSettings, UpnpcGateway,
};
use dnp_watch::{
    AutoUpdateWatcher, ChainDataWatcher, ChainSyncProvider, DiskProbe, DiskUsageWatcher, EventBus,
    NatRenewalWatcher, Scheduler, StatvfsProbe, TaskSpec, UpdateRegistry,
};

use crate::inventory::DockerCliInventory;
use crate::registry::FileRegistry;
use crate::rpc::JsonRpcChainProvider;
use crate::sinks;
use crate::static_ip::StaticIp;

const DOCKER_TIMEOUT: Duration = Duration::from_secs(30);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators of the daemon.
pub struct Providers {
    /// Container inventory.
    pub inventory: Arc<dyn ContainerInventoryProvider>,
    /// Compose file port reader.
    pub compose: Arc<dyn ComposePortReader>,
    /// Router.
    pub gateway: Arc<dyn NatGateway>,
    /// Release index.
    pub registry: Arc<dyn UpdateRegistry>,
    /// Chain node status.
    pub chains: Arc<dyn ChainSyncProvider>,
    /// Filesystem usage.
    pub disk: Arc<dyn DiskProbe>,
    /// Persisted key/value store.
    pub store: Arc<dyn KvStore>,
}

impl Providers {
    /// The providers backed by the host: docker CLI, compose files, `upnpc`,
    /// JSON-RPC nodes, `statvfs` and the JSON store.
    pub fn system(config: &DaemonConfig, paths: &DnpPaths, docker: &str) -> Result<Self> {
        let store = JsonFileStore::open(paths.store())
            .wrap_err_with(|| format!("Failed to open store {}", paths.store().display()))?;

        Ok(Self {
            inventory: Arc::new(DockerCliInventory::new(docker, DOCKER_TIMEOUT)),
            compose: Arc::new(FsComposePortReader::new(paths.clone())),
            gateway: Arc::new(UpnpcGateway::new(
                config.nat.upnpc_binary.clone(),
                config.nat.command_timeout(),
            )),
            registry: Arc::new(FileRegistry::new(paths.registry_index())),
            chains: Arc::new(JsonRpcChainProvider::new(RPC_TIMEOUT)?),
            disk: Arc::new(StatvfsProbe),
            store: Arc::new(store),
        })
    }
}

/// The running daemon: bus, scheduler and watchers.
pub struct Daemon {
    config: DaemonConfig,
    bus: Arc<EventBus>,
    scheduler: Scheduler,
    store: Arc<dyn KvStore>,
    inventory: Arc<dyn ContainerInventoryProvider>,
    static_ip: StaticIp,
    nat: Arc<NatRenewalWatcher>,
    auto_updates: Arc<AutoUpdateWatcher>,
    chains: Arc<ChainDataWatcher>,
    disk: Arc<DiskUsageWatcher>,
}

impl Daemon {
    /// Assemble the daemon. Nothing runs until [`start`](Self::start).
    pub fn build(config: DaemonConfig, paths: &DnpPaths, providers: Providers) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = providers.store;
        let namespace = |prefix: &str| Namespace::new(Arc::clone(&store), prefix);

        let reconciler = NatReconciler::new(
            PortAggregator::new(Arc::clone(&providers.inventory), providers.compose),
            providers.gateway,
            ReconcilerSettings::from(&config.nat),
        );
        let nat = NatRenewalWatcher::new(
            Arc::new(reconciler),
            namespace("nat").entry("upnp_available"),
            Arc::clone(&bus),
        );
        let auto_updates = AutoUpdateWatcher::new(
            Arc::clone(&providers.inventory),
            providers.registry,
            namespace("auto_update").entry("settings"),
            Arc::clone(&bus),
        );
        let chains =
            ChainDataWatcher::new(config.chains.clone(), providers.chains, Arc::clone(&bus));
        let disk = DiskUsageWatcher::new(config.disk.clone(), providers.disk, Arc::clone(&bus));
        let static_ip = StaticIp::new(paths.static_ip(), &namespace("static_ip"));

        Self {
            config,
            bus,
            scheduler: Scheduler::new(),
            inventory: providers.inventory,
            static_ip,
            nat: Arc::new(nat),
            auto_updates: Arc::new(auto_updates),
            chains: Arc::new(chains),
            disk: Arc::new(disk),
            store,
        }
    }

    /// The daemon's event bus.
    #[cfg(test)]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The daemon's scheduler.
    #[cfg(test)]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run a single NAT reconciliation cycle.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        Ok(self.nat.cycle().await?)
    }

    /// Subscribe sinks, install request producers, schedule watchers and
    /// fire the startup requests.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        sinks::install(&self.bus, Namespace::new(Arc::clone(&self.store), "notification"));

        let inventory = Arc::clone(&self.inventory);
        self.bus.request_packages.respond_with(move || {
            let inventory = Arc::clone(&inventory);
            async move { inventory.list().await }
        });
        self.auto_updates.serve_requests();

        match self.static_ip.get() {
            Ok(ip) if !ip.is_empty() => tracing::debug!(%ip, "Using static IP"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Failed to load static IP"),
        }

        let nat = &self.config.nat;
        if nat.enabled {
            self.scheduler.spawn(
                TaskSpec::new("nat-renewal", nat.interval()).with_initial_delay(nat.initial_delay()),
                self.nat.clone(),
            );
        } else {
            tracing::info!("NAT renewal disabled");
        }

        let watchers = &self.config.watchers;
        self.scheduler.spawn(
            TaskSpec::new("auto-updates", watchers.auto_update()),
            self.auto_updates.clone(),
        );
        if self.config.chains.is_empty() {
            tracing::debug!("No chains configured");
        } else {
            self.scheduler
                .spawn(TaskSpec::new("chains", watchers.chains()), self.chains.clone());
        }
        self.scheduler.spawn(
            TaskSpec::new("disk-usage", watchers.disk_usage()),
            self.disk.clone(),
        );

        self.bus.request_auto_update_data.trigger();
        self.bus.request_packages.trigger();

        tracing::info!(tasks = self.scheduler.len(), "Daemon started");
    }

    /// Stop every watcher and wait for in-flight runs.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.scheduler.shutdown().await;
    }

    /// Start and run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.start();
        tokio::signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl-C")?;
        self.shutdown().await;
        Ok(())
    }
}
