//! Application wiring: adapters, the pool actor and the engine components
//! built from one [`AppConfig`].

use crate::account::{AccountIdentity, AccountPool, AccountPoolHandle, BalanceRefresher, spawn_pool};
use crate::chain::{
    ChainRpc, EndpointDirectory, GraphqlChainRpc, PlanetDirectory, RpcError, StaticDirectory,
};
use crate::config::{AppConfig, ConfigError, DirectoryConfig};
use crate::forge::TransactionForge;
use crate::probe::{
    Dispatcher, MemoryProbeStore, PgProbeStore, ProbeStore, ReconciliationEngine, StoreError,
};
use crate::sweep::Sweeper;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build chain client: {0}")]
    Rpc(#[from] RpcError),

    #[error("Failed to open probe store: {0}")]
    Store(#[from] StoreError),
}

/// Collaborators the engine talks to; swapped for doubles in tests
pub struct Adapters {
    pub rpc: Arc<dyn ChainRpc>,
    pub directory: Arc<dyn EndpointDirectory>,
    pub store: Arc<dyn ProbeStore>,
}

/// Tick cadence of the scheduler loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub dispatch_every: Duration,
    pub reconcile_every: Duration,
}

pub struct ProbeApp {
    pub sweeper: Sweeper,
    pub reconciler: ReconciliationEngine,
    pub refresher: Arc<BalanceRefresher>,
    pub pool: AccountPoolHandle,
    pub store: Arc<dyn ProbeStore>,
    pub schedule: Schedule,
}

impl ProbeApp {
    /// Build the production adapters named by the configuration.
    ///
    /// `memory_store` forces the in-memory record store even when
    /// `postgres_url` is set.
    pub async fn from_config(config: &AppConfig, memory_store: bool) -> Result<Self, AppError> {
        let identities = config.identities()?;
        let rpc: Arc<dyn ChainRpc> = Arc::new(GraphqlChainRpc::new(config.rpc_timeouts())?);

        let directory: Arc<dyn EndpointDirectory> = match &config.directory {
            DirectoryConfig::Registry { url, timeout_secs } => Arc::new(PlanetDirectory::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
                &config.networks,
            )?),
            DirectoryConfig::Static => Arc::new(StaticDirectory::from_networks(&config.networks)),
        };

        let store: Arc<dyn ProbeStore> = match (&config.postgres_url, memory_store) {
            (Some(url), false) => {
                let pg = PgProbeStore::connect(url, config.postgres_max_connections).await?;
                pg.ensure_schema().await?;
                info!("Probe records stored in PostgreSQL");
                Arc::new(pg)
            }
            _ => {
                info!("Probe records kept in memory");
                Arc::new(MemoryProbeStore::new())
            }
        };

        Ok(Self::assemble(
            config,
            identities,
            Adapters {
                rpc,
                directory,
                store,
            },
        ))
    }

    /// Wire the engine around the given adapters. Spawns the pool actor, so
    /// it must run inside a tokio runtime.
    pub fn assemble(
        config: &AppConfig,
        identities: Vec<Arc<AccountIdentity>>,
        adapters: Adapters,
    ) -> Self {
        let networks = Arc::new(config.networks.clone());
        let Adapters {
            rpc,
            directory,
            store,
        } = adapters;

        let pool = AccountPool::new(identities.clone(), config.dispatch.failure_streak_limit);
        let (pool, _pool_task) = spawn_pool(pool, config.dispatch.pool_buffer);

        let forge = Arc::new(TransactionForge::new(
            rpc.clone(),
            networks.clone(),
            config.dispatch.transfer_units,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            pool.clone(),
            forge,
            config.dispatch.retry_policy(),
        ));
        let refresher = Arc::new(BalanceRefresher::new(
            rpc.clone(),
            pool.clone(),
            networks.clone(),
            identities.clone(),
        ));
        let sweeper = Sweeper::new(
            directory,
            store.clone(),
            pool.clone(),
            dispatcher,
            refresher.clone(),
            config.dispatch.balance_refresh_every_cycles,
        );
        let reconciler =
            ReconciliationEngine::new(store.clone(), rpc, networks, config.reconcile.settings());

        info!(
            accounts = identities.len(),
            dispatch_secs = config.dispatch.interval_secs,
            reconcile_secs = config.reconcile.interval_secs,
            "Probe engine assembled"
        );

        Self {
            sweeper,
            reconciler,
            refresher,
            pool,
            store,
            schedule: Schedule {
                dispatch_every: Duration::from_secs(config.dispatch.interval_secs),
                reconcile_every: Duration::from_secs(config.reconcile.interval_secs),
            },
        }
    }
}
