//! The HLV node orchestrator.
//!
//! Wires storage, the built-in providers, scheduler, engine and service
//! together, then runs the worker loop, the HTTP API and the internal
//! chain's block producer as background tasks.

use anyhow::Result;
use hlv_core::{Clock, SystemClock};
use hlv_engine::{SwapContext, SwapEngine, SwapService, Worker};
use hlv_ledger::{ISwapLedger, MemoryLedger};
use hlv_providers::{Capabilities, InternalHtlcContract, InternalPaymentNetwork};
use hlv_scheduler::{IJobJournal, MemoryJournal, Scheduler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{build_router, ApiState};
use crate::config::HlvConfig;
use crate::journal::RocksJournal;
use crate::ledger::RocksLedger;
use crate::storage::Storage;

/// The HLV node, orchestrating all layers.
pub struct HlvNode {
    config: HlvConfig,
    ctx: SwapContext,
    service: SwapService,
    worker: Arc<Worker>,
    contract: Arc<InternalHtlcContract>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl HlvNode {
    /// Create a node with the given config. Opens storage but starts nothing.
    pub fn new(config: HlvConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (ledger, journal): (Arc<dyn ISwapLedger>, Arc<dyn IJobJournal>) =
            if config.storage.in_memory {
                tracing::warn!("in-memory storage: swaps and jobs will not survive a restart");
                (Arc::new(MemoryLedger::new()), Arc::new(MemoryJournal::new()))
            } else {
                let storage = Arc::new(Storage::open(&config.storage.data_dir)?);
                (
                    Arc::new(RocksLedger::new(storage.clone())),
                    Arc::new(RocksJournal::new(storage)),
                )
            };

        let payment = Arc::new(InternalPaymentNetwork::new(clock.clone()));
        let contract = Arc::new(InternalHtlcContract::new(clock.clone()));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), clock.clone(), journal)?);
        let stats = scheduler.stats();
        tracing::info!(
            queued = stats.queued,
            leased = stats.leased,
            dead = stats.dead,
            "job journal replayed"
        );

        let ctx = SwapContext::new(
            ledger,
            Capabilities::new(payment, contract.clone()),
            scheduler,
            clock,
            config.swap.clone(),
        );
        let engine = SwapEngine::new(ctx.clone());
        let service = SwapService::new(engine.clone(), config.agent.clone());
        let worker = Arc::new(Worker::new(engine, config.watcher.clone(), "node"));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            ctx,
            service,
            worker,
            contract,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    pub fn service(&self) -> &SwapService {
        &self.service
    }

    pub fn context(&self) -> &SwapContext {
        &self.ctx
    }

    /// Start the worker, the block producer and the HTTP API.
    ///
    /// Returns the address the API is bound to.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let worker = self.worker.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            worker.run(shutdown).await;
        }));

        let contract = self.contract.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let block_interval = Duration::from_secs(self.config.providers.block_interval_secs);
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        contract.mine_blocks(1);
                        tracing::trace!(height = contract.height(), "block produced");
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));

        let api_addr: SocketAddr = self.config.api_addr().parse()?;
        let listener = tokio::net::TcpListener::bind(api_addr).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(ApiState::new(self.service.clone(), self.ctx.scheduler.clone()));
        let mut shutdown = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, build_router(state)).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "HTTP API server error");
            }
        }));
        tracing::info!(%local_addr, "HTTP API server started");

        Ok(local_addr)
    }

    /// Signal every background task to stop and wait for them.
    pub async fn shutdown(mut self) -> Result<()> {
        tracing::info!("shutting down HLV node");
        self.shutdown_tx.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "background task failed");
            }
        }
        tracing::info!("HLV node shut down");
        Ok(())
    }
}
